#![no_main]

use libfuzzer_sys::fuzz_target;
use layerdex_indexer::scanner::dpkg::parse_status;

fuzz_target!(|data: &[u8]| {
    if let Ok(content) = std::str::from_utf8(data) {
        let packages = parse_status("var/lib/dpkg/status", content);
        for pkg in &packages {
            assert!(!pkg.name.is_empty());
        }
    }
});
