#![no_main]

use libfuzzer_sys::fuzz_target;
use layerdex_indexer::scanner::apt::parse_sources_list;

fuzz_target!(|data: &[u8]| {
    if let Ok(content) = std::str::from_utf8(data) {
        let _ = parse_sources_list("etc/apt/sources.list", content);
    }
});
