#![no_main]

use libfuzzer_sys::fuzz_target;
use layerdex_indexer::scanner::ubuntu;

fuzz_target!(|data: &[u8]| {
    let _ = ubuntu::parse(data);
});
