#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use layerdex_core::types::Digest;
use layerdex_indexer::{Layer, ScanContext};

/// 퍼저용 구조적 입력
#[derive(Arbitrary, Debug)]
enum FuzzInput {
    /// 임의 바이트를 그대로 tar로 취급
    Raw(Vec<u8>),
    /// 유효한 tar 안에 임의 경로와 내용
    Entries(Vec<(String, Vec<u8>)>),
}

const PROBES: &[&str] = &[
    "etc/os-release",
    "usr/lib/os-release",
    "etc/lsb-release",
    "var/lib/dpkg/status",
    "etc/apt/sources.list",
];

fn build_tar(entries: &[(String, Vec<u8>)]) -> Option<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, data) in entries.iter().take(16) {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        if header.set_path(path).is_err() {
            continue;
        }
        header.set_cksum();
        builder.append(&header, data.as_slice()).ok()?;
    }
    builder.into_inner().ok()
}

fuzz_target!(|input: FuzzInput| {
    let bytes = match input {
        FuzzInput::Raw(bytes) => bytes,
        FuzzInput::Entries(entries) => match build_tar(&entries) {
            Some(bytes) => bytes,
            None => return,
        },
    };

    let Ok(hash) = format!("sha256:{}", "0".repeat(64)).parse::<Digest>() else {
        return;
    };
    let layer = Layer::from_bytes(hash, 0, bytes);
    let ctx = ScanContext::detached();
    let _ = layer.files(&ctx, PROBES);
});
