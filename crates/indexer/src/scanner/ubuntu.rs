//! Ubuntu 배포판 스캐너
//!
//! `etc/os-release`, `etc/lsb-release` 순서로 파일을 확인하고, 파일마다 릴리스
//! 시그니처를 선언 순서대로 대조합니다. 첫 번째로 일치한 (파일, 시그니처)가 결과입니다.
//!
//! - 두 파일 모두 없음: absent
//! - 파일은 있지만 일치하는 시그니처 없음: 빈 결과

use std::sync::LazyLock;

use regex::bytes::{Regex, RegexBuilder};
use tracing::debug;

use layerdex_core::types::{Distribution, ScannerKind};

use crate::context::ScanContext;
use crate::error::ScanError;
use crate::layer::Layer;
use crate::scanner::{Entities, Scanner, run_blocking};

/// 스캐너 이름
pub const NAME: &str = "ubuntu";

/// 스캐너 버전
pub const VERSION: &str = "0.1.0";

/// 확인하는 파일 (순서대로)
pub const PROBE_PATHS: [&str; 2] = ["etc/os-release", "etc/lsb-release"];

/// Ubuntu 릴리스
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Release {
    /// 코드네임 (소문자)
    pub codename: &'static str,
    /// 버전 번호
    pub version_id: &'static str,
}

/// 시그니처 대조 순서
pub const RELEASES: &[Release] = &[
    Release { codename: "artful", version_id: "17.10" },
    Release { codename: "bionic", version_id: "18.04" },
    Release { codename: "cosmic", version_id: "18.10" },
    Release { codename: "disco", version_id: "19.04" },
    Release { codename: "precise", version_id: "12.04" },
    Release { codename: "trusty", version_id: "14.04" },
    Release { codename: "xenial", version_id: "16.04" },
    Release { codename: "eoan", version_id: "19.10" },
    Release { codename: "focal", version_id: "20.04" },
    Release { codename: "impish", version_id: "21.10" },
    Release { codename: "jammy", version_id: "22.04" },
    Release { codename: "kinetic", version_id: "22.10" },
    Release { codename: "lunar", version_id: "23.04" },
    Release { codename: "mantic", version_id: "23.10" },
    Release { codename: "noble", version_id: "24.04" },
];

static SIGNATURES: LazyLock<Vec<(Release, Regex)>> = LazyLock::new(|| {
    RELEASES
        .iter()
        .filter_map(|release| {
            RegexBuilder::new(&format!(r"\bubuntu\b.*\b{}\b", release.codename))
                .case_insensitive(true)
                .dot_matches_new_line(true)
                .build()
                .ok()
                .map(|re| (*release, re))
        })
        .collect()
});

impl Release {
    /// 릴리스에 대응하는 배포판 정보
    pub fn distribution(&self) -> Distribution {
        let mut title = self.codename.to_owned();
        if let Some(first) = title.get_mut(0..1) {
            first.make_ascii_uppercase();
        }
        Distribution {
            did: "ubuntu".to_owned(),
            name: "Ubuntu".to_owned(),
            version: format!("{} ({})", self.version_id, title),
            version_id: self.version_id.to_owned(),
            version_code_name: self.codename.to_owned(),
            pretty_name: format!("Ubuntu {}", self.version_id),
        }
    }
}

/// 파일 내용에서 Ubuntu 릴리스를 찾습니다.
pub fn parse(contents: &[u8]) -> Option<Distribution> {
    SIGNATURES
        .iter()
        .find(|(_, re)| re.is_match(contents))
        .map(|(release, _)| release.distribution())
}

/// Ubuntu 배포판 스캐너
#[derive(Debug, Clone, Default)]
pub struct UbuntuScanner;

impl Scanner for UbuntuScanner {
    fn name(&self) -> &str {
        NAME
    }

    fn version(&self) -> &str {
        VERSION
    }

    fn kind(&self) -> ScannerKind {
        ScannerKind::Distribution
    }

    async fn scan(&self, ctx: &ScanContext, layer: &Layer) -> Result<Option<Entities>, ScanError> {
        let ctx = ctx.clone();
        let layer = layer.clone();
        run_blocking(move || {
            let _entered = ctx.span().enter();
            let files = layer.files(&ctx, &PROBE_PATHS)?;
            if files.is_empty() {
                debug!(layer = %layer.hash(), "didn't find an os-release or lsb-release file");
                return Ok(None);
            }
            for (path, contents) in files.found() {
                if let Some(dist) = parse(contents) {
                    debug!(layer = %layer.hash(), path, release = %dist.version_code_name, "identified ubuntu release");
                    return Ok(Some(Entities::Distributions(vec![dist])));
                }
            }
            Ok(Some(Entities::Distributions(Vec::new())))
        })
        .await
    }
}
