//! 스캐너 계약: 패키지/배포판/저장소 스캐너의 공통 인터페이스
//!
//! [`Scanner`] trait은 RPITIT를 사용하므로 `dyn Scanner`가 불가합니다.
//! [`DynScanner`]는 `BoxFuture`를 반환하여 서로 다른 스캐너를
//! `Vec<Arc<dyn DynScanner>>`로 함께 다룰 수 있게 합니다.
//!
//! # 스캔 결과
//!
//! - `Ok(None)`: 스캐너가 레이어에서 아무것도 인식하지 못함 (absent)
//! - `Ok(Some(entities))`: 트리거를 찾음. 엔티티가 0개일 수도 있음
//! - `Err(_)`: 이 스캐너만 실패. 같은 레이어의 다른 스캐너는 영향받지 않음
//!
//! 반환 엔티티 종류는 스캐너 종류와 일치해야 합니다 ([`into_findings`]).
//! 패키지/저장소 스캐너는 읽은 provenance 경로(`sources`)도 함께 돌려줍니다.
//! 엔티티가 0개인 경로도 포함해야 병합 시 이전 레이어의 집합이 비워집니다.

pub mod apt;
pub mod dpkg;
pub mod registry;
pub mod ubuntu;

use std::future::Future;
use std::pin::Pin;

use layerdex_core::report::LayerFindings;
use layerdex_core::types::{Digest, Distribution, Package, Repository, ScannerIdentity, ScannerKind};

use crate::context::ScanContext;
use crate::error::ScanError;
use crate::layer::Layer;

pub use registry::{Ecosystem, ScannerRegistry};

/// `Send` 가능한 boxed future
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// 스캐너가 반환하는 엔티티 묶음
///
/// 스캐너 종류별로 하나의 variant가 대응됩니다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entities {
    /// 패키지 스캐너 결과
    Packages {
        /// 읽은 패키지 DB 경로
        sources: Vec<String>,
        /// 발견된 패키지
        packages: Vec<Package>,
    },
    /// 배포판 스캐너 결과
    Distributions(Vec<Distribution>),
    /// 저장소 스캐너 결과
    Repositories {
        /// 읽은 sources 파일 경로
        sources: Vec<String>,
        /// 발견된 저장소
        repositories: Vec<Repository>,
    },
}

impl Entities {
    /// 패키지 결과. 경로는 각 패키지의 `package_db`에서 가져옵니다.
    pub fn packages(packages: Vec<Package>) -> Self {
        Self::Packages {
            sources: Vec::new(),
            packages,
        }
    }

    /// 저장소 결과. 경로는 각 저장소의 `source_path`에서 가져옵니다.
    pub fn repositories(repositories: Vec<Repository>) -> Self {
        Self::Repositories {
            sources: Vec::new(),
            repositories,
        }
    }

    /// 엔티티 종류
    pub fn kind(&self) -> ScannerKind {
        match self {
            Self::Packages { .. } => ScannerKind::Package,
            Self::Distributions(_) => ScannerKind::Distribution,
            Self::Repositories { .. } => ScannerKind::Repository,
        }
    }

    /// 엔티티 수
    pub fn len(&self) -> usize {
        match self {
            Self::Packages { packages, .. } => packages.len(),
            Self::Distributions(v) => v.len(),
            Self::Repositories { repositories, .. } => repositories.len(),
        }
    }

    /// 엔티티가 없는지 여부
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 스캔 결과를 캐시 단위인 [`LayerFindings`]로 변환합니다.
///
/// 스캐너 종류와 엔티티 종류가 다르면 [`ScanError::KindMismatch`]입니다.
/// `sources`에는 스캐너가 알려준 경로와 엔티티의 provenance 경로가 정렬되어 들어갑니다.
pub fn into_findings(
    layer: &Digest,
    scanner: &ScannerIdentity,
    result: Option<Entities>,
) -> Result<LayerFindings, ScanError> {
    let Some(entities) = result else {
        return Ok(LayerFindings::absent(layer.clone(), scanner.clone()));
    };
    if entities.kind() != scanner.kind {
        return Err(ScanError::KindMismatch {
            expected: scanner.kind,
            actual: entities.kind(),
        });
    }

    let mut findings = LayerFindings::empty(layer.clone(), scanner.clone());
    match entities {
        Entities::Packages { sources, packages } => {
            findings.sources = merge_sources(sources, packages.iter().map(|p| p.package_db.as_str()));
            findings.packages = packages;
        }
        Entities::Distributions(v) => findings.distributions = v,
        Entities::Repositories {
            sources,
            repositories,
        } => {
            findings.sources =
                merge_sources(sources, repositories.iter().map(|r| r.source_path.as_str()));
            findings.repositories = repositories;
        }
    }
    Ok(findings)
}

fn merge_sources<'a>(mut sources: Vec<String>, found: impl Iterator<Item = &'a str>) -> Vec<String> {
    sources.extend(found.map(str::to_owned));
    sources.sort();
    sources.dedup();
    sources
}

/// 레이어 스캐너 trait
///
/// 스캐너는 레이어를 보관하지 않습니다. 아카이브 읽기는 blocking이므로
/// 구현체는 `spawn_blocking`으로 옮겨서 실행하고, 엔트리마다
/// [`ScanContext::check`]로 취소를 확인해야 합니다.
///
/// # 구현 예시
/// ```ignore
/// struct Hostname;
///
/// impl Scanner for Hostname {
///     fn name(&self) -> &str { "hostname" }
///     fn version(&self) -> &str { "0.1.0" }
///     fn kind(&self) -> ScannerKind { ScannerKind::Distribution }
///
///     async fn scan(&self, ctx: &ScanContext, layer: &Layer)
///         -> Result<Option<Entities>, ScanError>
///     {
///         Ok(None)
///     }
/// }
/// ```
pub trait Scanner: Send + Sync + 'static {
    /// 스캐너 이름. 레지스트리 안에서 고유해야 합니다.
    fn name(&self) -> &str;

    /// 스캐너 버전. 결과가 달라지는 변경마다 올려야 캐시가 무효화됩니다.
    fn version(&self) -> &str;

    /// 스캐너 종류
    fn kind(&self) -> ScannerKind;

    /// (name, version, kind) 식별자
    fn identity(&self) -> ScannerIdentity {
        ScannerIdentity::new(self.name(), self.version(), self.kind())
    }

    /// 네트워크 접근이 필요한지 여부. airgap 모드에서는 제외됩니다.
    fn requires_network(&self) -> bool {
        false
    }

    /// 스캐너별 설정 payload (JSON 바이트)를 적용합니다.
    fn configure(&mut self, payload: &[u8]) -> Result<(), ScanError> {
        let _ = payload;
        Ok(())
    }

    /// 레이어를 스캔합니다.
    fn scan(
        &self,
        ctx: &ScanContext,
        layer: &Layer,
    ) -> impl Future<Output = Result<Option<Entities>, ScanError>> + Send;
}

/// dyn-compatible 스캐너 trait
///
/// [`Scanner`]를 구현한 타입은 자동으로 구현됩니다.
pub trait DynScanner: Send + Sync {
    /// 스캐너 이름
    fn name(&self) -> &str;

    /// 스캐너 식별자
    fn identity(&self) -> ScannerIdentity;

    /// 네트워크 접근 필요 여부
    fn requires_network(&self) -> bool;

    /// 레이어를 스캔합니다.
    fn scan<'a>(
        &'a self,
        ctx: &'a ScanContext,
        layer: &'a Layer,
    ) -> BoxFuture<'a, Result<Option<Entities>, ScanError>>;
}

impl<T: Scanner> DynScanner for T {
    fn name(&self) -> &str {
        Scanner::name(self)
    }

    fn identity(&self) -> ScannerIdentity {
        Scanner::identity(self)
    }

    fn requires_network(&self) -> bool {
        Scanner::requires_network(self)
    }

    fn scan<'a>(
        &'a self,
        ctx: &'a ScanContext,
        layer: &'a Layer,
    ) -> BoxFuture<'a, Result<Option<Entities>, ScanError>> {
        Box::pin(Scanner::scan(self, ctx, layer))
    }
}

/// blocking 스캔 함수를 `spawn_blocking`으로 실행합니다.
///
/// 태스크가 panic하거나 런타임이 종료되면 [`ScanError::Internal`]입니다.
pub(crate) async fn run_blocking<T, F>(f: F) -> Result<T, ScanError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ScanError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ScanError::Internal(format!("blocking scan task failed: {e}")))?
}
