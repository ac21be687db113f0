//! 스캐너 레지스트리: 스캐너와 에코시스템의 명시적 등록부
//!
//! 전역 레지스트리는 없습니다. 시작 시점에 [`ScannerRegistry`]를 만들어
//! 컨트롤러에 전달합니다. 스캐너별 설정 payload는 등록 시점에 적용됩니다.
//!
//! # 사용 예시
//! ```ignore
//! let mut registry = ScannerRegistry::with_payloads(config.scanner_payloads()?);
//! registry.register(DpkgScanner::new())?;
//! registry.register(UbuntuScanner)?;
//! registry.register_ecosystem(Ecosystem::new("debian", ["dpkg", "ubuntu"]))?;
//!
//! let active = registry.resolve(&["debian".to_owned()], false)?;
//! ```

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tracing::{debug, warn};

use layerdex_core::types::ScannerIdentity;

use crate::error::IndexerError;
use crate::scanner::apt::AptSourcesScanner;
use crate::scanner::dpkg::DpkgScanner;
use crate::scanner::ubuntu::UbuntuScanner;
use crate::scanner::{DynScanner, Scanner};

/// 기본 에코시스템 이름
pub const DEBIAN_ECOSYSTEM: &str = "debian";

/// 함께 스캔되는 스캐너 묶음
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ecosystem {
    /// 에코시스템 이름
    pub name: String,
    /// 포함된 스캐너 이름 (등록 순서)
    pub scanners: Vec<String>,
}

impl Ecosystem {
    /// 새 에코시스템을 생성합니다.
    pub fn new<I, S>(name: impl Into<String>, scanners: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            scanners: scanners.into_iter().map(Into::into).collect(),
        }
    }
}

/// 스캐너 레지스트리
pub struct ScannerRegistry {
    scanners: Vec<Arc<dyn DynScanner>>,
    ecosystems: Vec<Ecosystem>,
    payloads: BTreeMap<String, Vec<u8>>,
}

impl ScannerRegistry {
    /// 빈 레지스트리를 생성합니다.
    pub fn new() -> Self {
        Self::with_payloads(BTreeMap::new())
    }

    /// 스캐너 이름 → 설정 payload를 가진 빈 레지스트리를 생성합니다.
    pub fn with_payloads(payloads: BTreeMap<String, Vec<u8>>) -> Self {
        Self {
            scanners: Vec::new(),
            ecosystems: Vec::new(),
            payloads,
        }
    }

    /// 내장 스캐너와 `debian` 에코시스템이 등록된 레지스트리를 생성합니다.
    pub fn builtin(payloads: BTreeMap<String, Vec<u8>>) -> Result<Self, IndexerError> {
        let mut registry = Self::with_payloads(payloads);
        registry.register(DpkgScanner::new())?;
        registry.register(UbuntuScanner)?;
        registry.register(AptSourcesScanner)?;
        registry.register_ecosystem(Ecosystem::new(
            DEBIAN_ECOSYSTEM,
            [
                crate::scanner::dpkg::NAME,
                crate::scanner::ubuntu::NAME,
                crate::scanner::apt::NAME,
            ],
        ))?;

        for name in registry.payloads.keys() {
            if registry.get(name).is_none() {
                warn!(scanner = %name, "configuration payload for unknown scanner ignored");
            }
        }
        Ok(registry)
    }

    /// 스캐너를 등록합니다.
    ///
    /// 같은 이름의 payload가 있으면 등록 전에 적용합니다.
    /// 동일한 이름의 스캐너가 이미 있으면 에러를 반환합니다.
    pub fn register<S: Scanner>(&mut self, mut scanner: S) -> Result<(), IndexerError> {
        let name = Scanner::name(&scanner).to_owned();
        if self.get(&name).is_some() {
            return Err(IndexerError::Registry(format!(
                "scanner '{name}' is already registered"
            )));
        }

        if let Some(payload) = self.payloads.get(&name) {
            scanner
                .configure(payload)
                .map_err(|e| IndexerError::Config {
                    field: format!("indexer.scanners.{name}"),
                    reason: e.to_string(),
                })?;
        }

        debug!(scanner = %Scanner::identity(&scanner), "registered scanner");
        self.scanners.push(Arc::new(scanner));
        Ok(())
    }

    /// 에코시스템을 등록합니다.
    ///
    /// 모든 스캐너 이름이 등록되어 있어야 하고, 에코시스템 이름은 고유해야 합니다.
    pub fn register_ecosystem(&mut self, ecosystem: Ecosystem) -> Result<(), IndexerError> {
        if self.ecosystem(&ecosystem.name).is_some() {
            return Err(IndexerError::Registry(format!(
                "ecosystem '{}' is already registered",
                ecosystem.name
            )));
        }
        if let Some(missing) = ecosystem.scanners.iter().find(|s| self.get(s).is_none()) {
            return Err(IndexerError::Registry(format!(
                "ecosystem '{}' references unknown scanner '{missing}'",
                ecosystem.name
            )));
        }
        self.ecosystems.push(ecosystem);
        Ok(())
    }

    /// 이름으로 스캐너를 조회합니다.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn DynScanner>> {
        self.scanners.iter().find(|s| s.name() == name)
    }

    /// 이름으로 에코시스템을 조회합니다.
    pub fn ecosystem(&self, name: &str) -> Option<&Ecosystem> {
        self.ecosystems.iter().find(|e| e.name == name)
    }

    /// 등록된 스캐너 (등록 순서)
    pub fn scanners(&self) -> &[Arc<dyn DynScanner>] {
        &self.scanners
    }

    /// 등록된 에코시스템 (등록 순서)
    pub fn ecosystems(&self) -> &[Ecosystem] {
        &self.ecosystems
    }

    /// 등록된 스캐너 식별자 목록
    pub fn identities(&self) -> Vec<ScannerIdentity> {
        self.scanners.iter().map(|s| s.identity()).collect()
    }

    /// 에코시스템 목록을 활성 스캐너 집합으로 풀어냅니다.
    ///
    /// 여러 에코시스템에 속한 스캐너는 한 번만 포함됩니다. `airgap`이면
    /// 네트워크가 필요한 스캐너를 제외합니다. 알 수 없는 에코시스템은 에러입니다.
    pub fn resolve(
        &self,
        ecosystems: &[String],
        airgap: bool,
    ) -> Result<Vec<Arc<dyn DynScanner>>, IndexerError> {
        let mut seen = HashSet::new();
        let mut active = Vec::new();

        for name in ecosystems {
            let ecosystem = self
                .ecosystem(name)
                .ok_or_else(|| IndexerError::Registry(format!("unknown ecosystem '{name}'")))?;
            for scanner_name in &ecosystem.scanners {
                if !seen.insert(scanner_name.as_str()) {
                    continue;
                }
                let Some(scanner) = self.get(scanner_name) else {
                    continue;
                };
                if airgap && scanner.requires_network() {
                    debug!(scanner = %scanner.identity(), "skipping network scanner in airgap mode");
                    continue;
                }
                active.push(Arc::clone(scanner));
            }
        }

        Ok(active)
    }
}

impl Default for ScannerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ScannerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScannerRegistry")
            .field(
                "scanners",
                &self.scanners.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .field("ecosystems", &self.ecosystems)
            .finish()
    }
}
