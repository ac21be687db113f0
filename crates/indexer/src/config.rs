//! 인덱서 설정
//!
//! [`IndexerConfig`]는 core의 `[indexer]` 섹션
//! ([`layerdex_core::config::IndexerConfig`])에서 파이프라인 실행에 필요한 값만
//! 가져오고, 모듈 고유 설정(저장된 리포트 재사용 여부)을 추가합니다.
//! fetch 관련 값(`verify_digests`, `max_layer_size`)은 [`LocalFetcher::from_config`]가
//! 사용합니다.
//!
//! # 사용 예시
//!
//! ```
//! use layerdex_indexer::IndexerConfigBuilder;
//!
//! let config = IndexerConfigBuilder::new()
//!     .layer_concurrency(8)
//!     .airgap(true)
//!     .build()
//!     .unwrap();
//! assert_eq!(config.layer_concurrency, 8);
//! ```
//!
//! [`LocalFetcher::from_config`]: crate::fetcher::LocalFetcher::from_config

use std::time::Duration;

use serde::{Deserialize, Serialize};

use layerdex_core::config::{MAX_FETCH_RETRIES, MAX_LAYER_CONCURRENCY, MAX_SCANNER_CONCURRENCY};

use crate::error::IndexerError;
use crate::scanner::registry::DEBIAN_ECOSYSTEM;

/// 인덱서 실행 설정
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// 매니페스트당 동시에 처리하는 레이어 수
    pub layer_concurrency: usize,
    /// 레이어당 동시에 실행하는 스캐너 수
    pub scanner_concurrency: usize,
    /// 네트워크가 필요한 스캐너 제외
    pub airgap: bool,
    /// 활성 에코시스템
    pub ecosystems: Vec<String>,
    /// fetch 재시도 횟수 (첫 시도 제외)
    pub fetch_retries: u32,
    /// 재시도 간격 기준 (ms). n번째 재시도 전에 `n * fetch_backoff_ms` 대기
    pub fetch_backoff_ms: u64,
    /// fetch 한 번의 타임아웃 (초)
    pub fetch_timeout_secs: u64,

    // --- 모듈 고유 확장 ---
    /// 같은 스캐너 집합으로 만든 저장된 리포트가 있으면 재사용
    pub reuse_reports: bool,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            layer_concurrency: 4,
            scanner_concurrency: 4,
            airgap: false,
            ecosystems: vec![DEBIAN_ECOSYSTEM.to_owned()],
            fetch_retries: 3,
            fetch_backoff_ms: 200,
            fetch_timeout_secs: 60,
            reuse_reports: true,
        }
    }
}

impl IndexerConfig {
    /// core의 `[indexer]` 섹션에서 설정을 생성합니다.
    pub fn from_core(core: &layerdex_core::config::IndexerConfig) -> Self {
        Self {
            layer_concurrency: core.layer_concurrency,
            scanner_concurrency: core.scanner_concurrency,
            airgap: core.airgap,
            ecosystems: core.ecosystems.clone(),
            fetch_retries: core.fetch_retries,
            fetch_backoff_ms: core.fetch_backoff_ms,
            fetch_timeout_secs: core.fetch_timeout_secs,
            ..Self::default()
        }
    }

    /// n번째 재시도 전 대기 시간 (1부터)
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.fetch_backoff_ms.saturating_mul(u64::from(attempt)))
    }

    /// fetch 한 번의 타임아웃
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// 설정 값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), IndexerError> {
        if self.layer_concurrency == 0 || self.layer_concurrency > MAX_LAYER_CONCURRENCY {
            return Err(IndexerError::Config {
                field: "layer_concurrency".to_owned(),
                reason: format!("must be 1-{MAX_LAYER_CONCURRENCY}"),
            });
        }

        if self.scanner_concurrency == 0 || self.scanner_concurrency > MAX_SCANNER_CONCURRENCY {
            return Err(IndexerError::Config {
                field: "scanner_concurrency".to_owned(),
                reason: format!("must be 1-{MAX_SCANNER_CONCURRENCY}"),
            });
        }

        if self.ecosystems.is_empty() {
            return Err(IndexerError::Config {
                field: "ecosystems".to_owned(),
                reason: "at least one ecosystem required".to_owned(),
            });
        }

        if self.fetch_retries > MAX_FETCH_RETRIES {
            return Err(IndexerError::Config {
                field: "fetch_retries".to_owned(),
                reason: format!("must be 0-{MAX_FETCH_RETRIES}"),
            });
        }

        if self.fetch_timeout_secs == 0 {
            return Err(IndexerError::Config {
                field: "fetch_timeout_secs".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }

        Ok(())
    }
}

/// [`IndexerConfig`] 빌더
#[derive(Default)]
pub struct IndexerConfigBuilder {
    config: IndexerConfig,
}

impl IndexerConfigBuilder {
    /// 기본값을 가진 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 레이어 동시성을 설정합니다.
    pub fn layer_concurrency(mut self, n: usize) -> Self {
        self.config.layer_concurrency = n;
        self
    }

    /// 스캐너 동시성을 설정합니다.
    pub fn scanner_concurrency(mut self, n: usize) -> Self {
        self.config.scanner_concurrency = n;
        self
    }

    /// airgap 모드를 설정합니다.
    pub fn airgap(mut self, airgap: bool) -> Self {
        self.config.airgap = airgap;
        self
    }

    /// 활성 에코시스템을 설정합니다.
    pub fn ecosystems<I, S>(mut self, ecosystems: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.ecosystems = ecosystems.into_iter().map(Into::into).collect();
        self
    }

    /// fetch 재시도 횟수를 설정합니다.
    pub fn fetch_retries(mut self, retries: u32) -> Self {
        self.config.fetch_retries = retries;
        self
    }

    /// 재시도 간격 기준(ms)을 설정합니다.
    pub fn fetch_backoff_ms(mut self, ms: u64) -> Self {
        self.config.fetch_backoff_ms = ms;
        self
    }

    /// fetch 타임아웃(초)을 설정합니다.
    pub fn fetch_timeout_secs(mut self, secs: u64) -> Self {
        self.config.fetch_timeout_secs = secs;
        self
    }

    /// 저장된 리포트 재사용 여부를 설정합니다.
    pub fn reuse_reports(mut self, reuse: bool) -> Self {
        self.config.reuse_reports = reuse;
        self
    }

    /// 설정을 검증하고 빌드합니다.
    ///
    /// # Errors
    ///
    /// 유효성 검증 실패 시 `IndexerError::Config` 반환
    pub fn build(self) -> Result<IndexerConfig, IndexerError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
