//! 설정 관리: layerdex.toml 파싱 및 런타임 설정
//!
//! [`LayerdexConfig`]는 모든 모듈의 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`LAYERDEX_INDEXER_AIRGAP=true` 형식)
//! 3. 설정 파일 (`layerdex.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), layerdex_core::error::LayerdexError> {
//! use layerdex_core::config::LayerdexConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = LayerdexConfig::load("layerdex.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = LayerdexConfig::parse("[indexer]\nairgap = true")?;
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, LayerdexError};

/// 레이어 동시 처리 수 상한
pub const MAX_LAYER_CONCURRENCY: usize = 256;

/// 레이어당 스캐너 동시 실행 수 상한
pub const MAX_SCANNER_CONCURRENCY: usize = 64;

/// fetch 재시도 횟수 상한
pub const MAX_FETCH_RETRIES: u32 = 10;

/// Layerdex 통합 설정
///
/// `layerdex.toml` 파일의 최상위 구조를 나타냅니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LayerdexConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 인덱서 설정
    #[serde(default)]
    pub indexer: IndexerConfig,
}

impl LayerdexConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, LayerdexError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, LayerdexError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                LayerdexError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                LayerdexError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, LayerdexError> {
        toml::from_str(toml_str).map_err(|e| {
            LayerdexError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `LAYERDEX_{SECTION}_{FIELD}`
    /// 스캐너별 payload 테이블은 환경변수로 덮어쓸 수 없습니다.
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "LAYERDEX_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "LAYERDEX_GENERAL_LOG_FORMAT");
        override_string(&mut self.general.data_dir, "LAYERDEX_GENERAL_DATA_DIR");

        // Indexer
        override_usize(
            &mut self.indexer.layer_concurrency,
            "LAYERDEX_INDEXER_LAYER_CONCURRENCY",
        );
        override_usize(
            &mut self.indexer.scanner_concurrency,
            "LAYERDEX_INDEXER_SCANNER_CONCURRENCY",
        );
        override_bool(&mut self.indexer.airgap, "LAYERDEX_INDEXER_AIRGAP");
        override_csv(&mut self.indexer.ecosystems, "LAYERDEX_INDEXER_ECOSYSTEMS");
        override_u32(
            &mut self.indexer.fetch_retries,
            "LAYERDEX_INDEXER_FETCH_RETRIES",
        );
        override_u64(
            &mut self.indexer.fetch_backoff_ms,
            "LAYERDEX_INDEXER_FETCH_BACKOFF_MS",
        );
        override_u64(
            &mut self.indexer.fetch_timeout_secs,
            "LAYERDEX_INDEXER_FETCH_TIMEOUT_SECS",
        );
        override_bool(
            &mut self.indexer.verify_digests,
            "LAYERDEX_INDEXER_VERIFY_DIGESTS",
        );
        override_u64(
            &mut self.indexer.max_layer_size,
            "LAYERDEX_INDEXER_MAX_LAYER_SIZE",
        );
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), LayerdexError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "general.log_level".to_owned(),
                reason: format!("must be one of: {}", valid_levels.join(", ")),
            }
            .into());
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "general.log_format".to_owned(),
                reason: format!("must be one of: {}", valid_formats.join(", ")),
            }
            .into());
        }

        if self.general.data_dir.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "general.data_dir".to_owned(),
                reason: "must not be empty".to_owned(),
            }
            .into());
        }

        self.indexer.validate()?;
        Ok(())
    }
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
    /// 데이터 디렉토리 (리포트/캐시 저장 위치)
    pub data_dir: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
            data_dir: "/var/lib/layerdex".to_owned(),
        }
    }
}

/// 인덱서 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// 매니페스트당 동시에 fetch/scan하는 레이어 수
    pub layer_concurrency: usize,
    /// 레이어당 동시에 실행하는 스캐너 수
    pub scanner_concurrency: usize,
    /// 네트워크가 필요한 스캐너 비활성화
    pub airgap: bool,
    /// 활성화할 에코시스템 이름 목록
    pub ecosystems: Vec<String>,
    /// fetch 재시도 횟수 (0이면 재시도 없음)
    pub fetch_retries: u32,
    /// fetch 재시도 기본 대기 시간 (밀리초, 시도 횟수만큼 선형 증가)
    pub fetch_backoff_ms: u64,
    /// fetch 1회 타임아웃 (초)
    pub fetch_timeout_secs: u64,
    /// fetch 시 레이어 digest 검증 여부
    pub verify_digests: bool,
    /// 레이어 blob 최대 크기 (바이트)
    pub max_layer_size: u64,
    /// 스캐너별 설정 (`[indexer.scanners.<name>]`), 스캐너에는 JSON 바이트로 전달
    pub scanners: BTreeMap<String, toml::Table>,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            layer_concurrency: 4,
            scanner_concurrency: 4,
            airgap: false,
            ecosystems: vec!["debian".to_owned()],
            fetch_retries: 3,
            fetch_backoff_ms: 200,
            fetch_timeout_secs: 60,
            verify_digests: true,
            max_layer_size: 4 * 1024 * 1024 * 1024, // 4GB
            scanners: BTreeMap::new(),
        }
    }
}

impl IndexerConfig {
    /// 인덱서 섹션의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.layer_concurrency == 0 || self.layer_concurrency > MAX_LAYER_CONCURRENCY {
            return Err(ConfigError::InvalidValue {
                field: "indexer.layer_concurrency".to_owned(),
                reason: format!("must be between 1 and {MAX_LAYER_CONCURRENCY}"),
            });
        }

        if self.scanner_concurrency == 0 || self.scanner_concurrency > MAX_SCANNER_CONCURRENCY {
            return Err(ConfigError::InvalidValue {
                field: "indexer.scanner_concurrency".to_owned(),
                reason: format!("must be between 1 and {MAX_SCANNER_CONCURRENCY}"),
            });
        }

        if self.ecosystems.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "indexer.ecosystems".to_owned(),
                reason: "at least one ecosystem is required".to_owned(),
            });
        }

        if self.ecosystems.iter().any(|e| e.trim().is_empty()) {
            return Err(ConfigError::InvalidValue {
                field: "indexer.ecosystems".to_owned(),
                reason: "ecosystem names must not be empty".to_owned(),
            });
        }

        if self.fetch_retries > MAX_FETCH_RETRIES {
            return Err(ConfigError::InvalidValue {
                field: "indexer.fetch_retries".to_owned(),
                reason: format!("must be at most {MAX_FETCH_RETRIES}"),
            });
        }

        if self.fetch_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "indexer.fetch_timeout_secs".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }

        if self.max_layer_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "indexer.max_layer_size".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }

        Ok(())
    }

    /// 스캐너별 설정 테이블을 JSON 바이트 payload로 변환합니다.
    pub fn scanner_payloads(&self) -> Result<BTreeMap<String, Vec<u8>>, ConfigError> {
        self.scanners
            .iter()
            .map(|(name, table)| {
                serde_json::to_vec(table)
                    .map(|bytes| (name.clone(), bytes))
                    .map_err(|e| ConfigError::InvalidValue {
                        field: format!("indexer.scanners.{name}"),
                        reason: e.to_string(),
                    })
            })
            .collect()
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<bool>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse bool from env var, ignoring"
            ),
        }
    }
}

fn override_usize(target: &mut usize, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<usize>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse usize from env var, ignoring"
            ),
        }
    }
}

fn override_u32(target: &mut u32, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u32>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u32 from env var, ignoring"
            ),
        }
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}

fn override_csv(target: &mut Vec<String>, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val
            .split(',')
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_values() {
        let config = LayerdexConfig::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.general.log_format, "json");
        assert_eq!(config.indexer.layer_concurrency, 4);
        assert_eq!(config.indexer.ecosystems, vec!["debian"]);
        assert!(!config.indexer.airgap);
        assert!(config.indexer.verify_digests);
        assert!(config.indexer.scanners.is_empty());
    }

    #[test]
    fn default_config_passes_validation() {
        LayerdexConfig::default().validate().unwrap();
    }

    #[test]
    fn empty_toml_uses_defaults() {
        let config = LayerdexConfig::parse("").unwrap();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.indexer.fetch_retries, 3);
    }

    #[test]
    fn partial_toml_merges_with_defaults() {
        let toml = r#"
[general]
log_level = "debug"

[indexer]
airgap = true
layer_concurrency = 8
"#;
        let config = LayerdexConfig::parse(toml).unwrap();
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.general.log_format, "json");
        assert!(config.indexer.airgap);
        assert_eq!(config.indexer.layer_concurrency, 8);
        assert_eq!(config.indexer.scanner_concurrency, 4);
    }

    #[test]
    fn scanner_tables_become_json_payloads() {
        let toml = r#"
[indexer.scanners.dpkg]
max_database_size = 1024

[indexer.scanners.ubuntu]
"#;
        let config = LayerdexConfig::parse(toml).unwrap();
        let payloads = config.indexer.scanner_payloads().unwrap();
        assert_eq!(payloads.len(), 2);

        let dpkg: serde_json::Value = serde_json::from_slice(&payloads["dpkg"]).unwrap();
        assert_eq!(dpkg["max_database_size"], 1024);
        assert_eq!(payloads["ubuntu"], b"{}");
    }

    #[test]
    fn invalid_toml_returns_parse_error() {
        let err = LayerdexConfig::parse("invalid = [[[toml").unwrap_err();
        assert!(matches!(
            err,
            LayerdexError::Config(ConfigError::ParseFailed { .. })
        ));
    }

    #[test]
    fn validate_rejects_invalid_log_level() {
        let mut config = LayerdexConfig::default();
        config.general.log_level = "verbose".to_owned();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("log_level"));
    }

    #[test]
    fn validate_rejects_invalid_log_format() {
        let mut config = LayerdexConfig::default();
        config.general.log_format = "xml".to_owned();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("log_format"));
    }

    #[test]
    fn validate_rejects_zero_layer_concurrency() {
        let mut config = LayerdexConfig::default();
        config.indexer.layer_concurrency = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("layer_concurrency"));
    }

    #[test]
    fn validate_rejects_excessive_scanner_concurrency() {
        let mut config = LayerdexConfig::default();
        config.indexer.scanner_concurrency = MAX_SCANNER_CONCURRENCY + 1;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("scanner_concurrency"));
    }

    #[test]
    fn validate_rejects_empty_ecosystems() {
        let mut config = LayerdexConfig::default();
        config.indexer.ecosystems.clear();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("ecosystems"));
    }

    #[test]
    fn validate_rejects_too_many_retries() {
        let mut config = LayerdexConfig::default();
        config.indexer.fetch_retries = MAX_FETCH_RETRIES + 1;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("fetch_retries"));
    }

    #[test]
    fn validate_rejects_zero_timeout() {
        let mut config = LayerdexConfig::default();
        config.indexer.fetch_timeout_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("fetch_timeout_secs"));
    }

    #[test]
    fn env_override_missing_var_keeps_original() {
        let mut val = "original".to_owned();
        override_string(&mut val, "TEST_LAYERDEX_NONEXISTENT_12345");
        assert_eq!(val, "original");
    }

    #[test]
    fn env_override_bool_invalid_keeps_original() {
        let mut val = false;
        // SAFETY: 고유한 키를 사용하므로 다른 테스트와 충돌하지 않습니다.
        unsafe { std::env::set_var("TEST_LAYERDEX_BOOL_BAD", "not-a-bool") };
        override_bool(&mut val, "TEST_LAYERDEX_BOOL_BAD");
        assert!(!val);
        unsafe { std::env::remove_var("TEST_LAYERDEX_BOOL_BAD") };
    }

    #[test]
    fn env_override_csv_drops_empty_items() {
        let mut val = vec!["a".to_owned()];
        // SAFETY: 고유한 키를 사용하므로 다른 테스트와 충돌하지 않습니다.
        unsafe { std::env::set_var("TEST_LAYERDEX_CSV", "debian, ,alpine") };
        override_csv(&mut val, "TEST_LAYERDEX_CSV");
        assert_eq!(val, vec!["debian", "alpine"]);
        unsafe { std::env::remove_var("TEST_LAYERDEX_CSV") };
    }

    #[test]
    fn config_serialize_roundtrip() {
        let mut config = LayerdexConfig::default();
        let mut table = toml::Table::new();
        table.insert("max_database_size".to_owned(), toml::Value::Integer(42));
        config.indexer.scanners.insert("dpkg".to_owned(), table);

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed = LayerdexConfig::parse(&toml_str).unwrap();
        assert_eq!(parsed.general.data_dir, config.general.data_dir);
        assert_eq!(parsed.indexer.max_layer_size, config.indexer.max_layer_size);
        assert_eq!(
            parsed.indexer.scanners["dpkg"]["max_database_size"].as_integer(),
            Some(42)
        );
    }

    #[tokio::test]
    async fn from_file_not_found() {
        let err = LayerdexConfig::from_file("/nonexistent/path/layerdex.toml")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LayerdexError::Config(ConfigError::FileNotFound { .. })
        ));
    }
}
