//! 인덱서 에러 타입
//!
//! 에러는 영향 범위에 따라 세 가지로 나뉩니다.
//!
//! - [`ScanError`]: 스캐너 하나의 실패. 같은 레이어의 다른 스캐너에는 영향이 없고
//!   리포트에 부분 실패로 기록됩니다.
//! - [`FetchError`]: 레이어 fetch 실패. 재시도 후에도 실패하면 인덱싱 전체가 실패합니다.
//! - [`IndexerError`]: 인덱서 수준 에러. `From<IndexerError> for LayerdexError`로
//!   최상위 에러로 전파됩니다.

use layerdex_core::error::{ConfigError, IndexError, LayerdexError, StoreError};
use layerdex_core::types::ScannerKind;

/// 인덱서 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum IndexerError {
    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// 스캐너 레지스트리 에러 (중복 등록, 알 수 없는 에코시스템 등)
    #[error("registry error: {0}")]
    Registry(String),

    /// 레이어 fetch 실패 (재시도 소진)
    #[error("fetch failed for layer {layer}: {source}")]
    Fetch {
        /// 레이어 digest
        layer: String,
        /// 원본 fetch 에러
        source: FetchError,
    },

    /// 스토어 읽기/쓰기 실패
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// 모든 레이어의 모든 스캐너가 실패
    #[error("every layer of manifest {manifest} failed to scan")]
    AllLayersFailed {
        /// 매니페스트 digest
        manifest: String,
    },

    /// 인덱싱이 취소됨
    #[error("indexing of manifest {manifest} was cancelled")]
    Cancelled {
        /// 매니페스트 digest
        manifest: String,
    },

    /// 백그라운드 태스크 실패
    #[error("task error: {0}")]
    Task(String),
}

impl From<IndexerError> for LayerdexError {
    fn from(err: IndexerError) -> Self {
        match err {
            IndexerError::Config { field, reason } => {
                LayerdexError::Config(ConfigError::InvalidValue { field, reason })
            }
            IndexerError::Registry(msg) => LayerdexError::Index(IndexError::Setup(msg)),
            IndexerError::Fetch { layer, source } => LayerdexError::Index(IndexError::Fetch {
                layer,
                reason: source.to_string(),
            }),
            IndexerError::Store(e) => LayerdexError::Store(e),
            IndexerError::AllLayersFailed { manifest } => {
                LayerdexError::Index(IndexError::AllLayersFailed { manifest })
            }
            IndexerError::Cancelled { manifest } => {
                LayerdexError::Index(IndexError::Cancelled { manifest })
            }
            IndexerError::Task(msg) => LayerdexError::Index(IndexError::Setup(msg)),
        }
    }
}

/// 스캐너 하나의 실패
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    /// 레이어 아카이브를 읽을 수 없음
    #[error("archive read failed: {0}")]
    Archive(#[from] std::io::Error),

    /// 스캔 도중 불변 조건이 깨짐 (예: 1차 패스에서 본 파일이 2차 패스에 없음)
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// 파일 크기 초과
    #[error("file too large: {path}: {size} bytes (max: {max})")]
    TooLarge {
        /// 아카이브 내 경로
        path: String,
        /// 실제 크기
        size: u64,
        /// 허용 크기
        max: u64,
    },

    /// 포맷 파싱 실패
    #[error("parse error: {path}: {reason}")]
    Parse {
        /// 아카이브 내 경로
        path: String,
        /// 실패 사유
        reason: String,
    },

    /// 스캐너 payload 설정 실패
    #[error("invalid configuration for scanner {scanner}: {reason}")]
    Config {
        /// 스캐너 이름
        scanner: String,
        /// 실패 사유
        reason: String,
    },

    /// 스캐너 종류와 반환한 엔티티 종류가 다름
    #[error("scanner of kind {expected} returned {actual} entities")]
    KindMismatch {
        /// 선언된 종류
        expected: ScannerKind,
        /// 실제 반환된 종류
        actual: ScannerKind,
    },

    /// 취소됨
    #[error("scan cancelled")]
    Cancelled,

    /// 내부 에러 (blocking 태스크 panic 등)
    #[error("internal error: {0}")]
    Internal(String),
}

impl ScanError {
    /// 취소로 인한 에러인지 여부
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// 레이어 fetch 에러
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// 레이어 blob을 찾을 수 없음
    #[error("layer not found: {uri}")]
    NotFound {
        /// 요청한 위치
        uri: String,
    },

    /// 지원하지 않는 URI
    #[error("unsupported uri: {0}")]
    UnsupportedUri(String),

    /// 내용이 digest와 일치하지 않음
    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch {
        /// 매니페스트에 기록된 digest
        expected: String,
        /// 실제 계산된 digest
        actual: String,
    },

    /// blob 크기 초과
    #[error("layer too large: {size} bytes (max: {max})")]
    TooLarge {
        /// 실제 크기
        size: u64,
        /// 허용 크기
        max: u64,
    },

    /// 한 번의 시도가 타임아웃
    #[error("fetch timed out after {secs}s")]
    Timeout {
        /// 타임아웃 (초)
        secs: u64,
    },

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl FetchError {
    /// 재시도할 가치가 있는 에러인지 여부
    ///
    /// 내용이 잘못된 경우(digest 불일치, 크기 초과)나 대상이 없는 경우는
    /// 다시 시도해도 결과가 같습니다.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Io(_))
    }
}
