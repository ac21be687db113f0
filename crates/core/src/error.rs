//! 에러 타입: 도메인별 에러 정의
//!
//! [`LayerdexError`]는 워크스페이스 전체의 최상위 에러 타입입니다.
//! 각 모듈 크레이트는 자체 에러 타입을 정의하고 `From` 구현으로 여기에 합류합니다.

/// layerdex 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum LayerdexError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 입력값 파싱 에러 (digest, scanner kind 등)
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// 매니페스트 인덱싱 에러
    #[error("index error: {0}")]
    Index(#[from] IndexError),

    /// 스토어 에러
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 입력값 파싱 에러
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// 잘못된 content digest (`<algorithm>:<hex>`)
    #[error("invalid digest '{value}': {reason}")]
    InvalidDigest { value: String, reason: String },

    /// 알 수 없는 스캐너 종류
    #[error("unknown scanner kind: {0}")]
    UnknownScannerKind(String),
}

/// 매니페스트 인덱싱 에러
///
/// 스캐너 단위 실패는 여기에 포함되지 않습니다. 스캐너 실패는 리포트에
/// 부분 실패로 기록되고, 인덱싱 자체를 중단시키는 경우만 이 타입으로 표현됩니다.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// 레이어 fetch 실패
    #[error("failed to fetch layer {layer}: {reason}")]
    Fetch { layer: String, reason: String },

    /// 모든 레이어가 실패
    #[error("every layer of manifest {manifest} failed to scan")]
    AllLayersFailed { manifest: String },

    /// 취소됨
    #[error("indexing of manifest {manifest} was cancelled")]
    Cancelled { manifest: String },

    /// 스캐너/에코시스템 구성 에러
    #[error("scanner setup failed: {0}")]
    Setup(String),
}

/// 스토어 에러
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// 읽기 실패
    #[error("read failed for {key}: {reason}")]
    Read { key: String, reason: String },

    /// 쓰기 실패
    #[error("write failed for {key}: {reason}")]
    Write { key: String, reason: String },

    /// 직렬화/역직렬화 실패
    #[error("serialization failed: {0}")]
    Serialization(String),
}
