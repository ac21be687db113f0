#![doc = include_str!("../README.md")]

pub mod config;
pub mod error;
pub mod metrics;
pub mod report;
pub mod types;

// --- 주요 타입 re-export ---
// 각 모듈의 핵심 타입을 크레이트 루트에서 바로 사용할 수 있도록 합니다.

// 에러
pub use error::{ConfigError, IndexError, LayerdexError, ParseError, StoreError};

// 설정
pub use config::{GeneralConfig, IndexerConfig, LayerdexConfig};

// 스캔 결과
pub use report::{
    Environment, IndexReport, IndexState, LayerFindings, LayerOutcome, LayerStatus, ScanFailure,
    ScanFailureKind,
};

// 도메인 타입
pub use types::{
    Digest, DigestAlgorithm, Distribution, LayerDescriptor, Manifest, Package, PackageKind,
    Repository, ScannerIdentity, ScannerKind,
};
