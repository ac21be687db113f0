//! 도메인 타입: digest, 스캐너 식별자, 패키지/배포판/저장소, 매니페스트
//!
//! 모든 타입은 불변 값으로 다뤄지며 `serde`로 직렬화되어 스토어에 캐싱됩니다.
//! 캐싱된 결과가 재현 가능해야 하므로 타임스탬프 같은 비결정적 값은 두지 않습니다.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// Digest 알고리즘
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    /// SHA-256 (64 hex)
    Sha256,
    /// SHA-512 (128 hex)
    Sha512,
}

impl DigestAlgorithm {
    /// 알고리즘별 hex 문자열 길이
    pub fn hex_len(&self) -> usize {
        match self {
            Self::Sha256 => 64,
            Self::Sha512 => 128,
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sha256 => write!(f, "sha256"),
            Self::Sha512 => write!(f, "sha512"),
        }
    }
}

/// Content-addressed digest (`sha256:<hex>`)
///
/// 레이어와 매니페스트의 식별자입니다. 생성 시 검증되며 이후 변경되지 않습니다.
/// hex는 항상 소문자로 정규화됩니다.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest {
    algorithm: DigestAlgorithm,
    hex: String,
}

impl Digest {
    /// 알고리즘과 hex 문자열로 digest를 생성합니다.
    pub fn new(algorithm: DigestAlgorithm, hex: &str) -> Result<Self, ParseError> {
        let hex = hex.to_ascii_lowercase();
        if hex.len() != algorithm.hex_len() {
            return Err(ParseError::InvalidDigest {
                value: format!("{algorithm}:{hex}"),
                reason: format!("expected {} hex characters", algorithm.hex_len()),
            });
        }
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ParseError::InvalidDigest {
                value: format!("{algorithm}:{hex}"),
                reason: "contains non-hex characters".to_owned(),
            });
        }
        Ok(Self { algorithm, hex })
    }

    /// digest 알고리즘
    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// hex 부분
    pub fn hex(&self) -> &str {
        &self.hex
    }

    /// 로그 출력용 축약형 (hex 앞 12자)
    pub fn short(&self) -> &str {
        &self.hex[..12]
    }
}

impl FromStr for Digest {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (algorithm, hex) = s.split_once(':').ok_or_else(|| ParseError::InvalidDigest {
            value: s.to_owned(),
            reason: "missing ':' separator".to_owned(),
        })?;
        let algorithm = match algorithm {
            "sha256" => DigestAlgorithm::Sha256,
            "sha512" => DigestAlgorithm::Sha512,
            other => {
                return Err(ParseError::InvalidDigest {
                    value: s.to_owned(),
                    reason: format!("unsupported algorithm '{other}'"),
                });
            }
        };
        Self::new(algorithm, hex)
    }
}

impl TryFrom<String> for Digest {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Digest> for String {
    fn from(value: Digest) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

/// 스캐너 종류
///
/// 종류에 따라 스캐너가 반환하는 엔티티 타입이 결정됩니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScannerKind {
    /// 패키지 DB 스캐너
    Package,
    /// 배포판 식별 스캐너
    Distribution,
    /// 저장소 메타데이터 스캐너
    Repository,
}

impl fmt::Display for ScannerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Package => write!(f, "package"),
            Self::Distribution => write!(f, "distribution"),
            Self::Repository => write!(f, "repository"),
        }
    }
}

impl FromStr for ScannerKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "package" => Ok(Self::Package),
            "distribution" => Ok(Self::Distribution),
            "repository" => Ok(Self::Repository),
            _ => Err(ParseError::UnknownScannerKind(s.to_owned())),
        }
    }
}

/// 스캐너 식별자 (name, version, kind)
///
/// 캐시 키의 일부입니다. 세 값이 모두 일치해야 같은 스캐너로 취급되므로
/// 버전을 올리면 이전 버전으로 캐싱된 결과는 더 이상 사용되지 않습니다.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScannerIdentity {
    /// 스캐너 이름 (예: `"dpkg"`)
    pub name: String,
    /// 스캐너 버전
    pub version: String,
    /// 스캐너 종류
    pub kind: ScannerKind,
}

impl ScannerIdentity {
    /// 새 식별자를 생성합니다.
    pub fn new(name: impl Into<String>, version: impl Into<String>, kind: ScannerKind) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            kind,
        }
    }
}

impl fmt::Display for ScannerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.kind, self.name, self.version)
    }
}

/// 패키지 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageKind {
    /// 설치된 바이너리 패키지
    Binary,
    /// 바이너리 패키지를 빌드한 소스 패키지
    Source,
}

impl fmt::Display for PackageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Binary => write!(f, "binary"),
            Self::Source => write!(f, "source"),
        }
    }
}

/// 설치된 소프트웨어 패키지
///
/// `source`는 소스 패키지의 값 복사본입니다. 정보 제공용이며
/// 두 패키지 사이에 소유 관계나 동일성 관계를 만들지 않습니다.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Package {
    /// 패키지 이름
    pub name: String,
    /// 패키지 버전
    pub version: String,
    /// 패키지 종류
    pub kind: PackageKind,
    /// 아키텍처 (소스 패키지는 빈 문자열)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub arch: String,
    /// 패키지가 발견된 DB 파일 경로 (coalescing 병합 키)
    pub package_db: String,
    /// 하위 소비자가 변경 감지에 쓰는 불투명 fingerprint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository_hint: Option<String>,
    /// 소스 패키지
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Box<Package>>,
}

impl Package {
    /// 바이너리 패키지를 생성합니다.
    pub fn binary(
        name: impl Into<String>,
        version: impl Into<String>,
        arch: impl Into<String>,
        package_db: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            kind: PackageKind::Binary,
            arch: arch.into(),
            package_db: package_db.into(),
            repository_hint: None,
            source: None,
        }
    }

    /// 소스 패키지를 생성합니다.
    pub fn source(
        name: impl Into<String>,
        version: impl Into<String>,
        package_db: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            kind: PackageKind::Source,
            arch: String::new(),
            package_db: package_db.into(),
            repository_hint: None,
            source: None,
        }
    }

    /// 리포트의 environment 맵에서 쓰는 키
    ///
    /// 같은 DB 안에서 (이름, 버전, 종류, 아키텍처)가 같으면 같은 패키지입니다.
    pub fn key(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}",
            self.package_db, self.name, self.version, self.kind, self.arch
        )
    }
}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.arch.is_empty() {
            write!(f, "{}@{} ({})", self.name, self.version, self.kind)
        } else {
            write!(f, "{}@{}:{} ({})", self.name, self.version, self.arch, self.kind)
        }
    }
}

/// 레이어의 기반 OS 배포판
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Distribution {
    /// 배포판 ID (os-release의 `ID`, 예: `"ubuntu"`)
    pub did: String,
    /// 배포판 이름 (예: `"Ubuntu"`)
    pub name: String,
    /// 표시용 버전 (예: `"18.04 (Bionic)"`)
    pub version: String,
    /// 숫자 버전 (예: `"18.04"`)
    pub version_id: String,
    /// 코드네임 (예: `"bionic"`)
    pub version_code_name: String,
    /// 표시 이름
    pub pretty_name: String,
}

impl fmt::Display for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.version)
    }
}

/// 패키지를 가져온 소프트웨어 저장소
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Repository {
    /// 저장소 이름 (예: `"jammy/main"`)
    pub name: String,
    /// 저장소 URI
    pub uri: String,
    /// 서명 키 경로 (있을 경우)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// 저장소 정보가 발견된 파일 경로 (coalescing 병합 키)
    pub source_path: String,
}

impl fmt::Display for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.uri)
    }
}

/// 매니페스트의 레이어 기술자
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerDescriptor {
    /// 레이어 content digest
    pub digest: Digest,
    /// Fetcher가 해석하는 위치 (파일 경로, `file://` URI 등)
    pub uri: String,
    /// 미디어 타입 (정보용)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
}

/// 이미지 매니페스트: 순서가 있는 레이어 목록
///
/// 레이어 순서는 overlay 순서입니다 (가장 아래 레이어가 먼저).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// 매니페스트 digest
    pub hash: Digest,
    /// 레이어 목록
    pub layers: Vec<LayerDescriptor>,
}

impl fmt::Display for Manifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Manifest({}, {} layers)", self.hash, self.layers.len())
    }
}
