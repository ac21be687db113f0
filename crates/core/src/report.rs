//! 스캔 결과 타입: 레이어별 findings와 매니페스트 인덱스 리포트
//!
//! [`LayerFindings`]는 (레이어, 스캐너) 한 쌍의 결과이고 캐시 단위입니다.
//! [`IndexReport`]는 레이어별 findings를 overlay 순서로 병합한 최종 결과입니다.
//!
//! 두 타입 모두 타임스탬프나 실행 ID를 담지 않습니다. 같은 입력에 대해 항상
//! 같은 값이 나와야 캐싱된 결과를 재사용할 수 있습니다.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{Digest, Distribution, Package, Repository, ScannerIdentity};

/// 한 스캐너가 한 레이어에서 찾은 결과
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerFindings {
    /// 레이어 digest
    pub layer: Digest,
    /// 결과를 만든 스캐너
    pub scanner: ScannerIdentity,
    /// 스캐너가 아무것도 인식하지 못했는지 여부
    ///
    /// "트리거 파일을 찾았지만 엔티티가 0개"인 경우와 구분됩니다.
    pub absent: bool,
    /// 발견된 패키지
    #[serde(default)]
    pub packages: Vec<Package>,
    /// 발견된 배포판
    #[serde(default)]
    pub distributions: Vec<Distribution>,
    /// 발견된 저장소
    #[serde(default)]
    pub repositories: Vec<Repository>,
    /// 스캐너가 읽은 provenance 경로 (패키지 DB, sources 파일)
    ///
    /// 엔티티가 0개인 경로도 포함됩니다. 병합 시 이 경로들의 이전 집합이 대체됩니다.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
}

impl LayerFindings {
    /// 아무것도 인식하지 못한 결과를 생성합니다.
    pub fn absent(layer: Digest, scanner: ScannerIdentity) -> Self {
        Self {
            layer,
            scanner,
            absent: true,
            packages: Vec::new(),
            distributions: Vec::new(),
            repositories: Vec::new(),
            sources: Vec::new(),
        }
    }

    /// 빈 (absent가 아닌) 결과를 생성합니다.
    pub fn empty(layer: Digest, scanner: ScannerIdentity) -> Self {
        Self {
            absent: false,
            ..Self::absent(layer, scanner)
        }
    }

    /// 엔티티가 하나도 없는지 여부
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty() && self.distributions.is_empty() && self.repositories.is_empty()
    }
}

/// 스캐너 실패 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanFailureKind {
    /// 스캐너가 에러를 반환
    Failed,
    /// 취소로 중단됨
    Cancelled,
}

impl fmt::Display for ScanFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// 스캐너 하나의 실패 기록
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanFailure {
    /// 실패한 스캐너
    pub scanner: ScannerIdentity,
    /// 실패 종류
    pub kind: ScanFailureKind,
    /// 실패 사유
    pub reason: String,
}

/// 레이어 단위 스캔 결과 요약
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerOutcome {
    /// 모든 스캐너 성공
    Ok,
    /// 일부 스캐너 실패
    Partial,
    /// 모든 스캐너 실패
    Failed,
}

impl fmt::Display for LayerOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Partial => write!(f, "partial"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// 리포트에 기록되는 레이어별 상태
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerStatus {
    /// 레이어 digest
    pub layer: Digest,
    /// 매니페스트 내 순서 (0부터)
    pub ordinal: usize,
    /// 결과 요약
    pub outcome: LayerOutcome,
    /// 실패한 스캐너 목록
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<ScanFailure>,
}

impl LayerStatus {
    /// 성공 수와 실패 목록으로 상태를 계산합니다.
    ///
    /// 성공이 0이고 실패가 1개 이상일 때만 레이어 실패입니다.
    /// 스캐너가 하나도 없으면 `Ok`입니다.
    pub fn from_results(
        layer: Digest,
        ordinal: usize,
        succeeded: usize,
        failures: Vec<ScanFailure>,
    ) -> Self {
        let outcome = match (succeeded, failures.len()) {
            (_, 0) => LayerOutcome::Ok,
            (0, _) => LayerOutcome::Failed,
            _ => LayerOutcome::Partial,
        };
        Self {
            layer,
            ordinal,
            outcome,
            failures,
        }
    }
}

/// 매니페스트 인덱싱 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexState {
    /// 레이어 fetch 중
    Fetching,
    /// 레이어 스캔 중
    Scanning,
    /// 결과 병합 중
    Coalescing,
    /// 스토어 저장 중
    Persisting,
    /// 완료
    Done,
    /// 실패
    Failed,
}

impl IndexState {
    /// 종료 상태인지 여부
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for IndexState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fetching => write!(f, "fetching"),
            Self::Scanning => write!(f, "scanning"),
            Self::Coalescing => write!(f, "coalescing"),
            Self::Persisting => write!(f, "persisting"),
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// 패키지가 발견된 환경 정보
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    /// 패키지가 발견된 DB 경로
    pub package_db: String,
    /// 패키지를 처음 도입한 레이어
    pub introduced_in: Digest,
    /// 리포트 `distributions` 내 인덱스
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distribution: Option<usize>,
}

/// 매니페스트 인덱스 리포트
///
/// 레이어 digest 순서와 활성 스캐너 집합이 같으면 내용도 같습니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexReport {
    /// 매니페스트 digest
    pub manifest: Digest,
    /// 인덱싱 상태
    pub state: IndexState,
    /// 리포트를 만든 활성 스캐너 집합
    #[serde(default)]
    pub scanners: Vec<ScannerIdentity>,
    /// 최종 패키지 목록
    #[serde(default)]
    pub packages: Vec<Package>,
    /// 최종 배포판
    #[serde(default)]
    pub distributions: Vec<Distribution>,
    /// 최종 저장소 목록
    #[serde(default)]
    pub repositories: Vec<Repository>,
    /// 패키지 키 → 환경 정보
    #[serde(default)]
    pub environments: BTreeMap<String, Environment>,
    /// 레이어별 상태 (매니페스트 순서)
    #[serde(default)]
    pub layers: Vec<LayerStatus>,
    /// 성공 여부
    pub success: bool,
    /// 실패 사유
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IndexReport {
    /// 비어 있는 리포트를 생성합니다 (`Fetching` 상태).
    pub fn new(manifest: Digest) -> Self {
        Self {
            manifest,
            state: IndexState::Fetching,
            scanners: Vec::new(),
            packages: Vec::new(),
            distributions: Vec::new(),
            repositories: Vec::new(),
            environments: BTreeMap::new(),
            layers: Vec::new(),
            success: false,
            error: None,
        }
    }

    /// 리포트를 실패 상태로 전환합니다.
    pub fn fail(&mut self, reason: impl fmt::Display) {
        self.state = IndexState::Failed;
        self.success = false;
        self.error = Some(reason.to_string());
    }

    /// 리포트를 완료 상태로 전환합니다.
    pub fn finish(&mut self) {
        self.state = IndexState::Done;
        self.success = true;
        self.error = None;
    }

    /// 같은 활성 스캐너 집합으로 만든 성공 리포트인지 확인합니다.
    ///
    /// 스캐너 순서는 비교하지 않습니다.
    pub fn is_reusable_for(&self, scanners: &[ScannerIdentity]) -> bool {
        if self.state != IndexState::Done || !self.success {
            return false;
        }
        let ours: BTreeSet<&ScannerIdentity> = self.scanners.iter().collect();
        let theirs: BTreeSet<&ScannerIdentity> = scanners.iter().collect();
        ours == theirs
    }

    /// 부분 실패한 레이어 수
    pub fn partial_layers(&self) -> usize {
        self.layers
            .iter()
            .filter(|l| l.outcome != LayerOutcome::Ok)
            .count()
    }
}

impl fmt::Display for IndexReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "IndexReport({}, {}, {} packages, {} distributions, {} repositories)",
            self.manifest,
            self.state,
            self.packages.len(),
            self.distributions.len(),
            self.repositories.len()
        )
    }
}
