//! 메트릭 상수 및 설명 등록
//!
//! 모든 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 모듈은 이 상수를 사용하여 `metrics::counter!()`, `metrics::gauge!()`,
//! `metrics::histogram!()` 매크로를 호출합니다.
//! 레코더가 설치되지 않은 경우 매크로 호출은 아무 일도 하지 않습니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `layerdex_`
//! - 모듈명: `indexer_`
//! - 접미어: `_total` (counter), `_seconds` (histogram/latency), 없음 (gauge)
//!
//! # 사용 예시
//!
//! ```ignore
//! use metrics::counter;
//!
//! counter!(layerdex_core::metrics::INDEXER_LAYERS_FETCHED_TOTAL).increment(1);
//! ```

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 스캐너 이름 레이블 키 (dpkg, ubuntu, apt-sources)
pub const LABEL_SCANNER: &str = "scanner";

/// 결과 레이블 키 (success, failure)
pub const LABEL_RESULT: &str = "result";

/// 캐시 조회 출처 레이블 키 (memory, store)
pub const LABEL_SOURCE: &str = "source";

/// 실패 종류 레이블 키 (failed, cancelled)
pub const LABEL_KIND: &str = "kind";

// ─── Indexer 메트릭 ────────────────────────────────────────────────

/// Indexer: 인덱싱 완료된 매니페스트 수 (counter, label: result)
pub const INDEXER_MANIFESTS_INDEXED_TOTAL: &str = "layerdex_indexer_manifests_indexed_total";

/// Indexer: 저장된 리포트를 재사용한 매니페스트 수 (counter)
pub const INDEXER_MANIFEST_CACHE_HITS_TOTAL: &str = "layerdex_indexer_manifest_cache_hits_total";

/// Indexer: fetch된 레이어 수 (counter)
pub const INDEXER_LAYERS_FETCHED_TOTAL: &str = "layerdex_indexer_layers_fetched_total";

/// Indexer: fetch 재시도 수 (counter)
pub const INDEXER_FETCH_RETRIES_TOTAL: &str = "layerdex_indexer_fetch_retries_total";

/// Indexer: 최종 fetch 실패 수 (counter)
pub const INDEXER_FETCH_FAILURES_TOTAL: &str = "layerdex_indexer_fetch_failures_total";

/// Indexer: 실행된 스캐너 수 (counter, label: scanner, result)
pub const INDEXER_SCANS_TOTAL: &str = "layerdex_indexer_scans_total";

/// Indexer: 스캐너 실패 수 (counter, label: scanner, kind)
pub const INDEXER_SCANNER_FAILURES_TOTAL: &str = "layerdex_indexer_scanner_failures_total";

/// Indexer: findings 캐시 적중 수 (counter, label: source)
pub const INDEXER_CACHE_HITS_TOTAL: &str = "layerdex_indexer_cache_hits_total";

/// Indexer: findings 캐시 미스 수 (counter)
pub const INDEXER_CACHE_MISSES_TOTAL: &str = "layerdex_indexer_cache_misses_total";

/// Indexer: 발견된 패키지 수 (counter)
pub const INDEXER_PACKAGES_FOUND_TOTAL: &str = "layerdex_indexer_packages_found_total";

/// Indexer: 현재 처리 중인 레이어 수 (gauge)
pub const INDEXER_INFLIGHT_LAYERS: &str = "layerdex_indexer_inflight_layers";

/// Indexer: 매니페스트 인덱싱 소요 시간 (histogram, 초)
pub const INDEXER_INDEX_DURATION_SECONDS: &str = "layerdex_indexer_index_duration_seconds";

/// Indexer: 레이어 하나의 스캔 소요 시간 (histogram, 초)
pub const INDEXER_LAYER_SCAN_DURATION_SECONDS: &str =
    "layerdex_indexer_layer_scan_duration_seconds";

// ─── 히스토그램 버킷 정의 ────────────────────────────────────────────

/// 레이어 스캔 소요 시간 히스토그램 버킷 (초)
///
/// 10ms ~ 60s 범위, 작은 레이어는 캐시 적중으로 수 ms 안에 끝남
pub const LAYER_SCAN_DURATION_BUCKETS: [f64; 9] =
    [0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0];

/// 매니페스트 인덱싱 소요 시간 히스토그램 버킷 (초)
///
/// 100ms ~ 600s 범위 (레이어 fetch 포함)
pub const INDEX_DURATION_BUCKETS: [f64; 9] = [0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 600.0];

// ─── 설명 등록 함수 ─────────────────────────────────────────────────

/// 모든 메트릭의 설명(description)을 등록합니다.
///
/// 전역 레코더 설치 후 한 번만 호출해야 합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge, describe_histogram};

    describe_counter!(
        INDEXER_MANIFESTS_INDEXED_TOTAL,
        "Total number of manifests indexed, by result"
    );
    describe_counter!(
        INDEXER_MANIFEST_CACHE_HITS_TOTAL,
        "Total number of manifests answered from a stored report"
    );
    describe_counter!(
        INDEXER_LAYERS_FETCHED_TOTAL,
        "Total number of layers fetched"
    );
    describe_counter!(
        INDEXER_FETCH_RETRIES_TOTAL,
        "Total number of layer fetch retries"
    );
    describe_counter!(
        INDEXER_FETCH_FAILURES_TOTAL,
        "Total number of layer fetches that failed after all retries"
    );
    describe_counter!(
        INDEXER_SCANS_TOTAL,
        "Total number of scanner invocations against a layer"
    );
    describe_counter!(
        INDEXER_SCANNER_FAILURES_TOTAL,
        "Total number of scanner failures, by scanner and kind"
    );
    describe_counter!(
        INDEXER_CACHE_HITS_TOTAL,
        "Total number of findings served from cache, by source"
    );
    describe_counter!(
        INDEXER_CACHE_MISSES_TOTAL,
        "Total number of findings lookups that required a scan"
    );
    describe_counter!(
        INDEXER_PACKAGES_FOUND_TOTAL,
        "Total number of packages found by freshly run scanners"
    );
    describe_gauge!(
        INDEXER_INFLIGHT_LAYERS,
        "Number of layers currently being fetched or scanned"
    );
    describe_histogram!(
        INDEXER_INDEX_DURATION_SECONDS,
        "Time to index a single manifest in seconds"
    );
    describe_histogram!(
        INDEXER_LAYER_SCAN_DURATION_SECONDS,
        "Time to run every scanner against a single layer in seconds"
    );
}
