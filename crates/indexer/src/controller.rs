//! 인덱싱 컨트롤러 -- 매니페스트 하나의 fetch → scan → coalesce → persist
//!
//! # 상태 전이
//!
//! ```text
//! Fetching --> Scanning --> Coalescing --> Persisting --> Done
//!    |            |                            |
//!    +------------+----------------------------+--> Failed
//! ```
//!
//! - `Fetching`/`Scanning`: 레이어마다 permit 하나로 fetch 후 곧바로 활성 스캐너
//!   집합을 실행하고, 스캔이 끝나면 레이어를 놓습니다. 동시에 메모리에 있는 레이어는
//!   최대 `layer_concurrency`개입니다. 재시도 후에도 fetch가 실패하면 나머지 작업을
//!   중단하고 `Failed`입니다. 스캐너 실패는 부분 결과로 흡수되고, 모든 레이어가
//!   완전히 실패했을 때만 `Failed`입니다.
//! - `Coalescing`: 모든 레이어 결과가 모인 뒤 매니페스트 순서로 병합합니다.
//! - `Persisting`: 스토어에 저장합니다. 저장 실패는 `Failed`입니다.
//!
//! 같은 활성 스캐너 집합으로 만든 성공 리포트가 스토어에 있으면 fetch 없이 반환합니다.
//! 취소되면 진행 중인 작업을 중단하고 [`IndexerError::Cancelled`]를 반환합니다.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use layerdex_core::metrics as m;
use layerdex_core::report::{IndexReport, IndexState};
use layerdex_core::types::{LayerDescriptor, Manifest, ScannerIdentity};

use crate::cache::FindingsCache;
use crate::coalesce::coalesce;
use crate::config::IndexerConfig;
use crate::context::ScanContext;
use crate::error::{FetchError, IndexerError};
use crate::fetcher::Fetcher;
use crate::layer::Layer;
use crate::runner::{LayerScanOutput, LayerScanRunner};
use crate::scanner::{DynScanner, ScannerRegistry};
use crate::store::Store;

/// 레이어 인덱서
///
/// 하나의 인스턴스를 여러 매니페스트에 재사용할 수 있습니다. 캐시는 인스턴스에
/// 속하므로 같은 레이어를 공유하는 매니페스트는 스캔을 한 번만 실행합니다.
pub struct LayerIndexer<F, S> {
    /// 인덱서 설정
    config: IndexerConfig,
    /// 레이어 fetcher
    fetcher: Arc<F>,
    /// 리포트/캐시 스토어
    store: Arc<S>,
    /// 스캐너 레지스트리
    registry: Arc<ScannerRegistry>,
    /// 활성 스캐너 (airgap 필터 적용 후)
    active: Arc<[Arc<dyn DynScanner>]>,
    /// 활성 스캐너 식별자
    identities: Vec<ScannerIdentity>,
    /// 레이어 스캔 실행기
    runner: Arc<LayerScanRunner<S>>,
    /// 완료된 인덱싱 수
    manifests_indexed: AtomicU64,
    /// 저장된 리포트로 응답한 수
    manifest_cache_hits: AtomicU64,
}

impl<F: Fetcher, S: Store> LayerIndexer<F, S> {
    /// 새 빌더를 생성합니다.
    pub fn builder() -> LayerIndexerBuilder<F, S> {
        LayerIndexerBuilder::new()
    }

    /// 인덱서 설정
    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    /// 스캐너 레지스트리
    pub fn registry(&self) -> &ScannerRegistry {
        &self.registry
    }

    /// 활성 스캐너 식별자 (레지스트리 등록 순서)
    pub fn active_scanners(&self) -> &[ScannerIdentity] {
        &self.identities
    }

    /// 스캔 결과 캐시
    pub fn cache(&self) -> &Arc<FindingsCache<S>> {
        self.runner.cache()
    }

    /// 스토어
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// 완료된 인덱싱 수 (저장된 리포트 재사용 포함)
    pub fn manifests_indexed(&self) -> u64 {
        self.manifests_indexed.load(Ordering::Relaxed)
    }

    /// 저장된 리포트로 응답한 수
    pub fn manifest_cache_hits(&self) -> u64 {
        self.manifest_cache_hits.load(Ordering::Relaxed)
    }

    /// 매니페스트를 인덱싱합니다.
    ///
    /// # Errors
    ///
    /// - `IndexerError::Fetch`: 재시도 후에도 레이어를 가져오지 못함
    /// - `IndexerError::AllLayersFailed`: 모든 레이어의 모든 스캐너가 실패
    /// - `IndexerError::Store`: 리포트 저장 실패
    /// - `IndexerError::Cancelled`: `cancel`이 취소됨
    ///
    /// fetch 실패와 전체 레이어 실패는 `Failed` 상태 리포트를 스토어에 남깁니다.
    pub async fn index(
        &self,
        manifest: &Manifest,
        cancel: CancellationToken,
    ) -> Result<IndexReport, IndexerError> {
        let run_id = Uuid::new_v4();
        let span = info_span!(
            "index_manifest",
            manifest = %manifest.hash,
            run_id = %run_id,
            layers = manifest.layers.len()
        );
        let ctx = ScanContext::new(cancel.child_token(), span.clone());

        let started = Instant::now();
        let result = self.index_inner(manifest, &ctx).instrument(span).await;
        metrics::histogram!(m::INDEXER_INDEX_DURATION_SECONDS).record(started.elapsed().as_secs_f64());

        let label = match &result {
            Ok(_) => "success",
            Err(IndexerError::Cancelled { .. }) => "cancelled",
            Err(_) => "failure",
        };
        metrics::counter!(m::INDEXER_MANIFESTS_INDEXED_TOTAL, m::LABEL_RESULT => label).increment(1);
        if result.is_ok() {
            self.manifests_indexed.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    async fn index_inner(
        &self,
        manifest: &Manifest,
        ctx: &ScanContext,
    ) -> Result<IndexReport, IndexerError> {
        if let Some(report) = self.stored_report(manifest).await {
            self.manifest_cache_hits.fetch_add(1, Ordering::Relaxed);
            metrics::counter!(m::INDEXER_MANIFEST_CACHE_HITS_TOTAL).increment(1);
            info!(manifest = %manifest.hash, "reusing stored index report");
            return Ok(report);
        }

        let mut report = IndexReport::new(manifest.hash.clone());
        report.scanners = self.identities.clone();
        info!(
            manifest = %manifest.hash,
            layers = manifest.layers.len(),
            scanners = self.identities.len(),
            "indexing manifest"
        );

        // Fetching + Scanning
        let mut outputs = match self.process_layers(manifest, ctx).await {
            Ok(outputs) => outputs,
            Err(IndexerError::Cancelled { .. }) => return Err(self.cancelled(manifest)),
            Err(e) => return Err(self.fail(&mut report, e).await),
        };
        transition(&mut report, IndexState::Scanning);
        if ctx.is_cancelled() {
            return Err(self.cancelled(manifest));
        }
        if !outputs.is_empty() && outputs.iter().all(LayerScanOutput::is_failed) {
            let err = IndexerError::AllLayersFailed {
                manifest: manifest.hash.to_string(),
            };
            coalesce(&mut report, &mut outputs);
            return Err(self.fail(&mut report, err).await);
        }

        // Coalescing
        transition(&mut report, IndexState::Coalescing);
        coalesce(&mut report, &mut outputs);

        // Persisting
        transition(&mut report, IndexState::Persisting);
        report.finish();
        if let Err(e) = self.store.persist_report(&manifest.hash, &report).await {
            report.fail(&e);
            warn!(manifest = %manifest.hash, error = %e, "failed to persist index report");
            return Err(e.into());
        }

        info!(
            manifest = %manifest.hash,
            packages = report.packages.len(),
            distributions = report.distributions.len(),
            repositories = report.repositories.len(),
            partial_layers = report.partial_layers(),
            "manifest indexed"
        );
        Ok(report)
    }

    /// 재사용 가능한 저장 리포트. 스토어 읽기 실패는 경고 후 무시합니다.
    async fn stored_report(&self, manifest: &Manifest) -> Option<IndexReport> {
        if !self.config.reuse_reports {
            return None;
        }
        match self.store.get_report(&manifest.hash).await {
            Ok(Some(report)) if report.is_reusable_for(&self.identities) => Some(report),
            Ok(Some(report)) => {
                debug!(manifest = %manifest.hash, state = %report.state, "stored report is stale");
                None
            }
            Ok(None) => None,
            Err(e) => {
                warn!(manifest = %manifest.hash, error = %e, "failed to read stored report");
                None
            }
        }
    }

    /// 리포트를 실패 상태로 저장하고 에러를 그대로 돌려줍니다.
    async fn fail(&self, report: &mut IndexReport, err: IndexerError) -> IndexerError {
        report.fail(&err);
        warn!(manifest = %report.manifest, error = %err, "indexing failed");
        if let Err(e) = self.store.persist_report(&report.manifest, report).await {
            warn!(manifest = %report.manifest, error = %e, "failed to persist failed report");
        }
        err
    }

    fn cancelled(&self, manifest: &Manifest) -> IndexerError {
        info!(manifest = %manifest.hash, "indexing cancelled");
        IndexerError::Cancelled {
            manifest: manifest.hash.to_string(),
        }
    }

    /// 레이어마다 fetch → scan을 permit 하나 안에서 실행합니다.
    ///
    /// 결과는 매니페스트 순서입니다. 첫 fetch 실패에서 나머지 작업을 중단합니다.
    async fn process_layers(
        &self,
        manifest: &Manifest,
        ctx: &ScanContext,
    ) -> Result<Vec<LayerScanOutput>, IndexerError> {
        let semaphore = Arc::new(Semaphore::new(self.config.layer_concurrency.max(1)));
        let mut tasks: JoinSet<Result<LayerScanOutput, IndexerError>> = JoinSet::new();

        for (ordinal, descriptor) in manifest.layers.iter().enumerate() {
            let fetcher = Arc::clone(&self.fetcher);
            let runner = Arc::clone(&self.runner);
            let active = Arc::clone(&self.active);
            let config = self.config.clone();
            let semaphore = Arc::clone(&semaphore);
            let descriptor = descriptor.clone();
            let ctx = ctx.clone();
            let manifest_hash = manifest.hash.to_string();

            tasks.spawn(
                async move {
                    let cancel = ctx.cancel_token().clone();
                    let _permit = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            return Err(IndexerError::Cancelled { manifest: manifest_hash });
                        }
                        permit = semaphore.acquire_owned() => {
                            permit.map_err(|e| IndexerError::Task(e.to_string()))?
                        }
                    };

                    let layer = fetch_with_retry(fetcher.as_ref(), &config, &descriptor, ordinal, &cancel)
                        .await
                        .map_err(|e| match e {
                            RetryError::Cancelled => IndexerError::Cancelled { manifest: manifest_hash },
                            RetryError::Fetch(source) => IndexerError::Fetch {
                                layer: descriptor.digest.to_string(),
                                source,
                            },
                        })?;

                    metrics::gauge!(m::INDEXER_INFLIGHT_LAYERS).increment(1.0);
                    let output = runner.run(&ctx, &layer, &active).await;
                    metrics::gauge!(m::INDEXER_INFLIGHT_LAYERS).decrement(1.0);
                    drop(layer);
                    Ok(output)
                }
                .in_current_span(),
            );
        }

        let mut outputs = Vec::with_capacity(manifest.layers.len());
        while let Some(joined) = tasks.join_next().await {
            match joined.map_err(|e| IndexerError::Task(e.to_string()))? {
                Ok(output) => outputs.push(output),
                Err(e) => {
                    tasks.abort_all();
                    return Err(e);
                }
            }
        }
        outputs.sort_by_key(|o| o.ordinal);
        Ok(outputs)
    }
}

fn transition(report: &mut IndexReport, next: IndexState) {
    debug!(manifest = %report.manifest, from = %report.state, to = %next, "state transition");
    report.state = next;
}

enum RetryError {
    Cancelled,
    Fetch(FetchError),
}

/// 한 레이어를 재시도와 타임아웃을 적용해서 가져옵니다.
///
/// 재시도할 수 없는 에러(digest 불일치 등)는 즉시 반환합니다.
async fn fetch_with_retry<F: Fetcher>(
    fetcher: &F,
    config: &IndexerConfig,
    descriptor: &LayerDescriptor,
    ordinal: usize,
    cancel: &CancellationToken,
) -> Result<Layer, RetryError> {
    let mut attempt = 0u32;
    loop {
        if attempt > 0 {
            let backoff = config.backoff(attempt);
            metrics::counter!(m::INDEXER_FETCH_RETRIES_TOTAL).increment(1);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                _ = tokio::time::sleep(backoff) => {}
            }
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            r = tokio::time::timeout(config.fetch_timeout(), fetcher.fetch(descriptor, ordinal)) => {
                r.unwrap_or(Err(FetchError::Timeout { secs: config.fetch_timeout_secs }))
            }
        };

        match result {
            Ok(layer) => {
                metrics::counter!(m::INDEXER_LAYERS_FETCHED_TOTAL).increment(1);
                debug!(layer = %descriptor.digest, ordinal, attempt, "layer fetched");
                return Ok(layer);
            }
            Err(e) if e.is_retryable() && attempt < config.fetch_retries => {
                attempt += 1;
                warn!(
                    layer = %descriptor.digest,
                    attempt,
                    max = config.fetch_retries,
                    error = %e,
                    "layer fetch failed, retrying"
                );
            }
            Err(e) => {
                metrics::counter!(m::INDEXER_FETCH_FAILURES_TOTAL).increment(1);
                warn!(layer = %descriptor.digest, error = %e, "layer fetch failed");
                return Err(RetryError::Fetch(e));
            }
        }
    }
}

impl<F, S> std::fmt::Debug for LayerIndexer<F, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayerIndexer")
            .field("config", &self.config)
            .field("active", &self.identities)
            .finish_non_exhaustive()
    }
}

/// [`LayerIndexer`] 빌더
///
/// fetcher와 store는 필수입니다. 레지스트리를 지정하지 않으면 내장 스캐너 레지스트리를
/// 사용합니다.
pub struct LayerIndexerBuilder<F, S> {
    config: IndexerConfig,
    fetcher: Option<Arc<F>>,
    store: Option<Arc<S>>,
    registry: Option<ScannerRegistry>,
}

impl<F: Fetcher, S: Store> LayerIndexerBuilder<F, S> {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self {
            config: IndexerConfig::default(),
            fetcher: None,
            store: None,
            registry: None,
        }
    }

    /// 인덱서 설정을 지정합니다.
    pub fn config(mut self, config: IndexerConfig) -> Self {
        self.config = config;
        self
    }

    /// fetcher를 지정합니다.
    pub fn fetcher(mut self, fetcher: F) -> Self {
        self.fetcher = Some(Arc::new(fetcher));
        self
    }

    /// 공유 fetcher를 지정합니다.
    pub fn shared_fetcher(mut self, fetcher: Arc<F>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// 스토어를 지정합니다.
    pub fn store(mut self, store: S) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    /// 공유 스토어를 지정합니다.
    pub fn shared_store(mut self, store: Arc<S>) -> Self {
        self.store = Some(store);
        self
    }

    /// 스캐너 레지스트리를 지정합니다.
    pub fn registry(mut self, registry: ScannerRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// 인덱서를 빌드합니다.
    ///
    /// # Errors
    ///
    /// - `IndexerError::Config`: 설정 검증 실패, fetcher/store 누락
    /// - `IndexerError::Registry`: 알 수 없는 에코시스템
    pub fn build(self) -> Result<LayerIndexer<F, S>, IndexerError> {
        self.config.validate()?;

        let fetcher = self.fetcher.ok_or_else(|| IndexerError::Config {
            field: "fetcher".to_owned(),
            reason: "a fetcher is required".to_owned(),
        })?;
        let store = self.store.ok_or_else(|| IndexerError::Config {
            field: "store".to_owned(),
            reason: "a store is required".to_owned(),
        })?;
        let registry = match self.registry {
            Some(registry) => registry,
            None => ScannerRegistry::builtin(Default::default())?,
        };

        let airgap = self.config.airgap || fetcher.airgap();
        let active: Arc<[Arc<dyn DynScanner>]> =
            registry.resolve(&self.config.ecosystems, airgap)?.into();
        let identities: Vec<ScannerIdentity> = active.iter().map(|s| s.identity()).collect();
        if identities.is_empty() {
            warn!(ecosystems = ?self.config.ecosystems, airgap, "no active scanners");
        }

        let cache = Arc::new(FindingsCache::new(Arc::clone(&store)));
        let runner = Arc::new(LayerScanRunner::new(cache, self.config.scanner_concurrency));

        Ok(LayerIndexer {
            config: self.config,
            fetcher,
            store,
            registry: Arc::new(registry),
            active,
            identities,
            runner,
            manifests_indexed: AtomicU64::new(0),
            manifest_cache_hits: AtomicU64::new(0),
        })
    }
}

impl<F: Fetcher, S: Store> Default for LayerIndexerBuilder<F, S> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    use layerdex_core::report::LayerOutcome;
    use layerdex_core::types::Digest;

    use super::*;
    use crate::config::IndexerConfigBuilder;
    use crate::layer::testing::{digest, tar_bytes};
    use crate::store::MemoryStore;

    const STATUS: &str = "Package: foo\nStatus: install ok installed\nVersion: 1.0\nArchitecture: amd64\n";

    /// 테스트용 fetcher. digest별 tar와 실패 횟수를 지정합니다.
    #[derive(Default)]
    struct MockFetcher {
        layers: HashMap<Digest, Vec<u8>>,
        transient_failures: Mutex<HashMap<Digest, u32>>,
        calls: AtomicU64,
        airgap: bool,
        events: Option<Events>,
    }

    type Events = Arc<Mutex<Vec<String>>>;

    impl MockFetcher {
        fn with_layer(mut self, seed: char, entries: &[(&str, &str)]) -> Self {
            self.layers.insert(digest(seed), tar_bytes(entries));
            self
        }

        fn failing(self, seed: char, times: u32) -> Self {
            self.transient_failures
                .lock()
                .unwrap()
                .insert(digest(seed), times);
            self
        }
    }

    impl Fetcher for MockFetcher {
        async fn fetch(&self, descriptor: &LayerDescriptor, ordinal: usize) -> Result<Layer, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(events) = &self.events {
                events.lock().unwrap().push(format!("fetch {ordinal}"));
            }
            if let Some(left) = self.transient_failures.lock().unwrap().get_mut(&descriptor.digest) {
                if *left > 0 {
                    *left -= 1;
                    return Err(FetchError::Io(std::io::Error::other("connection reset")));
                }
            }
            let bytes = self
                .layers
                .get(&descriptor.digest)
                .cloned()
                .ok_or_else(|| FetchError::NotFound {
                    uri: descriptor.uri.clone(),
                })?;
            Ok(Layer::from_bytes(descriptor.digest.clone(), ordinal, bytes))
        }

        fn airgap(&self) -> bool {
            self.airgap
        }
    }

    fn manifest(seeds: &[char]) -> Manifest {
        Manifest {
            hash: digest('f'),
            layers: seeds
                .iter()
                .map(|s| LayerDescriptor {
                    digest: digest(*s),
                    uri: format!("{s}.tar"),
                    media_type: None,
                })
                .collect(),
        }
    }

    fn config() -> IndexerConfig {
        IndexerConfigBuilder::new()
            .fetch_backoff_ms(1)
            .build()
            .unwrap()
    }

    fn indexer(fetcher: MockFetcher) -> LayerIndexer<MockFetcher, MemoryStore> {
        LayerIndexer::builder()
            .config(config())
            .fetcher(fetcher)
            .store(MemoryStore::new())
            .build()
            .unwrap()
    }

    fn dpkg_layer() -> [(&'static str, &'static str); 2] {
        [
            ("var/lib/dpkg/status", STATUS),
            ("var/lib/dpkg/available", ""),
        ]
    }

    #[tokio::test]
    async fn indexes_and_persists() {
        let fetcher = MockFetcher::default()
            .with_layer('1', &dpkg_layer())
            .with_layer('2', &[("etc/os-release", "NAME=Ubuntu\nVERSION_CODENAME=jammy\n")]);
        let indexer = indexer(fetcher);

        let report = indexer
            .index(&manifest(&['1', '2']), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.state, IndexState::Done);
        assert!(report.success);
        assert_eq!(report.packages.len(), 1);
        assert_eq!(report.distributions[0].version_code_name, "jammy");
        assert_eq!(report.layers.len(), 2);
        assert!(report.layers.iter().all(|l| l.outcome == LayerOutcome::Ok));
        assert_eq!(report.scanners.len(), 3);

        let stored = indexer.store().get_report(&digest('f')).await.unwrap();
        assert_eq!(stored, Some(report));
        assert_eq!(indexer.manifests_indexed(), 1);
    }

    #[tokio::test]
    async fn emptied_database_removes_packages() {
        let fetcher = MockFetcher::default()
            .with_layer('1', &dpkg_layer())
            .with_layer('2', &[("var/lib/dpkg/status", ""), ("var/lib/dpkg/available", "")]);
        let indexer = indexer(fetcher);

        let report = indexer
            .index(&manifest(&['1', '2']), CancellationToken::new())
            .await
            .unwrap();
        assert!(report.success);
        assert!(report.packages.is_empty());
        assert!(report.environments.is_empty());
    }

    #[tokio::test]
    async fn stored_report_skips_fetching() {
        let indexer = indexer(MockFetcher::default().with_layer('1', &dpkg_layer()));
        let first = indexer
            .index(&manifest(&['1']), CancellationToken::new())
            .await
            .unwrap();
        let second = indexer
            .index(&manifest(&['1']), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(indexer.fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(indexer.manifest_cache_hits(), 1);
    }

    #[tokio::test]
    async fn transient_fetch_errors_are_retried() {
        let fetcher = MockFetcher::default()
            .with_layer('1', &dpkg_layer())
            .failing('1', 2);
        let indexer = indexer(fetcher);
        let report = indexer
            .index(&manifest(&['1']), CancellationToken::new())
            .await
            .unwrap();
        assert!(report.success);
        assert_eq!(indexer.fetcher.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fetch_failure_fails_and_persists_failed_report() {
        let indexer = indexer(MockFetcher::default().with_layer('1', &dpkg_layer()));
        let err = indexer
            .index(&manifest(&['1', '2']), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, IndexerError::Fetch { .. }));

        let stored = indexer
            .store()
            .get_report(&digest('f'))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.state, IndexState::Failed);
        assert!(!stored.success);
        assert!(stored.error.is_some());
    }

    /// 스캔한 레이어 순서를 기록하는 스캐너
    struct Recording(Events);

    impl crate::scanner::Scanner for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        fn version(&self) -> &str {
            "1"
        }

        fn kind(&self) -> layerdex_core::types::ScannerKind {
            layerdex_core::types::ScannerKind::Distribution
        }

        async fn scan(
            &self,
            _ctx: &ScanContext,
            layer: &Layer,
        ) -> Result<Option<crate::scanner::Entities>, crate::error::ScanError> {
            self.0
                .lock()
                .unwrap()
                .push(format!("scan {}", layer.ordinal()));
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(None)
        }
    }

    #[tokio::test]
    async fn each_layer_is_scanned_before_the_next_fetch() {
        let events = Events::default();
        let mut fetcher = MockFetcher::default()
            .with_layer('1', &[])
            .with_layer('2', &[])
            .with_layer('3', &[]);
        fetcher.events = Some(Arc::clone(&events));

        let mut registry = ScannerRegistry::new();
        registry.register(Recording(Arc::clone(&events))).unwrap();
        registry
            .register_ecosystem(crate::scanner::Ecosystem::new("recorded", ["recording"]))
            .unwrap();

        let indexer = LayerIndexer::builder()
            .config(
                IndexerConfigBuilder::new()
                    .layer_concurrency(1)
                    .ecosystems(["recorded"])
                    .build()
                    .unwrap(),
            )
            .fetcher(fetcher)
            .store(MemoryStore::new())
            .registry(registry)
            .build()
            .unwrap();

        let report = indexer
            .index(&manifest(&['1', '2', '3']), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.layers.len(), 3);

        // permit 하나면 다음 레이어를 가져오기 전에 이전 레이어 스캔이 끝나야 한다
        let events = events.lock().unwrap().clone();
        assert_eq!(events.len(), 6);
        for pair in events.chunks(2) {
            let fetched = pair[0].strip_prefix("fetch ").unwrap();
            let scanned = pair[1].strip_prefix("scan ").unwrap();
            assert_eq!(fetched, scanned, "{events:?}");
        }
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let indexer = indexer(MockFetcher::default().with_layer('1', &dpkg_layer()));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = indexer.index(&manifest(&['1']), cancel).await.unwrap_err();
        assert!(matches!(err, IndexerError::Cancelled { .. }));
        assert!(indexer.cache().is_empty());
        assert_eq!(indexer.store().report_count().await, 0);
    }

    #[tokio::test]
    async fn airgap_fetcher_keeps_offline_scanners() {
        let fetcher = MockFetcher {
            airgap: true,
            ..MockFetcher::default()
        };
        let indexer = indexer(fetcher);
        // built-in scanners are all offline
        assert_eq!(indexer.active_scanners().len(), 3);
        assert!(!indexer.config().airgap);
    }

    #[test]
    fn builder_requires_fetcher_and_store() {
        let err = LayerIndexer::<MockFetcher, MemoryStore>::builder()
            .store(MemoryStore::new())
            .build()
            .unwrap_err();
        assert!(matches!(err, IndexerError::Config { ref field, .. } if field == "fetcher"));

        let err = LayerIndexer::<MockFetcher, MemoryStore>::builder()
            .config(
                IndexerConfigBuilder::new()
                    .ecosystems(["alpine"])
                    .build()
                    .unwrap(),
            )
            .fetcher(MockFetcher::default())
            .store(MemoryStore::new())
            .build()
            .unwrap_err();
        assert!(matches!(err, IndexerError::Registry(_)));
    }

    #[tokio::test]
    async fn fetch_timeout_counts_as_retryable() {
        struct Hanging;

        impl Fetcher for Hanging {
            async fn fetch(&self, _d: &LayerDescriptor, _o: usize) -> Result<Layer, FetchError> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(FetchError::NotFound { uri: String::new() })
            }
        }

        let config = IndexerConfigBuilder::new()
            .fetch_retries(1)
            .fetch_backoff_ms(1)
            .fetch_timeout_secs(1)
            .build()
            .unwrap();
        let manifest = manifest(&['1']);
        let cancel = CancellationToken::new();

        tokio::time::pause();
        let result = fetch_with_retry(&Hanging, &config, &manifest.layers[0], 0, &cancel).await;
        assert!(matches!(
            result,
            Err(RetryError::Fetch(FetchError::Timeout { secs: 1 }))
        ));
    }
}
