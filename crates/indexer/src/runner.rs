//! 레이어 스캔 실행기: 한 레이어에 활성 스캐너 집합을 실행
//!
//! 스캐너는 `scanner_concurrency` 만큼 병렬로 실행되고, 결과는 캐시를 거쳐서
//! 가져옵니다. 스캐너 하나의 실패는 같은 레이어의 다른 스캐너에 영향을 주지
//! 않으며 [`ScanFailure`]로 기록됩니다.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{Instrument, debug, info_span, warn};

use layerdex_core::metrics as m;
use layerdex_core::report::{LayerFindings, LayerStatus, ScanFailure, ScanFailureKind};
use layerdex_core::types::{Digest, ScannerIdentity};

use crate::cache::{CacheSource, FindingsCache};
use crate::context::ScanContext;
use crate::error::ScanError;
use crate::layer::Layer;
use crate::scanner::DynScanner;
use crate::store::Store;

/// 한 레이어의 스캔 결과
#[derive(Debug, Clone)]
pub struct LayerScanOutput {
    /// 레이어 digest
    pub layer: Digest,
    /// 매니페스트 내 순서
    pub ordinal: usize,
    /// 성공한 스캐너의 결과 (활성 스캐너 순서)
    pub findings: Vec<Arc<LayerFindings>>,
    /// 실패한 스캐너 (활성 스캐너 순서)
    pub failures: Vec<ScanFailure>,
    /// 이번 실행에서 새로 스캔한 스캐너 수
    pub scanned: usize,
}

impl LayerScanOutput {
    /// 레이어 상태를 계산합니다.
    pub fn status(&self) -> LayerStatus {
        LayerStatus::from_results(
            self.layer.clone(),
            self.ordinal,
            self.findings.len(),
            self.failures.clone(),
        )
    }

    /// 모든 스캐너가 실패했는지 여부
    pub fn is_failed(&self) -> bool {
        self.findings.is_empty() && !self.failures.is_empty()
    }

    /// 취소로 끝난 스캐너가 있는지 여부
    pub fn was_cancelled(&self) -> bool {
        self.failures
            .iter()
            .any(|f| f.kind == ScanFailureKind::Cancelled)
    }
}

type TaskResult = (usize, ScannerIdentity, Result<(Arc<LayerFindings>, CacheSource), ScanError>);

/// 레이어 스캔 실행기
pub struct LayerScanRunner<S> {
    cache: Arc<FindingsCache<S>>,
    scanner_concurrency: usize,
}

impl<S: Store> LayerScanRunner<S> {
    /// 새 실행기를 생성합니다. `scanner_concurrency`가 0이면 1로 취급합니다.
    pub fn new(cache: Arc<FindingsCache<S>>, scanner_concurrency: usize) -> Self {
        Self {
            cache,
            scanner_concurrency: scanner_concurrency.max(1),
        }
    }

    /// 캐시
    pub fn cache(&self) -> &Arc<FindingsCache<S>> {
        &self.cache
    }

    /// 레이어에 스캐너 집합을 실행합니다.
    ///
    /// 이 함수 자체는 실패하지 않습니다. 스캐너 에러, 취소, 태스크 panic은 모두
    /// 해당 스캐너의 [`ScanFailure`]가 됩니다.
    pub async fn run(
        &self,
        ctx: &ScanContext,
        layer: &Layer,
        scanners: &[Arc<dyn DynScanner>],
    ) -> LayerScanOutput {
        let span = info_span!(
            "scan_layer",
            layer = %layer.hash(),
            ordinal = layer.ordinal(),
            scanners = scanners.len()
        );
        let ctx = ctx.child(span.clone());
        self.run_inner(ctx, layer, scanners).instrument(span).await
    }

    async fn run_inner(
        &self,
        ctx: ScanContext,
        layer: &Layer,
        scanners: &[Arc<dyn DynScanner>],
    ) -> LayerScanOutput {
        let started = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.scanner_concurrency));
        let mut tasks: JoinSet<TaskResult> = JoinSet::new();
        let identities: Vec<ScannerIdentity> = scanners.iter().map(|s| s.identity()).collect();

        for (idx, scanner) in scanners.iter().enumerate() {
            let identity = identities[idx].clone();
            let scanner = Arc::clone(scanner);
            let cache = Arc::clone(&self.cache);
            let semaphore = Arc::clone(&semaphore);
            let layer = layer.clone();
            let ctx = ctx.child(info_span!(
                parent: ctx.span(),
                "scanner",
                scanner = %identity,
                layer = %layer.hash()
            ));

            tasks.spawn(async move {
                let permit = tokio::select! {
                    biased;
                    _ = ctx.cancel_token().cancelled() => None,
                    p = semaphore.acquire_owned() => p.ok(),
                };
                let result = match permit {
                    None => Err(ScanError::Cancelled),
                    Some(_permit) => {
                        let span = ctx.span().clone();
                        cache
                            .get_or_scan(&ctx, &layer, scanner.as_ref())
                            .instrument(span)
                            .await
                            .map(|lookup| (lookup.findings, lookup.source))
                    }
                };
                (idx, identity, result)
            });
        }

        let mut results: Vec<Option<Result<(Arc<LayerFindings>, CacheSource), ScanError>>> =
            (0..scanners.len()).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, _, result)) => results[idx] = Some(result),
                Err(e) => warn!(layer = %layer.hash(), error = %e, "scanner task aborted"),
            }
        }

        let mut output = LayerScanOutput {
            layer: layer.hash().clone(),
            ordinal: layer.ordinal(),
            findings: Vec::new(),
            failures: Vec::new(),
            scanned: 0,
        };

        for (identity, result) in identities.into_iter().zip(results) {
            let result = result
                .unwrap_or_else(|| Err(ScanError::Internal("scanner task panicked".to_owned())));
            match result {
                Ok((findings, source)) => {
                    if source == CacheSource::Scanned {
                        output.scanned += 1;
                    }
                    output.findings.push(findings);
                }
                Err(e) => {
                    let kind = if e.is_cancelled() {
                        ScanFailureKind::Cancelled
                    } else {
                        warn!(layer = %layer.hash(), scanner = %identity, error = %e, "scanner failed");
                        ScanFailureKind::Failed
                    };
                    metrics::counter!(
                        m::INDEXER_SCANNER_FAILURES_TOTAL,
                        m::LABEL_SCANNER => identity.name.clone(),
                        m::LABEL_KIND => kind.to_string()
                    )
                    .increment(1);
                    output.failures.push(ScanFailure {
                        scanner: identity,
                        kind,
                        reason: e.to_string(),
                    });
                }
            }
        }

        let elapsed = started.elapsed();
        metrics::histogram!(m::INDEXER_LAYER_SCAN_DURATION_SECONDS).record(elapsed.as_secs_f64());
        debug!(
            layer = %layer.hash(),
            succeeded = output.findings.len(),
            failed = output.failures.len(),
            scanned = output.scanned,
            elapsed_ms = elapsed.as_millis() as u64,
            "layer scan finished"
        );
        output
    }
}

impl<S> std::fmt::Debug for LayerScanRunner<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayerScanRunner")
            .field("scanner_concurrency", &self.scanner_concurrency)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use layerdex_core::report::LayerOutcome;
    use layerdex_core::types::{Distribution, ScannerKind};

    use super::*;
    use crate::layer::testing::layer;
    use crate::scanner::{Entities, Scanner};
    use crate::store::MemoryStore;

    enum Behavior {
        Found,
        Fail,
        Panic,
        Sleep(Duration),
    }

    struct Mock {
        name: &'static str,
        behavior: Behavior,
        running: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl Mock {
        fn new(name: &'static str, behavior: Behavior) -> Self {
            Self {
                name,
                behavior,
                running: Arc::new(AtomicUsize::new(0)),
                peak: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl Scanner for Mock {
        fn name(&self) -> &str {
            self.name
        }

        fn version(&self) -> &str {
            "1"
        }

        fn kind(&self) -> ScannerKind {
            ScannerKind::Distribution
        }

        async fn scan(&self, _ctx: &ScanContext, _layer: &Layer) -> Result<Option<Entities>, ScanError> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let result = match self.behavior {
                Behavior::Found => Ok(Some(Entities::Distributions(vec![Distribution::default()]))),
                Behavior::Fail => Err(ScanError::Parse {
                    path: "etc/os-release".to_owned(),
                    reason: "garbage".to_owned(),
                }),
                Behavior::Panic => panic!("scanner bug"),
                Behavior::Sleep(d) => {
                    tokio::time::sleep(d).await;
                    Ok(None)
                }
            };
            self.running.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    fn runner(concurrency: usize) -> LayerScanRunner<MemoryStore> {
        LayerScanRunner::new(
            Arc::new(FindingsCache::new(Arc::new(MemoryStore::new()))),
            concurrency,
        )
    }

    #[tokio::test]
    async fn partial_failure_is_isolated() {
        let scanners: Vec<Arc<dyn DynScanner>> = vec![
            Arc::new(Mock::new("ok", Behavior::Found)),
            Arc::new(Mock::new("bad", Behavior::Fail)),
        ];
        let out = runner(4)
            .run(&ScanContext::detached(), &layer('a', &[]), &scanners)
            .await;

        assert_eq!(out.findings.len(), 1);
        assert_eq!(out.findings[0].scanner.name, "ok");
        assert_eq!(out.failures.len(), 1);
        assert_eq!(out.failures[0].scanner.name, "bad");
        assert_eq!(out.failures[0].kind, ScanFailureKind::Failed);
        assert_eq!(out.status().outcome, LayerOutcome::Partial);
        assert!(!out.is_failed());
    }

    #[tokio::test]
    async fn all_failures_fail_the_layer() {
        let scanners: Vec<Arc<dyn DynScanner>> = vec![
            Arc::new(Mock::new("bad", Behavior::Fail)),
            Arc::new(Mock::new("worse", Behavior::Panic)),
        ];
        let out = runner(4)
            .run(&ScanContext::detached(), &layer('a', &[]), &scanners)
            .await;

        assert!(out.is_failed());
        assert_eq!(out.status().outcome, LayerOutcome::Failed);
        let names: Vec<&str> = out.failures.iter().map(|f| f.scanner.name.as_str()).collect();
        assert_eq!(names, vec!["bad", "worse"]);
    }

    #[tokio::test]
    async fn no_scanners_is_ok() {
        let out = runner(4)
            .run(&ScanContext::detached(), &layer('a', &[]), &[])
            .await;
        assert_eq!(out.status().outcome, LayerOutcome::Ok);
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let peak = Arc::new(AtomicUsize::new(0));
        let running = Arc::new(AtomicUsize::new(0));
        let scanners: Vec<Arc<dyn DynScanner>> = ["a", "b", "c", "d", "e"]
            .into_iter()
            .map(|name| {
                let mut mock = Mock::new(name, Behavior::Sleep(Duration::from_millis(20)));
                mock.peak = Arc::clone(&peak);
                mock.running = Arc::clone(&running);
                Arc::new(mock) as Arc<dyn DynScanner>
            })
            .collect();

        let out = runner(2)
            .run(&ScanContext::detached(), &layer('a', &[]), &scanners)
            .await;
        assert_eq!(out.findings.len(), 5);
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert!(out.findings.iter().all(|f| f.absent));
    }

    #[tokio::test]
    async fn cancellation_is_reported() {
        let scanners: Vec<Arc<dyn DynScanner>> = vec![Arc::new(Mock::new(
            "slow",
            Behavior::Sleep(Duration::from_secs(30)),
        ))];
        let ctx = ScanContext::detached();
        let cancel = ctx.cancel_token().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });

        let runner = runner(1);
        let out = runner.run(&ctx, &layer('a', &[]), &scanners).await;
        assert!(out.was_cancelled());
        assert_eq!(out.failures[0].kind, ScanFailureKind::Cancelled);
        assert!(runner.cache().is_empty());
    }
}
