//! 스캔 결과 캐시: (레이어 digest, 스캐너 식별자) 단위 중복 제거
//!
//! 키마다 `OnceCell` 슬롯 하나를 둡니다. 같은 키를 동시에 요청하면 첫 요청만
//! 스캔을 실행하고 나머지는 그 결과를 기다립니다.
//!
//! 조회 순서:
//! 1. 프로세스 내 맵
//! 2. [`Store::get_cached_findings`]
//! 3. 스캐너 실행 후 [`Store::put_cached_findings`]
//!
//! 실패하거나 취소된 계산은 슬롯을 채우지 않습니다. 같은 슬롯을 기다리는 요청이
//! 없을 때만 맵에서도 제거되고, 남아 있으면 대기자 중 하나가 계산을 이어받습니다.
//! 스토어 읽기/쓰기 실패는 경고로 남기고 스캔 결과를 그대로 사용합니다.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::OnceCell;
use tracing::{debug, warn};

use layerdex_core::metrics as m;
use layerdex_core::report::LayerFindings;
use layerdex_core::types::{Digest, ScannerIdentity};

use crate::context::ScanContext;
use crate::error::ScanError;
use crate::layer::Layer;
use crate::scanner::{DynScanner, into_findings};
use crate::store::Store;

type Key = (Digest, ScannerIdentity);
type Slot = Arc<OnceCell<Arc<LayerFindings>>>;

/// 결과를 가져온 위치
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheSource {
    /// 프로세스 내 캐시 (동시 요청 대기 포함)
    Memory,
    /// 스토어에 저장된 결과
    Store,
    /// 스캐너를 새로 실행
    Scanned,
}

impl CacheSource {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Store => "store",
            Self::Scanned => "scanned",
        }
    }
}

impl fmt::Display for CacheSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 캐시 조회 결과
#[derive(Debug, Clone)]
pub struct CacheLookup {
    /// 결과 (불변)
    pub findings: Arc<LayerFindings>,
    /// 결과를 가져온 위치
    pub source: CacheSource,
}

/// 캐시 통계 스냅샷
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// 메모리 적중 수
    pub memory_hits: u64,
    /// 스토어 적중 수
    pub store_hits: u64,
    /// 스캔이 필요했던 조회 수
    pub misses: u64,
    /// 실제 실행된 스캔 수
    pub scans: u64,
}

/// 스캔 결과 캐시
pub struct FindingsCache<S> {
    store: Arc<S>,
    entries: Mutex<HashMap<Key, Slot>>,
    memory_hits: AtomicU64,
    store_hits: AtomicU64,
    misses: AtomicU64,
    scans: AtomicU64,
}

impl<S: Store> FindingsCache<S> {
    /// 새 캐시를 생성합니다.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            entries: Mutex::new(HashMap::new()),
            memory_hits: AtomicU64::new(0),
            store_hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            scans: AtomicU64::new(0),
        }
    }

    /// 백엔드 스토어
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Key, Slot>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn slot(&self, key: &Key) -> Slot {
        Arc::clone(self.lock().entry(key.clone()).or_default())
    }

    /// 캐시된 결과를 반환하거나 스캐너를 실행합니다.
    ///
    /// 같은 키에 대해 동시에 실행되는 스캔은 최대 하나입니다.
    /// `ctx`가 취소되면 대기 중이던 요청도 [`ScanError::Cancelled`]로 끝납니다.
    pub async fn get_or_scan(
        &self,
        ctx: &ScanContext,
        layer: &Layer,
        scanner: &dyn DynScanner,
    ) -> Result<CacheLookup, ScanError> {
        let identity = scanner.identity();
        let key = (layer.hash().clone(), identity.clone());
        let slot = self.slot(&key);

        if let Some(findings) = slot.get() {
            return Ok(self.record_hit(&identity, Arc::clone(findings), CacheSource::Memory));
        }

        let mut source = CacheSource::Memory;
        let init = {
            let source = &mut source;
            let identity = &identity;
            slot.get_or_try_init(move || async move {
                match self.store.get_cached_findings(layer.hash(), identity).await {
                    Ok(Some(findings)) => {
                        *source = CacheSource::Store;
                        return Ok(Arc::new(findings));
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(layer = %layer.hash(), scanner = %identity, error = %e, "cached findings lookup failed, scanning");
                    }
                }

                *source = CacheSource::Scanned;
                self.scans.fetch_add(1, Ordering::Relaxed);
                metrics::counter!(m::INDEXER_SCANS_TOTAL, m::LABEL_SCANNER => identity.name.clone())
                    .increment(1);

                let result = scanner.scan(ctx, layer).await?;
                let findings = into_findings(layer.hash(), identity, result)?;
                metrics::counter!(m::INDEXER_PACKAGES_FOUND_TOTAL, m::LABEL_SCANNER => identity.name.clone())
                    .increment(findings.packages.len() as u64);

                if let Err(e) = self.store.put_cached_findings(&findings).await {
                    warn!(layer = %layer.hash(), scanner = %identity, error = %e, "failed to persist findings");
                }
                Ok::<_, ScanError>(Arc::new(findings))
            })
        };

        let result = tokio::select! {
            biased;
            _ = ctx.cancel_token().cancelled() => Err(ScanError::Cancelled),
            r = init => r.map(Arc::clone),
        };

        match result {
            Ok(findings) => Ok(self.record_hit(&identity, findings, source)),
            Err(e) => {
                self.discard_if_empty(&key, &slot);
                Err(e)
            }
        }
    }

    fn record_hit(
        &self,
        identity: &ScannerIdentity,
        findings: Arc<LayerFindings>,
        source: CacheSource,
    ) -> CacheLookup {
        match source {
            CacheSource::Memory => {
                self.memory_hits.fetch_add(1, Ordering::Relaxed);
            }
            CacheSource::Store => {
                self.store_hits.fetch_add(1, Ordering::Relaxed);
            }
            CacheSource::Scanned => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                metrics::counter!(m::INDEXER_CACHE_MISSES_TOTAL, m::LABEL_SCANNER => identity.name.clone())
                    .increment(1);
            }
        }
        if source != CacheSource::Scanned {
            metrics::counter!(m::INDEXER_CACHE_HITS_TOTAL, m::LABEL_SOURCE => source.as_str())
                .increment(1);
        }
        debug!(layer = %findings.layer, scanner = %identity, source = %source, "findings resolved");
        CacheLookup { findings, source }
    }

    /// 채워지지 않은 슬롯을 맵에서 제거합니다.
    ///
    /// 다른 요청이 이미 채웠거나 아직 같은 슬롯을 기다리고 있으면 유지합니다.
    /// 대기자가 있는 슬롯을 지우면 다음 요청이 새 슬롯에서 같은 키를 중복 스캔합니다.
    fn discard_if_empty(&self, key: &Key, slot: &Slot) {
        let mut entries = self.lock();
        if let Some(current) = entries.get(key) {
            // 맵과 이 호출자만 참조하는 경우
            if Arc::ptr_eq(current, slot)
                && !current.initialized()
                && Arc::strong_count(current) == 2
            {
                entries.remove(key);
            }
        }
    }

    /// 키의 결과가 메모리에 있는지 여부
    pub fn contains(&self, layer: &Digest, scanner: &ScannerIdentity) -> bool {
        self.lock()
            .get(&(layer.clone(), scanner.clone()))
            .is_some_and(|slot| slot.initialized())
    }

    /// 메모리에 있는 결과 수
    pub fn len(&self) -> usize {
        self.lock().values().filter(|slot| slot.initialized()).count()
    }

    /// 메모리에 결과가 하나도 없는지 여부
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 스캐너 식별자의 모든 메모리 항목을 제거합니다. 제거된 수를 반환합니다.
    pub fn invalidate_scanner(&self, scanner: &ScannerIdentity) -> usize {
        self.retain(|(_, s)| s != scanner)
    }

    /// 레이어의 모든 메모리 항목을 제거합니다. 제거된 수를 반환합니다.
    pub fn invalidate_layer(&self, layer: &Digest) -> usize {
        self.retain(|(l, _)| l != layer)
    }

    fn retain(&self, keep: impl Fn(&Key) -> bool) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|key, _| keep(key));
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, "invalidated cached findings");
        }
        removed
    }

    /// 통계 스냅샷
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            memory_hits: self.memory_hits.load(Ordering::Relaxed),
            store_hits: self.store_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            scans: self.scans.load(Ordering::Relaxed),
        }
    }
}

impl<S> fmt::Debug for FindingsCache<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FindingsCache")
            .field("scans", &self.scans.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
