//! Persistence abstraction for index reports and cached layer findings.
//!
//! The indexer only needs four operations, so the schema is left to the
//! implementation. Two implementations ship with the crate:
//!
//! - [`MemoryStore`]: process-local maps, used by tests and one-shot runs.
//! - [`DirStore`]: JSON files under a data directory.
//!
//! ```text
//! <data_dir>/
//! ├── reports/<alg>/<hex>.json
//! └── findings/<alg>/<hex>/<kind>-<name>-<version>.json
//! ```
//!
//! `persist_report` is an idempotent upsert. Findings are immutable once written,
//! so a second `put_cached_findings` for the same key simply overwrites with an
//! identical value.

use std::collections::HashMap;
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::sync::RwLock;
use tracing::debug;

use layerdex_core::error::StoreError;
use layerdex_core::report::{IndexReport, LayerFindings};
use layerdex_core::types::{Digest, ScannerIdentity};

/// Storage backend used by the indexer.
///
/// # Errors
///
/// Every method returns [`StoreError`] on I/O or serialization failure.
/// A missing entry is not an error: lookups return `Ok(None)`.
pub trait Store: Send + Sync + 'static {
    /// Upserts the report for `manifest`.
    fn persist_report(
        &self,
        manifest: &Digest,
        report: &IndexReport,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Returns the stored report for `manifest`, if any.
    fn get_report(
        &self,
        manifest: &Digest,
    ) -> impl Future<Output = Result<Option<IndexReport>, StoreError>> + Send;

    /// Returns cached findings for `(layer, scanner)`, if any.
    fn get_cached_findings(
        &self,
        layer: &Digest,
        scanner: &ScannerIdentity,
    ) -> impl Future<Output = Result<Option<LayerFindings>, StoreError>> + Send;

    /// Records findings under `(findings.layer, findings.scanner)`.
    fn put_cached_findings(
        &self,
        findings: &LayerFindings,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

type FindingsKey = (Digest, ScannerIdentity);

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    reports: RwLock<HashMap<Digest, IndexReport>>,
    findings: RwLock<HashMap<FindingsKey, LayerFindings>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored reports.
    pub async fn report_count(&self) -> usize {
        self.reports.read().await.len()
    }

    /// Number of cached findings.
    pub async fn findings_count(&self) -> usize {
        self.findings.read().await.len()
    }
}

impl Store for MemoryStore {
    async fn persist_report(&self, manifest: &Digest, report: &IndexReport) -> Result<(), StoreError> {
        self.reports
            .write()
            .await
            .insert(manifest.clone(), report.clone());
        Ok(())
    }

    async fn get_report(&self, manifest: &Digest) -> Result<Option<IndexReport>, StoreError> {
        Ok(self.reports.read().await.get(manifest).cloned())
    }

    async fn get_cached_findings(
        &self,
        layer: &Digest,
        scanner: &ScannerIdentity,
    ) -> Result<Option<LayerFindings>, StoreError> {
        let key = (layer.clone(), scanner.clone());
        Ok(self.findings.read().await.get(&key).cloned())
    }

    async fn put_cached_findings(&self, findings: &LayerFindings) -> Result<(), StoreError> {
        let key = (findings.layer.clone(), findings.scanner.clone());
        self.findings.write().await.insert(key, findings.clone());
        Ok(())
    }
}

/// JSON file store rooted at a data directory.
#[derive(Debug, Clone)]
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    /// Creates a store rooted at `root`. Directories are created lazily on write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn report_path(&self, manifest: &Digest) -> PathBuf {
        self.root
            .join("reports")
            .join(manifest.algorithm().to_string())
            .join(format!("{}.json", manifest.hex()))
    }

    fn findings_path(&self, layer: &Digest, scanner: &ScannerIdentity) -> PathBuf {
        self.root
            .join("findings")
            .join(layer.algorithm().to_string())
            .join(layer.hex())
            .join(format!(
                "{}-{}-{}.json",
                scanner.kind,
                sanitize(&scanner.name),
                sanitize(&scanner.version)
            ))
    }
}

/// Keeps file names inside their directory.
fn sanitize(component: &str) -> String {
    component
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '+') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let key = path.display().to_string();
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(StoreError::Read {
                key,
                reason: e.to_string(),
            });
        }
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| StoreError::Serialization(format!("{key}: {e}")))
}

/// Writes to a sibling temp file and renames it into place.
async fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let key = path.display().to_string();
    let bytes =
        serde_json::to_vec_pretty(value).map_err(|e| StoreError::Serialization(e.to_string()))?;

    let write_err = |e: std::io::Error| StoreError::Write {
        key: key.clone(),
        reason: e.to_string(),
    };
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }
    let tmp = path.with_extension(format!("json.{}.tmp", uuid::Uuid::new_v4()));
    tokio::fs::write(&tmp, &bytes).await.map_err(write_err)?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(write_err(e));
    }
    debug!(path = %key, bytes = bytes.len(), "wrote store entry");
    Ok(())
}

impl Store for DirStore {
    async fn persist_report(&self, manifest: &Digest, report: &IndexReport) -> Result<(), StoreError> {
        write_json(&self.report_path(manifest), report).await
    }

    async fn get_report(&self, manifest: &Digest) -> Result<Option<IndexReport>, StoreError> {
        read_json(&self.report_path(manifest)).await
    }

    async fn get_cached_findings(
        &self,
        layer: &Digest,
        scanner: &ScannerIdentity,
    ) -> Result<Option<LayerFindings>, StoreError> {
        read_json(&self.findings_path(layer, scanner)).await
    }

    async fn put_cached_findings(&self, findings: &LayerFindings) -> Result<(), StoreError> {
        write_json(
            &self.findings_path(&findings.layer, &findings.scanner),
            findings,
        )
        .await
    }
}
