//! Shared fixtures for indexer integration tests

#![allow(dead_code)]

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use flate2::Compression;
use flate2::write::GzEncoder;
use sha2::{Digest as _, Sha256};

use layerdex_core::{Digest, DigestAlgorithm, LayerDescriptor, Manifest, ScannerKind};
use layerdex_indexer::fetcher::hash_file;
use layerdex_indexer::{
    Ecosystem, Entities, IndexerConfig, IndexerConfigBuilder, Layer, ScanContext, ScanError,
    Scanner, ScannerRegistry,
};

/// dpkg status stanza for an installed amd64 package
pub fn stanza(name: &str, version: &str) -> String {
    format!(
        "Package: {name}\nStatus: install ok installed\nArchitecture: amd64\nVersion: {version}\n\n"
    )
}

/// Builds an uncompressed tar archive from (path, content) pairs.
pub fn tar_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, data) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_cksum();
        builder
            .append_data(&mut header, path, data.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap()
}

/// Writes a layer blob under `dir` and returns its descriptor.
///
/// The digest covers the blob as written, compressed or not.
pub fn write_layer(dir: &Path, name: &str, entries: &[(&str, &str)], gzip: bool) -> LayerDescriptor {
    let tar = tar_bytes(entries);
    let (file_name, blob) = if gzip {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&tar).unwrap();
        (format!("{name}.tar.gz"), encoder.finish().unwrap())
    } else {
        (format!("{name}.tar"), tar)
    };

    let path = dir.join(&file_name);
    std::fs::write(&path, blob).unwrap();
    let hex = hash_file(&path, DigestAlgorithm::Sha256).unwrap();

    LayerDescriptor {
        digest: Digest::new(DigestAlgorithm::Sha256, &hex).unwrap(),
        uri: file_name,
        media_type: None,
    }
}

/// Manifest whose hash is derived from its layer digests.
pub fn manifest(layers: Vec<LayerDescriptor>) -> Manifest {
    let mut hasher = Sha256::new();
    for layer in &layers {
        hasher.update(layer.digest.to_string().as_bytes());
        hasher.update(b"\n");
    }
    let hex = hex::encode(hasher.finalize());
    Manifest {
        hash: Digest::new(DigestAlgorithm::Sha256, &hex).unwrap(),
        layers,
    }
}

/// Test config without backoff delays.
pub fn config() -> IndexerConfig {
    IndexerConfigBuilder::new()
        .fetch_retries(1)
        .fetch_backoff_ms(1)
        .build()
        .unwrap()
}

/// [`config`] with report reuse switched on or off.
pub fn config_with_reuse(reuse: bool) -> IndexerConfig {
    IndexerConfigBuilder::new()
        .fetch_retries(1)
        .fetch_backoff_ms(1)
        .reuse_reports(reuse)
        .build()
        .unwrap()
}

/// Scanner behavior for [`CountingScanner`]
#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    /// Returns an empty distribution set
    Found,
    /// Returns an error
    Fail,
}

/// Distribution scanner that counts invocations.
#[derive(Debug, Clone)]
pub struct CountingScanner {
    pub name: &'static str,
    pub calls: Arc<AtomicUsize>,
    pub delay: Duration,
    pub behavior: Behavior,
    pub network: bool,
}

impl CountingScanner {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            calls: Arc::new(AtomicUsize::new(0)),
            delay: Duration::ZERO,
            behavior: Behavior::Found,
            network: false,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing(mut self) -> Self {
        self.behavior = Behavior::Fail;
        self
    }

    pub fn networked(mut self) -> Self {
        self.network = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Scanner for CountingScanner {
    fn name(&self) -> &str {
        self.name
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn kind(&self) -> ScannerKind {
        ScannerKind::Distribution
    }

    fn requires_network(&self) -> bool {
        self.network
    }

    async fn scan(&self, _ctx: &ScanContext, _layer: &Layer) -> Result<Option<Entities>, ScanError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.behavior {
            Behavior::Found => Ok(Some(Entities::Distributions(Vec::new()))),
            Behavior::Fail => Err(ScanError::Invariant("simulated failure".to_owned())),
        }
    }
}

/// Registry with the given scanners under a single `test` ecosystem.
pub fn registry(scanners: &[CountingScanner]) -> ScannerRegistry {
    let mut registry = ScannerRegistry::new();
    for scanner in scanners {
        registry.register(scanner.clone()).unwrap();
    }
    registry
        .register_ecosystem(Ecosystem::new("test", scanners.iter().map(|s| s.name)))
        .unwrap();
    registry
}

/// [`config`] with the `test` ecosystem active.
pub fn test_config() -> IndexerConfigBuilder {
    IndexerConfigBuilder::new()
        .ecosystems(["test"])
        .fetch_retries(1)
        .fetch_backoff_ms(1)
}
