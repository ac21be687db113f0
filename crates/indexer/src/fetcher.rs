//! Layer fetching.
//!
//! The [`Fetcher`] trait hides how a [`LayerDescriptor`] turns into a readable
//! [`Layer`]. Remote transports live outside this crate; [`LocalFetcher`]
//! resolves descriptors to files on disk, which covers unpacked image layouts
//! and tests.
//!
//! # Local layout
//!
//! - `file:///abs/path/layer.tar` and plain paths are accepted.
//! - Relative paths are resolved against the fetcher's root directory.
//! - Gzip blobs (magic `1f 8b`) are decompressed once into memory.
//! - Plain tar blobs are read straight from disk on every `Layer::reader` call.
//!
//! Digest verification hashes the blob as stored, before decompression, the way
//! registries address layers.

use std::fs::File;
use std::future::Future;
use std::io::{self, BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use flate2::read::GzDecoder;
use sha2::{Sha256, Sha512};
use tracing::debug;

use layerdex_core::config::IndexerConfig as CoreIndexerConfig;
use layerdex_core::types::{Digest, DigestAlgorithm, LayerDescriptor};

use crate::error::FetchError;
use crate::layer::Layer;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Turns layer descriptors into readable layers.
pub trait Fetcher: Send + Sync + 'static {
    /// Fetches one layer.
    ///
    /// # Errors
    ///
    /// - `FetchError::NotFound`: the blob does not exist
    /// - `FetchError::DigestMismatch`: content does not match `descriptor.digest`
    /// - `FetchError::TooLarge`: blob exceeds the configured limit
    /// - `FetchError::Io`: transient I/O failure (retryable)
    fn fetch(
        &self,
        descriptor: &LayerDescriptor,
        ordinal: usize,
    ) -> impl Future<Output = Result<Layer, FetchError>> + Send;

    /// Whether this fetcher runs without network access.
    fn airgap(&self) -> bool {
        false
    }
}

/// Filesystem-backed fetcher.
#[derive(Debug, Clone)]
pub struct LocalFetcher {
    root: Option<PathBuf>,
    verify_digests: bool,
    max_layer_size: u64,
    airgap: bool,
}

impl LocalFetcher {
    /// Creates a fetcher with digest verification on and a 4 GiB size limit.
    pub fn new() -> Self {
        Self {
            root: None,
            verify_digests: true,
            max_layer_size: 4 * 1024 * 1024 * 1024,
            airgap: false,
        }
    }

    /// Creates a fetcher from the `[indexer]` config section.
    pub fn from_config(config: &CoreIndexerConfig) -> Self {
        Self::new()
            .verify_digests(config.verify_digests)
            .max_layer_size(config.max_layer_size)
            .airgap(config.airgap)
    }

    /// Resolves relative paths against `root`.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    /// Enables or disables digest verification.
    pub fn verify_digests(mut self, verify: bool) -> Self {
        self.verify_digests = verify;
        self
    }

    /// Sets the maximum blob size (and decompressed size) in bytes.
    pub fn max_layer_size(mut self, max: u64) -> Self {
        self.max_layer_size = max;
        self
    }

    /// Marks the fetcher as airgapped.
    pub fn airgap(mut self, airgap: bool) -> Self {
        self.airgap = airgap;
        self
    }

    /// Maps a descriptor URI to a local path.
    pub fn resolve(&self, uri: &str) -> Result<PathBuf, FetchError> {
        let raw = if let Some(path) = uri.strip_prefix("file://") {
            path
        } else if uri.contains("://") {
            return Err(FetchError::UnsupportedUri(uri.to_owned()));
        } else {
            uri
        };
        if raw.is_empty() {
            return Err(FetchError::UnsupportedUri(uri.to_owned()));
        }

        let path = Path::new(raw);
        Ok(match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        })
    }
}

impl Default for LocalFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Fetcher for LocalFetcher {
    async fn fetch(&self, descriptor: &LayerDescriptor, ordinal: usize) -> Result<Layer, FetchError> {
        let path = self.resolve(&descriptor.uri)?;
        let digest = descriptor.digest.clone();
        let uri = descriptor.uri.clone();
        let verify = self.verify_digests;
        let max = self.max_layer_size;

        tokio::task::spawn_blocking(move || load(&path, &uri, digest, ordinal, verify, max))
            .await
            .map_err(|e| FetchError::Io(io::Error::other(format!("fetch task failed: {e}"))))?
    }

    fn airgap(&self) -> bool {
        self.airgap
    }
}

fn load(
    path: &Path,
    uri: &str,
    digest: Digest,
    ordinal: usize,
    verify: bool,
    max: u64,
) -> Result<Layer, FetchError> {
    let not_found = |e: io::Error| {
        if e.kind() == ErrorKind::NotFound {
            FetchError::NotFound {
                uri: uri.to_owned(),
            }
        } else {
            FetchError::Io(e)
        }
    };

    let size = std::fs::metadata(path).map_err(not_found)?.len();
    if size > max {
        return Err(FetchError::TooLarge { size, max });
    }

    let mut file = File::open(path).map_err(not_found)?;
    let mut magic = [0u8; 2];
    let gzip = read_prefix(&mut file, &mut magic)? == 2 && magic == GZIP_MAGIC;

    if verify {
        let actual = hash_file(path, digest.algorithm())?;
        if actual != digest.hex() {
            return Err(FetchError::DigestMismatch {
                expected: digest.to_string(),
                actual: format!("{}:{actual}", digest.algorithm()),
            });
        }
    }

    if !gzip {
        debug!(layer = %digest, path = %path.display(), size, "using uncompressed layer from disk");
        return Ok(Layer::from_path(digest, ordinal, path));
    }

    let decoder = GzDecoder::new(BufReader::new(File::open(path)?));
    let mut buf = Vec::new();
    decoder.take(max.saturating_add(1)).read_to_end(&mut buf)?;
    let decompressed = buf.len() as u64;
    if decompressed > max {
        return Err(FetchError::TooLarge {
            size: decompressed,
            max,
        });
    }
    debug!(layer = %digest, compressed = size, decompressed, "decompressed gzip layer");
    Ok(Layer::from_bytes(digest, ordinal, Bytes::from(buf)))
}

fn read_prefix(file: &mut File, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

/// Streams the file through the digest's hash function and returns lowercase hex.
pub fn hash_file(path: &Path, algorithm: DigestAlgorithm) -> io::Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    match algorithm {
        DigestAlgorithm::Sha256 => hash_reader::<Sha256>(&mut reader),
        DigestAlgorithm::Sha512 => hash_reader::<Sha512>(&mut reader),
    }
}

fn hash_reader<H: sha2::Digest>(reader: &mut impl Read) -> io::Result<String> {
    let mut hasher = H::new();
    let mut chunk = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        hasher.update(&chunk[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
