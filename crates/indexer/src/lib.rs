#![doc = include_str!("../README.md")]
//!
//! # Module Structure
//!
//! - [`error`]: Domain error types (`IndexerError`, `ScanError`, `FetchError`)
//! - [`config`]: Indexer configuration (`IndexerConfig`, builder)
//! - [`context`]: Cancellation token and tracing span passed down each stage (`ScanContext`)
//! - [`layer`]: Layer archive access (`Layer`, `LayerFiles`, path helpers)
//! - [`fetcher`]: Layer retrieval (`Fetcher` trait, `LocalFetcher`)
//! - [`scanner`]: Scanner contract and built-in scanners (`Scanner`, `DynScanner`, `ScannerRegistry`)
//! - [`store`]: Report and findings persistence (`Store` trait, `MemoryStore`, `DirStore`)
//! - [`cache`]: Single-flight per-(layer, scanner) findings cache (`FindingsCache`)
//! - [`runner`]: Runs the active scanners against one layer (`LayerScanRunner`)
//! - [`coalesce`]: Merges per-layer findings into the final report (`Coalescer`)
//! - [`controller`]: Per-manifest state machine (`LayerIndexer`, `LayerIndexerBuilder`)
//!
//! # Architecture
//!
//! ```text
//! Manifest --> Fetcher --> Layer[]
//!                             |
//!                     LayerScanRunner (per layer)
//!                             |
//!                  +----------+----------+
//!                  |          |          |
//!                dpkg      ubuntu    apt-sources   <-- FindingsCache <--> Store
//!                  |          |          |
//!                  +----------+----------+
//!                             |
//!                        Coalescer
//!                             |
//!                       IndexReport --> Store
//! ```

pub mod cache;
pub mod coalesce;
pub mod config;
pub mod context;
pub mod controller;
pub mod error;
pub mod fetcher;
pub mod layer;
pub mod runner;
pub mod scanner;
pub mod store;

// --- Public API Re-exports ---

// Controller (main orchestrator)
pub use controller::{LayerIndexer, LayerIndexerBuilder};

// Configuration
pub use config::{IndexerConfig, IndexerConfigBuilder};

// Error
pub use error::{FetchError, IndexerError, ScanError};

// Context
pub use context::ScanContext;

// Layer / Fetcher
pub use fetcher::{Fetcher, LocalFetcher};
pub use layer::{Layer, LayerFiles};

// Scanners
pub use scanner::apt::AptSourcesScanner;
pub use scanner::dpkg::DpkgScanner;
pub use scanner::ubuntu::UbuntuScanner;
pub use scanner::{DynScanner, Ecosystem, Entities, Scanner, ScannerRegistry};

// Store / Cache
pub use cache::{CacheLookup, CacheSource, CacheStats, FindingsCache};
pub use store::{DirStore, MemoryStore, Store};

// Scan / Coalesce
pub use coalesce::{Coalescer, coalesce};
pub use runner::{LayerScanOutput, LayerScanRunner};
