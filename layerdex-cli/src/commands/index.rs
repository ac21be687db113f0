//! `layerdex index` command handler

use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use layerdex_core::config::LayerdexConfig;
use layerdex_core::types::Manifest;
use layerdex_indexer::{
    DirStore, IndexerConfig, LayerIndexer, LocalFetcher, MemoryStore, ScannerRegistry, Store,
};

use crate::cli::IndexArgs;
use crate::commands::report::ReportView;
use crate::error::CliError;
use crate::output::OutputWriter;

/// Execute the `index` command.
pub async fn execute(
    args: IndexArgs,
    config: &LayerdexConfig,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let manifest = read_manifest(&args.manifest).await?;

    let layers_dir = args
        .layers_dir
        .clone()
        .unwrap_or_else(|| manifest_dir(&args.manifest));
    let fetcher = LocalFetcher::from_config(&config.indexer)
        .with_root(layers_dir)
        .verify_digests(!args.no_verify);

    let mut indexer_config = IndexerConfig::from_core(&config.indexer);
    indexer_config.airgap |= args.airgap;
    indexer_config.reuse_reports = !args.force;

    let payloads = config
        .indexer
        .scanner_payloads()
        .map_err(|e| CliError::Config(e.to_string()))?;
    let registry = ScannerRegistry::builtin(payloads)?;

    info!(
        manifest = %manifest.hash,
        layers = manifest.layers.len(),
        ephemeral = args.ephemeral,
        "indexing manifest"
    );

    if args.ephemeral {
        run(manifest, indexer_config, fetcher, MemoryStore::new(), registry, writer).await
    } else {
        let store = DirStore::new(super::data_dir(config, args.data_dir));
        run(manifest, indexer_config, fetcher, store, registry, writer).await
    }
}

async fn run<S: Store>(
    manifest: Manifest,
    config: IndexerConfig,
    fetcher: LocalFetcher,
    store: S,
    registry: ScannerRegistry,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let indexer = LayerIndexer::builder()
        .config(config)
        .fetcher(fetcher)
        .store(store)
        .registry(registry)
        .build()?;

    let cancel = CancellationToken::new();
    let interrupt = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling");
                cancel.cancel();
            }
        }
    });

    let result = indexer.index(&manifest, cancel).await;
    interrupt.abort();
    let report = result?;

    if report.partial_layers() > 0 {
        warn!(
            manifest = %report.manifest,
            partial = report.partial_layers(),
            "some scanners failed; report is incomplete"
        );
    }

    writer.render(&ReportView(report))
}

async fn read_manifest(path: &Path) -> Result<Manifest, CliError> {
    let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
        CliError::Command(format!("failed to read manifest {}: {e}", path.display()))
    })?;
    serde_json::from_str(&raw)
        .map_err(|e| CliError::Command(format!("invalid manifest {}: {e}", path.display())))
}

fn manifest_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
