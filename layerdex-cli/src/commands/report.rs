//! `layerdex report` command handler

use std::io::Write;

use serde::Serialize;
use tracing::info;

use layerdex_core::config::LayerdexConfig;
use layerdex_core::report::{IndexReport, IndexState, LayerOutcome};
use layerdex_core::types::Digest;
use layerdex_indexer::{DirStore, Store};

use crate::cli::ReportArgs;
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

/// Execute the `report` command.
pub async fn execute(
    args: ReportArgs,
    config: &LayerdexConfig,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let manifest: Digest = args
        .manifest
        .parse()
        .map_err(|e| CliError::Command(format!("invalid manifest digest: {e}")))?;
    let data_dir = super::data_dir(config, args.data_dir);
    info!(manifest = %manifest, data_dir = %data_dir.display(), "loading stored report");

    let store = DirStore::new(data_dir);
    let report = store
        .get_report(&manifest)
        .await
        .map_err(|e| CliError::Index(e.to_string()))?
        .ok_or_else(|| CliError::Command(format!("no report stored for {manifest}")))?;

    writer.render(&ReportView(report))
}

/// Index report as rendered by `index` and `report`.
///
/// JSON output is the report itself.
#[derive(Serialize)]
#[serde(transparent)]
pub struct ReportView(pub IndexReport);

impl Render for ReportView {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        let report = &self.0;
        writeln!(w, "Manifest: {}", report.manifest.to_string().bold())?;

        let state = report.state.to_string();
        let state = match report.state {
            IndexState::Done if report.partial_layers() == 0 => state.green().bold(),
            IndexState::Done => state.yellow().bold(),
            IndexState::Failed => state.red().bold(),
            _ => state.normal(),
        };
        writeln!(w, "State: {state}")?;
        if let Some(error) = &report.error {
            writeln!(w, "Error: {}", error.red())?;
        }
        writeln!(
            w,
            "Layers: {} ({} partial)   Scanners: {}",
            report.layers.len(),
            report.partial_layers(),
            report.scanners.len()
        )?;

        match report.distributions.first() {
            Some(dist) => writeln!(w, "Distribution: {dist}")?,
            None => writeln!(w, "Distribution: {}", "unknown".dimmed())?,
        }
        writeln!(w)?;

        writeln!(w, "Packages ({}):", report.packages.len())?;
        if !report.packages.is_empty() {
            writeln!(
                w,
                "{:<32} {:<28} {:<8} {:<24} Introduced",
                "Name", "Version", "Arch", "Source"
            )?;
            writeln!(w, "{}", "-".repeat(108))?;
            for pkg in &report.packages {
                let source = pkg
                    .source
                    .as_deref()
                    .map(|s| format!("{} {}", s.name, s.version))
                    .unwrap_or_default();
                let introduced = report
                    .environments
                    .get(&pkg.key())
                    .map(|env| env.introduced_in.short().to_owned())
                    .unwrap_or_default();
                writeln!(
                    w,
                    "{:<32} {:<28} {:<8} {:<24} {}",
                    pkg.name, pkg.version, pkg.arch, source, introduced
                )?;
            }
        }

        if !report.repositories.is_empty() {
            writeln!(w)?;
            writeln!(w, "Repositories ({}):", report.repositories.len())?;
            for repo in &report.repositories {
                writeln!(w, "  {:<32} {}", repo.name, repo.uri)?;
            }
        }

        if report.partial_layers() > 0 {
            writeln!(w)?;
            writeln!(w, "Layer failures:")?;
            for layer in report.layers.iter().filter(|l| l.outcome != LayerOutcome::Ok) {
                writeln!(
                    w,
                    "  #{} {} {}",
                    layer.ordinal,
                    layer.layer.short(),
                    layer.outcome.to_string().yellow()
                )?;
                for failure in &layer.failures {
                    writeln!(
                        w,
                        "    {} [{}]: {}",
                        failure.scanner, failure.kind, failure.reason
                    )?;
                }
            }
        }

        Ok(())
    }
}
