//! `layerdex scanners` command handler

use std::io::Write;

use serde::Serialize;

use layerdex_core::config::LayerdexConfig;
use layerdex_indexer::ScannerRegistry;

use crate::cli::ScannersArgs;
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

/// Execute the `scanners` command.
pub async fn execute(
    args: ScannersArgs,
    config: &LayerdexConfig,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let payloads = config
        .indexer
        .scanner_payloads()
        .map_err(|e| CliError::Config(e.to_string()))?;
    let registry = ScannerRegistry::builtin(payloads)?;
    let list = build_scanner_list(&registry, config, args.ecosystem.as_deref())?;
    writer.render(&list)
}

fn build_scanner_list(
    registry: &ScannerRegistry,
    config: &LayerdexConfig,
    ecosystem: Option<&str>,
) -> Result<ScannerList, CliError> {
    if let Some(name) = ecosystem {
        if registry.ecosystem(name).is_none() {
            let known: Vec<&str> = registry.ecosystems().iter().map(|e| e.name.as_str()).collect();
            return Err(CliError::Command(format!(
                "unknown ecosystem: {name} (expected: {})",
                known.join(", ")
            )));
        }
    }

    let airgap = config.indexer.airgap;
    let scanners = registry
        .scanners()
        .iter()
        .filter_map(|scanner| {
            let identity = scanner.identity();
            let ecosystems: Vec<String> = registry
                .ecosystems()
                .iter()
                .filter(|e| e.scanners.iter().any(|s| *s == identity.name))
                .map(|e| e.name.clone())
                .collect();
            if let Some(name) = ecosystem {
                if !ecosystems.iter().any(|e| e == name) {
                    return None;
                }
            }

            let enabled_ecosystem = ecosystems
                .iter()
                .any(|e| config.indexer.ecosystems.contains(e));
            Some(ScannerInfo {
                active: enabled_ecosystem && !(airgap && scanner.requires_network()),
                name: identity.name,
                version: identity.version,
                kind: identity.kind.to_string(),
                requires_network: scanner.requires_network(),
                ecosystems,
            })
        })
        .collect();

    Ok(ScannerList { airgap, scanners })
}

/// Registered scanners.
#[derive(Serialize)]
pub struct ScannerList {
    pub airgap: bool,
    pub scanners: Vec<ScannerInfo>,
}

/// A registered scanner.
#[derive(Serialize)]
pub struct ScannerInfo {
    pub name: String,
    pub version: String,
    pub kind: String,
    pub requires_network: bool,
    pub ecosystems: Vec<String>,
    /// Whether the current configuration would run this scanner.
    pub active: bool,
}

impl Render for ScannerList {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        writeln!(w, "Scanners ({}):", self.scanners.len())?;
        if self.airgap {
            writeln!(w, "  {}", "airgap mode: network scanners disabled".yellow())?;
        }
        writeln!(w)?;
        writeln!(
            w,
            "{:<16} {:<10} {:<14} {:<8} {:<8} Ecosystems",
            "Name", "Version", "Kind", "Network", "Active"
        )?;
        writeln!(w, "{}", "-".repeat(72))?;
        for s in &self.scanners {
            let active = if s.active {
                "yes".green()
            } else {
                "no".dimmed()
            };
            writeln!(
                w,
                "{:<16} {:<10} {:<14} {:<8} {:<8} {}",
                s.name,
                s.version,
                s.kind,
                if s.requires_network { "yes" } else { "no" },
                active,
                s.ecosystems.join(", ")
            )?;
        }
        Ok(())
    }
}
