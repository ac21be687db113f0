//! CLI argument parsing using clap derive API
//!
//! This module defines the command-line interface structure using clap's derive macros.
//! It is purely declarative with no side effects or I/O.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Default configuration file, used only when present.
pub const DEFAULT_CONFIG_PATH: &str = "layerdex.toml";

/// layerdex -- container image layer indexer.
///
/// Use `layerdex <COMMAND> --help` for subcommand details.
#[derive(Parser, Debug)]
#[command(name = "layerdex", version, about, long_about = None)]
pub struct Cli {
    /// Path to the layerdex.toml configuration file.
    ///
    /// When omitted, `./layerdex.toml` is used if it exists, defaults otherwise.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Output format.
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Supported output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table / text output.
    Text,
    /// Machine-readable JSON.
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Index a manifest: fetch, scan, coalesce and persist.
    Index(IndexArgs),

    /// Show a stored index report.
    Report(ReportArgs),

    /// List registered scanners and ecosystems.
    Scanners(ScannersArgs),

    /// Manage configuration.
    Config(ConfigArgs),
}

// ---- index ----

/// Index a manifest described by a JSON file.
#[derive(Args, Debug)]
pub struct IndexArgs {
    /// Manifest JSON file (`{"hash": "...", "layers": [{"digest": "...", "uri": "..."}]}`).
    pub manifest: PathBuf,

    /// Directory that relative layer URIs resolve against (default: the manifest's directory).
    #[arg(long)]
    pub layers_dir: Option<PathBuf>,

    /// Override `[general].data_dir`.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Keep reports and findings in memory only.
    #[arg(long)]
    pub ephemeral: bool,

    /// Disable scanners that require network access.
    #[arg(long)]
    pub airgap: bool,

    /// Skip layer digest verification.
    #[arg(long)]
    pub no_verify: bool,

    /// Always re-index, even if a stored report exists.
    #[arg(long)]
    pub force: bool,
}

// ---- report ----

/// Show the stored report for a manifest digest.
#[derive(Args, Debug)]
pub struct ReportArgs {
    /// Manifest digest (`sha256:<hex>`).
    pub manifest: String,

    /// Override `[general].data_dir`.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
}

// ---- scanners ----

/// List built-in scanners.
#[derive(Args, Debug)]
pub struct ScannersArgs {
    /// Show only scanners that belong to this ecosystem.
    #[arg(long)]
    pub ecosystem: Option<String>,
}

// ---- config ----

/// Manage layerdex configuration.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Validate the configuration file and report errors.
    Validate,
    /// Show the effective configuration (file + env overrides + defaults).
    Show {
        /// Show only a specific section (general, indexer).
        #[arg(long)]
        section: Option<String>,
    },
}
