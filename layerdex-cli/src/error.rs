//! CLI-specific error types and exit code mapping

use layerdex_core::error::LayerdexError;
use layerdex_indexer::IndexerError;

/// CLI-specific error type.
///
/// Each variant carries enough context for a user-friendly message.
/// The `exit_code()` method maps errors to standard Unix exit codes.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Configuration loading or validation failure.
    #[error("configuration error: {0}")]
    Config(String),

    /// A subcommand-specific operation failed.
    #[error("{0}")]
    Command(String),

    /// Indexing failed (fetch, store, every layer failed).
    #[error("index error: {0}")]
    Index(String),

    /// Indexing was interrupted.
    #[error("indexing cancelled")]
    Cancelled,

    /// JSON serialisation failed during output rendering.
    #[error("json output error: {0}")]
    JsonSerialize(#[from] serde_json::Error),

    /// IO error (file read, stdout write, etc.).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Wrapped domain error from layerdex-core.
    #[error("{0}")]
    Core(#[from] LayerdexError),
}

impl CliError {
    /// Map the error to a process exit code.
    ///
    /// | Code | Meaning                              |
    /// |------|--------------------------------------|
    /// | 0    | Success                              |
    /// | 1    | General / command error              |
    /// | 2    | Configuration error                  |
    /// | 3    | Indexing failed                      |
    /// | 10   | IO error                             |
    /// | 130  | Interrupted                          |
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Core(LayerdexError::Config(_)) => 2,
            Self::Index(_) | Self::Core(LayerdexError::Index(_) | LayerdexError::Store(_)) => 3,
            Self::Io(_) => 10,
            Self::Cancelled => 130,
            Self::JsonSerialize(_) | Self::Command(_) | Self::Core(_) => 1,
        }
    }
}

impl From<IndexerError> for CliError {
    fn from(e: IndexerError) -> Self {
        match e {
            IndexerError::Cancelled { .. } => Self::Cancelled,
            IndexerError::Config { .. } | IndexerError::Registry(_) => Self::Config(e.to_string()),
            other => Self::Index(other.to_string()),
        }
    }
}
