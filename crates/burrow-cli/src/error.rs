//! CLI error types.

use burrow_wireguard::WireGuardError;
use thiserror::Error;

/// CLI-specific errors.
#[derive(Debug, Error)]
pub enum CliError {
    /// A library operation failed.
    #[error(transparent)]
    WireGuard(#[from] WireGuardError),
    /// Invalid settings.
    #[error("configuration error: {0}")]
    Config(String),
    /// Invalid argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Output formatting error.
    #[error("format error: {0}")]
    Format(String),
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Remediation shown under the error message, if any.
    #[must_use]
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::WireGuard(e) => e.hint(),
            Self::Config(_) => Some("check BURROW_* environment variables and directory flags".to_string()),
            _ => None,
        }
    }
}
