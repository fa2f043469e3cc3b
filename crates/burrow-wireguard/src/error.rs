//! Error types for WireGuard identity, configuration and connection operations.
//!
//! Errors fall into two groups. Pre-flight errors (platform, tooling,
//! privilege and argument problems) are detected before anything is written
//! and carry a remediation hint. Everything else is an operational failure
//! of a step that was already under way.
//!
//! Recoverable conditions such as an undetected egress interface or an
//! interface that is already up are not errors; they are reported through
//! `tracing` warnings and outcome enums.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for WireGuard operations.
pub type Result<T> = std::result::Result<T, WireGuardError>;

/// Errors that can occur during WireGuard operations.
#[derive(Debug, Error)]
pub enum WireGuardError {
    /// The host operating system family cannot be classified.
    #[error("unsupported platform: {os}")]
    UnsupportedPlatform {
        /// The operating system name as reported by the toolchain.
        os: String,
    },

    /// A required external program is not installed or not in PATH.
    #[error("required tool not found: {tool}")]
    MissingTool {
        /// Program name.
        tool: String,
        /// Installation hint for the current platform.
        hint: String,
    },

    /// The command needs elevated privileges.
    #[error("insufficient privilege: '{command}' must be run as root")]
    InsufficientPrivilege {
        /// The command that was refused.
        command: String,
    },

    /// An endpoint string is not parseable as `host:port`.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Caller-supplied arguments are malformed.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// The key generation capability is unavailable or failed.
    #[error("key generation failed: {0}")]
    KeyGenerationFailed(String),

    /// Invalid key format.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Invalid base64 encoding.
    #[error("invalid base64 encoding: {0}")]
    InvalidBase64(String),

    /// Invalid key length.
    #[error("invalid key length: expected 32, got {0}")]
    InvalidKeyLength(usize),

    /// Invalid CIDR notation.
    #[error("invalid CIDR: {0}")]
    InvalidCidr(String),

    /// A configuration document that must exist is missing.
    #[error("configuration not found: {}", path.display())]
    ConfigNotFound {
        /// Expected document location.
        path: PathBuf,
    },

    /// A configuration document could not be parsed.
    #[error("parse error at line {line}: {message}")]
    ParseError {
        /// One-based line number (0 when not tied to a line).
        line: usize,
        /// Description of the problem.
        message: String,
    },

    /// An external command exited unsuccessfully.
    #[error("command '{command}' exited with code {exit_code}: {stderr}")]
    CommandFailed {
        /// The command line that was executed.
        command: String,
        /// Exit code, or -1 if terminated by a signal.
        exit_code: i32,
        /// Standard error output.
        stderr: String,
    },

    /// A command was refused before execution because an argument failed validation.
    #[error("command rejected: {0}")]
    CommandRejected(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl WireGuardError {
    /// Creates a `MissingTool` error with an install hint.
    #[must_use]
    pub fn missing_tool(tool: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::MissingTool {
            tool: tool.into(),
            hint: hint.into(),
        }
    }

    /// Creates an `InsufficientPrivilege` error for the named command.
    #[must_use]
    pub fn insufficient_privilege(command: impl Into<String>) -> Self {
        Self::InsufficientPrivilege {
            command: command.into(),
        }
    }

    /// Creates a `CommandFailed` error.
    #[must_use]
    pub fn command_failed(command: impl Into<String>, exit_code: i32, stderr: impl Into<String>) -> Self {
        Self::CommandFailed {
            command: command.into(),
            exit_code,
            stderr: stderr.into(),
        }
    }

    /// Returns true for pre-flight errors, detected before any state is written.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedPlatform { .. }
                | Self::MissingTool { .. }
                | Self::InsufficientPrivilege { .. }
                | Self::InvalidEndpoint(_)
                | Self::InvalidArguments(_)
        )
    }

    /// Returns a remediation hint for the operator, if one applies.
    #[must_use]
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::MissingTool { hint, .. } => Some(hint.clone()),
            Self::InsufficientPrivilege { command } => Some(format!("re-run with: sudo burrow {command}")),
            Self::UnsupportedPlatform { .. } => {
                Some("burrow supports Linux and BSD-family systems (including macOS)".to_string())
            }
            Self::InvalidEndpoint(_) => Some("endpoints are written as host:port, e.g. 198.51.100.4:51820".to_string()),
            Self::ConfigNotFound { .. } => Some("run 'burrow server-setup' or 'burrow client-setup' first".to_string()),
            Self::KeyGenerationFailed(_) => Some("install wireguard-tools or set BURROW_KEY_ENGINE=native".to_string()),
            Self::CommandFailed { command, stderr, .. } if stderr.contains("Operation not permitted") => {
                Some(format!("'{command}' needs root; re-run with sudo"))
            }
            _ => None,
        }
    }
}

impl From<base64::DecodeError> for WireGuardError {
    fn from(err: base64::DecodeError) -> Self {
        Self::InvalidBase64(err.to_string())
    }
}
