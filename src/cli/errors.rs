//! CLI-specific error types

use std::fmt;
use std::io;

use crate::errors::LixError;
use crate::sync::SyncError;

/// CLI error codes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliErrorCode {
    /// Configuration file error
    ConfigError,
    /// I/O error (files, stdout)
    IoError,
    /// Target lix file already exists
    AlreadyInitialized,
    /// Lix file doesn't exist
    NotInitialized,
    /// Server failed to start
    ServeFailed,
    /// Error reported by the engine, with its own code
    Engine(&'static str),
}

impl CliErrorCode {
    /// Get the error code string
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigError => "LIX_CLI_CONFIG_ERROR",
            Self::IoError => "LIX_CLI_IO_ERROR",
            Self::AlreadyInitialized => "LIX_CLI_ALREADY_INITIALIZED",
            Self::NotInitialized => "LIX_CLI_NOT_INITIALIZED",
            Self::ServeFailed => "LIX_CLI_SERVE_FAILED",
            Self::Engine(code) => code,
        }
    }
}

/// CLI error
#[derive(Debug)]
pub struct CliError {
    code: CliErrorCode,
    message: String,
}

impl CliError {
    pub fn new(code: CliErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::ConfigError, msg)
    }

    pub fn io_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::IoError, msg)
    }

    pub fn already_initialized(path: &std::path::Path) -> Self {
        Self::new(
            CliErrorCode::AlreadyInitialized,
            format!("{} already exists", path.display()),
        )
    }

    pub fn not_initialized(path: &std::path::Path) -> Self {
        Self::new(
            CliErrorCode::NotInitialized,
            format!("{} doesn't exist. Run 'lix init' first.", path.display()),
        )
    }

    pub fn serve_failed(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::ServeFailed, msg)
    }

    pub fn code(&self) -> &CliErrorCode {
        &self.code
    }

    pub fn code_str(&self) -> &'static str {
        self.code.code()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.code(), self.message)
    }
}

impl std::error::Error for CliError {}

impl From<io::Error> for CliError {
    fn from(e: io::Error) -> Self {
        Self::io_error(e.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        Self::io_error(format!("JSON error: {}", e))
    }
}

impl From<LixError> for CliError {
    fn from(e: LixError) -> Self {
        Self::new(CliErrorCode::Engine(e.code()), e.to_string())
    }
}

impl From<SyncError> for CliError {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::Engine(inner) => Self::from(inner),
            other => Self::serve_failed(other.to_string()),
        }
    }
}

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;
