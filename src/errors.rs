//! # Lix Errors
//!
//! Every fallible engine operation returns [`LixResult`]. Each variant maps to
//! a stable code string (`LIX_*`) that survives serialization across the sync
//! protocol, plus a category used to pick HTTP statuses and log severities.

use std::fmt;
use std::io;

use thiserror::Error;

use crate::observability::Severity;

/// Result type for engine operations
pub type LixResult<T> = Result<T, LixError>;

/// Error categories
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The persisted graph is inconsistent or an operation would make it so
    Structural,
    /// An operation needed a target that does not exist
    NotFound,
    /// Input was rejected before anything was written
    Validation,
    /// The request is well-formed but not something the engine does
    Unsupported,
    /// The underlying database or filesystem failed
    Storage,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Structural => "structural",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Validation => "validation",
            ErrorKind::Unsupported => "unsupported",
            ErrorKind::Storage => "storage",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Engine errors
#[derive(Debug, Error)]
pub enum LixError {
    // ==================
    // Structural
    // ==================
    /// Version inheritance loops back on itself
    #[error("inheritance cycle detected at version '{version_id}'")]
    InheritanceCycle { version_id: String },

    /// A commit names a parent that is not present
    #[error("commit '{commit_id}' references unknown parent commit '{parent_id}'")]
    UnknownParentCommit { commit_id: String, parent_id: String },

    /// Lowest common ancestor search reached a merge change
    #[error("change '{change_id}' has {parent_count} parents; ancestor search across merge changes is not supported")]
    MultiParentUnsupported {
        change_id: String,
        parent_count: usize,
    },

    /// Persisted rows contradict each other
    #[error("corrupt state: {0}")]
    CorruptState(String),

    /// The change log could not be read while rebuilding state
    #[error("change log is unreadable: {0}")]
    ChangeLogUnreadable(#[source] rusqlite::Error),

    // ==================
    // Not found
    // ==================
    /// Operation target is missing
    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    // ==================
    // Validation
    // ==================
    /// Entity content failed its schema
    #[error("schema validation failed for '{schema_key}': {message}")]
    SchemaValidation { schema_key: String, message: String },

    /// File paths are absolute, slash-separated
    #[error("invalid file path '{0}': paths must start with '/'")]
    InvalidFilePath(String),

    /// Malformed arguments
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Mutating SQL sent to a read-only surface
    #[error("mutating queries are not allowed here")]
    MutationNotAllowed,

    /// SQL text the parser rejected
    #[error("failed to parse SQL: {0}")]
    SqlParse(String),

    // ==================
    // Unsupported
    // ==================
    /// Writes to read-only views, unsupported statement shapes
    #[error("unsupported: {0}")]
    Unsupported(String),

    // ==================
    // Storage
    // ==================
    /// SQLite error, passed through unchanged
    #[error(transparent)]
    Storage(#[from] rusqlite::Error),

    /// Filesystem or archive error
    #[error("{message}: {source}")]
    Io {
        message: String,
        #[source]
        source: io::Error,
    },

    /// JSON encoding or decoding failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Opening a lix failed; wraps the underlying cause
    #[error("lix couldn't be opened: {source}")]
    OpenFailed {
        #[source]
        source: Box<LixError>,
    },
}

impl LixError {
    /// Wrap an io error with context
    pub fn io(message: impl Into<String>, source: io::Error) -> Self {
        LixError::Io {
            message: message.into(),
            source,
        }
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        LixError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn validation(schema_key: impl Into<String>, message: impl Into<String>) -> Self {
        LixError::SchemaValidation {
            schema_key: schema_key.into(),
            message: message.into(),
        }
    }

    /// Stable error code
    pub fn code(&self) -> &'static str {
        match self {
            LixError::InheritanceCycle { .. } => "LIX_INHERITANCE_CYCLE",
            LixError::UnknownParentCommit { .. } => "LIX_UNKNOWN_PARENT_COMMIT",
            LixError::MultiParentUnsupported { .. } => "LIX_MULTI_PARENT_UNSUPPORTED",
            LixError::CorruptState(_) => "LIX_CORRUPT_STATE",
            LixError::ChangeLogUnreadable(_) => "LIX_CORRUPT_STATE",
            LixError::NotFound { .. } => "LIX_NOT_FOUND",
            LixError::SchemaValidation { .. } => "LIX_SCHEMA_VALIDATION",
            LixError::InvalidFilePath(_) => "LIX_FILE_PATH_INVALID",
            LixError::InvalidInput(_) => "LIX_INVALID_INPUT",
            LixError::MutationNotAllowed => "MUTATION_QUERY_NOT_ALLOWED",
            LixError::SqlParse(_) => "LIX_INVALID_INPUT",
            LixError::Unsupported(_) => "LIX_UNSUPPORTED",
            LixError::Storage(_) => "LIX_STORAGE",
            LixError::Io { .. } => "LIX_IO",
            LixError::Serialization(_) => "LIX_INVALID_INPUT",
            LixError::OpenFailed { source } => source.code(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            LixError::InheritanceCycle { .. }
            | LixError::UnknownParentCommit { .. }
            | LixError::MultiParentUnsupported { .. }
            | LixError::CorruptState(_)
            | LixError::ChangeLogUnreadable(_) => ErrorKind::Structural,
            LixError::NotFound { .. } => ErrorKind::NotFound,
            LixError::SchemaValidation { .. }
            | LixError::InvalidFilePath(_)
            | LixError::InvalidInput(_)
            | LixError::MutationNotAllowed
            | LixError::SqlParse(_)
            | LixError::Serialization(_) => ErrorKind::Validation,
            LixError::Unsupported(_) => ErrorKind::Unsupported,
            LixError::Storage(_) | LixError::Io { .. } => ErrorKind::Storage,
            LixError::OpenFailed { source } => source.kind(),
        }
    }

    /// Log severity for this error
    pub fn severity(&self) -> Severity {
        if self.is_fatal() {
            return Severity::Fatal;
        }
        match self.kind() {
            ErrorKind::Validation | ErrorKind::NotFound | ErrorKind::Unsupported => Severity::Warn,
            _ => Severity::Error,
        }
    }

    /// Structural errors mean the instance must not keep serving
    /// results derived from the broken data.
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Structural
    }
}
