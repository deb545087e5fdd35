//! Context error types

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContextError {
    /// Bad or missing required field at construction. Fatal, never retried.
    #[error("invalid configuration for `{field}`: {reason}")]
    Configuration { field: &'static str, reason: String },

    /// Manual profile override named a profile the table does not contain.
    #[error("no optimization profile named `{name}` (available: {})", available.join(", "))]
    ProfileNotFound { name: String, available: Vec<String> },

    /// Restore was pointed at a file that does not exist.
    #[error("checkpoint not found at {}", path.display())]
    CheckpointNotFound { path: PathBuf },

    /// Malformed operation record. Fatal to that single call only.
    #[error("invalid operation record: `{field}` {reason}")]
    InvalidOperation { field: &'static str, reason: String },

    /// Checkpoint/restore file failure. Surfaced as-is, never retried.
    #[error("io failure at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Serialization or parse failure for a file on disk.
    #[error("failed to parse {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },
}
