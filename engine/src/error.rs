//! Error types for the backup engine.
//!
//! `EngineError` represents failures that stop a job (or a whole batch setup)
//! from making progress. Per-file failures are not raised as `EngineError`
//! during a run: they are recorded as a failed transfer in the log and as an
//! `Error` event in the job's progress state, and the walk moves on.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur at the job or engine level.
///
/// `io::Error` is not serializable, so these never end up in the persisted
/// progress state as-is; the engine stores their `Display` rendering instead.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No job with this name in the registry
    #[error("Backup job not found: {name}")]
    JobNotFound { name: String },

    /// Source directory does not exist
    #[error("Source directory not found: {}", path.display())]
    SourceNotFound { path: PathBuf },

    /// Source directory is not accessible (permissions)
    #[error("Source directory access denied: {}", path.display())]
    SourceAccessDenied { path: PathBuf, source: io::Error },

    /// Failed to read from source file
    #[error("Failed to read file: {}", path.display())]
    ReadError { path: PathBuf, source: io::Error },

    /// Failed to write to destination file
    #[error("Failed to write file: {}", path.display())]
    WriteError { path: PathBuf, source: io::Error },

    /// Failed to enumerate a directory
    #[error("Failed to enumerate directory: {}", path.display())]
    EnumerationFailed { path: PathBuf, source: io::Error },

    /// Failed to create a directory
    #[error("Failed to create directory: {}", path.display())]
    DirectoryCreationFailed { path: PathBuf, source: io::Error },

    /// Rejected configuration value
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// A persisted store (state file, transfer log, job file) could not be
    /// encoded or decoded
    #[error("Failed to (de)serialize {}: {message}", path.display())]
    Serialization { path: PathBuf, message: String },
}

impl EngineError {
    /// Extract the OS error code from this error, if available.
    pub fn raw_os_error(&self) -> Option<u32> {
        match self {
            Self::SourceAccessDenied { source, .. }
            | Self::ReadError { source, .. }
            | Self::WriteError { source, .. }
            | Self::EnumerationFailed { source, .. }
            | Self::DirectoryCreationFailed { source, .. } => {
                source.raw_os_error().map(|e| e as u32)
            }
            _ => None,
        }
    }

    pub(crate) fn serialization(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        Self::Serialization {
            path: path.into(),
            message: err.to_string(),
        }
    }
}
