//! Error types for the backup engine.
//!
//! The primary error type is `EngineError`, which represents job-level errors
//! that prevent a run from starting. Per-file failures during copying are
//! recorded in the manifest as `error` entries, not returned as `EngineError`.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur at the job level, or inside a single copy task.
///
/// Inside the copy engine these are converted into manifest messages and
/// never abort the run. Only `create_job`/`plan_job`/`run_job` return them
/// to the caller.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Source file or directory does not exist
    #[error("Source not found: {}", path.display())]
    SourceNotFound { path: PathBuf },

    /// Destination root cannot be created or written
    #[error("Destination unusable: {}: {source}", path.display())]
    DestinationUnusable { path: PathBuf, source: io::Error },

    /// Failed to read from source file
    #[error("Failed to read {}: {source}", path.display())]
    ReadError { path: PathBuf, source: io::Error },

    /// Failed to write to destination file
    #[error("Failed to write {}: {source}", path.display())]
    WriteError { path: PathBuf, source: io::Error },

    /// Failed to move the temporary file into place
    #[error("Failed to rename {} -> {}: {source}", from.display(), to.display())]
    RenameFailed {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },

    /// Failed to create a directory
    #[error("Failed to create directory {}: {source}", path.display())]
    DirectoryCreationFailed { path: PathBuf, source: io::Error },

    /// Path is rejected (traversal, empty, outside the device root)
    #[error("Invalid path: {} ({reason})", path.display())]
    InvalidPath { path: PathBuf, reason: String },

    /// Importance profile could not be opened
    #[error("Failed to open profile {}: {source}", path.display())]
    ProfileUnreadable { path: PathBuf, source: io::Error },

    /// Importance profile is not valid JSON of the expected shape
    #[error("Failed to parse profile {}: {source}", path.display())]
    ProfileInvalid {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// A glob pattern failed to compile
    #[error("Invalid glob pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        source: globset::Error,
    },

    /// Job operations called out of order
    #[error("Job is {actual}, expected {expected}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    /// Work stopped because the cancellation token was set
    #[error("cancelled")]
    Cancelled,
}

impl EngineError {
    /// Extract the OS error code from this error, if available.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::DestinationUnusable { source, .. }
            | Self::ReadError { source, .. }
            | Self::WriteError { source, .. }
            | Self::RenameFailed { source, .. }
            | Self::DirectoryCreationFailed { source, .. }
            | Self::ProfileUnreadable { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }

    /// True when this error represents cooperative cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
