//! Error types for the recorder repair library.

use std::path::PathBuf;

/// Top-level error enum for the recorder repair library.
///
/// An unknown entity is not represented here: reads return empty results and
/// deletion reports [`crate::models::DeleteOutcome::EntityNotFound`].
#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error("Database file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl RecorderError {
    /// True when the backing store reported the failure (as opposed to a bad
    /// argument or a missing file).
    pub fn is_storage_failure(&self) -> bool {
        matches!(self, RecorderError::Sqlite(_) | RecorderError::Io(_))
    }
}

pub type RecorderResult<T> = Result<T, RecorderError>;
