//! Driver error types.

use thiserror::Error;

use crate::vfs::VfsError;

/// Errors surfaced to the protocol engine.
#[derive(Debug, Error)]
pub enum DriverError {
    /// Path does not exist in the backing filesystem.
    #[error("not found: {0}")]
    NotFound(String),

    /// A directory operation targeted a file.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// A file operation targeted a directory.
    #[error("not a file: {0}")]
    NotAFile(String),

    /// An upload targeted an existing directory.
    #[error("a directory has the same name: {0}")]
    DestinationIsDirectory(String),

    /// Append offset past the end of the existing file.
    #[error("offset {offset} is beyond file size {size}")]
    OffsetBeyondFileSize { offset: u64, size: u64 },

    /// Read offset past the end of the file.
    #[error("offset {offset} is out of range for file size {size}")]
    OffsetOutOfRange { offset: u64, size: u64 },

    /// Path would resolve outside the driver root.
    #[error("path escapes root: {0}")]
    PathEscapesRoot(String),

    /// Any other failure from the backing filesystem, passed through.
    #[error(transparent)]
    BackingStore(VfsError),
}

impl From<VfsError> for DriverError {
    fn from(err: VfsError) -> Self {
        match err {
            VfsError::NotFound(path) => Self::NotFound(path),
            VfsError::PathEscapesRoot(path) => Self::PathEscapesRoot(path),
            other => Self::BackingStore(other),
        }
    }
}

impl From<std::io::Error> for DriverError {
    fn from(err: std::io::Error) -> Self {
        VfsError::from(err).into()
    }
}

impl DriverError {
    /// Returns true for [`DriverError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Driver result type.
pub type DriverResult<T> = Result<T, DriverError>;
