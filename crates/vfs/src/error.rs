//! Error types for the vfs crate.

use std::io;
use std::path::PathBuf;

use dav_server::fs::FsError;
use thiserror::Error;

/// Filesystem error type covering the rejections the scoped filesystem
/// decides on its own, plus passthrough of real filesystem failures.
#[derive(Debug, Error)]
pub enum VfsError {
    /// The path contains a NUL byte, a foreign separator, or is not UTF-8.
    #[error("path rejected: {0:?}")]
    PathRejected(String),

    /// Attempt to remove, rename, or overwrite the virtual root.
    #[error("invalid operation on virtual root: {0}")]
    RootProtected(PathBuf),

    /// Failed to open the audit log.
    #[error("audit log unavailable: {path}: {source}")]
    AuditLog {
        /// The configured audit log path.
        path: PathBuf,
        /// The underlying open failure.
        #[source]
        source: io::Error,
    },

    /// Error reported by the real filesystem.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Result type alias for vfs operations.
pub type Result<T> = std::result::Result<T, VfsError>;

impl From<VfsError> for FsError {
    fn from(err: VfsError) -> Self {
        match err {
            VfsError::PathRejected(_) => FsError::NotFound,
            VfsError::RootProtected(_) => FsError::Forbidden,
            VfsError::AuditLog { .. } => FsError::GeneralFailure,
            VfsError::Io(e) => match e.kind() {
                io::ErrorKind::NotFound => FsError::NotFound,
                io::ErrorKind::PermissionDenied => FsError::Forbidden,
                io::ErrorKind::AlreadyExists => FsError::Exists,
                _ => FsError::GeneralFailure,
            },
        }
    }
}

impl From<VfsError> for io::Error {
    fn from(err: VfsError) -> Self {
        match err {
            VfsError::PathRejected(_) => io::Error::new(io::ErrorKind::NotFound, err.to_string()),
            VfsError::RootProtected(_) => {
                io::Error::new(io::ErrorKind::InvalidInput, err.to_string())
            }
            VfsError::AuditLog { source, .. } => source,
            VfsError::Io(e) => e,
        }
    }
}
