use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Scan-level failures. Cancellation is a terminal state, not a fault, but it
/// travels through the same channel so callers get exactly one outcome.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("path not found: {0}")]
    NotFound(PathBuf),

    #[error("access denied: {0}")]
    AccessDenied(PathBuf),

    #[error("elevated permissions required for {0}")]
    PermissionRequired(PathBuf),

    #[error("scan timed out after {0:?}")]
    Timeout(Duration),

    #[error("scan cancelled")]
    Cancelled,
}

impl ScanError {
    /// Maps an I/O failure on `path` into the scan taxonomy. Permission
    /// failures are kept distinct so the caller can prompt for elevated
    /// access instead of treating them as hard errors.
    pub fn from_io(path: &Path, err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => ScanError::NotFound(path.to_path_buf()),
            io::ErrorKind::PermissionDenied => ScanError::PermissionRequired(path.to_path_buf()),
            _ => ScanError::AccessDenied(path.to_path_buf()),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ScanError::Cancelled)
    }
}

/// Why a cleanup candidate cannot be executed. Non-fatal: blocked candidates
/// stay visible in the cart but are filtered from execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum BlockedReason {
    #[error("path is protected")]
    Protected,
    #[error("path is excluded by policy")]
    Excluded,
    #[error("same filesystem identity already in cart")]
    DuplicateIdentity,
    #[error("nothing reclaimable")]
    NoReclaimableSize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_mapping_distinguishes_permission_from_missing() {
        let p = Path::new("/tmp/x");
        let denied = io::Error::new(io::ErrorKind::PermissionDenied, "eacces");
        assert!(matches!(
            ScanError::from_io(p, &denied),
            ScanError::PermissionRequired(_)
        ));

        let missing = io::Error::new(io::ErrorKind::NotFound, "enoent");
        assert!(matches!(
            ScanError::from_io(p, &missing),
            ScanError::NotFound(_)
        ));

        let other = io::Error::new(io::ErrorKind::InvalidData, "eio");
        assert!(matches!(
            ScanError::from_io(p, &other),
            ScanError::AccessDenied(_)
        ));
    }
}
