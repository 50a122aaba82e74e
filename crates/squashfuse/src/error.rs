//! Error handling and errno mapping for the FUSE filesystem.
//!
//! Request errors from the node layer are turned into POSIX error codes
//! here. Mount lifecycle errors are reported to the caller of
//! [`MountManager`](crate::MountManager) and never reach the kernel.

use squashfuse_core::{ArchiveError, NodeError};
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors from the mount lifecycle.
#[derive(Debug, Error)]
pub enum MountError {
    /// `attach` called while a mount is active.
    #[error("squashfs archive already mounted at {}", .0.display())]
    AlreadyMounted(PathBuf),

    /// `detach` called without an active mount.
    #[error("squashfs archive is not mounted")]
    NotMounted,

    /// The kernel refused the mount or the unmount.
    #[error("FUSE mount failed: {0}")]
    Mount(#[from] io::Error),

    /// The kernel did not complete the handshake in time.
    #[error("FUSE mount not ready after {0:?}")]
    NotReady(Duration),

    /// The serve loop ended before the handshake completed.
    #[error("FUSE session exited before the mount became ready")]
    ServeExited,
}

/// Result type for mount lifecycle operations.
pub type MountResult<T> = Result<T, MountError>;

/// Converts an I/O error to a POSIX errno value.
///
/// Passes the raw OS error through, otherwise returns `EIO`.
#[inline]
pub fn io_error_to_errno(e: &io::Error) -> i32 {
    e.raw_os_error().unwrap_or(libc::EIO)
}

/// Extension trait to convert errors to errno.
pub trait ToErrno {
    /// Converts this error to a libc error code.
    fn to_errno(&self) -> i32;
}

impl ToErrno for NodeError {
    fn to_errno(&self) -> i32 {
        match self {
            NodeError::NotADirectory => libc::ENOTDIR,
            NodeError::NotFound(_) => libc::ENOENT,
            NodeError::NoData => libc::ENODATA,
            NodeError::Archive(e) => e.to_errno(),
        }
    }
}

impl ToErrno for ArchiveError {
    fn to_errno(&self) -> i32 {
        match self {
            ArchiveError::Io(e) => io_error_to_errno(e),
            _ => libc::EIO,
        }
    }
}

impl ToErrno for io::Error {
    fn to_errno(&self) -> i32 {
        io_error_to_errno(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_error_mapping() {
        assert_eq!(NodeError::NotADirectory.to_errno(), libc::ENOTDIR);
        assert_eq!(NodeError::NotFound("x".to_string()).to_errno(), libc::ENOENT);
        assert_eq!(NodeError::NoData.to_errno(), libc::ENODATA);
    }

    #[test]
    fn test_archive_errors_surface_as_eio() {
        let cases = [
            ArchiveError::IdOutOfRange { index: 3, count: 1 },
            ArchiveError::Corrupt("bad metadata block".to_string()),
            ArchiveError::NotARegularFile { number: 4 },
            ArchiveError::NotADirectory { number: 4 },
        ];
        for e in cases {
            assert_eq!(NodeError::Archive(e).to_errno(), libc::EIO);
        }
    }

    #[test]
    fn test_wrapped_os_error_passes_through() {
        let e = NodeError::from(io::Error::from_raw_os_error(libc::EACCES));
        assert_eq!(e.to_errno(), libc::EACCES);
    }

    #[test]
    fn test_io_error_mapping_without_os_error() {
        let e = io::Error::other("custom error");
        assert_eq!(io_error_to_errno(&e), libc::EIO);
        assert_eq!(e.to_errno(), libc::EIO);
    }

    #[test]
    fn test_mount_error_display() {
        let e = MountError::AlreadyMounted(PathBuf::from("/mnt/image"));
        assert!(e.to_string().contains("/mnt/image"));
        assert!(e.to_string().contains("already mounted"));

        assert_eq!(MountError::NotMounted.to_string(), "squashfs archive is not mounted");

        let e = MountError::NotReady(Duration::from_secs(3));
        assert!(e.to_string().contains("3s"));
    }

    #[test]
    fn test_from_io_error() {
        let e: MountError = io::Error::from_raw_os_error(libc::EPERM).into();
        assert!(matches!(e, MountError::Mount(_)));
    }
}
