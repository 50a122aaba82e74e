//! FUSE filesystem for read-only squashfs archives.
//!
//! This crate mounts a node tree from [`squashfuse_core`] through the
//! kernel's FUSE interface.
//!
//! # Features
//!
//! - Read-only mount with lookup, getattr, readlink, read and readdir
//! - Kernel inode numbers with lookup counting and eviction on forget
//! - Blocking `attach` that returns once the kernel handshake completes
//! - `wait` for the serve loop to finish and `detach` to unmount
//!
//! # Usage
//!
//! ```ignore
//! use squashfuse::{MountConfig, MountManager};
//! use std::sync::Arc;
//!
//! let manager = MountManager::for_archive(Arc::new(archive), MountConfig::default());
//! manager.attach(mountpoint)?;
//! // ... serve until someone calls detach()
//! manager.wait();
//! ```

pub mod config;
pub mod error;
pub mod filesystem;
pub mod inode;
pub mod mount;
pub mod signal;

pub use config::MountConfig;
pub use error::{MountError, MountResult, ToErrno, io_error_to_errno};
pub use filesystem::{ReaddirEntry, SquashFs, file_type};
pub use inode::{InodeEntry, InodeTable, ROOT_INODE};
pub use mount::MountManager;
pub use signal::Signal;
