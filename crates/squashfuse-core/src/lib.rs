//! Filesystem node adapters for squashfs archives.
//!
//! This crate turns the inode tree of a read-only squashfs archive into
//! filesystem nodes that a kernel protocol binding can serve. It does not
//! parse archives itself; any reader implementing [`ArchiveTree`] can be
//! plugged in.
//!
//! # Layers
//!
//! - [`archive`]: the reader boundary ([`ArchiveTree`], [`Inode`], [`InodeType`])
//! - [`attr`]: stored metadata to attribute records
//! - [`dir`]: listings and name lookup
//! - [`content`]: full and windowed content reads
//! - [`node`]: the [`NodeOps`] capability trait and its [`FsNode`] implementation
//! - [`memory`]: an in-memory archive for tests and embedding
//! - `image`: squashfs images read with `backhand` (feature `image`)
//!
//! # Usage
//!
//! ```
//! use squashfuse_core::{FsNode, MemoryArchive, NodeOps};
//! use std::ffi::OsStr;
//! use std::sync::Arc;
//!
//! let archive = MemoryArchive::builder()
//!     .file("hello.txt", 0o644, &b"Hello, World!\n"[..])
//!     .build()?;
//! let root = FsNode::root(Arc::new(archive));
//! let file = root.lookup_child(OsStr::new("hello.txt"))?;
//! assert_eq!(file.read_full()?, b"Hello, World!\n");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod archive;
pub mod attr;
pub mod content;
pub mod dir;
pub mod error;
#[cfg(feature = "image")]
pub mod image;
pub mod memory;
pub mod node;

pub use archive::{ArchiveTree, Inode, InodeType, RawEntry};
pub use attr::{Attr, STAT_BLOCK_SIZE, block_count};
pub use dir::{DirEntry, EntryKind};
pub use error::{ArchiveError, NodeError, NodeResult};
#[cfg(feature = "image")]
pub use image::{ImageArchive, ImageNode};
pub use memory::{MemoryArchive, MemoryArchiveBuilder, MemoryNode};
pub use node::{FsNode, NodeOps};
