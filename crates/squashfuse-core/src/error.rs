//! Error types for archive access and node requests.

use std::io;
use thiserror::Error;

/// Errors reported by an [`ArchiveTree`](crate::ArchiveTree) implementation.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The node cannot be read as a directory.
    #[error("inode {number} is not a directory")]
    NotADirectory { number: u32 },

    /// No entry with the requested name.
    #[error("no entry named {name:?}")]
    NotFound { name: String },

    /// The node has no file content.
    #[error("inode {number} is not a regular file")]
    NotARegularFile { number: u32 },

    /// An inode references an id-table slot the archive does not have.
    #[error("id index {index} out of range (id table holds {count} entries)")]
    IdOutOfRange { index: u16, count: usize },

    /// Structural damage detected while decoding archive metadata.
    #[error("corrupt archive: {0}")]
    Corrupt(String),

    /// I/O error from the underlying byte source.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Errors returned by node operations.
///
/// The first three variants are request-shape errors with a fixed protocol
/// error code. Everything the archive reports is carried verbatim in
/// [`NodeError::Archive`].
#[derive(Debug, Error)]
pub enum NodeError {
    /// Directory operation on a node that is not a directory.
    #[error("not a directory")]
    NotADirectory,

    /// Lookup miss.
    #[error("no such entry: {0}")]
    NotFound(String),

    /// Content read on a node that is not a regular file.
    #[error("no data: not a regular file")]
    NoData,

    /// Failure inside the archive reader.
    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),
}

impl From<io::Error> for NodeError {
    fn from(e: io::Error) -> Self {
        NodeError::Archive(ArchiveError::Io(e))
    }
}

/// Result type for node operations.
pub type NodeResult<T> = Result<T, NodeError>;
