//! The archive-reader boundary.
//!
//! Parsing the squashfs superblock, metadata blocks and compressed data is the
//! job of an external reader. This module describes what the adapters need
//! from such a reader: a root node, stored inode metadata, directory entry
//! tables, child lookup, content readers and the uid/gid id table.

use crate::error::ArchiveError;
use std::ffi::{OsStr, OsString};
use std::io::Read;

/// Inode type tag as stored in the archive.
///
/// Squashfs stores every node kind in a basic and an extended encoding; the
/// numeric values match the on-disk tags. Tags outside the known range are
/// kept verbatim in [`InodeType::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InodeType {
    Dir,
    File,
    Symlink,
    BlockDevice,
    CharDevice,
    Fifo,
    Socket,
    ExtDir,
    ExtFile,
    ExtSymlink,
    ExtBlockDevice,
    ExtCharDevice,
    ExtFifo,
    ExtSocket,
    Other(u16),
}

impl InodeType {
    /// Decodes an on-disk inode type tag.
    pub fn from_raw(tag: u16) -> Self {
        match tag {
            1 => Self::Dir,
            2 => Self::File,
            3 => Self::Symlink,
            4 => Self::BlockDevice,
            5 => Self::CharDevice,
            6 => Self::Fifo,
            7 => Self::Socket,
            8 => Self::ExtDir,
            9 => Self::ExtFile,
            10 => Self::ExtSymlink,
            11 => Self::ExtBlockDevice,
            12 => Self::ExtCharDevice,
            13 => Self::ExtFifo,
            14 => Self::ExtSocket,
            other => Self::Other(other),
        }
    }

    /// Returns the on-disk tag for this type.
    pub fn raw(self) -> u16 {
        match self {
            Self::Dir => 1,
            Self::File => 2,
            Self::Symlink => 3,
            Self::BlockDevice => 4,
            Self::CharDevice => 5,
            Self::Fifo => 6,
            Self::Socket => 7,
            Self::ExtDir => 8,
            Self::ExtFile => 9,
            Self::ExtSymlink => 10,
            Self::ExtBlockDevice => 11,
            Self::ExtCharDevice => 12,
            Self::ExtFifo => 13,
            Self::ExtSocket => 14,
            Self::Other(tag) => tag,
        }
    }

    pub fn is_dir(self) -> bool {
        matches!(self, Self::Dir | Self::ExtDir)
    }

    pub fn is_regular(self) -> bool {
        matches!(self, Self::File | Self::ExtFile)
    }

    pub fn is_symlink(self) -> bool {
        matches!(self, Self::Symlink | Self::ExtSymlink)
    }
}

/// Stored metadata of one archive inode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inode {
    /// Inode number, unique within the archive.
    pub number: u32,
    pub kind: InodeType,
    /// Uncompressed size in bytes (target length for symlinks).
    pub size: u64,
    /// Mode bits including the file type bits.
    pub mode: u32,
    /// Index into the archive's id table.
    pub uid_index: u16,
    /// Index into the archive's id table.
    pub gid_index: u16,
    pub link_count: u32,
    /// Modification time in seconds since the epoch.
    pub mtime: u32,
    /// Device number for block and character devices, zero otherwise.
    pub rdev: u32,
    /// Stored target for symlink inodes.
    pub symlink_target: Option<Vec<u8>>,
}

/// One record of a directory's entry table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    pub name: OsString,
    /// Inode number of the child.
    pub number: u32,
    /// Type tag stored in the directory table (always a basic encoding on disk).
    pub kind: InodeType,
}

/// Read access to a squashfs-like inode tree.
///
/// Implementations must allow independent readers to be created and used from
/// several threads at once; the filesystem layer does not serialize requests.
pub trait ArchiveTree: Send + Sync + 'static {
    /// Handle to one node of the tree. Cloning must be cheap.
    type Node: Clone + Send + Sync + 'static;

    /// Returns the root directory.
    fn root(&self) -> Self::Node;

    /// Returns the stored metadata of `node`.
    fn inode<'n>(&self, node: &'n Self::Node) -> &'n Inode;

    /// Interprets `dir` as a directory and returns its entry table in stored order.
    fn read_dir(&self, dir: &Self::Node) -> Result<Vec<RawEntry>, ArchiveError>;

    /// Opens the child of `dir` called `name`.
    fn open(&self, dir: &Self::Node, name: &OsStr) -> Result<Self::Node, ArchiveError>;

    /// Returns a sequential reader over a regular file, positioned at byte 0.
    fn reader(&self, file: &Self::Node) -> Result<Box<dyn Read + Send + '_>, ArchiveError>;

    /// Returns a reader meant to be drained in one go.
    ///
    /// Readers that can decompress blocks ahead of the consumer should do so
    /// here. The default is the plain sequential reader.
    fn full_reader(&self, file: &Self::Node) -> Result<Box<dyn Read + Send + '_>, ArchiveError> {
        self.reader(file)
    }

    /// Resolves an id-table index to a numeric uid/gid.
    fn id(&self, index: u16) -> Result<u32, ArchiveError>;
}
