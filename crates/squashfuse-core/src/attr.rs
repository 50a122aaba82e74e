//! Attribute translation.
//!
//! Turns stored inode metadata into the attribute record reported to the
//! kernel. Everything is copied verbatim except the block count, which is
//! derived, and the owner ids, which go through the archive's id table.

use crate::archive::{ArchiveTree, Inode};
use crate::dir::EntryKind;
use crate::error::ArchiveError;
use tracing::trace;

/// Unit of the `blocks` field, fixed by stat(2) regardless of the archive's
/// compression block size.
pub const STAT_BLOCK_SIZE: u64 = 512;

/// Attribute record for one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attr {
    /// Archive inode number, widened.
    pub ino: u64,
    pub size: u64,
    /// Number of 512-byte blocks.
    pub blocks: u64,
    /// Type and permission bits.
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    /// Seconds since the epoch.
    pub mtime: u32,
    pub rdev: u32,
    pub kind: EntryKind,
}

impl Attr {
    /// Permission bits without the file type.
    #[allow(clippy::cast_possible_truncation)]
    pub fn perm(&self) -> u16 {
        (self.mode & 0o7777) as u16
    }
}

/// Returns `ceil(size / 512)`.
pub fn block_count(size: u64) -> u64 {
    let blocks = size / STAT_BLOCK_SIZE;
    if size % STAT_BLOCK_SIZE > 0 {
        blocks + 1
    } else {
        blocks
    }
}

/// Builds the attribute record for `inode`.
///
/// A failed id-table lookup aborts the whole translation.
pub fn translate<A: ArchiveTree + ?Sized>(archive: &A, inode: &Inode) -> Result<Attr, ArchiveError> {
    let gid = archive.id(inode.gid_index)?;
    let uid = archive.id(inode.uid_index)?;
    trace!(inode = inode.number, uid, gid, size = inode.size, "translated attributes");
    Ok(Attr {
        ino: u64::from(inode.number),
        size: inode.size,
        blocks: block_count(inode.size),
        mode: inode.mode,
        nlink: inode.link_count,
        uid,
        gid,
        mtime: inode.mtime,
        rdev: inode.rdev,
        kind: EntryKind::from(inode.kind),
    })
}
