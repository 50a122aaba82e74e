//! Directory listing and name lookup.

use crate::archive::{ArchiveTree, InodeType};
use crate::error::{ArchiveError, NodeError, NodeResult};
use std::ffi::{OsStr, OsString};
use tracing::trace;

/// Entry type as reported in directory listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    File,
    Dir,
    Block,
    Link,
    Char,
    Fifo,
    Socket,
    Unknown,
}

impl From<InodeType> for EntryKind {
    fn from(kind: InodeType) -> Self {
        match kind {
            InodeType::File | InodeType::ExtFile => EntryKind::File,
            InodeType::Dir | InodeType::ExtDir => EntryKind::Dir,
            InodeType::BlockDevice | InodeType::ExtBlockDevice => EntryKind::Block,
            InodeType::Symlink | InodeType::ExtSymlink => EntryKind::Link,
            InodeType::CharDevice | InodeType::ExtCharDevice => EntryKind::Char,
            InodeType::Fifo | InodeType::ExtFifo => EntryKind::Fifo,
            InodeType::Socket | InodeType::ExtSocket => EntryKind::Socket,
            InodeType::Other(_) => EntryKind::Unknown,
        }
    }
}

/// One directory listing record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Inode number of the child, widened.
    pub ino: u64,
    pub kind: EntryKind,
    pub name: OsString,
}

/// Lists `dir` in the archive's stored order.
pub fn list<A: ArchiveTree + ?Sized>(archive: &A, dir: &A::Node) -> NodeResult<Vec<DirEntry>> {
    let inode = archive.inode(dir);
    if !inode.kind.is_dir() {
        return Err(NodeError::NotADirectory);
    }
    let entries = archive.read_dir(dir).map_err(|e| match e {
        ArchiveError::NotADirectory { .. } => NodeError::NotADirectory,
        other => NodeError::Archive(other),
    })?;
    trace!(inode = inode.number, count = entries.len(), "listed directory");
    Ok(entries
        .into_iter()
        .map(|entry| DirEntry {
            ino: u64::from(entry.number),
            kind: EntryKind::from(entry.kind),
            name: entry.name,
        })
        .collect())
}

/// Opens the child of `dir` named `name`.
pub fn lookup<A: ArchiveTree + ?Sized>(
    archive: &A,
    dir: &A::Node,
    name: &OsStr,
) -> NodeResult<A::Node> {
    if !archive.inode(dir).kind.is_dir() {
        return Err(NodeError::NotADirectory);
    }
    archive.open(dir, name).map_err(|e| match e {
        ArchiveError::NotFound { name } => NodeError::NotFound(name),
        ArchiveError::NotADirectory { .. } => NodeError::NotADirectory,
        other => NodeError::Archive(other),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_and_extended_tags_map_alike() {
        let pairs = [
            (InodeType::File, InodeType::ExtFile, EntryKind::File),
            (InodeType::Dir, InodeType::ExtDir, EntryKind::Dir),
            (InodeType::BlockDevice, InodeType::ExtBlockDevice, EntryKind::Block),
            (InodeType::Symlink, InodeType::ExtSymlink, EntryKind::Link),
            (InodeType::CharDevice, InodeType::ExtCharDevice, EntryKind::Char),
            (InodeType::Fifo, InodeType::ExtFifo, EntryKind::Fifo),
            (InodeType::Socket, InodeType::ExtSocket, EntryKind::Socket),
        ];
        for (basic, extended, expected) in pairs {
            assert_eq!(EntryKind::from(basic), expected, "{basic:?}");
            assert_eq!(EntryKind::from(extended), expected, "{extended:?}");
        }
    }

    #[test]
    fn unrecognized_tags_are_unknown() {
        assert_eq!(EntryKind::from(InodeType::from_raw(0)), EntryKind::Unknown);
        assert_eq!(EntryKind::from(InodeType::from_raw(15)), EntryKind::Unknown);
        assert_eq!(EntryKind::from(InodeType::from_raw(u16::MAX)), EntryKind::Unknown);
    }
}
