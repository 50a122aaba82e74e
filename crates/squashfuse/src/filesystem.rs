//! FUSE filesystem over squashfs nodes.
//!
//! [`SquashFs`] implements the fuser `Filesystem` trait on top of any
//! [`NodeOps`] implementation. It only translates: inode numbers to nodes,
//! node errors to errno values, and node attributes to `FileAttr`.
//!
//! # Operations
//!
//! | Operation | Notes |
//! |-----------|-------|
//! | init/destroy | `init` fires the ready signal |
//! | lookup | Increments nlookup, records the parent |
//! | forget/batch_forget | Decrements nlookup, evicts at 0, never the root |
//! | getattr | |
//! | readlink | Empty target for non-symlinks |
//! | open | Write access fails with EROFS |
//! | read | Full read when the request covers the file, windowed otherwise |
//! | opendir | ENOTDIR on non-directories |
//! | readdir | `.` and `..` first, index-based offsets |
//!
//! Everything that would modify the filesystem falls through to the fuser
//! defaults, and the mount is read-only anyway.

use crate::config::MountConfig;
use crate::error::ToErrno;
use crate::inode::{InodeTable, ROOT_INODE};
use crate::signal::Signal;
use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, ReplyAttr, ReplyData, ReplyDirectory,
    ReplyEntry, ReplyOpen, Request,
};
use libc::c_int;
use squashfuse_core::{Attr, EntryKind, NodeOps};
use std::ffi::{OsStr, OsString};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};
use tracing::{debug, info, trace};

/// Preferred I/O size reported to the kernel.
const BLOCK_SIZE: u32 = 4096;

const S_IFMT: u32 = 0o170_000;

/// One `readdir` record: inode, resume offset, type and name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaddirEntry {
    pub ino: u64,
    /// Offset the kernel passes back to continue after this entry.
    pub offset: i64,
    pub kind: FileType,
    pub name: OsString,
}

/// Read-only FUSE filesystem serving a tree of nodes.
pub struct SquashFs<N: NodeOps> {
    inodes: InodeTable<N>,
    attr_ttl: Duration,
    entry_ttl: Duration,
    /// Fired once the kernel handshake completes.
    ready: Option<Arc<Signal>>,
}

impl<N: NodeOps> SquashFs<N> {
    /// Creates a filesystem rooted at `root`.
    pub fn new(root: N, config: &MountConfig) -> Self {
        Self {
            inodes: InodeTable::new(root),
            attr_ttl: config.attr_ttl,
            entry_ttl: config.entry_ttl,
            ready: None,
        }
    }

    /// Sets the signal fired from `init`.
    #[must_use]
    pub fn with_ready_signal(mut self, signal: Arc<Signal>) -> Self {
        self.ready = Some(signal);
        self
    }

    pub fn inodes(&self) -> &InodeTable<N> {
        &self.inodes
    }

    fn node(&self, ino: u64) -> Result<N, c_int> {
        self.inodes.get(ino).ok_or(libc::ENOENT)
    }

    fn file_attr(ino: u64, attr: &Attr) -> FileAttr {
        let mtime = UNIX_EPOCH + Duration::from_secs(u64::from(attr.mtime));
        FileAttr {
            ino,
            size: attr.size,
            blocks: attr.blocks,
            atime: mtime,
            mtime,
            ctime: mtime,
            crtime: mtime,
            kind: file_type(attr.kind, attr.mode),
            perm: attr.perm(),
            nlink: attr.nlink,
            uid: attr.uid,
            gid: attr.gid,
            rdev: attr.rdev,
            blksize: BLOCK_SIZE,
            flags: 0,
        }
    }

    pub(crate) fn lookup_entry(&self, parent: u64, name: &OsStr) -> Result<FileAttr, c_int> {
        let dir = self.node(parent)?;
        let child = dir.lookup_child(name).map_err(|e| {
            debug!(parent, name = ?name, error = %e, "lookup failed");
            e.to_errno()
        })?;
        // Attributes first: a failed lookup must not take a reference.
        let attr = child.attr_of().map_err(|e| e.to_errno())?;
        let ino = self.inodes.insert_lookup(child, parent);
        Ok(Self::file_attr(ino, &attr))
    }

    pub(crate) fn attr_for(&self, ino: u64) -> Result<FileAttr, c_int> {
        let node = self.node(ino)?;
        let attr = node.attr_of().map_err(|e| {
            debug!(inode = ino, error = %e, "getattr failed");
            e.to_errno()
        })?;
        Ok(Self::file_attr(ino, &attr))
    }

    pub(crate) fn link_target(&self, ino: u64) -> Result<Vec<u8>, c_int> {
        Ok(self.node(ino)?.readlink_target())
    }

    pub(crate) fn check_open(&self, ino: u64, flags: i32) -> Result<(), c_int> {
        self.node(ino)?;
        if flags & libc::O_ACCMODE != libc::O_RDONLY {
            return Err(libc::EROFS);
        }
        Ok(())
    }

    pub(crate) fn check_opendir(&self, ino: u64) -> Result<(), c_int> {
        if self.node(ino)?.kind() == EntryKind::Dir {
            Ok(())
        } else {
            Err(libc::ENOTDIR)
        }
    }

    pub(crate) fn read_data(&self, ino: u64, offset: i64, size: u32) -> Result<Vec<u8>, c_int> {
        let offset = u64::try_from(offset).map_err(|_| libc::EINVAL)?;
        let node = self.node(ino)?;
        let result = if offset == 0 && u64::from(size) >= node.size() {
            node.read_full()
        } else {
            node.read_window(offset, usize::try_from(size).unwrap_or(usize::MAX))
        };
        result.map_err(|e| {
            debug!(inode = ino, offset, size, error = %e, "read failed");
            e.to_errno()
        })
    }

    pub(crate) fn dir_entries(&self, ino: u64, offset: i64) -> Result<Vec<ReaddirEntry>, c_int> {
        let skip = usize::try_from(offset).map_err(|_| libc::EINVAL)?;
        let dir = self.node(ino)?;
        let children = dir.list_children().map_err(|e| e.to_errno())?;
        let parent = self.inodes.parent(ino).unwrap_or(ROOT_INODE);

        let dots = [
            (ino, FileType::Directory, OsString::from(".")),
            (parent, FileType::Directory, OsString::from("..")),
        ];
        let listed = children.into_iter().map(|entry| {
            // Unrecognized tags take their type from the child's mode, as getattr does.
            let mode = if entry.kind == EntryKind::Unknown {
                dir.lookup_child(&entry.name)
                    .and_then(|child| child.attr_of())
                    .map_or(0, |attr| attr.mode)
            } else {
                0
            };
            (
                self.inodes.kernel_ino(entry.ino),
                file_type(entry.kind, mode),
                entry.name,
            )
        });

        Ok(dots
            .into_iter()
            .chain(listed)
            .enumerate()
            .skip(skip)
            .map(|(idx, (ino, kind, name))| ReaddirEntry {
                ino,
                offset: i64::try_from(idx + 1).unwrap_or(i64::MAX),
                kind,
                name,
            })
            .collect())
    }
}

/// Maps a listing type to the FUSE file type.
///
/// Unknown types fall back to the file type bits of `mode`, then to a
/// regular file.
pub fn file_type(kind: EntryKind, mode: u32) -> FileType {
    match kind {
        EntryKind::File => FileType::RegularFile,
        EntryKind::Dir => FileType::Directory,
        EntryKind::Block => FileType::BlockDevice,
        EntryKind::Link => FileType::Symlink,
        EntryKind::Char => FileType::CharDevice,
        EntryKind::Fifo => FileType::NamedPipe,
        EntryKind::Socket => FileType::Socket,
        EntryKind::Unknown => match mode & S_IFMT {
            0o040_000 => FileType::Directory,
            0o120_000 => FileType::Symlink,
            0o060_000 => FileType::BlockDevice,
            0o020_000 => FileType::CharDevice,
            0o010_000 => FileType::NamedPipe,
            0o140_000 => FileType::Socket,
            _ => FileType::RegularFile,
        },
    }
}

impl<N: NodeOps> Filesystem for SquashFs<N> {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), c_int> {
        info!("FUSE filesystem initialized");
        if let Some(ready) = &self.ready {
            ready.notify();
        }
        Ok(())
    }

    fn destroy(&mut self) {
        info!(inodes = self.inodes.len(), "FUSE filesystem destroyed");
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        trace!(parent, name = ?name, "lookup");
        match self.lookup_entry(parent, name) {
            Ok(attr) => reply.entry(&self.entry_ttl, &attr, 0),
            Err(errno) => reply.error(errno),
        }
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        trace!(inode = ino, nlookup, "forget");
        self.inodes.forget(ino, nlookup);
    }

    fn batch_forget(&mut self, _req: &Request<'_>, nodes: &[fuser::fuse_forget_one]) {
        trace!(count = nodes.len(), "batch_forget");
        for node in nodes {
            self.inodes.forget(node.nodeid, node.nlookup);
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        trace!(inode = ino, "getattr");
        match self.attr_for(ino) {
            Ok(attr) => reply.attr(&self.attr_ttl, &attr),
            Err(errno) => reply.error(errno),
        }
    }

    fn readlink(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyData) {
        trace!(inode = ino, "readlink");
        match self.link_target(ino) {
            Ok(target) => reply.data(&target),
            Err(errno) => reply.error(errno),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        trace!(inode = ino, flags, "open");
        match self.check_open(ino, flags) {
            // Content never changes while mounted.
            Ok(()) => reply.opened(0, fuser::consts::FOPEN_KEEP_CACHE),
            Err(errno) => reply.error(errno),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        trace!(inode = ino, offset, size, "read");
        match self.read_data(ino, offset, size) {
            Ok(data) => reply.data(&data),
            Err(errno) => reply.error(errno),
        }
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        trace!(inode = ino, "opendir");
        match self.check_opendir(ino) {
            Ok(()) => reply.opened(0, 0),
            Err(errno) => reply.error(errno),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        trace!(inode = ino, offset, "readdir");
        let entries = match self.dir_entries(ino, offset) {
            Ok(entries) => entries,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        for entry in entries {
            // add() returns true once the reply buffer is full
            if reply.add(entry.ino, entry.offset, entry.kind, &entry.name) {
                break;
            }
        }
        reply.ok();
    }
}
