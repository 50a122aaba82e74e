//! An in-memory [`ArchiveTree`].
//!
//! Built with [`MemoryArchiveBuilder`] from slash-separated paths. Entries are
//! kept sorted by name the way squashfs stores directory tables, and inode
//! numbers are handed out depth first with the root numbered last, so the
//! root is never inode 1.

use crate::archive::{ArchiveTree, Inode, InodeType, RawEntry};
use crate::error::ArchiveError;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::io::{self, Cursor, Read};
use std::sync::Arc;

const S_IFSOCK: u32 = 0o140_000;
const S_IFLNK: u32 = 0o120_000;
const S_IFREG: u32 = 0o100_000;
const S_IFBLK: u32 = 0o060_000;
const S_IFDIR: u32 = 0o040_000;
const S_IFCHR: u32 = 0o020_000;
const S_IFIFO: u32 = 0o010_000;

/// Handle to one node of a [`MemoryArchive`].
#[derive(Clone)]
pub struct MemoryNode(Arc<NodeData>);

struct NodeData {
    inode: Inode,
    body: Body,
}

enum Body {
    Dir(Vec<(OsString, MemoryNode)>),
    File(Bytes),
    Unreadable,
    Empty,
}

impl fmt::Debug for MemoryNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MemoryNode").field(&self.0.inode).finish()
    }
}

/// Reader standing in for a data block that fails to decompress.
struct UnreadableData;

impl Read for UnreadableData {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "data block failed to decompress",
        ))
    }
}

/// Immutable inode tree held in memory.
pub struct MemoryArchive {
    root: MemoryNode,
    ids: Vec<u32>,
    inode_count: usize,
}

impl MemoryArchive {
    pub fn builder() -> MemoryArchiveBuilder {
        MemoryArchiveBuilder::new()
    }

    /// Number of inodes in the tree, root included.
    pub fn inode_count(&self) -> usize {
        self.inode_count
    }
}

impl fmt::Debug for MemoryArchive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryArchive")
            .field("root", &self.root.0.inode.number)
            .field("inodes", &self.inode_count)
            .field("ids", &self.ids)
            .finish()
    }
}

/// Directory tables only ever carry the basic type tag.
fn listing_kind(kind: InodeType) -> InodeType {
    match kind {
        InodeType::ExtDir => InodeType::Dir,
        InodeType::ExtFile => InodeType::File,
        InodeType::ExtSymlink => InodeType::Symlink,
        InodeType::ExtBlockDevice => InodeType::BlockDevice,
        InodeType::ExtCharDevice => InodeType::CharDevice,
        InodeType::ExtFifo => InodeType::Fifo,
        InodeType::ExtSocket => InodeType::Socket,
        other => other,
    }
}

impl ArchiveTree for MemoryArchive {
    type Node = MemoryNode;

    fn root(&self) -> MemoryNode {
        self.root.clone()
    }

    fn inode<'n>(&self, node: &'n MemoryNode) -> &'n Inode {
        &node.0.inode
    }

    fn read_dir(&self, dir: &MemoryNode) -> Result<Vec<RawEntry>, ArchiveError> {
        let Body::Dir(children) = &dir.0.body else {
            return Err(ArchiveError::NotADirectory {
                number: dir.0.inode.number,
            });
        };
        Ok(children
            .iter()
            .map(|(name, child)| RawEntry {
                name: name.clone(),
                number: child.0.inode.number,
                kind: listing_kind(child.0.inode.kind),
            })
            .collect())
    }

    fn open(&self, dir: &MemoryNode, name: &OsStr) -> Result<MemoryNode, ArchiveError> {
        let Body::Dir(children) = &dir.0.body else {
            return Err(ArchiveError::NotADirectory {
                number: dir.0.inode.number,
            });
        };
        children
            .binary_search_by(|(entry, _)| entry.as_os_str().cmp(name))
            .map(|idx| children[idx].1.clone())
            .map_err(|_| ArchiveError::NotFound {
                name: name.to_string_lossy().into_owned(),
            })
    }

    fn reader(&self, file: &MemoryNode) -> Result<Box<dyn Read + Send + '_>, ArchiveError> {
        match &file.0.body {
            Body::File(data) => Ok(Box::new(Cursor::new(data.clone()))),
            Body::Unreadable => Ok(Box::new(UnreadableData)),
            Body::Dir(_) | Body::Empty => Err(ArchiveError::NotARegularFile {
                number: file.0.inode.number,
            }),
        }
    }

    fn id(&self, index: u16) -> Result<u32, ArchiveError> {
        self.ids
            .get(usize::from(index))
            .copied()
            .ok_or(ArchiveError::IdOutOfRange {
                index,
                count: self.ids.len(),
            })
    }
}

struct Meta {
    kind: InodeType,
    mode: u32,
    uid_index: u16,
    gid_index: u16,
    mtime: u32,
    rdev: u32,
}

struct Pending {
    meta: Meta,
    body: PendingBody,
}

enum PendingBody {
    Dir(BTreeMap<OsString, Pending>),
    File(Bytes),
    Unreadable(u64),
    Symlink(Vec<u8>),
    Empty,
}

/// Builder for [`MemoryArchive`].
///
/// Missing parent directories are created with mode `0755`. Owner indexes,
/// mtime and the extended-encoding flag apply to entries added after they
/// are set.
pub struct MemoryArchiveBuilder {
    root: Pending,
    ids: Vec<u32>,
    uid_index: u16,
    gid_index: u16,
    mtime: u32,
    extended: bool,
    error: Option<ArchiveError>,
}

impl Default for MemoryArchiveBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryArchiveBuilder {
    pub fn new() -> Self {
        Self {
            root: Pending {
                meta: Meta {
                    kind: InodeType::Dir,
                    mode: S_IFDIR | 0o755,
                    uid_index: 0,
                    gid_index: 0,
                    mtime: 0,
                    rdev: 0,
                },
                body: PendingBody::Dir(BTreeMap::new()),
            },
            ids: vec![0],
            uid_index: 0,
            gid_index: 0,
            mtime: 0,
            extended: false,
            error: None,
        }
    }

    /// Replaces the uid/gid id table.
    #[must_use]
    pub fn ids(mut self, ids: Vec<u32>) -> Self {
        self.ids = ids;
        self
    }

    /// Sets the id-table indexes used for owner and group.
    #[must_use]
    pub fn owner(mut self, uid_index: u16, gid_index: u16) -> Self {
        self.uid_index = uid_index;
        self.gid_index = gid_index;
        self
    }

    #[must_use]
    pub fn mtime(mut self, mtime: u32) -> Self {
        self.mtime = mtime;
        self
    }

    /// Stores subsequent inodes using the extended type tags.
    #[must_use]
    pub fn extended(mut self, extended: bool) -> Self {
        self.extended = extended;
        self
    }

    /// Adds a directory, or updates the metadata of an existing one.
    ///
    /// An empty path addresses the root.
    #[must_use]
    pub fn dir(self, path: &str, perm: u32) -> Self {
        let kind = if self.extended { InodeType::ExtDir } else { InodeType::Dir };
        self.insert(path, kind, S_IFDIR | perm, 0, PendingBody::Dir(BTreeMap::new()))
    }

    /// Adds a regular file.
    #[must_use]
    pub fn file(self, path: &str, perm: u32, data: impl Into<Bytes>) -> Self {
        let kind = if self.extended { InodeType::ExtFile } else { InodeType::File };
        self.insert(path, kind, S_IFREG | perm, 0, PendingBody::File(data.into()))
    }

    /// Adds a regular file of `size` bytes whose content cannot be read.
    #[must_use]
    pub fn unreadable_file(self, path: &str, perm: u32, size: u64) -> Self {
        let kind = if self.extended { InodeType::ExtFile } else { InodeType::File };
        self.insert(path, kind, S_IFREG | perm, 0, PendingBody::Unreadable(size))
    }

    /// Adds a symlink pointing at `target`.
    #[must_use]
    pub fn symlink(self, path: &str, target: impl AsRef<[u8]>) -> Self {
        let kind = if self.extended { InodeType::ExtSymlink } else { InodeType::Symlink };
        let target = target.as_ref().to_vec();
        self.insert(path, kind, S_IFLNK | 0o777, 0, PendingBody::Symlink(target))
    }

    /// Adds a node without content.
    ///
    /// File type bits are derived from `kind`; tags outside the known range
    /// take `perm` verbatim.
    #[must_use]
    pub fn special(self, path: &str, kind: InodeType, perm: u32, rdev: u32) -> Self {
        let type_bits = match listing_kind(kind) {
            InodeType::Dir => S_IFDIR,
            InodeType::File => S_IFREG,
            InodeType::Symlink => S_IFLNK,
            InodeType::BlockDevice => S_IFBLK,
            InodeType::CharDevice => S_IFCHR,
            InodeType::Fifo => S_IFIFO,
            InodeType::Socket => S_IFSOCK,
            _ => 0,
        };
        self.insert(path, kind, type_bits | perm, rdev, PendingBody::Empty)
    }

    fn insert(mut self, path: &str, kind: InodeType, mode: u32, rdev: u32, body: PendingBody) -> Self {
        if self.error.is_some() {
            return self;
        }
        let meta = Meta {
            kind,
            mode,
            uid_index: self.uid_index,
            gid_index: self.gid_index,
            mtime: self.mtime,
            rdev,
        };
        if let Err(e) = self.place(path, Pending { meta, body }) {
            self.error = Some(e);
        }
        self
    }

    fn place(&mut self, path: &str, node: Pending) -> Result<(), ArchiveError> {
        let mut components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
        let Some(leaf) = components.pop() else {
            if !matches!(node.body, PendingBody::Dir(_)) {
                return Err(ArchiveError::Corrupt("root must be a directory".to_string()));
            }
            self.root.meta = node.meta;
            return Ok(());
        };

        let (uid_index, gid_index, mtime) = (self.uid_index, self.gid_index, self.mtime);
        let mut current = &mut self.root;
        for component in components {
            let PendingBody::Dir(children) = &mut current.body else {
                return Err(ArchiveError::Corrupt(format!("{path}: parent is not a directory")));
            };
            current = children.entry(OsString::from(component)).or_insert_with(|| Pending {
                meta: Meta {
                    kind: InodeType::Dir,
                    mode: S_IFDIR | 0o755,
                    uid_index,
                    gid_index,
                    mtime,
                    rdev: 0,
                },
                body: PendingBody::Dir(BTreeMap::new()),
            });
        }

        let PendingBody::Dir(children) = &mut current.body else {
            return Err(ArchiveError::Corrupt(format!("{path}: parent is not a directory")));
        };
        match children.get_mut(OsStr::new(leaf)) {
            None => {
                children.insert(OsString::from(leaf), node);
                Ok(())
            }
            Some(existing)
                if matches!(existing.body, PendingBody::Dir(_))
                    && matches!(node.body, PendingBody::Dir(_)) =>
            {
                existing.meta = node.meta;
                Ok(())
            }
            Some(_) => Err(ArchiveError::Corrupt(format!("{path}: entry already exists"))),
        }
    }

    /// Freezes the tree.
    ///
    /// Fails with the first path conflict recorded while adding entries.
    pub fn build(self) -> Result<MemoryArchive, ArchiveError> {
        if let Some(e) = self.error {
            return Err(e);
        }
        let mut next = 1u32;
        let root = freeze(self.root, &mut next);
        Ok(MemoryArchive {
            root,
            ids: self.ids,
            inode_count: (next - 1) as usize,
        })
    }
}

fn freeze(pending: Pending, next: &mut u32) -> MemoryNode {
    let Pending { meta, body } = pending;
    let (size, link_count, body) = match body {
        PendingBody::Dir(children) => {
            let mut subdirs = 0u32;
            // Approximates the stored listing: one header plus name and
            // fixed-width record per entry.
            let mut size = 3u64;
            let mut frozen = Vec::with_capacity(children.len());
            for (name, child) in children {
                let child = freeze(child, next);
                if child.0.inode.kind.is_dir() {
                    subdirs += 1;
                }
                size += 8 + name.len() as u64;
                frozen.push((name, child));
            }
            (size, 2 + subdirs, Body::Dir(frozen))
        }
        PendingBody::File(data) => (data.len() as u64, 1, Body::File(data)),
        PendingBody::Unreadable(size) => (size, 1, Body::Unreadable),
        PendingBody::Symlink(target) => {
            let inode = Inode {
                number: take_number(next),
                kind: meta.kind,
                size: target.len() as u64,
                mode: meta.mode,
                uid_index: meta.uid_index,
                gid_index: meta.gid_index,
                link_count: 1,
                mtime: meta.mtime,
                rdev: 0,
                symlink_target: Some(target),
            };
            return MemoryNode(Arc::new(NodeData {
                inode,
                body: Body::Empty,
            }));
        }
        PendingBody::Empty => (0, 1, Body::Empty),
    };
    let inode = Inode {
        number: take_number(next),
        kind: meta.kind,
        size,
        mode: meta.mode,
        uid_index: meta.uid_index,
        gid_index: meta.gid_index,
        link_count,
        mtime: meta.mtime,
        rdev: meta.rdev,
        symlink_target: None,
    };
    MemoryNode(Arc::new(NodeData { inode, body }))
}

fn take_number(next: &mut u32) -> u32 {
    let number = *next;
    *next += 1;
    number
}
