//! Squashfs images read through `backhand`.
//!
//! [`ImageArchive`] indexes the image's directory tree once when it is opened
//! and decompresses file content on demand. backhand resolves owners to
//! numeric ids while reading, so the id table is rebuilt from the distinct
//! uid/gid values in first-seen order. Inode numbers are assigned the way
//! mksquashfs assigns them: depth first, children in name order, the root
//! last.

use crate::archive::{ArchiveTree, Inode, InodeType, RawEntry};
use crate::error::ArchiveError;
use backhand::{FilesystemReader, InnerNode, Node, SquashfsFileReader};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, Cursor, Read, Seek};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, trace};

const S_IFSOCK: u32 = 0o140_000;
const S_IFLNK: u32 = 0o120_000;
const S_IFREG: u32 = 0o100_000;
const S_IFBLK: u32 = 0o060_000;
const S_IFDIR: u32 = 0o040_000;
const S_IFCHR: u32 = 0o020_000;
const S_IFIFO: u32 = 0o010_000;

/// Handle to one node of an [`ImageArchive`].
#[derive(Clone)]
pub struct ImageNode(Arc<ImageData>);

struct ImageData {
    inode: Inode,
    body: Body,
}

enum Body {
    Dir(Vec<(OsString, ImageNode)>),
    /// Position of the file in the reader's node list.
    File(usize),
    Empty,
}

impl fmt::Debug for ImageNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ImageNode").field(&self.0.inode).finish()
    }
}

/// A squashfs image opened with `backhand`.
pub struct ImageArchive {
    reader: Mutex<FilesystemReader<'static>>,
    root: ImageNode,
    ids: Vec<u32>,
    inode_count: usize,
}

impl ImageArchive {
    /// Opens the squashfs image at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ArchiveError> {
        let file = File::open(path.as_ref())?;
        debug!(path = %path.as_ref().display(), "opening squashfs image");
        Self::from_reader(BufReader::new(file))
    }

    /// Reads a squashfs image held in memory.
    pub fn from_bytes(image: Vec<u8>) -> Result<Self, ArchiveError> {
        Self::from_reader(Cursor::new(image))
    }

    /// Reads a squashfs image from any seekable byte source.
    pub fn from_reader<R>(source: R) -> Result<Self, ArchiveError>
    where
        R: BufRead + Seek + Send + 'static,
    {
        let reader = FilesystemReader::from_reader(source)
            .map_err(|e| ArchiveError::Corrupt(e.to_string()))?;
        let (root, ids, inode_count) = index(&reader)?;
        debug!(inodes = inode_count, ids = ids.len(), "indexed squashfs image");
        Ok(Self {
            reader: Mutex::new(reader),
            root,
            ids,
            inode_count,
        })
    }

    /// Number of inodes in the image, root included.
    pub fn inode_count(&self) -> usize {
        self.inode_count
    }
}

impl fmt::Debug for ImageArchive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageArchive")
            .field("root", &self.root.0.inode.number)
            .field("inodes", &self.inode_count)
            .field("ids", &self.ids)
            .finish()
    }
}

impl ArchiveTree for ImageArchive {
    type Node = ImageNode;

    fn root(&self) -> ImageNode {
        self.root.clone()
    }

    fn inode<'n>(&self, node: &'n ImageNode) -> &'n Inode {
        &node.0.inode
    }

    fn read_dir(&self, dir: &ImageNode) -> Result<Vec<RawEntry>, ArchiveError> {
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
                kind: child.0.inode.kind,
            })
            .collect())
    }

    fn open(&self, dir: &ImageNode, name: &OsStr) -> Result<ImageNode, ArchiveError> {
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

    /// Decompresses the whole file; windowed reads skip within the buffer.
    fn reader(&self, file: &ImageNode) -> Result<Box<dyn Read + Send + '_>, ArchiveError> {
        let number = file.0.inode.number;
        let Body::File(slot) = &file.0.body else {
            return Err(ArchiveError::NotARegularFile { number });
        };

        let fs = self.reader.lock();
        let node = fs
            .files()
            .nth(*slot)
            .ok_or_else(|| ArchiveError::Corrupt(format!("inode {number} has no data node")))?;
        let InnerNode::File(data) = &node.inner else {
            return Err(ArchiveError::NotARegularFile { number });
        };

        let mut content = Vec::with_capacity(usize::try_from(file.0.inode.size).unwrap_or(0));
        fs.file(data).reader().read_to_end(&mut content)?;
        trace!(inode = number, size = content.len(), "decompressed file");
        Ok(Box::new(Cursor::new(content)))
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

/// Distinct owner ids in first-seen order.
#[derive(Default)]
struct IdTable {
    ids: Vec<u32>,
    slots: HashMap<u32, u16>,
}

impl IdTable {
    fn intern(&mut self, id: u32) -> Result<u16, ArchiveError> {
        if let Some(&slot) = self.slots.get(&id) {
            return Ok(slot);
        }
        let slot = u16::try_from(self.ids.len())
            .map_err(|_| ArchiveError::Corrupt("more than 65536 distinct owner ids".to_string()))?;
        self.ids.push(id);
        self.slots.insert(id, slot);
        Ok(slot)
    }
}

/// One node of the image before inode numbers are assigned.
struct Draft {
    name: OsString,
    kind: InodeType,
    mode: u32,
    uid_index: u16,
    gid_index: u16,
    mtime: u32,
    rdev: u32,
    size: u64,
    target: Option<Vec<u8>>,
    body: DraftBody,
}

enum DraftBody {
    Dir(Vec<usize>),
    File(usize),
    Empty,
}

fn draft(
    slot: usize,
    name: OsString,
    node: &Node<SquashfsFileReader>,
    ids: &mut IdTable,
) -> Result<Draft, ArchiveError> {
    let (kind, type_bits, size, rdev, target, body) = match &node.inner {
        InnerNode::Dir(_) => (InodeType::Dir, S_IFDIR, 0, 0, None, DraftBody::Dir(Vec::new())),
        InnerNode::File(file) => (
            InodeType::File,
            S_IFREG,
            file.file_len() as u64,
            0,
            None,
            DraftBody::File(slot),
        ),
        InnerNode::Symlink(link) => {
            let target = link.link.as_os_str().as_encoded_bytes().to_vec();
            let size = target.len() as u64;
            (InodeType::Symlink, S_IFLNK, size, 0, Some(target), DraftBody::Empty)
        }
        InnerNode::CharacterDevice(dev) => (
            InodeType::CharDevice,
            S_IFCHR,
            0,
            dev.device_number,
            None,
            DraftBody::Empty,
        ),
        InnerNode::BlockDevice(dev) => (
            InodeType::BlockDevice,
            S_IFBLK,
            0,
            dev.device_number,
            None,
            DraftBody::Empty,
        ),
        InnerNode::NamedPipe => (InodeType::Fifo, S_IFIFO, 0, 0, None, DraftBody::Empty),
        InnerNode::Socket => (InodeType::Socket, S_IFSOCK, 0, 0, None, DraftBody::Empty),
        #[allow(unreachable_patterns)]
        _ => return Err(ArchiveError::Corrupt(format!("unsupported node at {}", node.fullpath.display()))),
    };
    Ok(Draft {
        name,
        kind,
        mode: type_bits | (u32::from(node.header.permissions) & 0o7777),
        uid_index: ids.intern(node.header.uid)?,
        gid_index: ids.intern(node.header.gid)?,
        mtime: node.header.mtime,
        rdev,
        size,
        target,
        body,
    })
}

/// Builds the node tree of `reader`. Returns the root, the id table and the
/// inode count.
fn index(reader: &FilesystemReader<'_>) -> Result<(ImageNode, Vec<u32>, usize), ArchiveError> {
    let mut ids = IdTable::default();
    let mut drafts: Vec<Draft> = Vec::new();
    let mut by_path: HashMap<PathBuf, usize> = HashMap::new();
    let mut root = None;

    for (slot, node) in reader.files().enumerate() {
        let path = &node.fullpath;
        let idx = drafts.len();
        let Some(parent) = path.parent() else {
            drafts.push(draft(slot, OsString::new(), node, &mut ids)?);
            root = Some(idx);
            by_path.insert(path.clone(), idx);
            continue;
        };
        let name = path
            .file_name()
            .ok_or_else(|| ArchiveError::Corrupt(format!("unnamed node at {}", path.display())))?
            .to_os_string();
        let parent_idx = *by_path
            .get(parent)
            .ok_or_else(|| ArchiveError::Corrupt(format!("{} listed before its parent", path.display())))?;

        drafts.push(draft(slot, name, node, &mut ids)?);
        by_path.insert(path.clone(), idx);
        match &mut drafts[parent_idx].body {
            DraftBody::Dir(children) => children.push(idx),
            _ => {
                return Err(ArchiveError::Corrupt(format!(
                    "parent of {} is not a directory",
                    path.display()
                )));
            }
        }
    }

    let root = root.ok_or_else(|| ArchiveError::Corrupt("image has no root directory".to_string()))?;
    let mut drafts: Vec<Option<Draft>> = drafts.into_iter().map(Some).collect();
    let mut next = 1u32;
    let (_, root) = freeze(&mut drafts, root, &mut next)?;
    Ok((root, ids.ids, (next - 1) as usize))
}

fn freeze(
    drafts: &mut [Option<Draft>],
    idx: usize,
    next: &mut u32,
) -> Result<(OsString, ImageNode), ArchiveError> {
    let draft = drafts[idx]
        .take()
        .ok_or_else(|| ArchiveError::Corrupt("directory cycle".to_string()))?;

    let (size, link_count, body) = match draft.body {
        DraftBody::Dir(children) => {
            let mut frozen = Vec::with_capacity(children.len());
            for child in children {
                frozen.push(freeze(drafts, child, next)?);
            }
            frozen.sort_by(|(a, _), (b, _)| a.cmp(b));
            let subdirs = frozen
                .iter()
                .filter(|(_, child)| child.0.inode.kind.is_dir())
                .count();
            let size = 3 + frozen
                .iter()
                .map(|(name, _)| 8 + name.len() as u64)
                .sum::<u64>();
            let link_count = 2 + u32::try_from(subdirs).unwrap_or(u32::MAX - 2);
            (size, link_count, Body::Dir(frozen))
        }
        DraftBody::File(slot) => (draft.size, 1, Body::File(slot)),
        DraftBody::Empty => (draft.size, 1, Body::Empty),
    };

    let number = *next;
    *next += 1;
    let inode = Inode {
        number,
        kind: draft.kind,
        size,
        mode: draft.mode,
        uid_index: draft.uid_index,
        gid_index: draft.gid_index,
        link_count,
        mtime: draft.mtime,
        rdev: draft.rdev,
        symlink_target: draft.target,
    };
    Ok((draft.name, ImageNode(Arc::new(ImageData { inode, body }))))
}
