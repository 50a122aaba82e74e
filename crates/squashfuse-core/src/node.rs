//! Filesystem nodes.
//!
//! [`NodeOps`] is the capability set a protocol binding needs from a node.
//! Bindings are written against this trait only, so supporting another
//! kernel protocol means writing another thin shim over it.
//! [`FsNode`] implements it on top of any [`ArchiveTree`].

use crate::archive::{ArchiveTree, Inode};
use crate::attr::{self, Attr};
use crate::dir::{self, DirEntry, EntryKind};
use crate::content;
use crate::error::NodeResult;
use std::ffi::OsStr;
use std::fmt;
use std::sync::Arc;

/// Operations a protocol binding can ask of a node.
///
/// All methods take `&self` and may run concurrently.
pub trait NodeOps: Clone + Send + Sync + 'static {
    /// Stable numeric identifier of the node.
    fn id(&self) -> u64;

    /// Listing type of the node.
    fn kind(&self) -> EntryKind;

    /// Stored content size in bytes.
    fn size(&self) -> u64;

    /// Attribute record.
    fn attr_of(&self) -> NodeResult<Attr>;

    /// Child called `name`. Only valid on directories.
    fn lookup_child(&self, name: &OsStr) -> NodeResult<Self>;

    /// Directory entries in stored order. Only valid on directories.
    fn list_children(&self) -> NodeResult<Vec<DirEntry>>;

    /// Whole content of a regular file.
    fn read_full(&self) -> NodeResult<Vec<u8>>;

    /// Up to `len` bytes of a regular file starting at `offset`.
    fn read_window(&self, offset: u64, len: usize) -> NodeResult<Vec<u8>>;

    /// Stored symlink target, or empty for anything that is not a symlink.
    fn readlink_target(&self) -> Vec<u8>;
}

/// An archive node together with the archive it belongs to.
pub struct FsNode<A: ArchiveTree> {
    archive: Arc<A>,
    node: A::Node,
}

impl<A: ArchiveTree> FsNode<A> {
    /// Wraps the archive's root directory.
    pub fn root(archive: Arc<A>) -> Self {
        let node = archive.root();
        Self { archive, node }
    }

    /// Wraps an arbitrary node of `archive`.
    pub fn new(archive: Arc<A>, node: A::Node) -> Self {
        Self { archive, node }
    }

    /// Stored metadata.
    pub fn inode(&self) -> &Inode {
        self.archive.inode(&self.node)
    }

    pub fn archive(&self) -> &Arc<A> {
        &self.archive
    }

    pub fn node(&self) -> &A::Node {
        &self.node
    }
}

impl<A: ArchiveTree> Clone for FsNode<A> {
    fn clone(&self) -> Self {
        Self {
            archive: Arc::clone(&self.archive),
            node: self.node.clone(),
        }
    }
}

impl<A: ArchiveTree> fmt::Debug for FsNode<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inode = self.inode();
        f.debug_struct("FsNode")
            .field("number", &inode.number)
            .field("kind", &inode.kind)
            .finish_non_exhaustive()
    }
}

impl<A: ArchiveTree> NodeOps for FsNode<A> {
    fn id(&self) -> u64 {
        u64::from(self.inode().number)
    }

    fn kind(&self) -> EntryKind {
        EntryKind::from(self.inode().kind)
    }

    fn size(&self) -> u64 {
        self.inode().size
    }

    fn attr_of(&self) -> NodeResult<Attr> {
        Ok(attr::translate(self.archive.as_ref(), self.inode())?)
    }

    fn lookup_child(&self, name: &OsStr) -> NodeResult<Self> {
        let child = dir::lookup(self.archive.as_ref(), &self.node, name)?;
        Ok(Self::new(Arc::clone(&self.archive), child))
    }

    fn list_children(&self) -> NodeResult<Vec<DirEntry>> {
        dir::list(self.archive.as_ref(), &self.node)
    }

    fn read_full(&self) -> NodeResult<Vec<u8>> {
        content::read_full(self.archive.as_ref(), &self.node)
    }

    fn read_window(&self, offset: u64, len: usize) -> NodeResult<Vec<u8>> {
        content::read_window(self.archive.as_ref(), &self.node, offset, len)
    }

    fn readlink_target(&self) -> Vec<u8> {
        let inode = self.inode();
        if inode.kind.is_symlink() {
            inode.symlink_target.clone().unwrap_or_default()
        } else {
            Vec::new()
        }
    }
}
