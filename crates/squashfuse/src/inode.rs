//! Inode management for the FUSE filesystem.
//!
//! The kernel addresses nodes by 64-bit inode number and keeps a lookup
//! count per number. This table maps kernel inode numbers to nodes and
//! tracks those counts so entries can be dropped on `forget`.
//!
//! Kernel inode numbers are archive inode numbers, except that the
//! archive's root and archive inode 1 trade places: FUSE reserves 1 for
//! the root, and squashfs usually numbers its root last.

use dashmap::DashMap;
use squashfuse_core::NodeOps;
use std::sync::atomic::{AtomicU64, Ordering};

/// The root inode number (FUSE convention).
pub const ROOT_INODE: u64 = fuser::FUSE_ROOT_ID;

/// An entry in the inode table.
#[derive(Debug)]
pub struct InodeEntry<N> {
    pub node: N,
    /// Kernel inode number of the directory this node was looked up in.
    pub parent: u64,
    /// Lookup count for `forget()` handling.
    nlookup: AtomicU64,
}

impl<N> InodeEntry<N> {
    fn new(node: N, parent: u64) -> Self {
        Self {
            node,
            parent,
            nlookup: AtomicU64::new(1),
        }
    }

    /// Increments the lookup count and returns the new value.
    pub fn inc_nlookup(&self) -> u64 {
        self.nlookup.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Decrements the lookup count by `count` and returns the new value.
    /// Returns `None` if the count would go negative.
    pub fn dec_nlookup(&self, count: u64) -> Option<u64> {
        let old = self.nlookup.fetch_sub(count, Ordering::AcqRel);
        if old < count {
            self.nlookup.fetch_add(count, Ordering::Relaxed);
            None
        } else {
            Some(old - count)
        }
    }

    pub fn nlookup(&self) -> u64 {
        self.nlookup.load(Ordering::Relaxed)
    }
}

/// Thread-safe table from kernel inode numbers to nodes.
pub struct InodeTable<N> {
    entries: DashMap<u64, InodeEntry<N>>,
    /// Archive inode number of the root directory.
    root_id: u64,
}

impl<N: NodeOps> InodeTable<N> {
    /// Creates a table holding only `root`, which is never evicted.
    pub fn new(root: N) -> Self {
        let root_id = root.id();
        let entries = DashMap::new();
        entries.insert(ROOT_INODE, InodeEntry::new(root, ROOT_INODE));
        Self { entries, root_id }
    }

    /// Maps an archive inode number to the kernel inode number.
    ///
    /// The mapping is its own inverse.
    pub fn kernel_ino(&self, archive_id: u64) -> u64 {
        if archive_id == self.root_id {
            ROOT_INODE
        } else if archive_id == ROOT_INODE {
            self.root_id
        } else {
            archive_id
        }
    }

    /// Records a successful lookup of `node` in directory `parent`.
    ///
    /// Returns the kernel inode number. Repeated lookups of the same node
    /// share one entry and bump its lookup count.
    pub fn insert_lookup(&self, node: N, parent: u64) -> u64 {
        let ino = self.kernel_ino(node.id());
        self.entries
            .entry(ino)
            .and_modify(|entry| {
                entry.inc_nlookup();
            })
            .or_insert_with(|| InodeEntry::new(node, parent));
        ino
    }

    /// Returns a clone of the node behind `ino`.
    pub fn get(&self, ino: u64) -> Option<N> {
        self.entries.get(&ino).map(|entry| entry.node.clone())
    }

    /// Returns the parent recorded for `ino`. The root is its own parent.
    pub fn parent(&self, ino: u64) -> Option<u64> {
        self.entries.get(&ino).map(|entry| entry.parent)
    }

    /// Returns the current lookup count of `ino`.
    pub fn nlookup(&self, ino: u64) -> Option<u64> {
        self.entries.get(&ino).map(|entry| entry.nlookup())
    }

    /// Decrements the lookup count of `ino` by `nlookup`.
    ///
    /// Returns `true` if the entry reached zero and was evicted.
    pub fn forget(&self, ino: u64, nlookup: u64) -> bool {
        if ino == ROOT_INODE {
            return false;
        }

        let remaining = match self.entries.get(&ino) {
            Some(entry) => entry.dec_nlookup(nlookup),
            None => return false,
        };
        if remaining != Some(0) {
            return false;
        }
        // A concurrent lookup may have revived the entry since the decrement.
        self.entries
            .remove_if(&ino, |_, entry| entry.nlookup() == 0)
            .is_some()
    }

    /// Returns the number of inodes in the table, root included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the table only holds the root.
    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use squashfuse_core::{FsNode, MemoryArchive};
    use std::ffi::OsStr;
    use std::sync::Arc;

    // Numbering is depth first with the root last: a=1, b=2, c=3, root=4.
    fn root() -> FsNode<MemoryArchive> {
        let archive = MemoryArchive::builder()
            .file("a", 0o644, &b"a"[..])
            .file("b", 0o644, &b"b"[..])
            .file("c", 0o644, &b"c"[..])
            .build()
            .unwrap();
        FsNode::root(Arc::new(archive))
    }

    fn child(root: &FsNode<MemoryArchive>, name: &str) -> FsNode<MemoryArchive> {
        root.lookup_child(OsStr::new(name)).unwrap()
    }

    #[test]
    fn test_root_inode_exists() {
        let root = root();
        let table = InodeTable::new(root.clone());
        assert_eq!(table.get(ROOT_INODE).unwrap().id(), root.id());
        assert_eq!(table.parent(ROOT_INODE), Some(ROOT_INODE));
        assert!(table.is_empty());
    }

    #[test]
    fn test_root_and_inode_one_trade_places() {
        let root = root();
        let table = InodeTable::new(root.clone());
        assert_eq!(root.id(), 4);

        assert_eq!(table.kernel_ino(4), ROOT_INODE);
        assert_eq!(table.kernel_ino(1), 4);
        assert_eq!(table.kernel_ino(2), 2);

        let a = child(&root, "a");
        assert_eq!(a.id(), 1);
        let ino = table.insert_lookup(a, ROOT_INODE);
        assert_eq!(ino, 4);
        assert_eq!(table.get(4).unwrap().id(), 1);
    }

    #[test]
    fn test_mapping_is_involution() {
        let table = InodeTable::new(root());
        for id in 0..10 {
            assert_eq!(table.kernel_ino(table.kernel_ino(id)), id);
        }
    }

    #[test]
    fn test_repeated_lookup_increments_count() {
        let root = root();
        let table = InodeTable::new(root.clone());
        let ino = table.insert_lookup(child(&root, "b"), ROOT_INODE);
        let again = table.insert_lookup(child(&root, "b"), ROOT_INODE);
        assert_eq!(ino, again);
        assert_eq!(table.nlookup(ino), Some(2));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_forget_evicts_at_zero() {
        let root = root();
        let table = InodeTable::new(root.clone());
        let ino = table.insert_lookup(child(&root, "c"), ROOT_INODE);
        table.insert_lookup(child(&root, "c"), ROOT_INODE);

        assert!(!table.forget(ino, 1));
        assert!(table.get(ino).is_some());
        assert!(table.forget(ino, 1));
        assert!(table.get(ino).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn test_forget_more_than_looked_up_keeps_entry() {
        let root = root();
        let table = InodeTable::new(root.clone());
        let ino = table.insert_lookup(child(&root, "c"), ROOT_INODE);
        assert!(!table.forget(ino, 5));
        assert_eq!(table.nlookup(ino), Some(1));
    }

    #[test]
    fn test_root_is_never_evicted() {
        let table = InodeTable::new(root());
        assert!(!table.forget(ROOT_INODE, 100));
        assert!(table.get(ROOT_INODE).is_some());
    }

    #[test]
    fn test_forget_unknown_inode() {
        let table = InodeTable::new(root());
        assert!(!table.forget(999, 1));
    }
}
