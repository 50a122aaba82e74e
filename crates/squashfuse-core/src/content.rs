//! File content reads.
//!
//! No reader outlives a request: each call asks the archive for a fresh
//! reader and drops it before returning.

use crate::archive::ArchiveTree;
use crate::error::{NodeError, NodeResult};
use std::io::{self, Read};
use tracing::trace;

/// Upper bound on the buffer reserved up front for a full read.
const MAX_PREALLOC: u64 = 1 << 20;

/// Reads the whole content of a regular file.
pub fn read_full<A: ArchiveTree + ?Sized>(archive: &A, file: &A::Node) -> NodeResult<Vec<u8>> {
    let inode = archive.inode(file);
    if !inode.kind.is_regular() {
        return Err(NodeError::NoData);
    }
    let mut reader = archive.full_reader(file)?;
    #[allow(clippy::cast_possible_truncation)]
    let mut buf = Vec::with_capacity(inode.size.min(MAX_PREALLOC) as usize);
    reader.read_to_end(&mut buf)?;
    trace!(inode = inode.number, len = buf.len(), "full read");
    Ok(buf)
}

/// Reads up to `len` bytes starting at `offset`.
///
/// Fewer bytes come back when the window crosses end of file, and none when
/// it starts past it.
pub fn read_window<A: ArchiveTree + ?Sized>(
    archive: &A,
    file: &A::Node,
    offset: u64,
    len: usize,
) -> NodeResult<Vec<u8>> {
    let inode = archive.inode(file);
    if !inode.kind.is_regular() {
        return Err(NodeError::NoData);
    }
    let reader = archive.reader(file)?;
    let data = copy_window(reader, offset, len, inode.size)?;
    trace!(
        inode = inode.number,
        offset,
        requested = len,
        len = data.len(),
        "windowed read"
    );
    Ok(data)
}

/// Skips `offset` bytes of `reader`, then collects at most `len` bytes.
///
/// `size_hint` only bounds the allocation.
pub fn copy_window<R: Read>(
    mut reader: R,
    offset: u64,
    len: usize,
    size_hint: u64,
) -> io::Result<Vec<u8>> {
    let skipped = io::copy(&mut reader.by_ref().take(offset), &mut io::sink())?;
    if skipped < offset {
        return Ok(Vec::new());
    }
    let remaining = size_hint.saturating_sub(offset);
    #[allow(clippy::cast_possible_truncation)]
    let capacity = (len as u64).min(remaining).min(MAX_PREALLOC) as usize;
    let mut buf = Vec::with_capacity(capacity);
    reader.take(len as u64).read_to_end(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn data(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn window_inside_file() {
        let content = data(100);
        let out = copy_window(Cursor::new(&content), 10, 20, 100).unwrap();
        assert_eq!(out, &content[10..30]);
    }

    #[test]
    fn window_crossing_eof_is_short() {
        let content = data(1000);
        let out = copy_window(Cursor::new(&content), 998, 10, 1000).unwrap();
        assert_eq!(out, &content[998..]);
    }

    #[test]
    fn window_past_eof_is_empty() {
        let content = data(16);
        assert!(copy_window(Cursor::new(&content), 16, 8, 16).unwrap().is_empty());
        assert!(copy_window(Cursor::new(&content), 4096, 8, 16).unwrap().is_empty());
    }

    #[test]
    fn zero_length_window() {
        let content = data(16);
        assert!(copy_window(Cursor::new(&content), 3, 0, 16).unwrap().is_empty());
    }

    #[test]
    fn wrong_size_hint_does_not_truncate() {
        // The hint only sizes the buffer; the reader decides how much comes back.
        let content = data(64);
        let out = copy_window(Cursor::new(&content), 0, 64, 8).unwrap();
        assert_eq!(out, content);
    }
}
