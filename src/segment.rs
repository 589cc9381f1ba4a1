//! A segment is one append-only file plus an in-memory index mapping each key
//! to the byte offset of its most recent record within that file.
//!
//! The last segment of a store's set is the active one and keeps receiving
//! appends; every earlier segment is frozen. Old versions of a key stay in
//! the file as dead bytes until compaction rewrites the frozen prefix.
//!
//! Each segment keeps a read handle open for its whole lifetime and serves
//! positioned reads through it. A reader that found its offset just before a
//! compaction swapped the segment away can still finish: the unlinked file
//! stays readable through the handle.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::error::Result;
use crate::record;

pub struct Segment {
    id: u64,
    path: PathBuf,
    file: File,
    index: RwLock<HashMap<String, u64>>,
}

impl Segment {
    /// Opens a read handle on the segment file at `path`, which must already
    /// exist, and starts with an empty index.
    pub fn open(path: PathBuf, id: u64) -> Result<Self> {
        let file = File::open(&path)?;
        Ok(Self {
            id,
            path,
            file,
            index: RwLock::new(HashMap::new()),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Points `key` at the record beginning at `offset`. A later write to the
    /// same key replaces the entry; the older record stays in the file.
    pub fn insert(&self, key: String, offset: u64) {
        self.index.write().unwrap().insert(key, offset);
    }

    /// Offset of the most recent record for `key` within this segment.
    pub fn lookup(&self, key: &str) -> Option<u64> {
        self.index.read().unwrap().get(key).copied()
    }

    /// Number of keys this segment indexes.
    pub fn len(&self) -> usize {
        self.index.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.read().unwrap().is_empty()
    }

    /// Snapshot of the index, taken under the read lock. Compaction walks
    /// this instead of holding the lock across file reads.
    pub fn entries(&self) -> Vec<(String, u64)> {
        self.index
            .read()
            .unwrap()
            .iter()
            .map(|(key, offset)| (key.clone(), *offset))
            .collect()
    }

    /// Positioned read: streams one record's value starting at `offset`,
    /// verifying its digest. The caller must already hold a trusted offset;
    /// the index is not consulted.
    pub fn read_at(&self, offset: u64) -> Result<String> {
        let reader = SegmentReader {
            file: &self.file,
            offset,
        };
        record::read_value(&mut BufReader::new(reader))
    }
}

/// Sequential reader over the segment's shared handle. Every read is
/// positional, so concurrent readers never fight over a file cursor.
struct SegmentReader<'a> {
    file: &'a File,
    offset: u64,
}

impl Read for SegmentReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = read_at(self.file, buf, self.offset)?;
        self.offset += n as u64;
        Ok(n)
    }
}

#[cfg(unix)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buf, offset)
}

#[cfg(windows)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buf, offset)
}
