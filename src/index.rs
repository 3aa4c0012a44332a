//! Index (C5): the in-memory `(fsid, fid) → offset` map and its siblings.
//!
//! This module holds plain, unsynchronized data structures. Synchronization is the
//! responsibility of [`crate::engine::ChangelogEngine`], which guards one [`Index`] behind a
//! single `parking_lot::RwLock` per the concurrency model in §5 of the design — mirroring how
//! `anchored-leveldb` keeps its descriptor table and per-filesystem maps behind one rwlock
//! rather than scattering locks per map.

use std::collections::HashMap;

/// Everything the index tracks for one filesystem.
#[derive(Debug, Default, Clone)]
pub(crate) struct FsIndex {
    /// `fid -> offset` of the latest valid, live record.
    offsets: HashMap<u64, u64>,
    /// `fid -> last observed size`, cleared on delete.
    sizes: HashMap<u64, u64>,
    /// Largest sequence number seen so far; the next append uses `next_seq + 1`.
    next_seq: u64,
}

impl FsIndex {
    pub(crate) fn lookup(&self, fid: u64) -> Option<u64> {
        self.offsets.get(&fid).copied()
    }

    pub(crate) fn size_of(&self, fid: u64) -> Option<u64> {
        self.sizes.get(&fid).copied()
    }

    pub(crate) fn insert_or_update(&mut self, fid: u64, offset: u64, size: u64) {
        self.offsets.insert(fid, offset);
        self.sizes.insert(fid, size);
    }

    /// Removes `fid`, returning whether it was previously present (used to detect a
    /// double-delete: deleting a `fid` with no live entry).
    pub(crate) fn remove(&mut self, fid: u64) -> bool {
        self.sizes.remove(&fid);
        self.offsets.remove(&fid).is_some()
    }

    pub(crate) fn observe_sequence(&mut self, sequence: u64) {
        self.next_seq = self.next_seq.max(sequence);
    }

    pub(crate) fn current_sequence(&self) -> u64 {
        self.next_seq
    }

    /// Returns the next sequence number to stamp, advancing the counter.
    pub(crate) fn next_sequence(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    pub(crate) fn iter_offsets(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.offsets.iter().map(|(&fid, &offset)| (fid, offset))
    }

    pub(crate) fn len(&self) -> usize {
        self.offsets.len()
    }
}

/// The full `fsid -> FsIndex` index.
#[derive(Debug, Default)]
pub(crate) struct Index {
    per_fs: HashMap<u32, FsIndex>,
}

impl Index {
    pub(crate) fn fs(&mut self, fsid: u32) -> &mut FsIndex {
        self.per_fs.entry(fsid).or_default()
    }

    pub(crate) fn lookup(&self, fsid: u32, fid: u64) -> Option<u64> {
        self.per_fs.get(&fsid).and_then(|fs| fs.lookup(fid))
    }

    pub(crate) fn reset_fs(&mut self, fsid: u32) {
        self.per_fs.insert(fsid, FsIndex::default());
    }

    /// Read-only snapshot of one filesystem's index, used by the trimmer's bulk-copy phase so
    /// it can run without holding the write lock.
    pub(crate) fn snapshot_fs(&self, fsid: u32) -> FsIndex {
        self.per_fs.get(&fsid).cloned().unwrap_or_default()
    }
}
