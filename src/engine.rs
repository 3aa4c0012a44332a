//! Engine facade (C13) and mutation API (C6).
//!
//! `ChangelogEngine` is the value type external collaborators hold. Internally it is an
//! `Arc<RwLock<EngineState>>`, cloned cheaply to share across request-handling threads — the
//! same shape `anchored-leveldb` uses for its descriptor/table guard.

use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;

use crate::config::ChangelogOptions;
use crate::error::{IndexError, MutError, TrimError};
use crate::index::Index;
use crate::log_manager::{self, OpenLog};
use crate::record::{self, FmdRecord, Magic, RECORD_SIZE};
use crate::recovery::ReplayStats;
use crate::trim;

struct EngineState {
    logs: HashMap<u32, OpenLog>,
    index: Index,
}

/// Shared handle to the changelog engine for every local filesystem this node serves.
#[derive(Clone)]
pub struct ChangelogEngine {
    options: ChangelogOptions,
    state: Arc<RwLock<EngineState>>,
}

impl std::fmt::Debug for ChangelogEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangelogEngine")
            .field("changelog_dir", &self.options.changelog_dir())
            .finish_non_exhaustive()
    }
}

fn now() -> (u64, u64) {
    let since_epoch = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    (since_epoch.as_secs(), u64::from(since_epoch.subsec_nanos()))
}

impl ChangelogEngine {
    /// Creates an engine with no filesystems attached yet. Call [`Self::attach`] per `fsid`
    /// before using [`Self::get_or_create`] and friends for it.
    #[must_use]
    pub fn open(options: ChangelogOptions) -> Self {
        Self {
            options,
            state: Arc::new(RwLock::new(EngineState {
                logs: HashMap::new(),
                index: Index::default(),
            })),
        }
    }

    /// Attaches the newest changelog for `fsid` (or creates one), replaying it into the index.
    pub fn attach(&self, fsid: u32) -> Result<ReplayStats, crate::error::LogError> {
        let mut state = self.state.write();
        state.index.reset_fs(fsid);
        let (open_log, stats) = log_manager::attach_latest(&self.options, fsid, state.index.fs(fsid))?;
        state.logs.insert(fsid, open_log);
        Ok(stats)
    }

    /// Looks up the current record offset for `(fsid, fid)`, if any (read-lock path).
    #[must_use]
    pub fn lookup(&self, fsid: u32, fid: u64) -> Option<u64> {
        self.state.read().index.lookup(fsid, fid)
    }

    fn read_record_at(open_log: &OpenLog, offset: u64) -> std::io::Result<FmdRecord> {
        let mut fd = open_log.read_fd.try_clone()?;
        fd.seek(SeekFrom::Start(offset))?;
        let mut buf = [0_u8; RECORD_SIZE];
        fd.read_exact(&mut buf)?;
        // The caller already trusts this offset came from the index, which only stores
        // offsets of records this engine itself validated; ignore the sequence check here.
        record::parse(&buf, 0).map_err(|err| std::io::Error::other(err.to_string()))
    }

    fn append_record(open_log: &mut OpenLog, record: &FmdRecord) -> Result<u64, MutError> {
        let bytes = record::serialize(record)?;
        let offset = open_log.append_fd.stream_position()?;
        open_log.append_fd.write_all(&bytes)?;
        Ok(offset)
    }

    /// Returns the live record for `(fsid, fid)`, or creates one when `writable` and absent.
    pub fn get_or_create(
        &self,
        fsid: u32,
        fid: u64,
        uid: u32,
        gid: u32,
        layout_id: u32,
        writable: bool,
    ) -> Result<FmdRecord, MutError> {
        let mut state = self.state.write();

        if let Some(offset) = state.index.lookup(fsid, fid) {
            let open_log = state.logs.get(&fsid).ok_or(MutError::NoOpenLog { fsid })?;
            let existing = Self::read_record_at(open_log, offset)?;
            if existing.fid != fid || existing.fsid != fsid {
                return Err(MutError::Corrupt(IndexError::CorruptRecord {
                    fsid,
                    fid,
                    found_fsid: existing.fsid,
                    found_fid: existing.fid,
                    offset,
                }));
            }
            return Ok(existing);
        }

        if !writable {
            return Err(MutError::NotFound { fsid, fid });
        }

        let (ctime, ctime_ns) = now();
        let sequence = state.index.fs(fsid).next_sequence();
        let new_record = FmdRecord {
            magic: Magic::CreateOrUpdate,
            sequence_header: sequence,
            fid,
            cid: 0,
            fsid,
            ctime,
            ctime_ns,
            mtime: ctime,
            mtime_ns: ctime_ns,
            size: 0,
            layout_id,
            uid,
            gid,
            name: String::new(),
            container: String::new(),
            checksum: [0_u8; 20],
            crc32: 0,
            sequence_trailer: sequence,
        };

        let open_log = state.logs.get_mut(&fsid).ok_or(MutError::NoOpenLog { fsid })?;
        let offset = Self::append_record(open_log, &new_record)?;
        state.index.fs(fsid).insert_or_update(fid, offset, new_record.size);

        tracing::debug!(fsid, fid, sequence, "created new fmd record");
        Ok(new_record)
    }

    /// Persists an updated record: refreshes `mtime`, stamps a fresh sequence, appends, and
    /// updates the index.
    pub fn commit(&self, mut fmd: FmdRecord) -> Result<(), MutError> {
        let mut state = self.state.write();
        let fsid = fmd.fsid;

        let (mtime, mtime_ns) = now();
        fmd.mtime = mtime;
        fmd.mtime_ns = mtime_ns;
        let sequence = state.index.fs(fsid).next_sequence();
        fmd.sequence_header = sequence;
        fmd.sequence_trailer = sequence;

        let open_log = state.logs.get_mut(&fsid).ok_or(MutError::NoOpenLog { fsid })?;
        let offset = Self::append_record(open_log, &fmd)?;
        state.index.fs(fsid).insert_or_update(fmd.fid, offset, fmd.size);

        tracing::debug!(fsid, fid = fmd.fid, sequence, "committed fmd record");
        Ok(())
    }

    /// Reads the current record, rewrites it as a deletion, appends, and erases the index entry.
    pub fn delete(&self, fsid: u32, fid: u64) -> Result<(), MutError> {
        let mut state = self.state.write();

        let Some(offset) = state.index.lookup(fsid, fid) else {
            tracing::warn!(fsid, fid, "deleting fid with no live index entry");
            return Ok(());
        };

        let open_log = state.logs.get(&fsid).ok_or(MutError::NoOpenLog { fsid })?;
        let mut deleted = Self::read_record_at(open_log, offset)?;
        deleted.mark_deleted();
        let sequence = state.index.fs(fsid).next_sequence();
        deleted.sequence_header = sequence;
        deleted.sequence_trailer = sequence;

        let open_log = state.logs.get_mut(&fsid).ok_or(MutError::NoOpenLog { fsid })?;
        Self::append_record(open_log, &deleted)?;

        state.index.fs(fsid).remove(fid);
        Ok(())
    }

    /// Flushes every open log descriptor to stable storage.
    pub fn sync_all(&self) -> std::io::Result<()> {
        let state = self.state.read();
        for open_log in state.logs.values() {
            open_log.append_fd.sync_all()?;
        }
        Ok(())
    }

    /// Compacts the active log for `fsid` to one record per live `fid` (§4.7).
    pub fn trim(&self, fsid: u32) -> Result<(), TrimError> {
        let (old_path, old_read_fd, tail_before, index_snapshot, header) = {
            let state = self.state.read();
            let open_log = state.logs.get(&fsid).ok_or_else(|| TrimError::Io(std::io::Error::other(format!("no open log for fsid {fsid}"))))?;
            let header = trim::open_log_header(open_log, self.options.force_version)
                .map_err(|err| TrimError::Io(std::io::Error::other(err.to_string())))?;
            let tail_before = open_log.append_fd.try_clone()?.stream_position()?;
            let fs_index = state.index.snapshot_fs(fsid);
            (open_log.path.clone(), open_log.read_fd.try_clone()?, tail_before, fs_index, header)
        };

        let dir = self.options.changelog_dir();
        let created_at = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        let snapshot = trim::bulk_copy(dir, fsid, created_at, &old_read_fd, header, &index_snapshot, tail_before)?;

        let mut state = self.state.write();
        let open_log = state.logs.get(&fsid).ok_or_else(|| TrimError::Io(std::io::Error::other(format!("no open log for fsid {fsid}"))))?;
        let tail_now = open_log.append_fd.try_clone()?.stream_position()?;
        let final_path = trim::final_path_for(dir, fsid, created_at);
        let fs_index = state.index.fs(fsid);
        let (read_fd, append_fd, rewritten) = trim::finish(snapshot, &old_path, &final_path, &old_read_fd, tail_now, fs_index)?;

        state.logs.insert(fsid, OpenLog { path: final_path, read_fd, append_fd });
        *state.index.fs(fsid) = rewritten;

        tracing::info!(fsid, "trimmed changelog");
        Ok(())
    }
}
