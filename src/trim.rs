//! Trimmer (C7): online compaction of the active log to one record per live `fid`.
//!
//! Follows the two-phase rewrite of §4.7: the bulk copy runs without the write lock held, and
//! only the final splice-and-rename happens under it.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::TrimError;
use crate::header::{self, Header};
use crate::index::FsIndex;
use crate::log_manager::OpenLog;
use crate::naming::{self, ChangelogFileName};
use crate::record::RECORD_SIZE;

/// Offsets snapshotted before the bulk copy began, ready to translate once it completes.
pub(crate) struct TrimSnapshot {
    tmp_path: PathBuf,
    tail_before: u64,
    translation: HashMap<u64, u64>,
    new_len_after_bulk: u64,
}

/// Phase 1 (§4.7 steps 1-3): snapshot live offsets, copy each live record into a fresh file.
/// Does not touch the engine's write lock; the caller drops it before calling this.
pub(crate) fn bulk_copy(
    dir: &Path,
    fsid: u32,
    created_at: u64,
    old_read_fd: &File,
    old_header: Header,
    index_snapshot: &FsIndex,
    tail_before: u64,
) -> Result<TrimSnapshot, TrimError> {
    let tmp_path = dir.join(format!(
        "{}.tmp",
        ChangelogFileName { created_at, fsid }.file_name()
    ));

    let mut new_file = OpenOptions::new()
        .create(true)
        .truncate(true)
        .read(true)
        .write(true)
        .open(&tmp_path)?;
    header::write(&mut new_file, &old_header)?;

    let mut old_reader = old_read_fd.try_clone()?;
    let mut translation = HashMap::new();
    let mut buf = [0_u8; RECORD_SIZE];

    let mut offsets: Vec<(u64, u64)> = index_snapshot.iter_offsets().collect();
    offsets.sort_by_key(|&(_, offset)| offset);

    for (_, old_offset) in offsets {
        old_reader.seek(SeekFrom::Start(old_offset))?;
        old_reader.read_exact(&mut buf)?;

        let new_offset = new_file.stream_position()?;
        new_file.write_all(&buf)?;
        translation.insert(old_offset, new_offset);
    }

    let new_len_after_bulk = new_file.stream_position()?;

    Ok(TrimSnapshot {
        tmp_path,
        tail_before,
        translation,
        new_len_after_bulk,
    })
}

/// Phase 2 (§4.7 steps 4-7): splice the tail written during the bulk copy, rewrite the index,
/// rename the tmp file over the canonical path, and return the new [`OpenLog`] plus rewritten
/// `FsIndex`. Runs under the engine's write lock.
#[allow(clippy::too_many_arguments)]
pub(crate) fn finish(
    snapshot: TrimSnapshot,
    old_path: &Path,
    final_path: &Path,
    old_read_fd: &File,
    tail_now: u64,
    index: &FsIndex,
) -> Result<(File, File, FsIndex), TrimError> {
    let TrimSnapshot {
        tmp_path,
        tail_before,
        translation,
        new_len_after_bulk,
    } = snapshot;

    let mut new_file = OpenOptions::new().read(true).write(true).open(&tmp_path)?;
    new_file.seek(SeekFrom::Start(new_len_after_bulk))?;

    let tail_len = tail_now.saturating_sub(tail_before);
    if tail_len > 0 {
        let mut old_reader = old_read_fd.try_clone()?;
        old_reader.seek(SeekFrom::Start(tail_before))?;
        let mut tail = vec![0_u8; tail_len as usize];
        old_reader.read_exact(&mut tail)?;
        new_file.write_all(&tail)?;
    }

    let shift = tail_before.checked_sub(new_len_after_bulk).ok_or(TrimError::Inconsistent { offset: tail_before })?;

    let mut rewritten = FsIndex::default();
    rewritten.observe_sequence(index.current_sequence());
    for (fid, old_offset) in index.iter_offsets() {
        let new_offset = if old_offset >= tail_before {
            old_offset - shift
        } else {
            *translation
                .get(&old_offset)
                .ok_or(TrimError::Inconsistent { offset: old_offset })?
        };
        let size = index.size_of(fid).unwrap_or(0);
        rewritten.insert_or_update(fid, new_offset, size);
    }

    new_file.sync_all()?;
    std::fs::rename(&tmp_path, final_path)?;
    if final_path != old_path {
        let _ = std::fs::remove_file(old_path);
    }

    let read_fd = OpenOptions::new().read(true).open(final_path)?;
    let mut append_fd = OpenOptions::new().append(true).open(final_path)?;
    append_fd.seek(SeekFrom::End(0))?;

    Ok((read_fd, append_fd, rewritten))
}

/// Builds the canonical final path for a freshly trimmed log.
pub(crate) fn final_path_for(dir: &Path, fsid: u32, created_at: u64) -> PathBuf {
    naming::new_path_for_fsid(dir, fsid, created_at)
}

/// Convenience used by [`crate::engine`] to read the log header ahead of a trim.
pub(crate) fn open_log_header(open_log: &OpenLog, force_version: bool) -> Result<Header, crate::error::LogError> {
    let mut fd = OpenOptions::new().read(true).open(&open_log.path)?;
    header::read(&mut fd, force_version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{serialize, FmdRecord, Magic};
    use std::io::Write as _;

    fn record(fid: u64, seq: u64) -> FmdRecord {
        FmdRecord {
            magic: Magic::CreateOrUpdate,
            sequence_header: seq,
            fid,
            cid: 1,
            fsid: 7,
            ctime: 1,
            ctime_ns: 0,
            mtime: 1,
            mtime_ns: 0,
            size: 10,
            layout_id: 0,
            uid: 0,
            gid: 0,
            name: "f".into(),
            container: "/".into(),
            checksum: [0; 20],
            crc32: 0,
            sequence_trailer: seq,
        }
    }

    #[test]
    fn bulk_copy_and_finish_preserve_live_records() {
        let dir = tempfile::tempdir().unwrap();
        let old_path = dir.path().join("fmd.100.0007.mdlog");
        let old_header = Header { ctime: 100, fsid: 7 };

        let mut old_file = OpenOptions::new().create(true).read(true).write(true).open(&old_path).unwrap();
        header::write(&mut old_file, &old_header).unwrap();

        let header_size = crate::header::HEADER_SIZE as u64;
        let mut offsets = Vec::new();
        let mut offset = header_size;
        for seq in 1..=3 {
            old_file.write_all(&serialize(&record(seq, seq)).unwrap()).unwrap();
            offsets.push((seq, offset));
            offset += RECORD_SIZE as u64;
        }
        // fid 2 gets deleted, so only fid 1 and 3 are "live" in this snapshot.
        let mut live = FsIndex::default();
        live.insert_or_update(1, offsets[0].1, 10);
        live.insert_or_update(3, offsets[2].1, 10);
        live.observe_sequence(3);

        let tail_before = old_file.stream_position().unwrap();
        let old_read_fd = OpenOptions::new().read(true).open(&old_path).unwrap();

        let snapshot = bulk_copy(dir.path(), 7, 200, &old_read_fd, old_header, &live, tail_before).unwrap();

        // No concurrent append happened, so the tail is empty.
        let final_path = final_path_for(dir.path(), 7, 200);
        let (_, _, rewritten) = finish(snapshot, &old_path, &final_path, &old_read_fd, tail_before, &live).unwrap();

        assert_eq!(rewritten.len(), 2);
        assert!(rewritten.lookup(1).is_some());
        assert!(rewritten.lookup(3).is_some());
        assert!(final_path.exists());
        assert!(!old_path.exists());
    }
}
