//! Recovery / replay scanner (C4).
//!
//! Scans an already-header-validated log start-to-end with a buffered sequential reader.
//! Per the Design Notes, this satisfies the same contract as memory-mapping the whole log —
//! the scan never needs random access — without re-imposing the 6 GiB cap that an mmap'd
//! scan would otherwise require.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};

use crate::error::LogError;
use crate::header::HEADER_SIZE;
use crate::index::FsIndex;
use crate::record::{self, RecordError, RECORD_SIZE};

/// Per-class error counts produced by one replay pass, plus overall bookkeeping.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReplayStats {
    pub checked: u64,
    pub bad_magic: u64,
    pub crc_mismatch: u64,
    pub sequence_regression: u64,
    pub header_trailer_mismatch: u64,
    pub double_delete: u64,
    pub truncated_tail: bool,
}

impl ReplayStats {
    /// A replay pass is successful (per §4.4 step 5) only if zero faulty records were found.
    /// A truncated tail is not a faulty record — it is the expected shape of a log whose last
    /// append did not complete before an unclean shutdown (property 6).
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.bad_magic == 0
            && self.crc_mismatch == 0
            && self.sequence_regression == 0
            && self.header_trailer_mismatch == 0
    }

    fn record_error(&mut self, err: &RecordError) {
        match err {
            RecordError::BadMagic(_) => self.bad_magic += 1,
            RecordError::CrcMismatch { .. } => self.crc_mismatch += 1,
            RecordError::SequenceRegression { .. } => self.sequence_regression += 1,
            RecordError::HeaderTrailerMismatch { .. } => self.header_trailer_mismatch += 1,
            RecordError::FieldTooLong { .. } => {
                // `parse` never produces this variant; only `serialize` does.
            }
        }
    }
}

/// Scans `file` (already positioned past a validated header is not required; this function
/// seeks explicitly) and rebuilds `index` in place.
///
/// `max_log_bytes` is enforced against the file's current size before any scanning begins.
pub(crate) fn replay(
    file: &File,
    max_log_bytes: u64,
    dump: bool,
    index: &mut FsIndex,
) -> Result<ReplayStats, LogError> {
    let size = file.metadata()?.len();
    if size > max_log_bytes {
        return Err(LogError::LogTooLarge { size, cap: max_log_bytes });
    }

    let mut stats = ReplayStats::default();
    let header_size = HEADER_SIZE as u64;
    if size <= header_size {
        tracing::debug!("changelog is empty past the header, nothing to replay");
        return Ok(stats);
    }

    let mut reader = BufReader::new(file.try_clone()?);
    reader.seek(SeekFrom::Start(header_size))?;

    let mut offset = header_size;
    let mut last_valid_sequence = 0_u64;
    let mut buf = [0_u8; RECORD_SIZE];

    loop {
        let mut got = 0;
        while got < RECORD_SIZE {
            match reader.read(&mut buf[got..])? {
                0 => break,
                n => got += n,
            }
        }

        if got == 0 {
            break;
        }
        if got < RECORD_SIZE {
            tracing::debug!(offset, got, "truncated trailing record, stopping replay");
            stats.truncated_tail = true;
            break;
        }

        stats.checked += 1;
        match record::parse(&buf, last_valid_sequence) {
            Ok(rec) => {
                last_valid_sequence = last_valid_sequence.max(rec.sequence_header);

                if dump {
                    tracing::info!(
                        fid = rec.fid, fsid = rec.fsid, sequence = rec.sequence_header,
                        magic = ?rec.magic, size = rec.size, offset,
                        "replayed record",
                    );
                }

                if rec.is_delete() {
                    if !index.remove(rec.fid) {
                        tracing::warn!(fid = rec.fid, sequence = rec.sequence_header, "double deletion detected");
                        stats.double_delete += 1;
                    }
                } else {
                    index.insert_or_update(rec.fid, offset, rec.size);
                }
            }
            Err(err) => {
                tracing::error!(offset, error = %err, "corrupt record during replay");
                stats.record_error(&err);
            }
        }

        offset += RECORD_SIZE as u64;
    }

    index.observe_sequence(last_valid_sequence);
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header;
    use crate::record::{FmdRecord, Magic};
    use std::fs::OpenOptions;
    use std::io::Write as _;

    fn base_record(fid: u64, sequence: u64) -> FmdRecord {
        FmdRecord {
            magic: Magic::CreateOrUpdate,
            sequence_header: sequence,
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
            sequence_trailer: sequence,
        }
    }

    fn log_with_records(records: &[FmdRecord]) -> File {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.mdlog");
        std::mem::forget(dir);
        let mut file = OpenOptions::new().create(true).read(true).write(true).truncate(true).open(&path).unwrap();
        header::write(&mut file, &header::Header { ctime: 1, fsid: 7 }).unwrap();
        for r in records {
            file.write_all(&record::serialize(r).unwrap()).unwrap();
        }
        file
    }

    #[test]
    fn empty_log_replays_cleanly() {
        let file = log_with_records(&[]);
        let mut idx = FsIndex::default();
        let stats = replay(&file, u64::MAX, false, &mut idx).unwrap();
        assert!(stats.is_clean());
        assert_eq!(idx.len(), 0);
    }

    #[test]
    fn create_update_delete_sequence() {
        let file = log_with_records(&[
            base_record(1, 1),
            { let mut r = base_record(1, 2); r.size = 20; r },
            { let mut r = base_record(1, 3); r.mark_deleted(); r },
        ]);
        let mut idx = FsIndex::default();
        let stats = replay(&file, u64::MAX, false, &mut idx).unwrap();
        assert!(stats.is_clean());
        assert_eq!(idx.lookup(1), None);
        assert_eq!(idx.current_sequence(), 3);
    }

    #[test]
    fn corrupted_middle_record_is_counted_and_skipped() {
        let records: Vec<_> = (1..=10).map(|seq| base_record(seq, seq)).collect();
        let file = log_with_records(&records);

        // Zero out the crc32 field of the 5th record.
        let crc_off = HEADER_SIZE as u64 + 4 * RECORD_SIZE as u64 + 620;
        let mut file = file;
        file.seek(SeekFrom::Start(crc_off)).unwrap();
        file.write_all(&[0_u8; 4]).unwrap();

        let mut idx = FsIndex::default();
        let stats = replay(&file, u64::MAX, false, &mut idx).unwrap();
        assert_eq!(stats.crc_mismatch, 1);
        assert!(!stats.is_clean());
        assert_eq!(idx.len(), 9);
    }

    #[test]
    fn truncated_tail_still_indexes_prior_records() {
        let records: Vec<_> = (1..=3).map(|seq| base_record(seq, seq)).collect();
        let file = log_with_records(&records);
        let full_len = file.metadata().unwrap().len();
        file.set_len(full_len - 10).unwrap();

        let mut idx = FsIndex::default();
        let stats = replay(&file, u64::MAX, false, &mut idx).unwrap();
        assert!(stats.truncated_tail);
        assert!(stats.is_clean());
        assert_eq!(idx.len(), 2);
        assert_eq!(idx.lookup(3), None);
        assert!(idx.lookup(1).is_some() && idx.lookup(2).is_some());
    }

    #[test]
    fn double_delete_is_a_warning_not_a_fault() {
        let file = log_with_records(&[
            { let mut r = base_record(1, 1); r.mark_deleted(); r },
        ]);
        let mut idx = FsIndex::default();
        let stats = replay(&file, u64::MAX, false, &mut idx).unwrap();
        assert_eq!(stats.double_delete, 1);
        assert!(stats.is_clean());
    }

    #[test]
    fn oversized_log_is_rejected() {
        let file = log_with_records(&[base_record(1, 1)]);
        let mut idx = FsIndex::default();
        assert!(matches!(replay(&file, 1, false, &mut idx), Err(LogError::LogTooLarge { .. })));
    }
}
