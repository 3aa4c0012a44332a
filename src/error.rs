//! Error taxonomy for the changelog engine (§7 of the design).
//!
//! Each failure family gets its own `thiserror` enum; [`ChangelogError`] is the
//! top-level type returned by every public, fallible [`ChangelogEngine`](crate::ChangelogEngine)
//! method, with `#[from]` conversions from the family enums and from `std::io::Error`.

use std::io::Error as IoError;

use thiserror::Error;

/// A record failed one of the five invariants checked by [`crate::record::parse`], or could
/// not be encoded because a string field exceeded the on-disk bound.
#[derive(Error, Debug)]
pub enum RecordError {
    #[error("record magic {0:#018x} is neither the create-or-update nor the delete sentinel")]
    BadMagic(u64),
    #[error("CRC32 mismatch: computed {computed:#010x}, stored {stored:#010x}")]
    CrcMismatch { computed: u32, stored: u32 },
    #[error("sequence {sequence} does not exceed the previous sequence {previous}")]
    SequenceRegression { previous: u64, sequence: u64 },
    #[error("sequence header {header} does not match sequence trailer {trailer}")]
    HeaderTrailerMismatch { header: u64, trailer: u64 },
    #[error("field `{field}` is {len} bytes, exceeding the 255-byte on-disk bound")]
    FieldTooLong { field: &'static str, len: usize },
}

/// The log header failed to parse, or the log body is unsafe to replay.
#[derive(Error, Debug)]
pub enum LogError {
    #[error("header magic is wrong")]
    BadMagic,
    #[error("short read of {got} bytes while expecting a {want}-byte header")]
    HeaderShortRead { want: usize, got: usize },
    #[error("header version `{found}` does not match `{expected}`")]
    VersionMismatch { expected: &'static str, found: String },
    #[error("log is {size} bytes, exceeding the {cap}-byte sanity cap")]
    LogTooLarge { size: u64, cap: u64 },
    #[error("no changelog file for fsid {fsid} and `fsck_only` forbids creating one")]
    LogMissing { fsid: u32 },
    #[error("changelog header declares fsid {found}, but {expected} was requested")]
    FsidMismatch { expected: u32, found: u32 },
    #[error(transparent)]
    Io(#[from] IoError),
}

/// An index-level inconsistency.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("fid {fid} read back as fid {found_fid} (fsid {fsid} vs {found_fsid}) at offset {offset}")]
    CorruptRecord {
        fsid: u32,
        fid: u64,
        found_fsid: u32,
        found_fid: u64,
        offset: u64,
    },
}

/// A mutation (create, commit, delete) could not be completed.
#[derive(Error, Debug)]
pub enum MutError {
    #[error("fsid {fsid} has no open changelog")]
    NoOpenLog { fsid: u32 },
    #[error("fid {fid} not found on fsid {fsid}")]
    NotFound { fsid: u32, fid: u64 },
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error(transparent)]
    Corrupt(#[from] IndexError),
    #[error(transparent)]
    Io(#[from] IoError),
}

/// The env (wire) codec could not parse a peer's response.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("missing mandatory tag `{0}`")]
    MissingTag(&'static str),
    #[error("tag `{tag}` has malformed value `{value}`")]
    MalformedTag { tag: &'static str, value: String },
    #[error("base64 decode of checksum64 failed: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error(transparent)]
    Record(#[from] RecordError),
}

/// A peer fetch (C9) failed.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("transport error contacting peer: {0}")]
    Transport(String),
    #[error("peer has no record for the requested fid")]
    NotPresent,
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("peer returned fid {returned:#x}, requested {requested:#x}")]
    Mismatch { requested: u64, returned: u64 },
}

/// The trimmer (C7) aborted before installing the new log.
#[derive(Error, Debug)]
pub enum TrimError {
    #[error("offset {offset} was snapshotted before the tail boundary but has no mapping in the new log")]
    Inconsistent { offset: u64 },
    #[error(transparent)]
    Io(#[from] IoError),
}

/// The union of every failure family the engine can surface.
#[derive(Error, Debug)]
pub enum ChangelogError {
    #[error(transparent)]
    Log(#[from] LogError),
    #[error(transparent)]
    Mut(#[from] MutError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Trim(#[from] TrimError),
    #[error(transparent)]
    Io(#[from] IoError),
}

pub type Result<T, E = ChangelogError> = std::result::Result<T, E>;
