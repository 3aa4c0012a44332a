//! Record codec (C1): the fixed-width, CRC-protected FMD record.
//!
//! On disk, every field is little-endian and the record has a single compile-time size,
//! [`RECORD_SIZE`]. This mirrors `anchored-leveldb`'s `format.rs` approach of pairing a
//! manually-encoded byte layout with a typed, validated in-memory representation.

use crate::error::RecordError;

/// Create-or-update sentinel. Chosen arbitrarily but stably; any value distinct from
/// [`DELETE_MAGIC`] would do, since the two constants are opaque tags, not flags.
pub const CREATE_MAGIC: u64 = 0x4649_4c45_4d44_4301; // "FILEMDC\x01"-ish, for readability in hex dumps
/// Delete sentinel.
pub const DELETE_MAGIC: u64 = 0x4649_4c45_4d44_4401; // "FILEMDD\x01"-ish

const NAME_FIELD_LEN: usize = 256;
const CHECKSUM_LEN: usize = 20;

/// Total on-disk size of one record, in bytes.
pub const RECORD_SIZE: usize = 632;

const OFF_MAGIC: usize = 0;
const OFF_SEQ_HEADER: usize = 8;
const OFF_FID: usize = 16;
const OFF_CID: usize = 24;
const OFF_FSID: usize = 32;
const OFF_CTIME: usize = 36;
const OFF_CTIME_NS: usize = 44;
const OFF_MTIME: usize = 52;
const OFF_MTIME_NS: usize = 60;
const OFF_SIZE: usize = 68;
const OFF_LAYOUT_ID: usize = 76;
const OFF_UID: usize = 80;
const OFF_GID: usize = 84;
const OFF_NAME: usize = 88;
const OFF_CONTAINER: usize = OFF_NAME + NAME_FIELD_LEN;
const OFF_CHECKSUM: usize = OFF_CONTAINER + NAME_FIELD_LEN;
const OFF_CRC32: usize = OFF_CHECKSUM + CHECKSUM_LEN;
const OFF_SEQ_TRAILER: usize = OFF_CRC32 + 4;

const _: () = assert!(OFF_SEQ_TRAILER + 8 == RECORD_SIZE);

/// The byte range covered by the CRC: everything except `magic`, `crc32` itself, and the
/// trailing `sequence_trailer` (record invariant 2).
const CRC_RANGE: std::ops::Range<usize> = OFF_SEQ_HEADER..OFF_CRC32;

/// Whether a record announces a file's creation/update, or its deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Magic {
    CreateOrUpdate,
    Delete,
}

impl Magic {
    fn to_bits(self) -> u64 {
        match self {
            Self::CreateOrUpdate => CREATE_MAGIC,
            Self::Delete => DELETE_MAGIC,
        }
    }

    fn from_bits(bits: u64) -> Result<Self, RecordError> {
        match bits {
            CREATE_MAGIC => Ok(Self::CreateOrUpdate),
            DELETE_MAGIC => Ok(Self::Delete),
            other => Err(RecordError::BadMagic(other)),
        }
    }
}

/// An in-memory FMD record. See §3 of the design for field semantics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FmdRecord {
    pub magic: Magic,
    pub sequence_header: u64,
    pub fid: u64,
    pub cid: u64,
    pub fsid: u32,
    pub ctime: u64,
    pub ctime_ns: u64,
    pub mtime: u64,
    pub mtime_ns: u64,
    pub size: u64,
    pub layout_id: u32,
    pub uid: u32,
    pub gid: u32,
    pub name: String,
    pub container: String,
    pub checksum: [u8; CHECKSUM_LEN],
    pub crc32: u32,
    pub sequence_trailer: u64,
}

impl FmdRecord {
    #[must_use]
    pub fn is_create_or_update(&self) -> bool {
        self.magic == Magic::CreateOrUpdate
    }

    #[must_use]
    pub fn is_delete(&self) -> bool {
        self.magic == Magic::Delete
    }

    /// Sets `magic := Delete` and `size := 0`, in place.
    pub fn mark_deleted(&mut self) {
        self.magic = Magic::Delete;
        self.size = 0;
    }
}

/// Writes a bounded ASCII field (`name`/`container`) into a fixed `NAME_FIELD_LEN`-byte,
/// NUL-terminated slot.
fn write_bounded(field: &'static str, value: &str, out: &mut [u8]) -> Result<(), RecordError> {
    let bytes = value.as_bytes();
    if bytes.len() >= NAME_FIELD_LEN {
        return Err(RecordError::FieldTooLong {
            field,
            len: bytes.len(),
        });
    }
    out[..bytes.len()].copy_from_slice(bytes);
    out[bytes.len()..].fill(0);
    Ok(())
}

fn read_bounded(slot: &[u8]) -> String {
    let nul = slot.iter().position(|&b| b == 0).unwrap_or(slot.len());
    String::from_utf8_lossy(&slot[..nul]).into_owned()
}

/// Encodes `record` into a fresh [`RECORD_SIZE`]-byte buffer, computing `crc32` from the
/// covered byte range and setting `sequence_trailer := sequence_header`.
pub(crate) fn serialize(record: &FmdRecord) -> Result<[u8; RECORD_SIZE], RecordError> {
    let mut buf = [0_u8; RECORD_SIZE];

    buf[OFF_MAGIC..OFF_MAGIC + 8].copy_from_slice(&record.magic.to_bits().to_le_bytes());
    buf[OFF_SEQ_HEADER..OFF_SEQ_HEADER + 8].copy_from_slice(&record.sequence_header.to_le_bytes());
    buf[OFF_FID..OFF_FID + 8].copy_from_slice(&record.fid.to_le_bytes());
    buf[OFF_CID..OFF_CID + 8].copy_from_slice(&record.cid.to_le_bytes());
    buf[OFF_FSID..OFF_FSID + 4].copy_from_slice(&record.fsid.to_le_bytes());
    buf[OFF_CTIME..OFF_CTIME + 8].copy_from_slice(&record.ctime.to_le_bytes());
    buf[OFF_CTIME_NS..OFF_CTIME_NS + 8].copy_from_slice(&record.ctime_ns.to_le_bytes());
    buf[OFF_MTIME..OFF_MTIME + 8].copy_from_slice(&record.mtime.to_le_bytes());
    buf[OFF_MTIME_NS..OFF_MTIME_NS + 8].copy_from_slice(&record.mtime_ns.to_le_bytes());
    buf[OFF_SIZE..OFF_SIZE + 8].copy_from_slice(&record.size.to_le_bytes());
    buf[OFF_LAYOUT_ID..OFF_LAYOUT_ID + 4].copy_from_slice(&record.layout_id.to_le_bytes());
    buf[OFF_UID..OFF_UID + 4].copy_from_slice(&record.uid.to_le_bytes());
    buf[OFF_GID..OFF_GID + 4].copy_from_slice(&record.gid.to_le_bytes());
    write_bounded("name", &record.name, &mut buf[OFF_NAME..OFF_NAME + NAME_FIELD_LEN])?;
    write_bounded(
        "container",
        &record.container,
        &mut buf[OFF_CONTAINER..OFF_CONTAINER + NAME_FIELD_LEN],
    )?;
    buf[OFF_CHECKSUM..OFF_CHECKSUM + CHECKSUM_LEN].copy_from_slice(&record.checksum);

    let crc = crc32fast::hash(&buf[CRC_RANGE]);
    buf[OFF_CRC32..OFF_CRC32 + 4].copy_from_slice(&crc.to_le_bytes());
    buf[OFF_SEQ_TRAILER..OFF_SEQ_TRAILER + 8].copy_from_slice(&record.sequence_header.to_le_bytes());

    Ok(buf)
}

/// Parses a [`RECORD_SIZE`]-byte slot, validating all five record invariants against
/// `previous_sequence`, the last valid sequence number seen in this log (pass `0` at the
/// start of a log, since sequence numbers are strictly positive after the first append).
pub(crate) fn parse(bytes: &[u8; RECORD_SIZE], previous_sequence: u64) -> Result<FmdRecord, RecordError> {
    let magic = Magic::from_bits(u64::from_le_bytes(bytes[OFF_MAGIC..OFF_MAGIC + 8].try_into().unwrap()))?;

    let crc_stored = u32::from_le_bytes(bytes[OFF_CRC32..OFF_CRC32 + 4].try_into().unwrap());
    let crc_computed = crc32fast::hash(&bytes[CRC_RANGE]);
    if crc_computed != crc_stored {
        return Err(RecordError::CrcMismatch {
            computed: crc_computed,
            stored: crc_stored,
        });
    }

    let sequence_header = u64::from_le_bytes(bytes[OFF_SEQ_HEADER..OFF_SEQ_HEADER + 8].try_into().unwrap());
    let sequence_trailer = u64::from_le_bytes(bytes[OFF_SEQ_TRAILER..OFF_SEQ_TRAILER + 8].try_into().unwrap());
    if sequence_header != sequence_trailer {
        return Err(RecordError::HeaderTrailerMismatch {
            header: sequence_header,
            trailer: sequence_trailer,
        });
    }

    if sequence_header <= previous_sequence {
        return Err(RecordError::SequenceRegression {
            previous: previous_sequence,
            sequence: sequence_header,
        });
    }

    let mut checksum = [0_u8; CHECKSUM_LEN];
    checksum.copy_from_slice(&bytes[OFF_CHECKSUM..OFF_CHECKSUM + CHECKSUM_LEN]);

    Ok(FmdRecord {
        magic,
        sequence_header,
        fid: u64::from_le_bytes(bytes[OFF_FID..OFF_FID + 8].try_into().unwrap()),
        cid: u64::from_le_bytes(bytes[OFF_CID..OFF_CID + 8].try_into().unwrap()),
        fsid: u32::from_le_bytes(bytes[OFF_FSID..OFF_FSID + 4].try_into().unwrap()),
        ctime: u64::from_le_bytes(bytes[OFF_CTIME..OFF_CTIME + 8].try_into().unwrap()),
        ctime_ns: u64::from_le_bytes(bytes[OFF_CTIME_NS..OFF_CTIME_NS + 8].try_into().unwrap()),
        mtime: u64::from_le_bytes(bytes[OFF_MTIME..OFF_MTIME + 8].try_into().unwrap()),
        mtime_ns: u64::from_le_bytes(bytes[OFF_MTIME_NS..OFF_MTIME_NS + 8].try_into().unwrap()),
        size: u64::from_le_bytes(bytes[OFF_SIZE..OFF_SIZE + 8].try_into().unwrap()),
        layout_id: u32::from_le_bytes(bytes[OFF_LAYOUT_ID..OFF_LAYOUT_ID + 4].try_into().unwrap()),
        uid: u32::from_le_bytes(bytes[OFF_UID..OFF_UID + 4].try_into().unwrap()),
        gid: u32::from_le_bytes(bytes[OFF_GID..OFF_GID + 4].try_into().unwrap()),
        name: read_bounded(&bytes[OFF_NAME..OFF_NAME + NAME_FIELD_LEN]),
        container: read_bounded(&bytes[OFF_CONTAINER..OFF_CONTAINER + NAME_FIELD_LEN]),
        checksum,
        crc32: crc_stored,
        sequence_trailer,
    })
}
