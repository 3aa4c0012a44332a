//! Env (wire) codec (C8): serializes an [`FmdRecord`] as a URL-style key-value string for
//! peer-to-peer fetch (C9).

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::error::ParseError;
use crate::record::{FmdRecord, Magic};

const TAG_MAGIC: &str = "fmd.magic";
const TAG_SEQUENCE_HEADER: &str = "fmd.sequence_header";
const TAG_FID: &str = "fmd.fid";
const TAG_CID: &str = "fmd.cid";
const TAG_FSID: &str = "fmd.fsid";
const TAG_CTIME: &str = "fmd.ctime";
const TAG_CTIME_NS: &str = "fmd.ctime_ns";
const TAG_MTIME: &str = "fmd.mtime";
const TAG_MTIME_NS: &str = "fmd.mtime_ns";
const TAG_SIZE: &str = "fmd.size";
const TAG_CHECKSUM64: &str = "fmd.checksum64";
const TAG_LAYOUT_ID: &str = "fmd.layout_id";
const TAG_UID: &str = "fmd.uid";
const TAG_GID: &str = "fmd.gid";
const TAG_NAME: &str = "fmd.name";
const TAG_CONTAINER: &str = "fmd.container";
const TAG_CRC32: &str = "fmd.crc32";
const TAG_SEQUENCE_TRAILER: &str = "fmd.sequence_trailer";

fn magic_bits(magic: Magic) -> u64 {
    match magic {
        Magic::CreateOrUpdate => crate::record::CREATE_MAGIC,
        Magic::Delete => crate::record::DELETE_MAGIC,
    }
}

/// Percent-encodes `value` for use inside a `key=value&...` query string: only `&`, `=`, and
/// `%` need escaping, since every other field is numeric or already bounded ASCII without
/// those three bytes.
fn percent_encode(value: &str, out: &mut String) {
    for byte in value.bytes() {
        match byte {
            b'&' | b'=' | b'%' => out.push_str(&format!("%{byte:02X}")),
            _ => out.push(byte as char),
        }
    }
}

fn percent_decode(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(hex) = std::str::from_utf8(&bytes[i + 1..i + 3]) {
                if let Ok(decoded) = u8::from_str_radix(hex, 16) {
                    out.push(decoded);
                    i += 3;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Encodes `record` as an opaque query string, e.g. `fmd.fid=26&fmd.fsid=7&...`.
#[must_use]
pub fn env_encode(record: &FmdRecord) -> String {
    let checksum64 = BASE64.encode(record.checksum);
    let mut name = String::new();
    percent_encode(&record.name, &mut name);
    let mut container = String::new();
    percent_encode(&record.container, &mut container);

    format!(
        "{TAG_MAGIC}={magic}&{TAG_SEQUENCE_HEADER}={seq_h}&{TAG_FID}={fid}&{TAG_CID}={cid}&\
         {TAG_FSID}={fsid}&{TAG_CTIME}={ctime}&{TAG_CTIME_NS}={ctime_ns}&{TAG_MTIME}={mtime}&\
         {TAG_MTIME_NS}={mtime_ns}&{TAG_SIZE}={size}&{TAG_CHECKSUM64}={checksum64}&\
         {TAG_LAYOUT_ID}={layout_id}&{TAG_UID}={uid}&{TAG_GID}={gid}&{TAG_NAME}={name}&\
         {TAG_CONTAINER}={container}&{TAG_CRC32}={crc32}&{TAG_SEQUENCE_TRAILER}={seq_t}",
        magic = magic_bits(record.magic),
        seq_h = record.sequence_header,
        fid = record.fid,
        cid = record.cid,
        fsid = record.fsid,
        ctime = record.ctime,
        ctime_ns = record.ctime_ns,
        mtime = record.mtime,
        mtime_ns = record.mtime_ns,
        size = record.size,
        layout_id = record.layout_id,
        uid = record.uid,
        gid = record.gid,
        crc32 = record.crc32,
        seq_t = record.sequence_trailer,
    )
}

fn parse_u64(tags: &std::collections::HashMap<&str, &str>, tag: &'static str) -> Result<u64, ParseError> {
    tags.get(tag)
        .ok_or(ParseError::MissingTag(tag))?
        .parse()
        .map_err(|_| ParseError::MalformedTag { tag, value: (*tags.get(tag).unwrap()).to_owned() })
}

fn parse_u32(tags: &std::collections::HashMap<&str, &str>, tag: &'static str) -> Result<u32, ParseError> {
    tags.get(tag)
        .ok_or(ParseError::MissingTag(tag))?
        .parse()
        .map_err(|_| ParseError::MalformedTag { tag, value: (*tags.get(tag).unwrap()).to_owned() })
}

/// Parses an env-encoded record. Every tag listed in §4.8 is mandatory except `fmd.name`
/// and `fmd.container`, which default to the empty string.
pub fn env_parse(env: &str) -> Result<FmdRecord, ParseError> {
    let mut tags = std::collections::HashMap::new();
    for pair in env.split('&').filter(|s| !s.is_empty()) {
        if let Some((key, value)) = pair.split_once('=') {
            tags.insert(key, value);
        }
    }

    let magic_bits = parse_u64(&tags, TAG_MAGIC)?;
    let magic = match magic_bits {
        bits if bits == crate::record::CREATE_MAGIC => Magic::CreateOrUpdate,
        bits if bits == crate::record::DELETE_MAGIC => Magic::Delete,
        other => {
            return Err(ParseError::MalformedTag {
                tag: TAG_MAGIC,
                value: other.to_string(),
            })
        }
    };

    let checksum64 = tags.get(TAG_CHECKSUM64).ok_or(ParseError::MissingTag(TAG_CHECKSUM64))?;
    let decoded = BASE64.decode(checksum64)?;
    let checksum: [u8; 20] = decoded.try_into().map_err(|decoded: Vec<u8>| ParseError::MalformedTag {
        tag: TAG_CHECKSUM64,
        value: format!("{} bytes, expected 20", decoded.len()),
    })?;

    Ok(FmdRecord {
        magic,
        sequence_header: parse_u64(&tags, TAG_SEQUENCE_HEADER)?,
        fid: parse_u64(&tags, TAG_FID)?,
        cid: parse_u64(&tags, TAG_CID)?,
        fsid: parse_u32(&tags, TAG_FSID)?,
        ctime: parse_u64(&tags, TAG_CTIME)?,
        ctime_ns: parse_u64(&tags, TAG_CTIME_NS)?,
        mtime: parse_u64(&tags, TAG_MTIME)?,
        mtime_ns: parse_u64(&tags, TAG_MTIME_NS)?,
        size: parse_u64(&tags, TAG_SIZE)?,
        layout_id: parse_u32(&tags, TAG_LAYOUT_ID)?,
        uid: parse_u32(&tags, TAG_UID)?,
        gid: parse_u32(&tags, TAG_GID)?,
        name: tags.get(TAG_NAME).map(|s| percent_decode(s)).unwrap_or_default(),
        container: tags.get(TAG_CONTAINER).map(|s| percent_decode(s)).unwrap_or_default(),
        checksum,
        crc32: parse_u32(&tags, TAG_CRC32)?,
        sequence_trailer: parse_u64(&tags, TAG_SEQUENCE_TRAILER)?,
    })
}
