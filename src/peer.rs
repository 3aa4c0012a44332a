//! Peer fetch client (C9): fetch a remote node's FMD record for a given `fid`.

use std::time::Duration;

use crate::error::FetchError;
use crate::record::FmdRecord;
use crate::wire;

const ERROR_PREFIX: &str = "ERROR";

/// Issues `/?fst.pcmd=getfmd&fst.getfmd.fid=<hex>&fst.getfmd.fsid=<fsid>` against `server` and
/// parses the response, verifying the returned record's `fid` matches what was requested.
pub fn fetch_remote(server: &str, fid: u64, fsid: u32, timeout: Duration) -> Result<FmdRecord, FetchError> {
    let url = format!("{server}/?fst.pcmd=getfmd&fst.getfmd.fid={fid:x}&fst.getfmd.fsid={fsid}");

    let client = reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|err| FetchError::Transport(err.to_string()))?;

    let response = client
        .get(&url)
        .send()
        .map_err(|err| FetchError::Transport(err.to_string()))?;

    if !response.status().is_success() {
        tracing::warn!(%url, status = %response.status(), "peer fetch returned non-success status");
        return Err(FetchError::Transport(response.status().to_string()));
    }

    let body = response.text().map_err(|err| FetchError::Transport(err.to_string()))?;
    parse_response(&body, fid)
}

fn parse_response(body: &str, requested_fid: u64) -> Result<FmdRecord, FetchError> {
    if body.starts_with(ERROR_PREFIX) {
        tracing::debug!(requested_fid, "peer reports no record for fid");
        return Err(FetchError::NotPresent);
    }

    let record = wire::env_parse(body)?;
    if record.fid != requested_fid {
        return Err(FetchError::Mismatch {
            requested: requested_fid,
            returned: record.fid,
        });
    }
    Ok(record)
}
