//! Append-only, CRC-protected per-filesystem file-metadata changelog engine.
//!
//! One [`ChangelogEngine`] handle is obtained at boot per storage node and shared across every
//! request-handling thread that needs to look up, create, update, delete, trim, or fetch a
//! remote copy of a file's metadata record.

mod config;
mod engine;
mod error;
mod header;
mod index;
mod log_manager;
mod naming;
mod peer;
mod record;
mod recovery;
mod trim;
mod wire;

pub use config::{ChangelogOptions, DEFAULT_MAX_LOG_BYTES, DEFAULT_PEER_TIMEOUT};
pub use engine::ChangelogEngine;
pub use error::{ChangelogError, FetchError, IndexError, LogError, MutError, ParseError, RecordError, Result, TrimError};
pub use peer::fetch_remote;
pub use record::{FmdRecord, Magic, CREATE_MAGIC, DELETE_MAGIC, RECORD_SIZE};
pub use recovery::ReplayStats;
pub use wire::{env_encode, env_parse};
