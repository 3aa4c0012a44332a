//! Configuration (C10), in the builder style of `anchored-leveldb`'s `OpenOptions`.

use std::path::PathBuf;
use std::time::Duration;

/// The default sanity cap for a single changelog file: 6 GiB.
pub const DEFAULT_MAX_LOG_BYTES: u64 = 6 * 1024 * 1024 * 1024;
/// The default deadline for a peer fetch.
pub const DEFAULT_PEER_TIMEOUT: Duration = Duration::from_secs(10);

/// Options controlling how a [`crate::ChangelogEngine`] locates, replays, and guards its
/// per-filesystem logs.
///
/// There is deliberately no blanket `Default` impl: a changelog directory is mandatory, so
/// construction always goes through [`ChangelogOptions::new`].
#[derive(Debug, Clone)]
pub struct ChangelogOptions {
    pub(crate) changelog_dir: PathBuf,
    pub(crate) max_log_bytes: u64,
    pub(crate) force_version: bool,
    pub(crate) dump_on_replay: bool,
    pub(crate) fsck_only: bool,
    pub(crate) peer_timeout: Duration,
}

impl ChangelogOptions {
    /// Creates options pointed at `changelog_dir`, with every other setting at its default.
    #[must_use]
    pub fn new(changelog_dir: impl Into<PathBuf>) -> Self {
        Self {
            changelog_dir: changelog_dir.into(),
            max_log_bytes: DEFAULT_MAX_LOG_BYTES,
            force_version: false,
            dump_on_replay: false,
            fsck_only: false,
            peer_timeout: DEFAULT_PEER_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_max_log_bytes(mut self, max_log_bytes: u64) -> Self {
        self.max_log_bytes = max_log_bytes;
        self
    }

    #[must_use]
    pub fn with_force_version(mut self, force_version: bool) -> Self {
        self.force_version = force_version;
        self
    }

    #[must_use]
    pub fn with_dump_on_replay(mut self, dump_on_replay: bool) -> Self {
        self.dump_on_replay = dump_on_replay;
        self
    }

    #[must_use]
    pub fn with_fsck_only(mut self, fsck_only: bool) -> Self {
        self.fsck_only = fsck_only;
        self
    }

    #[must_use]
    pub fn with_peer_timeout(mut self, peer_timeout: Duration) -> Self {
        self.peer_timeout = peer_timeout;
        self
    }

    #[must_use]
    pub fn changelog_dir(&self) -> &std::path::Path {
        &self.changelog_dir
    }
}
