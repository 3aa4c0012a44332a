//! Log file manager (C3): attaching to the newest log for a filesystem, or creating one.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::ChangelogOptions;
use crate::error::LogError;
use crate::header::{self, Header};
use crate::index::FsIndex;
use crate::naming;
use crate::recovery::{self, ReplayStats};

/// The open descriptors and path for one filesystem's active log.
#[derive(Debug)]
pub(crate) struct OpenLog {
    pub(crate) path: PathBuf,
    pub(crate) read_fd: File,
    pub(crate) append_fd: File,
}

fn now_unix_seconds() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

/// Finds the newest changelog file for `fsid` under `options.changelog_dir()`, or picks a
/// deterministic fresh path if none exists, then delegates to [`set_log`].
pub(crate) fn attach_latest(
    options: &ChangelogOptions,
    fsid: u32,
    index: &mut FsIndex,
) -> Result<(OpenLog, ReplayStats), LogError> {
    let dir = options.changelog_dir();
    std::fs::create_dir_all(dir)?;

    let path = match naming::newest_for_fsid(dir, fsid)? {
        Some(path) => {
            tracing::info!(?path, fsid, "attaching existing changelog file");
            path
        }
        None => {
            let path = naming::new_path_for_fsid(dir, fsid, now_unix_seconds());
            tracing::info!(?path, fsid, "no existing changelog, creating new one");
            path
        }
    };

    set_log(options, &path, fsid, index)
}

/// Opens (creating if necessary and permitted) the log at `path` for filesystem `fsid`, then
/// runs the replay scanner (C4) to rebuild `index`.
pub(crate) fn set_log(
    options: &ChangelogOptions,
    path: &Path,
    fsid: u32,
    index: &mut FsIndex,
) -> Result<(OpenLog, ReplayStats), LogError> {
    let is_new = !path.exists();
    if is_new && options.fsck_only {
        return Err(LogError::LogMissing { fsid });
    }

    let mut append_fd = OpenOptions::new()
        .create(!options.fsck_only)
        .read(true)
        .append(true)
        .open(path)?;
    let read_fd = OpenOptions::new().read(true).open(path)?;

    append_fd.seek(SeekFrom::End(0))?;

    if is_new {
        header::write(
            &mut append_fd,
            &Header { ctime: now_unix_seconds(), fsid },
        )?;
        append_fd.seek(SeekFrom::End(0))?;
    } else {
        let mut header_fd = OpenOptions::new().read(true).open(path)?;
        let header = header::read(&mut header_fd, options.force_version)?;
        if header.fsid != fsid {
            tracing::error!(expected = fsid, found = header.fsid, ?path, "fsid mismatch in changelog header");
            return Err(LogError::FsidMismatch { expected: fsid, found: header.fsid });
        }
    }

    let stats = recovery::replay(&read_fd, options.max_log_bytes, options.dump_on_replay, index)?;

    Ok((
        OpenLog {
            path: path.to_path_buf(),
            read_fd,
            append_fd,
        },
        stats,
    ))
}
