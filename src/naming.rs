//! Changelog file naming (part of C3): `fmd.<seconds>.<4-digit-fsid>.mdlog`.
//!
//! Mirrors the parse/format split of `anchored-leveldb`'s `LevelDBFileName`.

use std::fs;
use std::path::{Path, PathBuf};

/// A parsed changelog file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ChangelogFileName {
    pub created_at: u64,
    pub fsid: u32,
}

impl ChangelogFileName {
    /// Parses a bare file name (no directory component) of the form
    /// `fmd.<seconds>.<4-digit-fsid>.mdlog`.
    pub(crate) fn parse(file_name: &str) -> Option<Self> {
        let rest = file_name.strip_prefix("fmd.")?;
        let rest = rest.strip_suffix(".mdlog")?;
        let (seconds, fsid) = rest.split_once('.')?;

        // Reject leading '+' the way `anchored-leveldb` does for its file numbers: `u64`/`u32`
        // parsing otherwise accepts it, which would make two distinct strings name one file.
        if seconds.starts_with('+') || fsid.starts_with('+') {
            return None;
        }
        if fsid.len() != 4 {
            return None;
        }

        Some(Self {
            created_at: seconds.parse().ok()?,
            fsid: fsid.parse().ok()?,
        })
    }

    pub(crate) fn file_name(self) -> String {
        format!("fmd.{}.{:04}.mdlog", self.created_at, self.fsid)
    }
}

/// Lists `dir` for changelog files belonging to `fsid`, returning `(path, modified)` pairs.
fn matching_files(dir: &Path, fsid: u32) -> std::io::Result<Vec<(PathBuf, std::time::SystemTime)>> {
    let mut found = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let Some(file_name) = entry.file_name().to_str().map(str::to_owned) else {
            continue;
        };
        let Some(parsed) = ChangelogFileName::parse(&file_name) else {
            continue;
        };
        if parsed.fsid != fsid {
            continue;
        }
        let modified = entry.metadata()?.modified()?;
        found.push((entry.path(), modified));
    }
    Ok(found)
}

/// Returns the path of the most recently modified changelog file for `fsid` in `dir`, if any.
pub(crate) fn newest_for_fsid(dir: &Path, fsid: u32) -> std::io::Result<Option<PathBuf>> {
    let mut found = matching_files(dir, fsid)?;
    found.sort_by(|a, b| b.1.cmp(&a.1));
    Ok(found.into_iter().next().map(|(path, _)| path))
}

/// Builds a fresh, never-yet-used changelog path for `fsid` in `dir`, named after the current
/// wall-clock time.
pub(crate) fn new_path_for_fsid(dir: &Path, fsid: u32, created_at: u64) -> PathBuf {
    dir.join(ChangelogFileName { created_at, fsid }.file_name())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_canonical_name() {
        let parsed = ChangelogFileName::parse("fmd.1272892439.0007.mdlog").unwrap();
        assert_eq!(parsed.created_at, 1_272_892_439);
        assert_eq!(parsed.fsid, 7);
    }

    #[test]
    fn round_trips_file_name() {
        let name = ChangelogFileName { created_at: 42, fsid: 7 };
        assert_eq!(ChangelogFileName::parse(&name.file_name()), Some(name));
    }

    #[test]
    fn rejects_non_matching_names() {
        assert!(ChangelogFileName::parse("fmd.123.007.mdlog").is_none()); // fsid not 4 digits
        assert!(ChangelogFileName::parse("other.123.0007.mdlog").is_none());
        assert!(ChangelogFileName::parse("fmd.123.0007.log").is_none());
        assert!(ChangelogFileName::parse("fmd.+123.0007.mdlog").is_none());
    }

    #[test]
    fn newest_for_fsid_picks_most_recently_modified() {
        let dir = tempfile::tempdir().unwrap();
        let older = dir.path().join("fmd.100.0007.mdlog");
        let newer = dir.path().join("fmd.200.0007.mdlog");
        let other_fsid = dir.path().join("fmd.300.0009.mdlog");
        std::fs::write(&older, b"").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(10));
        std::fs::write(&newer, b"").unwrap();
        std::fs::write(&other_fsid, b"").unwrap();

        let found = newest_for_fsid(dir.path(), 7).unwrap().unwrap();
        assert_eq!(found, newer);
    }
}
