//! The per-directory `.versions` store.
//!
//! Historical versions of `<dir>/<basename>` live in
//! `<dir>/.versions/<basename>_<version_id>`. The directory is created on
//! first demotion and never removed.

use std::fs::{self, Metadata};
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::layout::{VERSIONS_DIR, is_missing};
use crate::version_id::{VersionId, mtime_ns};

/// Ordering key of a version: modification time, then inode.
pub type RecencyKey = (u64, u64);

/// One historical version found in `.versions`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    /// Basename of the key's current slot.
    pub basename: String,
    /// Version id parsed from the entry name.
    pub version_id: VersionId,
    /// Full path of the entry.
    pub path: PathBuf,
}

/// Create `<parent>/.versions` if it does not exist yet.
pub fn ensure(parent: &Path) -> io::Result<PathBuf> {
    let dir = parent.join(VERSIONS_DIR);
    match fs::create_dir(&dir) {
        Ok(()) => Ok(dir),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(dir),
        Err(e) => Err(e),
    }
}

/// File name of the historical entry of `basename` at `version_id`.
#[must_use]
pub fn entry_name(basename: &str, version_id: VersionId) -> String {
    format!("{basename}_{version_id}")
}

/// Full path of the historical entry of `basename` at `version_id`.
#[must_use]
pub fn entry_path(parent: &Path, basename: &str, version_id: VersionId) -> PathBuf {
    parent
        .join(VERSIONS_DIR)
        .join(entry_name(basename, version_id))
}

/// Split an entry name into basename and version id.
///
/// The id never contains `_`, so the last `_` separates the two even when
/// the basename has underscores of its own.
#[must_use]
pub fn parse_entry_name(name: &str) -> Option<(&str, VersionId)> {
    let (basename, id) = name.rsplit_once('_')?;
    if basename.is_empty() {
        return None;
    }
    Some((basename, id.parse().ok()?))
}

/// Recency of a version: decoded from its id when possible, otherwise from
/// the file's stat.
#[must_use]
pub fn recency(version_id: VersionId, meta: &Metadata) -> RecencyKey {
    version_id
        .decode()
        .unwrap_or_else(|| (mtime_ns(meta), meta.ino()))
}

/// All historical entries of `basename`. A missing `.versions` is empty.
pub fn list(parent: &Path, basename: &str) -> io::Result<Vec<HistoryEntry>> {
    let dir = parent.join(VERSIONS_DIR);
    let read_dir = match fs::read_dir(&dir) {
        Ok(rd) => rd,
        Err(e) if is_missing(&e) => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut entries = Vec::new();
    for dirent in read_dir {
        let dirent = dirent?;
        let name = dirent.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        match parse_entry_name(name) {
            Some((b, version_id)) if b == basename => entries.push(HistoryEntry {
                basename: basename.to_owned(),
                version_id,
                path: dirent.path(),
            }),
            Some(_) => {}
            None => warn!(dir = %dir.display(), name, "ignoring stray .versions entry"),
        }
    }
    Ok(entries)
}

/// The most recent historical entry of `basename` whose id is not in `skip`.
///
/// Real ids are ranked by their decoded time; only `null` entries are
/// stat-ed. Entries that vanish while ranking are ignored.
pub fn find_max_excluding(
    parent: &Path,
    basename: &str,
    skip: &[VersionId],
) -> io::Result<Option<HistoryEntry>> {
    let mut best: Option<(RecencyKey, HistoryEntry)> = None;

    for entry in list(parent, basename)? {
        if skip.contains(&entry.version_id) {
            continue;
        }
        let key = if let Some(key) = entry.version_id.decode() {
            key
        } else {
            match fs::symlink_metadata(&entry.path) {
                Ok(meta) => (mtime_ns(&meta), meta.ino()),
                Err(e) if is_missing(&e) => continue,
                Err(e) => return Err(e),
            }
        };
        if best.as_ref().is_none_or(|(k, _)| key > *k) {
            best = Some((key, entry));
        }
    }

    Ok(best.map(|(_, entry)| entry))
}

/// Remove the historical entry of `basename` at `version_id`.
///
/// Returns whether an entry was removed; an absent entry is not an error.
pub fn delete(parent: &Path, basename: &str, version_id: VersionId) -> io::Result<bool> {
    let path = entry_path(parent, basename, version_id);
    match fs::remove_file(&path) {
        Ok(()) => Ok(true),
        Err(e) if is_missing(&e) => Ok(false),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to remove historical version");
            Err(e)
        }
    }
}
