//! Directory-entry snapshots shared between listings.
//!
//! A snapshot is stamped with the directory's `(mtime, ctime, inode)` and
//! re-read whenever the stamp differs. Directories modified within the last
//! [`SETTLE_WINDOW`] are not cached at all: on filesystems with coarse
//! timestamps two changes inside one tick would share a stamp.

use std::fs;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use tracing::trace;

use crate::layout::is_missing;
use crate::version_id::mtime_ns;

/// Age a directory's mtime must reach before its snapshot is kept.
const SETTLE_WINDOW: Duration = Duration::from_secs(2);

/// Kind of a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EntryKind {
    /// Regular file.
    File,
    /// Directory.
    Dir,
}

/// The UTF-8 named files and directories of one directory, sorted by name.
/// Symlinks and other special files are left out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirSnapshot {
    /// `(name, kind)` pairs.
    pub entries: Vec<(String, EntryKind)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DirStamp {
    mtime_ns: u64,
    ctime_ns: u64,
    ino: u64,
}

impl DirStamp {
    fn of(meta: &fs::Metadata) -> Self {
        let ctime_ns = u64::try_from(meta.ctime())
            .unwrap_or(0)
            .saturating_mul(1_000_000_000)
            .saturating_add(u64::try_from(meta.ctime_nsec()).unwrap_or(0));
        Self {
            mtime_ns: mtime_ns(meta),
            ctime_ns,
            ino: meta.ino(),
        }
    }

    fn is_settled(&self) -> bool {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX));
        let window = u64::try_from(SETTLE_WINDOW.as_nanos()).unwrap_or(u64::MAX);
        now.saturating_sub(self.mtime_ns) >= window
    }
}

#[derive(Debug)]
struct CachedDir {
    stamp: DirStamp,
    snapshot: Arc<DirSnapshot>,
}

/// Cache of [`DirSnapshot`]s keyed by directory path.
#[derive(Debug)]
pub struct DirCache {
    enabled: bool,
    max_entries: usize,
    dirs: DashMap<PathBuf, CachedDir>,
}

impl DirCache {
    /// Create a cache. A disabled cache reads every directory afresh.
    #[must_use]
    pub fn new(enabled: bool, max_entries: usize) -> Self {
        Self {
            enabled,
            max_entries,
            dirs: DashMap::new(),
        }
    }

    /// Snapshot of `dir`, or `None` when it does not exist or is not a
    /// directory.
    pub fn snapshot(&self, dir: &Path) -> io::Result<Option<Arc<DirSnapshot>>> {
        let meta = match fs::metadata(dir) {
            Ok(meta) if meta.is_dir() => meta,
            Ok(_) => return Ok(None),
            Err(e) if is_missing(&e) => return Ok(None),
            Err(e) => return Err(e),
        };
        let stamp = DirStamp::of(&meta);

        if self.enabled {
            if let Some(cached) = self.dirs.get(dir) {
                if cached.stamp == stamp {
                    trace!(dir = %dir.display(), "directory snapshot hit");
                    return Ok(Some(Arc::clone(&cached.snapshot)));
                }
            }
        }

        let snapshot = match read_snapshot(dir) {
            Ok(snapshot) => Arc::new(snapshot),
            Err(e) if is_missing(&e) => {
                self.invalidate(dir);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        if self.enabled {
            if stamp.is_settled() {
                if self.dirs.len() >= self.max_entries {
                    self.dirs.clear();
                }
                self.dirs.insert(
                    dir.to_path_buf(),
                    CachedDir {
                        stamp,
                        snapshot: Arc::clone(&snapshot),
                    },
                );
            } else {
                self.dirs.remove(dir);
            }
        }

        Ok(Some(snapshot))
    }

    /// Forget the snapshot of `dir`.
    pub fn invalidate(&self, dir: &Path) {
        self.dirs.remove(dir);
    }

    /// Number of cached directories.
    #[must_use]
    pub fn len(&self) -> usize {
        self.dirs.len()
    }

    /// Whether nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty()
    }
}

fn read_snapshot(dir: &Path) -> io::Result<DirSnapshot> {
    let mut entries = Vec::new();
    for dirent in fs::read_dir(dir)? {
        let dirent = dirent?;
        let Ok(name) = dirent.file_name().into_string() else {
            continue;
        };
        let file_type = match dirent.file_type() {
            Ok(ft) => ft,
            Err(e) if is_missing(&e) => continue,
            Err(e) => return Err(e),
        };
        let kind = if file_type.is_file() {
            EntryKind::File
        } else if file_type.is_dir() {
            EntryKind::Dir
        } else {
            continue;
        };
        entries.push((name, kind));
    }
    entries.sort_unstable();
    Ok(DirSnapshot { entries })
}
