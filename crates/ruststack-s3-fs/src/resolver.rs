//! The put/delete state machine.
//!
//! A key is in one of three states: no object, a value current, or a
//! delete-marker current. Writes stage their payload first, outside any
//! lock, then [`publish`] decides under the key lock what happens to the
//! existing current:
//!
//! | Mode | Current exists | Action |
//! |------|----------------|--------|
//! | Enabled | yes | demote current, publish with a fresh id |
//! | Suspended | `null` | drop any historical `null`, overwrite in place |
//! | Suspended | real id | drop any historical `null`, demote, publish as `null` |
//! | Disabled | yes | overwrite in place |
//!
//! Versioned deletes ignore the mode: removing the current promotes the
//! newest historical entry back into place.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::hash::BuildHasher;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::Utc;
use md5::{Digest, Md5};
use tempfile::TempPath;
use tracing::{debug, warn};

use crate::attrs;
use crate::error::{S3FsError, S3FsResult};
use crate::hidden;
use crate::layout::{self, ObjectPath, UPLOAD_PREFIX};
use crate::slot::{self, VersionFile};
use crate::types::{DeleteObjectOutput, PutObjectOutput, VersioningStatus};
use crate::version_id::{VersionId, mtime_ns};

/// Attempts at pushing a new version's mtime past its predecessor.
const MAX_MTIME_NUDGES: u32 = 24;

/// First mtime nudge; doubled on every retry so coarse timestamps also move.
const MTIME_NUDGE: Duration = Duration::from_micros(1);

/// A payload written next to its destination, waiting to be published.
#[derive(Debug)]
pub struct StagedVersion {
    file: File,
    path: StagingPath,
    etag: String,
    size: u64,
    is_delete_marker: bool,
}

#[derive(Debug)]
enum StagingPath {
    Temp(TempPath),
    External(PathBuf),
}

impl StagingPath {
    fn publish(self, dest: &Path) -> io::Result<()> {
        match self {
            Self::Temp(temp) => temp.persist(dest).map_err(|e| e.error),
            Self::External(path) => fs::rename(path, dest),
        }
    }
}

// ---------------------------------------------------------------------------
// Staging
// ---------------------------------------------------------------------------

/// Write `body` to a staging file in the key's directory.
pub fn stage_bytes<S: BuildHasher>(
    target: &ObjectPath,
    body: &[u8],
    metadata: &HashMap<String, String, S>,
    fsync: bool,
) -> S3FsResult<StagedVersion> {
    let (mut file, temp) = create_staging_file(target)?;
    let etag = format!("\"{}\"", hex::encode(Md5::digest(body)));

    file.write_all(body)
        .map_err(|e| S3FsError::io("write payload", &temp, e))?;
    if fsync {
        file.sync_all()
            .map_err(|e| S3FsError::io("fsync payload", &temp, e))?;
    }

    let size = body.len() as u64;
    describe_payload(target, &file, &temp, &etag, size, metadata)?;
    Ok(StagedVersion {
        file,
        path: StagingPath::Temp(temp),
        etag,
        size,
        is_delete_marker: false,
    })
}

/// Adopt a file the caller already wrote. It is renamed into place on
/// publish, so it must be on the bucket's filesystem.
pub fn stage_file<S: BuildHasher>(
    target: &ObjectPath,
    source: PathBuf,
    etag: Option<String>,
    metadata: &HashMap<String, String, S>,
    fsync: bool,
) -> S3FsResult<StagedVersion> {
    prepare_parent(target)?;
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(&source)
        .map_err(|e| S3FsError::io("open staged payload", &source, e))?;
    let size = file
        .metadata()
        .map_err(|e| S3FsError::io("stat staged payload", &source, e))?
        .len();
    let etag = if let Some(etag) = etag {
        etag
    } else {
        let digest = md5_of(&mut file)
            .map_err(|e| S3FsError::io("hash staged payload", &source, e))?;
        format!("\"{digest}\"")
    };
    if fsync {
        file.sync_all()
            .map_err(|e| S3FsError::io("fsync payload", &source, e))?;
    }

    describe_payload(target, &file, &source, &etag, size, metadata)?;
    Ok(StagedVersion {
        file,
        path: StagingPath::External(source),
        etag,
        size,
        is_delete_marker: false,
    })
}

/// Create an empty delete-marker file in the key's directory.
pub fn stage_delete_marker(target: &ObjectPath) -> S3FsResult<StagedVersion> {
    let (file, temp) = create_staging_file(target)?;
    attrs::mark_delete_marker(&file)
        .map_err(|e| S3FsError::io("mark delete marker", &temp, e))?;
    Ok(StagedVersion {
        file,
        path: StagingPath::Temp(temp),
        etag: String::new(),
        size: 0,
        is_delete_marker: true,
    })
}

fn create_staging_file(target: &ObjectPath) -> S3FsResult<(File, TempPath)> {
    prepare_parent(target)?;
    let temp = tempfile::Builder::new()
        .prefix(UPLOAD_PREFIX)
        .tempfile_in(target.parent())
        .map_err(|e| S3FsError::io("create staging file", target.parent(), e))?;
    Ok(temp.into_parts())
}

fn prepare_parent(target: &ObjectPath) -> S3FsResult<()> {
    match fs::create_dir_all(target.parent()) {
        Ok(()) => Ok(()),
        Err(e)
            if matches!(
                e.kind(),
                io::ErrorKind::NotADirectory | io::ErrorKind::AlreadyExists
            ) =>
        {
            Err(S3FsError::InvalidArgument {
                message: format!(
                    "Object key {} conflicts with an existing object on its path",
                    target.key()
                ),
            })
        }
        Err(e) => Err(S3FsError::io("create directory", target.parent(), e)),
    }
}

fn describe_payload<S: BuildHasher>(
    target: &ObjectPath,
    file: &File,
    path: &Path,
    etag: &str,
    size: u64,
    metadata: &HashMap<String, String, S>,
) -> S3FsResult<()> {
    attrs::write_etag(file, etag).map_err(|e| S3FsError::io("write etag", path, e))?;
    let written = if target.is_dir_content() {
        attrs::write_dir_content(file, size)
    } else {
        attrs::write_user_metadata(file, metadata)
    };
    written.map_err(|e| S3FsError::io("write attributes", path, e))
}

fn md5_of(file: &mut File) -> io::Result<String> {
    let mut hasher = Md5::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

// ---------------------------------------------------------------------------
// Publishing
// ---------------------------------------------------------------------------

/// Make `staged` the current version of `target`.
///
/// Must run under the key lock when writes are serialized.
pub fn publish(
    target: &ObjectPath,
    mode: VersioningStatus,
    staged: StagedVersion,
) -> S3FsResult<PutObjectOutput> {
    let current_path = target.current();
    if is_directory(&current_path) {
        return Err(S3FsError::InvalidArgument {
            message: format!(
                "Object key {} conflicts with an existing prefix",
                target.key()
            ),
        });
    }
    let current = VersionFile::open(&current_path)
        .map_err(|e| S3FsError::io("open current version", &current_path, e))?;

    let version_id = match mode {
        VersioningStatus::Disabled => None,
        VersioningStatus::Enabled => {
            let floor = recency_floor(target, current.as_ref())?;
            let vid = settle_mtime(target, &staged, floor, true)?;
            stamp(target, &staged, vid)?;
            if let Some(current) = &current {
                demote(target, current)?;
            }
            Some(vid)
        }
        VersioningStatus::Suspended => {
            if hidden::delete(target.parent(), target.basename(), VersionId::Null)
                .map_err(|e| S3FsError::io("remove null version", target.parent(), e))?
            {
                debug!(key = %target.key(), "dropped historical null version");
            }
            let floor = recency_floor(target, current.as_ref())?;
            settle_mtime(target, &staged, floor, false)?;
            stamp(target, &staged, VersionId::Null)?;
            if let Some(current) = current.as_ref().filter(|c| !c.version_id().is_null()) {
                demote(target, current)?;
            }
            Some(VersionId::Null)
        }
    };

    let StagedVersion {
        file,
        path,
        etag,
        size,
        is_delete_marker,
    } = staged;
    path.publish(&current_path)
        .map_err(|e| S3FsError::io("publish version", &current_path, e))?;

    let meta = file
        .metadata()
        .map_err(|e| S3FsError::io("stat published version", &current_path, e))?;
    debug!(
        key = %target.key(),
        version_id = ?version_id,
        delete_marker = is_delete_marker,
        size,
        "published current version"
    );

    Ok(PutObjectOutput {
        version_id,
        etag,
        size,
        last_modified: slot::to_datetime(mtime_ns(&meta)),
    })
}

/// Delete the latest version of `target`.
///
/// Disabled buckets lose the object; versioned buckets get a delete marker.
pub fn delete_latest(
    target: &ObjectPath,
    mode: VersioningStatus,
) -> S3FsResult<DeleteObjectOutput> {
    let current_path = target.current();

    if mode == VersioningStatus::Disabled {
        if !is_directory(&current_path) {
            match fs::remove_file(&current_path) {
                Ok(()) => debug!(key = %target.key(), "removed unversioned object"),
                Err(e) if layout::is_missing(&e) => {}
                Err(e) => return Err(S3FsError::io("remove object", &current_path, e)),
            }
        }
        return Ok(DeleteObjectOutput {
            version_id: None,
            delete_marker: false,
        });
    }

    let has_current = VersionFile::open(&current_path)
        .map_err(|e| S3FsError::io("open current version", &current_path, e))?
        .is_some();
    let exists = has_current
        || !hidden::list(target.parent(), target.basename())
            .map_err(|e| S3FsError::io("list versions", target.versions_dir(), e))?
            .is_empty();

    if !exists {
        let version_id = match mode {
            VersioningStatus::Enabled => VersionId::encode(now_ns(), 0),
            _ => VersionId::Null,
        };
        debug!(
            key = %target.key(),
            version_id = %version_id,
            "delete of absent key, nothing written"
        );
        return Ok(DeleteObjectOutput {
            version_id: Some(version_id),
            delete_marker: true,
        });
    }

    let marker = stage_delete_marker(target)?;
    let out = publish(target, mode, marker)?;
    Ok(DeleteObjectOutput {
        version_id: out.version_id,
        delete_marker: true,
    })
}

/// Delete one specific version of `target`.
///
/// Deleting the current promotes the newest historical entry. Unknown ids
/// succeed without touching anything.
pub fn delete_version(
    target: &ObjectPath,
    version_id: VersionId,
) -> S3FsResult<DeleteObjectOutput> {
    let current_path = target.current();
    let current = VersionFile::open(&current_path)
        .map_err(|e| S3FsError::io("open current version", &current_path, e))?;

    let delete_marker = match current {
        Some(current) if current.version_id() == version_id => {
            fs::remove_file(&current_path)
                .map_err(|e| S3FsError::io("remove current version", &current_path, e))?;
            debug!(key = %target.key(), version_id = %version_id, "removed current version");
            promote_newest(target)?;
            current.is_delete_marker()
        }
        current => {
            let entry_path = target.history_entry(version_id);
            let delete_marker = VersionFile::open(&entry_path)
                .map_err(|e| S3FsError::io("open historical version", &entry_path, e))?
                .is_some_and(|v| v.is_delete_marker());
            let removed = hidden::delete(target.parent(), target.basename(), version_id)
                .map_err(|e| S3FsError::io("remove historical version", &entry_path, e))?;
            if removed {
                debug!(key = %target.key(), version_id = %version_id, "removed historical version");
            }
            if current.is_none() && !is_directory(&current_path) {
                if let Some(promoted) = promote_newest(target)? {
                    warn!(
                        key = %target.key(),
                        version_id = %promoted,
                        "current version was missing, promoted newest survivor"
                    );
                }
            }
            delete_marker
        }
    };

    Ok(DeleteObjectOutput {
        version_id: Some(version_id),
        delete_marker,
    })
}

/// Record `vid` on the staged file. Runs before anything is demoted so a
/// failure leaves the existing current in place.
fn stamp(target: &ObjectPath, staged: &StagedVersion, vid: VersionId) -> S3FsResult<()> {
    attrs::write_current(&staged.file, vid)
        .map_err(|e| S3FsError::io("write version id", target.current(), e))
}

/// Move the current version into `.versions` under its own id.
fn demote(target: &ObjectPath, current: &VersionFile) -> S3FsResult<()> {
    let vid = current.version_id();
    hidden::ensure(target.parent())
        .map_err(|e| S3FsError::io("create versions directory", target.versions_dir(), e))?;
    let dest = target.history_entry(vid);
    fs::rename(&current.path, &dest).map_err(|e| S3FsError::io("demote version", &dest, e))?;
    // The handle follows the inode across the rename.
    attrs::mark_noncurrent(&current.file, now_ms())
        .map_err(|e| S3FsError::io("mark noncurrent", &dest, e))?;
    debug!(key = %target.key(), version_id = %vid, "demoted current version");
    Ok(())
}

/// Promote the newest historical entry, if any, into the current slot.
fn promote_newest(target: &ObjectPath) -> S3FsResult<Option<VersionId>> {
    let Some(entry) = hidden::find_max_excluding(target.parent(), target.basename(), &[])
        .map_err(|e| S3FsError::io("scan versions", target.versions_dir(), e))?
    else {
        return Ok(None);
    };

    let current_path = target.current();
    fs::rename(&entry.path, &current_path)
        .map_err(|e| S3FsError::io("promote version", &entry.path, e))?;
    let file = File::open(&current_path)
        .map_err(|e| S3FsError::io("open promoted version", &current_path, e))?;
    attrs::clear_noncurrent(&file)
        .map_err(|e| S3FsError::io("clear noncurrent", &current_path, e))?;
    debug!(key = %target.key(), version_id = %entry.version_id, "promoted historical version");
    Ok(Some(entry.version_id))
}

/// The mtime a new version must exceed: the current's, or when no current
/// exists, the newest historical entry's.
fn recency_floor(target: &ObjectPath, current: Option<&VersionFile>) -> S3FsResult<Option<u64>> {
    if let Some(current) = current {
        return Ok(Some(current.recency().0));
    }
    let newest = hidden::find_max_excluding(target.parent(), target.basename(), &[])
        .map_err(|e| S3FsError::io("scan versions", target.versions_dir(), e))?;
    let Some(entry) = newest else {
        return Ok(None);
    };
    warn!(key = %target.key(), "history without a current version");
    match fs::symlink_metadata(&entry.path) {
        Ok(meta) => Ok(Some(hidden::recency(entry.version_id, &meta).0)),
        Err(e) if layout::is_missing(&e) => Ok(None),
        Err(e) => Err(S3FsError::io("stat historical version", &entry.path, e)),
    }
}

/// Push the staged file's mtime past `floor` and, for real ids, away from
/// any id already present in `.versions`. Returns the id the file now
/// derives.
fn settle_mtime(
    target: &ObjectPath,
    staged: &StagedVersion,
    floor: Option<u64>,
    unique: bool,
) -> S3FsResult<VersionId> {
    let stat = |file: &File| {
        file.metadata()
            .map_err(|e| S3FsError::io("stat staged version", target.current(), e))
    };

    let mut meta = stat(&staged.file)?;
    let mut step = MTIME_NUDGE;
    for _ in 0..MAX_MTIME_NUDGES {
        let ns = mtime_ns(&meta);
        let vid = VersionId::from_metadata(&meta);
        let stale = floor.is_some_and(|f| ns <= f);
        let taken = !stale && unique && target.history_entry(vid).exists();
        if !stale && !taken {
            return Ok(vid);
        }
        if taken {
            warn!(
                key = %target.key(),
                version_id = %vid,
                "version id already in use, nudging mtime"
            );
        }

        let base = floor.map_or(ns, |f| f.max(ns));
        let next = UNIX_EPOCH + Duration::from_nanos(base) + step;
        staged
            .file
            .set_modified(next)
            .map_err(|e| S3FsError::io("set mtime", target.current(), e))?;
        meta = stat(&staged.file)?;
        step *= 2;
    }

    warn!(key = %target.key(), "could not order new version after its predecessor");
    Ok(VersionId::from_metadata(&meta))
}

fn is_directory(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok_and(|m| m.is_dir())
}

fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
}

fn now_ms() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
}
