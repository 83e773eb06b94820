//! An opened version file: handle, stat and attributes read together.

use std::fs::{File, Metadata};
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::attrs::{self, VersionAttributes};
use crate::hidden::{self, RecencyKey};
use crate::layout::is_missing;
use crate::types::ObjectInfo;
use crate::version_id::{VersionId, mtime_ns};

/// A current or historical version, opened for reading.
///
/// The handle keeps referring to the same inode when the file is renamed,
/// so a version stays readable while a concurrent writer demotes it.
#[derive(Debug)]
pub struct VersionFile {
    /// Path the file was opened at.
    pub path: PathBuf,
    /// Open handle.
    pub file: File,
    /// Stat taken right after opening.
    pub meta: Metadata,
    /// Extended attributes.
    pub attrs: VersionAttributes,
}

impl VersionFile {
    /// Open the version file at `path`.
    ///
    /// Returns `None` when nothing is there or when the path is not a
    /// regular file (a directory standing at a key's path is not a version).
    pub fn open(path: &Path) -> io::Result<Option<Self>> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if is_missing(&e) => return Ok(None),
            Err(e) => return Err(e),
        };
        let meta = file.metadata()?;
        if !meta.is_file() {
            return Ok(None);
        }
        let attrs = attrs::read(&file)?;
        Ok(Some(Self {
            path: path.to_path_buf(),
            file,
            meta,
            attrs,
        }))
    }

    /// Stored version id.
    #[must_use]
    pub fn version_id(&self) -> VersionId {
        self.attrs.version_id
    }

    /// Whether the version is a delete marker.
    #[must_use]
    pub fn is_delete_marker(&self) -> bool {
        self.attrs.is_delete_marker
    }

    /// Payload size.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.meta.len()
    }

    /// Modification time.
    #[must_use]
    pub fn last_modified(&self) -> DateTime<Utc> {
        to_datetime(mtime_ns(&self.meta))
    }

    /// Ordering key among the versions of one key.
    #[must_use]
    pub fn recency(&self) -> RecencyKey {
        hidden::recency(self.version_id(), &self.meta)
    }

    /// Stored ETag, or a stat-derived one for files written without it.
    #[must_use]
    pub fn etag(&self) -> String {
        match &self.attrs.etag {
            Some(etag) => etag.clone(),
            None => format!("\"{:x}-{:x}\"", mtime_ns(&self.meta), self.size()),
        }
    }

    /// Object metadata of this version under `key`.
    #[must_use]
    pub fn info(&self, key: &str, version_id: VersionId, is_latest: bool) -> ObjectInfo {
        ObjectInfo {
            key: key.to_owned(),
            version_id,
            is_latest,
            etag: self.etag(),
            size: self.size(),
            last_modified: self.last_modified(),
            metadata: self.attrs.user.clone(),
        }
    }
}

/// Convert nanoseconds since the epoch into a UTC timestamp.
#[must_use]
pub fn to_datetime(ns: u64) -> DateTime<Utc> {
    DateTime::from_timestamp_nanos(i64::try_from(ns).unwrap_or(i64::MAX))
}
