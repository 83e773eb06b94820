//! Mapping of object keys onto bucket paths.
//!
//! ```text
//! <root>/<dirs>/<basename>                       current version
//! <root>/<dirs>/.versions/<basename>_<id>        historical versions
//! <root>/<dirs>/.folder                          current of content-directory key "<dirs>/"
//! <root>/<dirs>/.versions/.folder_<id>           its history
//! ```

use std::io;
use std::path::{Path, PathBuf};

use crate::error::S3FsResult;
use crate::hidden;
use crate::validation::validate_object_key;
use crate::version_id::VersionId;

/// Name of the per-directory history store.
pub const VERSIONS_DIR: &str = ".versions";

/// Basename holding the payload of a content-directory key (`a/b/`).
pub const FOLDER_OBJECT: &str = ".folder";

/// Prefix of staging files; such files are never listed.
pub const UPLOAD_PREFIX: &str = ".s3fs-upload-";

/// Where a key lives inside a bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectPath {
    key: String,
    parent: PathBuf,
    basename: String,
}

impl ObjectPath {
    /// Validate `key` and map it under `root`.
    pub fn resolve(root: &Path, key: &str) -> S3FsResult<Self> {
        validate_object_key(key)?;

        let (dirs, basename) = match key.strip_suffix('/') {
            Some(dir) => (dir, FOLDER_OBJECT),
            None => key.rsplit_once('/').unwrap_or(("", key)),
        };
        let parent = if dirs.is_empty() {
            root.to_path_buf()
        } else {
            root.join(dirs)
        };

        Ok(Self {
            key: key.to_owned(),
            parent,
            basename: basename.to_owned(),
        })
    }

    /// The object key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Directory holding the current version.
    #[must_use]
    pub fn parent(&self) -> &Path {
        &self.parent
    }

    /// File name of the current version.
    #[must_use]
    pub fn basename(&self) -> &str {
        &self.basename
    }

    /// Whether the key names a content directory (`a/b/`).
    #[must_use]
    pub fn is_dir_content(&self) -> bool {
        self.basename == FOLDER_OBJECT
    }

    /// Path of the current version.
    #[must_use]
    pub fn current(&self) -> PathBuf {
        self.parent.join(&self.basename)
    }

    /// The `.versions` directory next to the current version.
    #[must_use]
    pub fn versions_dir(&self) -> PathBuf {
        self.parent.join(VERSIONS_DIR)
    }

    /// Path of the historical entry for `version_id`.
    #[must_use]
    pub fn history_entry(&self, version_id: VersionId) -> PathBuf {
        hidden::entry_path(&self.parent, &self.basename, version_id)
    }
}

/// Key of the file `basename` found in the directory whose key prefix is
/// `dir_prefix` (`""` for the bucket root, otherwise ending in `/`).
#[must_use]
pub fn key_for(dir_prefix: &str, basename: &str) -> String {
    if basename == FOLDER_OBJECT {
        dir_prefix.to_owned()
    } else {
        format!("{dir_prefix}{basename}")
    }
}

/// Whether a filesystem error means the path does not exist, including a
/// path that runs through a regular file (`a/b` when `a` is an object).
#[must_use]
pub fn is_missing(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::NotFound | io::ErrorKind::NotADirectory)
}
