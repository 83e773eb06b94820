//! Resolution of reads against the latest or a specific version.

use crate::error::{S3FsError, S3FsResult};
use crate::layout::ObjectPath;
use crate::slot::VersionFile;
use crate::version_id::VersionId;

/// Which version of a key a read targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionSelector {
    /// The current version.
    Latest,
    /// An explicit version, `null` included.
    Version(VersionId),
}

impl VersionSelector {
    /// Parse an optional `versionId` request parameter.
    pub fn parse(version_id: Option<&str>) -> S3FsResult<Self> {
        match version_id {
            None => Ok(Self::Latest),
            Some(s) => Ok(Self::Version(s.parse()?)),
        }
    }
}

/// A version a read resolved to.
#[derive(Debug)]
pub struct ResolvedVersion {
    /// The opened file.
    pub file: VersionFile,
    /// Its version id.
    pub version_id: VersionId,
    /// Whether it is the current version.
    pub is_latest: bool,
}

/// Find the version of `target` that `selector` names.
///
/// A delete marker is never returned: as latest it reads as a missing key,
/// addressed by id it fails with [`S3FsError::MethodNotAllowed`].
pub fn resolve(target: &ObjectPath, selector: VersionSelector) -> S3FsResult<ResolvedVersion> {
    let not_found = || S3FsError::NoSuchKey {
        key: target.key().to_owned(),
    };
    let open = |path: &std::path::Path| {
        VersionFile::open(path).map_err(|e| S3FsError::io("open version", path, e))
    };

    let current = open(&target.current())?;
    let requested = match selector {
        VersionSelector::Latest => {
            let current = current.ok_or_else(not_found)?;
            if current.is_delete_marker() {
                return Err(not_found());
            }
            let version_id = current.version_id();
            return Ok(ResolvedVersion {
                file: current,
                version_id,
                is_latest: true,
            });
        }
        VersionSelector::Version(vid) => vid,
    };

    let (file, is_latest) = match current {
        Some(current) if current.version_id() == requested => (current, true),
        _ => {
            let entry = open(&target.history_entry(requested))?.ok_or_else(not_found)?;
            (entry, false)
        }
    };

    if file.is_delete_marker() {
        return Err(S3FsError::MethodNotAllowed {
            key: target.key().to_owned(),
            version_id: requested,
            last_modified: file.last_modified(),
        });
    }

    Ok(ResolvedVersion {
        file,
        version_id: requested,
        is_latest,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_parse_selector() {
        assert_eq!(VersionSelector::parse(None).expect("latest"), VersionSelector::Latest);
        assert_eq!(
            VersionSelector::parse(Some("null")).expect("null"),
            VersionSelector::Version(VersionId::Null)
        );
        assert!(matches!(
            VersionSelector::parse(Some("v1")),
            Err(S3FsError::InvalidVersionId { .. })
        ));
    }

    #[test]
    fn test_should_report_missing_key() {
        let dir = tempfile::tempdir().expect("temp dir");
        let target = ObjectPath::resolve(dir.path(), "missing").expect("resolve");
        assert!(matches!(
            resolve(&target, VersionSelector::Latest),
            Err(S3FsError::NoSuchKey { .. })
        ));
        assert!(matches!(
            resolve(&target, VersionSelector::Version(VersionId::encode(1, 2))),
            Err(S3FsError::NoSuchKey { .. })
        ));
    }

    #[test]
    fn test_should_not_resolve_bare_directory() {
        let dir = tempfile::tempdir().expect("temp dir");
        std::fs::create_dir(dir.path().join("photos")).expect("mkdir");
        let target = ObjectPath::resolve(dir.path(), "photos").expect("resolve");
        assert!(resolve(&target, VersionSelector::Latest).is_err());
        let folder = ObjectPath::resolve(dir.path(), "photos/").expect("resolve");
        assert!(matches!(
            resolve(&folder, VersionSelector::Latest),
            Err(S3FsError::NoSuchKey { .. })
        ));
    }
}
