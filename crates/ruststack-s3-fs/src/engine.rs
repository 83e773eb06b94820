//! The versioning engine facade.
//!
//! [`VersionedFs`] ties key validation, staging, the per-key locks and the
//! directory cache together. It holds no per-bucket state: every call names
//! the bucket root and the versioning mode in effect.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use crate::attrs;
use crate::cache::DirCache;
use crate::config::S3FsConfig;
use crate::error::{S3FsError, S3FsResult};
use crate::layout::ObjectPath;
use crate::lister;
use crate::locks::KeyLocks;
use crate::reader::{self, ResolvedVersion, VersionSelector};
use crate::resolver;
use crate::types::{
    BucketRef, DeleteObjectOutput, GetObjectOutput, ListObjectVersionsInput,
    ListObjectVersionsOutput, ListObjectsInput, ListObjectsOutput, ObjectInfo, PutBody,
    PutObjectInput, PutObjectOutput,
};
use crate::validation::validate_user_metadata;
use crate::version_id::VersionId;

/// Filesystem-backed S3 object store with versioning.
///
/// Cheap to share behind an [`Arc`]; all methods take `&self`.
///
/// # Examples
///
/// ```no_run
/// use ruststack_s3_fs::{BucketRef, PutObjectInput, VersionedFs, VersioningStatus};
///
/// let fs = VersionedFs::default();
/// let bucket = BucketRef::new("/srv/buckets/photos", VersioningStatus::Enabled);
/// let input = PutObjectInput::builder().body(b"meow".as_slice()).build();
/// let put = fs.put_object(&bucket, "2024/cat.jpg", input).expect("put");
/// assert!(put.version_id.is_some());
/// ```
#[derive(Debug)]
pub struct VersionedFs {
    config: Arc<S3FsConfig>,
    cache: DirCache,
    locks: KeyLocks,
}

impl Default for VersionedFs {
    fn default() -> Self {
        Self::new(S3FsConfig::default())
    }
}

impl VersionedFs {
    /// Create an engine with the given configuration.
    #[must_use]
    pub fn new(config: S3FsConfig) -> Self {
        let cache = DirCache::new(config.dir_cache_enabled, config.dir_cache_max_entries);
        Self {
            config: Arc::new(config),
            cache,
            locks: KeyLocks::default(),
        }
    }

    /// Returns a reference to the engine configuration.
    #[must_use]
    pub fn config(&self) -> &S3FsConfig {
        &self.config
    }

    /// Check that `root` is a directory whose filesystem supports user
    /// extended attributes. Run once per bucket before serving it.
    pub fn verify_bucket_root(root: &Path) -> S3FsResult<()> {
        let meta =
            std::fs::metadata(root).map_err(|e| S3FsError::io("stat bucket root", root, e))?;
        if !meta.is_dir() {
            return Err(S3FsError::InvalidArgument {
                message: format!("Bucket root {} is not a directory", root.display()),
            });
        }
        attrs::probe(root).map_err(|source| S3FsError::UnsupportedFilesystem {
            path: root.to_path_buf(),
            source,
        })?;
        debug!(root = %root.display(), "bucket root supports extended attributes");
        Ok(())
    }

    /// Store a new version of `key`.
    pub fn put_object(
        &self,
        bucket: &BucketRef,
        key: &str,
        input: PutObjectInput,
    ) -> S3FsResult<PutObjectOutput> {
        validate_user_metadata(&input.metadata)?;
        let target = ObjectPath::resolve(bucket.root(), key)?;

        let staged = match input.body {
            PutBody::Bytes(body) => {
                resolver::stage_bytes(&target, &body, &input.metadata, self.config.fsync)?
            }
            PutBody::Staged { path, etag } => {
                resolver::stage_file(&target, path, etag, &input.metadata, self.config.fsync)?
            }
        };

        let output = {
            let _guard = self.lock(&target);
            resolver::publish(&target, bucket.versioning, staged)?
        };
        self.invalidate(&target);

        debug!(
            key = %key,
            mode = %bucket.versioning,
            version_id = ?output.version_id,
            size = output.size,
            "put_object completed"
        );
        Ok(output)
    }

    /// Delete the latest version of `key`, or the version `version_id` names.
    pub fn delete_object(
        &self,
        bucket: &BucketRef,
        key: &str,
        version_id: Option<&str>,
    ) -> S3FsResult<DeleteObjectOutput> {
        let target = ObjectPath::resolve(bucket.root(), key)?;
        let version_id = version_id.map(str::parse::<VersionId>).transpose()?;

        let output = {
            let _guard = self.lock(&target);
            match version_id {
                Some(vid) => resolver::delete_version(&target, vid)?,
                None => resolver::delete_latest(&target, bucket.versioning)?,
            }
        };
        self.invalidate(&target);

        debug!(
            key = %key,
            mode = %bucket.versioning,
            version_id = ?output.version_id,
            delete_marker = output.delete_marker,
            "delete_object completed"
        );
        Ok(output)
    }

    /// Read a version of `key` into memory.
    pub fn get_object(
        &self,
        bucket: &BucketRef,
        key: &str,
        version_id: Option<&str>,
    ) -> S3FsResult<GetObjectOutput> {
        let (info, mut file) = self.open_object(bucket, key, version_id)?;
        let mut body = Vec::with_capacity(usize::try_from(info.size).unwrap_or(0));
        file.read_to_end(&mut body)
            .map_err(|e| S3FsError::io("read object", key, e))?;
        Ok(GetObjectOutput {
            info,
            body: Bytes::from(body),
        })
    }

    /// Open a version of `key` for streaming. The handle stays valid when a
    /// concurrent write demotes or replaces the version.
    pub fn open_object(
        &self,
        bucket: &BucketRef,
        key: &str,
        version_id: Option<&str>,
    ) -> S3FsResult<(ObjectInfo, File)> {
        let resolved = self.resolve(bucket, key, version_id)?;
        let info = resolved
            .file
            .info(key, resolved.version_id, resolved.is_latest);
        debug!(key = %key, version_id = %info.version_id, "open_object completed");
        Ok((info, resolved.file.file))
    }

    /// Metadata of a version of `key`.
    pub fn head_object(
        &self,
        bucket: &BucketRef,
        key: &str,
        version_id: Option<&str>,
    ) -> S3FsResult<ObjectInfo> {
        let resolved = self.resolve(bucket, key, version_id)?;
        Ok(resolved
            .file
            .info(key, resolved.version_id, resolved.is_latest))
    }

    /// List versions and delete markers, newest first within each key.
    pub fn list_object_versions(
        &self,
        bucket: &BucketRef,
        input: &ListObjectVersionsInput,
    ) -> S3FsResult<ListObjectVersionsOutput> {
        let max_keys = self.config.page_size(input.max_keys);
        let output = lister::list_object_versions(&self.cache, bucket.root(), input, max_keys)?;
        debug!(
            prefix = %input.prefix,
            versions = output.versions.len(),
            delete_markers = output.delete_markers.len(),
            common_prefixes = output.common_prefixes.len(),
            is_truncated = output.is_truncated,
            "list_object_versions completed"
        );
        Ok(output)
    }

    /// List current objects.
    pub fn list_objects(
        &self,
        bucket: &BucketRef,
        input: &ListObjectsInput,
    ) -> S3FsResult<ListObjectsOutput> {
        let max_keys = self.config.page_size(input.max_keys);
        let output = lister::list_objects(&self.cache, bucket.root(), input, max_keys)?;
        debug!(
            prefix = %input.prefix,
            objects = output.objects.len(),
            common_prefixes = output.common_prefixes.len(),
            is_truncated = output.is_truncated,
            "list_objects completed"
        );
        Ok(output)
    }

    fn resolve(
        &self,
        bucket: &BucketRef,
        key: &str,
        version_id: Option<&str>,
    ) -> S3FsResult<ResolvedVersion> {
        let target = ObjectPath::resolve(bucket.root(), key)?;
        let selector = VersionSelector::parse(version_id)?;
        reader::resolve(&target, selector)
    }

    fn lock(&self, target: &ObjectPath) -> Option<parking_lot::MutexGuard<'_, ()>> {
        self.config
            .serialize_key_writes
            .then(|| self.locks.lock(&target.current()))
    }

    fn invalidate(&self, target: &ObjectPath) {
        self.cache.invalidate(target.parent());
        self.cache.invalidate(&target.versions_dir());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::VersioningStatus;

    fn bucket(mode: VersioningStatus) -> Option<(tempfile::TempDir, BucketRef)> {
        let dir = tempfile::tempdir().expect("temp dir");
        if attrs::probe(dir.path()).is_err() {
            eprintln!("skipping: no user xattr support in temp dir");
            return None;
        }
        let bucket = BucketRef::new(dir.path(), mode);
        Some((dir, bucket))
    }

    fn put(
        fs: &VersionedFs,
        bucket: &BucketRef,
        key: &str,
        body: &'static [u8],
    ) -> PutObjectOutput {
        fs.put_object(bucket, key, PutObjectInput::builder().body(body).build())
            .expect("put")
    }

    #[test]
    fn test_should_share_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<VersionedFs>();
    }

    #[test]
    fn test_should_reject_invalid_key_before_touching_disk() {
        let dir = tempfile::tempdir().expect("temp dir");
        let bucket = BucketRef::new(dir.path(), VersioningStatus::Enabled);
        let fs = VersionedFs::default();
        let err = fs
            .put_object(&bucket, "a/../b", PutObjectInput::builder().body(b"x".as_slice()).build())
            .expect_err("invalid key");
        assert_eq!(err.code(), "InvalidArgument");
        assert_eq!(std::fs::read_dir(dir.path()).expect("read dir").count(), 0);
    }

    #[test]
    fn test_should_reject_malformed_version_id() {
        let dir = tempfile::tempdir().expect("temp dir");
        let bucket = BucketRef::new(dir.path(), VersioningStatus::Enabled);
        let fs = VersionedFs::default();
        assert!(matches!(
            fs.delete_object(&bucket, "k", Some("v1")),
            Err(S3FsError::InvalidVersionId { .. })
        ));
        assert!(matches!(
            fs.head_object(&bucket, "k", Some("mtime-zz")),
            Err(S3FsError::InvalidVersionId { .. })
        ));
    }

    #[test]
    fn test_should_reject_file_as_bucket_root() {
        let dir = tempfile::tempdir().expect("temp dir");
        let file = dir.path().join("plain");
        std::fs::write(&file, b"").expect("write");
        assert!(matches!(
            VersionedFs::verify_bucket_root(&file),
            Err(S3FsError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_should_put_and_get_latest() {
        let Some((_dir, bucket)) = bucket(VersioningStatus::Enabled) else {
            return;
        };
        let fs = VersionedFs::default();
        let out = put(&fs, &bucket, "docs/readme.txt", b"hello");
        let vid = out.version_id.expect("version id");
        assert!(!vid.is_null());
        assert_eq!(out.size, 5);

        let got = fs.get_object(&bucket, "docs/readme.txt", None).expect("get");
        assert_eq!(got.body, Bytes::from_static(b"hello"));
        assert_eq!(got.info.version_id, vid);
        assert!(got.info.is_latest);
        assert_eq!(got.info.etag, out.etag);
    }

    #[test]
    fn test_should_read_old_version_by_id() {
        let Some((_dir, bucket)) = bucket(VersioningStatus::Enabled) else {
            return;
        };
        let fs = VersionedFs::default();
        let first = put(&fs, &bucket, "k", b"one").version_id.expect("vid");
        put(&fs, &bucket, "k", b"two");

        let old = fs
            .get_object(&bucket, "k", Some(&first.to_string()))
            .expect("get old");
        assert_eq!(old.body, Bytes::from_static(b"one"));
        assert!(!old.info.is_latest);

        let head = fs.head_object(&bucket, "k", None).expect("head");
        assert_eq!(head.size, 3);
        assert!(head.is_latest);
    }

    #[test]
    fn test_should_hide_deleted_key_from_latest_reads() {
        let Some((_dir, bucket)) = bucket(VersioningStatus::Enabled) else {
            return;
        };
        let fs = VersionedFs::default();
        put(&fs, &bucket, "k", b"one");
        let del = fs.delete_object(&bucket, "k", None).expect("delete");
        assert!(del.delete_marker);

        let err = fs.get_object(&bucket, "k", None).expect_err("deleted");
        assert!(err.is_not_found());
        let marker = del.version_id.expect("marker id").to_string();
        let err = fs.head_object(&bucket, "k", Some(&marker)).expect_err("marker");
        assert!(err.is_delete_marker());
    }

    #[test]
    fn test_should_keep_history_out_of_listings_when_disabled() {
        let Some((_dir, bucket)) = bucket(VersioningStatus::Disabled) else {
            return;
        };
        let fs = VersionedFs::default();
        assert_eq!(put(&fs, &bucket, "k", b"one").version_id, None);
        put(&fs, &bucket, "k", b"two");

        let listed = fs
            .list_object_versions(&bucket, &ListObjectVersionsInput::default())
            .expect("list");
        assert_eq!(listed.versions.len(), 1);
        assert_eq!(listed.versions[0].version_id, VersionId::Null);
        assert_eq!(listed.max_keys, 1000);
    }

    #[test]
    fn test_should_cap_requested_page_size() {
        let Some((_dir, bucket)) = bucket(VersioningStatus::Enabled) else {
            return;
        };
        let fs = VersionedFs::new(S3FsConfig::builder().list_max_keys(2).build());
        for key in ["a", "b", "c"] {
            put(&fs, &bucket, key, b"x");
        }
        let input = ListObjectsInput::builder().max_keys(10).build();
        let listed = fs.list_objects(&bucket, &input).expect("list");
        assert_eq!(listed.max_keys, 2);
        assert_eq!(listed.objects.len(), 2);
        assert!(listed.is_truncated);
        assert_eq!(listed.next_marker.as_deref(), Some("b"));
    }

    #[test]
    fn test_should_verify_supported_bucket_root() {
        let Some((dir, _bucket)) = bucket(VersioningStatus::Enabled) else {
            return;
        };
        VersionedFs::verify_bucket_root(dir.path()).expect("verify");
        assert_eq!(std::fs::read_dir(dir.path()).expect("read dir").count(), 0);
    }
}
