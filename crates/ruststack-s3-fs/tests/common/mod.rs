//! Shared helpers for the engine integration tests.
//!
//! Every bucket is a fresh temp directory under the cargo target dir, which
//! is more likely than `/tmp` (often tmpfs) to support user extended
//! attributes. Tests skip themselves when it does not.

#![allow(dead_code)]

use std::sync::Once;

use ruststack_s3_fs::{
    BucketRef, ListObjectVersionsInput, ListObjectVersionsOutput, PutObjectInput,
    PutObjectOutput, VersionId, VersionedFs, VersioningStatus,
};
use tempfile::TempDir;

static INIT: Once = Once::new();

/// Initialize tracing (once).
fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .init();
    });
}

/// A bucket root living as long as the test.
pub struct TestBucket {
    pub dir: TempDir,
    pub fs: VersionedFs,
    mode: VersioningStatus,
}

impl TestBucket {
    /// Create a bucket, or `None` when the filesystem lacks user xattrs.
    pub fn new(mode: VersioningStatus) -> Option<Self> {
        init_tracing();
        let dir = tempfile::tempdir_in(env!("CARGO_TARGET_TMPDIR")).expect("temp dir");
        if let Err(e) = VersionedFs::verify_bucket_root(dir.path()) {
            eprintln!("skipping: {e}");
            return None;
        }
        Some(Self {
            dir,
            fs: VersionedFs::default(),
            mode,
        })
    }

    /// Reference to the bucket under the current mode.
    pub fn bucket(&self) -> BucketRef {
        BucketRef::new(self.dir.path(), self.mode)
    }

    /// Switch the bucket's versioning mode for later calls.
    pub fn set_mode(&mut self, mode: VersioningStatus) {
        self.mode = mode;
    }

    pub fn put(&self, key: &str, body: &[u8]) -> PutObjectOutput {
        self.fs
            .put_object(
                &self.bucket(),
                key,
                PutObjectInput::builder().body(body.to_vec()).build(),
            )
            .expect("put object")
    }

    pub fn get(&self, key: &str, version_id: Option<VersionId>) -> Vec<u8> {
        let vid = version_id.map(|v| v.to_string());
        self.fs
            .get_object(&self.bucket(), key, vid.as_deref())
            .expect("get object")
            .body
            .to_vec()
    }

    /// Every version and delete marker of the bucket, fetched in one page.
    pub fn versions(&self) -> ListObjectVersionsOutput {
        self.fs
            .list_object_versions(&self.bucket(), &ListObjectVersionsInput::default())
            .expect("list versions")
    }

    /// `(version id, is delete marker)` of `key`, newest first.
    pub fn history_of(&self, key: &str) -> Vec<(VersionId, bool)> {
        let out = self.versions();
        let mut all: Vec<_> = out
            .versions
            .iter()
            .filter(|v| v.key == key)
            .map(|v| (v.last_modified, v.version_id, false))
            .chain(
                out.delete_markers
                    .iter()
                    .filter(|d| d.key == key)
                    .map(|d| (d.last_modified, d.version_id, true)),
            )
            .collect();
        all.sort_by_key(|(last_modified, ..)| std::cmp::Reverse(*last_modified));
        all.into_iter().map(|(_, vid, dm)| (vid, dm)).collect()
    }
}
