//! Filesystem-backed S3 object versioning for RustStack.
//!
//! Objects live as plain files under a bucket root directory: key
//! `photos/2024/cat.jpg` is the file `<root>/photos/2024/cat.jpg`, and a key
//! ending in `/` is stored as a `.folder` file inside its directory. Older
//! versions and delete markers of a key sit next to it in a hidden
//! `.versions` directory. Version ids and the version-state flags are kept
//! in user extended attributes of each file, so a version keeps its identity
//! when it moves between the current slot and the history.
//!
//! # Architecture
//!
//! ```text
//!   VersionedFs (facade: validation, key locks, cache invalidation)
//!      |             |                 |
//!      v             v                 v
//!   resolver      reader            lister
//!   (put/delete)  (get/head)        (paginated walk)
//!      |             |                 |
//!      +------+------+--------+--------+
//!             |               |
//!             v               v
//!   layout / hidden /     DirCache
//!   slot / attrs          (directory snapshots)
//!             |
//!             v
//!   bucket root on a filesystem with user xattrs
//! ```
//!
//! The bucket's versioning mode is not stored here; every operation takes
//! a [`BucketRef`] carrying the root and the mode in effect.

pub mod attrs;
pub mod cache;
pub mod config;
mod engine;
pub mod error;
pub mod hidden;
pub mod layout;
pub mod lister;
pub mod locks;
pub mod reader;
pub mod resolver;
pub mod slot;
pub mod types;
pub mod validation;
pub mod version_id;

pub use config::S3FsConfig;
pub use engine::VersionedFs;
pub use error::{S3FsError, S3FsResult};
pub use types::{
    BucketRef, DeleteMarkerEntry, DeleteObjectOutput, GetObjectOutput, ListObjectVersionsInput,
    ListObjectVersionsOutput, ListObjectsInput, ListObjectsOutput, ObjectInfo, ObjectSummary,
    ObjectVersionEntry, PutBody, PutObjectInput, PutObjectOutput, VersioningStatus,
};
pub use version_id::VersionId;
