//! Request and response types of the versioning engine.
//!
//! Inputs are built with [`typed_builder`]; outputs serialize to camelCase
//! JSON so a front end can hand them out unchanged.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::version_id::VersionId;

// ---------------------------------------------------------------------------
// Bucket
// ---------------------------------------------------------------------------

/// Bucket versioning status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VersioningStatus {
    /// Versioning has never been enabled on this bucket.
    #[default]
    Disabled,
    /// Versioning is currently enabled.
    Enabled,
    /// Versioning was previously enabled but is now suspended.
    Suspended,
}

impl fmt::Display for VersioningStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disabled => "Disabled",
            Self::Enabled => "Enabled",
            Self::Suspended => "Suspended",
        })
    }
}

impl FromStr for VersioningStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("disabled") {
            Ok(Self::Disabled)
        } else if s.eq_ignore_ascii_case("enabled") {
            Ok(Self::Enabled)
        } else if s.eq_ignore_ascii_case("suspended") {
            Ok(Self::Suspended)
        } else {
            Err(format!("unknown versioning status: {s}"))
        }
    }
}

/// A resolved bucket: its root directory and current versioning mode.
///
/// The engine keeps no memory of the mode; every call supplies it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketRef {
    /// Absolute path of the bucket root directory.
    pub root: PathBuf,
    /// Versioning mode in effect for this call.
    pub versioning: VersioningStatus,
}

impl BucketRef {
    /// Create a bucket reference.
    pub fn new(root: impl Into<PathBuf>, versioning: VersioningStatus) -> Self {
        Self {
            root: root.into(),
            versioning,
        }
    }

    /// The bucket root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

// ---------------------------------------------------------------------------
// Put / delete
// ---------------------------------------------------------------------------

/// Payload of a put.
#[derive(Debug)]
pub enum PutBody {
    /// Bytes held in memory; written to a staging file by the engine.
    Bytes(Bytes),
    /// A file already written by the caller (e.g. a completed multipart
    /// upload). It must live on the same filesystem as the bucket and is
    /// renamed into place.
    Staged {
        /// Path of the staged file.
        path: PathBuf,
        /// ETag to record, e.g. a multipart `"<md5>-<n>"`. Computed from
        /// the file contents when absent.
        etag: Option<String>,
    },
}

impl From<Bytes> for PutBody {
    fn from(bytes: Bytes) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<Vec<u8>> for PutBody {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(bytes))
    }
}

impl From<&'static [u8]> for PutBody {
    fn from(bytes: &'static [u8]) -> Self {
        Self::Bytes(Bytes::from_static(bytes))
    }
}

/// Input of [`crate::VersionedFs::put_object`].
#[derive(Debug, TypedBuilder)]
pub struct PutObjectInput {
    /// The payload.
    #[builder(setter(into))]
    pub body: PutBody,
    /// User-defined metadata (`x-amz-meta-*` without the prefix).
    #[builder(default)]
    pub metadata: HashMap<String, String>,
}

/// Result of a put.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PutObjectOutput {
    /// Version id of the new current; `None` when versioning is disabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_id: Option<VersionId>,
    /// Quoted ETag of the payload.
    pub etag: String,
    /// Payload size in bytes.
    pub size: u64,
    /// Modification time of the published file.
    pub last_modified: DateTime<Utc>,
}

/// Result of a delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteObjectOutput {
    /// Version id of the created or removed version, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_id: Option<VersionId>,
    /// Whether that version is a delete marker.
    pub delete_marker: bool,
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

/// Metadata of one object version, as returned by head and get.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectInfo {
    /// The object key.
    pub key: String,
    /// Version id of the returned version.
    pub version_id: VersionId,
    /// Whether the returned version is the current one.
    pub is_latest: bool,
    /// Quoted ETag.
    pub etag: String,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time.
    pub last_modified: DateTime<Utc>,
    /// User-defined metadata.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

/// Result of a get.
#[derive(Debug, Clone)]
pub struct GetObjectOutput {
    /// Metadata of the returned version.
    pub info: ObjectInfo,
    /// The object payload.
    pub body: Bytes,
}

// ---------------------------------------------------------------------------
// Listing
// ---------------------------------------------------------------------------

/// Input of [`crate::VersionedFs::list_object_versions`].
#[derive(Debug, Clone, Default, TypedBuilder)]
pub struct ListObjectVersionsInput {
    /// Only keys starting with this prefix.
    #[builder(default, setter(into))]
    pub prefix: String,
    /// Group keys sharing a prefix up to this delimiter.
    #[builder(default, setter(into, strip_option))]
    pub delimiter: Option<String>,
    /// Resume after this key.
    #[builder(default, setter(into, strip_option))]
    pub key_marker: Option<String>,
    /// Resume after this version of `key_marker`.
    #[builder(default, setter(into, strip_option))]
    pub version_id_marker: Option<String>,
    /// Page size; capped at the configured maximum.
    #[builder(default, setter(strip_option))]
    pub max_keys: Option<usize>,
}

/// One object version in a version listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectVersionEntry {
    /// The object key.
    pub key: String,
    /// Version id.
    pub version_id: VersionId,
    /// Whether this is the current version of its key.
    pub is_latest: bool,
    /// Quoted ETag.
    pub etag: String,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time.
    pub last_modified: DateTime<Utc>,
}

/// One delete marker in a version listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteMarkerEntry {
    /// The object key.
    pub key: String,
    /// Version id.
    pub version_id: VersionId,
    /// Whether this is the current version of its key.
    pub is_latest: bool,
    /// Last modification time.
    pub last_modified: DateTime<Utc>,
}

/// Result of a version listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListObjectVersionsOutput {
    /// Object versions, key ascending then newest first.
    pub versions: Vec<ObjectVersionEntry>,
    /// Delete markers, in the same order.
    pub delete_markers: Vec<DeleteMarkerEntry>,
    /// Common prefixes when a delimiter is used.
    pub common_prefixes: Vec<String>,
    /// Whether more results are available.
    pub is_truncated: bool,
    /// Key marker of the next page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_key_marker: Option<String>,
    /// Version-id marker of the next page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_version_id_marker: Option<VersionId>,
    /// Effective page size.
    pub max_keys: usize,
}

/// Input of [`crate::VersionedFs::list_objects`].
#[derive(Debug, Clone, Default, TypedBuilder)]
pub struct ListObjectsInput {
    /// Only keys starting with this prefix.
    #[builder(default, setter(into))]
    pub prefix: String,
    /// Group keys sharing a prefix up to this delimiter.
    #[builder(default, setter(into, strip_option))]
    pub delimiter: Option<String>,
    /// Only keys strictly after this one.
    #[builder(default, setter(into, strip_option))]
    pub start_after: Option<String>,
    /// Page size; capped at the configured maximum.
    #[builder(default, setter(strip_option))]
    pub max_keys: Option<usize>,
}

/// One current object in an object listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectSummary {
    /// The object key.
    pub key: String,
    /// Quoted ETag.
    pub etag: String,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time.
    pub last_modified: DateTime<Utc>,
}

/// Result of an object listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListObjectsOutput {
    /// Current objects, key ascending.
    pub objects: Vec<ObjectSummary>,
    /// Common prefixes when a delimiter is used.
    pub common_prefixes: Vec<String>,
    /// Whether more results are available.
    pub is_truncated: bool,
    /// `start_after` of the next page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_marker: Option<String>,
    /// Effective page size.
    pub max_keys: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_parse_versioning_status() {
        assert_eq!("Enabled".parse(), Ok(VersioningStatus::Enabled));
        assert_eq!("suspended".parse(), Ok(VersioningStatus::Suspended));
        assert_eq!("DISABLED".parse(), Ok(VersioningStatus::Disabled));
        assert!("on".parse::<VersioningStatus>().is_err());
        assert_eq!(VersioningStatus::default(), VersioningStatus::Disabled);
    }

    #[test]
    fn test_should_build_list_input_with_defaults() {
        let input = ListObjectVersionsInput::builder()
            .prefix("photos/")
            .delimiter("/")
            .build();
        assert_eq!(input.prefix, "photos/");
        assert_eq!(input.delimiter.as_deref(), Some("/"));
        assert!(input.key_marker.is_none());
        assert!(input.max_keys.is_none());
    }

    #[test]
    fn test_should_omit_version_id_when_disabled() {
        let out = PutObjectOutput {
            version_id: None,
            etag: "\"abc\"".to_owned(),
            size: 3,
            last_modified: DateTime::<Utc>::UNIX_EPOCH,
        };
        let json = serde_json::to_string(&out).expect("serialize");
        assert!(!json.contains("versionId"));
        assert!(json.contains("lastModified"));
    }

    #[test]
    fn test_should_serialize_delete_output() {
        let out = DeleteObjectOutput {
            version_id: Some(VersionId::Null),
            delete_marker: true,
        };
        let json = serde_json::to_string(&out).expect("serialize");
        assert_eq!(json, r#"{"versionId":"null","deleteMarker":true}"#);
    }
}
