//! Self-describing version identifiers.
//!
//! A version id is derived from the modification time and the inode number
//! of the file that holds the version. It can always be recomputed from a
//! `stat` of that file, and parsed back without touching the filesystem:
//!
//! ```text
//! mtime-<base36 mtime nanoseconds>-ino-<base36 inode>
//! ```
//!
//! The literal `null` identifies objects written before versioning was ever
//! enabled on a bucket, and every write made while versioning is suspended.
//!
//! # Examples
//!
//! ```
//! use ruststack_s3_fs::version_id::VersionId;
//!
//! let id = VersionId::encode(1_700_000_000_123_456_789, 42);
//! assert_eq!(id.to_string(), "mtime-cwyvpeni7w9h-ino-16");
//! assert_eq!(id.decode(), Some((1_700_000_000_123_456_789, 42)));
//!
//! let null: VersionId = "null".parse().unwrap();
//! assert!(null.is_null());
//! assert_eq!(null.decode(), None);
//! ```

use std::fmt;
use std::fs::Metadata;
use std::os::unix::fs::MetadataExt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// The sentinel version id of un-versioned and suspended-mode writes.
pub const NULL_VERSION_ID: &str = "null";

const MTIME_PREFIX: &str = "mtime-";
const INO_SEPARATOR: &str = "-ino-";
const BASE36_DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Error returned when a string is neither `null` nor a well-formed
/// `mtime-<t>-ino-<i>` version id.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid version id format: {0}")]
pub struct InvalidVersionIdError(pub String);

/// A version identifier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum VersionId {
    /// The `null` version.
    #[default]
    Null,
    /// A version identified by the `(mtime, inode)` pair of its file.
    Unique {
        /// Modification time in nanoseconds since the Unix epoch.
        mtime_ns: u64,
        /// Inode number of the file.
        ino: u64,
    },
}

impl VersionId {
    /// Build a version id from a modification time and an inode number.
    #[must_use]
    pub fn encode(mtime_ns: u64, ino: u64) -> Self {
        Self::Unique { mtime_ns, ino }
    }

    /// Derive the version id of a file from its metadata.
    #[must_use]
    pub fn from_metadata(meta: &Metadata) -> Self {
        Self::encode(mtime_ns(meta), meta.ino())
    }

    /// Return the `(mtime_ns, inode)` pair, or `None` for the `null` version.
    #[must_use]
    pub fn decode(&self) -> Option<(u64, u64)> {
        match self {
            Self::Null => None,
            Self::Unique { mtime_ns, ino } => Some((*mtime_ns, *ino)),
        }
    }

    /// Whether this is the `null` version.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str(NULL_VERSION_ID),
            Self::Unique { mtime_ns, ino } => write!(
                f,
                "{MTIME_PREFIX}{}{INO_SEPARATOR}{}",
                to_base36(*mtime_ns),
                to_base36(*ino)
            ),
        }
    }
}

impl FromStr for VersionId {
    type Err = InvalidVersionIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == NULL_VERSION_ID {
            return Ok(Self::Null);
        }
        let invalid = || InvalidVersionIdError(s.to_owned());
        let (mtime, ino) = s
            .strip_prefix(MTIME_PREFIX)
            .and_then(|rest| rest.split_once(INO_SEPARATOR))
            .ok_or_else(invalid)?;
        let mtime_ns = from_base36(mtime).ok_or_else(invalid)?;
        let ino = from_base36(ino).ok_or_else(invalid)?;
        Ok(Self::Unique { mtime_ns, ino })
    }
}

impl Serialize for VersionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for VersionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Modification time of a file in nanoseconds since the Unix epoch.
///
/// Pre-epoch timestamps clamp to zero.
#[must_use]
pub fn mtime_ns(meta: &Metadata) -> u64 {
    let secs = u64::try_from(meta.mtime()).unwrap_or(0);
    let nanos = u64::try_from(meta.mtime_nsec()).unwrap_or(0);
    secs.saturating_mul(1_000_000_000).saturating_add(nanos)
}

#[allow(clippy::cast_possible_truncation)]
fn to_base36(mut n: u64) -> String {
    if n == 0 {
        return "0".to_owned();
    }
    let mut digits = Vec::with_capacity(13);
    while n > 0 {
        digits.push(char::from(BASE36_DIGITS[(n % 36) as usize]));
        n /= 36;
    }
    digits.iter().rev().collect()
}

fn from_base36(s: &str) -> Option<u64> {
    if s.is_empty()
        || !s
            .bytes()
            .all(|b| b.is_ascii_digit() || b.is_ascii_lowercase())
    {
        return None;
    }
    u64::from_str_radix(s, 36).ok()
}
