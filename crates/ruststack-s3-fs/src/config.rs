//! Engine configuration.
//!
//! Provides [`S3FsConfig`] for tuning the versioning engine. Values are
//! loaded from environment variables on top of the defaults.

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

/// Versioning engine configuration.
///
/// # Examples
///
/// ```
/// use ruststack_s3_fs::config::S3FsConfig;
///
/// let config = S3FsConfig::default();
/// assert_eq!(config.list_max_keys, 1000);
/// assert!(config.serialize_key_writes);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct S3FsConfig {
    /// Page size used when a listing request does not give one, and the
    /// upper bound of any requested page size.
    #[builder(default = 1000)]
    pub list_max_keys: usize,

    /// Whether directory-entry snapshots are kept between listings.
    #[builder(default = true)]
    pub dir_cache_enabled: bool,

    /// Number of cached directories above which the cache is cleared.
    #[builder(default = 4096)]
    pub dir_cache_max_entries: usize,

    /// Whether payload files are fsynced before they are published.
    #[builder(default = false)]
    pub fsync: bool,

    /// Whether mutations of the same key are serialized in-process.
    #[builder(default = true)]
    pub serialize_key_writes: bool,

    /// Log level filter string (e.g. `"info"`, `"debug"`).
    #[builder(default = String::from("info"))]
    pub log_level: String,
}

impl Default for S3FsConfig {
    fn default() -> Self {
        Self {
            list_max_keys: 1000,
            dir_cache_enabled: true,
            dir_cache_max_entries: 4096,
            fsync: false,
            serialize_key_writes: true,
            log_level: String::from("info"),
        }
    }
}

impl S3FsConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `S3FS_LIST_MAX_KEYS` | `1000` |
    /// | `S3FS_DIR_CACHE` | `true` |
    /// | `S3FS_DIR_CACHE_MAX_ENTRIES` | `4096` |
    /// | `S3FS_FSYNC` | `false` |
    /// | `S3FS_SERIALIZE_KEY_WRITES` | `true` |
    /// | `LOG_LEVEL` | `info` |
    ///
    /// Unparsable numbers keep their default.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("S3FS_LIST_MAX_KEYS") {
            if let Ok(n) = v.parse::<usize>() {
                if n > 0 {
                    config.list_max_keys = n;
                }
            }
        }
        if let Ok(v) = std::env::var("S3FS_DIR_CACHE") {
            config.dir_cache_enabled = parse_bool(&v);
        }
        if let Ok(v) = std::env::var("S3FS_DIR_CACHE_MAX_ENTRIES") {
            if let Ok(n) = v.parse::<usize>() {
                config.dir_cache_max_entries = n;
            }
        }
        if let Ok(v) = std::env::var("S3FS_FSYNC") {
            config.fsync = parse_bool(&v);
        }
        if let Ok(v) = std::env::var("S3FS_SERIALIZE_KEY_WRITES") {
            config.serialize_key_writes = parse_bool(&v);
        }
        if let Ok(v) = std::env::var("LOG_LEVEL") {
            config.log_level = v;
        }

        config
    }

    /// Effective page size for a listing request.
    #[must_use]
    pub fn page_size(&self, requested: Option<usize>) -> usize {
        requested.map_or(self.list_max_keys, |n| n.min(self.list_max_keys))
    }
}

/// Parse a string as a boolean, accepting `"1"` and `"true"` (case-insensitive).
fn parse_bool(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_create_default_config() {
        let config = S3FsConfig::default();
        assert_eq!(config.list_max_keys, 1000);
        assert!(config.dir_cache_enabled);
        assert_eq!(config.dir_cache_max_entries, 4096);
        assert!(!config.fsync);
        assert!(config.serialize_key_writes);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_should_load_from_env() {
        let config = S3FsConfig::from_env();
        assert!(config.list_max_keys > 0);
    }

    #[test]
    fn test_should_build_with_typed_builder() {
        let config = S3FsConfig::builder()
            .list_max_keys(50)
            .dir_cache_enabled(false)
            .fsync(true)
            .log_level("debug".into())
            .build();

        assert_eq!(config.list_max_keys, 50);
        assert!(!config.dir_cache_enabled);
        assert_eq!(config.dir_cache_max_entries, 4096);
        assert!(config.fsync);
        assert!(config.serialize_key_writes);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_should_clamp_requested_page_size() {
        let config = S3FsConfig::builder().list_max_keys(100).build();
        assert_eq!(config.page_size(None), 100);
        assert_eq!(config.page_size(Some(10)), 10);
        assert_eq!(config.page_size(Some(5000)), 100);
        assert_eq!(config.page_size(Some(0)), 0);
    }

    #[test]
    fn test_should_serialize_to_camel_case_json() {
        let config = S3FsConfig::default();
        let json = serde_json::to_string(&config).expect("test serialization");
        assert!(json.contains("listMaxKeys"));
        assert!(json.contains("serializeKeyWrites"));
    }

    #[test]
    fn test_should_parse_bool_values() {
        assert!(parse_bool("1"));
        assert!(parse_bool("true"));
        assert!(parse_bool("TRUE"));
        assert!(!parse_bool("0"));
        assert!(!parse_bool("false"));
        assert!(!parse_bool(""));
    }
}
