//! Validation of keys and user metadata.
//!
//! Everything here runs before the engine touches the filesystem, so a
//! rejected request never leaves partial state behind.

use std::collections::HashMap;
use std::hash::BuildHasher;

use crate::error::S3FsError;
use crate::layout::{FOLDER_OBJECT, UPLOAD_PREFIX, VERSIONS_DIR};

/// Maximum total size (in bytes) of all user-defined metadata keys and values.
const MAX_METADATA_SIZE: usize = 2048;

/// Maximum object key length in bytes.
const MAX_KEY_BYTES: usize = 1024;

/// Longest encoded version id: `mtime-` and `-ino-` around two 13-digit
/// base36 numbers.
const MAX_VERSION_ID_BYTES: usize = 6 + 13 + 5 + 13;

/// Maximum key segment length in bytes. A history entry is named
/// `<segment>_<id>` and must still fit in a 255-byte file name.
const MAX_SEGMENT_BYTES: usize = 255 - 1 - MAX_VERSION_ID_BYTES;

/// Validate an object key.
///
/// Rules:
/// - 1-1024 bytes, with no segment longer than 217 bytes
/// - no leading `/` and no NUL byte
/// - no empty, `.` or `..` segment (a single trailing `/` is allowed and
///   marks a content-directory key)
/// - no segment named `.versions` or `.folder`, and none starting with the
///   upload staging prefix
///
/// # Errors
///
/// Returns [`S3FsError::KeyTooLong`] for oversized keys and
/// [`S3FsError::InvalidArgument`] for every other violation.
///
/// # Examples
///
/// ```
/// use ruststack_s3_fs::validation::validate_object_key;
///
/// assert!(validate_object_key("photos/2024/cat.jpg").is_ok());
/// assert!(validate_object_key("photos/").is_ok());
/// assert!(validate_object_key("photos/.versions/x").is_err());
/// ```
pub fn validate_object_key(key: &str) -> Result<(), S3FsError> {
    if key.is_empty() {
        return Err(invalid("Object key must not be empty"));
    }

    if key.len() > MAX_KEY_BYTES {
        return Err(S3FsError::KeyTooLong);
    }

    if key.starts_with('/') {
        return Err(invalid("Object key must not start with '/'"));
    }

    if key.contains('\0') {
        return Err(invalid("Object key must not contain NUL"));
    }

    let body = key.strip_suffix('/').unwrap_or(key);
    for segment in body.split('/') {
        if segment.len() > MAX_SEGMENT_BYTES {
            return Err(S3FsError::KeyTooLong);
        }
        match segment {
            "" => return Err(invalid("Object key must not contain empty segments")),
            "." | ".." => return Err(invalid("Object key must not contain '.' or '..' segments")),
            VERSIONS_DIR | FOLDER_OBJECT => {
                return Err(S3FsError::InvalidArgument {
                    message: format!("Object key segment '{segment}' is reserved"),
                });
            }
            s if s.starts_with(UPLOAD_PREFIX) => {
                return Err(S3FsError::InvalidArgument {
                    message: format!("Object key segment must not start with '{UPLOAD_PREFIX}'"),
                });
            }
            _ => {}
        }
    }

    Ok(())
}

/// Validate user-defined metadata.
///
/// The total size of keys and values must not exceed 2 KB, and keys must be
/// non-empty and NUL-free since each becomes an extended attribute name.
///
/// # Errors
///
/// Returns [`S3FsError::InvalidArgument`] if any rule is violated.
pub fn validate_user_metadata<S: BuildHasher>(
    metadata: &HashMap<String, String, S>,
) -> Result<(), S3FsError> {
    let total_size: usize = metadata.iter().map(|(k, v)| k.len() + v.len()).sum();

    if total_size > MAX_METADATA_SIZE {
        return Err(S3FsError::InvalidArgument {
            message: format!(
                "User-defined metadata must not exceed {MAX_METADATA_SIZE} bytes, got {total_size}"
            ),
        });
    }

    if metadata.keys().any(|k| k.is_empty() || k.contains('\0')) {
        return Err(invalid("User-defined metadata keys must be non-empty and NUL-free"));
    }

    Ok(())
}

fn invalid(message: &str) -> S3FsError {
    S3FsError::InvalidArgument {
        message: message.to_owned(),
    }
}
