//! Versioning engine error types.
//!
//! Defines [`S3FsError`], the single error enum every engine operation
//! returns. Each variant maps to an S3 wire error code through
//! [`S3FsError::code`] and to an HTTP status through
//! [`S3FsError::status_code`], so a request layer can render the error
//! without knowing how the engine produced it.
//!
//! # Usage
//!
//! ```
//! use ruststack_s3_fs::error::S3FsError;
//!
//! let err = S3FsError::NoSuchKey {
//!     key: "photos/cat.jpg".to_owned(),
//! };
//! assert_eq!(err.code(), "NoSuchKey");
//! assert_eq!(err.status_code(), http::StatusCode::NOT_FOUND);
//! ```

use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use http::StatusCode;

use crate::version_id::{InvalidVersionIdError, VersionId};

/// Versioning engine error type.
#[derive(Debug, thiserror::Error)]
pub enum S3FsError {
    // -----------------------------------------------------------------------
    // Lookup errors
    // -----------------------------------------------------------------------
    /// The key, or the requested version of it, does not exist.
    #[error("The specified key does not exist: {key}")]
    NoSuchKey {
        /// The key that was not found.
        key: String,
    },

    /// A version-targeted read landed on a delete marker.
    #[error("The specified method is not allowed against this resource: key={key}, version_id={version_id}")]
    MethodNotAllowed {
        /// The key that was requested.
        key: String,
        /// Version id of the delete marker.
        version_id: VersionId,
        /// Modification time of the delete marker.
        last_modified: DateTime<Utc>,
    },

    // -----------------------------------------------------------------------
    // Validation errors
    // -----------------------------------------------------------------------
    /// A version id is neither `null` nor well formed.
    #[error("Invalid version id specified: {version_id}")]
    InvalidVersionId {
        /// The rejected version id.
        version_id: String,
    },

    /// An argument provided is invalid.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Description of the invalid argument.
        message: String,
    },

    /// The key exceeds the maximum key length.
    #[error("Your key is too long")]
    KeyTooLong,

    // -----------------------------------------------------------------------
    // Filesystem errors
    // -----------------------------------------------------------------------
    /// The bucket root does not support user extended attributes.
    #[error("Filesystem at {} does not support extended attributes", path.display())]
    UnsupportedFilesystem {
        /// The probed path.
        path: PathBuf,
        /// The error returned by the probe.
        #[source]
        source: io::Error,
    },

    /// A filesystem call failed.
    #[error("{context} {}: {source}", path.display())]
    Io {
        /// What the engine was doing.
        context: &'static str,
        /// The path being touched.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    // -----------------------------------------------------------------------
    // Internal / catch-all
    // -----------------------------------------------------------------------
    /// Any other failure.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl S3FsError {
    /// Wrap an [`io::Error`] with the operation and path it came from.
    pub fn io(context: &'static str, path: impl AsRef<Path>, source: io::Error) -> Self {
        Self::Io {
            context,
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// The S3 error code string for this error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoSuchKey { .. } => "NoSuchKey",
            Self::MethodNotAllowed { .. } => "MethodNotAllowed",
            Self::InvalidVersionId { .. } | Self::InvalidArgument { .. } => "InvalidArgument",
            Self::KeyTooLong => "KeyTooLongError",
            Self::UnsupportedFilesystem { .. } => "NotImplemented",
            Self::Io { .. } | Self::Internal(_) => "InternalError",
        }
    }

    /// The HTTP status this error is reported with.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NoSuchKey { .. } => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            Self::InvalidVersionId { .. } | Self::InvalidArgument { .. } | Self::KeyTooLong => {
                StatusCode::BAD_REQUEST
            }
            Self::UnsupportedFilesystem { .. } => StatusCode::NOT_IMPLEMENTED,
            Self::Io { .. } | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the error refers to a delete marker (`x-amz-delete-marker: true`).
    #[must_use]
    pub fn is_delete_marker(&self) -> bool {
        matches!(self, Self::MethodNotAllowed { .. })
    }

    /// Whether the error is a plain not-found.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NoSuchKey { .. })
    }
}

impl From<InvalidVersionIdError> for S3FsError {
    fn from(err: InvalidVersionIdError) -> Self {
        Self::InvalidVersionId { version_id: err.0 }
    }
}

/// Convenience result alias for engine operations.
pub type S3FsResult<T> = Result<T, S3FsError>;
