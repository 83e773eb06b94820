//! Extended attributes of version files.
//!
//! Every current and historical version carries a small, fixed schema of
//! `user.*` extended attributes. They are read and written through an open
//! file handle so that a version keeps its attributes while it is renamed
//! between the current slot and `.versions`.
//!
//! | Attribute | Meaning |
//! |-----------|---------|
//! | `user.s3fs.version_id` | version id; absent reads as `null` |
//! | `user.s3fs.delete_marker` | `"true"` on delete markers |
//! | `user.s3fs.non_current_timestamp` | demotion time in ms, history only |
//! | `user.s3fs.dir_content` | payload size of a content-directory object |
//! | `user.s3fs.etag` | quoted ETag of the payload |
//! | `user.s3meta.<name>` | user-defined metadata |

use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::hash::BuildHasher;
use std::io;
use std::os::fd::{AsFd, BorrowedFd};
use std::path::Path;

use tracing::warn;

use crate::layout::UPLOAD_PREFIX;
use crate::version_id::VersionId;

const ATTR_VERSION_ID: &CStr = c"user.s3fs.version_id";
const ATTR_DELETE_MARKER: &CStr = c"user.s3fs.delete_marker";
const ATTR_NON_CURRENT: &CStr = c"user.s3fs.non_current_timestamp";
const ATTR_DIR_CONTENT: &CStr = c"user.s3fs.dir_content";
const ATTR_ETAG: &CStr = c"user.s3fs.etag";
const ATTR_PROBE: &CStr = c"user.s3fs.probe";

/// Namespace of user-defined metadata attributes.
pub const USER_META_PREFIX: &str = "user.s3meta.";

/// Decoded attributes of one version file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionAttributes {
    /// Stored version id, `null` when absent.
    pub version_id: VersionId,
    /// Whether the file is a delete marker.
    pub is_delete_marker: bool,
    /// Demotion time in milliseconds since the epoch, set on history only.
    pub non_current_timestamp: Option<u64>,
    /// Payload size recorded for content-directory objects.
    pub dir_content: Option<u64>,
    /// Stored ETag.
    pub etag: Option<String>,
    /// User-defined metadata.
    pub user: HashMap<String, String>,
}

impl VersionAttributes {
    /// Whether the version has been demoted.
    #[must_use]
    pub fn is_noncurrent(&self) -> bool {
        self.non_current_timestamp.is_some()
    }
}

/// Read every attribute of an open version file.
pub fn read(file: &impl AsFd) -> io::Result<VersionAttributes> {
    let fd = file.as_fd();
    let mut attrs = VersionAttributes::default();

    for name in list_names(fd)? {
        // Removed between list and get.
        let Some(value) = get(fd, &name)? else {
            continue;
        };
        let value = String::from_utf8_lossy(&value);
        match name.as_c_str() {
            n if n == ATTR_VERSION_ID => {
                attrs.version_id = value.parse().unwrap_or_else(|_| {
                    warn!(value = %value, "unparsable version_id attribute, reading as null");
                    VersionId::Null
                });
            }
            n if n == ATTR_DELETE_MARKER => attrs.is_delete_marker = value == "true",
            n if n == ATTR_NON_CURRENT => attrs.non_current_timestamp = value.parse().ok(),
            n if n == ATTR_DIR_CONTENT => attrs.dir_content = value.parse().ok(),
            n if n == ATTR_ETAG => attrs.etag = Some(value.into_owned()),
            n => {
                let Ok(n) = n.to_str() else { continue };
                if let Some(user_key) = n.strip_prefix(USER_META_PREFIX) {
                    attrs.user.insert(user_key.to_owned(), value.into_owned());
                }
            }
        }
    }

    Ok(attrs)
}

/// Record the version id of a file about to become the current version.
pub fn write_current(file: &impl AsFd, version_id: VersionId) -> io::Result<()> {
    set(file.as_fd(), ATTR_VERSION_ID, version_id.to_string().as_bytes())
}

/// Turn a file into a delete marker. The payload must be empty; a non-empty
/// file is truncated.
pub fn mark_delete_marker(file: &std::fs::File) -> io::Result<()> {
    if file.metadata()?.len() != 0 {
        file.set_len(0)?;
    }
    set(file.as_fd(), ATTR_DELETE_MARKER, b"true")
}

/// Stamp a file as non-current at `timestamp_ms`.
pub fn mark_noncurrent(file: &impl AsFd, timestamp_ms: u64) -> io::Result<()> {
    set(
        file.as_fd(),
        ATTR_NON_CURRENT,
        timestamp_ms.to_string().as_bytes(),
    )
}

/// Drop the non-current stamp of a promoted file.
pub fn clear_noncurrent(file: &impl AsFd) -> io::Result<()> {
    remove(file.as_fd(), ATTR_NON_CURRENT)
}

/// Record the ETag of a file's payload.
pub fn write_etag(file: &impl AsFd, etag: &str) -> io::Result<()> {
    set(file.as_fd(), ATTR_ETAG, etag.as_bytes())
}

/// Record user-defined metadata.
pub fn write_user_metadata<S: BuildHasher>(
    file: &impl AsFd,
    metadata: &HashMap<String, String, S>,
) -> io::Result<()> {
    let fd = file.as_fd();
    for (key, value) in metadata {
        set(fd, &user_attr_name(key)?, value.as_bytes())?;
    }
    Ok(())
}

/// Record the payload size of a content-directory object. Any user
/// metadata on the file is removed.
pub fn write_dir_content(file: &impl AsFd, size: u64) -> io::Result<()> {
    let fd = file.as_fd();
    for name in list_names(fd)? {
        if name.as_bytes().starts_with(USER_META_PREFIX.as_bytes()) {
            remove(fd, &name)?;
        }
    }
    set(fd, ATTR_DIR_CONTENT, size.to_string().as_bytes())
}

/// Check that files created in `dir` accept user extended attributes.
pub fn probe(dir: &Path) -> io::Result<()> {
    let file = tempfile::Builder::new()
        .prefix(UPLOAD_PREFIX)
        .tempfile_in(dir)?;
    set(file.as_file().as_fd(), ATTR_PROBE, b"1")?;
    let value = get(file.as_file().as_fd(), ATTR_PROBE)?;
    if value.as_deref() == Some(b"1".as_slice()) {
        Ok(())
    } else {
        Err(io::Error::other("extended attribute did not read back"))
    }
}

fn user_attr_name(key: &str) -> io::Result<CString> {
    CString::new(format!("{USER_META_PREFIX}{key}"))
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

// ---------------------------------------------------------------------------
// Raw helpers
// ---------------------------------------------------------------------------

fn get(fd: BorrowedFd<'_>, name: &CStr) -> io::Result<Option<Vec<u8>>> {
    loop {
        let size = match sys::get(fd, name, &mut []) {
            Ok(size) => size,
            Err(e) if is_absent(&e) => return Ok(None),
            Err(e) => return Err(e),
        };
        let mut buf = vec![0u8; size];
        match sys::get(fd, name, &mut buf) {
            Ok(len) => {
                buf.truncate(len);
                return Ok(Some(buf));
            }
            Err(e) if is_absent(&e) => return Ok(None),
            // Grew between the two calls.
            Err(e) if e.raw_os_error() == Some(libc::ERANGE) => {}
            Err(e) => return Err(e),
        }
    }
}

fn set(fd: BorrowedFd<'_>, name: &CStr, value: &[u8]) -> io::Result<()> {
    sys::set(fd, name, value)
}

fn remove(fd: BorrowedFd<'_>, name: &CStr) -> io::Result<()> {
    match sys::remove(fd, name) {
        Err(e) if is_absent(&e) => Ok(()),
        other => other,
    }
}

fn list_names(fd: BorrowedFd<'_>) -> io::Result<Vec<CString>> {
    let buf = loop {
        let size = sys::list(fd, &mut [])?;
        if size == 0 {
            return Ok(Vec::new());
        }
        let mut buf = vec![0u8; size];
        match sys::list(fd, &mut buf) {
            Ok(len) => {
                buf.truncate(len);
                break buf;
            }
            Err(e) if e.raw_os_error() == Some(libc::ERANGE) => {}
            Err(e) => return Err(e),
        }
    };

    Ok(buf
        .split(|b| *b == 0)
        .filter(|name| !name.is_empty())
        .filter_map(|name| CString::new(name).ok())
        .collect())
}

fn is_absent(err: &io::Error) -> bool {
    err.raw_os_error() == Some(sys::ENOATTR)
}

#[cfg(any(target_os = "linux", target_os = "android"))]
mod sys {
    use std::ffi::CStr;
    use std::io;
    use std::os::fd::{AsRawFd, BorrowedFd};

    pub(super) const ENOATTR: i32 = libc::ENODATA;

    pub(super) fn get(fd: BorrowedFd<'_>, name: &CStr, buf: &mut [u8]) -> io::Result<usize> {
        // SAFETY: `name` is NUL-terminated and `buf` is valid for `buf.len()` bytes.
        let res = unsafe {
            libc::fgetxattr(
                fd.as_raw_fd(),
                name.as_ptr(),
                buf.as_mut_ptr().cast::<libc::c_void>(),
                buf.len(),
            )
        };
        usize::try_from(res).map_err(|_| io::Error::last_os_error())
    }

    pub(super) fn set(fd: BorrowedFd<'_>, name: &CStr, value: &[u8]) -> io::Result<()> {
        // SAFETY: `name` is NUL-terminated and `value` is valid for `value.len()` bytes.
        let res = unsafe {
            libc::fsetxattr(
                fd.as_raw_fd(),
                name.as_ptr(),
                value.as_ptr().cast::<libc::c_void>(),
                value.len(),
                0,
            )
        };
        if res < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub(super) fn list(fd: BorrowedFd<'_>, buf: &mut [u8]) -> io::Result<usize> {
        // SAFETY: `buf` is valid for `buf.len()` bytes.
        let res = unsafe {
            libc::flistxattr(
                fd.as_raw_fd(),
                buf.as_mut_ptr().cast::<libc::c_char>(),
                buf.len(),
            )
        };
        usize::try_from(res).map_err(|_| io::Error::last_os_error())
    }

    pub(super) fn remove(fd: BorrowedFd<'_>, name: &CStr) -> io::Result<()> {
        // SAFETY: `name` is NUL-terminated.
        let res = unsafe { libc::fremovexattr(fd.as_raw_fd(), name.as_ptr()) };
        if res < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

#[cfg(target_os = "macos")]
mod sys {
    use std::ffi::CStr;
    use std::io;
    use std::os::fd::{AsRawFd, BorrowedFd};

    pub(super) const ENOATTR: i32 = libc::ENOATTR;

    pub(super) fn get(fd: BorrowedFd<'_>, name: &CStr, buf: &mut [u8]) -> io::Result<usize> {
        // SAFETY: `name` is NUL-terminated and `buf` is valid for `buf.len()` bytes.
        let res = unsafe {
            libc::fgetxattr(
                fd.as_raw_fd(),
                name.as_ptr(),
                buf.as_mut_ptr().cast::<libc::c_void>(),
                buf.len(),
                0,
                0,
            )
        };
        usize::try_from(res).map_err(|_| io::Error::last_os_error())
    }

    pub(super) fn set(fd: BorrowedFd<'_>, name: &CStr, value: &[u8]) -> io::Result<()> {
        // SAFETY: `name` is NUL-terminated and `value` is valid for `value.len()` bytes.
        let res = unsafe {
            libc::fsetxattr(
                fd.as_raw_fd(),
                name.as_ptr(),
                value.as_ptr().cast::<libc::c_void>(),
                value.len(),
                0,
                0,
            )
        };
        if res < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub(super) fn list(fd: BorrowedFd<'_>, buf: &mut [u8]) -> io::Result<usize> {
        // SAFETY: `buf` is valid for `buf.len()` bytes.
        let res = unsafe {
            libc::flistxattr(
                fd.as_raw_fd(),
                buf.as_mut_ptr().cast::<libc::c_char>(),
                buf.len(),
                0,
            )
        };
        usize::try_from(res).map_err(|_| io::Error::last_os_error())
    }

    pub(super) fn remove(fd: BorrowedFd<'_>, name: &CStr) -> io::Result<()> {
        // SAFETY: `name` is NUL-terminated.
        let res = unsafe { libc::fremovexattr(fd.as_raw_fd(), name.as_ptr(), 0) };
        if res < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}
