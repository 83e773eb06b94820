//! Paginated listing of object versions and current objects.
//!
//! Keys are produced by a lazy depth-first walk of the bucket that visits
//! every directory's children in an order matching S3's byte-wise key
//! order: a child file `f` sorts as `f`, a child directory `d` as `d/`, and
//! a `.folder` content-directory object as the directory's own prefix,
//! ahead of everything inside it. The key set of a directory is the union
//! of its files and the basenames found in its `.versions`, so keys that
//! only have history still list their versions.
//!
//! Subtrees entirely before the marker or outside the prefix are never
//! read. With a delimiter, a subtree whose path already contains the
//! delimiter past the prefix is reported as one common prefix without
//! being walked, once a single visible key in it is found.

use std::collections::{BTreeMap, btree_map};
use std::path::{Path, PathBuf};

use tracing::trace;

use crate::cache::{DirCache, EntryKind};
use crate::error::{S3FsError, S3FsResult};
use crate::hidden::{self, RecencyKey};
use crate::layout::{FOLDER_OBJECT, UPLOAD_PREFIX, VERSIONS_DIR, key_for};
use crate::slot::VersionFile;
use crate::types::{
    DeleteMarkerEntry, ListObjectVersionsInput, ListObjectVersionsOutput, ListObjectsInput,
    ListObjectsOutput, ObjectSummary, ObjectVersionEntry,
};
use crate::version_id::VersionId;

// ---------------------------------------------------------------------------
// Walker
// ---------------------------------------------------------------------------

/// What makes a key worth reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visibility {
    /// Any version, delete markers included.
    AnyVersion,
    /// A current version that is not a delete marker.
    CurrentObject,
}

/// A key found by the walk.
#[derive(Debug)]
struct KeyNode {
    key: String,
    dir: PathBuf,
    basename: String,
    history: Vec<VersionId>,
}

impl KeyNode {
    fn current_path(&self) -> PathBuf {
        self.dir.join(&self.basename)
    }
}

#[derive(Debug)]
enum WalkItem {
    Key(KeyNode),
    CommonPrefix(String),
}

#[derive(Debug)]
enum Node {
    Key {
        key: String,
        basename: String,
        history: Vec<VersionId>,
    },
    Dir {
        name: String,
    },
}

#[derive(Debug)]
struct Frame {
    dir: PathBuf,
    key_prefix: String,
    nodes: btree_map::IntoValues<String, Node>,
}

#[derive(Debug, Clone, Copy)]
struct WalkOptions<'a> {
    prefix: &'a str,
    delimiter: Option<&'a str>,
    min_key: Option<&'a str>,
    include_min: bool,
    visibility: Visibility,
}

#[derive(Debug)]
struct Walker<'a> {
    cache: &'a DirCache,
    opts: WalkOptions<'a>,
    pending_root: Option<(PathBuf, String)>,
    stack: Vec<Frame>,
    last_prefix: Option<String>,
}

impl<'a> Walker<'a> {
    fn new(cache: &'a DirCache, dir: PathBuf, key_prefix: String, opts: WalkOptions<'a>) -> Self {
        Self {
            cache,
            opts,
            pending_root: Some((dir, key_prefix)),
            stack: Vec::new(),
            last_prefix: None,
        }
    }

    fn load_frame(&self, dir: PathBuf, key_prefix: String) -> S3FsResult<Option<Frame>> {
        let Some(snapshot) = self
            .cache
            .snapshot(&dir)
            .map_err(|e| S3FsError::io("read directory", &dir, e))?
        else {
            return Ok(None);
        };

        let mut basenames: BTreeMap<String, Vec<VersionId>> = BTreeMap::new();
        // Keyed by sort position; a file name never ends in `/`, so keys
        // cannot collide.
        let mut nodes = BTreeMap::new();
        let mut has_versions = false;

        for (name, kind) in &snapshot.entries {
            match kind {
                EntryKind::Dir if name == VERSIONS_DIR => has_versions = true,
                EntryKind::Dir => {
                    nodes.insert(format!("{name}/"), Node::Dir { name: name.clone() });
                }
                EntryKind::File if name.starts_with(UPLOAD_PREFIX) || name == VERSIONS_DIR => {}
                EntryKind::File => {
                    basenames.entry(name.clone()).or_default();
                }
            }
        }

        if has_versions {
            let versions_dir = dir.join(VERSIONS_DIR);
            let history = self
                .cache
                .snapshot(&versions_dir)
                .map_err(|e| S3FsError::io("read directory", &versions_dir, e))?;
            for (name, kind) in history.iter().flat_map(|s| s.entries.iter()) {
                if *kind != EntryKind::File {
                    continue;
                }
                match hidden::parse_entry_name(name) {
                    Some((basename, vid)) => {
                        basenames.entry(basename.to_owned()).or_default().push(vid);
                    }
                    None => trace!(dir = %versions_dir.display(), name, "skipping stray entry"),
                }
            }
        }

        for (basename, history) in basenames {
            let sort_key = if basename == FOLDER_OBJECT {
                // The bucket root has no key of its own.
                if key_prefix.is_empty() {
                    continue;
                }
                String::new()
            } else {
                basename.clone()
            };
            let key = key_for(&key_prefix, &basename);
            nodes.insert(
                sort_key,
                Node::Key {
                    key,
                    basename,
                    history,
                },
            );
        }

        Ok(Some(Frame {
            dir,
            key_prefix,
            nodes: nodes.into_values(),
        }))
    }

    fn before_min(&self, key: &str) -> bool {
        self.opts
            .min_key
            .is_some_and(|m| key < m || (key == m && !self.opts.include_min))
    }

    /// Every key under `dir_prefix` sorts before the marker.
    fn subtree_before_min(&self, dir_prefix: &str) -> bool {
        self.opts
            .min_key
            .is_some_and(|m| m > dir_prefix && !m.starts_with(dir_prefix))
    }

    /// A common prefix already reported, on this page or as the marker
    /// ending the previous one, or lying wholly before the marker. A marker
    /// strictly inside the prefix leaves it open: later keys still roll up.
    fn skip_prefix(&self, cp: &str) -> bool {
        self.last_prefix.as_deref() == Some(cp)
            || self
                .opts
                .min_key
                .is_some_and(|m| cp == m || (cp < m && !m.starts_with(cp)))
    }

    /// Common prefix of a path starting with the listing prefix, if the
    /// delimiter occurs in it after the prefix.
    fn common_prefix(&self, path: &str) -> Option<String> {
        let delimiter = self.opts.delimiter?;
        let start = self.opts.prefix.len();
        let pos = path.get(start..)?.find(delimiter)?;
        Some(path[..start + pos + delimiter.len()].to_owned())
    }

    fn is_visible(&self, node: &KeyNode) -> S3FsResult<bool> {
        match self.opts.visibility {
            Visibility::AnyVersion => Ok(true),
            Visibility::CurrentObject => {
                let path = node.current_path();
                let current = VersionFile::open(&path)
                    .map_err(|e| S3FsError::io("open current version", &path, e))?;
                Ok(current.is_some_and(|c| !c.is_delete_marker()))
            }
        }
    }

    /// Whether `dir` holds a visible key past the marker.
    fn subtree_visible(&self, dir: PathBuf, dir_prefix: &str) -> S3FsResult<bool> {
        let opts = WalkOptions {
            prefix: dir_prefix,
            delimiter: None,
            min_key: self.opts.min_key.filter(|m| m.starts_with(dir_prefix)),
            include_min: self.opts.include_min,
            visibility: self.opts.visibility,
        };
        for item in Walker::new(self.cache, dir, dir_prefix.to_owned(), opts) {
            if let WalkItem::Key(node) = item? {
                if self.is_visible(&node)? {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    fn advance(&mut self) -> S3FsResult<Option<WalkItem>> {
        loop {
            if let Some((dir, key_prefix)) = self.pending_root.take() {
                if let Some(frame) = self.load_frame(dir, key_prefix)? {
                    self.stack.push(frame);
                }
            }

            let Some(frame) = self.stack.last_mut() else {
                return Ok(None);
            };
            let Some(node) = frame.nodes.next() else {
                self.stack.pop();
                continue;
            };
            let dir = frame.dir.clone();
            let key_prefix = frame.key_prefix.clone();

            match node {
                Node::Key {
                    key,
                    basename,
                    history,
                } => {
                    if !key.starts_with(self.opts.prefix) || self.before_min(&key) {
                        continue;
                    }
                    let node = KeyNode {
                        key,
                        dir,
                        basename,
                        history,
                    };
                    let Some(cp) = self.common_prefix(&node.key) else {
                        trace!(key = %node.key, "walk key");
                        return Ok(Some(WalkItem::Key(node)));
                    };
                    if self.skip_prefix(&cp) || !self.is_visible(&node)? {
                        continue;
                    }
                    self.last_prefix = Some(cp.clone());
                    return Ok(Some(WalkItem::CommonPrefix(cp)));
                }
                Node::Dir { name } => {
                    let dir_prefix = format!("{key_prefix}{name}/");
                    let prefix = self.opts.prefix;
                    if !(dir_prefix.starts_with(prefix) || prefix.starts_with(&dir_prefix))
                        || self.subtree_before_min(&dir_prefix)
                    {
                        continue;
                    }
                    let child = dir.join(&name);
                    if dir_prefix.starts_with(prefix) {
                        if let Some(cp) = self.common_prefix(&dir_prefix) {
                            if self.skip_prefix(&cp) || !self.subtree_visible(child, &dir_prefix)? {
                                continue;
                            }
                            self.last_prefix = Some(cp.clone());
                            return Ok(Some(WalkItem::CommonPrefix(cp)));
                        }
                    }
                    if let Some(frame) = self.load_frame(child, dir_prefix)? {
                        self.stack.push(frame);
                    }
                }
            }
        }
    }
}

impl Iterator for Walker<'_> {
    type Item = S3FsResult<WalkItem>;

    fn next(&mut self) -> Option<Self::Item> {
        self.advance().transpose()
    }
}

// ---------------------------------------------------------------------------
// Listings
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum Listed {
    Version(ObjectVersionEntry),
    DeleteMarker(DeleteMarkerEntry),
    Object(ObjectSummary),
    Prefix(String),
}

impl Listed {
    fn marker(&self) -> (String, Option<VersionId>) {
        match self {
            Self::Version(v) => (v.key.clone(), Some(v.version_id)),
            Self::DeleteMarker(d) => (d.key.clone(), Some(d.version_id)),
            Self::Object(o) => (o.key.clone(), None),
            Self::Prefix(p) => (p.clone(), None),
        }
    }
}

#[derive(Debug)]
struct Candidate {
    version_id: VersionId,
    recency: RecencyKey,
    listed: Listed,
}

fn non_empty(s: Option<&String>) -> Option<&str> {
    s.map(String::as_str).filter(|s| !s.is_empty())
}

/// List versions and delete markers of the bucket at `root`.
pub fn list_object_versions(
    cache: &DirCache,
    root: &Path,
    input: &ListObjectVersionsInput,
    max_keys: usize,
) -> S3FsResult<ListObjectVersionsOutput> {
    let key_marker = non_empty(input.key_marker.as_ref());
    let version_id_marker = match non_empty(input.version_id_marker.as_ref()) {
        None => None,
        Some(_) if key_marker.is_none() => {
            return Err(S3FsError::InvalidArgument {
                message: "A version-id marker cannot be specified without a key marker".to_owned(),
            });
        }
        Some(s) => Some(s.parse::<VersionId>()?),
    };

    let mut output = ListObjectVersionsOutput {
        max_keys,
        ..ListObjectVersionsOutput::default()
    };
    if max_keys == 0 {
        return Ok(output);
    }

    let opts = WalkOptions {
        prefix: &input.prefix,
        delimiter: non_empty(input.delimiter.as_ref()),
        min_key: key_marker,
        include_min: version_id_marker.is_some(),
        visibility: Visibility::AnyVersion,
    };

    let mut items: Vec<Listed> = Vec::with_capacity(max_keys.min(1024) + 1);
    for item in Walker::new(cache, root.to_path_buf(), String::new(), opts) {
        match item? {
            WalkItem::CommonPrefix(cp) => items.push(Listed::Prefix(cp)),
            WalkItem::Key(node) => {
                let mut versions = versions_of(&node)?;
                if Some(node.key.as_str()) == key_marker {
                    if let Some(marker) = version_id_marker {
                        resume_after(&mut versions, marker);
                    }
                }
                items.extend(versions.into_iter().map(|c| c.listed));
            }
        }
        if items.len() > max_keys {
            break;
        }
    }

    output.is_truncated = items.len() > max_keys;
    items.truncate(max_keys);
    if output.is_truncated {
        if let Some((key, vid)) = items.last().map(Listed::marker) {
            output.next_key_marker = Some(key);
            output.next_version_id_marker = vid;
        }
    }

    for item in items {
        match item {
            Listed::Version(v) => output.versions.push(v),
            Listed::DeleteMarker(d) => output.delete_markers.push(d),
            Listed::Prefix(p) => output.common_prefixes.push(p),
            Listed::Object(_) => {}
        }
    }
    Ok(output)
}

/// List the current, non-delete-marker objects of the bucket at `root`.
pub fn list_objects(
    cache: &DirCache,
    root: &Path,
    input: &ListObjectsInput,
    max_keys: usize,
) -> S3FsResult<ListObjectsOutput> {
    let mut output = ListObjectsOutput {
        max_keys,
        ..ListObjectsOutput::default()
    };
    if max_keys == 0 {
        return Ok(output);
    }

    let opts = WalkOptions {
        prefix: &input.prefix,
        delimiter: non_empty(input.delimiter.as_ref()),
        min_key: non_empty(input.start_after.as_ref()),
        include_min: false,
        visibility: Visibility::CurrentObject,
    };

    let mut items: Vec<Listed> = Vec::new();
    for item in Walker::new(cache, root.to_path_buf(), String::new(), opts) {
        match item? {
            WalkItem::CommonPrefix(cp) => items.push(Listed::Prefix(cp)),
            WalkItem::Key(node) => {
                let path = node.current_path();
                let current = VersionFile::open(&path)
                    .map_err(|e| S3FsError::io("open current version", &path, e))?;
                if let Some(current) = current.filter(|c| !c.is_delete_marker()) {
                    items.push(Listed::Object(ObjectSummary {
                        etag: current.etag(),
                        size: current.size(),
                        last_modified: current.last_modified(),
                        key: node.key,
                    }));
                }
            }
        }
        if items.len() > max_keys {
            break;
        }
    }

    output.is_truncated = items.len() > max_keys;
    items.truncate(max_keys);
    if output.is_truncated {
        output.next_marker = items.last().map(|i| i.marker().0);
    }

    for item in items {
        match item {
            Listed::Object(o) => output.objects.push(o),
            Listed::Prefix(p) => output.common_prefixes.push(p),
            Listed::Version(_) | Listed::DeleteMarker(_) => {}
        }
    }
    Ok(output)
}

/// Every version of one key: the current first, then history newest first.
fn versions_of(node: &KeyNode) -> S3FsResult<Vec<Candidate>> {
    let mut found = Vec::with_capacity(node.history.len() + 1);

    let current_path = node.current_path();
    let current = VersionFile::open(&current_path)
        .map_err(|e| S3FsError::io("open current version", &current_path, e))?;
    let current_vid = current.as_ref().map(VersionFile::version_id);
    if let Some(current) = current {
        found.push((current.version_id(), current));
    }

    let mut history = Vec::with_capacity(node.history.len());
    for &vid in &node.history {
        if Some(vid) == current_vid {
            continue;
        }
        let path = hidden::entry_path(&node.dir, &node.basename, vid);
        // Vanished since the directory was read.
        let Some(file) = VersionFile::open(&path)
            .map_err(|e| S3FsError::io("open historical version", &path, e))?
        else {
            continue;
        };
        history.push((vid, file));
    }
    history.sort_by_key(|(vid, file)| std::cmp::Reverse(hidden::recency(*vid, &file.meta)));
    found.extend(history);

    Ok(found
        .into_iter()
        .enumerate()
        .map(|(idx, (version_id, file))| {
            let is_latest = idx == 0;
            let listed = if file.is_delete_marker() {
                Listed::DeleteMarker(DeleteMarkerEntry {
                    key: node.key.clone(),
                    version_id,
                    is_latest,
                    last_modified: file.last_modified(),
                })
            } else {
                Listed::Version(ObjectVersionEntry {
                    key: node.key.clone(),
                    version_id,
                    is_latest,
                    etag: file.etag(),
                    size: file.size(),
                    last_modified: file.last_modified(),
                })
            };
            Candidate {
                version_id,
                recency: hidden::recency(version_id, &file.meta),
                listed,
            }
        })
        .collect())
}

/// Drop the versions up to and including `marker`. A marker that no longer
/// exists resumes with the versions older than it; a vanished `null` marker
/// skips the key.
fn resume_after(versions: &mut Vec<Candidate>, marker: VersionId) {
    if let Some(idx) = versions.iter().position(|c| c.version_id == marker) {
        versions.drain(..=idx);
        return;
    }
    match marker.decode() {
        Some(bound) => versions.retain(|c| c.recency < bound),
        None => versions.clear(),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn keys(cache: &DirCache, root: &Path, opts: WalkOptions<'_>) -> Vec<String> {
        Walker::new(cache, root.to_path_buf(), String::new(), opts)
            .map(|item| match item.expect("walk") {
                WalkItem::Key(node) => node.key,
                WalkItem::CommonPrefix(cp) => format!("[{cp}]"),
            })
            .collect()
    }

    fn opts<'a>(
        prefix: &'a str,
        delimiter: Option<&'a str>,
        min_key: Option<&'a str>,
    ) -> WalkOptions<'a> {
        WalkOptions {
            prefix,
            delimiter,
            min_key,
            include_min: false,
            visibility: Visibility::AnyVersion,
        }
    }

    fn tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("temp dir");
        let root = dir.path();
        for path in ["a-b", "a/x", "a/y/z", "a0", "b_c", "a/.folder", ".folder"] {
            let path = root.join(path);
            fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
            fs::write(path, b"").expect("write");
        }
        fs::create_dir_all(root.join("empty/deeper")).expect("mkdir");
        fs::create_dir_all(root.join(VERSIONS_DIR)).expect("mkdir");
        fs::write(root.join(VERSIONS_DIR).join("gone_null"), b"").expect("write");
        fs::write(root.join(format!("{UPLOAD_PREFIX}tmp")), b"").expect("write");
        dir
    }

    #[test]
    fn test_should_walk_in_key_order() {
        let dir = tree();
        let cache = DirCache::new(false, 0);
        assert_eq!(
            keys(&cache, dir.path(), opts("", None, None)),
            vec!["a-b", "a/", "a/x", "a/y/z", "a0", "b_c", "gone"]
        );
    }

    #[test]
    fn test_should_collapse_directories_with_delimiter() {
        let dir = tree();
        let cache = DirCache::new(false, 0);
        assert_eq!(
            keys(&cache, dir.path(), opts("", Some("/"), None)),
            vec!["a-b", "[a/]", "a0", "b_c", "gone"]
        );
        assert_eq!(
            keys(&cache, dir.path(), opts("a/", Some("/"), None)),
            vec!["a/", "a/x", "[a/y/]"]
        );
        assert_eq!(
            keys(&cache, dir.path(), opts("", Some("-"), None)),
            vec!["[a-]", "a/", "a/x", "a/y/z", "a0", "b_c", "gone"]
        );
    }

    #[test]
    fn test_should_resume_after_marker() {
        let dir = tree();
        let cache = DirCache::new(false, 0);
        assert_eq!(
            keys(&cache, dir.path(), opts("", None, Some("a/x"))),
            vec!["a/y/z", "a0", "b_c", "gone"]
        );
        assert_eq!(
            keys(&cache, dir.path(), opts("", Some("/"), Some("a/"))),
            vec!["a0", "b_c", "gone"]
        );
    }

    #[test]
    fn test_should_report_prefix_holding_marker_while_keys_follow() {
        let dir = tree();
        let cache = DirCache::new(false, 0);
        assert_eq!(
            keys(&cache, dir.path(), opts("", Some("/"), Some("a/x"))),
            vec!["[a/]", "a0", "b_c", "gone"]
        );
        assert_eq!(
            keys(&cache, dir.path(), opts("", Some("/"), Some("a/y/z"))),
            vec!["a0", "b_c", "gone"]
        );
        assert_eq!(
            keys(&cache, dir.path(), opts("", Some("-"), Some("a-a"))),
            vec!["[a-]", "a/", "a/x", "a/y/z", "a0", "b_c", "gone"]
        );
    }

    #[test]
    fn test_should_filter_by_prefix() {
        let dir = tree();
        let cache = DirCache::new(false, 0);
        assert_eq!(keys(&cache, dir.path(), opts("a/y", None, None)), vec!["a/y/z"]);
        assert!(keys(&cache, dir.path(), opts("zzz", None, None)).is_empty());
    }

    fn candidate(mtime: u64, ino: u64) -> Candidate {
        let version_id = VersionId::encode(mtime, ino);
        Candidate {
            version_id,
            recency: (mtime, ino),
            listed: Listed::Prefix(version_id.to_string()),
        }
    }

    #[test]
    fn test_should_resume_after_present_marker() {
        let mut versions = vec![candidate(30, 1), candidate(20, 1), candidate(10, 1)];
        resume_after(&mut versions, VersionId::encode(20, 1));
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].version_id, VersionId::encode(10, 1));
    }

    #[test]
    fn test_should_resume_after_vanished_marker() {
        let mut versions = vec![candidate(30, 1), candidate(10, 1)];
        resume_after(&mut versions, VersionId::encode(20, 1));
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].version_id, VersionId::encode(10, 1));

        let mut versions = vec![candidate(30, 1)];
        resume_after(&mut versions, VersionId::Null);
        assert!(versions.is_empty());
    }
}
