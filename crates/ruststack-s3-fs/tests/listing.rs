//! Version and object listings: ordering, delimiters and pagination.

mod common;

use std::collections::{BTreeSet, HashMap};

use common::TestBucket;
use ruststack_s3_fs::{
    ListObjectVersionsInput, ListObjectsInput, S3FsError, VersionId, VersioningStatus,
};

/// Walk every page of a version listing and return `(key, version id,
/// is latest)` in listing order.
fn all_pages(t: &TestBucket, page: usize) -> Vec<(String, VersionId, bool)> {
    let mut seen = Vec::new();
    let mut key_marker: Option<String> = None;
    let mut vid_marker: Option<String> = None;
    loop {
        let input = ListObjectVersionsInput {
            key_marker: key_marker.clone(),
            version_id_marker: vid_marker.clone(),
            max_keys: Some(page),
            ..ListObjectVersionsInput::default()
        };
        let out = t
            .fs
            .list_object_versions(&t.bucket(), &input)
            .expect("list page");
        assert!(out.versions.len() + out.delete_markers.len() <= page);

        let mut rows: Vec<_> = out
            .versions
            .iter()
            .map(|v| (v.key.clone(), v.version_id, v.is_latest, v.last_modified))
            .chain(
                out.delete_markers
                    .iter()
                    .map(|d| (d.key.clone(), d.version_id, d.is_latest, d.last_modified)),
            )
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0).then(b.3.cmp(&a.3)));
        seen.extend(rows.into_iter().map(|(k, v, latest, _)| (k, v, latest)));

        if !out.is_truncated {
            return seen;
        }
        key_marker = out.next_key_marker;
        vid_marker = out.next_version_id_marker.map(|v| v.to_string());
    }
}

fn populate(t: &TestBucket) -> BTreeSet<(String, String)> {
    let mut expected = BTreeSet::new();
    for key in ["a", "b/c", "b/d/e", "b-x", "z"] {
        for i in 0..3 {
            let vid = t.put(key, format!("{key}{i}").as_bytes()).version_id.expect("vid");
            expected.insert((key.to_owned(), vid.to_string()));
        }
    }
    let marker = t
        .fs
        .delete_object(&t.bucket(), "b/c", None)
        .expect("delete")
        .version_id
        .expect("marker");
    expected.insert(("b/c".to_owned(), marker.to_string()));
    expected
}

#[test]
fn test_should_list_every_version_exactly_once_across_pages() {
    let Some(t) = TestBucket::new(VersioningStatus::Enabled) else {
        return;
    };
    let expected = populate(&t);

    for page in [1, 2, 3, 5, 1000] {
        let seen = all_pages(&t, page);
        assert_eq!(seen.len(), expected.len(), "page size {page}");
        let got: BTreeSet<_> = seen.iter().map(|(k, v, _)| (k.clone(), v.to_string())).collect();
        assert_eq!(got, expected, "page size {page}");

        let keys: Vec<_> = seen.iter().map(|(k, _, _)| k.as_str()).collect();
        let mut sorted = keys.clone();
        sorted.sort_unstable();
        assert_eq!(keys, sorted, "page size {page}");
    }
}

#[test]
fn test_should_mark_exactly_one_latest_per_key() {
    let Some(t) = TestBucket::new(VersioningStatus::Enabled) else {
        return;
    };
    populate(&t);

    let mut latest: HashMap<String, usize> = HashMap::new();
    for (key, _, is_latest) in all_pages(&t, 1000) {
        *latest.entry(key).or_default() += usize::from(is_latest);
    }
    assert_eq!(latest.len(), 5);
    assert!(latest.values().all(|&n| n == 1));

    let out = t.versions();
    let marker = out.delete_markers.first().expect("marker");
    assert_eq!(marker.key, "b/c");
    assert!(marker.is_latest);
    assert!(
        out.versions
            .iter()
            .filter(|v| v.key == "b/c")
            .all(|v| !v.is_latest)
    );
}

#[test]
fn test_should_roll_up_common_prefixes() {
    let Some(t) = TestBucket::new(VersioningStatus::Enabled) else {
        return;
    };
    populate(&t);

    let input = ListObjectVersionsInput::builder().delimiter("/").build();
    let out = t.fs.list_object_versions(&t.bucket(), &input).expect("list");
    assert_eq!(out.common_prefixes, vec!["b/".to_owned()]);
    let keys: BTreeSet<_> = out.versions.iter().map(|v| v.key.as_str()).collect();
    assert_eq!(keys, BTreeSet::from(["a", "b-x", "z"]));

    let input = ListObjectVersionsInput::builder()
        .prefix("b/")
        .delimiter("/")
        .build();
    let out = t.fs.list_object_versions(&t.bucket(), &input).expect("list");
    assert_eq!(out.common_prefixes, vec!["b/d/".to_owned()]);
    assert_eq!(out.versions.len(), 3);
    assert_eq!(out.delete_markers.len(), 1);
}

#[test]
fn test_should_never_surface_hidden_entries() {
    let Some(t) = TestBucket::new(VersioningStatus::Enabled) else {
        return;
    };
    populate(&t);

    let input = ListObjectVersionsInput::builder().delimiter("/").prefix("b/d/").build();
    let out = t.fs.list_object_versions(&t.bucket(), &input).expect("list");
    assert!(out.common_prefixes.is_empty());
    assert!(out.versions.iter().all(|v| v.key == "b/d/e"));

    for (key, _, _) in all_pages(&t, 1000) {
        assert!(!key.contains(".versions"), "{key}");
    }
}

#[test]
fn test_should_resume_after_vanished_version_marker() {
    let Some(t) = TestBucket::new(VersioningStatus::Enabled) else {
        return;
    };
    let v1 = t.put("k", b"1").version_id.expect("v1");
    let v2 = t.put("k", b"2").version_id.expect("v2");
    let v3 = t.put("k", b"3").version_id.expect("v3");
    t.put("l", b"x");

    t.fs.delete_object(&t.bucket(), "k", Some(&v2.to_string()))
        .expect("delete v2");
    let input = ListObjectVersionsInput::builder()
        .key_marker("k")
        .version_id_marker(v2.to_string())
        .build();
    let out = t.fs.list_object_versions(&t.bucket(), &input).expect("list");
    let rows: Vec<_> = out.versions.iter().map(|v| (v.key.as_str(), v.version_id)).collect();
    assert_eq!(rows[0], ("k", v1));
    assert_eq!(rows[1].0, "l");
    assert!(rows.iter().all(|(_, v)| *v != v3));
}

#[test]
fn test_should_reject_version_marker_without_key_marker() {
    let Some(t) = TestBucket::new(VersioningStatus::Enabled) else {
        return;
    };
    let input = ListObjectVersionsInput::builder()
        .version_id_marker("null")
        .build();
    assert!(matches!(
        t.fs.list_object_versions(&t.bucket(), &input),
        Err(S3FsError::InvalidArgument { .. })
    ));
}

#[test]
fn test_should_list_only_live_objects() {
    let Some(t) = TestBucket::new(VersioningStatus::Enabled) else {
        return;
    };
    populate(&t);

    let out = t
        .fs
        .list_objects(&t.bucket(), &ListObjectsInput::default())
        .expect("list");
    let keys: Vec<_> = out.objects.iter().map(|o| o.key.as_str()).collect();
    assert_eq!(keys, vec!["a", "b-x", "b/d/e", "z"]);
    for o in &out.objects {
        assert_eq!(o.size, u64::try_from(o.key.len() + 1).expect("size"));
    }

    let input = ListObjectsInput::builder().delimiter("/").build();
    let out = t.fs.list_objects(&t.bucket(), &input).expect("list");
    assert_eq!(out.common_prefixes, vec!["b/".to_owned()]);
}

#[test]
fn test_should_drop_prefix_whose_keys_are_all_deleted() {
    let Some(t) = TestBucket::new(VersioningStatus::Enabled) else {
        return;
    };
    t.put("gone/x", b"1");
    t.put("kept", b"1");
    t.fs.delete_object(&t.bucket(), "gone/x", None).expect("delete");

    let input = ListObjectsInput::builder().delimiter("/").build();
    let out = t.fs.list_objects(&t.bucket(), &input).expect("list");
    assert!(out.common_prefixes.is_empty());
    assert_eq!(out.objects.len(), 1);

    let input = ListObjectVersionsInput::builder().delimiter("/").build();
    let out = t.fs.list_object_versions(&t.bucket(), &input).expect("list");
    assert_eq!(out.common_prefixes, vec!["gone/".to_owned()]);
}

#[test]
fn test_should_page_objects_with_start_after() {
    let Some(t) = TestBucket::new(VersioningStatus::Disabled) else {
        return;
    };
    for key in ["k1", "k2", "k3", "k4", "k5"] {
        t.put(key, b"v");
    }

    let mut keys = Vec::new();
    let mut start_after: Option<String> = None;
    loop {
        let input = ListObjectsInput {
            start_after: start_after.clone(),
            max_keys: Some(2),
            ..ListObjectsInput::default()
        };
        let out = t.fs.list_objects(&t.bucket(), &input).expect("list");
        keys.extend(out.objects.into_iter().map(|o| o.key));
        if !out.is_truncated {
            break;
        }
        start_after = out.next_marker;
    }
    assert_eq!(keys, vec!["k1", "k2", "k3", "k4", "k5"]);
}

#[test]
fn test_should_list_history_of_key_without_current() {
    let Some(t) = TestBucket::new(VersioningStatus::Enabled) else {
        return;
    };
    let v1 = t.put("k", b"1").version_id.expect("v1");
    t.put("k", b"2");
    std::fs::remove_file(t.dir.path().join("k")).expect("drop current");

    let out = t.versions();
    assert_eq!(out.versions.len(), 1);
    assert_eq!(out.versions[0].version_id, v1);
    assert!(out.versions[0].is_latest);
    let live = t
        .fs
        .list_objects(&t.bucket(), &ListObjectsInput::default())
        .expect("list");
    assert!(live.objects.is_empty());
}
