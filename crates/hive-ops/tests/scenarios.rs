//! End-to-end scenarios over on-disk stores.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

use hive_ops::{
    check, export, fsck, import_directory, manifest, manifest_check, object_check, prune, verify,
    Hive, VerifyStatus,
};
use hive_store::FsObjectDatabase;
use hive_types::{ManifestKey, ObjectId};
use tempfile::TempDir;

fn key(s: &str) -> ManifestKey {
    s.parse().unwrap()
}

/// test.txt, dir/file.txt, dir/other.txt, docs/readme.md
fn sample(dir: &Path) {
    fs::create_dir_all(dir.join("dir")).unwrap();
    fs::create_dir_all(dir.join("docs")).unwrap();
    fs::write(dir.join("test.txt"), "test content").unwrap();
    fs::write(dir.join("dir/file.txt"), "file content").unwrap();
    fs::write(dir.join("dir/other.txt"), "other content").unwrap();
    fs::write(dir.join("docs/readme.md"), "# readme").unwrap();
}

fn store_with_sample() -> (TempDir, Hive, ManifestKey) {
    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("src");
    sample(&src);
    let hive = Hive::open(tmp.path().join("store")).unwrap();
    let key = import_directory(&hive, &src, key("app:1"), BTreeMap::new()).unwrap();
    (tmp, hive, key)
}

fn object_file(hive: &Hive, id: &ObjectId) -> std::path::PathBuf {
    let objects = hive.root().unwrap().join(hive_ops::hive::OBJECTS_DIR);
    FsObjectDatabase::open(&objects, hive.root().unwrap().join(hive_ops::hive::STAGING_DIR))
        .unwrap()
        .object_path(id)
}

#[test]
fn fsck_round_trip() {
    let (_tmp, hive, key) = store_with_sample();
    let blob = ObjectId::from_bytes(b"file content");
    fs::write(object_file(&hive, &blob), "bit rot").unwrap();

    let dry = object_check(&hive, &[key.clone()], true).unwrap();
    assert_eq!(dry.damaged.len(), 1);
    assert!(dry.removed.is_empty());

    let first = object_check(&hive, &[key.clone()], false).unwrap();
    assert_eq!(first.damaged.len(), 1);
    assert_eq!(first.damaged[0].path.to_string(), "dir/file.txt");
    assert_eq!(first.removed, vec![blob]);

    let second = object_check(&hive, &[key.clone()], false).unwrap();
    assert!(second.damaged.is_empty());

    let missing = manifest_check(&hive, &[key]).unwrap();
    assert_eq!(missing.missing.len(), 1);
    assert_eq!(missing.missing[0].id, blob);
    assert!(!missing.missing[0].is_damaged());

    let entries = hive.audit_log().unwrap().entries().unwrap();
    assert!(entries.iter().any(|e| e.operation == "fsck"));
}

#[test]
fn verify_after_export() {
    let (tmp, hive, key) = store_with_sample();
    let out = tmp.path().join("out");
    export(&hive, &key, &out).unwrap();

    let clean = verify(&hive, &key, &out).unwrap();
    assert_eq!(clean.count(VerifyStatus::Missing), 0);
    assert_eq!(clean.count(VerifyStatus::Modified), 0);
    assert_eq!(clean.count(VerifyStatus::Unmodified), 4);

    fs::remove_file(out.join("dir/other.txt")).unwrap();
    fs::write(out.join("docs/readme.md"), "# edited").unwrap();
    // Only content counts, not timestamps.
    fs::write(out.join("test.txt"), "test content").unwrap();

    let report = verify(&hive, &key, &out).unwrap();
    assert_eq!(report.count(VerifyStatus::Missing), 1);
    assert_eq!(report.count(VerifyStatus::Modified), 1);
    assert_eq!(report.count(VerifyStatus::Unmodified), 2);
    let missing: Vec<_> = report
        .entries
        .iter()
        .filter(|e| e.status == VerifyStatus::Missing)
        .map(|e| e.path.to_string())
        .collect();
    assert_eq!(missing, vec!["dir/other.txt"]);
}

#[test]
fn prune_on_disk_keeps_everything_referenced() {
    let (tmp, hive, key) = store_with_sample();
    let src2 = tmp.path().join("src2");
    fs::create_dir_all(&src2).unwrap();
    fs::write(src2.join("only.txt"), "only in v2").unwrap();
    let v2 = import_directory(&hive, &src2, manifest::next_key(&hive, "app").unwrap(), BTreeMap::new())
        .unwrap();
    assert_eq!(v2, self::key("app:2"));

    manifest::delete(&hive, &v2).unwrap();
    sleep(Duration::from_millis(20));
    let report = prune(&hive).unwrap();
    // only.txt and its root tree.
    assert_eq!(report.removed.len(), 2);
    assert!(fsck(&hive, &[key], true).unwrap().is_clean());
}

#[test]
fn store_survives_reopen() {
    let (tmp, hive, key) = store_with_sample();
    let root = manifest::load(&hive, &key).unwrap().root();
    drop(hive);

    let hive = Hive::open(tmp.path().join("store")).unwrap();
    assert_eq!(manifest::load(&hive, &key).unwrap().root(), root);
    assert_eq!(
        hive_ops::scan::tree_entry_load(&hive, &key, "docs/readme.md").unwrap(),
        b"# readme"
    );
    assert!(check::fsck(&hive, &[], true).unwrap().is_clean());
}

#[test]
fn concurrent_imports_into_one_store() {
    let tmp = TempDir::new().unwrap();
    let store = tmp.path().join("store");
    let hive = Hive::open(&store).unwrap();

    std::thread::scope(|s| {
        for worker in 0..4 {
            let hive = &hive;
            let dir = tmp.path().join(format!("src{worker}"));
            s.spawn(move || {
                fs::create_dir_all(&dir).unwrap();
                fs::write(dir.join("data"), format!("worker {worker}")).unwrap();
                import_directory(hive, &dir, key(&format!("w{worker}:1")), BTreeMap::new()).unwrap();
            });
        }
    });

    assert_eq!(manifest::list(&hive, "w").unwrap().len(), 4);
    assert!(fsck(&hive, &[], true).unwrap().is_clean());
}
