//! End-to-end full-sync scenarios over an in-memory store and a real
//! temp-directory mirror.

use brim_integration_tests::{TestMirror, future, past};
use brim_keys::NormalizationForm;
use bytes::Bytes;

#[tokio::test]
async fn add_only_initial_sync_writes_everything_in_order() {
    let mirror = TestMirror::new(true, None);
    mirror.seed("0.txt", b"");
    mirror.seed("whatever.txt", b"");
    mirror.seed("zzz.txt", b"");

    let report = mirror.sync_and_drain().await;
    assert_eq!(report.writes, 3);
    assert_eq!(report.removals, 0);
    assert_eq!(
        mirror.local_files(),
        vec!["0.txt", "whatever.txt", "zzz.txt"]
    );
}

#[tokio::test]
async fn mixed_sync_with_removals_converges_to_remote() {
    let mirror = TestMirror::new(true, None);

    // Local tree from a previous life.
    let tree_seed = [
        ("1.txt", "x"),
        ("a.txt", "x"),
        ("dir1/2.txt", "x"),
        ("dir1/22.txt", "x"),
        ("dir1/dir1_1/aa.txt", "old"),
        ("z.txt", "zz"),
        ("ñ.txt", "x"),
    ];
    for (path, body) in tree_seed {
        let full = mirror.root.join(path);
        std::fs::create_dir_all(full.parent().unwrap()).unwrap();
        std::fs::write(full, body).unwrap();
    }
    std::fs::create_dir_all(mirror.root.join("dir2")).unwrap();

    // Remote truth: two new files, one changed (size differs), one
    // unchanged.
    mirror.seed("0.txt", b"n");
    mirror.seed("whatever.txt", b"n");
    mirror.seed("dir1/dir1_1/aa.txt", b"old+eleven....");
    mirror.seed("z.txt", b"zz");

    let report = mirror.sync_and_drain().await;
    assert_eq!(report.writes, 3, "0.txt, whatever.txt, aa.txt");
    assert_eq!(report.removals, 6, "five unlinks + dir2 subtree");

    assert_eq!(
        mirror.local_files(),
        vec!["0.txt", "dir1/dir1_1/aa.txt", "whatever.txt", "z.txt"]
    );
    assert_eq!(
        std::fs::read(mirror.root.join("dir1/dir1_1/aa.txt")).unwrap(),
        b"old+eleven...."
    );
    // The unchanged file was not refetched.
    assert_eq!(
        std::fs::read(mirror.root.join("z.txt")).unwrap(),
        b"zz"
    );
}

#[tokio::test]
async fn no_change_sync_issues_zero_fetches() {
    let mirror = TestMirror::new(true, None);
    mirror.seed("1.txt", b"one");
    mirror.seed("sub/2.txt", b"two");

    mirror.sync_and_drain().await;
    let fetches = mirror.store.get_count();

    let report = mirror.sync_and_drain().await;
    assert_eq!(report.writes, 0);
    assert_eq!(report.removals, 0);
    assert_eq!(mirror.store.get_count(), fetches, "no new object fetches");
}

#[tokio::test]
async fn newer_remote_object_is_rewritten() {
    let mirror = TestMirror::new(true, None);
    mirror.seed("doc.txt", b"v1");
    mirror.sync_and_drain().await;

    // Same size, but the remote copy is newer than the local file now.
    mirror
        .store
        .put("doc.txt", Bytes::from_static(b"v2"), future(3600));
    // Make the local mtime unambiguously old.
    filetime::set_file_mtime(
        mirror.root.join("doc.txt"),
        filetime::FileTime::from_system_time(past(7200)),
    )
    .unwrap();

    let report = mirror.sync_and_drain().await;
    assert_eq!(report.writes, 1);
    assert_eq!(std::fs::read(mirror.root.join("doc.txt")).unwrap(), b"v2");
}

#[tokio::test]
async fn remove_off_preserves_local_extras() {
    let mirror = TestMirror::new(false, None);
    mirror.seed("remote.txt", b"r");
    std::fs::write(mirror.root.join("local-only.txt"), "keep me").unwrap();

    let report = mirror.sync_and_drain().await;
    assert_eq!(report.removals, 0);
    assert_eq!(
        mirror.local_files(),
        vec!["local-only.txt", "remote.txt"]
    );
}

#[tokio::test]
async fn unicode_collision_under_nfc_is_a_no_op() {
    let mirror = TestMirror::new(true, Some(NormalizationForm::Nfc));
    // Remote: decomposed form; local: precomposed file of equal size.
    mirror.seed("n\u{0303}.txt", b"1234");
    std::fs::write(mirror.root.join("\u{00F1}.txt"), "1234").unwrap();

    let report = mirror.sync_and_drain().await;
    assert_eq!(report.writes, 0);
    assert_eq!(report.removals, 0);
}

#[tokio::test]
async fn without_normalization_the_decomposed_key_is_written() {
    let mirror = TestMirror::new(false, None);
    mirror.seed("n\u{0303}.txt", b"1234");
    std::fs::write(mirror.root.join("\u{00F1}.txt"), "1234").unwrap();

    let report = mirror.sync_and_drain().await;
    assert_eq!(report.writes, 1);
    // Both byte sequences now exist as distinct files.
    assert_eq!(mirror.local_files().len(), 2);
}

#[tokio::test]
async fn no_staging_residue_after_a_large_sync() {
    let mirror = TestMirror::new(true, None);
    for i in 0..100 {
        mirror.seed(&format!("bulk/file-{i:03}.dat"), b"payload");
    }

    let report = mirror.sync_and_drain().await;
    assert_eq!(report.writes, 100);
    assert!(
        mirror
            .local_files()
            .iter()
            .all(|f| !f.contains(".tmp")),
        "no temp files left behind"
    );
    assert_eq!(mirror.local_files().len(), 100);
}
