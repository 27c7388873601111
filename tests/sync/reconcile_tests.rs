// Tests for the reconciliation pass
// Tree building, newest-wins merge and materialization end to end

use redsync::remote::{MemoryRemote, RemoteCall};
use redsync::sync::{merge, ExcludePatterns};
use redsync::tree::{build_local_tree, build_remote_tree, Origin, ROOT};
use redsync::SyncError;

use crate::common::{mtime_of, t, write_file, Fixture};

#[tokio::test]
async fn test_newer_remote_file_overwrites_local() {
    let fx = Fixture::new();
    let local = fx.root().join("a.txt");
    write_file(&local, b"local", 1_000);
    fx.remote.put_file("/", "a.txt", b"remote", t(2_000));

    let local_tree = build_local_tree(fx.root(), ROOT, &ExcludePatterns::default()).unwrap();
    let remote_tree = build_remote_tree(fx.remote.as_ref(), ROOT, &ExcludePatterns::default())
        .await
        .unwrap();
    let merged = merge(&local_tree, &remote_tree);
    assert_eq!(merged.pending.len(), 1);
    assert_eq!(merged.pending["a.txt"].origin, Origin::Remote);

    let report = fx.engine.run_reconciliation(ROOT).await.unwrap();

    assert_eq!(report.applied.files_pulled, 1);
    assert_eq!(std::fs::read(&local).unwrap(), b"remote");
    assert_eq!(mtime_of(&local), 2_000);
}

#[tokio::test]
async fn test_local_only_folder_is_created_then_filled() {
    let fx = Fixture::new();
    write_file(&fx.root().join("docs").join("x.txt"), b"x", 1_000);

    let report = fx.engine.run_reconciliation(ROOT).await.unwrap();

    assert_eq!(report.pending, 2);
    assert_eq!(
        fx.remote.mutations(),
        vec![
            RemoteCall::CreateDirectory {
                name: "docs".into(),
                parent: "/".into()
            },
            RemoteCall::Upload {
                name: "x.txt".into(),
                dir: "/docs/".into()
            },
        ]
    );
    assert_eq!(fx.remote.file_modified("/docs/x.txt"), Some(t(1_000)));
}

#[tokio::test]
async fn test_newer_local_file_is_uploaded() {
    let fx = Fixture::new();
    fx.remote.put_file("/", "notes.txt", b"old", t(1_000));
    write_file(&fx.root().join("notes.txt"), b"new", 3_000);

    fx.engine.run_reconciliation(ROOT).await.unwrap();

    assert_eq!(fx.remote.file_content("/notes.txt"), Some(b"new".to_vec()));
    assert_eq!(fx.remote.file_modified("/notes.txt"), Some(t(3_000)));
}

#[tokio::test]
async fn test_second_pass_does_nothing() {
    let fx = Fixture::new();
    write_file(&fx.root().join("local.txt"), b"l", 1_000);
    write_file(&fx.root().join("shared").join("newer-here.txt"), b"n", 5_000);
    fx.remote.put_folder("/", "shared", t(1));
    fx.remote.put_file("/shared/", "newer-here.txt", b"o", t(4_000));
    fx.remote.put_file("/shared/", "remote.txt", b"r", t(2_000));
    fx.remote.put_folder("/", "photos", t(1));
    fx.remote.put_file("/photos/", "p.jpg", b"p", t(3_000));

    let first = fx.engine.run_reconciliation(ROOT).await.unwrap();
    assert!(first.is_clean());
    assert!(first.applied.actions() > 0);

    fx.remote.clear_calls();
    let second = fx.engine.run_reconciliation(ROOT).await.unwrap();

    assert_eq!(second.pending, 0);
    assert_eq!(second.applied.actions(), 0);
    assert_eq!(second.remote_calls, fx.remote.calls().len());
    assert!(fx.remote.mutations().is_empty());
    assert!(fx
        .remote
        .calls()
        .iter()
        .all(|c| matches!(c, RemoteCall::ListDirectory(_))));
}

#[tokio::test]
async fn test_listing_failure_aborts_before_any_write() {
    let fx = Fixture::new();
    write_file(&fx.root().join("a.txt"), b"a", 1_000);
    fx.remote.put_file("/", "b.txt", b"b", t(1_000));
    fx.remote.fail_method("getFileHeadsAsXML");

    let err = fx.engine.run_reconciliation(ROOT).await.unwrap_err();

    assert!(matches!(err, SyncError::RemoteUnreachable { .. }));
    assert!(fx.remote.mutations().is_empty());
    assert!(!fx.root().join("b.txt").exists());
    assert!(!fx.engine.is_busy());
}

#[tokio::test]
async fn test_missing_session_aborts_before_building_trees() {
    let fx = Fixture::with_remote(MemoryRemote::unauthenticated());

    let err = fx.engine.run_reconciliation(ROOT).await.unwrap_err();

    assert!(matches!(err, SyncError::AuthenticationMissing));
    assert!(fx.remote.calls().is_empty());
}

#[tokio::test]
async fn test_concurrent_pass_is_refused() {
    let fx = Fixture::new();
    fx.remote.put_file("/", "a.txt", b"a", t(1_000));

    let (first, second) = tokio::join!(
        fx.engine.run_reconciliation(ROOT),
        fx.engine.run_reconciliation(ROOT)
    );

    assert!(first.is_ok());
    assert!(matches!(second, Err(SyncError::PassInProgress)));
    assert!(!fx.engine.is_busy());
}

#[tokio::test]
async fn test_deletions_are_not_propagated() {
    let fx = Fixture::new();
    fx.remote.put_file("/", "kept.txt", b"k", t(1_000));
    fx.engine.run_reconciliation(ROOT).await.unwrap();

    // Removing the local copy only means the next pass restores it.
    std::fs::remove_file(fx.root().join("kept.txt")).unwrap();
    fx.remote.clear_calls();
    let report = fx.engine.run_reconciliation(ROOT).await.unwrap();

    assert_eq!(report.applied.files_pulled, 1);
    assert!(fx.root().join("kept.txt").exists());
    assert!(fx.remote.mutations().is_empty());
}

#[tokio::test]
async fn test_excluded_files_stay_local() {
    let fx = Fixture::new();
    write_file(&fx.root().join("report.docx"), b"r", 1_000);
    write_file(&fx.root().join("~$report.docx"), b"lock", 1_000);
    write_file(&fx.root().join(".DS_Store"), b"", 1_000);

    fx.engine.run_reconciliation(ROOT).await.unwrap();

    assert_eq!(
        fx.remote.mutations(),
        vec![RemoteCall::Upload {
            name: "report.docx".into(),
            dir: "/".into()
        }]
    );
}

#[tokio::test]
async fn test_subdirectory_pass() {
    let fx = Fixture::new();
    fx.remote.put_folder("/", "docs", t(1));
    fx.remote.put_file("/docs/", "in.txt", b"i", t(1_000));
    fx.remote.put_file("/", "out.txt", b"o", t(1_000));

    let report = fx.engine.run_reconciliation("/docs/").await.unwrap();

    assert_eq!(report.directory, "/docs/");
    assert!(fx.root().join("docs").join("in.txt").exists());
    assert!(!fx.root().join("out.txt").exists());
}

#[tokio::test]
async fn test_failed_upload_does_not_stop_siblings() {
    let fx = Fixture::new();
    write_file(&fx.root().join("a.txt"), b"a", 1_000);
    fx.remote.put_file("/", "b.txt", b"b", t(1_000));
    fx.remote.reject_method("uploadFile");

    let report = fx.engine.run_reconciliation(ROOT).await.unwrap();

    assert_eq!(report.applied.failures.len(), 1);
    assert_eq!(report.applied.failures[0].path, "/a.txt");
    assert_eq!(report.applied.files_pulled, 1);
    assert!(!report.is_clean());
}
