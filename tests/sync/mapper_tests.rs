// Tests for live sync
// Event mapping through the engine's serialized remote, and the watcher loop

use std::time::{Duration, Instant};

use redsync::remote::RemoteCall;
use redsync::sync::{EventDebouncer, FsEvent, MappedAction};
use redsync::tree::ROOT;

use crate::common::{t, write_file, Fixture};

#[tokio::test]
async fn test_created_directory_with_two_files() {
    let fx = Fixture::new();
    let photos = fx.root().join("photos");
    write_file(&photos.join("one.jpg"), b"1", 1_000);
    write_file(&photos.join("two.jpg"), b"2", 1_000);

    let outcomes = fx.engine.mapper().handle(FsEvent::Created(photos)).await;

    let actions: Vec<_> = outcomes.iter().map(|o| o.action).collect();
    assert_eq!(
        actions,
        vec![
            MappedAction::CreateFolder,
            MappedAction::Upload,
            MappedAction::Upload
        ]
    );
    assert_eq!(
        fx.remote.mutations(),
        vec![
            RemoteCall::CreateDirectory {
                name: "photos".into(),
                parent: "/".into()
            },
            RemoteCall::Upload {
                name: "one.jpg".into(),
                dir: "/photos/".into()
            },
            RemoteCall::Upload {
                name: "two.jpg".into(),
                dir: "/photos/".into()
            },
        ]
    );
}

#[tokio::test]
async fn test_changed_file_is_deleted_by_hash_then_uploaded() {
    let fx = Fixture::new();
    fx.remote.put_file("/", "report.docx", b"v1", t(1_000));
    let hash = fx.remote.hash_of("/report.docx").unwrap();
    let local = fx.root().join("report.docx");
    write_file(&local, b"v2", 2_000);

    let outcomes = fx.engine.mapper().handle(FsEvent::Changed(local)).await;

    assert!(outcomes.iter().all(|o| o.is_ok()));
    assert_eq!(
        fx.remote.mutations(),
        vec![
            RemoteCall::DeleteFile(hash),
            RemoteCall::Upload {
                name: "report.docx".into(),
                dir: "/".into()
            },
        ]
    );
    assert_eq!(fx.remote.file_content("/report.docx"), Some(b"v2".to_vec()));
}

#[tokio::test]
async fn test_file_written_after_create_reaches_remote_in_full() {
    let fx = Fixture::new();
    let mapper = fx.engine.mapper();
    let mut debouncer = EventDebouncer::new(Duration::from_millis(100));
    let file = fx.root().join("report.txt");
    let start = Instant::now();

    // Editors create the file empty and fill it right after.
    std::fs::write(&file, b"").unwrap();
    debouncer.push(FsEvent::Created(file.clone()), start);
    std::fs::write(&file, b"full content").unwrap();
    debouncer.push(FsEvent::Changed(file.clone()), start + Duration::from_millis(20));

    assert!(debouncer.take_ready(start + Duration::from_millis(60)).is_empty());
    let ready = debouncer.take_ready(start + Duration::from_millis(200));
    assert_eq!(ready, vec![FsEvent::Created(file.clone())]);
    for event in ready {
        mapper.handle(event).await;
    }

    assert_eq!(
        fx.remote.file_content("/report.txt"),
        Some(b"full content".to_vec())
    );
    let report = fx.engine.run_reconciliation(ROOT).await.unwrap();
    assert_eq!(report.pending, 0);
}

#[tokio::test]
async fn test_pulled_files_do_not_echo_back() {
    let fx = Fixture::new();
    fx.remote.put_file("/", "pulled.txt", b"p", t(1_000));
    fx.engine.run_reconciliation(ROOT).await.unwrap();
    fx.remote.clear_calls();

    let pulled = fx.root().join("pulled.txt");
    let mapper = fx.engine.mapper();
    mapper.handle(FsEvent::Created(pulled.clone())).await;
    mapper.handle(FsEvent::Changed(pulled)).await;

    assert!(fx.remote.calls().is_empty());
}

#[tokio::test]
async fn test_one_failure_does_not_stop_the_next_event() {
    let fx = Fixture::new();
    fx.remote.reject_method("createDir");
    let mapper = fx.engine.mapper();

    std::fs::create_dir(fx.root().join("blocked")).unwrap();
    write_file(&fx.root().join("blocked").join("inner.txt"), b"i", 1_000);
    let failed = mapper.handle(FsEvent::Created(fx.root().join("blocked"))).await;
    assert_eq!(failed.len(), 1);
    assert!(!failed[0].is_ok());

    write_file(&fx.root().join("fine.txt"), b"f", 1_000);
    let ok = mapper.handle(FsEvent::Created(fx.root().join("fine.txt"))).await;
    assert!(ok[0].is_ok());
    assert!(fx.remote.file_content("/fine.txt").is_some());
}

#[tokio::test]
async fn test_live_sync_uploads_new_file() {
    let fx = Fixture::new();
    let live = fx
        .engine
        .start_live_sync(Duration::from_millis(50))
        .unwrap();
    assert!(live.is_running());

    std::fs::write(fx.root().join("live.txt"), b"watched").unwrap();

    let mut uploaded = false;
    for _ in 0..100 {
        if fx.remote.file_content("/live.txt").as_deref() == Some(b"watched".as_slice()) {
            uploaded = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    live.stop();

    assert!(uploaded);
}
