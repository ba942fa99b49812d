//! Contents Manager Tests
//!
//! Drive routing, global paths and change forwarding against an in-memory
//! server.
//!
use nbclient_services::contents::{
    ContentType, FileChange, FileChangeKind, GetOptions, NewUntitledOptions, PartialContentsModel,
};
use nbclient_services::{ContentsError, ContentsManager, RestDrive};
use nbclient_test_utils::FakeServer;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use reqwest::Method;
use std::sync::Arc;

struct Fixture {
    local: Arc<FakeServer>,
    remote: Arc<FakeServer>,
    manager: Arc<ContentsManager>,
}

fn fixture() -> Fixture {
    let local = FakeServer::new();
    let remote = FakeServer::at("http://remote.local/");
    let manager = ContentsManager::new(Arc::new(RestDrive::new(
        RestDrive::DEFAULT_NAME,
        local.settings(),
    )));
    manager.add_drive(Arc::new(RestDrive::new("remote", remote.settings())));
    Fixture {
        local,
        remote,
        manager,
    }
}

fn record(manager: &ContentsManager) -> Arc<Mutex<Vec<FileChange>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    manager.file_changed().connect(move |_, change: &FileChange| {
        sink.lock().push(change.clone());
    });
    seen
}

#[tokio::test]
async fn test_save_then_get_round_trips_on_default_drive() {
    let f = fixture();

    let saved = f
        .manager
        .save("/notes/today.txt", &PartialContentsModel::text("hello"))
        .await
        .unwrap();
    assert_eq!(saved.path, "notes/today.txt");
    assert_eq!(f.local.file_text("notes/today.txt").as_deref(), Some("hello"));

    let model = f
        .manager
        .get("notes/today.txt", &GetOptions::default())
        .await
        .unwrap();
    assert_eq!(model.path, "notes/today.txt");
    assert_eq!(model.kind, ContentType::File);
    assert_eq!(model.content, Some(serde_json::json!("hello")));
}

#[tokio::test]
async fn test_save_then_get_round_trips_on_named_drive() {
    let f = fixture();

    let saved = f
        .manager
        .save("remote:data/a.txt", &PartialContentsModel::text("remote text"))
        .await
        .unwrap();
    assert_eq!(saved.path, "remote:data/a.txt");
    assert_eq!(f.remote.file_text("data/a.txt").as_deref(), Some("remote text"));
    assert!(!f.local.exists("data/a.txt"));

    let model = f
        .manager
        .get("remote:data/a.txt", &GetOptions::default())
        .await
        .unwrap();
    assert_eq!(model.path, "remote:data/a.txt");
    assert_eq!(model.content, Some(serde_json::json!("remote text")));
}

#[tokio::test]
async fn test_directory_listing_has_global_paths() {
    let f = fixture();
    f.remote.add_file("data/a.txt", "a");
    f.remote.add_file("data/b.txt", "b");
    f.remote.add_dir("data/sub");

    let listing = f
        .manager
        .get("remote:data", &GetOptions::default())
        .await
        .unwrap();
    assert_eq!(listing.kind, ContentType::Directory);

    let mut paths: Vec<String> = listing
        .children()
        .unwrap()
        .into_iter()
        .map(|c| c.path)
        .collect();
    paths.sort();
    assert_eq!(
        paths,
        vec!["remote:data/a.txt", "remote:data/b.txt", "remote:data/sub"]
    );
}

#[tokio::test]
async fn test_metadata_get_omits_content() {
    let f = fixture();
    f.local.add_file("a.txt", "body");

    let model = f.manager.get("a.txt", &GetOptions::metadata()).await.unwrap();
    assert_eq!(model.name, "a.txt");
    assert_eq!(model.content, None);

    let request = f.local.requests().pop().unwrap();
    assert_eq!(request.path, "api/contents/a.txt");
}

#[tokio::test]
async fn test_new_untitled_in_named_drive_directory() {
    let f = fixture();
    f.remote.add_dir("work");

    let model = f
        .manager
        .new_untitled(&NewUntitledOptions {
            path: "remote:work".into(),
            kind: Some(ContentType::File),
            ext: Some(".md".into()),
        })
        .await
        .unwrap();
    assert!(model.name.ends_with(".md"));
    assert_eq!(model.path, format!("remote:work/{}", model.name));
    assert!(f.remote.exists(&format!("work/{}", model.name)));
}

#[tokio::test]
async fn test_rename_forwards_global_change() {
    let f = fixture();
    f.remote.add_file("old.txt", "x");
    let seen = record(&f.manager);

    let model = f.manager.rename("remote:old.txt", "remote:new.txt").await.unwrap();
    assert_eq!(model.path, "remote:new.txt");
    assert!(f.remote.exists("new.txt"));
    assert!(!f.remote.exists("old.txt"));

    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].kind, FileChangeKind::Rename);
    assert_eq!(seen[0].old_path.as_deref(), Some("remote:old.txt"));
    assert_eq!(
        seen[0].new_value.as_ref().map(|m| m.path.as_str()),
        Some("remote:new.txt")
    );
}

#[tokio::test]
async fn test_cross_drive_rename_sends_nothing() {
    let f = fixture();
    f.local.add_file("a.txt", "x");

    let err = f.manager.rename("a.txt", "remote:a.txt").await.unwrap_err();
    assert!(matches!(
        err,
        ContentsError::CrossDrive {
            operation: "rename",
            ..
        }
    ));
    assert!(f.local.requests().is_empty());
    assert!(f.remote.requests().is_empty());
}

#[tokio::test]
async fn test_copy_within_drive() {
    let f = fixture();
    f.local.add_file("src/a.txt", "x");
    f.local.add_dir("dst");
    let seen = record(&f.manager);

    let copy = f.manager.copy("src/a.txt", "dst").await.unwrap();
    assert_eq!(copy.path, "dst/a-Copy1.txt");
    assert_eq!(f.local.file_text("dst/a-Copy1.txt").as_deref(), Some("x"));
    assert_eq!(seen.lock()[0].kind, FileChangeKind::New);
}

#[tokio::test]
async fn test_delete_non_empty_directory_is_rejected() {
    let f = fixture();
    f.local.add_file("dir/a.txt", "x");

    let err = f.manager.delete("dir").await.unwrap_err();
    match err {
        ContentsError::DeleteRejected(message) => assert!(message.contains("not empty")),
        other => panic!("unexpected error: {other}"),
    }
    assert!(f.local.exists("dir"));
}

#[tokio::test]
async fn test_delete_emits_change() {
    let f = fixture();
    f.remote.add_file("a.txt", "x");
    let seen = record(&f.manager);

    f.manager.delete("remote:a.txt").await.unwrap();
    assert!(!f.remote.exists("a.txt"));

    let seen = seen.lock();
    assert_eq!(seen[0].kind, FileChangeKind::Delete);
    assert_eq!(seen[0].old_path.as_deref(), Some("remote:a.txt"));
    assert!(seen[0].new_value.is_none());
}

#[tokio::test]
async fn test_server_error_surfaces_status() {
    let f = fixture();
    f.local.fail_next(500, "disk full");

    let err = f
        .manager
        .save("a.txt", &PartialContentsModel::text("x"))
        .await
        .unwrap_err();
    match err {
        ContentsError::Server(e) => {
            assert_eq!(e.status(), Some(500));
            assert!(e.to_string().contains("disk full"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_checkpoint_lifecycle() {
    let f = fixture();
    f.local.add_file("a.txt", "first");

    let checkpoint = f.manager.create_checkpoint("a.txt").await.unwrap();
    f.manager
        .save("a.txt", &PartialContentsModel::text("second"))
        .await
        .unwrap();
    assert_eq!(f.local.file_text("a.txt").as_deref(), Some("second"));

    let listed = f.manager.list_checkpoints("a.txt").await.unwrap();
    assert_eq!(listed, vec![checkpoint.clone()]);

    f.manager
        .restore_checkpoint("a.txt", &checkpoint.id)
        .await
        .unwrap();
    assert_eq!(f.local.file_text("a.txt").as_deref(), Some("first"));

    f.manager
        .delete_checkpoint("a.txt", &checkpoint.id)
        .await
        .unwrap();
    assert!(f.manager.list_checkpoints("a.txt").await.unwrap().is_empty());
    assert_eq!(
        f.local
            .request_count(&Method::POST, "api/contents/a.txt/checkpoints"),
        2
    );
}

#[tokio::test]
async fn test_download_url_uses_owning_drive() {
    let f = fixture();
    let url = f.manager.get_download_url("remote:dir/a b.txt").await.unwrap();
    assert_eq!(url, "http://remote.local/files/dir/a%20b.txt");

    let url = f.manager.get_download_url("/x.txt").await.unwrap();
    assert_eq!(url, "http://fake.local/files/x.txt");
}
