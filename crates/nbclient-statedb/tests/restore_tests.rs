//! Restore Tests
//!
//! Session pools persisted through the state database and replayed after
//! a reload.
//!
use nbclient_services::session::SessionOptions;
use nbclient_services::{DefaultSession, RunningSessions, ServerSettings};
use nbclient_statedb::{DataConnector, RestorablePool, RestoreOptions, StateDB};
use nbclient_test_utils::{init_tracing, FakeServer, RecordingCommands};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;

fn options(db: &Arc<StateDB>, commands: &Arc<RecordingCommands>) -> RestoreOptions<DefaultSession> {
    RestoreOptions::new(
        "session:open",
        commands.clone(),
        db.clone(),
        |s: &DefaultSession| s.path(),
    )
    .with_args(|s: &DefaultSession| json!({ "path": s.path(), "kernel": s.kernel().name() }))
}

async fn start(
    settings: &ServerSettings,
    registry: &Arc<RunningSessions>,
    path: &str,
) -> Arc<DefaultSession> {
    DefaultSession::start_new(settings, registry, &SessionOptions::notebook(path))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_sessions_persist_and_prune_on_shutdown() {
    init_tracing();
    let server = FakeServer::new();
    let settings = server.settings();
    let registry = RunningSessions::new();
    let db = Arc::new(StateDB::in_memory());
    let commands = Arc::new(RecordingCommands::new());
    let pool = RestorablePool::new("session");
    pool.restore(options(&db, &commands)).await.unwrap();

    let a = start(&settings, &registry, "a.ipynb").await;
    let b = start(&settings, &registry, "b.ipynb").await;
    pool.add(Arc::clone(&a)).await.unwrap();
    pool.add(Arc::clone(&b)).await.unwrap();

    assert_eq!(
        db.fetch("session:a.ipynb").await.unwrap(),
        Some(json!({ "data": { "path": "a.ipynb", "kernel": "python3" } }))
    );

    b.shutdown().await.unwrap();
    assert!(!pool.has(&b));
    assert_eq!(pool.size(), 1);

    for _ in 0..3 {
        tokio::task::yield_now().await;
    }
    let listing = db.list("session").await.unwrap();
    assert_eq!(listing.ids, vec!["session:a.ipynb".to_string()]);
    assert!(commands.calls().is_empty());
}

#[tokio::test]
async fn test_save_follows_session_rename() {
    let server = FakeServer::new();
    let settings = server.settings();
    let registry = RunningSessions::new();
    let db = Arc::new(StateDB::in_memory());
    let commands = Arc::new(RecordingCommands::new());
    let pool = RestorablePool::new("session");
    pool.restore(options(&db, &commands)).await.unwrap();
    let updated = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&updated);
    pool.updated()
        .connect(move |_, session: &Arc<DefaultSession>| sink.lock().push(session.path()));

    let session = start(&settings, &registry, "draft.ipynb").await;
    pool.add(Arc::clone(&session)).await.unwrap();
    session.set_path("final.ipynb").await.unwrap();
    pool.save(&session).await.unwrap();

    assert_eq!(db.fetch("session:draft.ipynb").await.unwrap(), None);
    assert_eq!(
        db.fetch("session:final.ipynb").await.unwrap(),
        Some(json!({ "data": { "path": "final.ipynb", "kernel": "python3" } }))
    );
    assert_eq!(*updated.lock(), vec!["final.ipynb".to_string()]);
}

#[tokio::test]
async fn test_reload_replays_saved_sessions() {
    let db = Arc::new(StateDB::in_memory());
    db.save(
        "session:a.ipynb",
        json!({ "data": { "path": "a.ipynb", "kernel": "python3" } }),
    )
    .await
    .unwrap();
    db.save(
        "session:gone.ipynb",
        json!({ "data": { "path": "gone.ipynb", "kernel": "python3" } }),
    )
    .await
    .unwrap();
    db.save("layout:main", json!({ "mode": "single" })).await.unwrap();

    let commands = Arc::new(RecordingCommands::new());
    commands.fail_for(json!({ "path": "gone.ipynb", "kernel": "python3" }));

    let pool: Arc<RestorablePool<DefaultSession>> = RestorablePool::new("session");
    let report = pool.restore(options(&db, &commands)).await.unwrap();

    assert_eq!(report.restored, vec!["session:a.ipynb".to_string()]);
    assert_eq!(report.removed, vec!["session:gone.ipynb".to_string()]);

    let calls = commands.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls.iter().all(|(command, _)| command == "session:open"));

    assert_eq!(db.fetch("session:gone.ipynb").await.unwrap(), None);
    assert_eq!(
        db.fetch("layout:main").await.unwrap(),
        Some(json!({ "mode": "single" }))
    );
}
