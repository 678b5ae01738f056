//! Session manager end to end over a directory-backed remote
//!
//! Run with: cargo test --test session_manager_test

use pretty_assertions::assert_eq;
use std::sync::Arc;
use tempfile::TempDir;

use telesync::remote::{DirectoryRemote, RemoteStore};
use telesync::session::{LocalSessionStore, SessionError, SessionManager, SyncAction};

const REMOTE_PATH: &str = "/backup/session.json";

struct Replica {
    _dir: TempDir,
    manager: Arc<SessionManager>,
}

fn replica(remote: &Arc<dyn RemoteStore>) -> Replica {
    let dir = TempDir::new().unwrap();
    let manager = Arc::new(SessionManager::new(
        LocalSessionStore::new(dir.path().join("session.json")),
        Some(remote.clone()),
        REMOTE_PATH,
    ));
    Replica { _dir: dir, manager }
}

fn shared_remote(dir: &TempDir) -> Arc<dyn RemoteStore> {
    Arc::new(DirectoryRemote::new(dir.path()))
}

#[tokio::test]
async fn test_two_replicas_converge() {
    let remote_dir = TempDir::new().unwrap();
    let remote = shared_remote(&remote_dir);
    let a = replica(&remote);
    let b = replica(&remote);

    a.manager.init().await.unwrap();
    a.manager.create(b"auth-key-1".to_vec()).await.unwrap();
    assert_eq!(a.manager.sync().await.unwrap().action, SyncAction::Push);

    let status = b.manager.init().await.unwrap();
    assert_eq!(status.state, "active");
    assert_eq!(b.manager.current().await.unwrap().blob(), b"auth-key-1");

    // B refreshes; A, with no local changes, pulls it.
    b.manager.refresh(b"auth-key-2".to_vec()).await.unwrap();
    assert_eq!(b.manager.sync().await.unwrap().action, SyncAction::Push);
    assert_eq!(a.manager.sync().await.unwrap().action, SyncAction::Pull);
    assert_eq!(a.manager.current().await.unwrap().blob(), b"auth-key-2");

    assert_eq!(a.manager.sync().await.unwrap().action, SyncAction::InSync);
    assert_eq!(b.manager.sync().await.unwrap().action, SyncAction::InSync);
}

#[tokio::test]
async fn test_forced_push_and_pull() {
    let remote_dir = TempDir::new().unwrap();
    let remote = shared_remote(&remote_dir);
    let a = replica(&remote);
    let b = replica(&remote);

    assert_eq!(a.manager.pull().await.unwrap().action, SyncAction::Nothing);

    a.manager.create(b"from-a".to_vec()).await.unwrap();
    let pushed = a.manager.push().await.unwrap();
    assert_eq!(pushed.action, SyncAction::Push);

    b.manager.load_local().await.unwrap();
    b.manager.create(b"from-b".to_vec()).await.unwrap();
    let pulled = b.manager.pull().await.unwrap();
    assert_eq!(pulled.action, SyncAction::Pull);
    assert_eq!(pulled.rev, pushed.rev);
    assert_eq!(b.manager.current().await.unwrap().blob(), b"from-a");
}

#[tokio::test]
async fn test_concurrent_handlers_do_not_lose_updates() {
    let remote_dir = TempDir::new().unwrap();
    let remote = shared_remote(&remote_dir);
    let a = replica(&remote);
    a.manager.create(b"seed".to_vec()).await.unwrap();

    let mut tasks = Vec::new();
    for i in 0..8 {
        let manager = a.manager.clone();
        tasks.push(tokio::spawn(async move {
            manager.refresh(format!("key-{}", i).into_bytes()).await.unwrap();
            manager.sync().await.unwrap()
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    // Whatever won locally is exactly what the remote holds.
    let local = a.manager.current().await.unwrap();
    let object = remote.fetch(REMOTE_PATH).await.unwrap().unwrap();
    let remote_copy = telesync::session::Session::decode(&object.bytes).unwrap();
    assert_eq!(local.checksum(), remote_copy.checksum());
    assert!(!a.manager.status().await.dirty);
}

#[tokio::test]
async fn test_corrupt_remote_is_overwritten() {
    let remote_dir = TempDir::new().unwrap();
    let remote = shared_remote(&remote_dir);
    std::fs::create_dir_all(remote_dir.path().join("backup")).unwrap();
    std::fs::write(remote_dir.path().join("backup/session.json"), b"garbage").unwrap();

    let a = replica(&remote);
    a.manager.create(b"good".to_vec()).await.unwrap();
    let outcome = a.manager.sync().await.unwrap();
    assert_eq!(outcome.action, SyncAction::Push);

    let object = remote.fetch(REMOTE_PATH).await.unwrap().unwrap();
    let restored = telesync::session::Session::decode(&object.bytes).unwrap();
    assert_eq!(restored.blob(), b"good");
}

#[tokio::test]
async fn test_logout_is_not_resurrected_by_sync() {
    let remote_dir = TempDir::new().unwrap();
    let remote = shared_remote(&remote_dir);
    let a = replica(&remote);
    a.manager.create(b"key".to_vec()).await.unwrap();
    a.manager.sync().await.unwrap();

    a.manager.logout().await.unwrap();
    assert!(remote.fetch(REMOTE_PATH).await.unwrap().is_none());
    assert!(matches!(
        a.manager.refresh(b"new".to_vec()).await,
        Err(SessionError::Invalidated(_))
    ));

    assert_eq!(a.manager.sync().await.unwrap().action, SyncAction::Nothing);
    assert_eq!(a.manager.status().await.state, "invalidated");

    // A fresh sign-in brings it back.
    a.manager.create(b"new".to_vec()).await.unwrap();
    assert_eq!(a.manager.sync().await.unwrap().action, SyncAction::Push);
}

#[tokio::test]
async fn test_status_never_exposes_blob() {
    let remote_dir = TempDir::new().unwrap();
    let remote = shared_remote(&remote_dir);
    let a = replica(&remote);
    a.manager.create(b"super-secret-auth-key".to_vec()).await.unwrap();

    let json = serde_json::to_string(&a.manager.status().await).unwrap();
    assert!(!json.contains("super-secret-auth-key"));
    assert!(json.contains("\"state\":\"active\""));
}
