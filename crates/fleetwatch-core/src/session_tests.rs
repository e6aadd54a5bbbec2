use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use crate::backend::BackendError;
use crate::client::{FleetClient, FleetError};
use crate::session::{
    FileSessionStorage, MemorySessionStorage, SessionId, SessionManager, SessionStorage,
};
use crate::testing::FakeBackend;

fn make_temp_dir(name: &str) -> PathBuf {
    let mut path = env::temp_dir();
    let uniq = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("unix epoch")
        .as_nanos();
    path.push(format!("fleetwatch-tests-{name}-{uniq}"));
    fs::create_dir_all(&path).expect("create temp dir");
    path
}

#[tokio::test]
async fn session_is_created_once_and_reused() {
    // Arrange
    let backend = FakeBackend::new();
    let manager = SessionManager::new(MemorySessionStorage::default());

    // Act
    let first = manager.ensure_session(backend.as_ref()).await.expect("first");
    let second = manager.ensure_session(backend.as_ref()).await.expect("second");

    // Assert
    assert_eq!(first, second);
    assert_eq!(backend.sessions_started(), 1);
}

#[tokio::test]
async fn concurrent_callers_share_one_session() {
    let backend = FakeBackend::new();
    let manager = SessionManager::new(MemorySessionStorage::default());

    let (a, b, c) = tokio::join!(
        manager.ensure_session(backend.as_ref()),
        manager.ensure_session(backend.as_ref()),
        manager.ensure_session(backend.as_ref()),
    );

    assert_eq!(a.expect("a"), b.expect("b"));
    assert_eq!(c.expect("c").as_str(), "session-1");
    assert_eq!(backend.sessions_started(), 1);
}

#[tokio::test]
async fn persisted_session_is_used_without_network() {
    // Arrange
    let backend = FakeBackend::new();
    let manager = SessionManager::new(MemorySessionStorage::with_session(SessionId::new(
        "persisted",
    )));

    // Act
    let session = manager.ensure_session(backend.as_ref()).await.expect("session");

    // Assert
    assert_eq!(session.as_str(), "persisted");
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn session_failure_propagates_to_fetches() {
    // Arrange
    let backend = FakeBackend::new();
    backend.fail_sessions(BackendError::Status {
        operation: "start session",
        status: 503,
    });
    let client = FleetClient::new(
        backend.clone(),
        Arc::new(SessionManager::new(MemorySessionStorage::default())),
    );

    // Act
    let result = client.fleet_status().await;

    // Assert
    assert!(matches!(result, Err(FleetError::Session(_))));
    assert_eq!(backend.calls(), vec!["start_session".to_string()]);
}

#[tokio::test]
async fn renew_replaces_the_session() {
    let backend = FakeBackend::new();
    let client = FleetClient::new(
        backend.clone(),
        Arc::new(SessionManager::new(MemorySessionStorage::default())),
    );

    let first = client.ensure_session().await.expect("first");
    let renewed = client.renew_session().await.expect("renewed");

    assert_ne!(first, renewed);
    assert_eq!(client.sessions().current().await, Some(renewed));
    assert_eq!(backend.sessions_started(), 2);
}

#[tokio::test]
async fn file_storage_survives_a_new_manager() {
    // Arrange
    let dir = make_temp_dir("persist");
    let path = dir.join("nested").join("session.json");
    let backend = FakeBackend::new();

    // Act
    let created = SessionManager::new(FileSessionStorage::new(&path))
        .ensure_session(backend.as_ref())
        .await
        .expect("create");
    let restored = SessionManager::new(FileSessionStorage::new(&path))
        .ensure_session(backend.as_ref())
        .await
        .expect("restore");

    // Assert
    assert_eq!(created, restored);
    assert_eq!(backend.sessions_started(), 1);
    assert!(path.exists(), "session file should be written");

    let _ = fs::remove_dir_all(dir);
}

#[test]
fn file_storage_load_and_clear() {
    // Arrange
    let dir = make_temp_dir("clear");
    let storage = FileSessionStorage::new(dir.join("session.json"));

    // Act / Assert
    assert_eq!(storage.load().expect("load missing"), None);
    storage.save(&SessionId::new("abc")).expect("save");
    assert_eq!(storage.load().expect("load"), Some(SessionId::new("abc")));
    storage.clear().expect("clear");
    assert_eq!(storage.load().expect("load cleared"), None);
    storage.clear().expect("clearing twice is fine");

    let _ = fs::remove_dir_all(dir);
}

#[test]
fn corrupt_session_file_is_an_error() {
    let dir = make_temp_dir("corrupt");
    let path = dir.join("session.json");
    fs::write(&path, "not json").expect("write");

    let storage = FileSessionStorage::new(&path);

    assert!(storage.load().is_err());

    let _ = fs::remove_dir_all(dir);
}

#[test]
fn memory_storage_keeps_working_after_a_panicking_holder() {
    // Arrange
    let storage = Arc::new(MemorySessionStorage::with_session(SessionId::new("s-1")));
    let holder = Arc::clone(&storage);
    let panicked = std::thread::spawn(move || {
        let _guard = holder.slot.lock().unwrap();
        panic!("holder panics with the lock taken");
    })
    .join();
    assert!(panicked.is_err());
    assert!(storage.slot.is_poisoned());

    // Act
    storage.save(&SessionId::new("s-2")).expect("save");

    // Assert
    assert_eq!(storage.load().expect("load"), Some(SessionId::new("s-2")));
    storage.clear().expect("clear");
    assert_eq!(storage.load().expect("load"), None);
}
