//! Concurrent access-request creation must leave exactly one pending row.

use std::sync::{Arc, Barrier};
use std::thread;

use chrono::Utc;

use cloud_vault::access::AccessStatus;
use cloud_vault::storage::{AccessRequestStore, MemoryStore, SqliteStore};
use cloud_vault::Token;

const THREADS: usize = 12;

fn hammer<S: AccessRequestStore + 'static>(store: Arc<S>) -> Vec<String> {
    let token = Token::parse("5EED5EED").unwrap();
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            let token = token.clone();
            thread::spawn(move || {
                barrier.wait();
                store.create_request("file-1", "owner", &token, Utc::now()).unwrap().id
            })
        })
        .collect();

    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

fn assert_single_pending<S: AccessRequestStore>(store: &S, ids: &[String]) {
    assert!(ids.iter().all(|id| *id == ids[0]));
    let requests = store.list_requests("owner").unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].status, AccessStatus::Pending);
}

#[test]
fn memory_store_create_is_atomic() {
    let store = Arc::new(MemoryStore::new());
    let ids = hammer(Arc::clone(&store));
    assert_single_pending(store.as_ref(), &ids);
}

#[test]
fn sqlite_store_create_is_atomic() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let ids = hammer(Arc::clone(&store));
    assert_single_pending(store.as_ref(), &ids);
}

#[test]
fn separate_sqlite_connections_share_one_pending_row() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vault.db");
    // Create the schema once before the race
    SqliteStore::open(&path).unwrap();

    let token = Token::parse("ABCDEF01").unwrap();
    let barrier = Arc::new(Barrier::new(4));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let path = path.clone();
            let token = token.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let store = SqliteStore::open(&path).unwrap();
                barrier.wait();
                store.create_request("file-1", "owner", &token, Utc::now()).unwrap().id
            })
        })
        .collect();
    let ids: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let store = SqliteStore::open(&path).unwrap();
    assert_single_pending(&store, &ids);
}

#[test]
fn concurrent_decisions_apply_once() {
    let store = Arc::new(MemoryStore::new());
    let token = Token::parse("1").unwrap();
    let request = store.create_request("file-1", "owner", &token, Utc::now()).unwrap();

    let handles: Vec<_> = [AccessStatus::Approved, AccessStatus::Denied]
        .into_iter()
        .cycle()
        .take(THREADS)
        .map(|status| {
            let store = Arc::clone(&store);
            let id = request.id.clone();
            thread::spawn(move || store.patch_request(&id, status, Utc::now()).unwrap())
        })
        .collect();

    let applied = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|outcome| matches!(outcome, cloud_vault::storage::PatchOutcome::Applied(_)))
        .count();
    assert_eq!(applied, 1);
}
