//! CloudVault - Memory Store
//!
//! Everything lives behind one `RwLock`, so every trait operation is atomic
//! with respect to every other.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::{
    AccessLogEntry, AccessLogStore, AccessRequestStore, FileStore, IdentityStore, PatchOutcome,
};
use crate::access::{AccessRequest, AccessStatus};
use crate::error::{VaultError, VaultResult};
use crate::record::FileRecord;
use crate::seed::Identity;
use crate::token::Token;

/// Store for tests and embedding
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    /// owner_id -> records in upload order
    files: HashMap<String, Vec<FileRecord>>,
    /// Registration order is preserved for resolution
    identities: Vec<Identity>,
    /// Insertion order
    requests: Vec<AccessRequest>,
    access_log: Vec<AccessLogEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FileStore for MemoryStore {
    fn list_files(&self, owner_id: &str) -> VaultResult<Vec<FileRecord>> {
        let inner = self.inner.read();
        Ok(inner.files.get(owner_id).cloned().unwrap_or_default())
    }

    fn get_file(&self, owner_id: &str, file_id: &str) -> VaultResult<Option<FileRecord>> {
        let inner = self.inner.read();
        Ok(inner
            .files
            .get(owner_id)
            .and_then(|files| files.iter().find(|f| f.id == file_id).cloned()))
    }

    fn put_files(&self, owner_id: &str, records: &[FileRecord]) -> VaultResult<Vec<FileRecord>> {
        let mut inner = self.inner.write();
        let files = inner.files.entry(owner_id.to_string()).or_default();

        let mut stored = Vec::with_capacity(records.len());
        for record in records {
            let mut record = record.clone();
            record.owner_id = owner_id.to_string();

            match files.iter_mut().find(|f| f.name == record.name) {
                Some(existing) => {
                    record.id = existing.id.clone();
                    *existing = record.clone();
                }
                None => files.push(record.clone()),
            }
            stored.push(record);
        }
        Ok(stored)
    }

    fn delete_file(&self, owner_id: &str, file_id: &str) -> VaultResult<()> {
        let mut inner = self.inner.write();
        let files = inner
            .files
            .get_mut(owner_id)
            .ok_or_else(|| VaultError::FileNotFound(file_id.to_string()))?;

        let before = files.len();
        files.retain(|f| f.id != file_id);
        if files.len() == before {
            return Err(VaultError::FileNotFound(file_id.to_string()));
        }
        Ok(())
    }
}

impl IdentityStore for MemoryStore {
    fn identities(&self) -> VaultResult<Vec<Identity>> {
        Ok(self.inner.read().identities.clone())
    }

    fn identity(&self, id: &str) -> VaultResult<Option<Identity>> {
        Ok(self.inner.read().identities.iter().find(|i| i.id == id).cloned())
    }

    fn upsert_identity(&self, identity: &Identity) -> VaultResult<()> {
        let mut inner = self.inner.write();
        match inner.identities.iter_mut().find(|i| i.id == identity.id) {
            Some(existing) => *existing = identity.clone(),
            None => inner.identities.push(identity.clone()),
        }
        Ok(())
    }
}

impl AccessRequestStore for MemoryStore {
    fn create_request(
        &self,
        file_id: &str,
        owner_id: &str,
        requester_token: &Token,
        at: DateTime<Utc>,
    ) -> VaultResult<AccessRequest> {
        // Check and insert under the same write guard
        let mut inner = self.inner.write();
        if let Some(existing) = inner.requests.iter().find(|r| {
            r.file_id == file_id
                && r.requester_token == *requester_token
                && r.status == AccessStatus::Pending
        }) {
            return Ok(existing.clone());
        }

        let request = AccessRequest::pending(file_id, owner_id, requester_token, at);
        inner.requests.push(request.clone());
        Ok(request)
    }

    fn get_request(&self, request_id: &str) -> VaultResult<Option<AccessRequest>> {
        Ok(self.inner.read().requests.iter().find(|r| r.id == request_id).cloned())
    }

    fn patch_request(
        &self,
        request_id: &str,
        status: AccessStatus,
        at: DateTime<Utc>,
    ) -> VaultResult<PatchOutcome> {
        let mut inner = self.inner.write();
        let Some(request) = inner.requests.iter_mut().find(|r| r.id == request_id) else {
            return Ok(PatchOutcome::NotFound);
        };

        match request.transition(status, at) {
            Ok(()) => Ok(PatchOutcome::Applied(request.clone())),
            Err(VaultError::RequestAlreadyDecided(_)) => {
                Ok(PatchOutcome::AlreadyDecided(request.clone()))
            }
            Err(e) => Err(e),
        }
    }

    fn list_requests(&self, owner_id: &str) -> VaultResult<Vec<AccessRequest>> {
        let inner = self.inner.read();
        let mut requests: Vec<AccessRequest> = inner
            .requests
            .iter()
            .filter(|r| r.owner_id == owner_id)
            .cloned()
            .collect();
        // Stable sort keeps later inserts first among equal timestamps
        requests.reverse();
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(requests)
    }
}

impl AccessLogStore for MemoryStore {
    fn record_access(&self, entry: &AccessLogEntry) -> VaultResult<()> {
        self.inner.write().access_log.push(entry.clone());
        Ok(())
    }

    fn access_log(&self, owner_id: &str) -> VaultResult<Vec<AccessLogEntry>> {
        let inner = self.inner.read();
        Ok(inner
            .access_log
            .iter()
            .rev()
            .filter(|e| e.owner_id == owner_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn record(owner: &str, name: &str) -> FileRecord {
        FileRecord::new(owner, name, "text/plain", 3, Utc::now())
    }

    #[test]
    fn test_put_upserts_by_name() {
        let store = MemoryStore::new();
        let first = store.put_files("u1", &[record("u1", "a.txt")]).unwrap();

        let mut replacement = record("u1", "a.txt");
        replacement.size = 99;
        let second = store.put_files("u1", &[replacement]).unwrap();

        assert_eq!(first[0].id, second[0].id);
        let files = store.list_files("u1").unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].size, 99);
    }

    #[test]
    fn test_files_are_per_owner() {
        let store = MemoryStore::new();
        let stored = store.put_files("u1", &[record("u1", "a.txt")]).unwrap();
        assert!(store.list_files("u2").unwrap().is_empty());
        assert!(store.get_file("u2", &stored[0].id).unwrap().is_none());
        assert!(matches!(
            store.delete_file("u2", &stored[0].id),
            Err(VaultError::FileNotFound(_))
        ));
    }

    #[test]
    fn test_delete() {
        let store = MemoryStore::new();
        let stored = store.put_files("u1", &[record("u1", "a.txt")]).unwrap();
        store.delete_file("u1", &stored[0].id).unwrap();
        assert!(store.list_files("u1").unwrap().is_empty());
        assert!(store.delete_file("u1", &stored[0].id).is_err());
    }

    #[test]
    fn test_identity_upsert_keeps_order() {
        let store = MemoryStore::new();
        store.upsert_identity(&Identity::new("a")).unwrap();
        store.upsert_identity(&Identity::new("b")).unwrap();
        store.upsert_identity(&Identity::new("a").with_session_salt("s")).unwrap();

        let ids: Vec<_> = store.identities().unwrap().into_iter().map(|i| i.id).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(store.identity("a").unwrap().unwrap().session_salt.as_deref(), Some("s"));
    }

    #[test]
    fn test_concurrent_create_yields_one_pending() {
        let store = Arc::new(MemoryStore::new());
        let token = Token::parse("CAFEBABE").unwrap();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                let token = token.clone();
                thread::spawn(move || {
                    store.create_request("f1", "owner", &token, Utc::now()).unwrap().id
                })
            })
            .collect();

        let ids: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ids.iter().all(|id| *id == ids[0]));
        assert_eq!(store.list_requests("owner").unwrap().len(), 1);
    }

    #[test]
    fn test_patch_is_compare_and_set() {
        let store = MemoryStore::new();
        let token = Token::parse("1").unwrap();
        let request = store.create_request("f1", "owner", &token, Utc::now()).unwrap();

        assert!(matches!(
            store.patch_request(&request.id, AccessStatus::Approved, Utc::now()).unwrap(),
            PatchOutcome::Applied(_)
        ));
        match store.patch_request(&request.id, AccessStatus::Denied, Utc::now()).unwrap() {
            PatchOutcome::AlreadyDecided(current) => {
                assert_eq!(current.status, AccessStatus::Approved)
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(
            store.patch_request("missing", AccessStatus::Denied, Utc::now()).unwrap(),
            PatchOutcome::NotFound
        );
    }

    #[test]
    fn test_access_log_newest_first() {
        let store = MemoryStore::new();
        let token = Token::parse("AB").unwrap();
        let t0 = Utc::now();
        for i in 0..3 {
            store
                .record_access(&AccessLogEntry {
                    owner_id: "u1".into(),
                    access_key: token.clone(),
                    accessed_at: t0 + chrono::Duration::seconds(i),
                })
                .unwrap();
        }
        let log = store.access_log("u1").unwrap();
        assert_eq!(log.len(), 3);
        assert!(log[0].accessed_at > log[2].accessed_at);
    }
}
