//! CloudVault - Storage Collaborators
//!
//! The engine only talks to persistence through these traits. Two
//! implementations ship with the crate: [`MemoryStore`] for tests and
//! embedding, [`SqliteStore`] for the CLI.
//!
//! Every failure of the backend surfaces as `VaultError::Storage` and means
//! nothing was committed.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::access::{AccessRequest, AccessStatus};
use crate::error::VaultResult;
use crate::record::FileRecord;
use crate::seed::Identity;
use crate::token::Token;

/// Result of a compare-and-set on an access request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOutcome {
    /// Request was pending and now carries the new status
    Applied(AccessRequest),
    /// Request was already terminal; nothing changed
    AlreadyDecided(AccessRequest),
    /// No request with that id
    NotFound,
}

/// One successful shared-vault lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessLogEntry {
    pub owner_id: String,
    pub access_key: Token,
    pub accessed_at: DateTime<Utc>,
}

/// File records per owner
pub trait FileStore: Send + Sync {
    fn list_files(&self, owner_id: &str) -> VaultResult<Vec<FileRecord>>;

    fn get_file(&self, owner_id: &str, file_id: &str) -> VaultResult<Option<FileRecord>>;

    /// Upsert keyed by `(owner_id, name)`. A record whose name already exists
    /// replaces the stored one but keeps its id. Returns what was stored.
    fn put_files(&self, owner_id: &str, records: &[FileRecord]) -> VaultResult<Vec<FileRecord>>;

    /// `FileNotFound` when the owner has no such file
    fn delete_file(&self, owner_id: &str, file_id: &str) -> VaultResult<()>;
}

/// Accounts known to the vault
pub trait IdentityStore: Send + Sync {
    fn identities(&self) -> VaultResult<Vec<Identity>>;

    fn identity(&self, id: &str) -> VaultResult<Option<Identity>>;

    fn upsert_identity(&self, identity: &Identity) -> VaultResult<()>;
}

/// Access requests. `create_request` must be atomic with its idempotency
/// check: at most one pending request per `(file_id, requester_token)`.
pub trait AccessRequestStore: Send + Sync {
    /// Insert a pending request, or return the pending one that already exists
    fn create_request(
        &self,
        file_id: &str,
        owner_id: &str,
        requester_token: &Token,
        at: DateTime<Utc>,
    ) -> VaultResult<AccessRequest>;

    fn get_request(&self, request_id: &str) -> VaultResult<Option<AccessRequest>>;

    /// Compare-and-set from `pending` to `status`
    fn patch_request(
        &self,
        request_id: &str,
        status: AccessStatus,
        at: DateTime<Utc>,
    ) -> VaultResult<PatchOutcome>;

    /// Requests against the owner's files, newest first
    fn list_requests(&self, owner_id: &str) -> VaultResult<Vec<AccessRequest>>;
}

/// Shared-vault access log
pub trait AccessLogStore: Send + Sync {
    fn record_access(&self, entry: &AccessLogEntry) -> VaultResult<()>;

    fn access_log(&self, owner_id: &str) -> VaultResult<Vec<AccessLogEntry>>;
}

/// Everything the vault service needs from one backend
pub trait VaultStore: FileStore + IdentityStore + AccessRequestStore + AccessLogStore {}

impl<T> VaultStore for T where T: FileStore + IdentityStore + AccessRequestStore + AccessLogStore {}
