//! CloudVault - Vault Service
//!
//! Ties the pieces together for one store:
//!
//! ```text
//! identity ──SeedClock──▶ seed ──KeyDeriver──▶ key ──AES-256-GCM──▶ envelope
//!                           │
//!                           └──rolling hash──▶ token ──resolve──▶ shared listing
//!                                                        └──────▶ access requests
//! ```
//!
//! Keys are never stored. Every upload and download derives the key from the
//! identity's current seed, so once the seed rotates older files no longer
//! open and the caller sees `AuthenticationFailure`.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;

use crate::access::{AccessRequest, AccessRequestWorkflow, Decision};
use crate::clock::{Clock, SystemClock};
use crate::config::VaultConfig;
use crate::crypto::{decrypt, encrypt, DecryptedContent, KeyDeriver, VaultKey};
use crate::error::{VaultError, VaultResult};
use crate::record::{Classification, FileRecord, FileRecordPublicView};
use crate::rotation::{generate_session_salt, RotationStatus};
use crate::seed::{Identity, SeedClock};
use crate::storage::{AccessLogEntry, AccessRequestStore, VaultStore};
use crate::token::{self, Token};

/// What a token holder gets back
#[derive(Debug, Clone, Serialize)]
pub struct SharedListing {
    /// Owner's display name
    pub owner: String,
    pub files: Vec<FileRecordPublicView>,
}

/// Encrypted file vault over one store
pub struct CloudVault<S: VaultStore + 'static> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    seeds: SeedClock,
    deriver: KeyDeriver,
    requests: AccessRequestWorkflow,
}

impl<S: VaultStore + 'static> CloudVault<S> {
    // ═══════════════════════════════════════════════════════════════════════
    // INITIALIZATION
    // ═══════════════════════════════════════════════════════════════════════

    /// Vault on the system clock, configured from `config`
    pub fn new(store: Arc<S>, config: &VaultConfig) -> VaultResult<Self> {
        config.validate()?;
        Ok(Self::with_parts(
            store,
            Arc::new(SystemClock),
            config.seed_clock()?,
            config.key_deriver()?,
        ))
    }

    /// Vault from explicit parts
    pub fn with_parts(
        store: Arc<S>,
        clock: Arc<dyn Clock>,
        seeds: SeedClock,
        deriver: KeyDeriver,
    ) -> Self {
        let request_store: Arc<dyn AccessRequestStore> = store.clone();
        Self {
            store,
            clock,
            seeds,
            deriver,
            requests: AccessRequestWorkflow::new(request_store),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn seeds(&self) -> &SeedClock {
        &self.seeds
    }

    // ═══════════════════════════════════════════════════════════════════════
    // IDENTITIES
    // ═══════════════════════════════════════════════════════════════════════

    /// Create an account, or update the display name of an existing one.
    /// New accounts start with a fresh session salt. Surrounding whitespace
    /// is not part of the id.
    pub fn register(&self, id: &str, username: Option<&str>) -> VaultResult<Identity> {
        let id = id.trim();
        if id.is_empty() {
            return Err(VaultError::Config("identity id is empty".into()));
        }

        let mut identity = match self.store.identity(id)? {
            Some(existing) => existing,
            None => {
                log::info!("Registering identity {}", id);
                Identity::new(id).with_session_salt(generate_session_salt())
            }
        };
        if let Some(name) = username {
            identity.username = Some(name.to_string());
        }

        self.store.upsert_identity(&identity)?;
        Ok(identity)
    }

    /// Start a new session: a new salt, so a new token and, under the session
    /// policy, a new key. Files uploaded before no longer decrypt.
    pub fn login(&self, id: &str) -> VaultResult<Identity> {
        let identity = self.identity(id)?.with_session_salt(generate_session_salt());
        self.store.upsert_identity(&identity)?;
        log::info!("New session for {}; token rotated", id);
        Ok(identity)
    }

    pub fn identity(&self, id: &str) -> VaultResult<Identity> {
        self.store
            .identity(id)?
            .ok_or_else(|| VaultError::IdentityNotFound(id.to_string()))
    }

    /// Token `id` would show right now
    pub fn current_token(&self, id: &str) -> VaultResult<Token> {
        let identity = self.identity(id)?;
        token::current_token(&identity, &self.seeds, self.clock.now())
    }

    pub fn rotation_status(&self, id: &str) -> VaultResult<RotationStatus> {
        let identity = self.identity(id)?;
        RotationStatus::compute(&identity, &self.seeds, self.clock.now())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // FILES
    // ═══════════════════════════════════════════════════════════════════════

    fn current_key(&self, identity: &Identity) -> VaultResult<VaultKey> {
        let seed = self.seeds.seed(identity, self.clock.now())?;
        self.deriver.derive_key(seed.as_str())
    }

    /// Encrypt `content` under the owner's current key and store it.
    /// Re-uploading a name replaces the previous file and keeps its id.
    pub fn upload(
        &self,
        owner_id: &str,
        name: &str,
        media_type: &str,
        content: &[u8],
        classification: Option<Classification>,
    ) -> VaultResult<FileRecord> {
        if name.trim().is_empty() {
            return Err(VaultError::Config("file name is empty".into()));
        }
        let identity = self.identity(owner_id)?;
        let key = self.current_key(&identity)?;
        let envelope = encrypt(content, &key)?;

        let size = content.len() as u64;
        let mut record = FileRecord::new(owner_id, name, media_type, size, self.clock.now())
            .with_envelope(envelope.encode());
        record.classification = classification;

        let stored = self
            .store
            .put_files(owner_id, &[record])?
            .into_iter()
            .next()
            .ok_or_else(|| VaultError::Storage("store returned no record".into()))?;

        log::info!("Uploaded {} ({} bytes) as {}", stored.name, stored.size, stored.id);
        Ok(stored)
    }

    /// Decrypt one of the owner's files with the owner's current key
    pub fn download(&self, owner_id: &str, file_id: &str) -> VaultResult<DecryptedContent> {
        let identity = self.identity(owner_id)?;
        let record = self
            .store
            .get_file(owner_id, file_id)?
            .ok_or_else(|| VaultError::FileNotFound(file_id.to_string()))?;

        let envelope = record.envelope()?.decode()?;
        let key = self.current_key(&identity)?;

        decrypt(&envelope, &key, &record.media_type).map_err(|e| {
            if matches!(e, VaultError::AuthenticationFailure) {
                log::warn!(
                    "Authentication failed for file {}; key has likely rotated",
                    file_id
                );
            }
            e
        })
    }

    pub fn list(&self, owner_id: &str) -> VaultResult<Vec<FileRecord>> {
        self.store.list_files(owner_id)
    }

    /// Remove a file. Access requests that point at it stay in the store
    /// for the record but drop out of the request listings, and can no
    /// longer be decided.
    pub fn delete(&self, owner_id: &str, file_id: &str) -> VaultResult<()> {
        self.store.delete_file(owner_id, file_id)?;
        log::info!("Deleted file {}", file_id);
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // SHARING
    // ═══════════════════════════════════════════════════════════════════════

    fn resolve_owner(&self, token: &Token) -> VaultResult<Identity> {
        let candidates = self.store.identities()?;
        match token::resolve(token, &candidates, &self.seeds, self.clock.now()) {
            Ok(owner) => Ok(owner.clone()),
            Err(e) => {
                log::warn!("Unmatched capability token");
                Err(e)
            }
        }
    }

    /// Public listing for whoever holds the owner's current token.
    /// Each successful lookup is written to the owner's access log.
    pub fn shared_files(&self, token_input: &str) -> VaultResult<SharedListing> {
        let token = Token::parse(token_input)?;
        let owner = self.resolve_owner(&token)?;

        let files = self
            .store
            .list_files(&owner.id)?
            .iter()
            .filter(|f| f.is_public)
            .map(FileRecord::public_view)
            .collect();

        self.store.record_access(&AccessLogEntry {
            owner_id: owner.id.clone(),
            access_key: token,
            accessed_at: self.clock.now(),
        })?;

        Ok(SharedListing {
            owner: owner.display_name().to_string(),
            files,
        })
    }

    /// Ask the owner of `file_id` for access. The file must belong to the
    /// token's owner; anything else looks exactly like a bad token.
    pub fn request_access(
        &self,
        token_input: &str,
        file_id: &str,
    ) -> VaultResult<AccessRequest> {
        let token = Token::parse(token_input)?;
        let owner = self.resolve_owner(&token)?;
        let file = self
            .store
            .get_file(&owner.id, file_id)?
            .ok_or(VaultError::CapabilityNotFound)?;

        self.requests.open(&file, &token, self.clock.now())
    }

    /// Owner approves or denies. A pending request whose file has been
    /// deleted is `FileNotFound`.
    pub fn decide(
        &self,
        actor_id: &str,
        request_id: &str,
        decision: Decision,
    ) -> VaultResult<AccessRequest> {
        if let Some(request) = self.store.get_request(request_id)? {
            let stale = request.owner_id == actor_id
                && !request.status.is_terminal()
                && self.store.get_file(&request.owner_id, &request.file_id)?.is_none();
            if stale {
                return Err(VaultError::FileNotFound(request.file_id));
            }
        }
        self.requests.decide(actor_id, request_id, decision, self.clock.now())
    }

    /// Requests against files the owner still has, newest first
    pub fn list_requests(&self, owner_id: &str) -> VaultResult<Vec<AccessRequest>> {
        self.live_requests(owner_id, self.requests.list(owner_id)?)
    }

    pub fn pending_requests(&self, owner_id: &str) -> VaultResult<Vec<AccessRequest>> {
        self.live_requests(owner_id, self.requests.pending(owner_id)?)
    }

    fn live_requests(
        &self,
        owner_id: &str,
        requests: Vec<AccessRequest>,
    ) -> VaultResult<Vec<AccessRequest>> {
        let files: HashSet<String> = self
            .store
            .list_files(owner_id)?
            .into_iter()
            .map(|f| f.id)
            .collect();
        Ok(requests.into_iter().filter(|r| files.contains(&r.file_id)).collect())
    }

    pub fn access_log(&self, owner_id: &str) -> VaultResult<Vec<AccessLogEntry>> {
        self.store.access_log(owner_id)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // ASYNC
    // ═══════════════════════════════════════════════════════════════════════

    /// `upload` on the blocking pool; PBKDF2 is too slow for a runtime thread
    pub async fn upload_async(
        self: &Arc<Self>,
        owner_id: String,
        name: String,
        media_type: String,
        content: Vec<u8>,
        classification: Option<Classification>,
    ) -> VaultResult<FileRecord> {
        let vault = Arc::clone(self);
        tokio::task::spawn_blocking(move || {
            vault.upload(&owner_id, &name, &media_type, &content, classification)
        })
        .await
        .map_err(|e| VaultError::Storage(format!("upload task failed: {}", e)))?
    }

    /// `download` on the blocking pool
    pub async fn download_async(
        self: &Arc<Self>,
        owner_id: String,
        file_id: String,
    ) -> VaultResult<DecryptedContent> {
        let vault = Arc::clone(self);
        tokio::task::spawn_blocking(move || vault.download(&owner_id, &file_id))
            .await
            .map_err(|e| VaultError::Storage(format!("download task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::{FileStore, IdentityStore, MemoryStore};
    use chrono::{DateTime, Duration};

    fn vault_with(seeds: SeedClock, clock: Arc<ManualClock>) -> CloudVault<MemoryStore> {
        CloudVault::with_parts(Arc::new(MemoryStore::new()), clock, seeds, KeyDeriver::default())
    }

    fn start() -> DateTime<chrono::Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_register_keeps_salt_on_rename() {
        let vault = vault_with(SeedClock::session(), Arc::new(ManualClock::new(start())));
        let first = vault.register("u1", None).unwrap();
        let renamed = vault.register("u1", Some("ann")).unwrap();

        assert_eq!(first.session_salt, renamed.session_salt);
        assert_eq!(renamed.display_name(), "ann");
        assert!(matches!(vault.register("  ", None), Err(VaultError::Config(_))));
    }

    #[test]
    fn test_register_trims_id() {
        let vault = vault_with(SeedClock::session(), Arc::new(ManualClock::new(start())));
        let identity = vault.register("  u1 ", None).unwrap();
        assert_eq!(identity.id, "u1");
        assert!(vault.identity("u1").is_ok());
        assert_eq!(vault.store().identities().unwrap().len(), 1);
    }

    #[test]
    fn test_upload_rejects_empty_name() {
        let vault = vault_with(SeedClock::session(), Arc::new(ManualClock::new(start())));
        vault.register("u1", None).unwrap();
        for name in ["", "   "] {
            assert!(matches!(
                vault.upload("u1", name, "text/plain", b"x", None),
                Err(VaultError::Config(_))
            ));
        }
        assert!(vault.list("u1").unwrap().is_empty());
    }

    #[test]
    fn test_half_envelope_download_is_malformed() {
        let vault = vault_with(SeedClock::session(), Arc::new(ManualClock::new(start())));
        vault.register("u1", None).unwrap();
        let mut torn = FileRecord::new("u1", "torn.txt", "text/plain", 4, start());
        torn.iv = Some("AAAAAAAAAAAAAAAA".into());
        vault.store().put_files("u1", &[torn.clone()]).unwrap();

        assert!(matches!(
            vault.download("u1", &torn.id),
            Err(VaultError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn test_deleted_file_requests_drop_out() {
        let vault = vault_with(SeedClock::session(), Arc::new(ManualClock::new(start())));
        vault.register("u1", None).unwrap();
        let kept = vault.upload("u1", "kept.txt", "text/plain", b"k", None).unwrap();
        let gone = vault.upload("u1", "gone.txt", "text/plain", b"g", None).unwrap();
        let token = vault.current_token("u1").unwrap();

        vault.request_access(token.as_str(), &kept.id).unwrap();
        let orphan = vault.request_access(token.as_str(), &gone.id).unwrap();
        vault.delete("u1", &gone.id).unwrap();

        let pending = vault.pending_requests("u1").unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].file_id, kept.id);
        assert_eq!(vault.list_requests("u1").unwrap().len(), 1);

        assert!(matches!(
            vault.decide("u1", &orphan.id, Decision::Approve),
            Err(VaultError::FileNotFound(_))
        ));
        // Non-owners still learn nothing beyond Unauthorized
        assert!(matches!(
            vault.decide("u2", &orphan.id, Decision::Approve),
            Err(VaultError::Unauthorized)
        ));
    }

    #[test]
    fn test_login_rotates_token() {
        let vault = vault_with(SeedClock::session(), Arc::new(ManualClock::new(start())));
        vault.register("u1", None).unwrap();
        let before = vault.current_token("u1").unwrap();
        vault.login("u1").unwrap();
        assert_ne!(before, vault.current_token("u1").unwrap());
        assert!(matches!(vault.login("nobody"), Err(VaultError::IdentityNotFound(_))));
    }

    #[test]
    fn test_upload_then_download() {
        let vault = vault_with(SeedClock::session(), Arc::new(ManualClock::new(start())));
        vault.register("u1", None).unwrap();

        let record = vault
            .upload("u1", "notes.txt", "text/plain", b"hello vault", None)
            .unwrap();
        assert!(record.is_encrypted());
        assert_eq!(record.size, 11);

        let content = vault.download("u1", &record.id).unwrap();
        assert_eq!(content.data(), b"hello vault");
        assert_eq!(content.media_type(), "text/plain");
    }

    #[test]
    fn test_epoch_rollover_breaks_download() {
        let clock = Arc::new(ManualClock::new(start()));
        let vault = vault_with(SeedClock::epoch(4).unwrap(), clock.clone());
        vault.register("u1", None).unwrap();

        let record = vault.upload("u1", "a.txt", "text/plain", b"abc", None).unwrap();
        clock.advance(Duration::hours(4));

        assert!(matches!(
            vault.download("u1", &record.id),
            Err(VaultError::AuthenticationFailure)
        ));
    }

    #[test]
    fn test_legacy_record_has_no_envelope() {
        let vault = vault_with(SeedClock::session(), Arc::new(ManualClock::new(start())));
        vault.register("u1", None).unwrap();
        let legacy = FileRecord::new("u1", "old.png", "image/png", 4, start());
        vault.store().put_files("u1", &[legacy.clone()]).unwrap();

        assert!(matches!(
            vault.download("u1", &legacy.id),
            Err(VaultError::MissingEnvelope(_))
        ));
    }

    #[test]
    fn test_shared_listing_and_log() {
        let vault = vault_with(SeedClock::session(), Arc::new(ManualClock::new(start())));
        let ann = Identity::new("u1").with_username("ann").with_session_salt("s");
        vault.store().upsert_identity(&ann).unwrap();
        let mut private = FileRecord::new("u1", "private.txt", "text/plain", 1, start());
        private.is_public = false;
        let public = FileRecord::new("u1", "public.txt", "text/plain", 1, start());
        vault.store().put_files("u1", &[private, public]).unwrap();

        let token = vault.current_token("u1").unwrap();
        let listing = vault.shared_files(&token.as_str().to_lowercase()).unwrap();
        assert_eq!(listing.owner, "ann");
        assert_eq!(listing.files.len(), 1);
        assert_eq!(listing.files[0].name, "public.txt");
        assert_eq!(vault.access_log("u1").unwrap().len(), 1);

        assert!(matches!(vault.shared_files("zzz"), Err(VaultError::CapabilityNotFound)));
        assert_eq!(vault.access_log("u1").unwrap().len(), 1);
    }

    #[test]
    fn test_request_for_foreign_file_looks_like_bad_token() {
        let vault = vault_with(SeedClock::session(), Arc::new(ManualClock::new(start())));
        vault.store().upsert_identity(&Identity::new("u1").with_session_salt("a")).unwrap();
        vault.store().upsert_identity(&Identity::new("u2").with_session_salt("b")).unwrap();
        let foreign = vault
            .store()
            .put_files("u2", &[FileRecord::new("u2", "x", "text/plain", 1, start())])
            .unwrap();

        let token = vault.current_token("u1").unwrap();
        assert!(matches!(
            vault.request_access(token.as_str(), &foreign[0].id),
            Err(VaultError::CapabilityNotFound)
        ));
    }
}
