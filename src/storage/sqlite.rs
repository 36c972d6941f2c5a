//! CloudVault - SQLite Store
//!
//! Backs the CLI. Timestamps are stored as fixed-width RFC 3339 strings
//! (nanosecond precision) so that text ordering matches time ordering.
//!
//! Idempotent request creation is enforced by the database, not by the
//! process: a partial unique index allows one `pending` row per
//! `(file_id, requester_token)`, and decisions are a conditional
//! `UPDATE ... WHERE status = 'pending'`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};

use super::{
    AccessLogEntry, AccessLogStore, AccessRequestStore, FileStore, IdentityStore, PatchOutcome,
};
use crate::access::{AccessRequest, AccessStatus};
use crate::error::{VaultError, VaultResult};
use crate::record::{Classification, FileRecord};
use crate::seed::Identity;
use crate::token::Token;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    username TEXT,
    session_salt TEXT
);

CREATE TABLE IF NOT EXISTS files (
    id TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL,
    name TEXT NOT NULL,
    size INTEGER NOT NULL,
    media_type TEXT NOT NULL,
    uploaded_at TEXT NOT NULL,
    url TEXT,
    is_public INTEGER NOT NULL DEFAULT 1,
    classification TEXT,
    cipher_content TEXT,
    iv TEXT,
    UNIQUE (owner_id, name)
);

CREATE TABLE IF NOT EXISTS access_requests (
    id TEXT PRIMARY KEY,
    file_id TEXT NOT NULL,
    owner_id TEXT NOT NULL,
    requester_token TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    decided_at TEXT
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_requests_one_pending
    ON access_requests (file_id, requester_token) WHERE status = 'pending';
CREATE INDEX IF NOT EXISTS idx_requests_owner ON access_requests (owner_id, created_at);

CREATE TABLE IF NOT EXISTS access_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_id TEXT NOT NULL,
    access_key TEXT NOT NULL,
    accessed_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_logs_owner ON access_logs (owner_id);
"#;

const FILE_COLUMNS: &str = "id, owner_id, name, size, media_type, uploaded_at, url, is_public, \
                            classification, cipher_content, iv";

const REQUEST_COLUMNS: &str =
    "id, file_id, owner_id, requester_token, status, created_at, decided_at";

/// SQLite-backed store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`
    pub fn open(path: impl AsRef<Path>) -> VaultResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        // Other CLI processes may hold the write lock briefly
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::init(conn)
    }

    /// Private in-memory database
    pub fn open_in_memory() -> VaultResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> VaultResult<Self> {
        conn.execute_batch(SCHEMA)?;
        log::debug!("SQLite schema ready");
        Ok(Self { conn: Mutex::new(conn) })
    }
}

fn format_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_time(raw: &str) -> VaultResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| VaultError::Storage(format!("bad timestamp '{}': {}", raw, e)))
}

/// Raw `files` row; converted outside the rusqlite closure
struct FileRow {
    id: String,
    owner_id: String,
    name: String,
    size: i64,
    media_type: String,
    uploaded_at: String,
    url: Option<String>,
    is_public: bool,
    classification: Option<String>,
    cipher_content: Option<String>,
    iv: Option<String>,
}

impl FileRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            name: row.get(2)?,
            size: row.get(3)?,
            media_type: row.get(4)?,
            uploaded_at: row.get(5)?,
            url: row.get(6)?,
            is_public: row.get(7)?,
            classification: row.get(8)?,
            cipher_content: row.get(9)?,
            iv: row.get(10)?,
        })
    }

    fn into_record(self) -> VaultResult<FileRecord> {
        let classification = match self.classification {
            Some(json) => Some(serde_json::from_str::<Classification>(&json)?),
            None => None,
        };
        Ok(FileRecord {
            id: self.id,
            owner_id: self.owner_id,
            name: self.name,
            size: u64::try_from(self.size)
                .map_err(|_| VaultError::Storage("negative file size".into()))?,
            media_type: self.media_type,
            uploaded_at: parse_time(&self.uploaded_at)?,
            url: self.url,
            is_public: self.is_public,
            classification,
            cipher_content: self.cipher_content,
            iv: self.iv,
        })
    }
}

struct RequestRow {
    id: String,
    file_id: String,
    owner_id: String,
    requester_token: String,
    status: String,
    created_at: String,
    decided_at: Option<String>,
}

impl RequestRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            file_id: row.get(1)?,
            owner_id: row.get(2)?,
            requester_token: row.get(3)?,
            status: row.get(4)?,
            created_at: row.get(5)?,
            decided_at: row.get(6)?,
        })
    }

    fn into_request(self) -> VaultResult<AccessRequest> {
        Ok(AccessRequest {
            id: self.id,
            file_id: self.file_id,
            owner_id: self.owner_id,
            requester_token: Token::parse(&self.requester_token)
                .map_err(|_| VaultError::Storage("stored token is not valid hex".into()))?,
            status: self.status.parse()?,
            created_at: parse_time(&self.created_at)?,
            decided_at: self.decided_at.as_deref().map(parse_time).transpose()?,
        })
    }
}

fn query_request(conn: &Connection, request_id: &str) -> VaultResult<Option<AccessRequest>> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM access_requests WHERE id = ?1", REQUEST_COLUMNS),
            params![request_id],
            RequestRow::from_row,
        )
        .optional()?;
    row.map(RequestRow::into_request).transpose()
}

impl FileStore for SqliteStore {
    fn list_files(&self, owner_id: &str) -> VaultResult<Vec<FileRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM files WHERE owner_id = ?1 ORDER BY rowid",
            FILE_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![owner_id], FileRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(FileRow::into_record).collect()
    }

    fn get_file(&self, owner_id: &str, file_id: &str) -> VaultResult<Option<FileRecord>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                &format!("SELECT {} FROM files WHERE owner_id = ?1 AND id = ?2", FILE_COLUMNS),
                params![owner_id, file_id],
                FileRow::from_row,
            )
            .optional()?;
        row.map(FileRow::into_record).transpose()
    }

    fn put_files(&self, owner_id: &str, records: &[FileRecord]) -> VaultResult<Vec<FileRecord>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut stored = Vec::with_capacity(records.len());
        for record in records {
            let mut record = record.clone();
            record.owner_id = owner_id.to_string();

            let existing: Option<String> = tx
                .query_row(
                    "SELECT id FROM files WHERE owner_id = ?1 AND name = ?2",
                    params![owner_id, record.name],
                    |row| row.get(0),
                )
                .optional()?;

            let classification = record
                .classification
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            let size = i64::try_from(record.size)
                .map_err(|_| VaultError::Storage(format!("file size {} too large", record.size)))?;
            let cipher_content = record.cipher_content.clone();
            let iv = record.iv.clone();

            match existing {
                Some(id) => {
                    record.id = id;
                    tx.execute(
                        "UPDATE files SET size = ?1, media_type = ?2, uploaded_at = ?3, url = ?4,
                             is_public = ?5, classification = ?6, cipher_content = ?7, iv = ?8
                         WHERE id = ?9",
                        params![
                            size,
                            record.media_type,
                            format_time(record.uploaded_at),
                            record.url,
                            record.is_public,
                            classification,
                            cipher_content,
                            iv,
                            record.id,
                        ],
                    )?;
                }
                None => {
                    tx.execute(
                        &format!(
                            "INSERT INTO files ({})
                             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                            FILE_COLUMNS
                        ),
                        params![
                            record.id,
                            record.owner_id,
                            record.name,
                            size,
                            record.media_type,
                            format_time(record.uploaded_at),
                            record.url,
                            record.is_public,
                            classification,
                            cipher_content,
                            iv,
                        ],
                    )?;
                }
            }
            stored.push(record);
        }

        tx.commit()?;
        Ok(stored)
    }

    fn delete_file(&self, owner_id: &str, file_id: &str) -> VaultResult<()> {
        let conn = self.conn.lock();
        let removed = conn.execute(
            "DELETE FROM files WHERE owner_id = ?1 AND id = ?2",
            params![owner_id, file_id],
        )?;
        if removed == 0 {
            return Err(VaultError::FileNotFound(file_id.to_string()));
        }
        Ok(())
    }
}

impl IdentityStore for SqliteStore {
    fn identities(&self) -> VaultResult<Vec<Identity>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT id, username, session_salt FROM users ORDER BY rowid")?;
        let identities = stmt
            .query_map([], |row| {
                Ok(Identity {
                    id: row.get(0)?,
                    username: row.get(1)?,
                    session_salt: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(identities)
    }

    fn identity(&self, id: &str) -> VaultResult<Option<Identity>> {
        let conn = self.conn.lock();
        Ok(conn
            .query_row(
                "SELECT id, username, session_salt FROM users WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Identity {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        session_salt: row.get(2)?,
                    })
                },
            )
            .optional()?)
    }

    fn upsert_identity(&self, identity: &Identity) -> VaultResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO users (id, username, session_salt) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE
             SET username = excluded.username, session_salt = excluded.session_salt",
            params![identity.id, identity.username, identity.session_salt],
        )?;
        Ok(())
    }
}

impl AccessRequestStore for SqliteStore {
    fn create_request(
        &self,
        file_id: &str,
        owner_id: &str,
        requester_token: &Token,
        at: DateTime<Utc>,
    ) -> VaultResult<AccessRequest> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let candidate = AccessRequest::pending(file_id, owner_id, requester_token, at);
        tx.execute(
            "INSERT OR IGNORE INTO access_requests
                 (id, file_id, owner_id, requester_token, status, created_at)
             VALUES (?1, ?2, ?3, ?4, 'pending', ?5)",
            params![
                candidate.id,
                candidate.file_id,
                candidate.owner_id,
                candidate.requester_token.as_str(),
                format_time(candidate.created_at),
            ],
        )?;

        let row = tx.query_row(
            &format!(
                "SELECT {} FROM access_requests
                 WHERE file_id = ?1 AND requester_token = ?2 AND status = 'pending'",
                REQUEST_COLUMNS
            ),
            params![file_id, requester_token.as_str()],
            RequestRow::from_row,
        )?;
        tx.commit()?;

        row.into_request()
    }

    fn get_request(&self, request_id: &str) -> VaultResult<Option<AccessRequest>> {
        let conn = self.conn.lock();
        query_request(&conn, request_id)
    }

    fn patch_request(
        &self,
        request_id: &str,
        status: AccessStatus,
        at: DateTime<Utc>,
    ) -> VaultResult<PatchOutcome> {
        if !status.is_terminal() {
            return Err(VaultError::Storage("cannot move a request back to pending".into()));
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let changed = tx.execute(
            "UPDATE access_requests SET status = ?1, decided_at = ?2
             WHERE id = ?3 AND status = 'pending'",
            params![status.as_str(), format_time(at), request_id],
        )?;
        let current = query_request(&tx, request_id)?;
        tx.commit()?;

        Ok(match (changed, current) {
            (_, None) => PatchOutcome::NotFound,
            (0, Some(request)) => PatchOutcome::AlreadyDecided(request),
            (_, Some(request)) => PatchOutcome::Applied(request),
        })
    }

    fn list_requests(&self, owner_id: &str) -> VaultResult<Vec<AccessRequest>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM access_requests WHERE owner_id = ?1
             ORDER BY created_at DESC, rowid DESC",
            REQUEST_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![owner_id], RequestRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(RequestRow::into_request).collect()
    }
}

impl AccessLogStore for SqliteStore {
    fn record_access(&self, entry: &AccessLogEntry) -> VaultResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO access_logs (owner_id, access_key, accessed_at) VALUES (?1, ?2, ?3)",
            params![entry.owner_id, entry.access_key.as_str(), format_time(entry.accessed_at)],
        )?;
        Ok(())
    }

    fn access_log(&self, owner_id: &str) -> VaultResult<Vec<AccessLogEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT owner_id, access_key, accessed_at FROM access_logs
             WHERE owner_id = ?1 ORDER BY id DESC",
        )?;
        let rows = stmt
            .query_map(params![owner_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(owner_id, key, at)| {
                Ok(AccessLogEntry {
                    owner_id,
                    access_key: Token::parse(&key)
                        .map_err(|_| VaultError::Storage("stored token is not valid hex".into()))?,
                    accessed_at: parse_time(&at)?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{encrypt, VaultKey};
    use crate::record::Classification;
    use tempfile::TempDir;

    #[test]
    fn test_file_roundtrip_with_envelope() {
        let store = SqliteStore::open_in_memory().unwrap();
        let envelope = encrypt(b"payload", &VaultKey::generate()).unwrap().encode();
        let record = FileRecord::new("u1", "a.bin", "application/octet-stream", 7, Utc::now())
            .with_envelope(envelope)
            .with_classification(Classification::unavailable());

        store.put_files("u1", &[record.clone()]).unwrap();
        let loaded = store.get_file("u1", &record.id).unwrap().unwrap();
        assert_eq!(loaded, record);
    }

    #[test]
    fn test_half_envelope_is_kept_as_stored() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut record =
            FileRecord::new("u1", "torn.bin", "application/octet-stream", 7, Utc::now());
        record.iv = Some("AAAAAAAAAAAAAAAA".into());

        store.put_files("u1", &[record.clone()]).unwrap();
        let loaded = store.get_file("u1", &record.id).unwrap().unwrap();
        assert_eq!(loaded.cipher_content, None);
        assert_eq!(loaded.iv, record.iv);
        assert!(matches!(loaded.envelope(), Err(VaultError::MalformedEnvelope(_))));
    }

    #[test]
    fn test_put_upserts_by_name() {
        let store = SqliteStore::open_in_memory().unwrap();
        let first = store
            .put_files("u1", &[FileRecord::new("u1", "a.txt", "text/plain", 1, Utc::now())])
            .unwrap();
        let second = store
            .put_files("u1", &[FileRecord::new("u1", "a.txt", "text/plain", 2, Utc::now())])
            .unwrap();

        assert_eq!(first[0].id, second[0].id);
        let files = store.list_files("u1").unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].size, 2);
    }

    #[test]
    fn test_delete_missing_file() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(matches!(store.delete_file("u1", "nope"), Err(VaultError::FileNotFound(_))));
    }

    #[test]
    fn test_identity_upsert() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.upsert_identity(&Identity::new("u1").with_username("ann")).unwrap();
        store
            .upsert_identity(&Identity::new("u1").with_username("ann").with_session_salt("s"))
            .unwrap();

        let all = store.identities().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].session_salt.as_deref(), Some("s"));
        assert!(store.identity("u2").unwrap().is_none());
    }

    #[test]
    fn test_create_is_idempotent_and_patch_is_terminal() {
        let store = SqliteStore::open_in_memory().unwrap();
        let token = Token::parse("DEADBEEF").unwrap();

        let a = store.create_request("f1", "owner", &token, Utc::now()).unwrap();
        let b = store.create_request("f1", "owner", &token, Utc::now()).unwrap();
        assert_eq!(a.id, b.id);

        assert!(matches!(
            store.patch_request(&a.id, AccessStatus::Denied, Utc::now()).unwrap(),
            PatchOutcome::Applied(_)
        ));
        match store.patch_request(&a.id, AccessStatus::Approved, Utc::now()).unwrap() {
            PatchOutcome::AlreadyDecided(current) => {
                assert_eq!(current.status, AccessStatus::Denied)
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        // A fresh request may open once the previous one is decided
        let c = store.create_request("f1", "owner", &token, Utc::now()).unwrap();
        assert_ne!(c.id, a.id);
        assert_eq!(store.list_requests("owner").unwrap()[0].id, c.id);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db").join("vault.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.upsert_identity(&Identity::new("u1")).unwrap();
            store
                .record_access(&AccessLogEntry {
                    owner_id: "u1".into(),
                    access_key: Token::parse("ABC").unwrap(),
                    accessed_at: Utc::now(),
                })
                .unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.identities().unwrap().len(), 1);
        let log = store.access_log("u1").unwrap();
        assert_eq!(log[0].access_key.as_str(), "00000ABC");
    }
}
