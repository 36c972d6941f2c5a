//! CloudVault - Access Request Workflow
//!
//! `pending -> approved | denied`, both terminal. Only the owner of the file
//! may decide. A patch on a decided request is rejected and leaves the stored
//! status untouched.
//!
//! Approval is an auditable acknowledgment only. It never hands out key
//! material: anyone holding a valid token could already read the public
//! listing, and decryption still needs the owner's seed. That gap is part of
//! the current contract.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{VaultError, VaultResult};
use crate::record::FileRecord;
use crate::storage::{AccessRequestStore, PatchOutcome};
use crate::token::Token;

/// Request status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessStatus {
    Pending,
    Approved,
    Denied,
}

impl AccessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Denied => "denied",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl FromStr for AccessStatus {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "denied" => Ok(Self::Denied),
            other => Err(VaultError::Storage(format!("unknown access status '{}'", other))),
        }
    }
}

impl fmt::Display for AccessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owner's answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Deny,
}

impl Decision {
    pub fn status(&self) -> AccessStatus {
        match self {
            Self::Approve => AccessStatus::Approved,
            Self::Deny => AccessStatus::Denied,
        }
    }
}

/// A third party's request to use a token against one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessRequest {
    pub id: String,
    pub file_id: String,
    pub owner_id: String,
    pub requester_token: Token,
    pub status: AccessStatus,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

impl AccessRequest {
    /// Fresh pending request
    pub fn pending(
        file_id: &str,
        owner_id: &str,
        requester_token: &Token,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            file_id: file_id.to_string(),
            owner_id: owner_id.to_string(),
            requester_token: requester_token.clone(),
            status: AccessStatus::Pending,
            created_at: at,
            decided_at: None,
        }
    }

    /// Apply a transition in place; stores call this under their own lock
    pub fn transition(&mut self, to: AccessStatus, at: DateTime<Utc>) -> VaultResult<()> {
        if self.status.is_terminal() {
            return Err(VaultError::RequestAlreadyDecided(self.id.clone()));
        }
        if !to.is_terminal() {
            return Err(VaultError::Storage("cannot move a request back to pending".into()));
        }
        self.status = to;
        self.decided_at = Some(at);
        Ok(())
    }
}

/// Workflow over an access-request store
#[derive(Clone)]
pub struct AccessRequestWorkflow {
    store: Arc<dyn AccessRequestStore>,
}

impl AccessRequestWorkflow {
    pub fn new(store: Arc<dyn AccessRequestStore>) -> Self {
        Self { store }
    }

    /// Open (or return the already pending) request for `(file, token)`.
    ///
    /// The caller has already resolved `token` to the file's owner.
    pub fn open(
        &self,
        file: &FileRecord,
        token: &Token,
        at: DateTime<Utc>,
    ) -> VaultResult<AccessRequest> {
        let request = self.store.create_request(&file.id, &file.owner_id, token, at)?;
        log::info!(
            "Access request {} for file {} is {}",
            request.id,
            request.file_id,
            request.status
        );
        Ok(request)
    }

    /// Owner approves or denies
    pub fn decide(
        &self,
        actor_id: &str,
        request_id: &str,
        decision: Decision,
        at: DateTime<Utc>,
    ) -> VaultResult<AccessRequest> {
        let request = self
            .store
            .get_request(request_id)?
            .ok_or_else(|| VaultError::RequestNotFound(request_id.to_string()))?;

        if request.owner_id != actor_id {
            log::warn!("Rejected decision on request {} by non-owner", request_id);
            return Err(VaultError::Unauthorized);
        }
        if request.status.is_terminal() {
            return Err(VaultError::RequestAlreadyDecided(request_id.to_string()));
        }

        match self.store.patch_request(request_id, decision.status(), at)? {
            PatchOutcome::Applied(updated) => {
                log::info!("Access request {} {}", updated.id, updated.status);
                Ok(updated)
            }
            PatchOutcome::AlreadyDecided(_) => {
                Err(VaultError::RequestAlreadyDecided(request_id.to_string()))
            }
            PatchOutcome::NotFound => Err(VaultError::RequestNotFound(request_id.to_string())),
        }
    }

    /// Every request against the owner's files, newest first
    pub fn list(&self, owner_id: &str) -> VaultResult<Vec<AccessRequest>> {
        self.store.list_requests(owner_id)
    }

    /// Requests still waiting for the owner
    pub fn pending(&self, owner_id: &str) -> VaultResult<Vec<AccessRequest>> {
        Ok(self
            .store
            .list_requests(owner_id)?
            .into_iter()
            .filter(|r| r.status == AccessStatus::Pending)
            .collect())
    }
}
