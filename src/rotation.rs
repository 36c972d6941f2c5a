//! CloudVault - Key Rotation
//!
//! Nothing here runs on a timer. Rotation is implicit in the seed: under the
//! epoch policy every key changes when the epoch index ticks over, under the
//! session policy it changes when a new session salt is written at login.
//! This module answers "what is my key right now and how long does it last"
//! and produces new session salts.

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;
use serde::Serialize;

use crate::error::VaultResult;
use crate::seed::{EpochWindow, Identity, RotationPolicy, SeedClock};
use crate::token::{current_token, Token};

/// Length of a generated session salt
pub const SESSION_SALT_LEN: usize = 16;

/// Fresh random session salt
pub fn generate_session_salt() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(SESSION_SALT_LEN)
        .map(char::from)
        .collect()
}

/// Rotation status for display
#[derive(Debug, Clone, Serialize)]
pub struct RotationStatus {
    pub policy: RotationPolicy,
    /// Current capability token
    pub token: Token,
    /// Current epoch; `None` under the session policy
    pub epoch: Option<EpochWindow>,
    /// When the token and key stop working; `None` until the next login
    pub valid_until: Option<DateTime<Utc>>,
    pub seconds_remaining: Option<i64>,
}

impl RotationStatus {
    /// Status of `identity` at `now`
    pub fn compute(
        identity: &Identity,
        seeds: &SeedClock,
        now: DateTime<Utc>,
    ) -> VaultResult<Self> {
        let token = current_token(identity, seeds, now)?;

        let epoch = match seeds.policy() {
            RotationPolicy::Epoch => Some(seeds.epoch_window(seeds.epoch_index(now))?),
            RotationPolicy::Session => None,
        };
        let valid_until = epoch.map(|w| w.ends_at);

        Ok(Self {
            policy: seeds.policy(),
            token,
            epoch,
            valid_until,
            seconds_remaining: valid_until.map(|end| (end - now).num_seconds()),
        })
    }

    /// Whether this status still describes the key in effect at `at`
    pub fn is_current(&self, at: DateTime<Utc>) -> bool {
        match self.epoch {
            Some(window) => window.starts_at <= at && at < window.ends_at,
            None => true,
        }
    }
}
