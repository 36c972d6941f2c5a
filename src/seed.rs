//! CloudVault - Seed Clock
//!
//! Builds the low-entropy seed string that everything else is derived from.
//! Two rotation policies exist and are picked by configuration:
//!
//! - `epoch`: `id ++ floor(now / epoch_length)`, rotates for everyone every
//!   epoch (4 hours by default).
//! - `session`: `id ++ session_salt`, rotates when a new salt is set at login.
//!
//! Both are pure functions of their inputs.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{VaultError, VaultResult};

/// Salt used by identities that never established a session salt
pub const DEFAULT_SESSION_SALT: &str = "cloudvault-legacy";

/// Default epoch length for the epoch policy
pub const DEFAULT_EPOCH_HOURS: u32 = 4;

/// Account as seen by the core. Owned by the identity collaborator.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Stable account id
    pub id: String,
    /// Display name shown to token holders
    #[serde(default)]
    pub username: Option<String>,
    /// Per-session secret established at login
    #[serde(default)]
    pub session_salt: Option<String>,
}

impl Identity {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: None,
            session_salt: None,
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_session_salt(mut self, salt: impl Into<String>) -> Self {
        self.session_salt = Some(salt.into());
        self
    }

    /// Name to show in the shared view
    pub fn display_name(&self) -> &str {
        self.username.as_deref().unwrap_or("Unknown")
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("session_salt", &self.session_salt.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Key rotation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RotationPolicy {
    /// Wall-clock epochs
    Epoch,
    /// Login session salt
    #[default]
    Session,
}

impl RotationPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Epoch => "epoch",
            Self::Session => "session",
        }
    }
}

impl FromStr for RotationPolicy {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "epoch" => Ok(Self::Epoch),
            "session" => Ok(Self::Session),
            other => Err(VaultError::Config(format!("unknown rotation policy '{}'", other))),
        }
    }
}

impl fmt::Display for RotationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Seed string; wiped on drop and never printed
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Seed(String);

impl Seed {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Seed([REDACTED])")
    }
}

/// One epoch window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EpochWindow {
    pub index: i64,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

/// Seed derivation under one rotation policy
#[derive(Debug, Clone)]
pub struct SeedClock {
    policy: RotationPolicy,
    epoch_length: Duration,
    default_salt: String,
}

impl Default for SeedClock {
    fn default() -> Self {
        Self {
            policy: RotationPolicy::default(),
            epoch_length: Duration::hours(DEFAULT_EPOCH_HOURS as i64),
            default_salt: DEFAULT_SESSION_SALT.into(),
        }
    }
}

impl SeedClock {
    pub fn new(
        policy: RotationPolicy,
        epoch_hours: u32,
        default_salt: impl Into<String>,
    ) -> VaultResult<Self> {
        if epoch_hours == 0 {
            return Err(VaultError::Config("epoch length must be at least one hour".into()));
        }
        let default_salt = default_salt.into();
        if default_salt.is_empty() {
            return Err(VaultError::Config("default session salt is empty".into()));
        }
        Ok(Self {
            policy,
            epoch_length: Duration::hours(epoch_hours as i64),
            default_salt,
        })
    }

    pub fn epoch(epoch_hours: u32) -> VaultResult<Self> {
        Self::new(RotationPolicy::Epoch, epoch_hours, DEFAULT_SESSION_SALT)
    }

    pub fn session() -> Self {
        Self::default()
    }

    pub fn policy(&self) -> RotationPolicy {
        self.policy
    }

    pub fn epoch_length(&self) -> Duration {
        self.epoch_length
    }

    /// floor(now / epoch_length)
    pub fn epoch_index(&self, now: DateTime<Utc>) -> i64 {
        now.timestamp_millis().div_euclid(self.epoch_length.num_milliseconds())
    }

    /// Bounds of epoch `index`
    pub fn epoch_window(&self, index: i64) -> VaultResult<EpochWindow> {
        let length_ms = self.epoch_length.num_milliseconds();
        let starts_at = index
            .checked_mul(length_ms)
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .ok_or_else(|| VaultError::Config(format!("epoch {} is out of range", index)))?;
        Ok(EpochWindow {
            index,
            starts_at,
            ends_at: starts_at + self.epoch_length,
        })
    }

    /// Seed for `identity` at `now` under the configured policy
    pub fn seed(&self, identity: &Identity, now: DateTime<Utc>) -> VaultResult<Seed> {
        if identity.id.is_empty() {
            return Err(VaultError::KeyDerivation("identity id is empty".into()));
        }
        Ok(match self.policy {
            RotationPolicy::Epoch => Self::epoch_seed(&identity.id, self.epoch_index(now)),
            RotationPolicy::Session => {
                self.session_seed(&identity.id, identity.session_salt.as_deref())
            }
        })
    }

    /// `id ++ decimal(epoch_index)`
    pub fn epoch_seed(identity_id: &str, epoch_index: i64) -> Seed {
        Seed(format!("{}{}", identity_id, epoch_index))
    }

    /// `id ++ salt`; an absent or empty salt falls back to the default
    pub fn session_seed(&self, identity_id: &str, session_salt: Option<&str>) -> Seed {
        let salt = session_salt
            .filter(|s| !s.is_empty())
            .unwrap_or(self.default_salt.as_str());
        Seed(format!("{}{}", identity_id, salt))
    }
}
