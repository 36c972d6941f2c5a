//! CloudVault - Configuration
//!
//! JSON file plus environment overrides. Every field has a default, so a
//! missing file is the same as `{}`.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::crypto::{
    KdfParams, KeyDeriver, DEFAULT_KDF_ITERATIONS, DEFAULT_KDF_SALT, MIN_KDF_ITERATIONS,
};
use crate::error::{VaultError, VaultResult};
use crate::seed::{RotationPolicy, SeedClock, DEFAULT_EPOCH_HOURS, DEFAULT_SESSION_SALT};

pub const ENV_ROTATION: &str = "CLOUDVAULT_ROTATION";
pub const ENV_DB: &str = "CLOUDVAULT_DB";
pub const ENV_KDF_ITERATIONS: &str = "CLOUDVAULT_KDF_ITERATIONS";

/// Vault configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// `epoch` or `session`
    pub rotation: RotationPolicy,
    /// Epoch length for the epoch policy
    pub epoch_hours: u32,
    /// Application-wide PBKDF2 salt
    pub kdf_salt: String,
    pub kdf_iterations: u32,
    /// Used when an identity has no session salt yet
    pub default_session_salt: String,
    /// SQLite database used by the CLI
    pub db_path: PathBuf,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            rotation: RotationPolicy::default(),
            epoch_hours: DEFAULT_EPOCH_HOURS,
            kdf_salt: DEFAULT_KDF_SALT.into(),
            kdf_iterations: DEFAULT_KDF_ITERATIONS,
            default_session_salt: DEFAULT_SESSION_SALT.into(),
            db_path: PathBuf::from("cloudvault.db"),
        }
    }
}

impl VaultConfig {
    /// Read `path` if it exists, apply environment overrides, validate
    pub fn load(path: Option<&Path>) -> VaultResult<Self> {
        let mut config = match path {
            Some(path) if path.exists() => {
                let data = fs::read(path)?;
                log::debug!("Loaded configuration from {}", path.display());
                serde_json::from_slice(&data)
                    .map_err(|e| VaultError::Config(format!("{}: {}", path.display(), e)))?
            }
            _ => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from `CLOUDVAULT_*` variables
    pub fn apply_env(&mut self) -> VaultResult<()> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> VaultResult<()> {
        if let Some(rotation) = lookup(ENV_ROTATION) {
            self.rotation = rotation.parse()?;
        }
        if let Some(db) = lookup(ENV_DB) {
            self.db_path = PathBuf::from(db);
        }
        if let Some(iterations) = lookup(ENV_KDF_ITERATIONS) {
            self.kdf_iterations = iterations.trim().parse().map_err(|_| {
                VaultError::Config(format!("{} is not a number", ENV_KDF_ITERATIONS))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> VaultResult<()> {
        if self.epoch_hours == 0 {
            return Err(VaultError::Config("epoch_hours must be at least 1".into()));
        }
        if self.kdf_iterations < MIN_KDF_ITERATIONS {
            return Err(VaultError::Config(format!(
                "kdf_iterations must be at least {}",
                MIN_KDF_ITERATIONS
            )));
        }
        if self.kdf_salt.is_empty() {
            return Err(VaultError::Config("kdf_salt is empty".into()));
        }
        if self.default_session_salt.is_empty() {
            return Err(VaultError::Config("default_session_salt is empty".into()));
        }
        Ok(())
    }

    pub fn seed_clock(&self) -> VaultResult<SeedClock> {
        SeedClock::new(self.rotation, self.epoch_hours, self.default_session_salt.clone())
    }

    pub fn key_deriver(&self) -> VaultResult<KeyDeriver> {
        KeyDeriver::new(KdfParams {
            salt: self.kdf_salt.clone(),
            iterations: self.kdf_iterations,
        })
        .map_err(|e| VaultError::Config(e.to_string()))
    }
}
