//! CloudVault - Seed Stretching
//!
//! PBKDF2-HMAC-SHA256 over the seed string with a fixed application salt.
//! Decryption relies on re-deriving the exact same key later, so nothing
//! here may depend on randomness or hidden state.

use hmac::Hmac;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

use super::keys::{VaultKey, KEY_LEN};
use crate::error::{VaultError, VaultResult};

/// Application-wide PBKDF2 salt
pub const DEFAULT_KDF_SALT: &str = "cloudvault-salt";

/// Iteration count used by every existing envelope
pub const DEFAULT_KDF_ITERATIONS: u32 = 100_000;

/// Lowest iteration count accepted from configuration
pub const MIN_KDF_ITERATIONS: u32 = 100_000;

/// PBKDF2 parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Salt shared by every identity
    pub salt: String,
    /// HMAC iterations
    pub iterations: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            salt: DEFAULT_KDF_SALT.into(),
            iterations: DEFAULT_KDF_ITERATIONS,
        }
    }
}

impl KdfParams {
    /// Reject parameters that would produce a weak or non-interoperable key
    pub fn validate(&self) -> VaultResult<()> {
        if self.salt.is_empty() {
            return Err(VaultError::KeyDerivation("KDF salt is empty".into()));
        }
        if self.iterations < MIN_KDF_ITERATIONS {
            return Err(VaultError::KeyDerivation(format!(
                "iteration count {} is below the minimum of {}",
                self.iterations, MIN_KDF_ITERATIONS
            )));
        }
        Ok(())
    }
}

/// Stretches seeds into AES-256 keys
#[derive(Debug, Clone, Default)]
pub struct KeyDeriver {
    params: KdfParams,
}

impl KeyDeriver {
    /// Build a deriver, validating the parameters up front
    pub fn new(params: KdfParams) -> VaultResult<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    /// Current parameters
    pub fn params(&self) -> &KdfParams {
        &self.params
    }

    /// Derive the 256-bit key for a seed
    pub fn derive_key(&self, seed: &str) -> VaultResult<VaultKey> {
        if seed.is_empty() {
            return Err(VaultError::KeyDerivation("seed is empty".into()));
        }
        self.params.validate()?;

        let mut okm = Zeroizing::new([0u8; KEY_LEN]);
        pbkdf2::pbkdf2::<Hmac<Sha256>>(
            seed.as_bytes(),
            self.params.salt.as_bytes(),
            self.params.iterations,
            &mut okm[..],
        )
        .map_err(|e| VaultError::KeyDerivation(e.to_string()))?;

        Ok(VaultKey::new(*okm))
    }
}

/// Derive a key with the default application parameters
pub fn derive_key(seed: &str) -> VaultResult<VaultKey> {
    KeyDeriver::default().derive_key(seed)
}
