//! CloudVault - Key Material
//!
//! The 256-bit content key and the nonce source. Keys are never persisted;
//! they live for one encrypt/decrypt call and are wiped on drop.

use std::fmt;

use rand::rngs::OsRng;
use rand::RngCore;
use secrecy::{ExposeSecret, Secret};

/// Key length for AES-256
pub const KEY_LEN: usize = 32;

/// Nonce length for AES-GCM (96 bits)
pub const NONCE_LEN: usize = 12;

/// GCM authentication tag appended to every ciphertext
pub const TAG_LEN: usize = 16;

/// Secure key wrapper; the inner `Secret` zeroizes on drop
pub struct VaultKey {
    inner: Secret<[u8; KEY_LEN]>,
}

impl VaultKey {
    /// Create a new vault key from bytes
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self {
            inner: Secret::new(bytes),
        }
    }

    /// Expose the key bytes (use with caution)
    pub fn expose(&self) -> &[u8; KEY_LEN] {
        self.inner.expose_secret()
    }

    /// Generate a random key
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self::new(bytes)
    }
}

impl fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("VaultKey([REDACTED])")
    }
}

impl PartialEq for VaultKey {
    fn eq(&self, other: &Self) -> bool {
        // Not constant-time
        self.expose() == other.expose()
    }
}

impl Eq for VaultKey {}

/// Fresh random nonce for AES-GCM, drawn from the OS CSPRNG
pub fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    nonce
}
