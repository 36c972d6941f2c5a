//! CloudVault - Cryptographic Core
//!
//! One fixed suite: PBKDF2-HMAC-SHA256 key stretching, AES-256-GCM envelopes.

pub mod keys;
pub mod kdf;
pub mod aead;

pub use keys::*;
pub use kdf::*;
pub use aead::*;
