//! CloudVault - Error Types

use thiserror::Error;

/// Result type for vault operations
pub type VaultResult<T> = Result<T, VaultError>;

/// Vault error types
#[derive(Error, Debug)]
pub enum VaultError {
    // ═══════════════════════════════════════════════════════════════
    // CRYPTO ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Decryption failed - your key may have rotated since this file was uploaded")]
    AuthenticationFailure,

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("File was not uploaded using the secure encryption protocol: {0}")]
    MissingEnvelope(String),

    // ═══════════════════════════════════════════════════════════════
    // CAPABILITY / WORKFLOW ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("No files found for this key or key has expired")]
    CapabilityNotFound,

    #[error("Only the vault owner may decide on this request")]
    Unauthorized,

    #[error("Access request already decided: {0}")]
    RequestAlreadyDecided(String),

    #[error("Access request not found: {0}")]
    RequestNotFound(String),

    // ═══════════════════════════════════════════════════════════════
    // STORAGE ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Identity not found: {0}")]
    IdentityNotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    // ═══════════════════════════════════════════════════════════════
    // CONFIG / SERIALIZATION ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl VaultError {
    /// Check if this is a security-critical error
    pub fn is_security_critical(&self) -> bool {
        matches!(
            self,
            VaultError::AuthenticationFailure
                | VaultError::KeyDerivation(_)
                | VaultError::Unauthorized
        )
    }

    /// Check if retrying with the same inputs could ever succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, VaultError::Storage(_) | VaultError::IoError(_))
    }

    /// Message safe to show to the person at the keyboard.
    ///
    /// Capability and authentication failures never carry internal detail.
    pub fn user_message(&self) -> String {
        match self {
            VaultError::CapabilityNotFound => "Invalid key.".into(),
            VaultError::AuthenticationFailure => "Decryption failed. Your Master Key may have \
                                                  changed since this file was uploaded."
                .into(),
            VaultError::MissingEnvelope(_) => {
                "This file was not uploaded using the secure encryption protocol.".into()
            }
            VaultError::Unauthorized => "You are not allowed to change this request.".into(),
            VaultError::Storage(_) | VaultError::IoError(_) => {
                "Storage is unavailable, nothing was saved.".into()
            }
            other => other.to_string(),
        }
    }
}

impl From<rusqlite::Error> for VaultError {
    fn from(e: rusqlite::Error) -> Self {
        VaultError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(e: serde_json::Error) -> Self {
        VaultError::SerializationError(e.to_string())
    }
}

impl From<base64::DecodeError> for VaultError {
    fn from(e: base64::DecodeError) -> Self {
        VaultError::MalformedEnvelope(e.to_string())
    }
}
