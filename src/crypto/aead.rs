//! CloudVault - AEAD Envelope
//!
//! AES-256-GCM, single shot. The nonce is not secret and travels next to the
//! ciphertext; storage keeps each half as its own base64 string.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::keys::{generate_nonce, VaultKey, NONCE_LEN, TAG_LEN};
use crate::error::{VaultError, VaultResult};

/// Ciphertext (tag included) plus the nonce it was sealed with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Ciphertext with the 16-byte authentication tag appended
    pub ciphertext: Vec<u8>,
    /// 96-bit nonce, fresh per encryption
    pub nonce: [u8; NONCE_LEN],
}

impl Envelope {
    /// Length of the plaintext this envelope carries
    pub fn plaintext_len(&self) -> usize {
        self.ciphertext.len().saturating_sub(TAG_LEN)
    }

    /// Transport form
    pub fn encode(&self) -> EncodedEnvelope {
        EncodedEnvelope {
            cipher_content: STANDARD.encode(&self.ciphertext),
            iv: STANDARD.encode(self.nonce),
        }
    }
}

/// Storage/transport form: two independent base64 fields, never concatenated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedEnvelope {
    #[serde(rename = "cipherContent")]
    pub cipher_content: String,
    pub iv: String,
}

impl EncodedEnvelope {
    /// Decode both halves back into raw bytes
    pub fn decode(&self) -> VaultResult<Envelope> {
        let ciphertext = STANDARD.decode(self.cipher_content.as_bytes())?;
        let nonce_bytes = STANDARD.decode(self.iv.as_bytes())?;

        let nonce: [u8; NONCE_LEN] = nonce_bytes.as_slice().try_into().map_err(|_| {
            VaultError::MalformedEnvelope(format!(
                "nonce must be {} bytes, got {}",
                NONCE_LEN,
                nonce_bytes.len()
            ))
        })?;

        if ciphertext.len() < TAG_LEN {
            return Err(VaultError::MalformedEnvelope("ciphertext shorter than tag".into()));
        }

        Ok(Envelope { ciphertext, nonce })
    }
}

/// Decrypted bytes tagged with the media type the caller expects.
/// The buffer is wiped when dropped.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DecryptedContent {
    data: Vec<u8>,
    media_type: String,
}

impl DecryptedContent {
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    /// Take ownership of the plaintext; wiping becomes the caller's job
    pub fn into_bytes(mut self) -> Vec<u8> {
        std::mem::take(&mut self.data)
    }
}

impl std::fmt::Debug for DecryptedContent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecryptedContent")
            .field("len", &self.data.len())
            .field("media_type", &self.media_type)
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// AES-256-GCM
// ═══════════════════════════════════════════════════════════════════════════

/// Encrypt content under `key` with a fresh random nonce
pub fn encrypt(content: &[u8], key: &VaultKey) -> VaultResult<Envelope> {
    let cipher = Aes256Gcm::new_from_slice(key.expose())
        .map_err(|e| VaultError::EncryptionFailed(e.to_string()))?;

    let nonce = generate_nonce();

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), content)
        .map_err(|e| VaultError::EncryptionFailed(e.to_string()))?;

    Ok(Envelope { ciphertext, nonce })
}

/// Verify and decrypt; any tag mismatch is `AuthenticationFailure`
pub fn decrypt(
    envelope: &Envelope,
    key: &VaultKey,
    expected_media_type: &str,
) -> VaultResult<DecryptedContent> {
    let cipher = Aes256Gcm::new_from_slice(key.expose())
        .map_err(|e| VaultError::KeyDerivation(e.to_string()))?;

    let data = cipher
        .decrypt(Nonce::from_slice(&envelope.nonce), envelope.ciphertext.as_slice())
        .map_err(|_| VaultError::AuthenticationFailure)?;

    Ok(DecryptedContent {
        data,
        media_type: expected_media_type.to_string(),
    })
}
