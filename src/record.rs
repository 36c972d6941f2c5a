//! CloudVault - File Records
//!
//! Metadata the storage collaborator keeps per file. The core fills in the
//! envelope and media type and never interprets the rest.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::EncodedEnvelope;
use crate::error::{VaultError, VaultResult};

/// Category reported by the content classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Category {
    Legal,
    Financial,
    Technical,
    Multimedia,
    #[default]
    Other,
}

/// Risk level reported by the content classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
}

/// Classifier output. Optional side-channel; encryption never looks at it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    pub category: Category,
    pub risk_level: RiskLevel,
    pub verdict: String,
}

impl Classification {
    /// What a record carries when the classifier could not be reached
    pub fn unavailable() -> Self {
        Self {
            category: Category::Other,
            risk_level: RiskLevel::Low,
            verdict: "Security scan unavailable.".into(),
        }
    }
}

/// Stored file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    /// Plaintext size in bytes
    pub size: u64,
    #[serde(rename = "type")]
    pub media_type: String,
    pub uploaded_at: DateTime<Utc>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_public")]
    pub is_public: bool,
    #[serde(default)]
    pub classification: Option<Classification>,
    /// Base64 ciphertext. Both envelope halves are absent on records uploaded
    /// before encryption existed; exactly one present means corruption.
    #[serde(default, rename = "cipherContent", skip_serializing_if = "Option::is_none")]
    pub cipher_content: Option<String>,
    /// Base64 nonce
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iv: Option<String>,
}

fn default_public() -> bool {
    true
}

impl FileRecord {
    /// New record with a fresh id
    pub fn new(
        owner_id: impl Into<String>,
        name: impl Into<String>,
        media_type: impl Into<String>,
        size: u64,
        uploaded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.into(),
            name: name.into(),
            size,
            media_type: media_type.into(),
            uploaded_at,
            url: None,
            is_public: true,
            classification: None,
            cipher_content: None,
            iv: None,
        }
    }

    pub fn with_envelope(mut self, envelope: EncodedEnvelope) -> Self {
        self.cipher_content = Some(envelope.cipher_content);
        self.iv = Some(envelope.iv);
        self
    }

    pub fn with_classification(mut self, classification: Classification) -> Self {
        self.classification = Some(classification);
        self
    }

    /// Stored envelope. `MissingEnvelope` when neither half is present,
    /// `MalformedEnvelope` when only one is.
    pub fn envelope(&self) -> VaultResult<EncodedEnvelope> {
        match (&self.cipher_content, &self.iv) {
            (Some(cipher_content), Some(iv)) => Ok(EncodedEnvelope {
                cipher_content: cipher_content.clone(),
                iv: iv.clone(),
            }),
            (None, None) => Err(VaultError::MissingEnvelope(self.id.clone())),
            (Some(_), None) => Err(VaultError::MalformedEnvelope(format!(
                "record {} has ciphertext but no nonce",
                self.id
            ))),
            (None, Some(_)) => Err(VaultError::MalformedEnvelope(format!(
                "record {} has a nonce but no ciphertext",
                self.id
            ))),
        }
    }

    pub fn is_encrypted(&self) -> bool {
        self.cipher_content.is_some() && self.iv.is_some()
    }

    pub fn public_view(&self) -> FileRecordPublicView {
        FileRecordPublicView {
            id: self.id.clone(),
            name: self.name.clone(),
            size: self.size,
            media_type: self.media_type.clone(),
            uploaded_at: self.uploaded_at,
            url: self.url.clone(),
            classification: self.classification.clone(),
        }
    }
}

/// What a token holder sees: no owner id, no envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecordPublicView {
    pub id: String,
    pub name: String,
    pub size: u64,
    #[serde(rename = "type")]
    pub media_type: String,
    pub uploaded_at: DateTime<Utc>,
    pub url: Option<String>,
    pub classification: Option<Classification>,
}

/// Human-readable byte count, 1024-based
pub fn format_bytes(bytes: u64, decimals: usize) -> String {
    const UNITS: [&str; 5] = ["Bytes", "KB", "MB", "GB", "TB"];
    if bytes == 0 {
        return "0 Bytes".into();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let rendered = format!("{:.*}", decimals, value);
    let rendered = if rendered.contains('.') {
        rendered.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        rendered
    };
    format!("{} {}", rendered, UNITS[unit])
}
