//! # CloudVault
//!
//! Personal encrypted file vault with rotating keys and shareable
//! capability tokens.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       CLOUDVAULT                         │
//! │  ┌─────────────┐  ┌─────────────┐  ┌──────────────────┐  │
//! │  │ SEED CLOCK  │─▶│ KEY DERIVER │─▶│ ENVELOPE CODEC   │  │
//! │  │ epoch|sess. │  │ PBKDF2-SHA256│ │ AES-256-GCM      │  │
//! │  └──────┬──────┘  └─────────────┘  └──────────────────┘  │
//! │         │                                                │
//! │  ┌──────┴──────┐  ┌──────────────────────────────────┐   │
//! │  │ CAPABILITY  │─▶│ SHARED LISTING / ACCESS REQUESTS │   │
//! │  │ TOKEN       │  └──────────────────────────────────┘   │
//! │  └─────────────┘                                         │
//! │                                                          │
//! │  ┌──────────────────────────────────────────────────┐    │
//! │  │  STORAGE: MemoryStore | SqliteStore               │    │
//! │  └──────────────────────────────────────────────────┘    │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Model
//!
//! - Keys are derived on demand from the owner's seed and never stored
//! - Every file gets a fresh 96-bit nonce
//! - A rotated seed makes older files unreadable (`AuthenticationFailure`)
//! - Tokens locate a public listing; they are not decryption keys
//! - Keys, seeds and plaintext buffers are zeroized on drop

pub mod access;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod error;
pub mod record;
pub mod rotation;
pub mod seed;
pub mod storage;
pub mod token;
pub mod vault;

pub use access::{AccessRequest, AccessRequestWorkflow, AccessStatus, Decision};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::VaultConfig;
pub use crypto::{DecryptedContent, EncodedEnvelope, Envelope, KeyDeriver, VaultKey};
pub use error::{VaultError, VaultResult};
pub use record::{Classification, FileRecord, FileRecordPublicView};
pub use rotation::RotationStatus;
pub use seed::{Identity, RotationPolicy, SeedClock};
pub use storage::{MemoryStore, SqliteStore, VaultStore};
pub use token::Token;
pub use vault::{CloudVault, SharedListing};

/// CloudVault version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
