//! CloudVault - Capability Token
//!
//! The 8-character key users copy and paste. It is a 32-bit rolling hash of
//! the current seed:
//!
//! ```text
//! h = 0
//! for each UTF-16 unit u of seed:  h = (h << 5) - h + u   (wrapping i32)
//! token = upper_hex(|h|), left-padded with '0' to 8 chars
//! ```
//!
//! The hash is not cryptographic and the space is only 32 bits, so distinct
//! seeds can collide. That is a deliberately low-security choice for a
//! human-copyable credential, kept as is. A hardened variant would use a keyed
//! MAC truncated to a safe length behind rate limiting.
//!
//! A token never feeds key derivation. It locates an identity's public file
//! listing; decryption still needs the seed, which a token holder cannot
//! reconstruct.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{VaultError, VaultResult};
use crate::seed::{Identity, SeedClock};

/// Rendered token width
pub const TOKEN_LEN: usize = 8;

/// Normalized capability token: exactly 8 uppercase hex characters
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Token(String);

impl Token {
    /// Render the token for a seed string
    pub fn render(seed: &str) -> Self {
        Token(format!("{:0width$X}", rolling_hash(seed).unsigned_abs(), width = TOKEN_LEN))
    }

    /// Accept user input: surrounding whitespace ignored, case-insensitive,
    /// 1 to 8 hex digits (shorter input is zero-padded on the left).
    ///
    /// Anything else is `CapabilityNotFound`; the caller learns nothing more.
    pub fn parse(input: &str) -> VaultResult<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty()
            || trimmed.len() > TOKEN_LEN
            || !trimmed.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(VaultError::CapabilityNotFound);
        }
        Ok(Token(format!(
            "{:0>width$}",
            trimmed.to_ascii_uppercase(),
            width = TOKEN_LEN
        )))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Token {
    type Error = VaultError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Token::parse(&value)
    }
}

impl From<Token> for String {
    fn from(token: Token) -> Self {
        token.0
    }
}

/// 32-bit multiply-shift accumulation over UTF-16 code units
pub fn rolling_hash(seed: &str) -> i32 {
    seed.encode_utf16().fold(0i32, |hash, unit| {
        hash.wrapping_shl(5).wrapping_sub(hash).wrapping_add(unit as i32)
    })
}

/// Token an identity would show right now
pub fn current_token(
    identity: &Identity,
    seeds: &SeedClock,
    now: DateTime<Utc>,
) -> VaultResult<Token> {
    let seed = seeds.seed(identity, now)?;
    Ok(Token::render(seed.as_str()))
}

/// Find the identity whose current token equals `token`.
///
/// Every candidate is evaluated even after a match so the work done does not
/// depend on where the owner sits in the list. Failure carries no detail.
pub fn resolve<'a>(
    token: &Token,
    candidates: &'a [Identity],
    seeds: &SeedClock,
    now: DateTime<Utc>,
) -> VaultResult<&'a Identity> {
    let mut found = None;
    for identity in candidates {
        let Ok(candidate) = current_token(identity, seeds, now) else {
            continue;
        };
        if found.is_none() && candidate == *token {
            found = Some(identity);
        }
    }
    found.ok_or(VaultError::CapabilityNotFound)
}
