// src/core/auth.rs

//! Shared-token authentication.
//!
//! Two secrets exist per process: the relay token that admits ordinary members
//! and the operator token that additionally grants administrative commands.

use super::errors::RelayError;
use std::io::{self, Write};

/// The prefix clients may put in front of the token they paste.
pub const TOKEN_PREFIX: &str = "Token:";

/// Number of random bytes behind a generated token (hex-encoded to 32 characters).
pub const TOKEN_BYTES: usize = 16;

/// The privilege level a connection authenticated with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientRole {
    Member,
    Operator,
}

/// Generates a fresh random token: 16 bytes from the OS, hex-encoded.
pub fn generate_token() -> Result<String, RelayError> {
    let mut bytes = [0u8; TOKEN_BYTES];
    getrandom::fill(&mut bytes)?;
    Ok(hex::encode(bytes))
}

/// Extracts the token from the raw handshake read, tolerating surrounding
/// whitespace and an optional `Token:` prefix.
pub fn extract_token(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    let trimmed = text.trim();
    trimmed
        .strip_prefix(TOKEN_PREFIX)
        .unwrap_or(trimmed)
        .trim()
        .to_string()
}

/// Holds the process-lifetime secrets and checks candidates against them.
#[derive(Debug, Clone)]
pub struct TokenAuthenticator {
    relay_token: String,
    operator_token: String,
}

impl TokenAuthenticator {
    pub fn new(relay_token: String, operator_token: String) -> Self {
        Self {
            relay_token,
            operator_token,
        }
    }

    /// Generates the relay token and, unless one is configured, the operator token.
    pub fn generate(operator_token: Option<String>) -> Result<Self, RelayError> {
        let relay_token = generate_token()?;
        let operator_token = match operator_token {
            Some(token) => token,
            None => generate_token()?,
        };
        Ok(Self::new(relay_token, operator_token))
    }

    pub fn relay_token(&self) -> &str {
        &self.relay_token
    }

    pub fn operator_token(&self) -> &str {
        &self.operator_token
    }

    /// Writes the tokens to hand out as `Token: <hex>` lines. The operator token
    /// is only written when it was generated, never when it came from configuration.
    pub fn announce<W: Write>(&self, out: &mut W, include_operator: bool) -> io::Result<()> {
        writeln!(out, "{} {}", TOKEN_PREFIX, self.relay_token)?;
        if include_operator {
            writeln!(out, "Operator token: {}", self.operator_token)?;
        }
        out.flush()
    }

    /// Returns the role granted by `candidate`, or `None` if it matches neither secret.
    pub fn verify(&self, candidate: &str) -> Option<ClientRole> {
        if candidate.is_empty() {
            return None;
        }
        if candidate == self.operator_token {
            Some(ClientRole::Operator)
        } else if candidate == self.relay_token {
            Some(ClientRole::Member)
        } else {
            None
        }
    }
}
