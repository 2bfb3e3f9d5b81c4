//! Identity and credential tokens.
//!
//! An [`Identity`] uniquely names one agent within a platform instance for
//! the lifetime of its connection; the name becomes reusable after a clean
//! disconnect. A [`Credential`] is the opaque public-key token an agent
//! presents during the `hello` handshake; the transport layer is assumed to
//! have proven possession of the matching secret before frames reach the
//! router.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Maximum byte length of an identity or credential token.
pub const MAX_TOKEN_LEN: usize = 255;

/// Errors produced while validating identity or credential tokens.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    /// Token was empty or all whitespace.
    #[error("identity token is empty")]
    Empty,
    /// Token exceeded [`MAX_TOKEN_LEN`] bytes.
    #[error("identity token exceeds {MAX_TOKEN_LEN} bytes")]
    TooLong,
    /// Token contained ASCII control characters.
    #[error("identity token contains control characters")]
    ControlCharacters,
}

fn validate_token(token: &str) -> Result<(), IdentityError> {
    if token.trim().is_empty() {
        return Err(IdentityError::Empty);
    }
    if token.len() > MAX_TOKEN_LEN {
        return Err(IdentityError::TooLong);
    }
    if token.chars().any(|c| c.is_control()) {
        return Err(IdentityError::ControlCharacters);
    }
    Ok(())
}

/// Unique name of one agent within a platform instance.
///
/// Immutable once constructed. Uniqueness among concurrently connected
/// agents is enforced by the routing table, not here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Validate and wrap an identity token.
    pub fn new(token: impl Into<String>) -> Result<Self, IdentityError> {
        let token = token.into();
        validate_token(&token)?;
        Ok(Self(token))
    }

    /// The raw token.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Opaque public-key credential token presented at handshake.
///
/// The router treats this as a lookup key into the credential store; it is
/// never logged in full.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    /// Validate and wrap a credential token.
    pub fn new(token: impl Into<String>) -> Result<Self, IdentityError> {
        let token = token.into();
        validate_token(&token)?;
        Ok(Self(token))
    }

    /// The raw token.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form safe for log lines (first 8 characters).
    #[must_use]
    pub fn redacted(&self) -> String {
        let head: String = self.0.chars().take(8).collect();
        format!("{head}…")
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Credentials are secrets-adjacent; Display is the redacted form.
        f.write_str(&self.redacted())
    }
}

/// Transient id of one live transport connection.
///
/// Regenerated on every accept; never reused, unlike [`Identity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generate a fresh connection id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::generate()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
