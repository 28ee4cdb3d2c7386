//! Secret store boundary
//!
//! Clinicore never persists secrets itself. Per-tenant encryption keys and
//! per-(tenant, role) access tokens live in an external secret store that
//! also acts as an encryption oracle. This module defines the contract
//! handlers use, [`SecretStore`], and two implementations:
//!
//! - [`VaultSecretStore`]: HashiCorp Vault over HTTP (transit + KV v2)
//! - [`MemorySecretStore`]: in-process AES-256-GCM, for development and tests
//!
//! Every tenant gets one transit key, `{tenant_id}-transit`, created at
//! provisioning and never exported. Every (tenant, role) pair gets a token
//! restricted by the role's [`Policy`].
//!
//! Failures are always surfaced. Nothing here retries on its own, and an
//! unreachable store never falls back to handling data unencrypted.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::Duration;

pub mod memory;
pub mod policy;
pub mod vault;

pub use memory::MemorySecretStore;
pub use policy::{policy_for, Capability, PathRule, Policy};
pub use vault::{VaultConfig, VaultSecretStore};

/// Default lifetime of issued role tokens
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Name of a tenant's transit key
pub fn transit_key_name(tenant_id: i64) -> String {
    format!("{tenant_id}-transit")
}

/// Secret store errors
#[derive(Debug, thiserror::Error)]
pub enum SecretStoreError {
    /// No token was provisioned for this tenant and role
    #[error("No token provisioned for role {role:?} of tenant {tenant_id}")]
    TokenNotFound { tenant_id: i64, role: String },

    /// Transport failure, timeout or server-side error
    #[error("Secret store unavailable: {0}")]
    Unavailable(String),

    /// The role has no access policy
    #[error("No access policy defined for role {0:?}")]
    UnknownRole(String),

    /// The role's token is not allowed to perform the operation
    #[error("Role {role:?} of tenant {tenant_id} may not {operation}")]
    Forbidden {
        tenant_id: i64,
        role: String,
        operation: &'static str,
    },

    /// The store refused the input, e.g. malformed or foreign ciphertext
    #[error("Secret store rejected the request: {0}")]
    Rejected(String),

    /// The store answered with something that could not be understood
    #[error("Unexpected secret store response: {0}")]
    InvalidResponse(String),
}

/// An opaque secret store token
///
/// `Debug` and `Display` never print the token, only a short SHA-256
/// fingerprint so that log lines can still be correlated.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretToken(String);

impl SecretToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token, for the `X-Vault-Token` header and nothing else
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// First 8 bytes of the token's SHA-256, hex encoded
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0.as_bytes());
        hex::encode(&digest[..8])
    }
}

impl fmt::Debug for SecretToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretToken(sha256:{})", self.fingerprint())
    }
}

impl fmt::Display for SecretToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha256:{}", self.fingerprint())
    }
}

/// A role token handed out for one call chain
#[derive(Debug, Clone)]
pub struct TenantSecretToken {
    pub tenant_id: i64,
    pub role: String,
    pub token: SecretToken,
    pub ttl: Duration,
}

/// Result of registering a tenant with the store
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct TenantRegistration {
    pub tenant_id: i64,
    pub transit_key: String,
    /// Roles that received a policy and a token, in registration order
    pub roles: Vec<String>,
}

/// Contract between handlers and the secret store
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Token provisioned for `role` of `tenant_id`
    ///
    /// # Errors
    ///
    /// `TokenNotFound` if the pair was never registered.
    async fn get_token(&self, tenant_id: i64, role: &str)
        -> Result<TenantSecretToken, SecretStoreError>;

    /// Encrypts `plaintext` with the tenant's transit key using the role's token
    ///
    /// The ciphertext is opaque and safe to store as text.
    async fn encrypt(
        &self,
        tenant_id: i64,
        role: &str,
        plaintext: &[u8],
    ) -> Result<String, SecretStoreError>;

    /// Decrypts ciphertext produced by [`SecretStore::encrypt`]
    async fn decrypt(
        &self,
        tenant_id: i64,
        role: &str,
        ciphertext: &str,
    ) -> Result<Vec<u8>, SecretStoreError>;

    /// Creates the transit key, then a policy and a stored token per role
    ///
    /// Every role is checked for a policy before anything is created, so an
    /// `UnknownRole` error leaves the store untouched. Registering the same
    /// tenant twice reuses the existing key and replaces the tokens.
    async fn register_tenant(
        &self,
        tenant_id: i64,
        roles: &[String],
    ) -> Result<TenantRegistration, SecretStoreError>;

    /// Starts a new version of the tenant's transit key
    ///
    /// Existing ciphertext remains decryptable.
    async fn rotate_transit_key(&self, tenant_id: i64) -> Result<(), SecretStoreError>;
}

/// Checks that every role has a policy before any side effect happens
pub(crate) fn policies_for(
    tenant_id: i64,
    roles: &[String],
) -> Result<Vec<Policy>, SecretStoreError> {
    roles.iter().map(|role| policy_for(tenant_id, role)).collect()
}

/// Parses TTLs written the way Vault writes them: `90s`, `30m`, `24h`, `7d`
///
/// A bare number is seconds.
pub fn parse_ttl(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    let (digits, unit) = match raw.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => raw.split_at(idx),
        None => (raw, "s"),
    };

    let value: u64 = digits.parse().ok()?;
    let seconds = match unit {
        "s" => value,
        "m" => value.checked_mul(60)?,
        "h" => value.checked_mul(60 * 60)?,
        "d" => value.checked_mul(24 * 60 * 60)?,
        _ => return None,
    };

    Some(Duration::from_secs(seconds))
}

/// Vault's textual form of a TTL, in whole seconds
pub fn format_ttl(ttl: Duration) -> String {
    format!("{}s", ttl.as_secs())
}
