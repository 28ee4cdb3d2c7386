//! HashiCorp Vault implementation of [`SecretStore`]
//!
//! Uses the HTTP API directly:
//!
//! | Operation | Endpoint |
//! |---|---|
//! | create transit key | `POST /v1/transit/keys/{tenant}-transit` |
//! | rotate transit key | `POST /v1/transit/keys/{tenant}-transit/rotate` |
//! | write policy | `PUT /v1/sys/policies/acl/{role}-policy-{tenant}` |
//! | issue token | `POST /v1/auth/token/create` |
//! | store / read token | `/v1/kv/data/tenants/{tenant}/tokens/{role}` |
//! | encrypt / decrypt | `POST /v1/transit/{encrypt,decrypt}/{tenant}-transit` |
//!
//! Administrative calls use the configured management token; encrypt and
//! decrypt use the role token read from KV, so the role's policy is what
//! Vault enforces.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::policy::{policy_for, Policy};
use super::{
    format_ttl, policies_for, transit_key_name, SecretStore, SecretStoreError, SecretToken,
    TenantRegistration, TenantSecretToken, DEFAULT_TOKEN_TTL,
};

/// Connection settings for Vault
#[derive(Clone)]
pub struct VaultConfig {
    /// Base address, e.g. `https://vault.internal:8200`
    pub addr: String,

    /// Management token used for keys, policies and token issuance
    pub token: SecretToken,

    /// Per-request timeout
    pub timeout: Duration,

    /// Lifetime of issued role tokens
    pub token_ttl: Duration,

    /// KV v2 mount holding the role tokens
    pub kv_mount: String,
}

impl VaultConfig {
    pub fn new(addr: impl Into<String>, token: SecretToken) -> Self {
        Self {
            addr: addr.into(),
            token,
            timeout: Duration::from_secs(10),
            token_ttl: DEFAULT_TOKEN_TTL,
            kv_mount: "kv".to_string(),
        }
    }
}

impl std::fmt::Debug for VaultConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultConfig")
            .field("addr", &self.addr)
            .field("token", &self.token)
            .field("timeout", &self.timeout)
            .field("token_ttl", &self.token_ttl)
            .field("kv_mount", &self.kv_mount)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct KvData {
    data: StoredToken,
}

#[derive(Debug, Deserialize)]
struct StoredToken {
    token: String,
    #[serde(default)]
    ttl_seconds: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TokenCreate {
    auth: TokenAuth,
}

#[derive(Debug, Deserialize)]
struct TokenAuth {
    client_token: String,
}

#[derive(Debug, Deserialize)]
struct Ciphertext {
    ciphertext: String,
}

#[derive(Debug, Deserialize)]
struct Plaintext {
    plaintext: String,
}

/// Vault client
#[derive(Debug, Clone)]
pub struct VaultSecretStore {
    http: reqwest::Client,
    config: VaultConfig,
}

impl VaultSecretStore {
    /// Builds the client
    ///
    /// # Errors
    ///
    /// `Unavailable` if the HTTP client cannot be constructed.
    pub fn new(config: VaultConfig) -> Result<Self, SecretStoreError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SecretStoreError::Unavailable(format!("HTTP client: {e}")))?;

        Ok(Self { http, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.config.addr.trim_end_matches('/'), path)
    }

    /// KV path of a role token; only roles with a policy get a path
    fn kv_token_path(&self, tenant_id: i64, role: &str) -> Result<String, SecretStoreError> {
        policy_for(tenant_id, role)?;
        Ok(format!(
            "{}/data/tenants/{}/tokens/{}",
            self.config.kv_mount, tenant_id, role
        ))
    }

    /// Sends one request; transport failures become `Unavailable`
    async fn send(
        &self,
        method: Method,
        path: &str,
        token: &SecretToken,
        body: Option<JsonValue>,
    ) -> Result<reqwest::Response, SecretStoreError> {
        let mut request = self
            .http
            .request(method, self.url(path))
            .header("X-Vault-Token", token.expose());
        if let Some(body) = body {
            request = request.json(&body);
        }

        request.send().await.map_err(|e| {
            warn!(path, error = %e, "Vault request failed");
            SecretStoreError::Unavailable(if e.is_timeout() {
                format!("request to {path} timed out")
            } else {
                format!("request to {path} failed: {e}")
            })
        })
    }

    async fn json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, SecretStoreError> {
        response
            .json::<T>()
            .await
            .map_err(|e| SecretStoreError::InvalidResponse(e.to_string()))
    }

    /// Maps a non-success status to an error, keeping Vault's messages
    async fn failure(response: reqwest::Response) -> SecretStoreError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<JsonValue>(&body)
            .ok()
            .and_then(|v| v.get("errors").cloned())
            .and_then(|errors| errors.as_array().cloned())
            .map(|errors| {
                errors
                    .iter()
                    .filter_map(|e| e.as_str())
                    .collect::<Vec<_>>()
                    .join("; ")
            })
            .filter(|m| !m.is_empty())
            .unwrap_or(body);

        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            SecretStoreError::Unavailable(format!("{status}: {message}"))
        } else {
            SecretStoreError::Rejected(format!("{status}: {message}"))
        }
    }

    async fn create_transit_key(&self, tenant_id: i64) -> Result<(), SecretStoreError> {
        let key = transit_key_name(tenant_id);
        let response = self
            .send(
                Method::POST,
                &format!("transit/keys/{key}"),
                &self.config.token,
                Some(json!({
                    "type": "aes256-gcm96",
                    "exportable": false,
                    "allow_plaintext_backup": false,
                })),
            )
            .await?;

        if response.status().is_success() {
            info!(tenant_id, key = %key, "Created transit key");
            return Ok(());
        }

        match Self::failure(response).await {
            SecretStoreError::Rejected(message) if message.contains("existing key") => {
                debug!(tenant_id, key = %key, "Transit key already exists");
                Ok(())
            }
            err => Err(err),
        }
    }

    async fn write_policy(&self, policy: &Policy) -> Result<(), SecretStoreError> {
        let response = self
            .send(
                Method::PUT,
                &format!("sys/policies/acl/{}", policy.name),
                &self.config.token,
                Some(json!({ "policy": policy.document().to_string() })),
            )
            .await?;

        if !response.status().is_success() {
            return Err(Self::failure(response).await);
        }
        Ok(())
    }

    async fn issue_token(&self, policy: &Policy) -> Result<SecretToken, SecretStoreError> {
        let response = self
            .send(
                Method::POST,
                "auth/token/create",
                &self.config.token,
                Some(json!({
                    "policies": [policy.name],
                    "renewable": true,
                    "ttl": format_ttl(self.config.token_ttl),
                    "no_default_policy": true,
                })),
            )
            .await?;

        if !response.status().is_success() {
            return Err(Self::failure(response).await);
        }

        let created: TokenCreate = Self::json(response).await?;
        Ok(SecretToken::new(created.auth.client_token))
    }

    async fn store_token(
        &self,
        tenant_id: i64,
        role: &str,
        token: &SecretToken,
    ) -> Result<(), SecretStoreError> {
        let response = self
            .send(
                Method::POST,
                &self.kv_token_path(tenant_id, role)?,
                &self.config.token,
                Some(json!({
                    "data": {
                        "token": token.expose(),
                        "ttl_seconds": self.config.token_ttl.as_secs(),
                    }
                })),
            )
            .await?;

        if !response.status().is_success() {
            return Err(Self::failure(response).await);
        }
        Ok(())
    }

    /// Runs a transit operation with the role's token
    async fn transit<T: DeserializeOwned>(
        &self,
        tenant_id: i64,
        role: &str,
        operation: &'static str,
        body: JsonValue,
    ) -> Result<T, SecretStoreError> {
        let token = self.get_token(tenant_id, role).await?;
        let path = format!("transit/{operation}/{}", transit_key_name(tenant_id));

        let response = self
            .send(Method::POST, &path, &token.token, Some(body))
            .await?;

        if response.status() == StatusCode::FORBIDDEN {
            return Err(SecretStoreError::Forbidden {
                tenant_id,
                role: role.to_string(),
                operation,
            });
        }
        if !response.status().is_success() {
            return Err(Self::failure(response).await);
        }

        let envelope: Envelope<T> = Self::json(response).await?;
        Ok(envelope.data)
    }
}

#[async_trait]
impl SecretStore for VaultSecretStore {
    async fn get_token(
        &self,
        tenant_id: i64,
        role: &str,
    ) -> Result<TenantSecretToken, SecretStoreError> {
        let response = self
            .send(
                Method::GET,
                &self.kv_token_path(tenant_id, role)?,
                &self.config.token,
                None,
            )
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(SecretStoreError::TokenNotFound {
                tenant_id,
                role: role.to_string(),
            });
        }
        if !response.status().is_success() {
            return Err(Self::failure(response).await);
        }

        let stored: Envelope<KvData> = Self::json(response).await?;
        let ttl = stored
            .data
            .data
            .ttl_seconds
            .map(Duration::from_secs)
            .unwrap_or(self.config.token_ttl);

        Ok(TenantSecretToken {
            tenant_id,
            role: role.to_string(),
            token: SecretToken::new(stored.data.data.token),
            ttl,
        })
    }

    async fn encrypt(
        &self,
        tenant_id: i64,
        role: &str,
        plaintext: &[u8],
    ) -> Result<String, SecretStoreError> {
        let data: Ciphertext = self
            .transit(
                tenant_id,
                role,
                "encrypt",
                json!({ "plaintext": BASE64.encode(plaintext) }),
            )
            .await?;
        Ok(data.ciphertext)
    }

    async fn decrypt(
        &self,
        tenant_id: i64,
        role: &str,
        ciphertext: &str,
    ) -> Result<Vec<u8>, SecretStoreError> {
        let data: Plaintext = self
            .transit(
                tenant_id,
                role,
                "decrypt",
                json!({ "ciphertext": ciphertext }),
            )
            .await?;

        BASE64
            .decode(data.plaintext)
            .map_err(|e| SecretStoreError::InvalidResponse(format!("plaintext: {e}")))
    }

    async fn register_tenant(
        &self,
        tenant_id: i64,
        roles: &[String],
    ) -> Result<TenantRegistration, SecretStoreError> {
        let policies = policies_for(tenant_id, roles)?;

        self.create_transit_key(tenant_id).await?;

        for (role, policy) in roles.iter().zip(&policies) {
            self.write_policy(policy).await?;
            let token = self.issue_token(policy).await?;
            self.store_token(tenant_id, role, &token).await?;
            debug!(tenant_id, role = %role, token = %token, "Issued role token");
        }

        info!(tenant_id, roles = roles.len(), "Registered tenant with Vault");
        Ok(TenantRegistration {
            tenant_id,
            transit_key: transit_key_name(tenant_id),
            roles: roles.to_vec(),
        })
    }

    async fn rotate_transit_key(&self, tenant_id: i64) -> Result<(), SecretStoreError> {
        let key = transit_key_name(tenant_id);
        let response = self
            .send(
                Method::POST,
                &format!("transit/keys/{key}/rotate"),
                &self.config.token,
                None,
            )
            .await?;

        if !response.status().is_success() {
            return Err(Self::failure(response).await);
        }

        info!(tenant_id, key = %key, "Rotated transit key");
        Ok(())
    }
}
