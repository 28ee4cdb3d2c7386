//! In-process secret store
//!
//! Mirrors the observable behavior of the Vault store: versioned per-tenant
//! AES-256-GCM transit keys, role tokens checked against the same typed
//! policies, `TokenNotFound` for unregistered pairs and `Unavailable` while
//! an outage is simulated. Keys never leave the process.
//!
//! Ciphertext looks like Vault's: `vault:v{version}:{base64(nonce || ct)}`.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::policy::{decrypt_path, encrypt_path, Capability, Policy};
use super::{
    policies_for, transit_key_name, SecretStore, SecretStoreError, SecretToken,
    TenantRegistration, TenantSecretToken, DEFAULT_TOKEN_TTL,
};

const NONCE_LEN: usize = 12;

#[derive(Debug)]
struct RoleGrant {
    token: SecretToken,
    policy: Policy,
}

#[derive(Default)]
struct TenantSecrets {
    // Index 0 is version 1
    keys: Vec<[u8; 32]>,
    grants: HashMap<String, RoleGrant>,
}

/// Secret store kept in memory
#[derive(Default)]
pub struct MemorySecretStore {
    tenants: RwLock<HashMap<i64, TenantSecrets>>,
    unavailable: AtomicBool,
    token_ttl: Option<Duration>,
}

impl std::fmt::Debug for MemorySecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySecretStore")
            .field("unavailable", &self.unavailable.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token_ttl(token_ttl: Duration) -> Self {
        Self {
            token_ttl: Some(token_ttl),
            ..Self::default()
        }
    }

    /// Makes every call fail with `Unavailable` until switched back
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Current transit key version of a tenant, if registered
    pub async fn key_version(&self, tenant_id: i64) -> Option<usize> {
        self.tenants
            .read()
            .await
            .get(&tenant_id)
            .map(|secrets| secrets.keys.len())
            .filter(|version| *version > 0)
    }

    fn check_available(&self) -> Result<(), SecretStoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SecretStoreError::Unavailable(
                "memory secret store is offline".to_string(),
            ));
        }
        Ok(())
    }

    fn authorize(
        tenant_id: i64,
        role: &str,
        secrets: &TenantSecrets,
        path: &str,
        operation: &'static str,
    ) -> Result<(), SecretStoreError> {
        let grant = secrets
            .grants
            .get(role)
            .ok_or_else(|| SecretStoreError::TokenNotFound {
                tenant_id,
                role: role.to_string(),
            })?;

        if !grant.policy.allows(path, Capability::Update) {
            return Err(SecretStoreError::Forbidden {
                tenant_id,
                role: role.to_string(),
                operation,
            });
        }
        Ok(())
    }
}

fn random_token() -> SecretToken {
    let bytes: [u8; 24] = rand::thread_rng().gen();
    SecretToken::new(format!("mem.{}", hex::encode(bytes)))
}

fn seal(key: &[u8; 32], version: usize, plaintext: &[u8]) -> Result<String, SecretStoreError> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|_| SecretStoreError::Rejected("invalid transit key".to_string()))?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill(&mut nonce_bytes);

    let sealed = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|_| SecretStoreError::Rejected("encryption failed".to_string()))?;

    let mut payload = nonce_bytes.to_vec();
    payload.extend_from_slice(&sealed);
    Ok(format!("vault:v{}:{}", version, BASE64.encode(payload)))
}

fn open(keys: &[[u8; 32]], ciphertext: &str) -> Result<Vec<u8>, SecretStoreError> {
    let malformed = || SecretStoreError::Rejected("invalid ciphertext".to_string());

    let mut parts = ciphertext.splitn(3, ':');
    let (Some("vault"), Some(version), Some(payload)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(malformed());
    };

    let version: usize = version
        .strip_prefix('v')
        .and_then(|v| v.parse().ok())
        .ok_or_else(malformed)?;
    let key = version
        .checked_sub(1)
        .and_then(|idx| keys.get(idx))
        .ok_or_else(malformed)?;

    let payload = BASE64.decode(payload).map_err(|_| malformed())?;
    if payload.len() <= NONCE_LEN {
        return Err(malformed());
    }
    let (nonce, sealed) = payload.split_at(NONCE_LEN);

    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| malformed())?;
    cipher
        .decrypt(Nonce::from_slice(nonce), sealed)
        .map_err(|_| SecretStoreError::Rejected("decryption failed".to_string()))
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get_token(
        &self,
        tenant_id: i64,
        role: &str,
    ) -> Result<TenantSecretToken, SecretStoreError> {
        self.check_available()?;

        let tenants = self.tenants.read().await;
        let grant = tenants
            .get(&tenant_id)
            .and_then(|secrets| secrets.grants.get(role))
            .ok_or_else(|| SecretStoreError::TokenNotFound {
                tenant_id,
                role: role.to_string(),
            })?;

        Ok(TenantSecretToken {
            tenant_id,
            role: role.to_string(),
            token: grant.token.clone(),
            ttl: self.token_ttl.unwrap_or(DEFAULT_TOKEN_TTL),
        })
    }

    async fn encrypt(
        &self,
        tenant_id: i64,
        role: &str,
        plaintext: &[u8],
    ) -> Result<String, SecretStoreError> {
        self.check_available()?;

        let tenants = self.tenants.read().await;
        let secrets = tenants
            .get(&tenant_id)
            .ok_or_else(|| SecretStoreError::TokenNotFound {
                tenant_id,
                role: role.to_string(),
            })?;
        Self::authorize(tenant_id, role, secrets, &encrypt_path(tenant_id), "encrypt")?;

        let key = secrets
            .keys
            .last()
            .ok_or_else(|| SecretStoreError::Rejected("transit key missing".to_string()))?;
        seal(key, secrets.keys.len(), plaintext)
    }

    async fn decrypt(
        &self,
        tenant_id: i64,
        role: &str,
        ciphertext: &str,
    ) -> Result<Vec<u8>, SecretStoreError> {
        self.check_available()?;

        let tenants = self.tenants.read().await;
        let secrets = tenants
            .get(&tenant_id)
            .ok_or_else(|| SecretStoreError::TokenNotFound {
                tenant_id,
                role: role.to_string(),
            })?;
        Self::authorize(tenant_id, role, secrets, &decrypt_path(tenant_id), "decrypt")?;

        open(&secrets.keys, ciphertext)
    }

    async fn register_tenant(
        &self,
        tenant_id: i64,
        roles: &[String],
    ) -> Result<TenantRegistration, SecretStoreError> {
        self.check_available()?;
        let policies = policies_for(tenant_id, roles)?;

        let mut tenants = self.tenants.write().await;
        let secrets = tenants.entry(tenant_id).or_default();

        if secrets.keys.is_empty() {
            secrets.keys.push(rand::thread_rng().gen());
            info!(tenant_id, key = %transit_key_name(tenant_id), "Created transit key");
        }

        for (role, policy) in roles.iter().zip(policies) {
            let token = random_token();
            debug!(tenant_id, role = %role, token = %token, "Issued role token");
            secrets.grants.insert(role.clone(), RoleGrant { token, policy });
        }

        Ok(TenantRegistration {
            tenant_id,
            transit_key: transit_key_name(tenant_id),
            roles: roles.to_vec(),
        })
    }

    async fn rotate_transit_key(&self, tenant_id: i64) -> Result<(), SecretStoreError> {
        self.check_available()?;

        let mut tenants = self.tenants.write().await;
        let secrets = tenants
            .get_mut(&tenant_id)
            .filter(|secrets| !secrets.keys.is_empty())
            .ok_or_else(|| {
                SecretStoreError::Rejected(format!(
                    "no transit key named {}",
                    transit_key_name(tenant_id)
                ))
            })?;

        secrets.keys.push(rand::thread_rng().gen());
        info!(tenant_id, version = secrets.keys.len(), "Rotated transit key");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roles(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    async fn registered() -> MemorySecretStore {
        let store = MemorySecretStore::new();
        store
            .register_tenant(
                7,
                &roles(&["super_admin", "clinic_admin", "doctor", "nurse", "staff", "patient"]),
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_round_trip() {
        let store = registered().await;

        for plaintext in ["", "Jane Doe", "allergy: penicillin ☤", "x".repeat(4096).as_str()] {
            let ciphertext = store.encrypt(7, "clinic_admin", plaintext.as_bytes()).await.unwrap();
            assert!(ciphertext.starts_with("vault:v1:"));
            assert!(!ciphertext.contains(plaintext) || plaintext.is_empty());

            let decrypted = store.decrypt(7, "doctor", &ciphertext).await.unwrap();
            assert_eq!(decrypted, plaintext.as_bytes());
        }
    }

    #[tokio::test]
    async fn test_token_lookup() {
        let store = registered().await;

        let token = store.get_token(7, "nurse").await.unwrap();
        assert_eq!(token.role, "nurse");
        assert_eq!(token.ttl, DEFAULT_TOKEN_TTL);
        assert_ne!(
            token.token,
            store.get_token(7, "doctor").await.unwrap().token
        );

        assert!(matches!(
            store.get_token(7, "receptionist").await,
            Err(SecretStoreError::TokenNotFound { tenant_id: 7, .. })
        ));
        assert!(matches!(
            store.get_token(8, "doctor").await,
            Err(SecretStoreError::TokenNotFound { tenant_id: 8, .. })
        ));
    }

    #[tokio::test]
    async fn test_policies_are_enforced() {
        let store = registered().await;

        assert!(matches!(
            store.encrypt(7, "doctor", b"note").await,
            Err(SecretStoreError::Forbidden { operation: "encrypt", .. })
        ));

        let ciphertext = store.encrypt(7, "super_admin", b"note").await.unwrap();
        assert!(matches!(
            store.decrypt(7, "staff", &ciphertext).await,
            Err(SecretStoreError::Forbidden { operation: "decrypt", .. })
        ));
    }

    #[tokio::test]
    async fn test_tenant_keys_are_isolated() {
        let store = registered().await;
        store.register_tenant(9, &roles(&["clinic_admin"])).await.unwrap();

        let ciphertext = store.encrypt(7, "clinic_admin", b"secret").await.unwrap();
        assert!(matches!(
            store.decrypt(9, "clinic_admin", &ciphertext).await,
            Err(SecretStoreError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn test_rotation_keeps_old_ciphertext_readable() {
        let store = registered().await;

        let old = store.encrypt(7, "clinic_admin", b"before").await.unwrap();
        store.rotate_transit_key(7).await.unwrap();
        let new = store.encrypt(7, "clinic_admin", b"after").await.unwrap();

        assert_eq!(store.key_version(7).await, Some(2));
        assert!(new.starts_with("vault:v2:"));
        assert_eq!(store.decrypt(7, "clinic_admin", &old).await.unwrap(), b"before");
        assert_eq!(store.decrypt(7, "clinic_admin", &new).await.unwrap(), b"after");

        assert!(store.rotate_transit_key(42).await.is_err());
    }

    #[tokio::test]
    async fn test_reregistration_keeps_key() {
        let store = registered().await;
        let ciphertext = store.encrypt(7, "clinic_admin", b"kept").await.unwrap();

        store.register_tenant(7, &roles(&["clinic_admin"])).await.unwrap();
        assert_eq!(store.key_version(7).await, Some(1));
        assert_eq!(
            store.decrypt(7, "clinic_admin", &ciphertext).await.unwrap(),
            b"kept"
        );
    }

    #[tokio::test]
    async fn test_unknown_role_registers_nothing() {
        let store = MemorySecretStore::new();

        let result = store
            .register_tenant(5, &roles(&["doctor", "janitor"]))
            .await;
        assert!(matches!(result, Err(SecretStoreError::UnknownRole(_))));
        assert_eq!(store.key_version(5).await, None);
        assert!(store.get_token(5, "doctor").await.is_err());
    }

    #[tokio::test]
    async fn test_tampered_ciphertext_is_rejected() {
        let store = registered().await;
        let ciphertext = store.encrypt(7, "clinic_admin", b"data").await.unwrap();

        let mut tampered = ciphertext.clone().into_bytes();
        let last = tampered.len() - 3;
        tampered[last] = if tampered[last] == b'A' { b'B' } else { b'A' };
        let tampered = String::from_utf8(tampered).unwrap();

        for bad in [tampered.as_str(), "vault:v9:AAAA", "plain text", "vault:v1:***"] {
            assert!(
                matches!(
                    store.decrypt(7, "clinic_admin", bad).await,
                    Err(SecretStoreError::Rejected(_))
                ),
                "{bad}"
            );
        }
    }

    #[tokio::test]
    async fn test_outage_is_surfaced() {
        let store = registered().await;
        store.set_unavailable(true);

        assert!(matches!(
            store.encrypt(7, "clinic_admin", b"x").await,
            Err(SecretStoreError::Unavailable(_))
        ));
        assert!(matches!(
            store.get_token(7, "doctor").await,
            Err(SecretStoreError::Unavailable(_))
        ));

        store.set_unavailable(false);
        assert!(store.encrypt(7, "clinic_admin", b"x").await.is_ok());
    }
}
