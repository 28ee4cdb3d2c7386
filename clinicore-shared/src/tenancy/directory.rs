//! Host name to tenant resolution
//!
//! [`TenantDirectory::resolve`] maps the `Host` of a request to either the
//! shared platform (main domain or a local alias) or one active tenant:
//!
//! | Host | Resolution |
//! |---|---|
//! | `example.com`, `localhost` | public |
//! | `clinica.example.com` | tenant whose subdomain is `clinica` |
//! | `portal.clinic-a.org` | tenant whose custom domain is `portal.clinic-a.org` |
//!
//! Anything else, including hosts of inactive tenants, is `TenantNotFound`.
//!
//! Positive lookups are cached per host for a bounded TTL. Deactivating a
//! tenant through the directory drops its cached hosts immediately; a
//! deactivation made elsewhere becomes visible once the TTL runs out.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info};

use super::schema::SchemaName;
use super::store::TenantStore;
use crate::db::routing::DbError;
use crate::models::tenant::Tenant;

/// Directory errors
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    /// No active tenant serves this host
    #[error("No active tenant for host {host:?}")]
    TenantNotFound { host: String },

    /// No tenant with this id, or it cannot be activated
    #[error("Tenant {0} not found or not provisioned")]
    UnknownTenant(i64),

    #[error(transparent)]
    Db(#[from] DbError),
}

/// Outcome of resolving a host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Main domain or local alias; shared platform data only
    Public,

    /// An active tenant
    Tenant(Tenant),
}

impl Resolution {
    /// Schema that requests on this host are bound to
    pub fn schema(&self) -> SchemaName {
        match self {
            Resolution::Public => SchemaName::Public,
            Resolution::Tenant(tenant) => tenant.schema(),
        }
    }

    pub fn tenant(&self) -> Option<&Tenant> {
        match self {
            Resolution::Public => None,
            Resolution::Tenant(tenant) => Some(tenant),
        }
    }
}

/// Directory settings
#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    /// Platform domain, e.g. `example.com`; tenants live on its subdomains
    pub main_domain: String,

    /// Extra hosts that also mean the platform, e.g. `localhost`
    pub local_aliases: Vec<String>,

    /// How long a positive lookup is served from cache
    pub cache_ttl: Duration,

    /// Upper bound on cached hosts
    pub max_cache_entries: usize,
}

impl DirectoryConfig {
    pub fn new(main_domain: impl Into<String>) -> Self {
        Self {
            main_domain: main_domain.into(),
            ..Default::default()
        }
    }
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            main_domain: String::new(),
            local_aliases: vec!["localhost".to_string()],
            cache_ttl: Duration::from_secs(60),
            max_cache_entries: 10_000,
        }
    }
}

/// Which registry lookup a host calls for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostKind {
    Public,
    Subdomain(String),
    CustomDomain(String),
}

#[derive(Debug)]
struct CacheEntry {
    tenant: Tenant,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct Cache {
    entries: HashMap<String, CacheEntry>,
    // Bumped on every invalidation so that a lookup which started before it
    // does not write back a stale tenant.
    generation: u64,
}

/// Resolves hosts to tenants, with a TTL cache in front of a [`TenantStore`]
#[derive(Clone)]
pub struct TenantDirectory {
    store: Arc<dyn TenantStore>,
    main_domain: String,
    local_aliases: Vec<String>,
    cache_ttl: Duration,
    max_cache_entries: usize,
    cache: Arc<RwLock<Cache>>,
}

impl std::fmt::Debug for TenantDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantDirectory")
            .field("main_domain", &self.main_domain)
            .field("local_aliases", &self.local_aliases)
            .field("cache_ttl", &self.cache_ttl)
            .finish_non_exhaustive()
    }
}

impl TenantDirectory {
    pub fn new(store: Arc<dyn TenantStore>, config: DirectoryConfig) -> Self {
        let main_domain = normalize_host(&config.main_domain).unwrap_or_default();
        let local_aliases = config
            .local_aliases
            .iter()
            .filter_map(|alias| normalize_host(alias))
            .collect();

        Self {
            store,
            main_domain,
            local_aliases,
            cache_ttl: config.cache_ttl,
            max_cache_entries: config.max_cache_entries,
            cache: Arc::new(RwLock::new(Cache::default())),
        }
    }

    pub fn main_domain(&self) -> &str {
        &self.main_domain
    }

    /// Classifies a raw `Host` header value without touching the registry
    ///
    /// Returns `None` for hosts that are empty after normalization.
    pub fn classify(&self, host: &str) -> Option<HostKind> {
        let host = normalize_host(host)?;

        if host == self.main_domain || self.local_aliases.iter().any(|alias| *alias == host) {
            return Some(HostKind::Public);
        }

        if !self.main_domain.is_empty() {
            if let Some(prefix) = host.strip_suffix(&format!(".{}", self.main_domain)) {
                // Leftmost label: `a.b.example.com` resolves by `a`.
                let label = prefix.split('.').next().unwrap_or_default();
                if label.is_empty() {
                    return None;
                }
                return Some(HostKind::Subdomain(label.to_string()));
            }
        }

        Some(HostKind::CustomDomain(host))
    }

    /// Resolves a raw `Host` header value
    ///
    /// # Errors
    ///
    /// - `DirectoryError::TenantNotFound` when no active tenant serves the host
    /// - `DirectoryError::Db` when the registry cannot be read
    pub async fn resolve(&self, host: &str) -> Result<Resolution, DirectoryError> {
        let not_found = || DirectoryError::TenantNotFound {
            host: host.to_string(),
        };

        let kind = self.classify(host).ok_or_else(not_found)?;
        let key = match &kind {
            HostKind::Public => return Ok(Resolution::Public),
            HostKind::Subdomain(label) => format!("sub:{label}"),
            HostKind::CustomDomain(domain) => format!("dom:{domain}"),
        };

        let generation = {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.entries.get(&key) {
                if entry.expires_at > Instant::now() {
                    debug!(host = %host, tenant_id = entry.tenant.id, "Tenant cache hit");
                    return Ok(Resolution::Tenant(entry.tenant.clone()));
                }
            }
            cache.generation
        };

        let tenant = match &kind {
            HostKind::Subdomain(label) => self.store.find_active_by_subdomain(label).await?,
            HostKind::CustomDomain(domain) => {
                self.store.find_active_by_custom_domain(domain).await?
            }
            HostKind::Public => None,
        };

        let Some(tenant) = tenant else {
            debug!(host = %host, "No active tenant for host");
            return Err(not_found());
        };

        self.remember(key, &tenant, generation).await;
        debug!(host = %host, tenant_id = tenant.id, "Resolved tenant");
        Ok(Resolution::Tenant(tenant))
    }

    async fn remember(&self, key: String, tenant: &Tenant, generation: u64) {
        if self.cache_ttl.is_zero() {
            return;
        }

        let mut cache = self.cache.write().await;
        if cache.generation != generation {
            return;
        }

        let now = Instant::now();
        if cache.entries.len() >= self.max_cache_entries {
            cache.entries.retain(|_, entry| entry.expires_at > now);
            if cache.entries.len() >= self.max_cache_entries {
                return;
            }
        }

        cache.entries.insert(
            key,
            CacheEntry {
                tenant: tenant.clone(),
                expires_at: now + self.cache_ttl,
            },
        );
    }

    /// Deactivates a tenant and drops every cached host that maps to it
    ///
    /// Requests resolved after this returns get `TenantNotFound`.
    pub async fn deactivate(&self, tenant_id: i64) -> Result<Tenant, DirectoryError> {
        let result = self.store.set_active(tenant_id, false).await;
        // Invalidate even when the store call failed; the row may have changed.
        self.invalidate_tenant(tenant_id).await;

        let tenant = result?.ok_or(DirectoryError::UnknownTenant(tenant_id))?;
        info!(tenant_id, "Tenant deactivated");
        Ok(tenant)
    }

    /// Re-activates a fully provisioned tenant
    pub async fn activate(&self, tenant_id: i64) -> Result<Tenant, DirectoryError> {
        let tenant = self
            .store
            .set_active(tenant_id, true)
            .await?
            .ok_or(DirectoryError::UnknownTenant(tenant_id))?;
        self.invalidate_tenant(tenant_id).await;

        info!(tenant_id, "Tenant activated");
        Ok(tenant)
    }

    /// Drops every cached host that maps to `tenant_id`
    pub async fn invalidate_tenant(&self, tenant_id: i64) {
        let mut cache = self.cache.write().await;
        cache.generation += 1;
        cache.entries.retain(|_, entry| entry.tenant.id != tenant_id);
    }

    /// Drops the cached resolution of one host
    pub async fn invalidate_host(&self, host: &str) {
        let key = match self.classify(host) {
            Some(HostKind::Subdomain(label)) => format!("sub:{label}"),
            Some(HostKind::CustomDomain(domain)) => format!("dom:{domain}"),
            _ => return,
        };

        let mut cache = self.cache.write().await;
        cache.generation += 1;
        cache.entries.remove(&key);
    }

    /// Empties the cache
    pub async fn clear(&self) {
        let mut cache = self.cache.write().await;
        cache.generation += 1;
        cache.entries.clear();
    }

    /// Number of cached hosts, expired ones included
    pub async fn cached_hosts(&self) -> usize {
        self.cache.read().await.entries.len()
    }
}

/// Canonical form of a `Host` header value
///
/// Trims whitespace, drops the port (`host:8080`, `[::1]:8080`), drops one
/// trailing dot and lowercases. Returns `None` when nothing is left.
pub fn normalize_host(raw: &str) -> Option<String> {
    let raw = raw.trim();

    let host = if let Some(rest) = raw.strip_prefix('[') {
        // Bracketed IPv6 literal, optionally followed by a port
        let end = rest.find(']')?;
        &raw[..end + 2]
    } else if raw.matches(':').count() == 1 {
        raw.split(':').next().unwrap_or_default()
    } else {
        raw
    };

    let host = host.strip_suffix('.').unwrap_or(host).to_ascii_lowercase();
    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}
