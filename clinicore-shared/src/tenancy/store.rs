//! Tenant registry backends for the directory

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::db::routing::{DbError, SchemaRouter};
use crate::models::tenant::{ProvisioningStatus, Tenant};

/// Read and activation access to the tenant registry
#[async_trait]
pub trait TenantStore: Send + Sync {
    /// Active tenant owning `subdomain`, compared case-insensitively
    async fn find_active_by_subdomain(&self, subdomain: &str) -> Result<Option<Tenant>, DbError>;

    /// Active tenant serving exactly `domain`, compared case-insensitively
    async fn find_active_by_custom_domain(&self, domain: &str)
        -> Result<Option<Tenant>, DbError>;

    /// Persists the active flag; `None` when the tenant does not exist or,
    /// when activating, has not completed provisioning
    async fn set_active(&self, tenant_id: i64, active: bool) -> Result<Option<Tenant>, DbError>;
}

/// Registry in `public.tenants`, read through the schema router
#[derive(Clone, Debug)]
pub struct PgTenantStore {
    router: SchemaRouter,
}

impl PgTenantStore {
    pub fn new(router: SchemaRouter) -> Self {
        Self { router }
    }
}

#[async_trait]
impl TenantStore for PgTenantStore {
    async fn find_active_by_subdomain(&self, subdomain: &str) -> Result<Option<Tenant>, DbError> {
        let mut conn = self.router.acquire_public().await?;
        Ok(Tenant::find_active_by_subdomain(&mut conn, subdomain).await?)
    }

    async fn find_active_by_custom_domain(
        &self,
        domain: &str,
    ) -> Result<Option<Tenant>, DbError> {
        let mut conn = self.router.acquire_public().await?;
        Ok(Tenant::find_active_by_custom_domain(&mut conn, domain).await?)
    }

    async fn set_active(&self, tenant_id: i64, active: bool) -> Result<Option<Tenant>, DbError> {
        let mut conn = self.router.acquire_public().await?;
        Ok(Tenant::set_active(&mut conn, tenant_id, active).await?)
    }
}

/// In-process registry for development and tests
#[derive(Debug, Default)]
pub struct MemoryTenantStore {
    tenants: RwLock<Vec<Tenant>>,
}

impl MemoryTenantStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tenants(tenants: Vec<Tenant>) -> Self {
        Self {
            tenants: RwLock::new(tenants),
        }
    }

    /// Adds or replaces a tenant by id
    pub async fn upsert(&self, tenant: Tenant) {
        let mut tenants = self.tenants.write().await;
        tenants.retain(|t| t.id != tenant.id);
        tenants.push(tenant);
    }

    async fn find_active<F>(&self, matches: F) -> Option<Tenant>
    where
        F: Fn(&Tenant) -> bool,
    {
        self.tenants
            .read()
            .await
            .iter()
            .find(|t| t.is_active && matches(t))
            .cloned()
    }
}

#[async_trait]
impl TenantStore for MemoryTenantStore {
    async fn find_active_by_subdomain(&self, subdomain: &str) -> Result<Option<Tenant>, DbError> {
        Ok(self
            .find_active(|t| {
                t.subdomain
                    .as_deref()
                    .is_some_and(|s| s.eq_ignore_ascii_case(subdomain))
            })
            .await)
    }

    async fn find_active_by_custom_domain(
        &self,
        domain: &str,
    ) -> Result<Option<Tenant>, DbError> {
        Ok(self
            .find_active(|t| {
                t.custom_domain
                    .as_deref()
                    .is_some_and(|d| d.eq_ignore_ascii_case(domain))
            })
            .await)
    }

    async fn set_active(&self, tenant_id: i64, active: bool) -> Result<Option<Tenant>, DbError> {
        let mut tenants = self.tenants.write().await;
        let Some(tenant) = tenants.iter_mut().find(|t| t.id == tenant_id) else {
            return Ok(None);
        };

        if active && tenant.status() != Some(ProvisioningStatus::Complete) {
            return Ok(None);
        }

        tenant.is_active = active;
        tenant.updated_at = chrono::Utc::now();
        Ok(Some(tenant.clone()))
    }
}
