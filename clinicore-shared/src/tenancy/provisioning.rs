//! Tenant provisioning
//!
//! Creating a tenant touches three systems that cannot share a transaction:
//! the registry row in `public.tenants`, the tenant's own schema, and the
//! secret store. [`TenantProvisioner::provision`] runs them in order:
//!
//! 1. insert the registry row, inactive with status `pending`
//! 2. in one transaction on a connection bound to `tenant_{id}`: create the
//!    schema and its tables, seed the default roles and the clinic admin
//! 3. register the tenant with the secret store (transit key, one policy and
//!    one token per seeded role)
//! 4. mark the tenant `complete`, which also activates it
//!
//! If stage 2, 3 or 4 fails the tenant is marked `failed` and stays inactive,
//! so its hosts never resolve, and the caller gets
//! [`ProvisioningError::PartialFailure`] naming the stage. Stage 2 rolls back
//! completely (PostgreSQL DDL is transactional); a failed stage 3 may leave a
//! transit key behind, which re-registration reuses.

use std::fmt;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use super::schema::SchemaName;
use crate::auth::password::{generate_initial_password, hash_password};
use crate::db::routing::{DbError, SchemaRouter};
use crate::db::tables::{create_schema, create_tenant_tables};
use crate::models::role::Role;
use crate::models::tenant::{CreateTenant, ProvisioningStatus, Tenant};
use crate::models::user::{CreateTenantUser, TenantUser};
use crate::secrets::{SecretStore, SecretStoreError, TenantRegistration};

/// Role given to the seeded administrator
pub const ADMIN_ROLE: &str = "clinic_admin";

/// Length of generated initial passwords
const INITIAL_PASSWORD_LEN: usize = 16;

/// Stage at which provisioning stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningStage {
    Schema,
    SecretStore,
    Activation,
}

impl fmt::Display for ProvisioningStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProvisioningStage::Schema => "schema",
            ProvisioningStage::SecretStore => "secret_store",
            ProvisioningStage::Activation => "activation",
        })
    }
}

/// Provisioning errors
#[derive(Debug, thiserror::Error)]
pub enum ProvisioningError {
    /// The request itself is unusable; nothing was created
    #[error("Invalid tenant: {0}")]
    InvalidRequest(String),

    /// Subdomain or custom domain already taken; nothing was created
    #[error("Tenant host already in use: {0}")]
    Conflict(String),

    /// The registry row could not be written; nothing was created
    #[error(transparent)]
    Db(#[from] DbError),

    /// A later stage failed; the tenant exists but is marked failed and inactive
    #[error("Provisioning of tenant {tenant_id} failed at stage {stage}: {reason}")]
    PartialFailure {
        tenant_id: i64,
        stage: ProvisioningStage,
        reason: String,
    },

    #[error("Provisioning failed: {0}")]
    Internal(String),
}

/// What to provision
#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    pub name: String,
    pub subdomain: Option<String>,
    pub custom_domain: Option<String>,
    pub plan_id: Option<i64>,
    /// Email of the seeded clinic admin
    pub admin_email: String,
}

/// A fully provisioned, active tenant
#[derive(Clone)]
pub struct ProvisionedTenant {
    pub tenant: Tenant,
    pub roles: Vec<Role>,
    pub admin: TenantUser,
    /// Shown to the caller once; only the hash is stored
    pub initial_password: String,
    pub registration: TenantRegistration,
}

impl ProvisionedTenant {
    pub fn schema(&self) -> SchemaName {
        self.tenant.schema()
    }
}

impl fmt::Debug for ProvisionedTenant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvisionedTenant")
            .field("tenant", &self.tenant)
            .field("roles", &self.roles)
            .field("admin", &self.admin.email)
            .field("initial_password", &"<redacted>")
            .field("registration", &self.registration)
            .finish()
    }
}

/// Creates tenants
#[derive(Clone)]
pub struct TenantProvisioner {
    router: SchemaRouter,
    secrets: Arc<dyn SecretStore>,
}

impl TenantProvisioner {
    pub fn new(router: SchemaRouter, secrets: Arc<dyn SecretStore>) -> Self {
        Self { router, secrets }
    }

    /// Provisions a tenant end to end
    ///
    /// # Errors
    ///
    /// - `InvalidRequest`, `Conflict` and `Db` before anything was created
    /// - `PartialFailure` once the registry row exists
    #[instrument(skip(self, request), fields(name = %request.name))]
    pub async fn provision(
        &self,
        request: ProvisionRequest,
    ) -> Result<ProvisionedTenant, ProvisioningError> {
        let request = validate_request(request)?;

        let initial_password = generate_initial_password(INITIAL_PASSWORD_LEN);
        let password = initial_password.clone();
        let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
            .await
            .map_err(|e| ProvisioningError::Internal(format!("password hashing task: {e}")))?
            .map_err(|e| ProvisioningError::Internal(e.to_string()))?;

        let tenant = self.insert_registry_row(&request).await?;
        let tenant_id = tenant.id;
        info!(tenant_id, schema = %tenant.schema(), "Registered tenant, building schema");

        let (roles, admin) = match self
            .build_schema(&tenant, &request.admin_email, password_hash)
            .await
        {
            Ok(built) => built,
            Err(e) => return Err(self.fail(tenant_id, ProvisioningStage::Schema, e).await),
        };

        let role_names: Vec<String> = roles.iter().map(|r| r.name.clone()).collect();
        let registration = match self.secrets.register_tenant(tenant_id, &role_names).await {
            Ok(registration) => registration,
            Err(e) => return Err(self.fail(tenant_id, ProvisioningStage::SecretStore, e).await),
        };

        let tenant = match self.mark(tenant_id, ProvisioningStatus::Complete).await {
            Ok(Some(tenant)) => tenant,
            Ok(None) => {
                let reason = "tenant row disappeared";
                return Err(self.fail(tenant_id, ProvisioningStage::Activation, reason).await);
            }
            Err(e) => return Err(self.fail(tenant_id, ProvisioningStage::Activation, e).await),
        };

        info!(tenant_id, roles = roles.len(), "Tenant provisioned and active");
        Ok(ProvisionedTenant {
            tenant,
            roles,
            admin,
            initial_password,
            registration,
        })
    }

    async fn insert_registry_row(&self, request: &ProvisionRequest) -> Result<Tenant, ProvisioningError> {
        let mut conn = self.router.acquire_public().await?;

        Tenant::create(
            &mut conn,
            CreateTenant {
                name: request.name.clone(),
                subdomain: request.subdomain.clone(),
                custom_domain: request.custom_domain.clone(),
                plan_id: request.plan_id,
            },
        )
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(db) = &e {
                if db.is_unique_violation() {
                    return ProvisioningError::Conflict(db.message().to_string());
                }
            }
            ProvisioningError::Db(e.into())
        })
    }

    /// Stage 2, all or nothing
    async fn build_schema(
        &self,
        tenant: &Tenant,
        admin_email: &str,
        password_hash: String,
    ) -> Result<(Vec<Role>, TenantUser), DbError> {
        let schema = tenant.schema();
        let mut conn = self.router.acquire_for(schema).await?;
        let mut tx = conn.begin().await?;

        create_schema(&mut tx, schema).await?;
        create_tenant_tables(&mut tx, schema).await?;
        let roles = Role::seed_defaults(&mut tx).await?;

        let admin_role = roles
            .iter()
            .find(|r| r.name == ADMIN_ROLE)
            .ok_or_else(|| {
                DbError::Database(sqlx::Error::Protocol(format!("role {ADMIN_ROLE} not seeded")))
            })?;

        let admin = TenantUser::create(
            &mut tx,
            CreateTenantUser {
                email: admin_email.to_string(),
                password_hash,
                role_id: admin_role.id,
                tenant_id: tenant.id,
            },
        )
        .await?;

        tx.commit().await?;
        Ok((roles, admin))
    }

    async fn mark(
        &self,
        tenant_id: i64,
        status: ProvisioningStatus,
    ) -> Result<Option<Tenant>, DbError> {
        let mut conn = self.router.acquire_public().await?;
        Ok(Tenant::set_provisioning_status(&mut conn, tenant_id, status).await?)
    }

    /// Flags the tenant as failed and builds the error for the caller
    async fn fail(
        &self,
        tenant_id: i64,
        stage: ProvisioningStage,
        cause: impl fmt::Display,
    ) -> ProvisioningError {
        let reason = cause.to_string();
        error!(tenant_id, %stage, reason = %reason, "Tenant provisioning failed");

        if let Err(e) = self.mark(tenant_id, ProvisioningStatus::Failed).await {
            // The row was inserted inactive, so it still cannot resolve.
            warn!(tenant_id, error = %e, "Could not mark tenant as failed");
        }

        ProvisioningError::PartialFailure {
            tenant_id,
            stage,
            reason,
        }
    }

    /// Rotates the tenant's transit key
    pub async fn rotate_transit_key(&self, tenant_id: i64) -> Result<(), SecretStoreError> {
        self.secrets.rotate_transit_key(tenant_id).await
    }
}

/// Normalizes and checks a request before anything is written
pub fn validate_request(mut request: ProvisionRequest) -> Result<ProvisionRequest, ProvisioningError> {
    request.name = request.name.trim().to_string();
    if request.name.is_empty() || request.name.chars().count() > 100 {
        return Err(ProvisioningError::InvalidRequest(
            "name must be 1 to 100 characters".to_string(),
        ));
    }

    request.subdomain = request
        .subdomain
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty());
    request.custom_domain = request
        .custom_domain
        .map(|d| d.trim().trim_end_matches('.').to_ascii_lowercase())
        .filter(|d| !d.is_empty());

    match (&request.subdomain, &request.custom_domain) {
        (None, None) => {
            return Err(ProvisioningError::InvalidRequest(
                "a subdomain or a custom domain is required".to_string(),
            ))
        }
        (Some(label), _) if !is_dns_label(label) => {
            return Err(ProvisioningError::InvalidRequest(format!(
                "subdomain {label:?} is not a valid DNS label"
            )))
        }
        (_, Some(domain))
            if domain.split('.').count() < 2 || !domain.split('.').all(is_dns_label) =>
        {
            return Err(ProvisioningError::InvalidRequest(format!(
                "custom domain {domain:?} is not a valid host name"
            )))
        }
        _ => {}
    }

    if !request.admin_email.contains('@') {
        return Err(ProvisioningError::InvalidRequest(
            "admin email is invalid".to_string(),
        ));
    }

    Ok(request)
}

fn is_dns_label(label: &str) -> bool {
    !label.is_empty()
        && label.len() <= 63
        && !label.starts_with('-')
        && !label.ends_with('-')
        && label
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}
