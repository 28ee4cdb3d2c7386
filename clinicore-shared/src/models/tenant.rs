/// Tenant registry model
///
/// Tenants live in the shared `public` schema. Every query in this module is
/// qualified with `public.` so it reads the registry no matter which schema
/// the connection is bound to; callers still obtain the connection from the
/// schema router.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE public.tenants (
///     id BIGSERIAL PRIMARY KEY,
///     name VARCHAR(100) NOT NULL,
///     subdomain VARCHAR(63) UNIQUE,
///     custom_domain VARCHAR(253) UNIQUE,
///     plan_id BIGINT REFERENCES public.plans (id),
///     is_active BOOLEAN NOT NULL DEFAULT FALSE,
///     provisioning_status VARCHAR(20) NOT NULL DEFAULT 'pending',
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// ```
///
/// # Example
///
/// ```no_run
/// use clinicore_shared::db::routing::SchemaRouter;
/// use clinicore_shared::models::tenant::{CreateTenant, Tenant};
///
/// # async fn example(router: SchemaRouter) -> Result<(), Box<dyn std::error::Error>> {
/// let mut conn = router.acquire_public().await?;
///
/// let tenant = Tenant::create(
///     &mut conn,
///     CreateTenant {
///         name: "Clinic A".to_string(),
///         subdomain: Some("clinica".to_string()),
///         custom_domain: None,
///         plan_id: None,
///     },
/// )
/// .await?;
///
/// assert_eq!(tenant.schema().to_string(), format!("tenant_{}", tenant.id));
/// # Ok(())
/// # }
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgConnection;

use crate::tenancy::schema::SchemaName;

/// How far the provisioning of a tenant got
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProvisioningStatus {
    /// Registry row exists, schema and secrets not yet complete
    Pending,

    /// Schema, roles and secret store registration all succeeded
    Complete,

    /// A provisioning stage failed; the tenant stays inactive
    Failed,
}

impl ProvisioningStatus {
    /// Converts status to string for database storage
    pub fn as_str(&self) -> &'static str {
        match self {
            ProvisioningStatus::Pending => "pending",
            ProvisioningStatus::Complete => "complete",
            ProvisioningStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for ProvisioningStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ProvisioningStatus::Pending),
            "complete" => Ok(ProvisioningStatus::Complete),
            "failed" => Ok(ProvisioningStatus::Failed),
            other => Err(format!("unknown provisioning status: {other}")),
        }
    }
}

/// A clinic organization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Tenant {
    /// Tenant ID; never reused, names the `tenant_{id}` schema
    pub id: i64,

    pub name: String,

    /// Label under the main domain, e.g. `clinica` for `clinica.example.com`
    pub subdomain: Option<String>,

    /// Fully qualified host the clinic serves from, if any
    pub custom_domain: Option<String>,

    pub plan_id: Option<i64>,

    /// Only active tenants resolve from a host
    pub is_active: bool,

    /// Stored as text, see [`ProvisioningStatus`]
    pub provisioning_status: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Tenant {
    /// The tenant's isolated schema
    pub fn schema(&self) -> SchemaName {
        SchemaName::for_tenant(self.id)
    }

    /// Gets the parsed provisioning status
    pub fn status(&self) -> Option<ProvisioningStatus> {
        self.provisioning_status.parse().ok()
    }
}

/// Input for creating a new tenant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTenant {
    pub name: String,
    pub subdomain: Option<String>,
    pub custom_domain: Option<String>,
    pub plan_id: Option<i64>,
}

const TENANT_COLUMNS: &str = "id, name, subdomain, custom_domain, plan_id, is_active, \
                              provisioning_status, created_at, updated_at";

impl Tenant {
    /// Inserts a new, inactive tenant with `pending` provisioning status
    ///
    /// Subdomain and custom domain are stored lowercased.
    ///
    /// # Errors
    ///
    /// Returns an error if the subdomain or custom domain is already taken or
    /// the database fails.
    pub async fn create(conn: &mut PgConnection, data: CreateTenant) -> Result<Self, sqlx::Error> {
        let tenant = sqlx::query_as::<_, Tenant>(&format!(
            r#"
            INSERT INTO public.tenants (name, subdomain, custom_domain, plan_id)
            VALUES ($1, $2, $3, $4)
            RETURNING {TENANT_COLUMNS}
            "#
        ))
        .bind(data.name)
        .bind(data.subdomain.map(|s| s.to_lowercase()))
        .bind(data.custom_domain.map(|s| s.to_lowercase()))
        .bind(data.plan_id)
        .fetch_one(conn)
        .await?;

        Ok(tenant)
    }

    /// Finds a tenant by ID regardless of its status
    pub async fn find_by_id(conn: &mut PgConnection, id: i64) -> Result<Option<Self>, sqlx::Error> {
        let tenant = sqlx::query_as::<_, Tenant>(&format!(
            "SELECT {TENANT_COLUMNS} FROM public.tenants WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(conn)
        .await?;

        Ok(tenant)
    }

    /// Finds an active tenant by subdomain
    pub async fn find_active_by_subdomain(
        conn: &mut PgConnection,
        subdomain: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        let tenant = sqlx::query_as::<_, Tenant>(&format!(
            r#"
            SELECT {TENANT_COLUMNS}
            FROM public.tenants
            WHERE lower(subdomain) = lower($1) AND is_active = TRUE
            "#
        ))
        .bind(subdomain)
        .fetch_optional(conn)
        .await?;

        Ok(tenant)
    }

    /// Finds an active tenant by exact custom domain
    pub async fn find_active_by_custom_domain(
        conn: &mut PgConnection,
        domain: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        let tenant = sqlx::query_as::<_, Tenant>(&format!(
            r#"
            SELECT {TENANT_COLUMNS}
            FROM public.tenants
            WHERE lower(custom_domain) = lower($1) AND is_active = TRUE
            "#
        ))
        .bind(domain)
        .fetch_optional(conn)
        .await?;

        Ok(tenant)
    }

    /// Sets the active flag
    ///
    /// Activation only succeeds for tenants whose provisioning completed;
    /// returns `None` when no such tenant exists.
    pub async fn set_active(
        conn: &mut PgConnection,
        id: i64,
        active: bool,
    ) -> Result<Option<Self>, sqlx::Error> {
        let tenant = sqlx::query_as::<_, Tenant>(&format!(
            r#"
            UPDATE public.tenants
            SET is_active = $2, updated_at = NOW()
            WHERE id = $1 AND (NOT $2 OR provisioning_status = 'complete')
            RETURNING {TENANT_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(active)
        .fetch_optional(conn)
        .await?;

        Ok(tenant)
    }

    /// Records the provisioning outcome
    ///
    /// `Complete` also activates the tenant; any other status deactivates it.
    pub async fn set_provisioning_status(
        conn: &mut PgConnection,
        id: i64,
        status: ProvisioningStatus,
    ) -> Result<Option<Self>, sqlx::Error> {
        let tenant = sqlx::query_as::<_, Tenant>(&format!(
            r#"
            UPDATE public.tenants
            SET provisioning_status = $2,
                is_active = ($2 = 'complete'),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {TENANT_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(status.as_str())
        .fetch_optional(conn)
        .await?;

        Ok(tenant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: i64) -> Tenant {
        Tenant {
            id,
            name: "Clinic".to_string(),
            subdomain: Some("clinic".to_string()),
            custom_domain: None,
            plan_id: None,
            is_active: true,
            provisioning_status: "complete".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_provisioning_status_round_trip() {
        for status in [
            ProvisioningStatus::Pending,
            ProvisioningStatus::Complete,
            ProvisioningStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<ProvisioningStatus>(), Ok(status));
        }
        assert!("done".parse::<ProvisioningStatus>().is_err());
    }

    #[test]
    fn test_schema_derived_from_id() {
        assert_eq!(sample(42).schema().to_string(), "tenant_42");
        assert_eq!(sample(42).status(), Some(ProvisioningStatus::Complete));
    }
}
