/// Tenant context endpoints
///
/// - `GET /v1/context` - what the request was resolved to (any host)
/// - `GET /v1/tenant` - the current clinic (tenant hosts only)

use axum::{Extension, Json};
use clinicore_shared::tenancy::current_schema;
use serde::Serialize;

use crate::error::ApiResult;
use crate::middleware::tenant::{CurrentTenant, TenantContext};

/// Resolution of the current request
#[derive(Debug, Serialize)]
pub struct ContextResponse {
    /// `public` or `tenant`
    pub scope: &'static str,

    /// Schema that database connections of this request are bound to
    pub schema: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<i64>,
}

/// Public view of a clinic
#[derive(Debug, Serialize)]
pub struct TenantResponse {
    pub id: i64,
    pub name: String,
    pub subdomain: Option<String>,
    pub custom_domain: Option<String>,
    pub plan_id: Option<i64>,
    pub schema: String,
    pub is_active: bool,
    pub provisioning_status: String,
}

impl From<clinicore_shared::models::tenant::Tenant> for TenantResponse {
    fn from(tenant: clinicore_shared::models::tenant::Tenant) -> Self {
        Self {
            id: tenant.id,
            schema: tenant.schema().to_string(),
            name: tenant.name,
            subdomain: tenant.subdomain,
            custom_domain: tenant.custom_domain,
            plan_id: tenant.plan_id,
            is_active: tenant.is_active,
            provisioning_status: tenant.provisioning_status,
        }
    }
}

/// Reports the scope and the schema the request runs under
///
/// The schema is read from the task-local context, not from the resolved
/// tenant, so it shows what the data access layer will actually use.
pub async fn get_context(Extension(context): Extension<TenantContext>) -> Json<ContextResponse> {
    Json(ContextResponse {
        scope: if context.is_public() { "public" } else { "tenant" },
        schema: current_schema().to_string(),
        tenant_id: context.tenant().map(|t| t.id),
    })
}

pub async fn get_tenant(CurrentTenant(tenant): CurrentTenant) -> ApiResult<Json<TenantResponse>> {
    Ok(Json(tenant.into()))
}
