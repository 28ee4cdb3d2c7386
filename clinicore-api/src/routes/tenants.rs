/// Tenant administration (main domain only)
///
/// # Endpoints
///
/// - `POST /v1/tenants` - provision a clinic
/// - `POST /v1/tenants/:id/deactivate` - stop resolving its hosts
/// - `POST /v1/tenants/:id/activate` - resolve its hosts again
/// - `POST /v1/tenants/:id/rotate-key` - start a new transit key version
///
/// All of them require a `super_admin` token issued for the platform.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use clinicore_shared::tenancy::ProvisionRequest;
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::tenant::TenantResponse;
use crate::{app::AppState, error::ApiResult, middleware::auth::AuthContext};

const PLATFORM_ADMIN: &[&str] = &["super_admin"];

/// Provision request
#[derive(Debug, Deserialize, Validate)]
pub struct CreateTenantRequest {
    #[validate(length(min = 1, max = 100, message = "Name must be 1 to 100 characters"))]
    pub name: String,

    /// Tenant subdomain of the main domain, e.g. `clinica`
    #[validate(length(min = 1, max = 63, message = "Subdomain must be 1 to 63 characters"))]
    pub subdomain: Option<String>,

    /// Fully qualified custom domain, e.g. `portal.clinica.org`
    #[validate(length(min = 3, max = 253, message = "Custom domain must be 3 to 253 characters"))]
    pub custom_domain: Option<String>,

    pub plan_id: Option<i64>,

    /// Email of the clinic administrator to create
    #[validate(email(message = "Invalid email format"))]
    pub admin_email: String,
}

/// Provision response
///
/// `initial_password` is only ever returned here.
#[derive(Debug, Serialize)]
pub struct CreateTenantResponse {
    pub tenant: TenantResponse,
    pub roles: Vec<String>,
    pub admin_email: String,
    pub initial_password: String,
    pub transit_key: String,
}

/// Provisions a clinic
///
/// # Errors
///
/// - `409 Conflict`: subdomain or custom domain taken
/// - `422 Unprocessable Entity`: validation failed
/// - `500 Internal Server Error`: a stage failed; the tenant is left inactive
///   with status `failed`
pub async fn create_tenant(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<CreateTenantRequest>,
) -> ApiResult<(StatusCode, Json<CreateTenantResponse>)> {
    auth.require_role(PLATFORM_ADMIN)?;
    req.validate()?;

    let provisioned = state
        .provisioner
        .provision(ProvisionRequest {
            name: req.name,
            subdomain: req.subdomain,
            custom_domain: req.custom_domain,
            plan_id: req.plan_id,
            admin_email: req.admin_email,
        })
        .await?;

    tracing::info!(
        tenant_id = provisioned.tenant.id,
        requested_by = auth.user_id,
        "Tenant provisioned"
    );

    Ok((
        StatusCode::CREATED,
        Json(CreateTenantResponse {
            roles: provisioned.roles.iter().map(|r| r.name.clone()).collect(),
            admin_email: provisioned.admin.email.clone(),
            initial_password: provisioned.initial_password.clone(),
            transit_key: provisioned.registration.transit_key.clone(),
            tenant: provisioned.tenant.into(),
        }),
    ))
}

/// Deactivates a clinic; its hosts stop resolving immediately
pub async fn deactivate_tenant(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(tenant_id): Path<i64>,
) -> ApiResult<Json<TenantResponse>> {
    auth.require_role(PLATFORM_ADMIN)?;

    let tenant = state.directory.deactivate(tenant_id).await?;
    tracing::info!(tenant_id, requested_by = auth.user_id, "Tenant deactivated");

    Ok(Json(tenant.into()))
}

/// Reactivates a clinic whose provisioning completed
pub async fn activate_tenant(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(tenant_id): Path<i64>,
) -> ApiResult<Json<TenantResponse>> {
    auth.require_role(PLATFORM_ADMIN)?;

    let tenant = state.directory.activate(tenant_id).await?;
    tracing::info!(tenant_id, requested_by = auth.user_id, "Tenant activated");

    Ok(Json(tenant.into()))
}

/// Rotates the clinic's transit key; old ciphertext stays readable
pub async fn rotate_key(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(tenant_id): Path<i64>,
) -> ApiResult<StatusCode> {
    auth.require_role(PLATFORM_ADMIN)?;

    state.provisioner.rotate_transit_key(tenant_id).await?;
    tracing::info!(tenant_id, requested_by = auth.user_id, "Transit key rotated");

    Ok(StatusCode::NO_CONTENT)
}
