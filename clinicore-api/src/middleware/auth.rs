/// Tenant-bound JWT authentication
///
/// Must run inside [`resolve_tenant`](super::tenant::resolve_tenant): the
/// token's tenant claim is compared with the tenant resolved from the host,
/// so a token issued for `clinicA` is refused on `clinicB` even though its
/// signature is valid. The user must also still exist in that schema, be
/// active and hold the role the token names.

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use clinicore_shared::auth::jwt::{validate_token, TenantClaim};
use clinicore_shared::tenancy::current_schema;
use serde::Serialize;

use super::tenant::TenantContext;
use crate::{app::AppState, error::ApiError};

/// Authentication context added to request extensions
///
/// Handlers extract it with `Extension<AuthContext>`.
#[derive(Debug, Clone, Serialize)]
pub struct AuthContext {
    /// User ID inside the tenant schema
    pub user_id: i64,

    pub tenant: TenantClaim,

    /// Role name, e.g. `doctor`
    pub role: String,
}

impl AuthContext {
    /// Fails with 403 unless the caller has one of `roles`
    pub fn require_role(&self, roles: &[&str]) -> Result<(), ApiError> {
        if roles.contains(&self.role.as_str()) {
            Ok(())
        } else {
            tracing::debug!(role = %self.role, required = ?roles, "Role not permitted");
            Err(ApiError::Forbidden("Insufficient permissions".to_string()))
        }
    }
}

/// JWT authentication middleware layer
///
/// Extracts and validates the Bearer token, checks it belongs to the tenant
/// of this request and that its user is still valid there, then injects
/// [`AuthContext`] into request extensions.
pub async fn tenant_auth_layer(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("Missing authorization header".to_string()))?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(|| ApiError::BadRequest("Expected Bearer token".to_string()))?;

    let claims = validate_token(token, state.jwt_secret())?;

    let schema = req
        .extensions()
        .get::<TenantContext>()
        .map(TenantContext::schema)
        .unwrap_or_else(current_schema);

    if !claims.tenant.matches(schema) {
        tracing::warn!(
            user_id = claims.sub,
            token_tenant = %claims.tenant,
            schema = %schema,
            "Token used on another tenant's host"
        );
        return Err(ApiError::Forbidden(
            "Token was not issued for this tenant".to_string(),
        ));
    }

    let account = state.accounts.find_by_id(claims.sub).await?;
    let Some(account) = account.filter(|a| a.is_active && a.role == claims.role) else {
        tracing::info!(user_id = claims.sub, schema = %schema, "Token user is gone, inactive or changed role");
        return Err(ApiError::Unauthorized("Token is no longer valid".to_string()));
    };

    req.extensions_mut().insert(AuthContext {
        user_id: account.id,
        tenant: claims.tenant,
        role: account.role,
    });

    Ok(next.run(req).await)
}
