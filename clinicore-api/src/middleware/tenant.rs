/// Tenant resolution middleware
///
/// Runs before every `/v1` handler:
///
/// 1. reads the `Host` header (nothing else decides the tenant)
/// 2. asks the [`TenantDirectory`](clinicore_shared::tenancy::TenantDirectory)
///    which tenant the host belongs to
/// 3. for a tenant host, runs the rest of the stack inside
///    [`SchemaContext::scope`] so every connection checked out while the
///    request is handled is bound to `tenant_{id}`
///
/// A host without an active tenant ends the request with a 404 before the
/// handler runs. The schema scope ends with the request future, whichever
/// way it completes.
///
/// The resolved [`TenantContext`] is also attached to the request
/// extensions for handlers and guards.

use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::Response,
};
use clinicore_shared::models::tenant::Tenant;
use clinicore_shared::tenancy::{Resolution, SchemaContext, SchemaName};
use tracing::{info_span, Instrument};

use crate::{app::AppState, error::ApiError};

/// The tenant a request was resolved to
#[derive(Debug, Clone)]
pub enum TenantContext {
    /// Main domain or a local alias
    Public,
    Tenant(Tenant),
}

impl TenantContext {
    pub fn schema(&self) -> SchemaName {
        match self {
            TenantContext::Public => SchemaName::Public,
            TenantContext::Tenant(tenant) => tenant.schema(),
        }
    }

    pub fn tenant(&self) -> Option<&Tenant> {
        match self {
            TenantContext::Public => None,
            TenantContext::Tenant(tenant) => Some(tenant),
        }
    }

    pub fn is_public(&self) -> bool {
        matches!(self, TenantContext::Public)
    }
}

impl From<Resolution> for TenantContext {
    fn from(resolution: Resolution) -> Self {
        match resolution {
            Resolution::Public => TenantContext::Public,
            Resolution::Tenant(tenant) => TenantContext::Tenant(tenant),
        }
    }
}

/// Resolves the tenant from the `Host` header and scopes the request to its schema
pub async fn resolve_tenant(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let host = req
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
        .ok_or_else(|| {
            tracing::debug!(path = %req.uri().path(), "Request without a usable Host header");
            ApiError::NotFound("Tenant not found".to_string())
        })?;

    let context = TenantContext::from(state.directory.resolve(&host).await?);

    match context {
        TenantContext::Public => {
            req.extensions_mut().insert(TenantContext::Public);
            Ok(next.run(req).await)
        }
        TenantContext::Tenant(tenant) => {
            let schema = tenant.schema();
            let span = info_span!("tenant_request", tenant_id = tenant.id, schema = %schema);
            req.extensions_mut().insert(TenantContext::Tenant(tenant));

            Ok(SchemaContext::scope(schema, next.run(req))
                .instrument(span)
                .await)
        }
    }
}

/// Only lets requests on the main domain through
pub async fn require_public(req: Request, next: Next) -> Result<Response, ApiError> {
    match req.extensions().get::<TenantContext>() {
        Some(TenantContext::Public) => Ok(next.run(req).await),
        _ => Err(ApiError::NotFound("Not found".to_string())),
    }
}

/// Only lets requests on a tenant host through
pub async fn require_tenant(req: Request, next: Next) -> Result<Response, ApiError> {
    match req.extensions().get::<TenantContext>() {
        Some(TenantContext::Tenant(_)) => Ok(next.run(req).await),
        _ => Err(ApiError::NotFound("Not found".to_string())),
    }
}

/// Extractor for the tenant of a request on a tenant host
///
/// ```
/// use clinicore_api::middleware::tenant::CurrentTenant;
///
/// async fn handler(CurrentTenant(tenant): CurrentTenant) -> String {
///     format!("Hello from {}", tenant.name)
/// }
/// ```
#[derive(Debug, Clone)]
pub struct CurrentTenant(pub Tenant);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentTenant
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match parts.extensions.get::<TenantContext>() {
            Some(TenantContext::Tenant(tenant)) => Ok(CurrentTenant(tenant.clone())),
            _ => Err(ApiError::NotFound("Tenant not found".to_string())),
        }
    }
}
