/// Error handling for the API server
///
/// This module provides a unified error type that maps to HTTP responses.
/// All handlers should return `Result<T, ApiError>` which automatically
/// converts to appropriate HTTP status codes. Every domain error of the
/// shared crate converts into it with `?`:
///
/// | Domain error | Status |
/// |---|---|
/// | `DirectoryError::TenantNotFound` | 404 |
/// | `DbError::PoolExhausted` | 503 |
/// | `SecretStoreError::Unavailable` | 503 |
/// | `SecretStoreError::TokenNotFound` | 404 |
/// | `ProvisioningError::PartialFailure` | 500 |
/// | `AccountError::EmailTaken` | 409 |
///
/// # Example
///
/// ```
/// use clinicore_api::error::{ApiError, ApiResult};
/// use axum::Json;
/// use serde_json::json;
///
/// async fn handler() -> ApiResult<Json<serde_json::Value>> {
///     Err(ApiError::NotFound("Patient not found".to_string()))
/// }
/// ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use clinicore_shared::auth::accounts::AccountError;
use clinicore_shared::auth::jwt::JwtError;
use clinicore_shared::auth::password::PasswordError;
use clinicore_shared::db::DbError;
use clinicore_shared::secrets::SecretStoreError;
use clinicore_shared::tenancy::{DirectoryError, ProvisioningError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// API result type alias
pub type ApiResult<T> = Result<T, ApiError>;

/// Unified API error type
#[derive(Debug)]
pub enum ApiError {
    /// Bad request (400)
    BadRequest(String),

    /// Unauthorized (401)
    Unauthorized(String),

    /// Forbidden (403)
    Forbidden(String),

    /// Not found (404)
    NotFound(String),

    /// Conflict (409) - e.g., subdomain already taken
    Conflict(String),

    /// Unprocessable entity (422) - validation errors
    ValidationError(Vec<ValidationErrorDetail>),

    /// Tenant provisioning stopped half way (500)
    ProvisioningFailed { tenant_id: i64, stage: String },

    /// Internal server error (500)
    InternalError(String),

    /// Upstream answered with garbage (502)
    BadGateway(String),

    /// Service unavailable (503)
    ServiceUnavailable(String),
}

/// Validation error detail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationErrorDetail {
    /// Field that failed validation
    pub field: String,

    /// Error message
    pub message: String,
}

/// Error response format
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error code (e.g., "not_found", "service_unavailable")
    pub error: String,

    /// Human-readable error message
    pub message: String,

    /// Optional validation errors
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<ValidationErrorDetail>>,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            ApiError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            ApiError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            ApiError::NotFound(msg) => write!(f, "Not found: {}", msg),
            ApiError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            ApiError::ValidationError(errors) => {
                write!(f, "Validation failed: {} errors", errors.len())
            }
            ApiError::ProvisioningFailed { tenant_id, stage } => {
                write!(f, "Provisioning of tenant {} failed at stage {}", tenant_id, stage)
            }
            ApiError::InternalError(msg) => write!(f, "Internal error: {}", msg),
            ApiError::BadGateway(msg) => write!(f, "Bad gateway: {}", msg),
            ApiError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg, None),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg, None),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", msg, None),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg, None),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg, None),
            ApiError::ValidationError(errors) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "validation_error",
                "Request validation failed".to_string(),
                Some(errors),
            ),
            ApiError::ProvisioningFailed { tenant_id, stage } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "provisioning_failed",
                format!("Provisioning of tenant {} failed at stage {}", tenant_id, stage),
                None,
            ),
            ApiError::InternalError(msg) => {
                // Log internal errors but don't expose details to clients
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
            ApiError::BadGateway(msg) => {
                tracing::error!("Bad gateway: {}", msg);
                (
                    StatusCode::BAD_GATEWAY,
                    "bad_gateway",
                    "An upstream service returned an invalid response".to_string(),
                    None,
                )
            }
            ApiError::ServiceUnavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "service_unavailable",
                msg,
                None,
            ),
        };

        let body = Json(ErrorResponse {
            error: error_code.to_string(),
            message,
            details,
        });

        (status, body).into_response()
    }
}

/// Convert request validation failures to API errors
impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut details: Vec<ValidationErrorDetail> = errors
            .field_errors()
            .iter()
            .flat_map(|(field, errors)| {
                errors.iter().map(move |error| ValidationErrorDetail {
                    field: field.to_string(),
                    message: error
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| "Validation failed".to_string()),
                })
            })
            .collect();
        details.sort_by(|a, b| a.field.cmp(&b.field));

        ApiError::ValidationError(details)
    }
}

/// Convert data access errors to API errors
impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::PoolExhausted => {
                ApiError::ServiceUnavailable("Database connection pool exhausted".to_string())
            }
            DbError::Database(sqlx::Error::RowNotFound) => {
                ApiError::NotFound("Resource not found".to_string())
            }
            DbError::Database(sqlx::Error::Database(db_err)) => {
                // Check for unique constraint violations
                if db_err.is_unique_violation() {
                    return ApiError::Conflict(match db_err.constraint() {
                        Some(constraint) => format!("Constraint violation: {}", constraint),
                        None => "Resource already exists".to_string(),
                    });
                }

                // Other database errors are internal
                ApiError::InternalError(format!("Database error: {}", db_err))
            }
            DbError::Database(err) => ApiError::InternalError(format!("Database error: {}", err)),
        }
    }
}

/// Convert sqlx errors to API errors
impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        DbError::from(err).into()
    }
}

/// Convert tenant directory errors to API errors
impl From<DirectoryError> for ApiError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::TenantNotFound { host } => {
                tracing::debug!(host = %host, "No active tenant for host");
                ApiError::NotFound("Tenant not found".to_string())
            }
            DirectoryError::UnknownTenant(id) => ApiError::NotFound(format!("Tenant {} not found or not provisioned", id)),
            DirectoryError::Db(err) => err.into(),
        }
    }
}

/// Convert secret store errors to API errors
///
/// An unreachable store is a 503; nothing falls back to plaintext.
impl From<SecretStoreError> for ApiError {
    fn from(err: SecretStoreError) -> Self {
        match err {
            SecretStoreError::TokenNotFound { tenant_id, role } => {
                tracing::error!(tenant_id, role = %role, "No secret store token provisioned");
                ApiError::NotFound(format!("No access token provisioned for role {}", role))
            }
            SecretStoreError::Unavailable(msg) => {
                tracing::warn!(error = %msg, "Secret store unavailable");
                ApiError::ServiceUnavailable("Secret store unavailable".to_string())
            }
            SecretStoreError::UnknownRole(role) => {
                ApiError::Forbidden(format!("Role {} has no access policy", role))
            }
            err @ SecretStoreError::Forbidden { .. } => ApiError::Forbidden(err.to_string()),
            SecretStoreError::Rejected(msg) => ApiError::BadRequest(msg),
            SecretStoreError::InvalidResponse(msg) => ApiError::BadGateway(msg),
        }
    }
}

/// Convert provisioning errors to API errors
impl From<ProvisioningError> for ApiError {
    fn from(err: ProvisioningError) -> Self {
        match err {
            ProvisioningError::InvalidRequest(msg) => ApiError::BadRequest(msg),
            ProvisioningError::Conflict(msg) => ApiError::Conflict(msg),
            ProvisioningError::Db(err) => err.into(),
            ProvisioningError::PartialFailure {
                tenant_id, stage, ..
            } => ApiError::ProvisioningFailed {
                tenant_id,
                stage: stage.to_string(),
            },
            ProvisioningError::Internal(msg) => ApiError::InternalError(msg),
        }
    }
}

/// Convert account errors to API errors
impl From<AccountError> for ApiError {
    fn from(err: AccountError) -> Self {
        match err {
            AccountError::EmailTaken => {
                ApiError::Conflict("Email is already registered".to_string())
            }
            AccountError::UnknownRole(role) => {
                ApiError::BadRequest(format!("Role {} is not available", role))
            }
            AccountError::Db(err) => err.into(),
        }
    }
}

/// Convert password errors to API errors
impl From<PasswordError> for ApiError {
    fn from(err: PasswordError) -> Self {
        ApiError::InternalError(format!("Password operation failed: {}", err))
    }
}

/// Convert JWT errors to API errors
impl From<JwtError> for ApiError {
    fn from(err: JwtError) -> Self {
        match err {
            JwtError::Expired => ApiError::Unauthorized("Token expired".to_string()),
            _ => ApiError::Unauthorized(format!("Invalid token: {}", err)),
        }
    }
}
