/// Field encryption endpoints
///
/// Clinical fields are encrypted with the clinic's transit key before they
/// are stored. The caller's role token is used, so what a role may do is
/// decided by the secret store policy:
///
/// - `POST /v1/crypto/encrypt` `{ "plaintext": "..." }` -> `{ "ciphertext": "vault:v1:..." }`
/// - `POST /v1/crypto/decrypt` `{ "ciphertext": "..." }` -> `{ "plaintext": "..." }`
///
/// # Errors
///
/// - `403 Forbidden`: the role's policy does not allow the operation
/// - `404 Not Found`: no token was provisioned for the role
/// - `503 Service Unavailable`: the secret store cannot be reached

use axum::{extract::State, Extension, Json};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
    middleware::{auth::AuthContext, tenant::CurrentTenant},
};

/// Largest accepted plaintext, in bytes
const MAX_PLAINTEXT_LEN: u64 = 64 * 1024;

#[derive(Debug, Deserialize, Validate)]
pub struct EncryptRequest {
    #[validate(length(min = 1, max = 65536, message = "Plaintext must be 1 to 65536 bytes"))]
    pub plaintext: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EncryptResponse {
    pub ciphertext: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct DecryptRequest {
    #[validate(length(min = 1, message = "Ciphertext is required"))]
    pub ciphertext: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DecryptResponse {
    pub plaintext: String,
}

pub async fn encrypt(
    State(state): State<AppState>,
    CurrentTenant(tenant): CurrentTenant,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<EncryptRequest>,
) -> ApiResult<Json<EncryptResponse>> {
    req.validate()?;
    if req.plaintext.len() as u64 > MAX_PLAINTEXT_LEN {
        return Err(ApiError::BadRequest("Plaintext is too large".to_string()));
    }

    let ciphertext = state
        .secrets
        .encrypt(tenant.id, &auth.role, req.plaintext.as_bytes())
        .await?;

    Ok(Json(EncryptResponse { ciphertext }))
}

pub async fn decrypt(
    State(state): State<AppState>,
    CurrentTenant(tenant): CurrentTenant,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<DecryptRequest>,
) -> ApiResult<Json<DecryptResponse>> {
    req.validate()?;

    let plaintext = state
        .secrets
        .decrypt(tenant.id, &auth.role, &req.ciphertext)
        .await?;
    let plaintext = String::from_utf8(plaintext)
        .map_err(|_| ApiError::BadRequest("Decrypted value is not UTF-8 text".to_string()))?;

    Ok(Json(DecryptResponse { plaintext }))
}
