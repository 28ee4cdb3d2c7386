/// Authentication endpoints
///
/// Tokens are issued for the schema the request resolved to: a login on
/// `clinica.mainapp.example.com` yields a token for that clinic only, a login
/// on the main domain a platform token.
///
/// # Endpoints
///
/// - `POST /v1/auth/login` - any resolved host
/// - `POST /v1/auth/signup` - clinic hosts; new users get the `patient` role

use axum::{extract::State, http::StatusCode, Json};
use clinicore_shared::auth::{
    accounts::{Account, NewAccount},
    jwt::{create_token, Claims, TenantClaim},
    password::{hash_password, validate_password_strength, verify_password},
};
use clinicore_shared::tenancy::current_schema;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{
    app::AppState,
    error::{ApiError, ApiResult, ValidationErrorDetail},
};

/// Role given to users who register themselves
const SIGNUP_ROLE: &str = "patient";

/// Login request
#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

/// Signup request
#[derive(Debug, Deserialize, Validate)]
pub struct SignupRequest {
    #[validate(
        email(message = "Invalid email format"),
        length(max = 100, message = "Email must be at most 100 characters")
    )]
    pub email: String,

    /// Checked against the password strength rules
    pub password: String,
}

/// Issued access token
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,

    /// Always `bearer`
    pub token_type: &'static str,

    pub user_id: i64,
    pub role: String,
}

fn invalid_credentials() -> ApiError {
    ApiError::Unauthorized("Invalid credentials".to_string())
}

fn issue_token(state: &AppState, account: &Account) -> ApiResult<TokenResponse> {
    let claims = Claims::new(
        account.id,
        TenantClaim::from(current_schema()),
        account.role.clone(),
    );

    Ok(TokenResponse {
        access_token: create_token(&claims, state.jwt_secret())?,
        token_type: "bearer",
        user_id: account.id,
        role: account.role.clone(),
    })
}

/// Login endpoint
///
/// ```text
/// POST /v1/auth/login
/// Host: clinica.mainapp.example.com
///
/// { "email": "doctor@clinica.example.com", "password": "..." }
/// ```
///
/// # Errors
///
/// - `401 Unauthorized`: unknown email, wrong password or deactivated user;
///   the response does not say which
/// - `422 Unprocessable Entity`: malformed request
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<TokenResponse>> {
    req.validate()?;

    let account = state
        .accounts
        .find_by_email(&req.email)
        .await?
        .filter(|account| account.is_active)
        .ok_or_else(invalid_credentials)?;

    let hash = account.password_hash.clone();
    let valid = tokio::task::spawn_blocking(move || verify_password(&req.password, &hash))
        .await
        .map_err(|e| ApiError::InternalError(format!("password verification task: {e}")))??;
    if !valid {
        tracing::info!(user_id = account.id, schema = %current_schema(), "Login rejected");
        return Err(invalid_credentials());
    }

    tracing::info!(user_id = account.id, schema = %current_schema(), role = %account.role, "User logged in");
    Ok(Json(issue_token(&state, &account)?))
}

/// Signup endpoint
///
/// Registers a patient of the clinic serving this host and returns a token.
///
/// # Errors
///
/// - `409 Conflict`: email already registered in this clinic
/// - `422 Unprocessable Entity`: invalid email or weak password
pub async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> ApiResult<(StatusCode, Json<TokenResponse>)> {
    req.validate()?;
    validate_password_strength(&req.password).map_err(|message| {
        ApiError::ValidationError(vec![ValidationErrorDetail {
            field: "password".to_string(),
            message,
        }])
    })?;

    let password = req.password;
    let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| ApiError::InternalError(format!("password hashing task: {e}")))??;

    let account = state
        .accounts
        .create(NewAccount {
            email: req.email,
            password_hash,
            role: SIGNUP_ROLE.to_string(),
        })
        .await?;

    tracing::info!(user_id = account.id, schema = %current_schema(), "Patient signed up");
    Ok((StatusCode::CREATED, Json(issue_token(&state, &account)?)))
}
