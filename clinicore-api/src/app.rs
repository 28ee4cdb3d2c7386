/// Application state and router builder
///
/// This module defines the shared application state and provides
/// a function to build the Axum router with all routes and middleware.
///
/// # Example
///
/// ```no_run
/// use clinicore_api::{app::{build_router, AppState}, config::Config};
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = Config::from_env()?;
/// let state = AppState::from_config(config).await?;
/// let app = build_router(state);
/// # Ok(())
/// # }
/// ```

use crate::{
    config::{BootstrapAdmin, Config, SecretBackend},
    middleware::{
        auth::tenant_auth_layer,
        security::set_security_headers,
        tenant::{require_public, require_tenant, resolve_tenant},
    },
};
use anyhow::Context;
use axum::{
    http::{header, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state, map_response_with_state},
    routing::{get, post},
    Router,
};
use clinicore_shared::auth::accounts::{AccountStore, NewAccount, PgAccountStore};
use clinicore_shared::auth::password::hash_password;
use clinicore_shared::db::migrations::run_migrations;
use clinicore_shared::db::pool::create_pool;
use clinicore_shared::db::SchemaRouter;
use clinicore_shared::secrets::{MemorySecretStore, SecretStore, VaultSecretStore};
use clinicore_shared::tenancy::{
    PgTenantStore, SchemaContext, SchemaName, TenantDirectory, TenantProvisioner,
};
use std::sync::Arc;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

/// Shared application state
///
/// This is cloned for each request handler via Axum's `State` extractor.
/// Uses Arc internally for cheap cloning.
#[derive(Clone)]
pub struct AppState {
    /// The only source of database connections
    pub router: SchemaRouter,

    /// Host to tenant resolution
    pub directory: Arc<TenantDirectory>,

    pub secrets: Arc<dyn SecretStore>,

    /// Users who can sign in, in the schema of the request
    pub accounts: Arc<dyn AccountStore>,

    pub provisioner: TenantProvisioner,

    /// Application configuration
    pub config: Arc<Config>,
}

impl AppState {
    /// Creates new application state
    pub fn new(
        router: SchemaRouter,
        directory: Arc<TenantDirectory>,
        secrets: Arc<dyn SecretStore>,
        accounts: Arc<dyn AccountStore>,
        config: Config,
    ) -> Self {
        Self {
            provisioner: TenantProvisioner::new(router.clone(), secrets.clone()),
            router,
            directory,
            secrets,
            accounts,
            config: Arc::new(config),
        }
    }

    /// Connects to PostgreSQL, applies migrations, builds the secret store and
    /// creates the bootstrap operator if configured
    ///
    /// # Errors
    ///
    /// Fails if the database is unreachable, a migration fails, the secret
    /// store client cannot be built or the operator cannot be created.
    pub async fn from_config(config: Config) -> anyhow::Result<Self> {
        let pool = create_pool(config.database_config())
            .await
            .context("Failed to connect to PostgreSQL")?;
        let router = SchemaRouter::new(pool);

        run_migrations(&router)
            .await
            .context("Failed to run database migrations")?;

        let secrets: Arc<dyn SecretStore> = match (config.secrets.backend, &config.secrets.vault) {
            (SecretBackend::Vault, Some(vault)) => Arc::new(
                VaultSecretStore::new(vault.clone()).context("Failed to build the Vault client")?,
            ),
            (SecretBackend::Vault, None) => anyhow::bail!("Vault backend selected without settings"),
            (SecretBackend::Memory, _) => {
                tracing::warn!("Using the in-memory secret store; keys are lost on restart");
                Arc::new(MemorySecretStore::with_token_ttl(config.secrets.token_ttl))
            }
        };

        let directory = Arc::new(TenantDirectory::new(
            Arc::new(PgTenantStore::new(router.clone())),
            config.directory_config(),
        ));

        let accounts: Arc<dyn AccountStore> = Arc::new(PgAccountStore::new(router.clone()));
        if let Some(admin) = &config.bootstrap_admin {
            ensure_platform_admin(accounts.as_ref(), admin)
                .await
                .context("Failed to create the bootstrap platform operator")?;
        }

        Ok(Self::new(router, directory, secrets, accounts, config))
    }

    /// Gets JWT secret for token operations
    pub fn jwt_secret(&self) -> &str {
        &self.config.jwt.secret
    }
}

/// Creates the platform operator unless an account with that email exists
///
/// Returns whether an account was created.
pub async fn ensure_platform_admin(
    accounts: &dyn AccountStore,
    admin: &BootstrapAdmin,
) -> anyhow::Result<bool> {
    SchemaContext::scope(SchemaName::Public, create_platform_admin(accounts, admin)).await
}

async fn create_platform_admin(
    accounts: &dyn AccountStore,
    admin: &BootstrapAdmin,
) -> anyhow::Result<bool> {
    if accounts.find_by_email(&admin.email).await?.is_some() {
        tracing::debug!(email = %admin.email, "Platform operator already exists");
        return Ok(false);
    }

    let password = admin.password.clone();
    let password_hash = tokio::task::spawn_blocking(move || hash_password(&password)).await??;
    let account = accounts
        .create(NewAccount {
            email: admin.email.clone(),
            password_hash,
            role: "super_admin".to_string(),
        })
        .await?;

    tracing::info!(user_id = account.id, email = %account.email, "Created platform operator");
    Ok(true)
}

/// Builds the complete Axum router with all routes and middleware
///
/// # Architecture
///
/// ```text
/// /
/// ├── GET /health                          # any host, no tenant resolution
/// └── /v1/                                 # tenant resolution from Host
///     ├── GET  /context                    # any resolved host
///     ├── POST /auth/login                 # any resolved host
///     ├── POST /auth/signup                # tenant host
///     ├── GET  /tenant                     # tenant host
///     ├── GET  /roles                      # tenant host, authenticated
///     ├── POST /crypto/encrypt             # tenant host, authenticated
///     ├── POST /crypto/decrypt             # tenant host, authenticated
///     └── /tenants                         # main domain, super_admin
///         ├── POST /
///         ├── POST /:id/deactivate
///         ├── POST /:id/activate
///         └── POST /:id/rotate-key
/// ```
///
/// # Middleware Stack
///
/// Applied in order (outermost first):
/// 1. Security headers
/// 2. CORS (tower-http CorsLayer)
/// 3. Logging (tower-http TraceLayer)
/// 4. Tenant resolution and schema scope (`/v1` only)
/// 5. Host guard, then authentication (per route group)
pub fn build_router(state: AppState) -> Router {
    use crate::routes;

    // Health check (any host, no tenant resolution)
    let health_routes = Router::new().route("/health", get(routes::health::health_check));

    // Any resolved host
    let context_routes = Router::new()
        .route("/context", get(routes::tenant::get_context))
        .route("/auth/login", post(routes::auth::login));

    // Tenant hosts, anonymous
    let tenant_info_routes = Router::new()
        .route("/tenant", get(routes::tenant::get_tenant))
        .route("/auth/signup", post(routes::auth::signup))
        .route_layer(from_fn(require_tenant));

    // Tenant hosts, authenticated
    let tenant_routes = Router::new()
        .route("/roles", get(routes::roles::list_roles))
        .route("/crypto/encrypt", post(routes::crypto::encrypt))
        .route("/crypto/decrypt", post(routes::crypto::decrypt))
        .route_layer(from_fn_with_state(state.clone(), tenant_auth_layer))
        .route_layer(from_fn(require_tenant));

    // Main domain, authenticated
    let platform_routes = Router::new()
        .route("/tenants", post(routes::tenants::create_tenant))
        .route("/tenants/:id/deactivate", post(routes::tenants::deactivate_tenant))
        .route("/tenants/:id/activate", post(routes::tenants::activate_tenant))
        .route("/tenants/:id/rotate-key", post(routes::tenants::rotate_key))
        .route_layer(from_fn_with_state(state.clone(), tenant_auth_layer))
        .route_layer(from_fn(require_public));

    let v1_routes = Router::new()
        .merge(context_routes)
        .merge(tenant_info_routes)
        .merge(tenant_routes)
        .merge(platform_routes)
        .layer(from_fn_with_state(state.clone(), resolve_tenant));

    // Configure CORS based on environment
    let cors = if state.config.api.cors_origins.iter().any(|origin| origin == "*") {
        // Development mode: permissive CORS
        CorsLayer::permissive()
    } else {
        let origins: Vec<HeaderValue> = state
            .config
            .api
            .cors_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
            .allow_credentials(true)
            .max_age(std::time::Duration::from_secs(3600))
    };

    Router::new()
        .merge(health_routes)
        .nest("/v1", v1_routes)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors)
        .layer(map_response_with_state(
            state.config.api.production,
            set_security_headers,
        ))
        .with_state(state)
}
