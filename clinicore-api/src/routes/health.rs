/// Health check endpoint
///
/// Served on every host, outside tenant resolution, so load balancers can
/// probe the service by IP.
///
/// # Endpoint
///
/// ```text
/// GET /health
/// ```
///
/// # Response
///
/// ```json
/// {
///   "status": "healthy",
///   "version": "0.1.0",
///   "database": "connected",
///   "pool": { "in_use": 1, "idle": 3, "size": 4, "max_size": 20 }
/// }
/// ```

use crate::{app::AppState, error::ApiResult};
use axum::{extract::State, Json};
use clinicore_shared::db::pool::PoolStats;
use serde::Serialize;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `healthy` or `degraded`
    pub status: &'static str,

    pub version: &'static str,

    /// `connected` or `disconnected`
    pub database: &'static str,

    pub pool: PoolStats,
}

/// Reports liveness, database connectivity and pool usage
///
/// Always answers 200; an unreachable database or a pool with every
/// connection checked out shows up as `degraded`.
pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    let pool = state.router.pool_stats();
    let database = match state.router.ping().await {
        Ok(()) => "connected",
        Err(e) => {
            tracing::warn!(error = %e, "Health check could not reach the database");
            "disconnected"
        }
    };

    Ok(Json(HealthResponse {
        status: overall_status(database == "connected", &pool),
        version: env!("CARGO_PKG_VERSION"),
        database,
        pool,
    }))
}

fn overall_status(database_connected: bool, pool: &PoolStats) -> &'static str {
    if database_connected && !pool.is_saturated() {
        "healthy"
    } else {
        "degraded"
    }
}
