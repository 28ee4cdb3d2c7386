//! Bounded PostgreSQL pool
//!
//! One pool serves the platform and every tenant. It is never queried
//! directly by application code: [`SchemaRouter`](super::routing::SchemaRouter)
//! owns it and binds each checked-out connection to a schema first.
//!
//! The pool size is the hard ceiling on concurrent database work. When all
//! connections are checked out, a checkout waits at most `acquire_timeout`
//! and then fails with `PoolExhausted`.
//!
//! ```no_run
//! use clinicore_shared::db::pool::{create_pool, DatabaseConfig};
//!
//! # async fn example() -> Result<(), sqlx::Error> {
//! let pool = create_pool(DatabaseConfig::new("postgresql://clinicore@localhost/clinicore")).await?;
//! # Ok(())
//! # }
//! ```

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{debug, info};

/// Pool sizing and connection lifecycle
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,

    /// Upper bound on open connections (default 20)
    pub max_connections: u32,

    /// Connections kept open while idle (default 2)
    pub min_connections: u32,

    /// Longest a checkout waits for a free connection (default 5s)
    pub acquire_timeout: Duration,

    /// Idle connections above `min_connections` are closed after this
    pub idle_timeout: Option<Duration>,

    /// Connections are recycled after this age
    pub max_lifetime: Option<Duration>,
}

impl DatabaseConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    fn pool_options(&self) -> PgPoolOptions {
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .min_connections(self.min_connections.min(self.max_connections))
            .acquire_timeout(self.acquire_timeout)
            .idle_timeout(self.idle_timeout)
            .max_lifetime(self.max_lifetime)
            // Dead connections are dropped before search_path is bound.
            .test_before_acquire(true)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 20,
            min_connections: 2,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Some(Duration::from_secs(600)),
            max_lifetime: Some(Duration::from_secs(1800)),
        }
    }
}

/// Connects the pool and verifies the database answers
///
/// # Errors
///
/// Fails on a malformed URL, when no connection can be opened within the
/// acquire timeout, or when the liveness query does not return `1`.
pub async fn create_pool(config: DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        acquire_timeout_ms = config.acquire_timeout.as_millis() as u64,
        "Connecting database pool"
    );

    let pool = config.pool_options().connect(&config.url).await?;
    ping(&pool).await?;

    info!("Database pool ready");
    Ok(pool)
}

/// Builds the pool without connecting; the first checkout opens a connection
pub fn create_lazy_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    config.pool_options().connect_lazy(&config.url)
}

/// `SELECT 1` on any connection of the pool
pub async fn ping(pool: &PgPool) -> Result<(), sqlx::Error> {
    let (one,): (i32,) = sqlx::query_as("SELECT 1").fetch_one(pool).await?;
    if one != 1 {
        return Err(sqlx::Error::Protocol(format!(
            "liveness query returned {one}"
        )));
    }
    debug!("Database ping ok");
    Ok(())
}

/// Point-in-time pool usage, reported by `/health`
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct PoolStats {
    /// Connections currently checked out
    pub in_use: u32,
    pub idle: u32,
    /// Open connections, checked out or idle
    pub size: u32,
    pub max_size: u32,
}

impl PoolStats {
    pub fn of(pool: &PgPool) -> Self {
        let size = pool.size();
        let idle = (pool.num_idle() as u32).min(size);

        Self {
            in_use: size - idle,
            idle,
            size,
            max_size: pool.options().get_max_connections(),
        }
    }

    /// Whether every connection the pool may open is checked out
    pub fn is_saturated(&self) -> bool {
        self.in_use >= self.max_size
    }
}
