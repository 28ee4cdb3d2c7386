//! Schema-routing data access layer
//!
//! [`SchemaRouter`] is the only way application code obtains a database
//! connection. Every checkout runs exactly one statement before the caller
//! sees the connection:
//!
//! ```sql
//! SELECT set_config('search_path', $1, false)
//! ```
//!
//! with the schema bound as a parameter. Pooled connections are reused across
//! tenants, so the search path is re-applied on every checkout rather than
//! once per physical connection; whatever a previous request left behind is
//! overwritten before any statement of the new owner runs.
//!
//! A [`TenantConnection`] owns its physical connection exclusively until it
//! is dropped and returned to the pool, so no other task can issue statements
//! on it mid unit-of-work.

use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnection, PgPool};
use sqlx::{Connection, Postgres, Transaction};
use std::ops::{Deref, DerefMut};
use tracing::{debug, warn};

use super::pool::PoolStats;
use crate::tenancy::context::SchemaContext;
use crate::tenancy::schema::SchemaName;

/// Errors raised by the data access layer
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// No pooled connection became free within the acquire timeout
    #[error("Connection pool exhausted: no connection available within the acquire timeout")]
    PoolExhausted,

    /// Any other database failure
    #[error("Database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,
            other => DbError::Database(other),
        }
    }
}

/// Hands out pooled connections bound to the right schema
#[derive(Clone, Debug)]
pub struct SchemaRouter {
    pool: PgPool,
}

impl SchemaRouter {
    /// Wraps a pool; the pool's acquire timeout bounds every checkout
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Checks out a connection bound to the schema of the current request
    ///
    /// # Errors
    ///
    /// - `DbError::PoolExhausted` when no connection frees up in time
    /// - `DbError::Database` when the search path cannot be applied
    pub async fn acquire(&self) -> Result<TenantConnection, DbError> {
        self.acquire_for(SchemaContext::current()).await
    }

    /// Checks out a connection bound to the platform schema
    pub async fn acquire_public(&self) -> Result<TenantConnection, DbError> {
        self.acquire_for(SchemaName::Public).await
    }

    /// Checks out a connection bound to an explicit schema
    ///
    /// Used by provisioning and platform code that works on a tenant outside
    /// of that tenant's requests.
    pub async fn acquire_for(&self, schema: SchemaName) -> Result<TenantConnection, DbError> {
        let mut conn = self.pool.acquire().await.map_err(|e| {
            let err = DbError::from(e);
            if matches!(err, DbError::PoolExhausted) {
                let stats = PoolStats::of(&self.pool);
                warn!(
                    schema = %schema,
                    in_use = stats.in_use,
                    max_size = stats.max_size,
                    "Connection pool exhausted"
                );
            }
            err
        })?;

        // If this fails the connection is dropped here and goes back to the
        // pool; the next checkout overwrites whatever state it holds.
        bind_search_path(&mut conn, schema).await?;

        debug!(schema = %schema, "Checked out connection");
        Ok(TenantConnection { conn, schema })
    }

    /// Statistics of the underlying pool
    pub fn pool_stats(&self) -> PoolStats {
        PoolStats::of(&self.pool)
    }

    /// Runs a liveness query on a platform-bound connection
    pub async fn ping(&self) -> Result<(), DbError> {
        let mut conn = self.acquire_public().await?;
        sqlx::query("SELECT 1").execute(&mut *conn).await?;
        Ok(())
    }

    /// Closes the pool; outstanding connections are closed when returned
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Applies `schema` as the session search path of `conn`
pub(crate) async fn bind_search_path(
    conn: &mut PgConnection,
    schema: SchemaName,
) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT set_config('search_path', $1, false)")
        .bind(schema.to_string())
        .execute(conn)
        .await?;
    Ok(())
}

/// A pooled connection bound to one schema
///
/// Dereferences to [`PgConnection`], so it can be used as an executor with
/// `&mut *conn`. The connection returns to the pool on drop.
pub struct TenantConnection {
    conn: PoolConnection<Postgres>,
    schema: SchemaName,
}

impl TenantConnection {
    /// Schema this connection was bound to at checkout
    pub fn schema(&self) -> SchemaName {
        self.schema
    }

    /// Starts a transaction on this connection
    pub async fn begin(&mut self) -> Result<Transaction<'_, Postgres>, DbError> {
        let conn: &mut PgConnection = &mut self.conn;
        Ok(conn.begin().await?)
    }

    /// The search path as reported by the server
    pub async fn search_path(&mut self) -> Result<String, DbError> {
        let path: String = sqlx::query_scalar("SELECT current_setting('search_path')")
            .fetch_one(&mut *self.conn)
            .await?;
        Ok(path)
    }
}

impl Deref for TenantConnection {
    type Target = PgConnection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl DerefMut for TenantConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}

impl std::fmt::Debug for TenantConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantConnection")
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}
