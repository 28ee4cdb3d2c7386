//! Platform schema migrations
//!
//! The `public` schema (tenant registry, plans, billing ledger, FAQ) is
//! managed with sqlx migrations stored in `migrations/` at the workspace root.
//! Tenant schemas are not migrated here; they are built by the provisioner
//! from [`TENANT_TABLES`](super::tables::TENANT_TABLES).
//!
//! Migrations run on a connection bound to `public` so that the
//! `_sqlx_migrations` bookkeeping table never lands in a tenant schema.

use sqlx::migrate::{MigrateDatabase, MigrateError};
use sqlx::Postgres;
use tracing::{debug, info, warn};

use super::routing::{DbError, SchemaRouter};

/// Migration status information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStatus {
    /// Number of migrations that have been applied
    pub applied_migrations: usize,

    /// Latest applied migration version
    pub latest_version: Option<i64>,

    /// Whether every embedded migration has been applied
    pub is_up_to_date: bool,
}

/// Runs all pending platform migrations
///
/// # Errors
///
/// Returns an error if a connection cannot be checked out or a migration fails.
pub async fn run_migrations(router: &SchemaRouter) -> Result<(), MigrateError> {
    info!("Starting database migrations");

    let mut conn = router
        .acquire_public()
        .await
        .map_err(|e| MigrateError::Execute(into_sqlx(e)))?;

    match sqlx::migrate!("../migrations").run(&mut *conn).await {
        Ok(()) => {
            info!("All database migrations completed successfully");
            Ok(())
        }
        Err(e) => {
            warn!(error = %e, "Migration failed");
            Err(e)
        }
    }
}

/// Gets the current migration status
pub async fn get_migration_status(router: &SchemaRouter) -> Result<MigrationStatus, DbError> {
    debug!("Checking migration status");

    let mut conn = router.acquire_public().await?;

    let table_exists: bool = sqlx::query_scalar(
        "SELECT EXISTS (
            SELECT FROM information_schema.tables
            WHERE table_schema = 'public'
            AND table_name = '_sqlx_migrations'
        )",
    )
    .fetch_one(&mut *conn)
    .await?;

    let embedded = sqlx::migrate!("../migrations").iter().count();

    if !table_exists {
        debug!("Migrations table does not exist yet");
        return Ok(MigrationStatus {
            applied_migrations: 0,
            latest_version: None,
            is_up_to_date: embedded == 0,
        });
    }

    let (count, latest_version): (i64, Option<i64>) = sqlx::query_as(
        "SELECT COUNT(*), MAX(version) FROM _sqlx_migrations WHERE success = true",
    )
    .fetch_one(&mut *conn)
    .await?;

    let applied = usize::try_from(count).unwrap_or_default();

    Ok(MigrationStatus {
        applied_migrations: applied,
        latest_version,
        is_up_to_date: applied >= embedded,
    })
}

/// Creates the database if it doesn't exist
///
/// Used by development setups and the integration tests.
pub async fn ensure_database_exists(database_url: &str) -> Result<(), sqlx::Error> {
    if !Postgres::database_exists(database_url).await? {
        info!("Database does not exist, creating it");
        Postgres::create_database(database_url).await?;
    } else {
        debug!("Database already exists");
    }

    Ok(())
}

fn into_sqlx(err: DbError) -> sqlx::Error {
    match err {
        DbError::PoolExhausted => sqlx::Error::PoolTimedOut,
        DbError::Database(e) => e,
    }
}
