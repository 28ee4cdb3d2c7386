//! Tenant table definitions
//!
//! Each tenant-scoped entity is described by a [`TableSpec`]. The DDL is never
//! schema-qualified: the statements run on a connection whose search path is
//! already bound to the tenant's schema, and that binding decides where the
//! table lands. The same specs therefore build every `tenant_{id}` schema.
//!
//! Platform tables (`tenants`, `plans`, `transactions`, `faq_questions`) live
//! in `public` and are managed by the SQL migrations instead.

use sqlx::postgres::PgConnection;
use tracing::debug;

use super::routing::DbError;
use crate::tenancy::schema::SchemaName;

/// Which kind of schema a table belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    /// Shared `public` schema
    Platform,
    /// One copy per `tenant_{id}` schema
    Tenant,
}

impl Namespace {
    /// Whether tables of this namespace may be created in `schema`
    pub fn admits(&self, schema: SchemaName) -> bool {
        match self {
            Namespace::Platform => schema.is_public(),
            Namespace::Tenant => !schema.is_public(),
        }
    }
}

/// Definition of one table
#[derive(Debug, Clone, Copy)]
pub struct TableSpec {
    pub name: &'static str,
    pub namespace: Namespace,
    pub ddl: &'static str,
}

pub const ROLES: TableSpec = TableSpec {
    name: "roles",
    namespace: Namespace::Tenant,
    ddl: r#"
        CREATE TABLE IF NOT EXISTS roles (
            id          BIGSERIAL PRIMARY KEY,
            name        VARCHAR(50) NOT NULL UNIQUE,
            permissions JSONB NOT NULL DEFAULT '{}'::jsonb,
            is_custom   BOOLEAN NOT NULL DEFAULT FALSE,
            created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
    "#,
};

pub const USERS: TableSpec = TableSpec {
    name: "users",
    namespace: Namespace::Tenant,
    ddl: r#"
        CREATE TABLE IF NOT EXISTS users (
            id            BIGSERIAL PRIMARY KEY,
            email         VARCHAR(100) NOT NULL UNIQUE,
            password_hash VARCHAR(200) NOT NULL,
            role_id       BIGINT NOT NULL REFERENCES roles (id),
            tenant_id     BIGINT NOT NULL,
            is_active     BOOLEAN NOT NULL DEFAULT TRUE,
            created_at    TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
    "#,
};

pub const PATIENTS: TableSpec = TableSpec {
    name: "patients",
    namespace: Namespace::Tenant,
    ddl: r#"
        CREATE TABLE IF NOT EXISTS patients (
            id                  BIGSERIAL PRIMARY KEY,
            user_id             BIGINT REFERENCES users (id),
            full_name           VARCHAR(100) NOT NULL,
            encrypted_contact   TEXT,
            encrypted_history   TEXT,
            created_at          TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
    "#,
};

/// Tables of every tenant schema, in creation order
pub const TENANT_TABLES: &[TableSpec] = &[ROLES, USERS, PATIENTS];

/// Creates the tenant tables in the schema `conn` is bound to
///
/// `schema` must be the schema the connection was checked out for; it is
/// only used to refuse running tenant DDL against `public`.
pub async fn create_tenant_tables(
    conn: &mut PgConnection,
    schema: SchemaName,
) -> Result<(), DbError> {
    for table in TENANT_TABLES {
        if !table.namespace.admits(schema) {
            return Err(DbError::Database(sqlx::Error::Protocol(format!(
                "table {} cannot be created in schema {}",
                table.name, schema
            ))));
        }

        sqlx::query(table.ddl).execute(&mut *conn).await?;
        debug!(schema = %schema, table = table.name, "Created tenant table");
    }

    Ok(())
}

/// Creates the schema itself; a no-op when it already exists
pub async fn create_schema(conn: &mut PgConnection, schema: SchemaName) -> Result<(), DbError> {
    // Identifiers cannot be bound; SchemaName only renders `public` or
    // `tenant_<digits>`, so quoting it is sufficient.
    sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", schema.quoted()))
        .execute(&mut *conn)
        .await?;
    Ok(())
}
