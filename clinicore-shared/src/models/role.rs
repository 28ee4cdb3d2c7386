//! Per-tenant roles
//!
//! Roles live inside each tenant's schema, so their names are unique within a
//! tenant and nowhere else. Queries here are deliberately unqualified: they
//! must run on a connection bound to the tenant's schema.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use sqlx::postgres::PgConnection;

/// A role in one tenant's schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Role {
    pub id: i64,
    pub name: String,

    /// Capability flags, e.g. `{"ehr_write": true, "appointment_create": false}`
    pub permissions: JsonValue,

    /// Created by the clinic rather than seeded at provisioning
    pub is_custom: bool,

    pub created_at: DateTime<Utc>,
}

/// A role seeded into every new tenant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefaultRole {
    pub name: &'static str,
    pub ehr_write: bool,
    pub appointment_create: bool,
}

impl DefaultRole {
    pub fn permissions(&self) -> JsonValue {
        json!({
            "ehr_write": self.ehr_write,
            "appointment_create": self.appointment_create,
        })
    }
}

pub const DEFAULT_ROLES: &[DefaultRole] = &[
    DefaultRole { name: "super_admin", ehr_write: true, appointment_create: false },
    DefaultRole { name: "clinic_admin", ehr_write: true, appointment_create: false },
    DefaultRole { name: "doctor", ehr_write: true, appointment_create: false },
    DefaultRole { name: "nurse", ehr_write: false, appointment_create: true },
    DefaultRole { name: "staff", ehr_write: true, appointment_create: false },
    DefaultRole { name: "patient", ehr_write: true, appointment_create: false },
];

/// Names of the default roles, in seeding order
pub fn default_role_names() -> Vec<&'static str> {
    DEFAULT_ROLES.iter().map(|r| r.name).collect()
}

const ROLE_COLUMNS: &str = "id, name, permissions, is_custom, created_at";

impl Role {
    /// Inserts the default roles; existing names are left untouched
    pub async fn seed_defaults(conn: &mut PgConnection) -> Result<Vec<Self>, sqlx::Error> {
        for role in DEFAULT_ROLES {
            sqlx::query(
                r#"
                INSERT INTO roles (name, permissions, is_custom)
                VALUES ($1, $2, FALSE)
                ON CONFLICT (name) DO NOTHING
                "#,
            )
            .bind(role.name)
            .bind(role.permissions())
            .execute(&mut *conn)
            .await?;
        }

        Self::list(conn).await
    }

    /// All roles of the bound tenant, oldest first
    pub async fn list(conn: &mut PgConnection) -> Result<Vec<Self>, sqlx::Error> {
        let roles = sqlx::query_as::<_, Role>(&format!(
            "SELECT {ROLE_COLUMNS} FROM roles ORDER BY id"
        ))
        .fetch_all(conn)
        .await?;

        Ok(roles)
    }

    pub async fn find_by_id(conn: &mut PgConnection, id: i64) -> Result<Option<Self>, sqlx::Error> {
        let role = sqlx::query_as::<_, Role>(&format!(
            "SELECT {ROLE_COLUMNS} FROM roles WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(conn)
        .await?;

        Ok(role)
    }

    pub async fn find_by_name(
        conn: &mut PgConnection,
        name: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        let role = sqlx::query_as::<_, Role>(&format!(
            "SELECT {ROLE_COLUMNS} FROM roles WHERE name = $1"
        ))
        .bind(name)
        .fetch_optional(conn)
        .await?;

        Ok(role)
    }
}
