/// Tenant user model
///
/// Users belong to exactly one tenant and live in that tenant's schema; the
/// `tenant_id` column is a copy of the owning tenant's id kept for token
/// issuance and has no foreign key across schemas.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE users (
///     id BIGSERIAL PRIMARY KEY,
///     email VARCHAR(100) NOT NULL UNIQUE,
///     password_hash VARCHAR(200) NOT NULL,
///     role_id BIGINT NOT NULL REFERENCES roles (id),
///     tenant_id BIGINT NOT NULL,
///     is_active BOOLEAN NOT NULL DEFAULT TRUE,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgConnection;

/// A user of one clinic
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TenantUser {
    pub id: i64,

    /// Email address, unique within the tenant
    pub email: String,

    /// Argon2id hash (never serialized)
    #[serde(skip_serializing)]
    pub password_hash: String,

    pub role_id: i64,
    pub tenant_id: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a tenant user
#[derive(Debug, Clone)]
pub struct CreateTenantUser {
    pub email: String,
    pub password_hash: String,
    pub role_id: i64,
    pub tenant_id: i64,
}

const USER_COLUMNS: &str = "id, email, password_hash, role_id, tenant_id, is_active, created_at";

impl TenantUser {
    /// Creates a user in the bound tenant schema
    ///
    /// Email addresses are normalized to lowercase.
    ///
    /// # Errors
    ///
    /// Returns an error if the email already exists in this tenant or the
    /// role does not exist.
    pub async fn create(
        conn: &mut PgConnection,
        data: CreateTenantUser,
    ) -> Result<Self, sqlx::Error> {
        let user = sqlx::query_as::<_, TenantUser>(&format!(
            r#"
            INSERT INTO users (email, password_hash, role_id, tenant_id)
            VALUES ($1, $2, $3, $4)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(data.email.to_lowercase())
        .bind(data.password_hash)
        .bind(data.role_id)
        .bind(data.tenant_id)
        .fetch_one(conn)
        .await?;

        Ok(user)
    }

    pub async fn find_by_id(conn: &mut PgConnection, id: i64) -> Result<Option<Self>, sqlx::Error> {
        let user = sqlx::query_as::<_, TenantUser>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(conn)
        .await?;

        Ok(user)
    }

    /// Finds a user by email (case-insensitive)
    pub async fn find_by_email(
        conn: &mut PgConnection,
        email: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        let user = sqlx::query_as::<_, TenantUser>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = lower($1)"
        ))
        .bind(email)
        .fetch_optional(conn)
        .await?;

        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_hash_is_not_serialized() {
        let user = TenantUser {
            id: 1,
            email: "admin@clinica.example.com".to_string(),
            password_hash: "$argon2id$v=19$secret".to_string(),
            role_id: 2,
            tenant_id: 7,
            is_active: true,
            created_at: Utc::now(),
        };

        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("password_hash").is_none());
        assert_eq!(json["tenant_id"], 7);
    }
}
