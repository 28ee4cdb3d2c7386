/// Platform operator model
///
/// Operators administer tenants from the main domain. Their rows live in
/// `public.platform_users` and the queries are schema-qualified, so they
/// work on any connection.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE public.platform_users (
///     id BIGSERIAL PRIMARY KEY,
///     email VARCHAR(100) NOT NULL UNIQUE,
///     password_hash VARCHAR(200) NOT NULL,
///     role VARCHAR(50) NOT NULL DEFAULT 'super_admin',
///     is_active BOOLEAN NOT NULL DEFAULT TRUE,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgConnection;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PlatformUser {
    pub id: i64,
    pub email: String,

    #[serde(skip_serializing)]
    pub password_hash: String,

    /// Role name, `super_admin` for operators
    pub role: String,

    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

const PLATFORM_USER_COLUMNS: &str = "id, email, password_hash, role, is_active, created_at";

impl PlatformUser {
    /// Creates an operator; the email is stored lowercase
    pub async fn create(
        conn: &mut PgConnection,
        email: &str,
        password_hash: &str,
        role: &str,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, PlatformUser>(&format!(
            r#"
            INSERT INTO public.platform_users (email, password_hash, role)
            VALUES (lower($1), $2, $3)
            RETURNING {PLATFORM_USER_COLUMNS}
            "#
        ))
        .bind(email)
        .bind(password_hash)
        .bind(role)
        .fetch_one(conn)
        .await
    }

    pub async fn find_by_id(conn: &mut PgConnection, id: i64) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, PlatformUser>(&format!(
            "SELECT {PLATFORM_USER_COLUMNS} FROM public.platform_users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(conn)
        .await
    }

    pub async fn find_by_email(
        conn: &mut PgConnection,
        email: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, PlatformUser>(&format!(
            "SELECT {PLATFORM_USER_COLUMNS} FROM public.platform_users WHERE email = lower($1)"
        ))
        .bind(email)
        .fetch_optional(conn)
        .await
    }
}
