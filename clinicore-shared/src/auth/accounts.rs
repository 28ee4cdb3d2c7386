//! Sign-in accounts of the current schema
//!
//! Which users exist depends on the schema a request is bound to: on a clinic
//! host they are the rows of that tenant's `users` table, on the main domain
//! the platform operators in `public.platform_users`. An [`AccountStore`]
//! always answers for [`current_schema`], so a login on one clinic can never
//! find a user of another.

use async_trait::async_trait;
use sqlx::postgres::PgConnection;
use std::collections::HashMap;
use std::fmt;
use tokio::sync::RwLock;

use crate::db::routing::{DbError, SchemaRouter};
use crate::models::platform_user::PlatformUser;
use crate::models::role::{default_role_names, Role};
use crate::models::user::{CreateTenantUser, TenantUser};
use crate::tenancy::{current_schema, SchemaName};

/// A user who can sign in, with the name of their role
#[derive(Clone, PartialEq, Eq)]
pub struct Account {
    pub id: i64,
    pub email: String,
    pub password_hash: String,
    pub role: String,
    pub is_active: bool,
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("role", &self.role)
            .field("is_active", &self.is_active)
            .finish_non_exhaustive()
    }
}

impl From<PlatformUser> for Account {
    fn from(user: PlatformUser) -> Self {
        Self {
            id: user.id,
            email: user.email,
            password_hash: user.password_hash,
            role: user.role,
            is_active: user.is_active,
        }
    }
}

/// Input for [`AccountStore::create`]
#[derive(Clone)]
pub struct NewAccount {
    pub email: String,
    /// Argon2id PHC string
    pub password_hash: String,
    pub role: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    #[error("Email is already registered")]
    EmailTaken,

    #[error("Role {0} does not exist")]
    UnknownRole(String),

    #[error(transparent)]
    Db(#[from] DbError),
}

impl From<sqlx::Error> for AccountError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                AccountError::EmailTaken
            }
            _ => AccountError::Db(err.into()),
        }
    }
}

/// Account lookups in the schema of the current request
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Account with `email`, compared case-insensitively
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, DbError>;

    async fn find_by_id(&self, id: i64) -> Result<Option<Account>, DbError>;

    /// Creates an active account
    ///
    /// # Errors
    ///
    /// `EmailTaken` when the email is already registered in this schema and
    /// `UnknownRole` when a tenant has no role of that name.
    async fn create(&self, account: NewAccount) -> Result<Account, AccountError>;
}

/// Accounts in PostgreSQL, read through the schema router
#[derive(Clone, Debug)]
pub struct PgAccountStore {
    router: SchemaRouter,
}

impl PgAccountStore {
    pub fn new(router: SchemaRouter) -> Self {
        Self { router }
    }
}

/// Joins a tenant user with the name of their role
async fn tenant_account(
    conn: &mut PgConnection,
    user: Option<TenantUser>,
) -> Result<Option<Account>, sqlx::Error> {
    let Some(user) = user else { return Ok(None) };
    let role = Role::find_by_id(conn, user.role_id).await?;

    Ok(role.map(|role| Account {
        id: user.id,
        email: user.email,
        password_hash: user.password_hash,
        role: role.name,
        is_active: user.is_active,
    }))
}

#[async_trait]
impl AccountStore for PgAccountStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, DbError> {
        let mut conn = self.router.acquire().await?;
        let account = match conn.schema() {
            SchemaName::Public => PlatformUser::find_by_email(&mut conn, email)
                .await?
                .map(Account::from),
            SchemaName::Tenant(_) => {
                let user = TenantUser::find_by_email(&mut conn, email).await?;
                tenant_account(&mut conn, user).await?
            }
        };
        Ok(account)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Account>, DbError> {
        let mut conn = self.router.acquire().await?;
        let account = match conn.schema() {
            SchemaName::Public => PlatformUser::find_by_id(&mut conn, id)
                .await?
                .map(Account::from),
            SchemaName::Tenant(_) => {
                let user = TenantUser::find_by_id(&mut conn, id).await?;
                tenant_account(&mut conn, user).await?
            }
        };
        Ok(account)
    }

    async fn create(&self, account: NewAccount) -> Result<Account, AccountError> {
        let mut conn = self.router.acquire().await?;

        match conn.schema() {
            SchemaName::Public => {
                let user = PlatformUser::create(
                    &mut conn,
                    &account.email,
                    &account.password_hash,
                    &account.role,
                )
                .await?;
                Ok(user.into())
            }
            SchemaName::Tenant(tenant_id) => {
                let role = Role::find_by_name(&mut conn, &account.role)
                    .await?
                    .ok_or_else(|| AccountError::UnknownRole(account.role.clone()))?;

                let user = TenantUser::create(
                    &mut conn,
                    CreateTenantUser {
                        email: account.email,
                        password_hash: account.password_hash,
                        role_id: role.id,
                        tenant_id,
                    },
                )
                .await?;

                Ok(Account {
                    id: user.id,
                    email: user.email,
                    password_hash: user.password_hash,
                    role: role.name,
                    is_active: user.is_active,
                })
            }
        }
    }
}

/// In-process accounts for development and tests
///
/// Tenant schemas know the default roles only.
#[derive(Debug, Default)]
pub struct MemoryAccountStore {
    accounts: RwLock<HashMap<SchemaName, Vec<Account>>>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces an account by id in `schema`
    pub async fn upsert(&self, schema: SchemaName, account: Account) {
        let mut accounts = self.accounts.write().await;
        let schema_accounts = accounts.entry(schema).or_default();
        schema_accounts.retain(|a| a.id != account.id);
        schema_accounts.push(account);
    }

    /// Returns false when no such account exists
    pub async fn set_active(&self, schema: SchemaName, id: i64, active: bool) -> bool {
        let mut accounts = self.accounts.write().await;
        match accounts
            .get_mut(&schema)
            .and_then(|list| list.iter_mut().find(|a| a.id == id))
        {
            Some(account) => {
                account.is_active = active;
                true
            }
            None => false,
        }
    }

    async fn find<F>(&self, matches: F) -> Option<Account>
    where
        F: Fn(&Account) -> bool,
    {
        self.accounts
            .read()
            .await
            .get(&current_schema())
            .and_then(|list| list.iter().find(|a| matches(a)).cloned())
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, DbError> {
        Ok(self.find(|a| a.email.eq_ignore_ascii_case(email)).await)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Account>, DbError> {
        Ok(self.find(|a| a.id == id).await)
    }

    async fn create(&self, account: NewAccount) -> Result<Account, AccountError> {
        let schema = current_schema();
        if !schema.is_public() && !default_role_names().contains(&account.role.as_str()) {
            return Err(AccountError::UnknownRole(account.role));
        }

        let mut accounts = self.accounts.write().await;
        let list = accounts.entry(schema).or_default();
        if list.iter().any(|a| a.email.eq_ignore_ascii_case(&account.email)) {
            return Err(AccountError::EmailTaken);
        }

        let created = Account {
            id: list.iter().map(|a| a.id).max().unwrap_or(0) + 1,
            email: account.email.to_lowercase(),
            password_hash: account.password_hash,
            role: account.role,
            is_active: true,
        };
        list.push(created.clone());
        Ok(created)
    }
}
