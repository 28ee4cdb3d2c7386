//! # Clinicore Shared Library
//!
//! Multi-tenant core shared by the API server: tenant resolution, schema
//! routing for database access and the secret store client.
//!
//! ## Module Organization
//!
//! - `tenancy`: schema names, the task-local schema context, the tenant
//!   directory and tenant provisioning
//! - `db`: pool setup, the schema router and tenant table definitions
//! - `models`: rows in the platform schema and in tenant schemas
//! - `secrets`: per-tenant transit keys and role tokens (Vault or in-memory)
//! - `auth`: password hashing and tenant-bound JWTs

pub mod auth;
pub mod db;
pub mod models;
pub mod secrets;
pub mod tenancy;

/// Current version of the Clinicore shared library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
