//! Tenant isolation
//!
//! - `schema`: typed `public` / `tenant_{id}` schema names
//! - `context`: the task-local active schema of a request
//! - `directory`: host name to tenant resolution with a TTL cache
//! - `store`: registry backends the directory reads from
//! - `provisioning`: creation of a tenant, its schema, roles and secrets

pub mod context;
pub mod directory;
pub mod provisioning;
pub mod schema;
pub mod store;

pub use context::{current_schema, spawn_with_current_schema, SchemaContext};
pub use directory::{DirectoryConfig, DirectoryError, Resolution, TenantDirectory};
pub use provisioning::{
    ProvisionRequest, ProvisionedTenant, ProvisioningError, ProvisioningStage, TenantProvisioner,
};
pub use schema::SchemaName;
pub use store::{MemoryTenantStore, PgTenantStore, TenantStore};
