//! Database models
//!
//! - `tenant`: tenant registry in the `public` schema
//! - `platform_user`: operators of the platform, in the `public` schema
//! - `role`: roles inside each tenant schema, plus the defaults seeded at provisioning
//! - `user`: users inside each tenant schema
//!
//! Models take a `&mut PgConnection`; obtain it from
//! [`SchemaRouter`](crate::db::routing::SchemaRouter) so that tenant-scoped
//! queries run against the right schema.

pub mod platform_user;
pub mod role;
pub mod tenant;
pub mod user;
