//! Database layer
//!
//! - `pool`: bounded PostgreSQL pool with health checks
//! - `routing`: schema-routing checkout, the only way to get a connection
//! - `tables`: schema-agnostic tenant table definitions
//! - `migrations`: platform (`public`) schema migrations
//!
//! # Example
//!
//! ```no_run
//! use clinicore_shared::db::pool::{create_pool, DatabaseConfig};
//! use clinicore_shared::db::routing::SchemaRouter;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DatabaseConfig {
//!         url: std::env::var("DATABASE_URL")?,
//!         ..Default::default()
//!     };
//!
//!     let router = SchemaRouter::new(create_pool(config).await?);
//!     let conn = router.acquire().await?;
//!     println!("bound to {}", conn.schema());
//!     Ok(())
//! }
//! ```

pub mod migrations;
pub mod pool;
pub mod routing;
pub mod tables;

pub use routing::{DbError, SchemaRouter, TenantConnection};
