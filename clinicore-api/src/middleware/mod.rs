/// Middleware modules for the API server
///
/// - `tenant`: Host to tenant resolution, schema scoping and route guards
/// - `auth`: tenant-bound JWT authentication
/// - `security`: security response headers

pub mod auth;
pub mod security;
pub mod tenant;
