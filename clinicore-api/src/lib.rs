//! # Clinicore API Server Library
//!
//! HTTP surface of the multi-tenant clinic platform. Every `/v1` request is
//! resolved to a tenant from its `Host` header and handled inside that
//! tenant's schema scope.
//!
//! ## Modules
//!
//! - `app`: Application state and router builder
//! - `config`: Configuration management
//! - `error`: Error handling and HTTP response mapping
//! - `middleware`: Tenant resolution, authentication and security headers
//! - `routes`: API route handlers

pub mod app;
pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;
