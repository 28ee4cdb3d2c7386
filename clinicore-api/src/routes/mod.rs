/// API route handlers
///
/// This module contains all route handlers organized by resource:
///
/// - `health`: Health check endpoint
/// - `auth`: login and patient signup
/// - `tenant`: resolution context and current clinic
/// - `roles`: roles of the current clinic
/// - `crypto`: field encryption through the secret store
/// - `tenants`: provisioning and lifecycle of clinics (main domain)

pub mod auth;
pub mod crypto;
pub mod health;
pub mod roles;
pub mod tenant;
pub mod tenants;
