//! Authentication primitives
//!
//! - [`password`]: Argon2id hashing and initial password generation
//! - [`jwt`]: HS256 access tokens bound to one tenant and one role
//! - [`accounts`]: the users who can sign in on the current schema

pub mod accounts;
pub mod jwt;
pub mod password;
