//! # API Shared
//!
//! Shared utilities and definitions for the clinic APIs.
//!
//! Contains:
//! - `HealthService` and its response type
//! - Actor extraction from request headers and the role-list access policy
//!
//! Used by `api-rest` and the server binary.

pub mod auth;
pub mod health;

pub use auth::{actor_from_headers, AuthError, RolePolicy, ACTOR_ID_HEADER, ACTOR_ROLE_HEADER};
pub use health::{HealthRes, HealthService};
