//! Quarry Core — shared domain types for tenant-scoped data access.
//!
//! This crate provides:
//! - The error taxonomy ([`error::QuarryError`])
//! - Model descriptors and descriptor-driven validation
//! - The user account security state machine ([`models::user::UserAccount`])
//! - Tenant, connection and log sink configuration
//! - Repository contracts implemented by `quarry-db`

pub mod error;
pub mod models;
pub mod password;
pub mod repository;
pub mod validation;

pub use error::{QuarryError, QuarryResult};
