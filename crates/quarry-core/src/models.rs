//! Domain models for Quarry.
//!
//! These are the core types shared across all crates.

pub mod descriptor;
pub mod log;
pub mod record;
pub mod tenant;
pub mod user;
