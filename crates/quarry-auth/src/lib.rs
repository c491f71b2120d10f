//! Quarry Auth — password verification, lockout and one-time codes on top
//! of any [`quarry_core::repository::UserRepository`].

pub mod clock;
pub mod config;
pub mod error;
pub mod service;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::SecurityConfig;
pub use error::AuthError;
pub use service::{AccountSecurity, AuthOutcome};
