//! Error types for Quarry.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::user::CodeKind;
use crate::validation::FieldViolation;

#[derive(Debug, Error)]
pub enum QuarryError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection to {uri} failed: {reason}")]
    Connection { uri: String, reason: String },

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Model already registered: {name}")]
    DuplicateModel { name: String },

    #[error("Model {model} does not supply a schema")]
    MissingSchema { model: String },

    #[error("Invalid record id: {id}")]
    InvalidId { id: String },

    #[error("Validation failed: {}", describe_violations(.violations))]
    Validation { violations: Vec<FieldViolation> },

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Account is locked until {until}")]
    AccountLocked { until: DateTime<Utc> },

    #[error("{kind} code has expired")]
    CodeExpired { kind: CodeKind },

    #[error("{kind} code does not match")]
    CodeMismatch { kind: CodeKind },

    #[error("Log retention cannot be both capped and time-based")]
    ConflictingRetention,

    #[error("Database error: {0}")]
    Database(String),

    #[error("Cryptography error: {0}")]
    Crypto(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl QuarryError {
    /// Shorthand for a validation failure on a single field.
    pub fn invalid_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        QuarryError::Validation {
            violations: vec![FieldViolation::new(field, message)],
        }
    }
}

fn describe_violations(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

pub type QuarryResult<T> = Result<T, QuarryError>;
