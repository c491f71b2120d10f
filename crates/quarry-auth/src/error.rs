//! Account security error types.

use quarry_core::error::QuarryError;
use quarry_core::models::user::CodeKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("security pepper does not match the user repository's")]
    PepperMismatch,

    #[error("{kind} code does not match")]
    CodeMismatch { kind: CodeKind },

    #[error("password hashing task failed: {0}")]
    Blocking(String),
}

impl From<AuthError> for QuarryError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::PepperMismatch => QuarryError::Config(err.to_string()),
            AuthError::CodeMismatch { kind } => QuarryError::CodeMismatch { kind },
            AuthError::Blocking(msg) => QuarryError::Internal(msg),
        }
    }
}
