//! User account domain model and the rules of its security state machine.
//!
//! Two independent axes live on every account:
//!
//! - verification: `Unverified -> Verified`, one-way, entered by consuming a
//!   matching, unexpired verify code;
//! - lockout: `Unlocked -> Locked(until) -> Unlocked`, entered when the
//!   failed-attempt counter reaches the policy threshold, left when the
//!   clock passes `lock_until` or on explicit unlock.
//!
//! The checks and decisions live here; transitions are persisted through
//! [`crate::repository::UserRepository`] so that they stay atomic in the
//! store. Everything takes the current time as an argument so callers (and
//! tests) control the clock.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{QuarryError, QuarryResult};
use crate::models::descriptor::{FieldSpec, Model, ModelDescriptor};
use crate::password;

/// Failed attempts that trigger a lockout.
pub const MAX_FAILED_ATTEMPTS: u32 = 5;

/// How long a lockout lasts.
pub const LOCKOUT_MINUTES: i64 = 15;

/// How long a verify/reset code stays valid.
pub const CODE_TTL_MINUTES: i64 = 15;

/// Table the user model is registered under.
pub const USER_MODEL: &str = "user";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> QuarryResult<Self> {
        match s {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(QuarryError::invalid_field("role", format!("unknown role: {other}"))),
        }
    }
}

/// Which one-time code a flow is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CodeKind {
    Verify,
    Reset,
}

impl CodeKind {
    /// Column holding the code.
    pub fn code_field(self) -> &'static str {
        match self {
            CodeKind::Verify => "verify_code",
            CodeKind::Reset => "reset_code",
        }
    }

    /// Column holding the code's expiry.
    pub fn expiry_field(self) -> &'static str {
        match self {
            CodeKind::Verify => "verify_code_expires",
            CodeKind::Reset => "reset_code_expires",
        }
    }
}

impl fmt::Display for CodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodeKind::Verify => f.write_str("Verification"),
            CodeKind::Reset => f.write_str("Reset"),
        }
    }
}

/// A freshly issued code and its expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OneTimeCode {
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

/// Thresholds governing lockout and code lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityPolicy {
    pub max_failed_attempts: u32,
    pub lockout: Duration,
    pub code_ttl: Duration,
}

impl SecurityPolicy {
    /// The lockout deadline once `attempts` consecutive failures have been
    /// counted at `now`, or `None` below the threshold.
    pub fn lockout_after(&self, attempts: u32, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        (attempts >= self.max_failed_attempts).then(|| now + self.lockout)
    }

    /// A fresh code valid until `now + code_ttl`.
    pub fn issue_code(&self, now: DateTime<Utc>) -> OneTimeCode {
        OneTimeCode {
            code: generate_code(),
            expires_at: now + self.code_ttl,
        }
    }
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            max_failed_attempts: MAX_FAILED_ATTEMPTS,
            lockout: Duration::minutes(LOCKOUT_MINUTES),
            code_ttl: Duration::minutes(CODE_TTL_MINUTES),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: Uuid,
    /// Stored lowercased; unique per tenant.
    pub email: String,
    /// Argon2id PHC string, never the plaintext.
    pub password_hash: String,
    pub role: Role,
    pub is_verified: bool,
    pub verify_code: Option<String>,
    pub verify_code_expires: Option<DateTime<Utc>>,
    pub failed_login_attempts: u32,
    pub lock_until: Option<DateTime<Utc>>,
    pub reset_code: Option<String>,
    pub reset_code_expires: Option<DateTime<Utc>>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields required to register a new account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUser {
    pub email: String,
    /// Raw password (hashed with Argon2id before storage).
    pub password: String,
    pub role: Option<Role>,
}

impl Model for UserAccount {
    fn descriptor() -> ModelDescriptor {
        ModelDescriptor::new(USER_MODEL)
            .with_field(
                FieldSpec::string("email")
                    .required()
                    .unique()
                    .lowercase()
                    .length(3, 254),
            )
            .with_field(FieldSpec::string("password_hash").required())
            .with_field(
                FieldSpec::string("role")
                    .required()
                    .default_value("user")
                    .one_of(&["user", "admin"]),
            )
            .with_field(FieldSpec::bool("is_verified").required().default_value(false))
            .with_field(FieldSpec::string("verify_code"))
            .with_field(FieldSpec::datetime("verify_code_expires"))
            .with_field(
                FieldSpec::int("failed_login_attempts")
                    .required()
                    .default_value(0),
            )
            .with_field(FieldSpec::datetime("lock_until"))
            .with_field(FieldSpec::string("reset_code"))
            .with_field(FieldSpec::datetime("reset_code_expires"))
            .with_field(FieldSpec::datetime("last_login_at"))
    }
}

impl UserAccount {
    /// `true` iff `candidate` matches the stored hash. A malformed stored
    /// hash counts as a mismatch.
    pub fn verify_password(&self, candidate: &str, pepper: Option<&str>) -> bool {
        password::verify_password(candidate, &self.password_hash, pepper).unwrap_or(false)
    }

    pub fn is_locked_at(&self, now: DateTime<Utc>) -> bool {
        self.lock_until.is_some_and(|until| until > now)
    }

    /// Fail with [`QuarryError::AccountLocked`] while a lockout is active.
    pub fn ensure_unlocked(&self, now: DateTime<Utc>) -> QuarryResult<()> {
        match self.lock_until {
            Some(until) if until > now => Err(QuarryError::AccountLocked { until }),
            _ => Ok(()),
        }
    }

    /// The stored code of `kind`, if any (expired or not).
    pub fn pending_code(&self, kind: CodeKind) -> Option<OneTimeCode> {
        let (code, expires) = match kind {
            CodeKind::Verify => (&self.verify_code, self.verify_code_expires),
            CodeKind::Reset => (&self.reset_code, self.reset_code_expires),
        };
        match (code, expires) {
            (Some(code), Some(expires_at)) => Some(OneTimeCode {
                code: code.clone(),
                expires_at,
            }),
            _ => None,
        }
    }

    /// Check `candidate` against the pending code without consuming it.
    ///
    /// A non-matching candidate (including when nothing is pending) is a
    /// [`QuarryError::CodeMismatch`]; a matching one past its expiry is a
    /// [`QuarryError::CodeExpired`].
    pub fn check_code(&self, kind: CodeKind, candidate: &str, now: DateTime<Utc>) -> QuarryResult<()> {
        let pending = self
            .pending_code(kind)
            .ok_or(QuarryError::CodeMismatch { kind })?;
        if !is_well_formed_code(candidate)
            || !constant_time_eq(pending.code.as_bytes(), candidate.as_bytes())
        {
            return Err(QuarryError::CodeMismatch { kind });
        }
        if now >= pending.expires_at {
            return Err(QuarryError::CodeExpired { kind });
        }
        Ok(())
    }
}

/// Random `DDD-DDD` code; each half is in 100..=999 so no half starts
/// with a zero.
pub fn generate_code() -> String {
    let mut rng = rand::rng();
    let first: u16 = rng.random_range(100..=999);
    let second: u16 = rng.random_range(100..=999);
    format!("{first}-{second}")
}

/// `true` iff `s` is three digits, a hyphen, three digits.
pub fn is_well_formed_code(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() == 7
        && bytes[3] == b'-'
        && bytes[..3].iter().all(u8::is_ascii_digit)
        && bytes[4..].iter().all(u8::is_ascii_digit)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
