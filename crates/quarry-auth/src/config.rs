//! Account security configuration.

use chrono::Duration;
use quarry_core::error::{QuarryError, QuarryResult};
use quarry_core::models::user::SecurityPolicy;

/// Configuration for [`crate::AccountSecurity`].
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    /// Consecutive failed logins before lockout (default: 5).
    pub max_failed_attempts: u32,
    /// Lockout duration in seconds (default: 900 = 15 minutes).
    pub lockout_secs: u64,
    /// Verify/reset code lifetime in seconds (default: 900 = 15 minutes).
    pub code_ttl_secs: u64,
    /// Optional pepper prepended to passwords before Argon2id verification.
    /// Must equal the pepper the user repository hashes with; the service
    /// refuses to start otherwise.
    pub pepper: Option<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_failed_attempts: 5,
            lockout_secs: 900,
            code_ttl_secs: 900,
            pepper: None,
        }
    }
}

impl SecurityConfig {
    /// Resolve the thresholds, rejecting durations chrono cannot represent.
    pub fn policy(&self) -> QuarryResult<SecurityPolicy> {
        if self.max_failed_attempts == 0 {
            return Err(QuarryError::Config(
                "max_failed_attempts must be positive".into(),
            ));
        }
        Ok(SecurityPolicy {
            max_failed_attempts: self.max_failed_attempts,
            lockout: seconds("lockout_secs", self.lockout_secs)?,
            code_ttl: seconds("code_ttl_secs", self.code_ttl_secs)?,
        })
    }
}

fn seconds(name: &str, secs: u64) -> QuarryResult<Duration> {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .ok_or_else(|| QuarryError::Config(format!("{name} of {secs} is out of range")))
}
