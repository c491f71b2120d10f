//! Account security service: authentication with lockout, password
//! changes and one-time verification/reset codes.

use quarry_core::error::{QuarryError, QuarryResult};
use quarry_core::models::user::{CodeKind, CreateUser, OneTimeCode, SecurityPolicy, UserAccount};
use quarry_core::repository::UserRepository;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::config::SecurityConfig;
use crate::error::AuthError;

/// Result of an authentication attempt. Counters and lockout timing stay
/// internal; a locked account is reported as an error instead.
#[derive(Debug)]
pub enum AuthOutcome {
    Authenticated(UserAccount),
    /// Unknown email or wrong password; the two are indistinguishable.
    InvalidCredentials,
}

/// Account security service.
///
/// Generic over the repository implementation so that the auth layer
/// has no dependency on the database crate.
pub struct AccountSecurity<U: UserRepository, C: Clock = SystemClock> {
    users: U,
    config: SecurityConfig,
    policy: SecurityPolicy,
    clock: C,
}

impl<U: UserRepository> AccountSecurity<U, SystemClock> {
    pub fn new(users: U, config: SecurityConfig) -> QuarryResult<Self> {
        Self::with_clock(users, config, SystemClock)
    }
}

impl<U: UserRepository, C: Clock> AccountSecurity<U, C> {
    /// Fails with [`QuarryError::Config`] if the configured pepper differs
    /// from the one `users` hashes with, or if a duration is out of range.
    pub fn with_clock(users: U, config: SecurityConfig, clock: C) -> QuarryResult<Self> {
        if config.pepper.as_deref() != users.pepper() {
            return Err(AuthError::PepperMismatch.into());
        }
        let policy = config.policy()?;
        Ok(Self {
            users,
            config,
            policy,
            clock,
        })
    }

    pub fn users(&self) -> &U {
        &self.users
    }

    /// Create an account; the password is hashed before it is persisted.
    pub async fn register(&self, input: CreateUser) -> QuarryResult<UserAccount> {
        let user = self.users.create(input).await?;
        info!(user = %user.id, "Account registered");
        Ok(user)
    }

    /// Check `candidate` for the account registered under `email`.
    ///
    /// A locked account fails with [`QuarryError::AccountLocked`] before the
    /// password is looked at, and the attempt neither counts nor extends
    /// the lockout. A wrong password increments the failure counter; the
    /// attempt that reaches the threshold starts a lockout.
    pub async fn authenticate(&self, email: &str, candidate: &str) -> QuarryResult<AuthOutcome> {
        let now = self.clock.now();
        let user = match self.users.get_by_email(email).await {
            Ok(user) => user,
            Err(QuarryError::NotFound { .. }) => {
                debug!("Authentication for unknown account");
                return Ok(AuthOutcome::InvalidCredentials);
            }
            Err(e) => return Err(e),
        };

        if let Err(e) = user.ensure_unlocked(now) {
            debug!(user = %user.id, lock_until = ?user.lock_until, "Authentication rejected while locked");
            return Err(e);
        }

        if self.check_password(&user, candidate).await? {
            self.users.record_login(user.id, now).await?;
            info!(user = %user.id, "Authentication succeeded");
            let user = self.users.get_by_id(user.id).await?;
            return Ok(AuthOutcome::Authenticated(user));
        }

        let attempts = self.users.increment_failed_attempts(user.id).await?;
        if let Some(until) = self.policy.lockout_after(attempts, now) {
            self.users.lock_until(user.id, until).await?;
            warn!(user = %user.id, attempts, %until, "Account locked after repeated failed logins");
        } else {
            debug!(user = %user.id, attempts, "Authentication failed");
        }
        Ok(AuthOutcome::InvalidCredentials)
    }

    /// `true` iff `candidate` matches the stored password. Does not touch
    /// the failure counter.
    pub async fn verify_password(&self, id: Uuid, candidate: &str) -> QuarryResult<bool> {
        let user = self.users.get_by_id(id).await?;
        self.check_password(&user, candidate).await
    }

    /// Replace the password of `id`.
    pub async fn change_password(&self, id: Uuid, new_password: &str) -> QuarryResult<UserAccount> {
        let user = self.users.set_password(id, new_password).await?;
        info!(user = %id, "Password changed");
        Ok(user)
    }

    /// Consume a reset code and set a new password.
    ///
    /// An unknown email is reported as a code mismatch.
    pub async fn reset_password(&self, email: &str, code: &str, new_password: &str) -> QuarryResult<UserAccount> {
        let user = match self.users.get_by_email(email).await {
            Ok(user) => user,
            Err(QuarryError::NotFound { .. }) => {
                return Err(AuthError::CodeMismatch {
                    kind: CodeKind::Reset,
                }
                .into());
            }
            Err(e) => return Err(e),
        };
        self.consume(&user, CodeKind::Reset, code).await?;
        let user = self.users.set_password(user.id, new_password).await?;
        info!(user = %user.id, "Password reset");
        Ok(user)
    }

    /// Clear the lockout and the failure counter.
    pub async fn unlock(&self, id: Uuid) -> QuarryResult<()> {
        self.users.unlock(id).await?;
        info!(user = %id, "Account unlocked");
        Ok(())
    }

    pub async fn is_locked(&self, id: Uuid) -> QuarryResult<bool> {
        let user = self.users.get_by_id(id).await?;
        Ok(user.is_locked_at(self.clock.now()))
    }

    /// Issue a verification code, replacing any pending one.
    pub async fn issue_verify_code(&self, id: Uuid) -> QuarryResult<OneTimeCode> {
        self.issue(id, CodeKind::Verify).await
    }

    /// Issue a password reset code, replacing any pending one.
    pub async fn issue_reset_code(&self, id: Uuid) -> QuarryResult<OneTimeCode> {
        self.issue(id, CodeKind::Reset).await
    }

    /// Consume the verification code; the account becomes verified.
    pub async fn consume_verify_code(&self, id: Uuid, code: &str) -> QuarryResult<()> {
        let user = self.users.get_by_id(id).await?;
        self.consume(&user, CodeKind::Verify, code).await?;
        info!(user = %id, "Account verified");
        Ok(())
    }

    /// Consume the reset code without changing the password.
    pub async fn consume_reset_code(&self, id: Uuid, code: &str) -> QuarryResult<()> {
        let user = self.users.get_by_id(id).await?;
        self.consume(&user, CodeKind::Reset, code).await
    }

    async fn issue(&self, id: Uuid, kind: CodeKind) -> QuarryResult<OneTimeCode> {
        let code = self.policy.issue_code(self.clock.now());
        self.users.store_code(id, kind, &code).await?;
        debug!(user = %id, ?kind, expires_at = %code.expires_at, "One-time code issued");
        Ok(code)
    }

    /// Check the candidate against the loaded account, then clear it in the
    /// store only if it is still the pending code. Losing that race counts
    /// as a mismatch.
    async fn consume(&self, user: &UserAccount, kind: CodeKind, code: &str) -> QuarryResult<()> {
        let now = self.clock.now();
        user.check_code(kind, code, now)?;
        if !self.users.take_code(user.id, kind, code, now).await? {
            return Err(AuthError::CodeMismatch { kind }.into());
        }
        Ok(())
    }

    async fn check_password(&self, user: &UserAccount, candidate: &str) -> QuarryResult<bool> {
        let account = user.clone();
        let candidate = candidate.to_string();
        let pepper = self.config.pepper.clone();
        tokio::task::spawn_blocking(move || account.verify_password(&candidate, pepper.as_deref()))
            .await
            .map_err(|e| AuthError::Blocking(e.to_string()).into())
    }
}
