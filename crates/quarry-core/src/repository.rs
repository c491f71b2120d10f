//! Repository trait definitions for data access abstraction.
//!
//! All operations are async. Implementations are bound to one tenant's
//! connection, so no tenant parameter appears here: isolation comes from
//! the connection itself.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::QuarryResult;
use crate::models::descriptor::ModelDescriptor;
use crate::models::record::{Document, Filter, Record};
use crate::models::user::{CodeKind, CreateUser, OneTimeCode, UserAccount};

// ---------------------------------------------------------------------------
// Generic records
// ---------------------------------------------------------------------------

/// Uniform CRUD surface over a registered model.
///
/// Identifiers are passed as text so malformed ones surface as
/// `InvalidId` rather than a parse error at the call site. A dropped
/// connection surfaces as `StoreUnavailable`; nothing is retried.
pub trait RecordAccessor: Send + Sync {
    fn descriptor(&self) -> &ModelDescriptor;

    /// Records matching every entry of `filter`, optionally restricted to
    /// the `projection` fields.
    fn find(
        &self,
        filter: Filter,
        projection: Option<Vec<String>>,
    ) -> impl Future<Output = QuarryResult<Vec<Record>>> + Send;

    fn find_one(&self, filter: Filter) -> impl Future<Output = QuarryResult<Option<Record>>> + Send;

    fn find_by_id(&self, id: &str) -> impl Future<Output = QuarryResult<Option<Record>>> + Send;

    fn create(&self, data: Document) -> impl Future<Output = QuarryResult<Record>> + Send;

    /// Apply `patch` and return the post-update state.
    fn update_by_id(
        &self,
        id: &str,
        patch: Document,
    ) -> impl Future<Output = QuarryResult<Option<Record>>> + Send;

    /// Delete and return the pre-delete state.
    fn delete_by_id(&self, id: &str) -> impl Future<Output = QuarryResult<Option<Record>>> + Send;
}

// ---------------------------------------------------------------------------
// User accounts
// ---------------------------------------------------------------------------

/// Persistence of [`UserAccount`] security state.
///
/// Password changes go through [`UserRepository::create`] and
/// [`UserRepository::set_password`] only; both hash before persisting.
/// Counter updates are performed store-side so concurrent failures can
/// undercount but never decrease the counter.
pub trait UserRepository: Send + Sync {
    /// Pepper prepended to passwords before hashing, if any.
    fn pepper(&self) -> Option<&str>;

    fn create(&self, input: CreateUser) -> impl Future<Output = QuarryResult<UserAccount>> + Send;

    fn get_by_id(&self, id: Uuid) -> impl Future<Output = QuarryResult<UserAccount>> + Send;

    /// Case-insensitive lookup.
    fn get_by_email(&self, email: &str) -> impl Future<Output = QuarryResult<UserAccount>> + Send;

    /// Hash `plaintext` and store it as the new password.
    fn set_password(
        &self,
        id: Uuid,
        plaintext: &str,
    ) -> impl Future<Output = QuarryResult<UserAccount>> + Send;

    /// Atomically increment the failed-attempt counter; returns the new value.
    fn increment_failed_attempts(&self, id: Uuid) -> impl Future<Output = QuarryResult<u32>> + Send;

    /// Start a lockout ending at `until`.
    fn lock_until(&self, id: Uuid, until: DateTime<Utc>) -> impl Future<Output = QuarryResult<()>> + Send;

    /// Reset counter and lockout, stamp `last_login_at`.
    fn record_login(&self, id: Uuid, at: DateTime<Utc>) -> impl Future<Output = QuarryResult<()>> + Send;

    /// Reset counter and lockout.
    fn unlock(&self, id: Uuid) -> impl Future<Output = QuarryResult<()>> + Send;

    /// Store `code` as the pending code of `kind`, replacing any other.
    fn store_code(
        &self,
        id: Uuid,
        kind: CodeKind,
        code: &OneTimeCode,
    ) -> impl Future<Output = QuarryResult<()>> + Send;

    /// Clear the pending code of `kind` if it still equals `code` and has
    /// not expired at `now`; a verify code also marks the account verified.
    /// Returns `false` when another caller consumed it first.
    fn take_code(
        &self,
        id: Uuid,
        kind: CodeKind,
        code: &str,
        now: DateTime<Utc>,
    ) -> impl Future<Output = QuarryResult<bool>> + Send;
}
