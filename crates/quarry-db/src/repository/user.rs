//! SurrealDB implementation of [`UserRepository`].
//!
//! Passwords are hashed with Argon2id on the blocking pool before any
//! statement is issued; the plaintext never reaches the store. Counter and
//! code updates are single conditional statements so concurrent callers
//! cannot lose an increment or consume one code twice.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use quarry_core::error::{QuarryError, QuarryResult};
use quarry_core::models::record::Document;
use quarry_core::models::user::{CodeKind, CreateUser, OneTimeCode, Role, UserAccount};
use quarry_core::password;
use quarry_core::repository::UserRepository;
use quarry_core::validation::{self, Mode};
use serde_json::Value;
use surrealdb::Surreal;
use surrealdb::engine::any::Any;
use surrealdb_types::SurrealValue;
use tracing::debug;
use uuid::Uuid;

use crate::error::DbError;
use crate::registry::{ModelRegistry, RegisteredModel};

const SELECT_USER: &str = "SELECT *, meta::id(id) AS record_id OMIT id FROM type::record('user', $id)";

/// DB-side row struct that includes the record ID via `meta::id(id)`.
#[derive(Debug, SurrealValue)]
struct UserRow {
    record_id: String,
    email: String,
    password_hash: String,
    role: String,
    is_verified: bool,
    verify_code: Option<String>,
    verify_code_expires: Option<DateTime<Utc>>,
    failed_login_attempts: u32,
    lock_until: Option<DateTime<Utc>>,
    reset_code: Option<String>,
    reset_code_expires: Option<DateTime<Utc>>,
    last_login_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl UserRow {
    fn try_into_user(self) -> QuarryResult<UserAccount> {
        let id = Uuid::parse_str(&self.record_id)
            .map_err(|e| DbError::Decode(format!("invalid UUID: {e}")))?;
        Ok(UserAccount {
            id,
            email: self.email,
            password_hash: self.password_hash,
            role: Role::parse(&self.role)?,
            is_verified: self.is_verified,
            verify_code: self.verify_code,
            verify_code_expires: self.verify_code_expires,
            failed_login_attempts: self.failed_login_attempts,
            lock_until: self.lock_until,
            reset_code: self.reset_code,
            reset_code_expires: self.reset_code_expires,
            last_login_at: self.last_login_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, SurrealValue)]
struct CounterRow {
    failed_login_attempts: u32,
}

/// SurrealDB implementation of the user repository, bound to one tenant.
#[derive(Clone)]
pub struct SurrealUserRepository {
    model: Arc<RegisteredModel>,
    /// Optional server-side pepper for password hashing.
    pepper: Option<String>,
}

impl SurrealUserRepository {
    /// Bind to `registry`, registering the user model on first use.
    pub async fn bind(registry: &ModelRegistry) -> QuarryResult<Self> {
        let model = registry.model::<UserAccount>().await?;
        Ok(Self { model, pepper: None })
    }

    pub fn with_pepper(mut self, pepper: impl Into<String>) -> Self {
        self.pepper = Some(pepper.into());
        self
    }

    fn db(&self) -> QuarryResult<Surreal<Any>> {
        Ok(self.model.handle().client()?)
    }

    async fn hash(&self, plaintext: &str) -> QuarryResult<String> {
        if plaintext.is_empty() {
            return Err(QuarryError::invalid_field("password", "is required"));
        }
        let plaintext = plaintext.to_string();
        let pepper = self.pepper.clone();
        tokio::task::spawn_blocking(move || password::hash_password(&plaintext, pepper.as_deref()))
            .await
            .map_err(|e| QuarryError::Internal(format!("password hashing task failed: {e}")))?
    }

    async fn fetch(&self, id: Uuid) -> QuarryResult<UserAccount> {
        let id_str = id.to_string();
        let mut result = self
            .db()?
            .query(SELECT_USER)
            .bind(("id", id_str.clone()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<UserRow> = result.take(0).map_err(DbError::decode)?;
        let row = rows.into_iter().next().ok_or(DbError::NotFound {
            entity: "user".into(),
            id: id_str,
        })?;
        row.try_into_user()
    }

    /// Run a single-record UPDATE; fails with `NotFound` if nothing matched.
    async fn update(&self, id: Uuid, sets: &str, binds: Vec<(&'static str, Value)>) -> QuarryResult<()> {
        let id_str = id.to_string();
        let sql = format!(
            "UPDATE type::record('user', $id) SET {sets}, updated_at = time::now() \
             RETURN VALUE meta::id(id)"
        );
        let db = self.db()?;
        let mut query = db.query(sql).bind(("id", id_str.clone()));
        for bind in binds {
            query = query.bind(bind);
        }
        let mut result = query
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(DbError::query)?;

        let updated: Vec<String> = result.take(0).map_err(DbError::decode)?;
        if updated.is_empty() {
            return Err(DbError::NotFound {
                entity: "user".into(),
                id: id_str,
            }
            .into());
        }
        Ok(())
    }
}

impl UserRepository for SurrealUserRepository {
    fn pepper(&self) -> Option<&str> {
        self.pepper.as_deref()
    }

    async fn create(&self, input: CreateUser) -> QuarryResult<UserAccount> {
        let password_hash = self.hash(&input.password).await?;

        let mut data = Document::new();
        data.insert("email".into(), Value::String(input.email));
        data.insert("password_hash".into(), Value::String(password_hash));
        data.insert(
            "role".into(),
            Value::String(input.role.unwrap_or(Role::User).as_str().to_string()),
        );
        let data = validation::validate(self.model.descriptor(), &data, Mode::Create)?;

        let id = Uuid::new_v4();
        let id_str = id.to_string();
        debug!(user = %id, "Creating user");

        let result = self
            .db()?
            .query(
                "CREATE type::record('user', $id) SET \
                 email = $email, password_hash = $password_hash, role = $role \
                 RETURN NONE",
            )
            .bind(("id", id_str))
            .bind(("email", data["email"].clone()))
            .bind(("password_hash", data["password_hash"].clone()))
            .bind(("role", data["role"].clone()))
            .await
            .map_err(DbError::from)?;

        match result.check().map_err(DbError::query) {
            Ok(_) => {}
            Err(DbError::Conflict { .. }) => {
                return Err(QuarryError::invalid_field("email", "is already registered"));
            }
            Err(e) => return Err(e.into()),
        }

        self.fetch(id).await
    }

    async fn get_by_id(&self, id: Uuid) -> QuarryResult<UserAccount> {
        self.fetch(id).await
    }

    async fn get_by_email(&self, email: &str) -> QuarryResult<UserAccount> {
        let email = email.trim().to_lowercase();
        let mut result = self
            .db()?
            .query("SELECT *, meta::id(id) AS record_id OMIT id FROM user WHERE email = $email LIMIT 1")
            .bind(("email", email.clone()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<UserRow> = result.take(0).map_err(DbError::decode)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "user".into(),
            id: format!("email={email}"),
        })?;
        row.try_into_user()
    }

    async fn set_password(&self, id: Uuid, plaintext: &str) -> QuarryResult<UserAccount> {
        let password_hash = self.hash(plaintext).await?;
        self.update(
            id,
            "password_hash = $password_hash",
            vec![("password_hash", Value::String(password_hash))],
        )
        .await?;
        self.fetch(id).await
    }

    async fn increment_failed_attempts(&self, id: Uuid) -> QuarryResult<u32> {
        let id_str = id.to_string();
        let mut result = self
            .db()?
            .query(
                "UPDATE type::record('user', $id) SET \
                 failed_login_attempts += 1, updated_at = time::now() \
                 RETURN failed_login_attempts",
            )
            .bind(("id", id_str.clone()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<CounterRow> = result.take(0).map_err(DbError::decode)?;
        let row = rows.into_iter().next().ok_or(DbError::NotFound {
            entity: "user".into(),
            id: id_str,
        })?;
        Ok(row.failed_login_attempts)
    }

    async fn lock_until(&self, id: Uuid, until: DateTime<Utc>) -> QuarryResult<()> {
        self.update(
            id,
            "lock_until = <datetime> $until",
            vec![("until", Value::String(until.to_rfc3339()))],
        )
        .await
    }

    async fn record_login(&self, id: Uuid, at: DateTime<Utc>) -> QuarryResult<()> {
        self.update(
            id,
            "failed_login_attempts = 0, lock_until = NONE, last_login_at = <datetime> $at",
            vec![("at", Value::String(at.to_rfc3339()))],
        )
        .await
    }

    async fn unlock(&self, id: Uuid) -> QuarryResult<()> {
        self.update(id, "failed_login_attempts = 0, lock_until = NONE", Vec::new())
            .await
    }

    async fn store_code(&self, id: Uuid, kind: CodeKind, code: &OneTimeCode) -> QuarryResult<()> {
        let sets = format!(
            "{} = $code, {} = <datetime> $expires",
            kind.code_field(),
            kind.expiry_field()
        );
        self.update(
            id,
            &sets,
            vec![
                ("code", Value::String(code.code.clone())),
                ("expires", Value::String(code.expires_at.to_rfc3339())),
            ],
        )
        .await
    }

    async fn take_code(&self, id: Uuid, kind: CodeKind, code: &str, now: DateTime<Utc>) -> QuarryResult<bool> {
        let code_field = kind.code_field();
        let expiry_field = kind.expiry_field();
        let verified = if kind == CodeKind::Verify {
            ", is_verified = true"
        } else {
            ""
        };
        let sql = format!(
            "UPDATE type::record('user', $id) SET \
             {code_field} = NONE, {expiry_field} = NONE{verified}, updated_at = time::now() \
             WHERE {code_field} = $code AND {expiry_field} > <datetime> $now \
             RETURN VALUE meta::id(id)"
        );

        let mut result = self
            .db()?
            .query(sql)
            .bind(("id", id.to_string()))
            .bind(("code", code.to_string()))
            .bind(("now", now.to_rfc3339()))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(DbError::query)?;

        let taken: Vec<String> = result.take(0).map_err(DbError::decode)?;
        Ok(!taken.is_empty())
    }
}
