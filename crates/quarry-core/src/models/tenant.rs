//! Tenant configuration.
//!
//! A tenant is an isolated customer: one store connection, one model
//! registry and optionally one log sink. Everything here is plain
//! configuration; the live resources are owned by `quarry_db::Tenant`.

use serde::Deserialize;

use crate::error::{QuarryError, QuarryResult};
use crate::models::descriptor::is_identifier;

/// Upper bound on a store URI, in characters.
pub const MAX_URI_LEN: usize = 255;

/// Default bound on how long connecting may take.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default interval between connection health probes.
pub const DEFAULT_HEALTH_CHECK_INTERVAL_SECS: u64 = 30;

/// Capped size applied when `log_capped` is set without `log_max_size`.
pub const DEFAULT_CAPPED_SIZE_MB: u64 = 10;

/// Longest accepted `log_expiration_days`.
pub const MAX_RETENTION_DAYS: u32 = 365;

/// Store connection settings for one tenant.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    /// Engine URI (e.g. `mem://`, `ws://127.0.0.1:8000`, `rocksdb://data`).
    pub uri: String,
    /// SurrealDB namespace.
    pub namespace: String,
    /// SurrealDB database name.
    pub database: String,
    /// Root username; omitted for embedded engines.
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Seconds between health probes; `0` disables the watchdog.
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_secs: u64,
}

fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

fn default_health_check_interval() -> u64 {
    DEFAULT_HEALTH_CHECK_INTERVAL_SECS
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            uri: "mem://".into(),
            namespace: "quarry".into(),
            database: "main".into(),
            username: None,
            password: None,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            health_check_interval_secs: DEFAULT_HEALTH_CHECK_INTERVAL_SECS,
        }
    }
}

impl ConnectionConfig {
    /// Connection settings for `uri` with default namespace and timeouts.
    pub fn for_uri(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            ..Default::default()
        }
    }

    /// Check presence, length bounds and URI syntax before any I/O.
    pub fn validate(&self) -> QuarryResult<()> {
        let uri = self.uri.trim();
        if uri.is_empty() {
            return Err(QuarryError::Config("connection URI is missing".into()));
        }
        let len = uri.chars().count();
        if len > MAX_URI_LEN {
            return Err(QuarryError::Config(format!(
                "connection URI is {len} characters long (max {MAX_URI_LEN})"
            )));
        }
        url::Url::parse(uri)
            .map_err(|e| QuarryError::Config(format!("malformed connection URI '{uri}': {e}")))?;
        if self.namespace.trim().is_empty() || self.database.trim().is_empty() {
            return Err(QuarryError::Config(
                "namespace and database must be set".into(),
            ));
        }
        if self.username.is_some() != self.password.is_some() {
            return Err(QuarryError::Config(
                "username and password must be supplied together".into(),
            ));
        }
        if self.connect_timeout_secs == 0 {
            return Err(QuarryError::Config(
                "connect timeout must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Fixed-capacity retention: the store evicts the oldest entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct CappedRetention {
    pub max_size_bytes: u64,
    pub max_docs: Option<u64>,
}

/// Resolved retention strategy of a log collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retention {
    /// Entries are kept forever.
    Unbounded,
    Capped(CappedRetention),
    /// Entries older than `days` are deleted by the store.
    Expiring { days: u32 },
}

/// Log sink settings.
#[derive(Debug, Clone)]
pub struct LogSinkConfig {
    pub collection_name: String,
    /// Mirror every entry to the console as well.
    pub console_mirror: bool,
    pub retention_days: Option<u32>,
    pub capped: Option<CappedRetention>,
    /// Dedicated connection for the sink; `None` reuses the tenant's.
    pub connection: Option<ConnectionConfig>,
}

impl LogSinkConfig {
    pub fn new(collection_name: impl Into<String>) -> Self {
        Self {
            collection_name: collection_name.into(),
            console_mirror: true,
            retention_days: None,
            capped: None,
            connection: None,
        }
    }

    /// Validate the settings and resolve the retention strategy.
    ///
    /// Time-based expiry and capacity eviction on one collection are
    /// contradictory; asking for both fails with
    /// [`QuarryError::ConflictingRetention`].
    pub fn retention(&self) -> QuarryResult<Retention> {
        if self.capped.is_some() && self.retention_days.is_some() {
            return Err(QuarryError::ConflictingRetention);
        }
        if !is_identifier(&self.collection_name) {
            return Err(QuarryError::Config(format!(
                "log collection name '{}' is not a valid identifier",
                self.collection_name
            )));
        }
        match (self.capped, self.retention_days) {
            (Some(capped), None) => {
                if capped.max_size_bytes == 0 || capped.max_docs == Some(0) {
                    return Err(QuarryError::Config(
                        "capped log size and document limit must be positive".into(),
                    ));
                }
                Ok(Retention::Capped(capped))
            }
            (None, Some(days)) => {
                if !(1..=MAX_RETENTION_DAYS).contains(&days) {
                    return Err(QuarryError::Config(format!(
                        "log retention must be between 1 and {MAX_RETENTION_DAYS} days, got {days}"
                    )));
                }
                Ok(Retention::Expiring { days })
            }
            (None, None) => Ok(Retention::Unbounded),
            (Some(_), Some(_)) => Err(QuarryError::ConflictingRetention),
        }
    }
}

/// Log settings as they appear in host configuration files.
#[derive(Debug, Clone, Deserialize)]
pub struct LogSettings {
    pub log_collection: String,
    #[serde(default)]
    pub log_capped: bool,
    /// Capped size in megabytes.
    #[serde(default)]
    pub log_max_size: Option<u64>,
    #[serde(default)]
    pub log_max_docs: Option<u64>,
    #[serde(default)]
    pub log_expiration_days: Option<u32>,
    #[serde(default = "default_console")]
    pub log_console: bool,
}

fn default_console() -> bool {
    true
}

impl LogSettings {
    /// Convert to a [`LogSinkConfig`], rejecting contradictory retention.
    pub fn into_sink_config(self) -> QuarryResult<LogSinkConfig> {
        if self.log_capped && self.log_expiration_days.is_some() {
            return Err(QuarryError::ConflictingRetention);
        }
        let capped = if self.log_capped {
            let size_mb = self.log_max_size.unwrap_or(DEFAULT_CAPPED_SIZE_MB);
            let max_size_bytes = size_mb.checked_mul(1024 * 1024).ok_or_else(|| {
                QuarryError::Config(format!("log_max_size of {size_mb} MB is too large"))
            })?;
            Some(CappedRetention {
                max_size_bytes,
                max_docs: self.log_max_docs,
            })
        } else {
            None
        };
        let config = LogSinkConfig {
            collection_name: self.log_collection,
            console_mirror: self.log_console,
            retention_days: self.log_expiration_days,
            capped,
            connection: None,
        };
        config.retention()?;
        Ok(config)
    }
}

/// Everything needed to bootstrap one tenant.
#[derive(Debug, Clone)]
pub struct TenantConfig {
    /// Human-readable tenant name, used in log fields.
    pub name: String,
    pub connection: ConnectionConfig,
    pub log: Option<LogSinkConfig>,
}

impl TenantConfig {
    pub fn new(name: impl Into<String>, connection: ConnectionConfig) -> Self {
        Self {
            name: name.into(),
            connection,
            log: None,
        }
    }

    pub fn with_log(mut self, log: LogSinkConfig) -> Self {
        self.log = Some(log);
        self
    }
}
