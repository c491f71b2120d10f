//! Durable, retention-bounded log sink.
//!
//! Entries are appended to one table per tenant. Writes never fail from
//! the caller's point of view: store errors are published on
//! [`LogSink::failures`] and counted, while the console mirror (a
//! `tracing` event) is emitted whether or not the store accepted the entry.

mod layer;
mod provision;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quarry_core::error::{QuarryError, QuarryResult};
use quarry_core::models::log::{LogEntry, LogLevel};
use quarry_core::models::tenant::{LogSinkConfig, Retention};
use serde_json::{Map, Value};
use surrealdb::Surreal;
use surrealdb::engine::any::Any;
use surrealdb_types::SurrealValue;
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace, warn};

pub use layer::LogSinkLayer;

use crate::connection::{ConnectionHandle, ConnectionManager};
use crate::error::DbError;

/// Target of console-mirror events.
pub const MIRROR_TARGET: &str = "quarry::log_mirror";

/// Target of the sink's own diagnostics.
const SINK_TARGET: &str = "quarry::log_sink";

const FAILURE_CHANNEL_CAPACITY: usize = 64;

/// A write the store did not accept.
#[derive(Debug, Clone)]
pub struct SinkFailure {
    pub collection: String,
    pub level: LogLevel,
    pub message: String,
    pub error: String,
    pub at: DateTime<Utc>,
}

/// A destination for tenant log entries.
#[async_trait]
pub trait LogTransport: Send + Sync {
    fn name(&self) -> &str;

    /// Whether [`LogTransport::close`] also closes a store connection.
    fn owns_connection(&self) -> bool;

    async fn write(&self, level: LogLevel, message: &str, meta: Value);

    async fn close(&self);
}

#[derive(Debug, SurrealValue)]
struct EntryRow {
    level: String,
    message: String,
    meta: Value,
    created_at: DateTime<Utc>,
}

struct SinkInner {
    collection: String,
    console_mirror: bool,
    retention: Retention,
    handle: ConnectionHandle,
    /// Present iff the sink opened its own connection.
    owned: Option<ConnectionManager>,
    failures: broadcast::Sender<SinkFailure>,
    failure_count: AtomicU64,
    closed: AtomicBool,
}

/// Handle to a provisioned log collection. Clones share state.
#[derive(Clone)]
pub struct LogSink {
    inner: Arc<SinkInner>,
}

impl LogSink {
    /// Provision the collection and return a sink writing to it.
    ///
    /// With a dedicated connection in `config` the sink owns that
    /// connection; otherwise it writes through `shared` and leaves it open
    /// on disconnect. Contradictory retention fails before any connection
    /// is opened or collection touched.
    pub async fn connect(config: &LogSinkConfig, shared: Option<&ConnectionHandle>) -> QuarryResult<Self> {
        let retention = config.retention()?;

        let (handle, owned) = match (&config.connection, shared) {
            (Some(own), _) => {
                let manager = ConnectionManager::new(own.clone());
                let handle = manager.connect().await?;
                (handle, Some(manager))
            }
            (None, Some(shared)) => (shared.clone(), None),
            (None, None) => {
                return Err(QuarryError::Config(
                    "log sink needs a dedicated connection or a shared one".into(),
                ));
            }
        };

        let provisioned = match handle.client() {
            Ok(db) => provision::provision(&db, &config.collection_name, retention).await,
            Err(e) => Err(e),
        };
        if let Err(e) = provisioned {
            if let Some(manager) = &owned {
                manager.disconnect().await;
            }
            return Err(e.into());
        }

        let (failures, _) = broadcast::channel(FAILURE_CHANNEL_CAPACITY);
        info!(
            target: SINK_TARGET,
            collection = %config.collection_name,
            owns_connection = owned.is_some(),
            console_mirror = config.console_mirror,
            "Log sink connected"
        );

        Ok(Self {
            inner: Arc::new(SinkInner {
                collection: config.collection_name.clone(),
                console_mirror: config.console_mirror,
                retention,
                handle,
                owned,
                failures,
                failure_count: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn collection(&self) -> &str {
        &self.inner.collection
    }

    pub fn retention(&self) -> Retention {
        self.inner.retention
    }

    pub fn owns_connection(&self) -> bool {
        self.inner.owned.is_some()
    }

    /// The connection entries are written through.
    pub fn handle(&self) -> &ConnectionHandle {
        &self.inner.handle
    }

    /// Subscribe to store failures. Only failures after the call are seen.
    pub fn failures(&self) -> broadcast::Receiver<SinkFailure> {
        self.inner.failures.subscribe()
    }

    /// Writes rejected by the store since connect.
    pub fn failure_count(&self) -> u64 {
        self.inner.failure_count.load(Ordering::Relaxed)
    }

    /// A `tracing` layer forwarding events into this sink.
    ///
    /// Spawns the writer task, so it must be called inside a Tokio runtime.
    pub fn layer(&self) -> LogSinkLayer {
        LogSinkLayer::spawn(self.clone())
    }

    /// Append one entry. Never fails; see [`LogSink::failures`].
    pub async fn write(&self, level: LogLevel, message: &str, meta: Value) {
        let meta = match meta {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".into(), other);
                map
            }
        };

        if self.inner.console_mirror {
            mirror(level, message, &meta);
        }

        if let Err(e) = self.insert(level, message, meta).await {
            self.report(level, message, e);
        }
    }

    async fn insert(&self, level: LogLevel, message: &str, meta: Map<String, Value>) -> Result<(), DbError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(DbError::Closed);
        }
        let size = message.len() + Value::Object(meta.clone()).to_string().len();
        let sql = format!(
            "CREATE {} SET level = $level, message = $message, meta = $meta, size = $size RETURN NONE",
            self.inner.collection
        );
        self.db()?
            .query(sql)
            .bind(("level", level.as_str().to_string()))
            .bind(("message", message.to_string()))
            .bind(("meta", Value::Object(meta)))
            .bind(("size", size as i64))
            .await?
            .check()
            .map_err(DbError::query)?;
        Ok(())
    }

    fn report(&self, level: LogLevel, message: &str, err: DbError) {
        self.inner.failure_count.fetch_add(1, Ordering::Relaxed);
        error!(
            target: SINK_TARGET,
            collection = %self.inner.collection,
            error = %err,
            "Log entry was not persisted"
        );
        // No subscribers is fine.
        let _ = self.inner.failures.send(SinkFailure {
            collection: self.inner.collection.clone(),
            level,
            message: message.to_string(),
            error: err.to_string(),
            at: Utc::now(),
        });
    }

    /// The newest `limit` entries, newest first.
    pub async fn recent(&self, limit: usize) -> QuarryResult<Vec<LogEntry>> {
        let sql = format!(
            "SELECT level, message, meta, created_at FROM {} ORDER BY created_at DESC LIMIT $limit",
            self.inner.collection
        );
        let mut result = self
            .db()?
            .query(sql)
            .bind(("limit", limit as i64))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<EntryRow> = result.take(0).map_err(DbError::decode)?;
        rows.into_iter()
            .map(|row| -> QuarryResult<LogEntry> {
                Ok(LogEntry {
                    level: row.level.parse()?,
                    message: row.message,
                    meta: row.meta,
                    created_at: row.created_at,
                })
            })
            .collect()
    }

    /// Stop writing. Closes the connection only if the sink owns it; safe
    /// to call repeatedly.
    pub async fn disconnect(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            warn!(target: SINK_TARGET, collection = %self.inner.collection, "Log sink already closed");
            return;
        }
        match &self.inner.owned {
            Some(manager) => manager.disconnect().await,
            None => debug!(
                target: SINK_TARGET,
                collection = %self.inner.collection,
                "Log sink closed; shared connection left open"
            ),
        }
    }

    fn db(&self) -> Result<Surreal<Any>, DbError> {
        self.inner.handle.client()
    }
}

#[async_trait]
impl LogTransport for LogSink {
    fn name(&self) -> &str {
        self.collection()
    }

    fn owns_connection(&self) -> bool {
        LogSink::owns_connection(self)
    }

    async fn write(&self, level: LogLevel, message: &str, meta: Value) {
        LogSink::write(self, level, message, meta).await;
    }

    async fn close(&self) {
        self.disconnect().await;
    }
}

fn mirror(level: LogLevel, message: &str, meta: &Map<String, Value>) {
    let meta = Value::Object(meta.clone());
    match level {
        LogLevel::Error => error!(target: MIRROR_TARGET, meta = %meta, "{message}"),
        LogLevel::Warn => warn!(target: MIRROR_TARGET, meta = %meta, "{message}"),
        LogLevel::Info => info!(target: MIRROR_TARGET, meta = %meta, "{message}"),
        LogLevel::Debug => debug!(target: MIRROR_TARGET, meta = %meta, "{message}"),
        LogLevel::Trace => trace!(target: MIRROR_TARGET, meta = %meta, "{message}"),
    }
}
