//! SurrealDB connection management.
//!
//! One [`ConnectionManager`] per tenant owns at most one live
//! [`ConnectionHandle`]. Handles are cheap clones sharing the same client;
//! once closed, every clone reports [`DbError::Closed`].

use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::Duration;

use quarry_core::error::{QuarryError, QuarryResult};
use quarry_core::models::tenant::ConnectionConfig;
use surrealdb::Surreal;
use surrealdb::engine::any::{self, Any};
use surrealdb::opt::auth::Root;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::DbError;

/// Lifecycle of a connection handle. `Disconnected` after `Connected` is
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

struct HandleInner {
    id: Uuid,
    uri: String,
    client: RwLock<Option<Surreal<Any>>>,
    state: watch::Sender<ConnectionState>,
}

/// Shared reference to one tenant's store connection.
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<HandleInner>,
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.inner.id)
            .field("uri", &self.inner.uri)
            .field("state", &self.state())
            .finish()
    }
}

impl ConnectionHandle {
    fn connecting(uri: &str) -> Self {
        let (state, _) = watch::channel(ConnectionState::Connecting);
        Self {
            inner: Arc::new(HandleInner {
                id: Uuid::new_v4(),
                uri: uri.to_string(),
                client: RwLock::new(None),
                state,
            }),
        }
    }

    fn attach(&self, client: Surreal<Any>) {
        *self
            .inner
            .client
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(client);
        self.inner.state.send_replace(ConnectionState::Connected);
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn uri(&self) -> &str {
        &self.inner.uri
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Observe state transitions, including asynchronous disconnects.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// The underlying client, or [`DbError::Closed`] once disconnected.
    pub fn client(&self) -> Result<Surreal<Any>, DbError> {
        self.inner
            .client
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(DbError::Closed)
    }

    /// Drop the client and publish `Disconnected`. Returns `false` if the
    /// handle was already closed.
    fn close(&self) -> bool {
        let client = self
            .inner
            .client
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.inner.state.send_replace(ConnectionState::Disconnected);
        client.is_some()
    }

    fn downgrade(&self) -> Weak<HandleInner> {
        Arc::downgrade(&self.inner)
    }
}

/// Owns the single live connection of one tenant.
pub struct ConnectionManager {
    config: ConnectionConfig,
    slot: RwLock<Option<ConnectionHandle>>,
    connect_lock: Mutex<()>,
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            slot: RwLock::new(None),
            connect_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// The current handle, if one was opened (it may be still connecting or
    /// already closed).
    pub fn handle(&self) -> Option<ConnectionHandle> {
        self.slot.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Connect using the configured URI, or return the live handle.
    ///
    /// The new handle is published in state `Connecting` before the store is
    /// contacted. Fails with [`QuarryError::Config`] on a missing or
    /// malformed URI and with [`QuarryError::Connection`] if the store cannot
    /// be reached within the configured timeout.
    pub async fn connect(&self) -> QuarryResult<ConnectionHandle> {
        let _guard = self.connect_lock.lock().await;
        if let Some(handle) = self.handle().filter(ConnectionHandle::is_connected) {
            return Ok(handle);
        }

        self.config.validate()?;
        let handle = ConnectionHandle::connecting(self.config.uri.trim());
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = Some(handle.clone());

        establish(&handle, &self.config).await?;
        spawn_state_observer(&handle);
        if self.config.health_check_interval_secs > 0 {
            spawn_watchdog(
                &handle,
                Duration::from_secs(self.config.health_check_interval_secs),
            );
        }
        Ok(handle)
    }

    /// Close the connection. Safe to call repeatedly: closing a closed or
    /// never-opened connection logs a warning and returns.
    pub async fn disconnect(&self) {
        let _guard = self.connect_lock.lock().await;
        disconnect_handle(self.handle().as_ref());
    }
}

/// Close `handle`, tolerating a missing or already-closed one.
pub(crate) fn disconnect_handle(handle: Option<&ConnectionHandle>) {
    match handle {
        Some(handle) => {
            if handle.close() {
                info!(uri = %handle.uri(), connection = %handle.id(), "Disconnected from SurrealDB");
            } else {
                warn!(uri = %handle.uri(), connection = %handle.id(), "Connection already closed");
            }
        }
        None => warn!("Disconnect requested but no connection was opened"),
    }
}

/// Drive a `Connecting` handle to `Connected`, or close it on failure.
async fn establish(handle: &ConnectionHandle, config: &ConnectionConfig) -> QuarryResult<()> {
    let uri = handle.uri();
    info!(
        uri = %uri,
        namespace = %config.namespace,
        database = %config.database,
        "Connecting to SurrealDB"
    );

    let connecting = async {
        let db = any::connect(uri).await?;
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            db.signin(Root {
                username: username.clone(),
                password: password.clone(),
            })
            .await?;
        }
        db.use_ns(&config.namespace)
            .use_db(&config.database)
            .await?;
        Ok::<_, surrealdb::Error>(db)
    };

    let timeout = Duration::from_secs(config.connect_timeout_secs);
    let reason = match tokio::time::timeout(timeout, connecting).await {
        Ok(Ok(db)) => {
            handle.attach(db);
            info!(connection = %handle.id(), "Successfully connected to SurrealDB");
            return Ok(());
        }
        Ok(Err(e)) => e.to_string(),
        Err(_) => format!("timed out after {}s", config.connect_timeout_secs),
    };

    handle.close();
    Err(QuarryError::Connection {
        uri: uri.to_string(),
        reason,
    })
}

fn spawn_state_observer(handle: &ConnectionHandle) {
    let mut states = handle.subscribe();
    let uri = handle.uri().to_string();
    let id = handle.id();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            if state == ConnectionState::Disconnected {
                warn!(uri = %uri, connection = %id, "Connection disconnected");
                break;
            }
            debug!(uri = %uri, connection = %id, ?state, "Connection state changed");
        }
    });
}

/// Probe the store periodically; a failed probe closes the handle for good.
fn spawn_watchdog(handle: &ConnectionHandle, interval: Duration) {
    let weak = handle.downgrade();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            let Some(inner) = weak.upgrade() else { break };
            let handle = ConnectionHandle { inner };
            let Ok(client) = handle.client() else { break };
            if let Err(e) = client.health().await {
                warn!(
                    uri = %handle.uri(),
                    connection = %handle.id(),
                    error = %e,
                    "Health probe failed, closing connection"
                );
                handle.close();
                break;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn malformed_uri_is_config_error() {
        let manager = ConnectionManager::new(ConnectionConfig::for_uri("no scheme here"));
        assert!(matches!(
            manager.connect().await,
            Err(QuarryError::Config(_))
        ));
    }

    #[tokio::test]
    async fn connect_is_reused_until_closed() {
        let manager = ConnectionManager::new(ConnectionConfig::for_uri("mem://"));
        let first = manager.connect().await.unwrap();
        let second = manager.connect().await.unwrap();
        assert_eq!(first.id(), second.id());

        manager.disconnect().await;
        assert_eq!(first.state(), ConnectionState::Disconnected);
        assert!(matches!(second.client(), Err(DbError::Closed)));

        let third = manager.connect().await.unwrap();
        assert_ne!(first.id(), third.id());
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let manager = ConnectionManager::new(ConnectionConfig::for_uri("mem://"));
        manager.disconnect().await;
        manager.connect().await.unwrap();
        manager.disconnect().await;
        manager.disconnect().await;
        disconnect_handle(None);
    }

    #[tokio::test]
    async fn handle_passes_through_connecting() {
        let config = ConnectionConfig::for_uri("mem://");
        let handle = ConnectionHandle::connecting("mem://");
        let mut states = handle.subscribe();
        assert_eq!(*states.borrow_and_update(), ConnectionState::Connecting);
        assert!(matches!(handle.client(), Err(DbError::Closed)));

        establish(&handle, &config).await.unwrap();
        states.changed().await.unwrap();
        assert_eq!(*states.borrow(), ConnectionState::Connected);
        assert!(handle.client().is_ok());
    }

    #[tokio::test]
    async fn failed_connect_publishes_closed_handle() {
        let mut config = ConnectionConfig::for_uri("ws://127.0.0.1:1");
        config.connect_timeout_secs = 1;
        let manager = ConnectionManager::new(config);
        assert!(manager.handle().is_none());

        assert!(matches!(
            manager.connect().await,
            Err(QuarryError::Connection { .. })
        ));
        let handle = manager.handle().unwrap();
        assert_eq!(handle.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn subscribers_see_disconnect() {
        let manager = ConnectionManager::new(ConnectionConfig::for_uri("mem://"));
        let handle = manager.connect().await.unwrap();
        let mut states = handle.subscribe();
        assert_eq!(*states.borrow(), ConnectionState::Connected);

        manager.disconnect().await;
        states.changed().await.unwrap();
        assert_eq!(*states.borrow(), ConnectionState::Disconnected);
    }
}
