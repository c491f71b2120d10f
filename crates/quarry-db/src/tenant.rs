//! The tenant value: one connection, one model registry, optional log sink.
//!
//! Everything a tenant holds is owned here; there is no process-wide
//! registry or connection. Dropping a tenant without calling
//! [`Tenant::shutdown`] leaves its connection to close with the last
//! handle clone.

use std::sync::Arc;

use quarry_core::error::QuarryResult;
use quarry_core::models::log::LogLevel;
use quarry_core::models::tenant::TenantConfig;
use serde_json::Value;
use tracing::info;

use crate::connection::{ConnectionHandle, ConnectionManager};
use crate::log_sink::{LogSink, LogTransport};
use crate::registry::ModelRegistry;
use crate::repository::SurrealUserRepository;

pub struct Tenant {
    name: String,
    connection: ConnectionManager,
    handle: ConnectionHandle,
    registry: ModelRegistry,
    log_sink: Option<LogSink>,
    transports: Vec<Arc<dyn LogTransport>>,
}

impl Tenant {
    /// Connect, create the registry and provision the log sink.
    ///
    /// Log retention is validated before the connection is opened, so a
    /// contradictory configuration never touches the store.
    pub async fn bootstrap(config: TenantConfig) -> QuarryResult<Self> {
        if let Some(log) = &config.log {
            log.retention()?;
        }

        let connection = ConnectionManager::new(config.connection);
        let handle = connection.connect().await?;
        let registry = ModelRegistry::new(handle.clone());

        let log_sink = match &config.log {
            Some(log) => match LogSink::connect(log, Some(&handle)).await {
                Ok(sink) => Some(sink),
                Err(e) => {
                    connection.disconnect().await;
                    return Err(e);
                }
            },
            None => None,
        };

        let mut transports: Vec<Arc<dyn LogTransport>> = Vec::new();
        if let Some(sink) = &log_sink {
            transports.push(Arc::new(sink.clone()));
        }

        info!(
            tenant = %config.name,
            connection = %handle.id(),
            log_collection = ?log_sink.as_ref().map(LogSink::collection),
            "Tenant bootstrapped"
        );

        Ok(Self {
            name: config.name,
            connection,
            handle,
            registry,
            log_sink,
            transports,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn log_sink(&self) -> Option<&LogSink> {
        self.log_sink.as_ref()
    }

    /// Add another log destination; it is closed on shutdown.
    pub fn add_transport(&mut self, transport: Arc<dyn LogTransport>) {
        self.transports.push(transport);
    }

    /// The user repository, registering the user model on first use.
    pub async fn users(&self) -> QuarryResult<SurrealUserRepository> {
        SurrealUserRepository::bind(&self.registry).await
    }

    /// Write to every log transport.
    pub async fn log(&self, level: LogLevel, message: &str, meta: Value) {
        for transport in &self.transports {
            transport.write(level, message, meta.clone()).await;
        }
    }

    /// Close every transport, then the tenant connection.
    pub async fn shutdown(self) {
        for transport in &self.transports {
            if transport.owns_connection() {
                info!(tenant = %self.name, transport = transport.name(), "Closing log transport and its connection");
            }
            transport.close().await;
        }
        self.connection.disconnect().await;
        info!(tenant = %self.name, "Tenant shut down");
    }
}
