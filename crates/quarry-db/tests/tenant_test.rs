//! Integration tests for tenant bootstrap and shutdown.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use quarry_core::error::QuarryError;
use quarry_core::models::log::LogLevel;
use quarry_core::models::tenant::{CappedRetention, ConnectionConfig, LogSinkConfig, TenantConfig};
use quarry_core::models::user::CreateUser;
use quarry_core::repository::UserRepository;
use quarry_db::{ConnectionHandle, ConnectionState, LogSink, LogTransport, Tenant};
use serde_json::{Value, json};

fn config(name: &str) -> TenantConfig {
    TenantConfig::new(name, ConnectionConfig::for_uri("mem://"))
}

#[tokio::test]
async fn bootstrap_without_log_sink() {
    let tenant = Tenant::bootstrap(config("acme")).await.unwrap();
    assert_eq!(tenant.name(), "acme");
    assert!(tenant.log_sink().is_none());
    assert!(tenant.handle().is_connected());

    let handle = tenant.handle().clone();
    tenant.shutdown().await;
    assert_eq!(handle.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn tenants_are_isolated() {
    let a = Tenant::bootstrap(config("a")).await.unwrap();
    let b = Tenant::bootstrap(config("b")).await.unwrap();

    let users_a = a.users().await.unwrap();
    let users_b = b.users().await.unwrap();
    let input = CreateUser {
        email: "same@example.com".into(),
        password: "pw-123456".into(),
        role: None,
    };
    users_a.create(input.clone()).await.unwrap();
    users_b.create(input).await.unwrap();

    assert!(users_a.get_by_email("same@example.com").await.is_ok());
    assert_eq!(a.registry().names().await, vec!["user".to_string()]);

    a.shutdown().await;
    assert!(users_b.get_by_email("same@example.com").await.is_ok());
    b.shutdown().await;
}

#[tokio::test]
async fn log_sink_shares_tenant_connection() {
    let tenant = Tenant::bootstrap(config("logged").with_log(LogSinkConfig::new("tenant_log")))
        .await
        .unwrap();
    let sink = tenant.log_sink().unwrap().clone();
    assert!(!sink.owns_connection());

    tenant
        .log(LogLevel::Info, "tenant ready", json!({ "tenant": "logged" }))
        .await;
    let entries = sink.recent(5).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].message, "tenant ready");

    let handle = tenant.handle().clone();
    tenant.shutdown().await;
    assert_eq!(handle.state(), ConnectionState::Disconnected);
}

/// Records every message and the tenant connection state seen at close.
struct Recorder {
    tenant_handle: ConnectionHandle,
    messages: Mutex<Vec<String>>,
    state_at_close: Mutex<Option<ConnectionState>>,
}

#[async_trait]
impl LogTransport for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    fn owns_connection(&self) -> bool {
        false
    }

    async fn write(&self, _level: LogLevel, message: &str, _meta: Value) {
        self.messages.lock().unwrap().push(message.to_string());
    }

    async fn close(&self) {
        *self.state_at_close.lock().unwrap() = Some(self.tenant_handle.state());
    }
}

#[tokio::test]
async fn added_transports_receive_logs_and_close_on_shutdown() {
    let mut tenant = Tenant::bootstrap(config("multi").with_log(LogSinkConfig::new("tenant_log")))
        .await
        .unwrap();
    let shared = tenant.log_sink().unwrap().clone();

    let mut audit = LogSinkConfig::new("audit_log");
    audit.connection = Some(ConnectionConfig::for_uri("mem://"));
    let owned = LogSink::connect(&audit, None).await.unwrap();
    assert!(owned.owns_connection());
    assert_ne!(owned.handle().id(), tenant.handle().id());

    let recorder = Arc::new(Recorder {
        tenant_handle: tenant.handle().clone(),
        messages: Mutex::new(Vec::new()),
        state_at_close: Mutex::new(None),
    });
    tenant.add_transport(Arc::new(owned.clone()));
    tenant.add_transport(recorder.clone());

    tenant.log(LogLevel::Warn, "disk nearly full", json!({ "pct": 91 })).await;
    for sink in [&shared, &owned] {
        let entries = sink.recent(5).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "disk nearly full");
        assert_eq!(entries[0].level, LogLevel::Warn);
    }
    assert_eq!(*recorder.messages.lock().unwrap(), vec!["disk nearly full".to_string()]);

    let tenant_handle = tenant.handle().clone();
    tenant.shutdown().await;
    assert_eq!(owned.handle().state(), ConnectionState::Disconnected);
    assert_eq!(tenant_handle.state(), ConnectionState::Disconnected);
    assert_eq!(
        *recorder.state_at_close.lock().unwrap(),
        Some(ConnectionState::Connected)
    );
}

#[tokio::test]
async fn conflicting_retention_never_connects() {
    let mut log = LogSinkConfig::new("bad_log");
    log.retention_days = Some(10);
    log.capped = Some(CappedRetention {
        max_size_bytes: 1024,
        max_docs: None,
    });
    let result = Tenant::bootstrap(config("bad").with_log(log)).await;
    assert!(matches!(result, Err(QuarryError::ConflictingRetention)));
}

#[tokio::test]
async fn unreachable_store_is_connection_error() {
    let mut connection = ConnectionConfig::for_uri("ws://127.0.0.1:1");
    connection.connect_timeout_secs = 1;
    let result = Tenant::bootstrap(TenantConfig::new("offline", connection)).await;
    assert!(matches!(result, Err(QuarryError::Connection { .. })));
}
