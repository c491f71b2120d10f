//! Integration tests for the log sink using in-memory SurrealDB.

use std::time::Duration;

use quarry_core::error::QuarryError;
use quarry_core::models::log::LogLevel;
use quarry_core::models::tenant::{CappedRetention, ConnectionConfig, LogSettings, LogSinkConfig};
use quarry_db::{ConnectionHandle, ConnectionManager, ConnectionState, LogSink, LogTransport};
use serde_json::{Value, json};
use tracing_subscriber::layer::SubscriberExt;

async fn shared() -> (ConnectionManager, ConnectionHandle) {
    let manager = ConnectionManager::new(ConnectionConfig::for_uri("mem://"));
    let handle = manager.connect().await.unwrap();
    (manager, handle)
}

async fn count(handle: &ConnectionHandle, table: &str) -> usize {
    let db = handle.client().unwrap();
    let mut result = db
        .query(format!("SELECT VALUE meta::id(id) FROM {table}"))
        .await
        .unwrap();
    let ids: Vec<Value> = result.take(0).unwrap();
    ids.len()
}

async fn events(handle: &ConnectionHandle, table: &str) -> Vec<String> {
    let db = handle.client().unwrap();
    let mut result = db.query(format!("INFO FOR TABLE {table}")).await.unwrap();
    let info: Option<Value> = result.take(0).unwrap();
    let mut names: Vec<String> = info.unwrap()["events"]
        .as_object()
        .map(|events| events.keys().cloned().collect())
        .unwrap_or_default();
    names.sort();
    names
}

#[tokio::test]
async fn conflicting_retention_fails_before_any_collection_exists() {
    let settings = LogSettings {
        log_collection: "app_log".into(),
        log_capped: true,
        log_max_size: Some(1),
        log_max_docs: None,
        log_expiration_days: Some(7),
        log_console: true,
    };
    assert!(matches!(
        settings.into_sink_config(),
        Err(QuarryError::ConflictingRetention)
    ));

    let (_manager, handle) = shared().await;
    let mut config = LogSinkConfig::new("app_log");
    config.retention_days = Some(7);
    config.capped = Some(CappedRetention {
        max_size_bytes: 1024,
        max_docs: None,
    });
    let err = LogSink::connect(&config, Some(&handle)).await.err().unwrap();
    assert!(matches!(err, QuarryError::ConflictingRetention));

    let db = handle.client().unwrap();
    let mut result = db.query("INFO FOR DB").await.unwrap();
    let info: Option<Value> = result.take(0).unwrap();
    assert!(info.unwrap()["tables"].get("app_log").is_none());
}

#[tokio::test]
async fn write_and_read_back() {
    let (_manager, handle) = shared().await;
    let sink = LogSink::connect(&LogSinkConfig::new("app_log"), Some(&handle))
        .await
        .unwrap();

    sink.write(LogLevel::Info, "user signed in", json!({ "user": "ann" }))
        .await;
    sink.write(LogLevel::Warn, "disk almost full", json!(93)).await;

    let entries = sink.recent(10).await.unwrap();
    assert_eq!(entries.len(), 2);
    let warn = entries.iter().find(|e| e.level == LogLevel::Warn).unwrap();
    assert_eq!(warn.message, "disk almost full");
    assert_eq!(warn.meta, json!({ "value": 93 }));
    let info = entries.iter().find(|e| e.level == LogLevel::Info).unwrap();
    assert_eq!(info.meta, json!({ "user": "ann" }));
    assert_eq!(sink.failure_count(), 0);
}

#[tokio::test]
async fn capped_collection_evicts_oldest() {
    let (_manager, handle) = shared().await;
    let mut config = LogSinkConfig::new("capped_log");
    config.capped = Some(CappedRetention {
        max_size_bytes: 1024 * 1024,
        max_docs: Some(3),
    });
    let sink = LogSink::connect(&config, Some(&handle)).await.unwrap();

    for i in 0..6 {
        sink.write(LogLevel::Info, &format!("entry {i}"), Value::Null)
            .await;
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert_eq!(count(&handle, "capped_log").await, 3);
    let messages: Vec<_> = sink
        .recent(10)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.message)
        .collect();
    assert!(messages.contains(&"entry 5".to_string()));
    assert!(!messages.contains(&"entry 0".to_string()));
    assert_eq!(sink.failure_count(), 0);
}

#[tokio::test]
async fn capped_collection_bounds_total_size() {
    let (_manager, handle) = shared().await;
    let mut config = LogSinkConfig::new("small_log");
    config.capped = Some(CappedRetention {
        max_size_bytes: 100,
        max_docs: None,
    });
    let sink = LogSink::connect(&config, Some(&handle)).await.unwrap();

    // Each entry is 30 bytes of message plus "{}".
    for i in 0..10 {
        sink.write(LogLevel::Debug, &format!("{i:0>30}"), Value::Null)
            .await;
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert_eq!(count(&handle, "small_log").await, 3);
}

#[tokio::test]
async fn ttl_rule_deletes_old_entries() {
    let (_manager, handle) = shared().await;
    let mut config = LogSinkConfig::new("audit_log");
    config.retention_days = Some(30);
    let sink = LogSink::connect(&config, Some(&handle)).await.unwrap();

    let db = handle.client().unwrap();
    db.query("CREATE audit_log SET level = 'info', message = 'ancient', created_at = time::now() - 40d")
        .await
        .unwrap()
        .check()
        .unwrap();
    sink.write(LogLevel::Info, "fresh", Value::Null).await;

    let messages: Vec<_> = sink
        .recent(10)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.message)
        .collect();
    assert_eq!(messages, vec!["fresh".to_string()]);
}

#[tokio::test]
async fn ttl_rule_is_idempotent() {
    let (_manager, handle) = shared().await;
    let mut config = LogSinkConfig::new("audit_log");
    config.retention_days = Some(30);
    LogSink::connect(&config, Some(&handle)).await.unwrap();
    LogSink::connect(&config, Some(&handle)).await.unwrap();

    config.retention_days = Some(90);
    LogSink::connect(&config, Some(&handle)).await.unwrap();

    assert_eq!(events(&handle, "audit_log").await, vec!["audit_log_ttl_90d".to_string()]);
}

#[tokio::test]
async fn switching_retention_replaces_the_previous_rule() {
    let (_manager, handle) = shared().await;
    let mut capped = LogSinkConfig::new("app_log");
    capped.capped = Some(CappedRetention {
        max_size_bytes: 1024,
        max_docs: Some(10),
    });
    LogSink::connect(&capped, Some(&handle)).await.unwrap();
    assert_eq!(events(&handle, "app_log").await, vec!["app_log_cap".to_string()]);

    let mut expiring = LogSinkConfig::new("app_log");
    expiring.retention_days = Some(30);
    LogSink::connect(&expiring, Some(&handle)).await.unwrap();
    assert_eq!(events(&handle, "app_log").await, vec!["app_log_ttl_30d".to_string()]);

    LogSink::connect(&capped, Some(&handle)).await.unwrap();
    assert_eq!(events(&handle, "app_log").await, vec!["app_log_cap".to_string()]);

    LogSink::connect(&LogSinkConfig::new("app_log"), Some(&handle))
        .await
        .unwrap();
    assert!(events(&handle, "app_log").await.is_empty());
}

#[tokio::test]
async fn shared_connection_survives_sink_disconnect() {
    let (_manager, handle) = shared().await;
    let sink = LogSink::connect(&LogSinkConfig::new("app_log"), Some(&handle))
        .await
        .unwrap();
    assert!(!sink.owns_connection());

    sink.disconnect().await;
    sink.disconnect().await;
    assert_eq!(handle.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn owned_connection_closes_with_sink() {
    let mut config = LogSinkConfig::new("own_log");
    config.connection = Some(ConnectionConfig::for_uri("mem://"));
    let sink = LogSink::connect(&config, None).await.unwrap();
    assert!(sink.owns_connection());

    LogTransport::close(&sink).await;

    let mut failures = sink.failures();
    sink.write(LogLevel::Error, "after close", Value::Null).await;
    let failure = failures.recv().await.unwrap();
    assert_eq!(failure.message, "after close");
    assert_eq!(failure.collection, "own_log");
    assert_eq!(sink.failure_count(), 1);
}

#[tokio::test]
async fn sink_without_connection_is_config_error() {
    let err = LogSink::connect(&LogSinkConfig::new("app_log"), None)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, QuarryError::Config(_)));
}

#[tokio::test]
async fn store_failures_do_not_raise() {
    let (manager, handle) = shared().await;
    let sink = LogSink::connect(&LogSinkConfig::new("app_log"), Some(&handle))
        .await
        .unwrap();
    let mut failures = sink.failures();

    manager.disconnect().await;
    sink.write(LogLevel::Info, "lost", json!({})).await;

    let failure = failures.recv().await.unwrap();
    assert_eq!(failure.level, LogLevel::Info);
    assert_eq!(sink.failure_count(), 1);
}

#[tokio::test]
async fn tracing_layer_forwards_events() {
    let (_manager, handle) = shared().await;
    let mut config = LogSinkConfig::new("traced_log");
    config.console_mirror = false;
    let sink = LogSink::connect(&config, Some(&handle)).await.unwrap();

    let subscriber = tracing_subscriber::registry().with(sink.layer());
    tracing::subscriber::with_default(subscriber, || {
        tracing::warn!(target: "billing", invoice = 42, "payment retried");
        tracing::info!(target: "quarry::log_sink", "internal, not forwarded");
    });

    let mut entries = Vec::new();
    for _ in 0..50 {
        entries = sink.recent(10).await.unwrap();
        if !entries.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].level, LogLevel::Warn);
    assert_eq!(entries[0].message, "payment retried");
    assert_eq!(entries[0].meta["invoice"], json!(42));
    assert_eq!(entries[0].meta["target"], json!("billing"));
}
