//! Log collection provisioning.
//!
//! SurrealDB has neither capped tables nor TTL indexes, so both are
//! emulated with table events that run inside the inserting transaction.

use quarry_core::models::log::LogLevel;
use quarry_core::models::tenant::{CappedRetention, Retention};
use serde_json::Value;
use surrealdb::Surreal;
use surrealdb::engine::any::Any;
use tracing::{debug, info};

use crate::error::DbError;

/// Create the log table if needed and install its retention rule.
pub(crate) async fn provision(db: &Surreal<Any>, table: &str, retention: Retention) -> Result<(), DbError> {
    let existed = table_exists(db, table).await?;
    db.query(base_ddl(table)).await?.check().map_err(DbError::query)?;

    let existing = event_names(db, table).await?;
    let ddl = match retention {
        Retention::Unbounded => removals(table, &existing, None),
        Retention::Capped(capped) => {
            let mut ddl = removals(table, &existing, Some(cap_event(table).as_str()));
            ddl.push_str(&capped_ddl(table, capped));
            ddl
        }
        Retention::Expiring { days } => {
            let wanted = ttl_event(table, days);
            let mut ddl = removals(table, &existing, Some(wanted.as_str()));
            if existing.contains(&wanted) {
                debug!(collection = table, days, "Expiry rule already present");
            } else {
                ddl.push_str(&ttl_ddl(table, days));
            }
            ddl
        }
    };
    if !ddl.is_empty() {
        db.query(ddl).await?.check().map_err(DbError::query)?;
    }

    info!(
        collection = table,
        created = !existed,
        retention = ?retention,
        "Log collection provisioned"
    );
    Ok(())
}

async fn table_exists(db: &Surreal<Any>, table: &str) -> Result<bool, DbError> {
    let mut result = db.query("INFO FOR DB").await?;
    let info: Option<Value> = result.take(0).map_err(DbError::decode)?;
    Ok(info
        .as_ref()
        .and_then(|info| info.get("tables"))
        .and_then(|tables| tables.get(table))
        .is_some())
}

async fn event_names(db: &Surreal<Any>, table: &str) -> Result<Vec<String>, DbError> {
    let mut result = db.query(format!("INFO FOR TABLE {table}")).await?;
    let info: Option<Value> = result.take(0).map_err(DbError::decode)?;
    Ok(info
        .as_ref()
        .and_then(|info| info.get("events"))
        .and_then(Value::as_object)
        .map(|events| events.keys().cloned().collect())
        .unwrap_or_default())
}

fn base_ddl(table: &str) -> String {
    let levels = LogLevel::ALL
        .iter()
        .map(|l| format!("'{}'", l.as_str()))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "DEFINE TABLE IF NOT EXISTS {table} SCHEMAFULL;\n\
         DEFINE FIELD IF NOT EXISTS level ON TABLE {table} TYPE string \
             ASSERT $value IN [{levels}];\n\
         DEFINE FIELD IF NOT EXISTS message ON TABLE {table} TYPE string;\n\
         DEFINE FIELD IF NOT EXISTS meta ON TABLE {table} TYPE object FLEXIBLE DEFAULT {{}};\n\
         DEFINE FIELD IF NOT EXISTS size ON TABLE {table} TYPE int DEFAULT 0;\n\
         DEFINE FIELD IF NOT EXISTS created_at ON TABLE {table} TYPE datetime \
             DEFAULT time::now() READONLY;\n\
         DEFINE INDEX IF NOT EXISTS idx_{table}_created_at ON TABLE {table} COLUMNS created_at;\n"
    )
}

fn cap_event(table: &str) -> String {
    format!("{table}_cap")
}

/// TTL events carry their age in the name so an equivalent rule can be
/// recognised without parsing its definition.
fn ttl_event(table: &str, days: u32) -> String {
    format!("{table}_ttl_{days}d")
}

pub(crate) fn capped_ddl(table: &str, capped: CappedRetention) -> String {
    let max_size = capped.max_size_bytes;
    let docs_rule = match capped.max_docs {
        Some(max_docs) => format!(
            "LET $excess = count(SELECT id FROM {table}) - {max_docs};\n\
             IF $excess > 0 {{\n\
                 FOR $stale IN (SELECT id, created_at FROM {table} ORDER BY created_at ASC LIMIT $excess).id {{\n\
                     DELETE $stale;\n\
                 }};\n\
             }};\n"
        ),
        None => String::new(),
    };
    format!(
        "DEFINE EVENT OVERWRITE {event} ON TABLE {table} WHEN $event = 'CREATE' THEN {{\n\
         {docs_rule}\
         IF math::sum(SELECT VALUE size FROM {table}) > {max_size} {{\n\
             FOR $stale IN (SELECT id, created_at FROM {table} ORDER BY created_at ASC).id {{\n\
                 IF math::sum(SELECT VALUE size FROM {table}) > {max_size} {{\n\
                     DELETE $stale;\n\
                 }};\n\
             }};\n\
         }};\n\
         }};",
        event = cap_event(table),
    )
}

pub(crate) fn ttl_ddl(table: &str, days: u32) -> String {
    format!(
        "DEFINE EVENT OVERWRITE {event} ON TABLE {table} WHEN $event = 'CREATE' THEN {{\n\
             DELETE {table} WHERE created_at < time::now() - {days}d;\n\
         }};",
        event = ttl_event(table, days),
    )
}

/// `REMOVE EVENT` statements for every retention event on `table` except
/// `keep`. A collection carries at most one retention rule.
fn removals(table: &str, existing: &[String], keep: Option<&str>) -> String {
    let cap = cap_event(table);
    let ttl_prefix = format!("{table}_ttl_");
    existing
        .iter()
        .filter(|name| **name == cap || name.starts_with(&ttl_prefix))
        .filter(|name| Some(name.as_str()) != keep)
        .map(|name| format!("REMOVE EVENT IF EXISTS {name} ON TABLE {table};\n"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capped_rule_limits_documents_and_size() {
        let ddl = capped_ddl(
            "app_log",
            CappedRetention {
                max_size_bytes: 4096,
                max_docs: Some(100),
            },
        );
        assert!(ddl.starts_with("DEFINE EVENT OVERWRITE app_log_cap ON TABLE app_log"));
        assert!(ddl.contains("count(SELECT id FROM app_log) - 100"));
        assert!(ddl.contains("> 4096"));
    }

    #[test]
    fn capped_rule_without_document_limit() {
        let ddl = capped_ddl(
            "app_log",
            CappedRetention {
                max_size_bytes: 10,
                max_docs: None,
            },
        );
        assert!(!ddl.contains("$excess"));
    }

    #[test]
    fn ttl_rule_is_named_by_age() {
        let ddl = ttl_ddl("audit", 30);
        assert!(ddl.contains("DEFINE EVENT OVERWRITE audit_ttl_30d ON TABLE audit"));
        assert!(ddl.contains("created_at < time::now() - 30d"));
    }

    #[test]
    fn removals_keep_only_the_requested_rule() {
        let existing = vec![
            "app_log_cap".to_string(),
            "app_log_ttl_7d".to_string(),
            "app_log_ttl_30d".to_string(),
            "unrelated".to_string(),
        ];
        let ddl = removals("app_log", &existing, Some("app_log_ttl_30d"));
        assert!(ddl.contains("REMOVE EVENT IF EXISTS app_log_cap ON TABLE app_log"));
        assert!(ddl.contains("REMOVE EVENT IF EXISTS app_log_ttl_7d ON TABLE app_log"));
        assert!(!ddl.contains("app_log_ttl_30d"));
        assert!(!ddl.contains("unrelated"));

        let ddl = removals("app_log", &existing, None);
        assert_eq!(ddl.lines().count(), 3);
    }

    #[test]
    fn base_table_enumerates_levels() {
        let ddl = base_ddl("app_log");
        assert!(ddl.contains("ASSERT $value IN ['error', 'warn', 'info', 'debug', 'trace']"));
        assert!(ddl.contains("idx_app_log_created_at"));
    }
}
