//! Compilation of model descriptors into SurrealDB DDL.
//!
//! Every model table is SCHEMAFULL. Optional fields are `option<T>`,
//! enumerations are enforced with ASSERT constraints, case-insensitive
//! fields are lowercased by the store, and unique fields get a UNIQUE
//! index. All statements are idempotent (`IF NOT EXISTS`), so a model can
//! be compiled again against a database that already holds its table.

use quarry_core::models::descriptor::{FieldKind, FieldSpec, ModelDescriptor};
use serde_json::Value;
use surrealdb::Surreal;
use surrealdb::engine::any::Any;
use tracing::debug;

use crate::error::DbError;

/// Name of the UNIQUE index backing `field` on `table`.
pub(crate) fn unique_index_name(table: &str, field: &str) -> String {
    format!("idx_{table}_{field}")
}

/// DDL defining the table, fields and indexes of `descriptor`.
///
/// The descriptor must have passed [`ModelDescriptor::check`]; names are
/// interpolated verbatim.
pub fn model_ddl(descriptor: &ModelDescriptor) -> String {
    let table = descriptor.name();
    let mut ddl = format!("DEFINE TABLE IF NOT EXISTS {table} SCHEMAFULL;\n");

    for field in descriptor.fields() {
        ddl.push_str(&field_ddl(table, field));
        ddl.push('\n');
    }

    ddl.push_str(&format!(
        "DEFINE FIELD IF NOT EXISTS created_at ON TABLE {table} TYPE datetime \
         DEFAULT time::now() READONLY;\n\
         DEFINE FIELD IF NOT EXISTS updated_at ON TABLE {table} TYPE datetime \
         DEFAULT time::now();\n"
    ));

    for field in descriptor.fields().iter().filter(|f| f.unique) {
        ddl.push_str(&format!(
            "DEFINE INDEX IF NOT EXISTS {index} ON TABLE {table} COLUMNS {name} UNIQUE;\n",
            index = unique_index_name(table, &field.name),
            name = field.name,
        ));
    }

    ddl
}

fn field_ddl(table: &str, field: &FieldSpec) -> String {
    let base = field.kind.surreal_type();
    let flexible = if field.kind == FieldKind::Object {
        " FLEXIBLE"
    } else {
        ""
    };
    let ty = if field.required {
        base.to_string()
    } else {
        format!("option<{base}>")
    };

    let mut stmt = format!(
        "DEFINE FIELD IF NOT EXISTS {name} ON TABLE {table} TYPE {ty}{flexible}",
        name = field.name
    );
    if let Some(default) = &field.default {
        stmt.push_str(&format!(" DEFAULT {}", literal(default)));
    }
    if field.lowercase && field.required {
        stmt.push_str(" VALUE string::lowercase($value)");
    }
    if !field.allowed.is_empty() {
        let allowed = field
            .allowed
            .iter()
            .map(|v| quote(v))
            .collect::<Vec<_>>()
            .join(", ");
        if field.required {
            stmt.push_str(&format!(" ASSERT $value IN [{allowed}]"));
        } else {
            stmt.push_str(&format!(" ASSERT $value = NONE OR $value IN [{allowed}]"));
        }
    }
    stmt.push(';');
    stmt
}

/// Render a JSON value as a SurrealQL literal.
fn literal(value: &Value) -> String {
    match value {
        Value::String(s) => quote(s),
        Value::Null => "NONE".into(),
        other => other.to_string(),
    }
}

fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// Apply the DDL of `descriptor` to the connected database.
pub(crate) async fn define_model(db: &Surreal<Any>, descriptor: &ModelDescriptor) -> Result<(), DbError> {
    let ddl = model_ddl(descriptor);
    debug!(model = descriptor.name(), "Applying model DDL");
    db.query(ddl).await?.check().map_err(DbError::query)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use quarry_core::models::descriptor::{FieldSpec, Model};
    use quarry_core::models::user::UserAccount;

    use super::*;

    #[test]
    fn user_ddl_has_unique_lowercased_email() {
        let ddl = model_ddl(&UserAccount::descriptor());
        assert!(ddl.starts_with("DEFINE TABLE IF NOT EXISTS user SCHEMAFULL;"));
        assert!(ddl.contains(
            "DEFINE FIELD IF NOT EXISTS email ON TABLE user TYPE string \
             VALUE string::lowercase($value);"
        ));
        assert!(ddl.contains("DEFINE INDEX IF NOT EXISTS idx_user_email ON TABLE user COLUMNS email UNIQUE;"));
        assert!(ddl.contains(
            "DEFINE FIELD IF NOT EXISTS lock_until ON TABLE user TYPE option<datetime>;"
        ));
        assert!(ddl.contains(
            "DEFINE FIELD IF NOT EXISTS role ON TABLE user TYPE string DEFAULT 'user' \
             ASSERT $value IN ['user', 'admin'];"
        ));
        assert!(ddl.contains(
            "DEFINE FIELD IF NOT EXISTS failed_login_attempts ON TABLE user TYPE int DEFAULT 0;"
        ));
    }

    #[test]
    fn optional_enumeration_accepts_none() {
        let desc = ModelDescriptor::new("ticket")
            .with_field(FieldSpec::string("state").one_of(&["open", "closed"]));
        let ddl = model_ddl(&desc);
        assert!(ddl.contains("TYPE option<string> ASSERT $value = NONE OR $value IN ['open', 'closed'];"));
    }

    #[test]
    fn objects_are_flexible() {
        let desc = ModelDescriptor::new("doc").with_field(FieldSpec::object("body").required());
        assert!(model_ddl(&desc).contains("body ON TABLE doc TYPE object FLEXIBLE;"));
    }

    #[test]
    fn string_literals_are_escaped() {
        assert_eq!(literal(&Value::from("it's")), "'it\\'s'");
        assert_eq!(literal(&Value::from(3)), "3");
        assert_eq!(literal(&Value::Bool(true)), "true");
    }
}
