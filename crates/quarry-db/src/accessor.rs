//! SurrealDB implementation of [`RecordAccessor`].
//!
//! Records live in the model's table under `type::record(table, uuid)`.
//! Statements are assembled from descriptor field names only (already
//! checked to be identifiers); every value goes through a bind parameter.

use std::sync::Arc;

use quarry_core::error::{QuarryError, QuarryResult};
use quarry_core::models::descriptor::{FieldKind, ModelDescriptor, RESERVED_FIELDS};
use quarry_core::models::record::{Document, Filter, Record};
use quarry_core::repository::RecordAccessor;
use quarry_core::validation::{self, FieldViolation, Mode};
use serde_json::Value;
use surrealdb::Surreal;
use surrealdb::engine::any::Any;
use tracing::debug;
use uuid::Uuid;

use crate::error::DbError;
use crate::registry::RegisteredModel;
use crate::schema::unique_index_name;

/// CRUD access to one registered model.
#[derive(Debug, Clone)]
pub struct SurrealRecordAccessor {
    model: Arc<RegisteredModel>,
}

impl SurrealRecordAccessor {
    pub fn new(model: Arc<RegisteredModel>) -> Self {
        Self { model }
    }

    fn table(&self) -> &str {
        self.model.name()
    }

    fn client(&self) -> QuarryResult<Surreal<Any>> {
        Ok(self.model.handle().client()?)
    }

    fn select_clause(&self, projection: Option<&[String]>) -> QuarryResult<String> {
        let Some(fields) = projection else {
            return Ok("*, meta::id(id) AS record_id OMIT id".into());
        };
        let unknown: Vec<_> = fields
            .iter()
            .filter(|f| !self.is_known_field(f))
            .map(|f| FieldViolation::new(f.as_str(), "unknown field in projection"))
            .collect();
        if !unknown.is_empty() {
            return Err(QuarryError::Validation { violations: unknown });
        }
        let mut clause = String::from("meta::id(id) AS record_id");
        for field in fields.iter().filter(|f| f.as_str() != "id") {
            clause.push_str(", ");
            clause.push_str(field);
        }
        Ok(clause)
    }

    fn is_known_field(&self, name: &str) -> bool {
        RESERVED_FIELDS.contains(&name) || self.model.descriptor().field(name).is_some()
    }

    /// Render `filter` as a WHERE clause plus its bind values.
    fn where_clause(&self, filter: Filter) -> QuarryResult<(String, Vec<(String, Value)>)> {
        let descriptor = self.model.descriptor();
        let mut violations = Vec::new();
        let mut conditions = Vec::new();
        let mut binds = Vec::new();

        for (i, (field, value)) in filter.into_iter().enumerate() {
            let param = format!("f{i}");
            if field == "id" {
                let id = value
                    .as_str()
                    .map(parse_id)
                    .transpose()?
                    .ok_or_else(|| QuarryError::InvalidId { id: value.to_string() })?;
                conditions.push(format!("id = type::record('{}', ${param})", self.table()));
                binds.push((param, Value::String(id.to_string())));
                continue;
            }
            let spec = descriptor.field(&field);
            if spec.is_none() && !RESERVED_FIELDS.contains(&field.as_str()) {
                violations.push(FieldViolation::new(field, "unknown field in filter"));
                continue;
            }
            if value.is_null() {
                conditions.push(format!("{field} = NONE"));
                continue;
            }
            match spec {
                Some(spec) => {
                    let value = match (&value, spec.lowercase) {
                        (Value::String(s), true) => Value::String(s.to_lowercase()),
                        _ => value,
                    };
                    if spec.kind == FieldKind::Datetime {
                        conditions.push(format!("{field} = <datetime> ${param}"));
                    } else {
                        conditions.push(format!("{field} = ${param}"));
                    }
                    binds.push((param, value));
                }
                None => {
                    conditions.push(format!("{field} = <datetime> ${param}"));
                    binds.push((param, value));
                }
            }
        }

        if !violations.is_empty() {
            return Err(QuarryError::Validation { violations });
        }
        let clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };
        Ok((clause, binds))
    }

    /// Render a validated document as SET assignments plus bind values.
    /// Nulls clear the field.
    fn assignments(&self, data: Document) -> (Vec<String>, Vec<(String, Value)>) {
        let descriptor = self.model.descriptor();
        let mut sets = Vec::new();
        let mut binds = Vec::new();
        for (i, (field, value)) in data.into_iter().enumerate() {
            if value.is_null() {
                sets.push(format!("{field} = NONE"));
                continue;
            }
            let param = format!("v{i}");
            let is_datetime = descriptor
                .field(&field)
                .is_some_and(|spec| spec.kind == FieldKind::Datetime);
            if is_datetime {
                sets.push(format!("{field} = <datetime> ${param}"));
            } else {
                sets.push(format!("{field} = ${param}"));
            }
            binds.push((param, value));
        }
        (sets, binds)
    }

    /// Map a unique-index conflict back to the field it guards.
    fn write_error(&self, err: DbError) -> QuarryError {
        match err {
            DbError::Conflict { index, .. } => {
                let prefix = unique_index_name(self.table(), "");
                let field = index.strip_prefix(&prefix).unwrap_or(&index);
                QuarryError::invalid_field(field, "must be unique")
            }
            other => other.into(),
        }
    }

    async fn run(
        &self,
        sql: String,
        binds: Vec<(String, Value)>,
        statement: usize,
    ) -> QuarryResult<Vec<Record>> {
        debug!(model = self.table(), sql = %sql, "Executing record query");
        let client = self.client()?;
        let mut query = client.query(sql);
        for bind in binds {
            query = query.bind(bind);
        }
        let mut response = query
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| self.write_error(DbError::query(e)))?;
        let rows: Vec<Value> = response.take(statement).map_err(DbError::decode)?;
        rows.into_iter().map(into_record).collect()
    }
}

impl RecordAccessor for SurrealRecordAccessor {
    fn descriptor(&self) -> &ModelDescriptor {
        self.model.descriptor()
    }

    async fn find(&self, filter: Filter, projection: Option<Vec<String>>) -> QuarryResult<Vec<Record>> {
        let select = self.select_clause(projection.as_deref())?;
        let (clause, binds) = self.where_clause(filter)?;
        let sql = format!("SELECT {select} FROM {}{clause}", self.table());
        self.run(sql, binds, 0).await
    }

    async fn find_one(&self, filter: Filter) -> QuarryResult<Option<Record>> {
        let select = self.select_clause(None)?;
        let (clause, binds) = self.where_clause(filter)?;
        let sql = format!("SELECT {select} FROM {}{clause} LIMIT 1", self.table());
        Ok(self.run(sql, binds, 0).await?.into_iter().next())
    }

    async fn find_by_id(&self, id: &str) -> QuarryResult<Option<Record>> {
        let id = parse_id(id)?;
        let select = self.select_clause(None)?;
        let sql = format!(
            "SELECT {select} FROM type::record('{}', $id)",
            self.table()
        );
        let binds = vec![("id".to_string(), Value::String(id.to_string()))];
        Ok(self.run(sql, binds, 0).await?.into_iter().next())
    }

    async fn create(&self, data: Document) -> QuarryResult<Record> {
        let data = validation::validate(self.model.descriptor(), &data, Mode::Create)?;
        let id = Uuid::new_v4();
        let table = self.table();
        let select = self.select_clause(None)?;

        let (sets, mut binds) = self.assignments(data);
        let set_clause = if sets.is_empty() {
            String::new()
        } else {
            format!(" SET {}", sets.join(", "))
        };
        let sql = format!(
            "CREATE type::record('{table}', $id){set_clause} RETURN NONE;\n\
             SELECT {select} FROM type::record('{table}', $id);"
        );
        binds.push(("id".to_string(), Value::String(id.to_string())));

        self.run(sql, binds, 1)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                DbError::NotFound {
                    entity: table.to_string(),
                    id: id.to_string(),
                }
                .into()
            })
    }

    async fn update_by_id(&self, id: &str, patch: Document) -> QuarryResult<Option<Record>> {
        let id = parse_id(id)?;
        let patch = validation::validate(self.model.descriptor(), &patch, Mode::Patch)?;
        let table = self.table();
        let select = self.select_clause(None)?;

        let (mut sets, mut binds) = self.assignments(patch);
        sets.push("updated_at = time::now()".into());
        let sql = format!(
            "UPDATE type::record('{table}', $id) SET {} RETURN NONE;\n\
             SELECT {select} FROM type::record('{table}', $id);",
            sets.join(", ")
        );
        binds.push(("id".to_string(), Value::String(id.to_string())));

        Ok(self.run(sql, binds, 1).await?.into_iter().next())
    }

    async fn delete_by_id(&self, id: &str) -> QuarryResult<Option<Record>> {
        let id = parse_id(id)?;
        let table = self.table();
        let select = self.select_clause(None)?;
        let sql = format!(
            "SELECT {select} FROM type::record('{table}', $id);\n\
             DELETE type::record('{table}', $id);"
        );
        let binds = vec![("id".to_string(), Value::String(id.to_string()))];
        Ok(self.run(sql, binds, 0).await?.into_iter().next())
    }
}

fn parse_id(id: &str) -> QuarryResult<Uuid> {
    Uuid::parse_str(id.trim()).map_err(|_| QuarryError::InvalidId { id: id.to_string() })
}

fn into_record(row: Value) -> QuarryResult<Record> {
    let Value::Object(mut data) = row else {
        return Err(DbError::Decode(format!("expected an object row, got {row}")).into());
    };
    data.remove("id");
    let record_id = data
        .remove("record_id")
        .ok_or_else(|| DbError::Decode("row is missing record_id".into()))?;
    let id = record_id
        .as_str()
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(|| DbError::Decode(format!("invalid record id: {record_id}")))?;
    Ok(Record { id, data })
}
