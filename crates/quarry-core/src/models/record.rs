//! Generic record representation used by the record accessor.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Field map of a stored record, without its identifier.
pub type Document = Map<String, Value>;

/// Equality filter: every entry must match for a record to be selected.
pub type Filter = Document;

/// A stored record: its identifier plus its fields, including the
/// server-assigned `created_at` / `updated_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: Uuid,
    pub data: Document,
}

impl Record {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field)
    }
}
