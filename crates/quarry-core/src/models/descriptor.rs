//! Model descriptors.
//!
//! A descriptor is the named schema a concrete record type supplies. The
//! registry compiles it into store DDL once per tenant; validation and
//! filter checks read it afterwards. Descriptors are immutable once
//! registered.

use serde_json::Value;

use crate::error::{QuarryError, QuarryResult};

/// Field names the store assigns itself. Descriptors may not declare them.
pub const RESERVED_FIELDS: &[&str] = &["id", "created_at", "updated_at"];

/// Storage kind of a declared field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Int,
    Number,
    Bool,
    /// RFC 3339 text on the wire, a native datetime in the store.
    Datetime,
    Object,
    Array,
}

impl FieldKind {
    /// SurrealQL type name for this kind.
    pub fn surreal_type(self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Int => "int",
            FieldKind::Number => "number",
            FieldKind::Bool => "bool",
            FieldKind::Datetime => "datetime",
            FieldKind::Object => "object",
            FieldKind::Array => "array",
        }
    }
}

/// One declared field and its constraints.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
    pub unique: bool,
    /// Store the value lowercased; filters on it match case-insensitively.
    pub lowercase: bool,
    pub default: Option<Value>,
    /// Permitted string values (empty = unrestricted).
    pub allowed: Vec<String>,
    pub min_len: Option<usize>,
    pub max_len: Option<usize>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            unique: false,
            lowercase: false,
            default: None,
            allowed: Vec::new(),
            min_len: None,
            max_len: None,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::String)
    }

    pub fn int(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Int)
    }

    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Number)
    }

    pub fn bool(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Bool)
    }

    pub fn datetime(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Datetime)
    }

    pub fn object(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Object)
    }

    pub fn array(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Array)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn lowercase(mut self) -> Self {
        self.lowercase = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn one_of(mut self, values: &[&str]) -> Self {
        self.allowed = values.iter().map(|v| (*v).to_string()).collect();
        self
    }

    pub fn length(mut self, min: usize, max: usize) -> Self {
        self.min_len = Some(min);
        self.max_len = Some(max);
        self
    }
}

/// Named schema definition supplied by a record type.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelDescriptor {
    name: String,
    fields: Vec<FieldSpec>,
}

impl ModelDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn with_field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// A descriptor without a name or without fields supplies no schema.
    pub fn is_empty(&self) -> bool {
        self.name.trim().is_empty() || self.fields.is_empty()
    }

    /// Fail fast on descriptors that cannot be compiled.
    ///
    /// An empty descriptor is a programmer error and yields
    /// [`QuarryError::MissingSchema`]; malformed identifiers, duplicate or
    /// reserved field names yield [`QuarryError::Config`].
    pub fn check(&self) -> QuarryResult<()> {
        if self.is_empty() {
            return Err(QuarryError::MissingSchema {
                model: self.name.clone(),
            });
        }
        if !is_identifier(&self.name) {
            return Err(QuarryError::Config(format!(
                "model name '{}' is not a valid identifier",
                self.name
            )));
        }
        for (idx, field) in self.fields.iter().enumerate() {
            if !is_identifier(&field.name) {
                return Err(QuarryError::Config(format!(
                    "field '{}' on model '{}' is not a valid identifier",
                    field.name, self.name
                )));
            }
            if RESERVED_FIELDS.contains(&field.name.as_str()) {
                return Err(QuarryError::Config(format!(
                    "field '{}' on model '{}' is assigned by the store",
                    field.name, self.name
                )));
            }
            if self.fields[..idx].iter().any(|f| f.name == field.name) {
                return Err(QuarryError::Config(format!(
                    "field '{}' declared twice on model '{}'",
                    field.name, self.name
                )));
            }
            if field.lowercase && field.kind != FieldKind::String {
                return Err(QuarryError::Config(format!(
                    "field '{}' on model '{}' is lowercased but not a string",
                    field.name, self.name
                )));
            }
        }
        Ok(())
    }
}

/// Capability a concrete record type implements to be registrable.
pub trait Model {
    /// The schema this record type persists under.
    fn descriptor() -> ModelDescriptor;
}

/// `[A-Za-z_][A-Za-z0-9_]*` — the only names interpolated into queries.
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
