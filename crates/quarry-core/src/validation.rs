//! Descriptor-driven validation of record data.
//!
//! Returns the normalized document (lowercased fields folded) or every
//! violation found, never just the first.

use std::fmt;

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{QuarryError, QuarryResult};
use crate::models::descriptor::{FieldKind, FieldSpec, ModelDescriptor};
use crate::models::record::Document;

/// One failed constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldViolation {
    pub field: String,
    pub message: String,
}

impl FieldViolation {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Whether missing required fields count as violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Create,
    Patch,
}

/// Validate `data` against `descriptor`.
pub fn validate(descriptor: &ModelDescriptor, data: &Document, mode: Mode) -> QuarryResult<Document> {
    let mut violations = Vec::new();
    let mut normalized = Document::new();

    for (name, value) in data {
        match descriptor.field(name) {
            Some(spec) => match check_value(spec, value) {
                Ok(v) => {
                    normalized.insert(name.clone(), v);
                }
                Err(message) => violations.push(FieldViolation::new(name, message)),
            },
            None => violations.push(FieldViolation::new(name, "unknown field")),
        }
    }

    if mode == Mode::Create {
        for spec in descriptor.fields() {
            let present = data.get(&spec.name).is_some_and(|v| !v.is_null());
            if spec.required && spec.default.is_none() && !present {
                violations.push(FieldViolation::new(&spec.name, "is required"));
            }
        }
    }

    if violations.is_empty() {
        Ok(normalized)
    } else {
        Err(QuarryError::Validation { violations })
    }
}

fn check_value(spec: &FieldSpec, value: &Value) -> Result<Value, String> {
    if value.is_null() {
        return if spec.required {
            Err("cannot be null".into())
        } else {
            Ok(Value::Null)
        };
    }

    match spec.kind {
        FieldKind::String => {
            let s = value.as_str().ok_or("expected a string")?;
            let len = s.chars().count();
            if let Some(min) = spec.min_len.filter(|min| len < *min) {
                return Err(format!("must be at least {min} characters"));
            }
            if let Some(max) = spec.max_len.filter(|max| len > *max) {
                return Err(format!("must be at most {max} characters"));
            }
            let s = if spec.lowercase {
                s.to_lowercase()
            } else {
                s.to_string()
            };
            if !spec.allowed.is_empty() && !spec.allowed.contains(&s) {
                return Err(format!("must be one of {}", spec.allowed.join(", ")));
            }
            Ok(Value::String(s))
        }
        FieldKind::Int => {
            if value.as_i64().is_some() {
                Ok(value.clone())
            } else {
                Err("expected an integer".into())
            }
        }
        FieldKind::Number => {
            if value.is_number() {
                Ok(value.clone())
            } else {
                Err("expected a number".into())
            }
        }
        FieldKind::Bool => {
            if value.is_boolean() {
                Ok(value.clone())
            } else {
                Err("expected a boolean".into())
            }
        }
        FieldKind::Datetime => {
            let s = value.as_str().ok_or("expected an RFC 3339 timestamp")?;
            DateTime::parse_from_rfc3339(s)
                .map(|_| value.clone())
                .map_err(|e| format!("invalid timestamp: {e}"))
        }
        FieldKind::Object => {
            if value.is_object() {
                Ok(value.clone())
            } else {
                Err("expected an object".into())
            }
        }
        FieldKind::Array => {
            if value.is_array() {
                Ok(value.clone())
            } else {
                Err("expected an array".into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::models::descriptor::FieldSpec;

    fn contact() -> ModelDescriptor {
        ModelDescriptor::new("contact")
            .with_field(FieldSpec::string("email").required().lowercase().unique())
            .with_field(FieldSpec::string("kind").one_of(&["person", "company"]))
            .with_field(FieldSpec::string("nick").length(2, 8))
            .with_field(FieldSpec::int("age"))
            .with_field(FieldSpec::datetime("born"))
    }

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn lowercases_and_passes() {
        let out = validate(
            &contact(),
            &doc(json!({ "email": "Ann@Example.COM", "age": 31 })),
            Mode::Create,
        )
        .unwrap();
        assert_eq!(out["email"], "ann@example.com");
        assert_eq!(out["age"], 31);
    }

    #[test]
    fn collects_every_violation() {
        let err = validate(
            &contact(),
            &doc(json!({ "kind": "robot", "nick": "x", "age": "old", "extra": 1 })),
            Mode::Create,
        )
        .unwrap_err();
        let QuarryError::Validation { violations } = err else {
            panic!("expected validation error");
        };
        let fields: Vec<_> = violations.iter().map(|v| v.field.as_str()).collect();
        for expected in ["kind", "nick", "age", "extra", "email"] {
            assert!(fields.contains(&expected), "missing violation for {expected}");
        }
    }

    #[test]
    fn patch_skips_required_check() {
        let out = validate(&contact(), &doc(json!({ "age": 40 })), Mode::Patch).unwrap();
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn patch_cannot_null_required_field() {
        let err = validate(&contact(), &doc(json!({ "email": null })), Mode::Patch);
        assert!(matches!(err, Err(QuarryError::Validation { .. })));
    }

    #[test]
    fn datetime_must_be_rfc3339() {
        assert!(
            validate(&contact(), &doc(json!({ "born": "yesterday" })), Mode::Patch).is_err()
        );
        assert!(
            validate(
                &contact(),
                &doc(json!({ "born": "1990-04-01T00:00:00Z" })),
                Mode::Patch
            )
            .is_ok()
        );
    }
}
