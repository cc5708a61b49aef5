//! Schema descriptions and the total repair function.
//!
//! What this module provides
//! - `ObjectSchema` / `FieldSpec` / `FieldKind`: a static, declarative description of
//!   the structured payloads the writing agents produce
//! - `ObjectSchema::repair`: maps any JSON value onto a schema-conformant value
//! - `ObjectSchema::check`: structural conformance check used by tests and debug logging
//! - `extract_json`: pulls a JSON document out of free model text
//! - `StructuredResult<T>`: a repaired payload together with its typed view
//!
//! Repair rules (applied per field, in declared order)
//! - Missing field: the field's documented default (`""`, `[]`, `null` for optional
//!   text, the fallback literal for formatted text, the fallback tag for enums)
//! - Lists: numbers and booleans become strings; null, objects and arrays are dropped.
//!   Object lists drop non-mapping elements and repair the rest recursively
//! - Enums: values outside the declared set become the fallback tag
//! - Nested objects that are not mappings become the nested all-defaults instance
//! - A root that is not a mapping becomes the all-defaults instance
//!
//! Output never carries fields outside the schema and keys follow declared order.
//! `repair` has no failure path: its worst case is `defaults()`.

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{trace, warn};

use crate::turn::Payload;

pub mod gen;
pub mod models;

/// Normalisation rule for a format-constrained text field.
pub struct FormatRule {
    pub name: &'static str,
    /// Value used when the input is missing or cannot be normalised.
    pub fallback: &'static str,
    /// Returns the canonical form, or `None` if the input does not match the format.
    pub normalize: fn(&str) -> Option<String>,
}

impl std::fmt::Debug for FormatRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormatRule")
            .field("name", &self.name)
            .field("fallback", &self.fallback)
            .finish()
    }
}

#[derive(Debug)]
pub enum FieldKind {
    /// Required text, default `""`.
    Text,
    /// Optional text, default `null`.
    OptionalText,
    /// Required text constrained by a format rule.
    Formatted(&'static FormatRule),
    /// List of strings, default `[]`.
    TextList,
    /// One of a fixed set of string tags.
    Enum {
        allowed: &'static [&'static str],
        fallback: &'static str,
    },
    /// Nested object, default is the nested all-defaults instance.
    Object(&'static ObjectSchema),
    /// List of nested objects, default `[]`.
    ObjectList(&'static ObjectSchema),
}

#[derive(Debug)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
}

/// A named, fixed structural contract.
#[derive(Debug)]
pub struct ObjectSchema {
    pub name: &'static str,
    pub fields: &'static [FieldSpec],
}

/// Structural reason a value fails a schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

impl ObjectSchema {
    /// The all-defaults instance.
    pub fn defaults(&self) -> Value {
        let mut out = Map::with_capacity(self.fields.len());
        for field in self.fields {
            out.insert(field.name.to_string(), field.kind.default_value());
        }
        Value::Object(out)
    }

    /// Map any JSON value onto a value that satisfies this schema.
    pub fn repair(&self, raw: &Value) -> Value {
        match raw {
            Value::Object(map) => {
                let mut out = Map::with_capacity(self.fields.len());
                for field in self.fields {
                    let repaired = field.kind.repair(map.get(field.name));
                    out.insert(field.name.to_string(), repaired);
                }
                for key in map.keys() {
                    if !self.fields.iter().any(|f| f.name == key) {
                        trace!(schema = self.name, field = %key, "dropping unknown field");
                    }
                }
                Value::Object(out)
            }
            other => {
                trace!(
                    schema = self.name,
                    kind = json_kind(other),
                    "root is not a mapping, using defaults"
                );
                self.defaults()
            }
        }
    }

    /// Repair whatever a participant produced: structured values directly, text after
    /// JSON extraction.
    pub fn repair_payload(&self, payload: &Payload) -> Value {
        let raw = match payload {
            Payload::Structured(Value::String(s)) | Payload::Text(s) => extract_json(s),
            Payload::Structured(v) => v.clone(),
        };
        self.repair(&raw)
    }

    /// Whether `value` satisfies this schema exactly.
    pub fn conforms(&self, value: &Value) -> bool {
        self.check(value).is_ok()
    }

    /// Structural conformance check: exact keys in declared order, types, enum
    /// membership and format canonical forms.
    pub fn check(&self, value: &Value) -> Result<(), SchemaViolation> {
        self.check_at(value, self.name)
    }

    fn check_at(&self, value: &Value, path: &str) -> Result<(), SchemaViolation> {
        let map = value
            .as_object()
            .ok_or_else(|| violation(path, format!("expected object, got {}", json_kind(value))))?;
        let expected: Vec<&str> = self.fields.iter().map(|f| f.name).collect();
        let observed: Vec<&str> = map.keys().map(String::as_str).collect();
        if expected != observed {
            return Err(violation(
                path,
                format!("expected keys {:?}, observed {:?}", expected, observed),
            ));
        }
        for field in self.fields {
            let child = format!("{}.{}", path, field.name);
            // keys were checked above
            let v = &map[field.name];
            field.kind.check_at(v, &child)?;
        }
        Ok(())
    }
}

impl FieldKind {
    fn default_value(&self) -> Value {
        match self {
            FieldKind::Text => Value::String(String::new()),
            FieldKind::OptionalText => Value::Null,
            FieldKind::Formatted(rule) => Value::String(rule.fallback.to_string()),
            FieldKind::TextList | FieldKind::ObjectList(_) => Value::Array(Vec::new()),
            FieldKind::Enum { fallback, .. } => Value::String((*fallback).to_string()),
            FieldKind::Object(schema) => schema.defaults(),
        }
    }

    fn repair(&self, raw: Option<&Value>) -> Value {
        let Some(raw) = raw else {
            return self.default_value();
        };
        match self {
            FieldKind::Text => coerce_text(raw)
                .map(Value::String)
                .unwrap_or_else(|| self.default_value()),
            FieldKind::OptionalText => coerce_text(raw).map(Value::String).unwrap_or(Value::Null),
            FieldKind::Formatted(rule) => coerce_text(raw)
                .and_then(|s| (rule.normalize)(&s))
                .map(Value::String)
                .unwrap_or_else(|| self.default_value()),
            FieldKind::TextList => match raw {
                Value::Array(items) => Value::Array(
                    items
                        .iter()
                        .filter_map(coerce_text)
                        .map(Value::String)
                        .collect(),
                ),
                _ => self.default_value(),
            },
            FieldKind::Enum { allowed, fallback } => {
                let tag = raw
                    .as_str()
                    .map(|s| s.trim().to_ascii_lowercase())
                    .filter(|s| allowed.contains(&s.as_str()))
                    .unwrap_or_else(|| (*fallback).to_string());
                Value::String(tag)
            }
            FieldKind::Object(schema) => match raw {
                Value::Object(_) => schema.repair(raw),
                _ => schema.defaults(),
            },
            FieldKind::ObjectList(schema) => match raw {
                Value::Array(items) => Value::Array(
                    items
                        .iter()
                        .filter(|item| item.is_object())
                        .map(|item| schema.repair(item))
                        .collect(),
                ),
                _ => self.default_value(),
            },
        }
    }

    fn check_at(&self, value: &Value, path: &str) -> Result<(), SchemaViolation> {
        match self {
            FieldKind::Text => expect_canonical_text(value, path),
            FieldKind::OptionalText => match value {
                Value::Null => Ok(()),
                other => expect_canonical_text(other, path),
            },
            FieldKind::Formatted(rule) => {
                let s = value
                    .as_str()
                    .ok_or_else(|| violation(path, "expected string"))?;
                match (rule.normalize)(s) {
                    Some(canonical) if canonical == s => Ok(()),
                    _ => Err(violation(path, format!("not a canonical {}", rule.name))),
                }
            }
            FieldKind::TextList => {
                let items = value
                    .as_array()
                    .ok_or_else(|| violation(path, "expected array"))?;
                for (i, item) in items.iter().enumerate() {
                    expect_canonical_text(item, &format!("{}[{}]", path, i))?;
                }
                Ok(())
            }
            FieldKind::Enum { allowed, .. } => match value.as_str() {
                Some(s) if allowed.contains(&s) => Ok(()),
                _ => Err(violation(path, format!("expected one of {:?}", allowed))),
            },
            FieldKind::Object(schema) => schema.check_at(value, path),
            FieldKind::ObjectList(schema) => {
                let items = value
                    .as_array()
                    .ok_or_else(|| violation(path, "expected array"))?;
                for (i, item) in items.iter().enumerate() {
                    schema.check_at(item, &format!("{}[{}]", path, i))?;
                }
                Ok(())
            }
        }
    }
}

/// Lossless scalar-to-text coercion. Strings are trimmed.
fn coerce_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn expect_canonical_text(value: &Value, path: &str) -> Result<(), SchemaViolation> {
    match value.as_str() {
        Some(s) if s.trim() == s => Ok(()),
        Some(_) => Err(violation(path, "text has surrounding whitespace")),
        None => Err(violation(path, format!("expected string, got {}", json_kind(value)))),
    }
}

fn violation(path: &str, message: impl Into<String>) -> SchemaViolation {
    SchemaViolation {
        path: path.to_string(),
        message: message.into(),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Pull a JSON document out of free text.
///
/// Tries the whole text, then the first fenced code block, then the span between
/// the first `{` and the last `}`. Returns `Value::Null` when nothing parses.
pub fn extract_json(text: &str) -> Value {
    let trimmed = text.trim();
    if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
        return v;
    }
    if let Some(body) = fenced_block(trimmed) {
        if let Ok(v) = serde_json::from_str::<Value>(body.trim()) {
            return v;
        }
    }
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Ok(v) = serde_json::from_str::<Value>(&trimmed[start..=end]) {
                return v;
            }
        }
    }
    Value::Null
}

fn fenced_block(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after_fence = &text[open + 3..];
    // skip the info string (e.g. `json`) up to the end of the line
    let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after_fence[body_start..];
    let close = body.find("```")?;
    Some(&body[..close])
}

/// A typed model bound to its static schema description.
pub trait StructuredSchema:
    Serialize + DeserializeOwned + JsonSchema + Default + Send + Sync + 'static
{
    fn schema() -> &'static ObjectSchema;
}

/// Repaired payload plus its typed view. Only constructible through repair, so the
/// JSON always satisfies `T::schema()`.
#[derive(Debug, Clone)]
pub struct StructuredResult<T> {
    value: T,
    json: Value,
}

impl<T: StructuredSchema> StructuredResult<T> {
    pub fn repair(payload: &Payload) -> Self {
        let schema = T::schema();
        let json = schema.repair_payload(payload);
        match serde_json::from_value::<T>(json.clone()) {
            Ok(value) => Self { value, json },
            Err(e) => {
                warn!(
                    schema = schema.name,
                    error = %e,
                    "repaired payload did not deserialize, using defaults"
                );
                Self {
                    value: T::default(),
                    json: schema.defaults(),
                }
            }
        }
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn json(&self) -> &Value {
        &self.json
    }

    pub fn into_inner(self) -> T {
        self.value
    }

    pub fn into_payload(self) -> Payload {
        Payload::Structured(self.json)
    }
}
