//! Proptest-based generators for malformed payloads.
//!
//! Values are built from a schema description so every field can be missing,
//! plausible, or of an arbitrary wrong type, and unknown keys can appear anywhere.

use proptest::prelude::*;
use serde_json::Value;

use super::{FieldKind, ObjectSchema};
use crate::turn::Payload;

/// How a JSON document is embedded into model text.
#[derive(Debug, Clone, Copy)]
pub enum TextWrapping {
    Bare,
    Fenced,
    Prose,
}

fn short_text() -> impl Strategy<Value = String> {
    "[ a-zA-Z0-9_字]{0,12}"
}

/// Any JSON value, nested up to three levels.
pub fn arbitrary_json() -> BoxedStrategy<Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        (-1.0e6f64..1.0e6).prop_map(Value::from),
        short_text().prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-z_]{1,8}", inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
    .boxed()
}

fn field_value(kind: &'static FieldKind) -> BoxedStrategy<Value> {
    let plausible: BoxedStrategy<Value> = match kind {
        FieldKind::Text | FieldKind::OptionalText => short_text().prop_map(Value::String).boxed(),
        FieldKind::Formatted(_) => prop_oneof![
            (0u32..5000, 0u32..5000).prop_map(|(a, b)| Value::String(format!("{} - {}字", a, b))),
            short_text().prop_map(Value::String),
        ]
        .boxed(),
        FieldKind::TextList => prop::collection::vec(
            prop_oneof![
                short_text().prop_map(Value::String),
                any::<i32>().prop_map(Value::from),
                Just(Value::Null),
            ],
            0..4,
        )
        .prop_map(Value::Array)
        .boxed(),
        FieldKind::Enum { allowed, .. } => prop_oneof![
            prop::sample::select(allowed.to_vec()).prop_map(|s| Value::String(s.to_string())),
            short_text().prop_map(Value::String),
        ]
        .boxed(),
        FieldKind::Object(schema) => malformed_object(schema),
        FieldKind::ObjectList(schema) => {
            let element = prop_oneof![3 => malformed_object(schema), 1 => arbitrary_json()];
            prop::collection::vec(element, 0..3)
                .prop_map(Value::Array)
                .boxed()
        }
    };
    prop_oneof![3 => plausible, 1 => arbitrary_json()].boxed()
}

/// A mapping shaped roughly like `schema`: fields may be missing or mistyped, key
/// order may be reversed, and unknown keys may be present.
pub fn malformed_object(schema: &'static ObjectSchema) -> BoxedStrategy<Value> {
    let fields: Vec<BoxedStrategy<Option<(String, Value)>>> = schema
        .fields
        .iter()
        .map(|f| {
            let name = f.name.to_string();
            prop::option::weighted(0.8, field_value(&f.kind))
                .prop_map(move |v| v.map(|v| (name.clone(), v)))
                .boxed()
        })
        .collect();
    let extras = prop::collection::vec(("[a-z_]{1,8}", arbitrary_json()), 0..2);
    (fields, extras, any::<bool>())
        .prop_map(|(present, extras, reverse)| {
            let mut entries: Vec<(String, Value)> = present.into_iter().flatten().collect();
            entries.extend(extras);
            if reverse {
                entries.reverse();
            }
            Value::Object(entries.into_iter().collect())
        })
        .boxed()
}

fn wrap(doc: &Value, wrapping: TextWrapping) -> String {
    match wrapping {
        TextWrapping::Bare => doc.to_string(),
        TextWrapping::Fenced => format!("```json\n{}\n```", doc),
        TextWrapping::Prose => {
            format!("Here is the result: {} Let me know if anything is missing.", doc)
        }
    }
}

/// Anything a content agent might hand to the repair step for `schema`.
pub fn malformed_payload(schema: &'static ObjectSchema) -> BoxedStrategy<Payload> {
    let wrapping = prop_oneof![
        Just(TextWrapping::Bare),
        Just(TextWrapping::Fenced),
        Just(TextWrapping::Prose),
    ];
    prop_oneof![
        4 => malformed_object(schema).prop_map(Payload::Structured),
        1 => arbitrary_json().prop_map(Payload::Structured),
        2 => (malformed_object(schema), wrapping)
            .prop_map(|(doc, w)| Payload::Text(wrap(&doc, w))),
        1 => "\\PC{0,40}".prop_map(Payload::Text),
    ]
    .boxed()
}
