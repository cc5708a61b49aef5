//! The two structured payloads of the writing assistant.
//!
//! `WordInsightAnalysis` is produced by the intake pair, `WordBlueprintStructure` by
//! the planning pair. Each typed model is paired with a static `ObjectSchema`; the
//! two must describe the same shape, which the tests below pin down.

use std::sync::OnceLock;

use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{FieldKind, FieldSpec, FormatRule, ObjectSchema, StructuredSchema};

/// Fallback for `estimated_length` when the model gives nothing usable.
pub const DEFAULT_ESTIMATED_LENGTH: &str = "500-1000字";

/// Tags accepted for `SupplementaryQuestion::type`.
pub const QUESTION_TYPES: &[&str] = &["open", "single_choice", "multiple_choice"];

pub static EXISTING_INFORMATION_SCHEMA: ObjectSchema = ObjectSchema {
    name: "ExistingInformation",
    fields: &[
        FieldSpec { name: "document_type", kind: FieldKind::Text },
        FieldSpec { name: "target_audience", kind: FieldKind::Text },
        FieldSpec { name: "writing_purpose", kind: FieldKind::Text },
        FieldSpec { name: "style_requirement", kind: FieldKind::Text },
        FieldSpec { name: "key_content", kind: FieldKind::TextList },
    ],
};

pub static SUPPLEMENTARY_QUESTION_SCHEMA: ObjectSchema = ObjectSchema {
    name: "SupplementaryQuestion",
    fields: &[
        FieldSpec { name: "question", kind: FieldKind::Text },
        FieldSpec { name: "options", kind: FieldKind::TextList },
        FieldSpec { name: "reason", kind: FieldKind::Text },
        FieldSpec {
            name: "type",
            kind: FieldKind::Enum {
                allowed: QUESTION_TYPES,
                fallback: "open",
            },
        },
    ],
};

pub static INSIGHT_SCHEMA: ObjectSchema = ObjectSchema {
    name: "WordInsightAnalysis",
    fields: &[
        FieldSpec {
            name: "existing_information",
            kind: FieldKind::Object(&EXISTING_INFORMATION_SCHEMA),
        },
        FieldSpec {
            name: "supplementary_questions",
            kind: FieldKind::ObjectList(&SUPPLEMENTARY_QUESTION_SCHEMA),
        },
    ],
};

pub static ESTIMATED_LENGTH_RULE: FormatRule = FormatRule {
    name: "length range",
    fallback: DEFAULT_ESTIMATED_LENGTH,
    normalize: normalize_length_range,
};

pub static SECTION_SCHEMA: ObjectSchema = ObjectSchema {
    name: "Section",
    fields: &[
        FieldSpec { name: "subheading", kind: FieldKind::Text },
        FieldSpec { name: "points", kind: FieldKind::TextList },
        FieldSpec { name: "description", kind: FieldKind::OptionalText },
    ],
};

pub static BLUEPRINT_SCHEMA: ObjectSchema = ObjectSchema {
    name: "WordBlueprintStructure",
    fields: &[
        FieldSpec { name: "title", kind: FieldKind::Text },
        FieldSpec { name: "sections", kind: FieldKind::ObjectList(&SECTION_SCHEMA) },
        FieldSpec {
            name: "estimated_length",
            kind: FieldKind::Formatted(&ESTIMATED_LENGTH_RULE),
        },
    ],
};

/// `"800 - 1200 字"`, `"800~1200字"` and `"800-1200"` all become `"800-1200字"`.
/// Ranges with min above max are rejected.
fn normalize_length_range(input: &str) -> Option<String> {
    static RANGE: OnceLock<Regex> = OnceLock::new();
    let re = RANGE.get_or_init(|| {
        Regex::new(r"^(\d{1,9})\s*(?:-|~|～|–|—|到|至)\s*(\d{1,9})\s*(?:字)?$")
            .expect("length range pattern")
    });
    let caps = re.captures(input.trim())?;
    let min: u64 = caps[1].parse().ok()?;
    let max: u64 = caps[2].parse().ok()?;
    (min <= max).then(|| format!("{}-{}字", min, max))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExistingInformation {
    pub document_type: String,
    pub target_audience: String,
    pub writing_purpose: String,
    pub style_requirement: String,
    /// Key points the user supplied.
    pub key_content: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    #[default]
    Open,
    SingleChoice,
    MultipleChoice,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SupplementaryQuestion {
    pub question: String,
    /// Empty for open questions.
    pub options: Vec<String>,
    pub reason: String,
    #[serde(rename = "type")]
    pub kind: QuestionType,
}

/// Intake result: what is already known plus follow-up questions for the user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WordInsightAnalysis {
    pub existing_information: ExistingInformation,
    pub supplementary_questions: Vec<SupplementaryQuestion>,
}

impl StructuredSchema for WordInsightAnalysis {
    fn schema() -> &'static ObjectSchema {
        &INSIGHT_SCHEMA
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Section {
    pub subheading: String,
    pub points: Vec<String>,
    pub description: Option<String>,
}

/// Planning result: the document outline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WordBlueprintStructure {
    pub title: String,
    pub sections: Vec<Section>,
    /// Length range such as `"800-1200字"`.
    pub estimated_length: String,
}

impl Default for WordBlueprintStructure {
    fn default() -> Self {
        Self {
            title: String::new(),
            sections: Vec::new(),
            estimated_length: DEFAULT_ESTIMATED_LENGTH.to_string(),
        }
    }
}

impl StructuredSchema for WordBlueprintStructure {
    fn schema() -> &'static ObjectSchema {
        &BLUEPRINT_SCHEMA
    }
}
