//! Turns and the append-only turn log
//!
//! A [`Turn`] is one produced unit of conversation output, tagged with the
//! identity of the participant that produced it. The [`TurnLog`] keeps turns in
//! production order and never edits or removes one.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Metadata key carrying the caller's explicit next-participant override.
pub const OVERRIDE_KEY: &str = "select_agent";

/// Metadata key carrying the path of a document attached to a task submission.
pub const DOCUMENT_KEY: &str = "document_path";

/// Opaque, unique name of an agent or a validating pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identity used for turns submitted by the operator.
    pub fn user() -> Self {
        Self::new("user")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ParticipantId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Content of a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Payload {
    Text(String),
    Structured(Value),
}

impl Payload {
    pub fn text(s: impl Into<String>) -> Self {
        Payload::Text(s.into())
    }

    /// Render the payload as text for model context and display.
    pub fn render(&self) -> String {
        match self {
            Payload::Text(t) => t.clone(),
            Payload::Structured(v) => v.to_string(),
        }
    }

    pub fn as_structured(&self) -> Option<&Value> {
        match self {
            Payload::Structured(v) => Some(v),
            Payload::Text(_) => None,
        }
    }
}

pub type Metadata = BTreeMap<String, String>;

/// One produced unit of conversation output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub id: String,
    pub producer: ParticipantId,
    pub payload: Payload,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

impl Turn {
    pub fn new(producer: ParticipantId, payload: Payload) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            producer,
            payload,
            metadata: Metadata::new(),
            created_at: Utc::now(),
        }
    }

    /// A task submitted by the operator, optionally naming the participant to run.
    pub fn user_task(task: impl Into<String>, select: Option<&ParticipantId>) -> Self {
        let mut turn = Self::new(ParticipantId::user(), Payload::Text(task.into()));
        if let Some(target) = select {
            turn.metadata.insert(OVERRIDE_KEY.to_string(), target.to_string());
        }
        turn
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// The explicit override carried by this turn. Blank values count as absent.
    pub fn override_target(&self) -> Option<ParticipantId> {
        self.metadata
            .get(OVERRIDE_KEY)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(ParticipantId::new)
    }
}

/// Ordered, append-only sequence of turns owned by one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TurnLog {
    turns: Vec<Turn>,
}

impl TurnLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a log verbatim from persisted turns.
    pub fn from_turns(turns: Vec<Turn>) -> Self {
        Self { turns }
    }

    pub fn append(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Turn> {
        self.turns.iter()
    }

    pub fn latest(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

impl<'a> IntoIterator for &'a TurnLog {
    type Item = &'a Turn;
    type IntoIter = std::slice::Iter<'a, Turn>;

    fn into_iter(self) -> Self::IntoIter {
        self.turns.iter()
    }
}
