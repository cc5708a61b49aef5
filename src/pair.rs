//! Content agent plus schema-repair agent.
//!
//! The content agent drafts freely; the repair agent turns the draft into a
//! payload that satisfies the pair's schema. The sub-run ends as soon as the
//! repair identity is observed, and both turns are returned together so a failed
//! or cancelled run never leaves half a pair in the log.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::agent::AgentSpec;
use crate::document::DocumentInfo;
use crate::error::{Result, ScribeError};
use crate::provider::{ModelService, SchemaTarget};
use crate::schema::{extract_json, ObjectSchema, StructuredSchema};
use crate::termination::{conditions, ConditionFn, TaskState, TerminationCondition};
use crate::turn::{ParticipantId, Payload, Turn};

/// How the repair identity produces its turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepairMode {
    /// Deterministic local repair, no model call.
    #[default]
    Local,
    /// Ask the repair agent, then repair its answer locally.
    Model,
}

#[derive(Debug, Clone)]
pub struct ValidatingPair {
    id: ParticipantId,
    content: AgentSpec,
    repair: AgentSpec,
    schema: &'static ObjectSchema,
    mode: RepairMode,
    max_repair_passes: usize,
}

impl ValidatingPair {
    /// Fails when both agents share an id: the sub-run ends on the repair id,
    /// so the draft itself would be taken as the repaired turn.
    pub fn new<T: StructuredSchema>(
        id: impl Into<ParticipantId>,
        content: AgentSpec,
        mut repair: AgentSpec,
    ) -> Result<Self> {
        if content.id == repair.id {
            return Err(ScribeError::config(format!(
                "content and repair agents must differ (both are {})",
                content.id
            )));
        }
        if repair.output.is_none() {
            repair.output = Some(SchemaTarget::of::<T>());
        }
        Ok(Self {
            id: id.into(),
            content,
            repair,
            schema: T::schema(),
            mode: RepairMode::default(),
            max_repair_passes: 1,
        })
    }

    pub fn with_mode(mut self, mode: RepairMode) -> Self {
        self.mode = mode;
        self
    }

    /// Model passes before the final local repair. Zero behaves like `Local`.
    pub fn max_repair_passes(mut self, n: usize) -> Self {
        self.max_repair_passes = n;
        self
    }

    pub fn id(&self) -> &ParticipantId {
        &self.id
    }

    pub fn repair_id(&self) -> &ParticipantId {
        &self.repair.id
    }

    pub fn schema(&self) -> &'static ObjectSchema {
        self.schema
    }

    pub fn mode(&self) -> RepairMode {
        self.mode
    }

    /// Content turn then repair turn. The repair turn always satisfies the schema.
    #[instrument(level = "info", skip_all, fields(pair = %self.id))]
    pub async fn run<M>(
        &self,
        model: &mut M,
        context: &[Turn],
        documents: &[DocumentInfo],
    ) -> Result<Vec<Turn>>
    where
        M: ModelService,
    {
        let completion: ConditionFn = conditions::source_match([self.repair.id.clone()]);
        let mut state = TaskState::default();
        let mut turns: Vec<Turn> = Vec::with_capacity(2);

        loop {
            let turn = match turns.last() {
                None => {
                    let draft = self.content.respond(model, context, documents).await?;
                    Turn::new(self.content.id.clone(), draft)
                }
                Some(candidate) => {
                    let repaired = self.repair_candidate(model, context, candidate).await?;
                    Turn::new(self.repair.id.clone(), Payload::Structured(repaired))
                }
            };
            turns.push(turn);
            state.turns += 1;
            if let Some(reason) = turns.last().and_then(|t| completion.decide(&state, t)) {
                info!(%reason, "pair complete");
                return Ok(turns);
            }
        }
    }

    async fn repair_candidate<M>(
        &self,
        model: &mut M,
        context: &[Turn],
        candidate: &Turn,
    ) -> Result<Value>
    where
        M: ModelService,
    {
        let mut current = candidate.payload.clone();
        if self.mode == RepairMode::Model {
            let mut sub_context: Vec<Turn> = context.to_vec();
            sub_context.push(candidate.clone());
            for pass in 1..=self.max_repair_passes {
                if self.schema.conforms(&payload_json(&current)) {
                    break;
                }
                current = self.repair.respond(model, &sub_context, &[]).await?;
                let conforms = self.schema.conforms(&payload_json(&current));
                debug!(pass, conforms, "repair pass");
                sub_context.push(Turn::new(self.repair.id.clone(), current.clone()));
            }
        }
        Ok(self.schema.repair_payload(&current))
    }
}

fn payload_json(p: &Payload) -> Value {
    match p {
        Payload::Structured(Value::String(s)) | Payload::Text(s) => extract_json(s),
        Payload::Structured(v) => v.clone(),
    }
}
