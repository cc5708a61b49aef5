//! A single LLM-backed participant: a system prompt and an optional output schema.

use tower::ServiceExt;
use tracing::{debug, instrument};

use crate::document::DocumentInfo;
use crate::error::{Result, ScribeError};
use crate::provider::{InferenceRequest, ModelService, SchemaTarget};
use crate::turn::{ParticipantId, Payload, Turn};

#[derive(Debug, Clone)]
pub struct AgentSpec {
    pub id: ParticipantId,
    pub description: String,
    pub instructions: String,
    pub output: Option<SchemaTarget>,
}

impl AgentSpec {
    pub fn new(id: impl Into<ParticipantId>, instructions: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            instructions: instructions.into(),
            output: None,
        }
    }

    pub fn description(mut self, d: impl Into<String>) -> Self {
        self.description = d.into();
        self
    }

    pub fn output(mut self, target: SchemaTarget) -> Self {
        self.output = Some(target);
        self
    }

    /// One model call on behalf of this agent.
    #[instrument(level = "debug", skip_all, fields(agent = %self.id))]
    pub async fn respond<M>(
        &self,
        model: &mut M,
        context: &[Turn],
        documents: &[DocumentInfo],
    ) -> Result<Payload>
    where
        M: ModelService,
    {
        let req = InferenceRequest::new(self.id.clone(), self.instructions.clone())
            .context(context.iter().cloned())
            .schema(self.output.clone())
            .documents(documents.to_vec());
        let svc = model
            .ready()
            .await
            .map_err(|e| ScribeError::inference(&self.id, e))?;
        let payload = svc
            .call(req)
            .await
            .map_err(|e| ScribeError::inference(&self.id, e))?;
        debug!(structured = payload.as_structured().is_some(), "agent responded");
        Ok(payload)
    }

    /// Run as a standalone participant: one turn.
    pub async fn run<M>(
        &self,
        model: &mut M,
        context: &[Turn],
        documents: &[DocumentInfo],
    ) -> Result<Vec<Turn>>
    where
        M: ModelService,
    {
        let payload = self.respond(model, context, documents).await?;
        Ok(vec![Turn::new(self.id.clone(), payload)])
    }
}
