//! Participants of a session and the writing-assistant lineup.

use crate::agent::AgentSpec;
use crate::document::DocumentInfo;
use crate::error::Result;
use crate::pair::{RepairMode, ValidatingPair};
use crate::provider::ModelService;
use crate::router::WorkflowRoles;
use crate::schema::models::{WordBlueprintStructure, WordInsightAnalysis};
use crate::termination::{conditions, AnyOf};
use crate::turn::{ParticipantId, Turn};

pub const INSIGHT_TEAM: &str = "team_insight";
pub const INSIGHT_AGENT: &str = "word_insight_agent";
pub const INSIGHT_JSON_AGENT: &str = "word_insight_json_agent";
pub const BLUEPRINT_TEAM: &str = "team_blueprint";
pub const BLUEPRINT_AGENT: &str = "word_blueprint_agent";
pub const BLUEPRINT_JSON_AGENT: &str = "word_blueprint_json_agent";
pub const WRITER_AGENT: &str = "writer_agent";
pub const REFINER_AGENT: &str = "refiner_agent";
pub const EXPLAINER_AGENT: &str = "explainer_agent";

/// Anything the session can dispatch to.
#[derive(Debug, Clone)]
pub enum Participant {
    Agent(AgentSpec),
    Pair(ValidatingPair),
}

impl Participant {
    pub fn id(&self) -> &ParticipantId {
        match self {
            Participant::Agent(a) => &a.id,
            Participant::Pair(p) => p.id(),
        }
    }

    /// Identity whose turn marks this participant as done.
    pub fn completing_id(&self) -> &ParticipantId {
        match self {
            Participant::Agent(a) => &a.id,
            Participant::Pair(p) => p.repair_id(),
        }
    }

    pub async fn run<M>(
        &self,
        model: &mut M,
        context: &[Turn],
        documents: &[DocumentInfo],
    ) -> Result<Vec<Turn>>
    where
        M: ModelService,
    {
        match self {
            Participant::Agent(a) => a.run(model, context, documents).await,
            Participant::Pair(p) => p.run(model, context, documents).await,
        }
    }
}

impl From<AgentSpec> for Participant {
    fn from(a: AgentSpec) -> Self {
        Participant::Agent(a)
    }
}

impl From<ValidatingPair> for Participant {
    fn from(p: ValidatingPair) -> Self {
        Participant::Pair(p)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Roster {
    participants: Vec<Participant>,
    /// Participant that receives attached documents.
    intake: Option<ParticipantId>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a participant by id.
    pub fn with(mut self, participant: impl Into<Participant>) -> Self {
        let participant = participant.into();
        match self.participants.iter_mut().find(|p| p.id() == participant.id()) {
            Some(slot) => *slot = participant,
            None => self.participants.push(participant),
        }
        self
    }

    pub fn intake(mut self, id: impl Into<ParticipantId>) -> Self {
        self.intake = Some(id.into());
        self
    }

    pub fn intake_id(&self) -> Option<&ParticipantId> {
        self.intake.as_ref()
    }

    pub fn get(&self, id: &ParticipantId) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id() == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Participant> {
        self.participants.iter()
    }

    pub fn ids(&self) -> Vec<&ParticipantId> {
        self.participants.iter().map(Participant::id).collect()
    }

    pub fn pairs(&self) -> impl Iterator<Item = &ValidatingPair> {
        self.participants.iter().filter_map(|p| match p {
            Participant::Pair(pair) => Some(pair),
            Participant::Agent(_) => None,
        })
    }

    /// Stop as soon as any participant finishes, or after `max_turns`.
    pub fn one_participant_per_task(&self, max_turns: usize) -> AnyOf {
        conditions::source_match(self.participants.iter().map(|p| p.completing_id().clone()))
            .or(conditions::max_turns(max_turns))
    }
}

const INSIGHT_PROMPT: &str = "You analyse a writing request. Work out the document type, \
target audience, writing purpose, style requirements and key content that are already known, \
and ask supplementary questions about anything that is missing. Use single_choice or \
multiple_choice questions with options where possible, otherwise open questions.";

const JSON_REPAIR_PROMPT: &str = "Convert the previous message into JSON matching the \
requested schema exactly. Output only the JSON object with no surrounding text. Fill missing \
text fields with empty strings and missing lists with empty arrays.";

const BLUEPRINT_PROMPT: &str = "You design the outline of the requested document from the \
analysis and the user's answers: a title, sections with subheadings and key points, and an \
estimated length given as a range such as 800-1200字.";

const WRITER_PROMPT: &str = "You write the full document following the agreed outline, \
audience and style. Output only the document.";

const REFINER_PROMPT: &str = "You polish the latest draft: improve wording, flow and \
consistency without changing its meaning or structure. Output the revised document.";

const EXPLAINER_PROMPT: &str = "You explain the latest draft to the user: how it is \
structured, why it is written the way it is, and what they might adjust.";

/// The writing-assistant lineup and its pipeline roles.
pub fn writing_assistant(
    mode: RepairMode,
    max_repair_passes: usize,
) -> Result<(Roster, WorkflowRoles)> {
    let insight = ValidatingPair::new::<WordInsightAnalysis>(
        INSIGHT_TEAM,
        AgentSpec::new(INSIGHT_AGENT, INSIGHT_PROMPT).description("analyses the writing request"),
        AgentSpec::new(INSIGHT_JSON_AGENT, JSON_REPAIR_PROMPT)
            .description("formats the analysis as JSON"),
    )?
    .with_mode(mode)
    .max_repair_passes(max_repair_passes);

    let blueprint = ValidatingPair::new::<WordBlueprintStructure>(
        BLUEPRINT_TEAM,
        AgentSpec::new(BLUEPRINT_AGENT, BLUEPRINT_PROMPT).description("plans the document outline"),
        AgentSpec::new(BLUEPRINT_JSON_AGENT, JSON_REPAIR_PROMPT)
            .description("formats the outline as JSON"),
    )?
    .with_mode(mode)
    .max_repair_passes(max_repair_passes);

    let roles = WorkflowRoles {
        intake: insight.id().clone(),
        intake_repair: insight.repair_id().clone(),
        planning: blueprint.id().clone(),
        planning_repair: blueprint.repair_id().clone(),
        drafting: WRITER_AGENT.into(),
    };

    let roster = Roster::new()
        .with(insight)
        .with(blueprint)
        .with(AgentSpec::new(WRITER_AGENT, WRITER_PROMPT).description("writes the document"))
        .with(AgentSpec::new(REFINER_AGENT, REFINER_PROMPT).description("polishes the draft"))
        .with(AgentSpec::new(EXPLAINER_AGENT, EXPLAINER_PROMPT).description("explains the draft"))
        .intake(INSIGHT_TEAM);

    Ok((roster, roles))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::termination::{StopReason, TaskState, TerminationCondition};
    use crate::turn::Payload;

    #[test]
    fn writing_assistant_lineup() {
        let (roster, roles) = writing_assistant(RepairMode::Local, 1).unwrap();
        let ids: Vec<&str> = roster.ids().into_iter().map(ParticipantId::as_str).collect();
        assert_eq!(
            ids,
            vec![INSIGHT_TEAM, BLUEPRINT_TEAM, WRITER_AGENT, REFINER_AGENT, EXPLAINER_AGENT]
        );
        assert_eq!(roles.intake_repair.as_str(), INSIGHT_JSON_AGENT);
        assert_eq!(roles.planning_repair.as_str(), BLUEPRINT_JSON_AGENT);
        assert_eq!(roster.pairs().count(), 2);
        assert_eq!(roster.intake_id().map(ParticipantId::as_str), Some(INSIGHT_TEAM));
    }

    #[test]
    fn default_termination_watches_completing_ids() {
        let (roster, _) = writing_assistant(RepairMode::Local, 1).unwrap();
        let term = roster.one_participant_per_task(10);
        let s = TaskState { turns: 2 };
        let draft = Turn::new(INSIGHT_AGENT.into(), Payload::text("draft"));
        assert_eq!(term.decide(&s, &draft), None);
        let repaired = Turn::new(INSIGHT_JSON_AGENT.into(), Payload::text("{}"));
        assert_eq!(
            term.decide(&s, &repaired),
            Some(StopReason::SourceMatched(INSIGHT_JSON_AGENT.into()))
        );
        assert_eq!(term.decide(&TaskState { turns: 10 }, &draft), Some(StopReason::MaxTurns(10)));
    }

    #[test]
    fn with_replaces_existing_id() {
        let roster = Roster::new()
            .with(AgentSpec::new("a", "first"))
            .with(AgentSpec::new("a", "second"));
        assert_eq!(roster.ids().len(), 1);
        match roster.get(&"a".into()) {
            Some(Participant::Agent(a)) => assert_eq!(a.instructions, "second"),
            other => panic!("unexpected {:?}", other),
        }
    }
}
