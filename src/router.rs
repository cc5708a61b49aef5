//! Next-participant selection.
//!
//! `PipelineRouter` walks the writing pipeline as an explicit state machine:
//!
//! ```text
//! Intake --intake repair--> Planning --planning repair--> Drafting --drafter--> Freeform
//! ```
//!
//! A stage only advances when the identity that completes it is observed, so a
//! turn from a later stage's participant cannot skip ahead. In `Freeform` the
//! router defers to the override on the latest turn (`select_agent` metadata) and
//! is undecided without one. Overrides are passed through unvalidated; the
//! session resolves them against its roster.
//!
//! The stage is held incrementally while a session runs and rebuilt by folding
//! the log through [`Stage::advance`] when a session is resumed.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::turn::{ParticipantId, Turn, TurnLog};

/// Identities that drive the writing pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowRoles {
    pub intake: ParticipantId,
    pub intake_repair: ParticipantId,
    pub planning: ParticipantId,
    pub planning_repair: ParticipantId,
    pub drafting: ParticipantId,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    #[default]
    Intake,
    Planning,
    Drafting,
    Freeform,
}

impl Stage {
    /// Transition on one observed producer.
    pub fn advance(self, producer: &ParticipantId, roles: &WorkflowRoles) -> Stage {
        match self {
            Stage::Intake if producer == &roles.intake_repair => Stage::Planning,
            Stage::Planning if producer == &roles.planning_repair => Stage::Drafting,
            Stage::Drafting if producer == &roles.drafting => Stage::Freeform,
            other => other,
        }
    }

    /// Stage reached after replaying `log` from the start.
    pub fn of_log(log: &TurnLog, roles: &WorkflowRoles) -> Stage {
        log.iter()
            .fold(Stage::Intake, |stage, t| stage.advance(&t.producer, roles))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingDecision {
    /// Selected by the routing policy.
    Participant(ParticipantId),
    /// Selected by an explicit operator override.
    Override(ParticipantId),
    Undecided,
}

impl RoutingDecision {
    pub fn participant(&self) -> Option<&ParticipantId> {
        match self {
            RoutingDecision::Participant(id) | RoutingDecision::Override(id) => Some(id),
            RoutingDecision::Undecided => None,
        }
    }
}

/// Seam between the session and its routing policy.
pub trait Selector: Send {
    fn decide(&self, log: &TurnLog) -> RoutingDecision;

    /// Record an appended turn.
    fn observe(&mut self, turn: &Turn);

    /// Forget everything observed.
    fn reset(&mut self);

    /// Rebuild state from a persisted log.
    fn resume(&mut self, log: &TurnLog) {
        self.reset();
        for turn in log {
            self.observe(turn);
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineRouter {
    roles: WorkflowRoles,
    stage: Stage,
}

impl PipelineRouter {
    pub fn new(roles: WorkflowRoles) -> Self {
        Self {
            roles,
            stage: Stage::Intake,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn roles(&self) -> &WorkflowRoles {
        &self.roles
    }
}

impl Selector for PipelineRouter {
    fn decide(&self, log: &TurnLog) -> RoutingDecision {
        let decision = match self.stage {
            Stage::Intake => RoutingDecision::Participant(self.roles.intake.clone()),
            Stage::Planning => RoutingDecision::Participant(self.roles.planning.clone()),
            Stage::Drafting => RoutingDecision::Participant(self.roles.drafting.clone()),
            Stage::Freeform => match log.latest().and_then(Turn::override_target) {
                Some(id) => RoutingDecision::Override(id),
                None => RoutingDecision::Undecided,
            },
        };
        debug!(stage = ?self.stage, ?decision, "routing");
        decision
    }

    fn observe(&mut self, turn: &Turn) {
        let next = self.stage.advance(&turn.producer, &self.roles);
        if next != self.stage {
            trace!(from = ?self.stage, to = ?next, producer = %turn.producer, "stage advanced");
        }
        self.stage = next;
    }

    fn reset(&mut self) {
        self.stage = Stage::Intake;
    }
}

/// Cycles through a fixed list of participants. A slot is finished when its
/// completing identity speaks; for a pair that is the repair agent.
#[derive(Debug, Clone)]
pub struct RoundRobinSelector {
    slots: Vec<(ParticipantId, ParticipantId)>,
    next: usize,
}

impl RoundRobinSelector {
    pub fn new<I, P>(participants: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<ParticipantId>,
    {
        let slots = participants
            .into_iter()
            .map(|p| {
                let id = p.into();
                (id.clone(), id)
            })
            .collect();
        Self { slots, next: 0 }
    }

    /// Mark `participant`'s slot as completed by `completing` instead of itself.
    pub fn completed_by(
        mut self,
        participant: &ParticipantId,
        completing: impl Into<ParticipantId>,
    ) -> Self {
        let completing = completing.into();
        for slot in self.slots.iter_mut().filter(|(p, _)| p == participant) {
            slot.1 = completing.clone();
        }
        self
    }
}

impl Selector for RoundRobinSelector {
    fn decide(&self, _log: &TurnLog) -> RoutingDecision {
        match self.slots.get(self.next) {
            Some((id, _)) => RoutingDecision::Participant(id.clone()),
            None => RoutingDecision::Undecided,
        }
    }

    fn observe(&mut self, turn: &Turn) {
        if let Some((_, completing)) = self.slots.get(self.next) {
            if completing == &turn.producer {
                self.next = (self.next + 1) % self.slots.len();
            }
        }
    }

    fn reset(&mut self) {
        self.next = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::turn::Payload;

    fn roles() -> WorkflowRoles {
        WorkflowRoles {
            intake: "team_insight".into(),
            intake_repair: "word_insight_json_agent".into(),
            planning: "team_blueprint".into(),
            planning_repair: "word_blueprint_json_agent".into(),
            drafting: "writer_agent".into(),
        }
    }

    fn said(id: &str) -> Turn {
        Turn::new(ParticipantId::new(id), Payload::text("..."))
    }

    fn feed(router: &mut PipelineRouter, log: &mut TurnLog, turn: Turn) {
        router.observe(&turn);
        log.append(turn);
    }

    #[test]
    fn pipeline_order_then_override() {
        let mut router = PipelineRouter::new(roles());
        let mut log = TurnLog::new();
        assert_eq!(router.decide(&log), RoutingDecision::Participant("team_insight".into()));

        feed(&mut router, &mut log, Turn::user_task("weekly report", None));
        feed(&mut router, &mut log, said("word_insight_agent"));
        assert_eq!(router.stage(), Stage::Intake);
        feed(&mut router, &mut log, said("word_insight_json_agent"));
        assert_eq!(router.decide(&log), RoutingDecision::Participant("team_blueprint".into()));

        feed(&mut router, &mut log, said("word_blueprint_agent"));
        feed(&mut router, &mut log, said("word_blueprint_json_agent"));
        // override on the submitting turn is not read before drafting is done
        feed(&mut router, &mut log, Turn::user_task("go", Some(&"refiner_agent".into())));
        assert_eq!(router.decide(&log), RoutingDecision::Participant("writer_agent".into()));

        feed(&mut router, &mut log, said("writer_agent"));
        assert_eq!(router.decide(&log), RoutingDecision::Undecided);

        feed(&mut router, &mut log, Turn::user_task("polish", Some(&"refiner_agent".into())));
        assert_eq!(router.decide(&log), RoutingDecision::Override("refiner_agent".into()));
    }

    #[test]
    fn out_of_order_identities_do_not_skip_stages() {
        let mut router = PipelineRouter::new(roles());
        let mut log = TurnLog::new();
        feed(&mut router, &mut log, said("writer_agent"));
        feed(&mut router, &mut log, said("word_blueprint_json_agent"));
        assert_eq!(router.stage(), Stage::Intake);
        assert_eq!(router.decide(&log), RoutingDecision::Participant("team_insight".into()));
    }

    #[test]
    fn resume_folds_log_into_stage() {
        let log = TurnLog::from_turns(vec![
            Turn::user_task("t", None),
            said("word_insight_agent"),
            said("word_insight_json_agent"),
            said("word_blueprint_agent"),
            said("word_blueprint_json_agent"),
        ]);
        let mut router = PipelineRouter::new(roles());
        router.resume(&log);
        assert_eq!(router.stage(), Stage::Drafting);
        assert_eq!(Stage::of_log(&log, &roles()), Stage::Drafting);

        let mut other = PipelineRouter::new(roles());
        other.resume(&log);
        assert_eq!(router.decide(&log), other.decide(&log));
    }

    #[test]
    fn blank_override_is_undecided() {
        let mut router = PipelineRouter::new(roles());
        router.stage = Stage::Freeform;
        let blank = Turn::user_task("x", None).with_metadata("select_agent", "  ");
        let log = TurnLog::from_turns(vec![blank]);
        assert_eq!(router.decide(&log), RoutingDecision::Undecided);
    }

    #[test]
    fn round_robin_waits_for_completing_identity() {
        let pair: ParticipantId = "team_insight".into();
        let mut rr = RoundRobinSelector::new(["team_insight", "writer_agent"])
            .completed_by(&pair, "word_insight_json_agent");
        let log = TurnLog::new();
        assert_eq!(rr.decide(&log), RoutingDecision::Participant(pair.clone()));
        rr.observe(&said("word_insight_agent"));
        assert_eq!(rr.decide(&log), RoutingDecision::Participant(pair.clone()));
        rr.observe(&said("word_insight_json_agent"));
        assert_eq!(rr.decide(&log), RoutingDecision::Participant("writer_agent".into()));
        rr.observe(&said("writer_agent"));
        assert_eq!(rr.decide(&log), RoutingDecision::Participant(pair));
        assert_eq!(
            RoundRobinSelector::new(Vec::<ParticipantId>::new()).decide(&log),
            RoutingDecision::Undecided
        );
    }
}
