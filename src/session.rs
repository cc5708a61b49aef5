//! Conversation session: the outer task loop.
//!
//! Each submitted task appends the operator's turn, then repeatedly asks the
//! selector for the next participant, runs it, appends its turns and checks the
//! termination condition. A run stops when termination fires, when routing is
//! undecided, or when the cancellation token fires. A cancelled or failed
//! participant contributes no turns.

use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::display::{DisplayEvent, DisplaySink, NullDisplay};
use crate::document::{DocumentInfo, DocumentInspector};
use crate::error::{Result, ScribeError};
use crate::provider::ModelService;
use crate::roster::Roster;
use crate::router::{RoutingDecision, Selector};
use crate::schema::{StructuredResult, StructuredSchema};
use crate::store::{SessionId, TurnStore};
use crate::termination::{AnyOf, StopReason, TaskState, TerminationCondition};
use crate::turn::{ParticipantId, Turn, TurnLog, DOCUMENT_KEY};

/// Outcome of one submitted task.
#[derive(Debug, Clone)]
pub struct TaskResult {
    /// Turns appended by this task, starting with the task itself.
    pub new_turns: Vec<Turn>,
    pub stop_reason: StopReason,
}

pub struct ConversationSession<M, S> {
    id: SessionId,
    log: TurnLog,
    roster: Roster,
    selector: S,
    model: M,
    termination: AnyOf,
    display: Arc<dyn DisplaySink>,
    inspector: Option<Arc<dyn DocumentInspector>>,
    pending_documents: Vec<DocumentInfo>,
}

impl<M, S> ConversationSession<M, S>
where
    M: ModelService,
    S: Selector,
{
    /// New empty session. Termination defaults to one participant per task with a
    /// cap of 10 turns.
    pub fn new(id: SessionId, roster: Roster, selector: S, model: M) -> Self {
        let termination = roster.one_participant_per_task(10);
        Self {
            id,
            log: TurnLog::new(),
            roster,
            selector,
            model,
            termination,
            display: Arc::new(NullDisplay),
            inspector: None,
            pending_documents: Vec::new(),
        }
    }

    pub fn with_termination(mut self, termination: impl Into<AnyOf>) -> Self {
        self.termination = termination.into();
        self
    }

    pub fn with_display(mut self, display: Arc<dyn DisplaySink>) -> Self {
        self.display = display;
        self
    }

    pub fn with_inspector(mut self, inspector: Arc<dyn DocumentInspector>) -> Self {
        self.inspector = Some(inspector);
        self
    }

    /// Continue from a persisted log; the selector state is rebuilt from it.
    pub fn resume(mut self, log: TurnLog) -> Self {
        self.selector.resume(&log);
        self.log = log;
        self
    }

    pub async fn load(self, store: &dyn TurnStore) -> Result<Self> {
        let log = store.load(&self.id).await?;
        info!(session = %self.id, turns = log.len(), "resuming session");
        Ok(self.resume(log))
    }

    pub async fn save(&self, store: &dyn TurnStore) -> Result<()> {
        store.save(&self.id, &self.log).await
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn log(&self) -> &TurnLog {
        &self.log
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn selector(&self) -> &S {
        &self.selector
    }

    /// Inspect a document for the next intake run.
    pub async fn attach_document(&mut self, path: &Path) -> Result<&DocumentInfo> {
        let inspector = self
            .inspector
            .as_ref()
            .ok_or_else(|| ScribeError::config("no document inspector configured"))?;
        let info = inspector.inspect(path).await?;
        self.pending_documents.push(info);
        self.pending_documents
            .last()
            .ok_or_else(|| ScribeError::Document(format!("{} was not queued", path.display())))
    }

    pub fn pending_documents(&self) -> &[DocumentInfo] {
        &self.pending_documents
    }

    /// Latest repaired output of the pair whose schema is `T`.
    pub fn latest_structured<T: StructuredSchema>(&self) -> Option<StructuredResult<T>> {
        let pair = self
            .roster
            .pairs()
            .find(|p| std::ptr::eq(p.schema(), T::schema()))?;
        self.log
            .iter()
            .rev()
            .find(|t| &t.producer == pair.repair_id())
            .map(|t| StructuredResult::repair(&t.payload))
    }

    fn append(
        &mut self,
        turn: Turn,
        state: &mut TaskState,
        new_turns: &mut Vec<Turn>,
    ) -> Option<StopReason> {
        self.selector.observe(&turn);
        self.display.emit(DisplayEvent::Turn(turn.clone()));
        state.turns += 1;
        let reason = self.termination.decide(state, &turn);
        self.log.append(turn.clone());
        new_turns.push(turn);
        reason
    }

    /// Submit a task, optionally naming the participant to run once the pipeline
    /// is past drafting.
    #[instrument(level = "info", skip(self, task, cancel), fields(session = %self.id))]
    pub async fn run_task(
        &mut self,
        task: &str,
        select: Option<&ParticipantId>,
        cancel: &CancellationToken,
    ) -> Result<TaskResult> {
        let mut state = TaskState::default();
        let mut new_turns = Vec::new();

        let mut submitted = Turn::user_task(task, select);
        if let Some(doc) = self.pending_documents.first() {
            submitted = submitted.with_metadata(DOCUMENT_KEY, doc.path.display().to_string());
        }
        if let Some(stop_reason) = self.append(submitted, &mut state, &mut new_turns) {
            return Ok(TaskResult { new_turns, stop_reason });
        }

        loop {
            if cancel.is_cancelled() {
                return Ok(TaskResult { new_turns, stop_reason: StopReason::Cancelled });
            }

            let decision = self.selector.decide(&self.log);
            let id = match &decision {
                RoutingDecision::Participant(id) | RoutingDecision::Override(id) => id.clone(),
                RoutingDecision::Undecided => {
                    info!("no participant selected, waiting for override");
                    return Ok(TaskResult {
                        new_turns,
                        stop_reason: StopReason::AwaitingOverride,
                    });
                }
            };
            let participant = self
                .roster
                .get(&id)
                .ok_or_else(|| ScribeError::UnknownParticipant(id.clone()))?;

            let takes_documents = self.roster.intake_id() == Some(&id);
            let documents: &[DocumentInfo] = if takes_documents {
                &self.pending_documents
            } else {
                &[]
            };
            let overridden = matches!(decision, RoutingDecision::Override(_));
            info!(participant = %id, overridden, "dispatching");

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                r = participant.run(&mut self.model, self.log.turns(), documents) => Some(r),
            };
            let turns = match outcome {
                None => {
                    warn!(participant = %id, "cancelled in flight");
                    return Ok(TaskResult { new_turns, stop_reason: StopReason::Cancelled });
                }
                Some(result) => result?,
            };
            if takes_documents {
                self.pending_documents.clear();
            }

            let mut stop = None;
            for turn in turns {
                let reason = self.append(turn, &mut state, &mut new_turns);
                stop = stop.or(reason);
            }
            if let Some(stop_reason) = stop {
                info!(%stop_reason, turns = new_turns.len(), "task finished");
                return Ok(TaskResult { new_turns, stop_reason });
            }
        }
    }
}
