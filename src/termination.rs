//! Termination conditions for a task run.
//!
//! A condition is consulted after every appended turn. Conditions are stateless
//! closures over `TaskState`, so a fresh state per task is all the resetting
//! they need. Compose with [`ConditionFn::or`] / [`AnyOf::or`]; the first
//! condition that fires wins.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::turn::{ParticipantId, Turn};

/// Why a task run stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// A turn from one of the watched participants was appended.
    SourceMatched(ParticipantId),
    /// The per-task turn cap was reached.
    MaxTurns(usize),
    /// A turn mentioned the watched text.
    TextMentioned(String),
    /// An external stop was requested; the in-flight turn completed first.
    External,
    /// The in-flight turn was aborted; nothing was appended for it.
    Cancelled,
    /// Routing could not decide and no override was supplied.
    AwaitingOverride,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::SourceMatched(id) => write!(f, "{} responded", id),
            StopReason::MaxTurns(n) => write!(f, "reached {} turns", n),
            StopReason::TextMentioned(t) => write!(f, "mentioned {:?}", t),
            StopReason::External => write!(f, "stopped externally"),
            StopReason::Cancelled => write!(f, "cancelled"),
            StopReason::AwaitingOverride => write!(f, "awaiting participant selection"),
        }
    }
}

/// Counters for the task currently running.
#[derive(Debug, Clone, Default)]
pub struct TaskState {
    /// Turns appended since the task was submitted, including the task itself.
    pub turns: usize,
}

pub trait TerminationCondition: Send + Sync {
    fn decide(&self, state: &TaskState, last: &Turn) -> Option<StopReason>;
}

#[derive(Clone)]
pub struct ConditionFn(
    pub Arc<dyn Fn(&TaskState, &Turn) -> Option<StopReason> + Send + Sync + 'static>,
);

impl ConditionFn {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&TaskState, &Turn) -> Option<StopReason> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn or(self, other: ConditionFn) -> AnyOf {
        AnyOf::new(vec![self, other])
    }
}

impl fmt::Debug for ConditionFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ConditionFn(..)")
    }
}

impl TerminationCondition for ConditionFn {
    fn decide(&self, state: &TaskState, last: &Turn) -> Option<StopReason> {
        (self.0)(state, last)
    }
}

/// Fires when any member fires. An empty set never fires.
#[derive(Clone, Debug, Default)]
pub struct AnyOf {
    conditions: Vec<ConditionFn>,
}

impl AnyOf {
    pub fn new(conditions: Vec<ConditionFn>) -> Self {
        Self { conditions }
    }

    pub fn or(mut self, c: ConditionFn) -> Self {
        self.conditions.push(c);
        self
    }
}

impl From<ConditionFn> for AnyOf {
    fn from(c: ConditionFn) -> Self {
        AnyOf::new(vec![c])
    }
}

impl TerminationCondition for AnyOf {
    fn decide(&self, state: &TaskState, last: &Turn) -> Option<StopReason> {
        self.conditions.iter().find_map(|c| c.decide(state, last))
    }
}

pub mod conditions {
    use super::*;

    /// Stop once any of `sources` produces a turn.
    pub fn source_match<I, P>(sources: I) -> ConditionFn
    where
        I: IntoIterator<Item = P>,
        P: Into<ParticipantId>,
    {
        let sources: Vec<ParticipantId> = sources.into_iter().map(Into::into).collect();
        ConditionFn::new(move |_s, last| {
            sources
                .iter()
                .any(|id| id == &last.producer)
                .then(|| StopReason::SourceMatched(last.producer.clone()))
        })
    }

    pub fn max_turns(max: usize) -> ConditionFn {
        ConditionFn::new(move |s, _| (s.turns >= max).then_some(StopReason::MaxTurns(max)))
    }

    /// Stop when a turn's rendered content contains `text`.
    pub fn text_mention(text: impl Into<String>) -> ConditionFn {
        let needle = text.into();
        ConditionFn::new(move |_s, last| {
            last.payload
                .render()
                .contains(&needle)
                .then(|| StopReason::TextMentioned(needle.clone()))
        })
    }

    /// Stop after the current turn once `token` is cancelled.
    pub fn external(token: CancellationToken) -> ConditionFn {
        ConditionFn::new(move |_s, _| token.is_cancelled().then_some(StopReason::External))
    }
}
