//! # tower-scribe
//!
//! A multi-agent writing assistant built on Tower services. A session routes each
//! submitted task through a fixed pipeline (intake, planning, drafting) and then
//! to whichever participant the operator names. Intake and planning are
//! validating pairs: a content agent drafts freely and a repair step turns the
//! draft into JSON that satisfies a fixed schema, so downstream stages never see
//! malformed structured output.
//!
//! ## Core Concepts
//!
//! - **Turn log**: the ordered, append-only conversation ([`turn`])
//! - **Schemas**: declarative field contracts with a total repair function ([`schema`])
//! - **Validating pair**: content agent plus schema-repair agent ([`pair`])
//! - **Router**: explicit pipeline stages plus operator overrides ([`router`])
//! - **Session**: the task loop with termination and cancellation ([`session`])
//! - **Model**: any `tower::Service<InferenceRequest, Response = Payload>` ([`provider`])
//!
//! ## Getting Started
//!
//! Set your OpenAI API key in the `OPENAI_API_KEY` environment variable.
//!
//! ```rust,no_run
//! use tower_scribe::{
//!     roster::writing_assistant, ConversationSession, OpenAIProvider, PipelineRouter,
//!     RepairMode, SessionId,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> tower_scribe::Result<()> {
//! let (roster, roles) = writing_assistant(RepairMode::Local, 1)?;
//! let mut session = ConversationSession::new(
//!     SessionId::new("demo"),
//!     roster,
//!     PipelineRouter::new(roles),
//!     OpenAIProvider::new("gpt-4o-mini"),
//! );
//!
//! let cancel = CancellationToken::new();
//! let result = session
//!     .run_task("Write a weekly report for the sales team", None, &cancel)
//!     .await?;
//! println!("stopped: {}", result.stop_reason);
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod config;
pub mod display;
pub mod document;
pub mod error;
pub mod pair;
pub mod provider;
pub mod roster;
pub mod router;
pub mod schema;
pub mod session;
pub mod store;
pub mod termination;
pub mod turn;

pub use agent::AgentSpec;
pub use config::{ConfigBuilder, ScribeConfig};
pub use display::{ChannelDisplay, ConsoleDisplay, DisplayEvent, DisplaySink, NullDisplay};
pub use document::{DocumentInfo, DocumentInspector, TextDocumentInspector};
pub use error::{Result, ScribeError};
pub use pair::{RepairMode, ValidatingPair};
pub use provider::{
    InferenceRequest, ModelService, OpenAIProvider, SchemaTarget, ScriptedProvider, ScriptedReply,
};
pub use roster::{Participant, Roster};
pub use router::{
    PipelineRouter, RoundRobinSelector, RoutingDecision, Selector, Stage, WorkflowRoles,
};
pub use schema::models::{WordBlueprintStructure, WordInsightAnalysis};
pub use schema::{ObjectSchema, StructuredResult, StructuredSchema};
pub use session::{ConversationSession, TaskResult};
pub use store::{InMemoryTurnStore, SessionId, SqliteTurnStore, TurnStore};
pub use termination::{conditions, AnyOf, ConditionFn, StopReason, TerminationCondition};
pub use turn::{ParticipantId, Payload, Turn, TurnLog};
