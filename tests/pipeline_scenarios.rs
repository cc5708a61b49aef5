//! End-to-end session runs against the scripted provider.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower_scribe::roster::{
    writing_assistant, BLUEPRINT_AGENT, BLUEPRINT_JSON_AGENT, EXPLAINER_AGENT, INSIGHT_AGENT,
    INSIGHT_JSON_AGENT, REFINER_AGENT, WRITER_AGENT,
};
use tower_scribe::{
    conditions, ChannelDisplay, ConversationSession, DisplayEvent, ParticipantId, PipelineRouter,
    RepairMode, RoundRobinSelector, ScribeError, ScriptedProvider, SessionId, Stage, StopReason,
    TextDocumentInspector, WordBlueprintStructure, WordInsightAnalysis,
};

type Session = ConversationSession<ScriptedProvider, PipelineRouter>;

fn new_session(provider: &ScriptedProvider, mode: RepairMode) -> Session {
    let (roster, roles) = writing_assistant(mode, 1).unwrap();
    ConversationSession::new(
        SessionId::new("scenario"),
        roster,
        PipelineRouter::new(roles),
        provider.clone(),
    )
}

fn script_pipeline(provider: &ScriptedProvider) {
    provider
        .reply_text(
            INSIGHT_AGENT,
            "Here is what I found:\n```json\n\
             {\"existing_information\": \
             {\"document_type\": \"weekly report\", \"key_content\": [\"sales up\", 12]}, \
             \"supplementary_questions\": [{\"question\": \"Which week?\", \"type\": \"date\"}]}\n\
             ```",
        )
        .reply_json(
            BLUEPRINT_AGENT,
            json!({
                "title": " Week 12 ",
                "sections": [{"subheading": "Sales", "points": ["up 5%"]}, "oops"],
                "estimated_length": "800 - 1200 字"
            }),
        )
        .reply_text(WRITER_AGENT, "Week 12 report ...")
        .reply_text(REFINER_AGENT, "Week 12 report, polished")
        .reply_text(EXPLAINER_AGENT, "The report opens with sales because ...");
}

fn producers(turns: &[tower_scribe::Turn]) -> Vec<&str> {
    turns.iter().map(|t| t.producer.as_str()).collect()
}

#[tokio::test]
async fn full_pipeline_then_overrides() {
    let provider = ScriptedProvider::new();
    script_pipeline(&provider);
    let mut session = new_session(&provider, RepairMode::Local);
    let cancel = CancellationToken::new();

    let r = session.run_task("Write a weekly report", None, &cancel).await.unwrap();
    assert_eq!(producers(&r.new_turns), vec!["user", INSIGHT_AGENT, INSIGHT_JSON_AGENT]);
    let insight = session.latest_structured::<WordInsightAnalysis>().unwrap();
    assert_eq!(insight.value().existing_information.key_content, vec!["sales up", "12"]);
    assert_eq!(
        insight.json()["supplementary_questions"][0]["type"],
        json!("open")
    );

    // an override before drafting is finished is ignored
    let refiner = ParticipantId::new(REFINER_AGENT);
    let r = session.run_task("Week 12, for the board", Some(&refiner), &cancel).await.unwrap();
    assert_eq!(producers(&r.new_turns), vec!["user", BLUEPRINT_AGENT, BLUEPRINT_JSON_AGENT]);
    let blueprint = session.latest_structured::<WordBlueprintStructure>().unwrap();
    assert_eq!(blueprint.value().title, "Week 12");
    assert_eq!(blueprint.value().sections.len(), 1);
    assert_eq!(blueprint.value().estimated_length, "800-1200字");

    let r = session.run_task("Looks good", Some(&refiner), &cancel).await.unwrap();
    assert_eq!(producers(&r.new_turns), vec!["user", WRITER_AGENT]);
    assert_eq!(r.stop_reason, StopReason::SourceMatched(WRITER_AGENT.into()));
    assert_eq!(session.selector().stage(), Stage::Freeform);

    let r = session.run_task("Polish it", Some(&refiner), &cancel).await.unwrap();
    assert_eq!(producers(&r.new_turns), vec!["user", REFINER_AGENT]);

    let explainer = ParticipantId::new(EXPLAINER_AGENT);
    let r = session.run_task("Why this order?", Some(&explainer), &cancel).await.unwrap();
    assert_eq!(producers(&r.new_turns), vec!["user", EXPLAINER_AGENT]);

    assert_eq!(session.log().len(), 12);
}

#[tokio::test]
async fn freeform_without_override_pauses() {
    let provider = ScriptedProvider::new();
    script_pipeline(&provider);
    let mut session = new_session(&provider, RepairMode::Local);
    let cancel = CancellationToken::new();
    for task in ["a", "b", "c"] {
        session.run_task(task, None, &cancel).await.unwrap();
    }
    let before = provider.requests().len();

    let r = session.run_task("now what?", None, &cancel).await.unwrap();
    assert_eq!(r.stop_reason, StopReason::AwaitingOverride);
    assert_eq!(producers(&r.new_turns), vec!["user"]);
    assert_eq!(provider.requests().len(), before);
}

#[tokio::test]
async fn unknown_override_is_reported_by_the_session() {
    let provider = ScriptedProvider::new();
    script_pipeline(&provider);
    let mut session = new_session(&provider, RepairMode::Local);
    let cancel = CancellationToken::new();
    for task in ["a", "b", "c"] {
        session.run_task(task, None, &cancel).await.unwrap();
    }
    let len = session.log().len();

    let ghost = ParticipantId::new("ghost_agent");
    let err = session.run_task("x", Some(&ghost), &cancel).await.unwrap_err();
    assert!(matches!(err, ScribeError::UnknownParticipant(id) if id == ghost));
    assert_eq!(session.log().len(), len + 1);
}

#[tokio::test]
async fn inference_failure_appends_no_pair_turns() {
    let provider = ScriptedProvider::new();
    provider.reply_text(INSIGHT_AGENT, "{}").fail(BLUEPRINT_AGENT, "upstream 500");
    let mut session = new_session(&provider, RepairMode::Local);
    let cancel = CancellationToken::new();
    session.run_task("a", None, &cancel).await.unwrap();

    let err = session.run_task("b", None, &cancel).await.unwrap_err();
    match err {
        ScribeError::Inference { participant, .. } => {
            assert_eq!(participant.as_str(), BLUEPRINT_AGENT)
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(
        producers(session.log().turns()),
        vec!["user", INSIGHT_AGENT, INSIGHT_JSON_AGENT, "user"]
    );
    assert_eq!(session.selector().stage(), Stage::Planning);
}

#[tokio::test]
async fn repair_agent_failure_in_model_mode_drops_the_draft_too() {
    let provider = ScriptedProvider::new();
    provider
        .reply_text(INSIGHT_AGENT, "no json here")
        .fail(INSIGHT_JSON_AGENT, "bad gateway");
    let mut session = new_session(&provider, RepairMode::Model);
    let err = session.run_task("a", None, &CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, ScribeError::Inference { .. }));
    assert_eq!(producers(session.log().turns()), vec!["user"]);
}

#[tokio::test]
async fn cancellation_mid_pair_leaves_log_untouched() {
    let provider = ScriptedProvider::new();
    provider.reply_text(INSIGHT_AGENT, "draft").hang(INSIGHT_JSON_AGENT);
    let mut session = new_session(&provider, RepairMode::Model);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(25)).await;
        trigger.cancel();
    });
    let r = session.run_task("a", None, &cancel).await.unwrap();
    assert_eq!(r.stop_reason, StopReason::Cancelled);
    assert_eq!(producers(session.log().turns()), vec!["user"]);
    assert_eq!(session.selector().stage(), Stage::Intake);
}

#[tokio::test]
async fn display_sees_turns_in_log_order() {
    let provider = ScriptedProvider::new();
    script_pipeline(&provider);
    let (display, mut rx) = ChannelDisplay::new();
    let mut session = new_session(&provider, RepairMode::Local).with_display(Arc::new(display));
    session.run_task("a", None, &CancellationToken::new()).await.unwrap();

    let mut seen = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let DisplayEvent::Turn(t) = event {
            seen.push(t.producer.to_string());
        }
    }
    assert_eq!(seen, vec!["user", INSIGHT_AGENT, INSIGHT_JSON_AGENT]);
}

#[tokio::test]
async fn attached_document_reaches_intake_only_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("brief.md");
    std::fs::write(&path, "# Brief\n## Audience\nthe board\n").unwrap();

    let provider = ScriptedProvider::new();
    script_pipeline(&provider);
    let mut session = new_session(&provider, RepairMode::Local)
        .with_inspector(Arc::new(TextDocumentInspector::new()));
    let info = session.attach_document(&path).await.unwrap();
    assert_eq!(info.sections, vec!["Brief", "Audience"]);

    let cancel = CancellationToken::new();
    let r = session.run_task("a", None, &cancel).await.unwrap();
    assert!(r.new_turns[0].metadata.contains_key("document_path"));
    session.run_task("b", None, &cancel).await.unwrap();

    let requests = provider.requests();
    assert_eq!(requests[0].participant.as_str(), INSIGHT_AGENT);
    assert_eq!(requests[0].documents.len(), 1);
    assert!(requests[1].documents.is_empty());
    assert!(session.pending_documents().is_empty());
}

#[tokio::test]
async fn custom_termination_and_round_robin() {
    let provider = ScriptedProvider::new();
    provider
        .reply_text(WRITER_AGENT, "draft one")
        .reply_text(REFINER_AGENT, "draft two")
        .reply_text(WRITER_AGENT, "draft three DONE");
    let (roster, _) = writing_assistant(RepairMode::Local, 1).unwrap();
    let selector = RoundRobinSelector::new([WRITER_AGENT, REFINER_AGENT]);
    let mut session =
        ConversationSession::new(SessionId::generate(), roster, selector, provider.clone())
        .with_termination(conditions::text_mention("DONE").or(conditions::max_turns(10)));

    let r = session.run_task("go", None, &CancellationToken::new()).await.unwrap();
    assert_eq!(r.stop_reason, StopReason::TextMentioned("DONE".into()));
    assert_eq!(producers(&r.new_turns), vec!["user", WRITER_AGENT, REFINER_AGENT, WRITER_AGENT]);
}

#[tokio::test]
async fn external_stop_finishes_current_turn() {
    let provider = ScriptedProvider::new();
    provider.reply_text(WRITER_AGENT, "one").reply_text(REFINER_AGENT, "two");
    let (roster, _) = writing_assistant(RepairMode::Local, 1).unwrap();
    let stop = CancellationToken::new();
    stop.cancel();
    let mut session = ConversationSession::new(
        SessionId::generate(),
        roster,
        RoundRobinSelector::new([WRITER_AGENT, REFINER_AGENT]),
        provider.clone(),
    )
    .with_termination(conditions::source_match(["nobody"]).or(conditions::external(stop)));

    let r = session.run_task("go", None, &CancellationToken::new()).await.unwrap();
    assert_eq!(r.stop_reason, StopReason::External);
    assert_eq!(producers(&r.new_turns), vec!["user"]);
}
