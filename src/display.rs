//! Display collaborator.
//!
//! Sinks observe streamed tokens and completed turns. They are purely
//! observational: nothing a sink does feeds back into routing. Hooks are
//! synchronous and must stay cheap; forward to a channel for heavier work.

use std::io::Write;
use std::sync::Mutex;

use tokio::sync::mpsc;

use crate::turn::{ParticipantId, Payload, Turn};

#[derive(Debug, Clone)]
pub enum DisplayEvent {
    /// Incremental content of a turn that is still being produced.
    Token { participant: ParticipantId, text: String },
    /// A turn that has been appended to the log.
    Turn(Turn),
}

pub trait DisplaySink: Send + Sync {
    fn emit(&self, event: DisplayEvent);
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullDisplay;

impl DisplaySink for NullDisplay {
    fn emit(&self, _event: DisplayEvent) {}
}

/// Forwards events to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelDisplay {
    tx: mpsc::UnboundedSender<DisplayEvent>,
}

impl ChannelDisplay {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DisplayEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl DisplaySink for ChannelDisplay {
    fn emit(&self, event: DisplayEvent) {
        // receiver gone means nobody is watching
        let _ = self.tx.send(event);
    }
}

/// Prints to stdout in the style of a chat console.
#[derive(Debug, Default)]
pub struct ConsoleDisplay {
    state: Mutex<StreamState>,
}

/// Who is printing tokens right now, and whose bodies are already on screen.
#[derive(Debug, Default)]
struct StreamState {
    current: Option<ParticipantId>,
    streamed: Vec<ParticipantId>,
}

impl ConsoleDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    fn header(participant: &ParticipantId) -> String {
        format!("---------- {} ----------", participant)
    }

    fn render(&self, event: DisplayEvent, out: &mut impl Write) -> std::io::Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        match event {
            DisplayEvent::Token { participant, text } => {
                if state.current.as_ref() != Some(&participant) {
                    if state.current.is_some() {
                        writeln!(out)?;
                    }
                    writeln!(out, "{}", Self::header(&participant))?;
                    if !state.streamed.contains(&participant) {
                        state.streamed.push(participant.clone());
                    }
                    state.current = Some(participant);
                }
                write!(out, "{}", text)?;
            }
            DisplayEvent::Turn(turn) => {
                if let Some(i) = state.streamed.iter().position(|p| p == &turn.producer) {
                    // body already printed token by token
                    state.streamed.remove(i);
                    if state.current.as_ref() == Some(&turn.producer) {
                        state.current = None;
                        writeln!(out)?;
                    }
                } else {
                    if state.current.take().is_some() {
                        writeln!(out)?;
                    }
                    let body = match &turn.payload {
                        Payload::Text(t) => t.clone(),
                        Payload::Structured(v) => {
                            serde_json::to_string_pretty(v).unwrap_or_else(|_| v.to_string())
                        }
                    };
                    writeln!(out, "{}\n{}", Self::header(&turn.producer), body)?;
                }
            }
        }
        out.flush()
    }
}

impl DisplaySink for ConsoleDisplay {
    fn emit(&self, event: DisplayEvent) {
        let mut out = std::io::stdout().lock();
        if let Err(e) = self.render(event, &mut out) {
            tracing::debug!(error = %e, "console write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_display_forwards_in_order() {
        let (sink, mut rx) = ChannelDisplay::new();
        let writer = ParticipantId::new("writer_agent");
        sink.emit(DisplayEvent::Token {
            participant: writer.clone(),
            text: "Dear ".into(),
        });
        sink.emit(DisplayEvent::Turn(Turn::new(writer.clone(), Payload::text("Dear team"))));

        match rx.recv().await.unwrap() {
            DisplayEvent::Token { text, .. } => assert_eq!(text, "Dear "),
            other => panic!("expected token, got {:?}", other),
        }
        match rx.recv().await.unwrap() {
            DisplayEvent::Turn(turn) => assert_eq!(turn.producer, writer),
            other => panic!("expected turn, got {:?}", other),
        }
    }

    fn token(participant: &str, text: &str) -> DisplayEvent {
        DisplayEvent::Token {
            participant: participant.into(),
            text: text.into(),
        }
    }

    #[test]
    fn console_prints_streamed_pair_once() {
        let console = ConsoleDisplay::new();
        let mut out = Vec::new();
        let events = [
            token("word_blueprint_agent", "an "),
            token("word_blueprint_agent", "outline"),
            token("word_blueprint_json_agent", "{}"),
            DisplayEvent::Turn(Turn::new(
                "word_blueprint_agent".into(),
                Payload::text("an outline"),
            )),
            DisplayEvent::Turn(Turn::new(
                "word_blueprint_json_agent".into(),
                Payload::text("{}"),
            )),
            DisplayEvent::Turn(Turn::new("writer_agent".into(), Payload::text("draft"))),
        ];
        for event in events {
            console.render(event, &mut out).unwrap();
        }
        let printed = String::from_utf8(out).unwrap();
        assert_eq!(
            printed,
            "---------- word_blueprint_agent ----------\nan outline\n\
             ---------- word_blueprint_json_agent ----------\n{}\n\
             ---------- writer_agent ----------\ndraft\n"
        );
    }

    #[test]
    fn channel_display_tolerates_closed_receiver() {
        let (sink, rx) = ChannelDisplay::new();
        drop(rx);
        sink.emit(DisplayEvent::Turn(Turn::user_task("hi", None)));
    }
}
