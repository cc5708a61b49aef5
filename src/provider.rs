//! Model inference seam.
//!
//! Every participant talks to the language model through
//! `Service<InferenceRequest, Response = Payload, Error = BoxError>`, so the
//! session can run against OpenAI, a scripted fake, or anything wrapped in tower
//! layers (timeouts, retries) without caring which.
//!
//! - `OpenAIProvider` maps a request to an async-openai chat completion. When a
//!   schema target is set it asks for a JSON-schema response format and, if
//!   configured, streams tokens to a display sink while the turn is produced.
//! - `ScriptedProvider` returns queued replies per participant and records every
//!   request it saw.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequest, CreateChatCompletionRequestArgs, ResponseFormat,
        ResponseFormatJsonSchema,
    },
    Client,
};
use futures::StreamExt;
use serde_json::Value;
use tower::{BoxError, Service};
use tracing::{debug, trace};

use crate::display::{DisplayEvent, DisplaySink};
use crate::document::DocumentInfo;
use crate::schema::{ObjectSchema, StructuredSchema};
use crate::turn::{ParticipantId, Payload, Turn};

/// Structured output a participant is asked to produce.
#[derive(Debug, Clone)]
pub struct SchemaTarget {
    pub name: &'static str,
    pub schema: &'static ObjectSchema,
    /// JSON schema sent to the model.
    pub json_schema: Value,
}

impl SchemaTarget {
    pub fn of<T: StructuredSchema>() -> Self {
        let schema = T::schema();
        let root = schemars::schema_for!(T);
        Self {
            name: schema.name,
            schema,
            json_schema: serde_json::to_value(root).unwrap_or_default(),
        }
    }
}

/// One call to the model on behalf of a participant.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub participant: ParticipantId,
    pub instructions: String,
    /// Accumulated conversation, oldest first.
    pub context: Vec<Turn>,
    pub schema: Option<SchemaTarget>,
    pub documents: Vec<DocumentInfo>,
}

impl InferenceRequest {
    pub fn new(participant: ParticipantId, instructions: impl Into<String>) -> Self {
        Self {
            participant,
            instructions: instructions.into(),
            context: Vec::new(),
            schema: None,
            documents: Vec::new(),
        }
    }

    pub fn context(mut self, turns: impl IntoIterator<Item = Turn>) -> Self {
        self.context = turns.into_iter().collect();
        self
    }

    pub fn schema(mut self, target: Option<SchemaTarget>) -> Self {
        self.schema = target;
        self
    }

    pub fn documents(mut self, docs: Vec<DocumentInfo>) -> Self {
        self.documents = docs;
        self
    }

    /// System prompt followed by the conversation. The participant's own turns are
    /// assistant messages; everyone else's are user messages named by producer.
    pub fn to_messages(&self) -> Result<Vec<ChatCompletionRequestMessage>, BoxError> {
        let mut system = self.instructions.clone();
        for doc in &self.documents {
            system.push_str("\n\n");
            system.push_str(&doc.to_prompt());
        }
        let mut messages: Vec<ChatCompletionRequestMessage> =
            Vec::with_capacity(self.context.len() + 1);
        messages.push(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system)
                .build()?
                .into(),
        );
        for turn in &self.context {
            let content = turn.payload.render();
            let msg: ChatCompletionRequestMessage = if turn.producer == self.participant {
                ChatCompletionRequestAssistantMessageArgs::default()
                    .content(content)
                    .build()?
                    .into()
            } else {
                ChatCompletionRequestUserMessageArgs::default()
                    .content(content)
                    .name(turn.producer.as_str())
                    .build()?
                    .into()
            };
            messages.push(msg);
        }
        Ok(messages)
    }
}

/// Trait alias for model services.
pub trait ModelService:
    Service<InferenceRequest, Response = Payload, Error = BoxError> + Send
{
}
impl<T> ModelService for T where
    T: Service<InferenceRequest, Response = Payload, Error = BoxError> + Send
{
}

/// Text is returned as structured when a schema was requested and the reply
/// parses as JSON; the repair step handles everything else.
fn into_payload(text: String, wants_json: bool) -> Payload {
    if wants_json {
        if let Ok(v) = serde_json::from_str::<Value>(text.trim()) {
            return Payload::Structured(v);
        }
    }
    Payload::Text(text)
}

/// Chat completion provider over async-openai.
#[derive(Clone)]
pub struct OpenAIProvider {
    client: Arc<Client<OpenAIConfig>>,
    model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    stream_to: Option<Arc<dyn DisplaySink>>,
}

impl OpenAIProvider {
    pub fn new(model: impl Into<String>) -> Self {
        Self::with_client(Client::new(), model)
    }

    pub fn with_client(client: Client<OpenAIConfig>, model: impl Into<String>) -> Self {
        Self {
            client: Arc::new(client),
            model: model.into(),
            temperature: None,
            max_tokens: None,
            stream_to: None,
        }
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.temperature = Some(t);
        self
    }

    pub fn max_tokens(mut self, n: u32) -> Self {
        self.max_tokens = Some(n);
        self
    }

    /// Stream tokens to `sink` as they arrive.
    pub fn streaming(mut self, sink: Arc<dyn DisplaySink>) -> Self {
        self.stream_to = Some(sink);
        self
    }

    pub fn build_request(
        &self,
        req: &InferenceRequest,
    ) -> Result<CreateChatCompletionRequest, BoxError> {
        let mut builder = CreateChatCompletionRequestArgs::default();
        builder.model(&self.model).messages(req.to_messages()?);
        if let Some(t) = self.temperature {
            builder.temperature(t);
        }
        if let Some(n) = self.max_tokens {
            builder.max_completion_tokens(n);
        }
        if let Some(target) = &req.schema {
            builder.response_format(ResponseFormat::JsonSchema {
                json_schema: ResponseFormatJsonSchema {
                    name: target.name.to_string(),
                    description: None,
                    schema: Some(target.json_schema.clone()),
                    // schemars output is not strict-mode compatible
                    strict: Some(false),
                },
            });
        }
        if self.stream_to.is_some() {
            builder.stream(true);
        }
        Ok(builder.build()?)
    }
}

impl Service<InferenceRequest> for OpenAIProvider {
    type Response = Payload;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Payload, BoxError>> + Send>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: InferenceRequest) -> Self::Future {
        let this = self.clone();
        Box::pin(async move {
            let request = this.build_request(&req)?;
            let wants_json = req.schema.is_some();
            debug!(
                participant = %req.participant,
                model = %this.model,
                messages = request.messages.len(),
                "chat completion"
            );

            let text = match &this.stream_to {
                Some(sink) => {
                    let mut stream = this.client.chat().create_stream(request).await?;
                    let mut buf = String::new();
                    while let Some(chunk) = stream.next().await {
                        let chunk = chunk?;
                        for choice in chunk.choices {
                            if let Some(delta) = choice.delta.content {
                                trace!(participant = %req.participant, len = delta.len(), "token");
                                sink.emit(DisplayEvent::Token {
                                    participant: req.participant.clone(),
                                    text: delta.clone(),
                                });
                                buf.push_str(&delta);
                            }
                        }
                    }
                    buf
                }
                None => {
                    let response = this.client.chat().create(request).await?;
                    let choice = response
                        .choices
                        .into_iter()
                        .next()
                        .ok_or_else(|| BoxError::from("no choices in response"))?;
                    choice.message.content.unwrap_or_default()
                }
            };
            Ok(into_payload(text, wants_json))
        })
    }
}

/// A queued reply for `ScriptedProvider`.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Reply(Payload),
    Fail(String),
    /// Never completes; used to exercise cancellation.
    Hang,
}

/// Deterministic provider for tests and demos.
#[derive(Clone, Default)]
pub struct ScriptedProvider {
    scripts: Arc<Mutex<HashMap<ParticipantId, VecDeque<ScriptedReply>>>>,
    seen: Arc<Mutex<Vec<InferenceRequest>>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, participant: impl Into<ParticipantId>, reply: ScriptedReply) -> &Self {
        self.scripts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .entry(participant.into())
            .or_default()
            .push_back(reply);
        self
    }

    pub fn reply_text(
        &self,
        participant: impl Into<ParticipantId>,
        text: impl Into<String>,
    ) -> &Self {
        self.push(participant, ScriptedReply::Reply(Payload::Text(text.into())))
    }

    pub fn reply_json(&self, participant: impl Into<ParticipantId>, value: Value) -> &Self {
        self.push(participant, ScriptedReply::Reply(Payload::Structured(value)))
    }

    pub fn fail(&self, participant: impl Into<ParticipantId>, message: impl Into<String>) -> &Self {
        self.push(participant, ScriptedReply::Fail(message.into()))
    }

    pub fn hang(&self, participant: impl Into<ParticipantId>) -> &Self {
        self.push(participant, ScriptedReply::Hang)
    }

    /// Requests received so far, oldest first.
    pub fn requests(&self) -> Vec<InferenceRequest> {
        self.seen.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

impl Service<InferenceRequest> for ScriptedProvider {
    type Response = Payload;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Payload, BoxError>> + Send>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: InferenceRequest) -> Self::Future {
        let next = self
            .scripts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get_mut(&req.participant)
            .and_then(VecDeque::pop_front);
        let participant = req.participant.clone();
        self.seen.lock().unwrap_or_else(|p| p.into_inner()).push(req);
        Box::pin(async move {
            match next {
                Some(ScriptedReply::Reply(p)) => Ok(p),
                Some(ScriptedReply::Fail(m)) => Err(m.into()),
                Some(ScriptedReply::Hang) => futures::future::pending().await,
                None => Err(format!("no scripted reply for {}", participant).into()),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::models::WordBlueprintStructure;
    use serde_json::json;
    use tower::ServiceExt;

    fn request_with_context() -> InferenceRequest {
        let writer = ParticipantId::new("writer_agent");
        InferenceRequest::new(writer.clone(), "You write documents.").context(vec![
            Turn::user_task("weekly report", None),
            Turn::new(writer, Payload::text("first draft")),
            Turn::new(
                ParticipantId::new("word_blueprint_json_agent"),
                Payload::Structured(json!({"title": "T"})),
            ),
        ])
    }

    #[test]
    fn context_maps_to_roles_by_producer() {
        let messages = request_with_context().to_messages().unwrap();
        assert_eq!(messages.len(), 4);
        assert!(matches!(messages[0], ChatCompletionRequestMessage::System(_)));
        match &messages[1] {
            ChatCompletionRequestMessage::User(u) => assert_eq!(u.name.as_deref(), Some("user")),
            other => panic!("expected user message, got {:?}", other),
        }
        assert!(matches!(messages[2], ChatCompletionRequestMessage::Assistant(_)));
        match &messages[3] {
            ChatCompletionRequestMessage::User(u) => {
                assert_eq!(u.name.as_deref(), Some("word_blueprint_json_agent"))
            }
            other => panic!("expected user message, got {:?}", other),
        }
    }

    #[test]
    fn schema_target_requests_json_schema_format() {
        let provider = OpenAIProvider::new("gpt-4o-mini").temperature(0.2);
        let req = request_with_context().schema(Some(SchemaTarget::of::<WordBlueprintStructure>()));
        let built = provider.build_request(&req).unwrap();
        match built.response_format {
            Some(ResponseFormat::JsonSchema { json_schema }) => {
                assert_eq!(json_schema.name, "WordBlueprintStructure");
                let schema = json_schema.schema.unwrap();
                assert!(schema["properties"].get("estimated_length").is_some());
            }
            other => panic!("expected json schema format, got {:?}", other),
        }
        assert_eq!(built.temperature, Some(0.2));
        assert!(built.stream.is_none());
    }

    #[test]
    fn json_replies_become_structured_only_when_requested() {
        assert_eq!(
            into_payload(" {\"a\":1} ".into(), true),
            Payload::Structured(json!({"a": 1}))
        );
        assert_eq!(into_payload("{\"a\":1}".into(), false), Payload::text("{\"a\":1}"));
        assert_eq!(into_payload("not json".into(), true), Payload::text("not json"));
    }

    #[tokio::test]
    async fn scripted_provider_replays_per_participant() {
        let provider = ScriptedProvider::new();
        provider
            .reply_text("writer_agent", "hello")
            .fail("writer_agent", "rate limited");

        let req = InferenceRequest::new(ParticipantId::new("writer_agent"), "");
        let first = provider.clone().oneshot(req.clone()).await.unwrap();
        assert_eq!(first, Payload::text("hello"));
        let err = provider.clone().oneshot(req.clone()).await.unwrap_err();
        assert_eq!(err.to_string(), "rate limited");
        let err = provider.clone().oneshot(req).await.unwrap_err();
        assert!(err.to_string().contains("no scripted reply"));
        assert_eq!(provider.requests().len(), 3);
    }
}
