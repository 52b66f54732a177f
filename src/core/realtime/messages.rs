//! Event-channel message types.
//!
//! Every frame on the event channel is a JSON object with a `type` string.
//! Outbound frames are typed ([`ClientEvent`]) and stamped with an
//! `event_id`. Inbound frames are kept loosely typed ([`InboundEvent`]) so
//! unknown or partial events never fail decoding beyond the `type` field,
//! then classified into [`ServerEvent`] for dispatch.
//!
//! # Protocol Overview
//!
//! Client events (sent to the model):
//! - session.update - Configure modalities, voice, instructions and tools
//! - input_audio_buffer.clear - Drop buffered input audio
//! - conversation.item.create - Add a user message or a function output
//! - response.create - Ask for a response
//! - response.cancel - Cancel the response in progress
//!
//! Server events handled:
//! - session.created, error
//! - response.created, response.generating, response.done, response.error
//! - response.text.delta / response.audio_transcript.delta (incremental text)
//! - response.text.done / response.audio_transcript.done / response.content_part.done (complete text)
//! - conversation.item.create(d) from the assistant (complete text)
//! - input_audio_buffer.speech_started / speech_stopped
//! - response.cancel, output_audio_buffer.*

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use super::base::SessionError;

// =============================================================================
// Session Configuration
// =============================================================================

/// Session configuration sent in `session.update`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Response modalities (text, audio)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<String>>,

    /// System instructions for the assistant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    /// Voice for audio output
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,

    /// Tool definitions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDef>>,

    /// Tool choice strategy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,

    /// Temperature for response generation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

/// Tool definition advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDef {
    /// Tool type (always "function")
    #[serde(rename = "type")]
    pub tool_type: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON schema for the arguments
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

impl ToolDef {
    pub fn function(name: &str, description: &str, parameters: Value) -> Self {
        Self {
            tool_type: "function".to_string(),
            name: name.to_string(),
            description: Some(description.to_string()),
            parameters: Some(parameters),
        }
    }
}

// =============================================================================
// Conversation Items
// =============================================================================

/// Conversation item sent with `conversation.item.create`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationItem {
    #[serde(rename = "type")]
    pub item_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<ContentPart>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    /// JSON-encoded function result
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl ConversationItem {
    /// A typed user message.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            item_type: "message".to_string(),
            role: Some("user".to_string()),
            content: Some(vec![ContentPart {
                content_type: "input_text".to_string(),
                text: Some(text.into()),
                transcript: None,
            }]),
            call_id: None,
            output: None,
        }
    }

    /// The result of a function call, correlated by `call_id`.
    pub fn function_output(call_id: impl Into<String>, output: &Value) -> Self {
        Self {
            item_type: "function_call_output".to_string(),
            role: None,
            content: None,
            call_id: Some(call_id.into()),
            output: Some(output.to_string()),
        }
    }
}

/// Content part within a conversation item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentPart {
    /// Content type (input_text, text, audio)
    #[serde(rename = "type")]
    pub content_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
}

// =============================================================================
// Client Events (sent to the model)
// =============================================================================

/// Client events sent over the event channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionConfig },

    #[serde(rename = "input_audio_buffer.clear")]
    InputAudioBufferClear,

    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },

    #[serde(rename = "response.create")]
    ResponseCreate,

    #[serde(rename = "response.cancel")]
    ResponseCancel,
}

impl ClientEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            ClientEvent::SessionUpdate { .. } => "session.update",
            ClientEvent::InputAudioBufferClear => "input_audio_buffer.clear",
            ClientEvent::ConversationItemCreate { .. } => "conversation.item.create",
            ClientEvent::ResponseCreate => "response.create",
            ClientEvent::ResponseCancel => "response.cancel",
        }
    }
}

/// A client event with its correlation id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(flatten)]
    pub event: ClientEvent,
}

impl OutboundEvent {
    pub fn new(event: ClientEvent) -> Self {
        Self {
            event_id: None,
            event,
        }
    }

    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
        self
    }

    /// Assign a fresh id unless the caller supplied one. Returns the id.
    pub fn stamp(&mut self) -> String {
        self.event_id
            .get_or_insert_with(|| uuid::Uuid::new_v4().to_string())
            .clone()
    }
}

impl From<ClientEvent> for OutboundEvent {
    fn from(event: ClientEvent) -> Self {
        Self::new(event)
    }
}

// =============================================================================
// Inbound Events (received from the model)
// =============================================================================

/// A raw inbound event: its `type`, an optional timestamp and everything else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(
        default,
        deserialize_with = "timestamp_as_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<String>,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

/// Accept a timestamp of any JSON type, keeping its text form.
fn timestamp_as_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

impl InboundEvent {
    /// Decode a text frame. Fails if the frame is not a JSON object with a string `type`.
    pub fn parse(raw: &str) -> Result<Self, SessionError> {
        serde_json::from_str(raw).map_err(|e| SessionError::EventParse(e.to_string()))
    }

    /// Fill in a local timestamp when the remote side sent none.
    pub fn ensure_timestamp(&mut self) {
        if self.timestamp.is_none() {
            self.timestamp = Some(local_timestamp());
        }
    }

    /// Decode one payload field, treating a missing or mistyped field as absent.
    pub fn field<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.payload
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    /// Incremental text, either a bare string or an object carrying `text`/`delta`.
    fn delta_text(&self) -> Option<String> {
        match self.payload.get("delta")? {
            Value::String(s) => Some(s.clone()),
            Value::Object(obj) => obj
                .get("text")
                .or_else(|| obj.get("delta"))
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        }
    }
}

/// A function call requested by the model in `response.done`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionCallItem {
    pub name: String,
    pub call_id: String,
    /// JSON-encoded arguments, decoded by the tool itself
    pub arguments: String,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseBody {
    #[serde(default)]
    output: Vec<OutputItem>,
}

#[derive(Debug, Deserialize)]
struct OutputItem {
    #[serde(rename = "type", default)]
    item_type: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    content: Option<Vec<ContentPart>>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    call_id: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

impl OutputItem {
    fn text(&self) -> Option<String> {
        if self.item_type == "text" {
            return self.text.clone();
        }
        self.content.as_ref().and_then(|parts| {
            parts
                .iter()
                .find(|p| p.content_type == "text")
                .and_then(|p| p.text.clone())
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(rename = "type", default)]
    error_type: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Inbound events classified for dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    SessionCreated { session_id: Option<String> },
    Error { error_type: String, message: String },
    ResponseCreated,
    ResponseGenerating,
    /// Incremental text from either the text or the transcript stream
    Delta(String),
    /// Complete text from a done event or an assistant conversation item
    Complete(String),
    ResponseDone {
        text: Option<String>,
        function_calls: Vec<FunctionCallItem>,
    },
    ResponseError,
    SpeechStarted,
    SpeechStopped,
    ResponseCancelled,
    OutputAudioStarted,
    OutputAudioStopped,
    /// Anything else, logged and ignored
    Other,
}

impl ServerEvent {
    pub fn classify(event: &InboundEvent) -> Self {
        match event.event_type.as_str() {
            "session.created" => ServerEvent::SessionCreated {
                session_id: event
                    .payload
                    .get("session")
                    .and_then(|s| s.get("id"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
            },
            "error" => {
                let body: ErrorBody = event.field("error").unwrap_or_default();
                ServerEvent::Error {
                    error_type: body.error_type.unwrap_or_else(|| "unknown".to_string()),
                    message: body.message.unwrap_or_default(),
                }
            }
            "response.created" => ServerEvent::ResponseCreated,
            "response.generating" => ServerEvent::ResponseGenerating,
            "response.text.delta" | "response.audio_transcript.delta" => {
                event.delta_text().map_or(ServerEvent::Other, ServerEvent::Delta)
            }
            "response.text.done" => text_or_other(event.str_field("text")),
            "response.audio_transcript.done" => text_or_other(event.str_field("transcript")),
            "response.content_part.done" => {
                let part: Option<ContentPart> = event.field("part");
                match part {
                    Some(p) if p.content_type == "audio" => text_or_other(p.transcript.as_deref()),
                    _ => ServerEvent::Other,
                }
            }
            "conversation.item.create" | "conversation.item.created" => {
                let item: Option<OutputItem> = event.field("item");
                let is_assistant = event
                    .payload
                    .get("item")
                    .and_then(|i| i.get("role"))
                    .and_then(Value::as_str)
                    == Some("assistant");
                match item {
                    Some(item) if is_assistant => text_or_other(item.text().as_deref()),
                    _ => ServerEvent::Other,
                }
            }
            "response.done" => {
                let body: ResponseBody = event.field("response").unwrap_or_default();
                let text = body.output.first().and_then(OutputItem::text);
                let function_calls = body
                    .output
                    .into_iter()
                    .filter(|item| item.item_type == "function_call")
                    .filter_map(|item| {
                        Some(FunctionCallItem {
                            name: item.name?,
                            call_id: item.call_id?,
                            arguments: item.arguments.unwrap_or_else(|| "{}".to_string()),
                        })
                    })
                    .collect();
                ServerEvent::ResponseDone {
                    text,
                    function_calls,
                }
            }
            "response.error" => ServerEvent::ResponseError,
            "input_audio_buffer.speech_started" => ServerEvent::SpeechStarted,
            "input_audio_buffer.speech_stopped" => ServerEvent::SpeechStopped,
            "response.cancel" | "response.cancelled" => ServerEvent::ResponseCancelled,
            "output_audio_buffer.started" | "output_audio_buffer.created" => {
                ServerEvent::OutputAudioStarted
            }
            "output_audio_buffer.stopped" | "output_audio_buffer.cleared" => {
                ServerEvent::OutputAudioStopped
            }
            _ => ServerEvent::Other,
        }
    }
}

fn text_or_other(text: Option<&str>) -> ServerEvent {
    match text {
        Some(t) if !t.is_empty() => ServerEvent::Complete(t.to_string()),
        _ => ServerEvent::Other,
    }
}

// =============================================================================
// Event Log
// =============================================================================

/// Direction of a logged event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventDirection {
    Inbound,
    Outbound,
}

/// A diagnostic record of one event as seen on the channel.
///
/// The timestamp is local and never transmitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggedEvent {
    pub direction: EventDirection,
    pub event_type: String,
    pub timestamp: String,
    pub payload: Value,
}

/// Current time as an RFC 3339 string.
pub fn local_timestamp() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn inbound(value: Value) -> InboundEvent {
        InboundEvent::parse(&value.to_string()).unwrap()
    }

    #[test]
    fn test_client_event_serialization() {
        let event = OutboundEvent::new(ClientEvent::ResponseCancel).with_event_id("evt_1");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json, json!({"event_id": "evt_1", "type": "response.cancel"}));
    }

    #[test]
    fn test_stamp_keeps_caller_id() {
        let mut event = OutboundEvent::new(ClientEvent::ResponseCreate).with_event_id("mine");
        assert_eq!(event.stamp(), "mine");

        let mut event = OutboundEvent::new(ClientEvent::ResponseCreate);
        let id = event.stamp();
        assert!(!id.is_empty());
        assert_eq!(event.event_id.as_deref(), Some(id.as_str()));
    }

    #[test]
    fn test_function_output_item() {
        let event = ClientEvent::ConversationItemCreate {
            item: ConversationItem::function_output("call_9", &json!({"ok": true})),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "conversation.item.create");
        assert_eq!(json["item"]["type"], "function_call_output");
        assert_eq!(json["item"]["call_id"], "call_9");
        assert_eq!(json["item"]["output"], "{\"ok\":true}");
        assert!(json["item"].get("role").is_none());
    }

    #[test]
    fn test_user_text_item() {
        let json = serde_json::to_value(ConversationItem::user_text("hi")).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["content"][0]["type"], "input_text");
        assert_eq!(json["content"][0]["text"], "hi");
    }

    #[test]
    fn test_parse_requires_type() {
        assert!(InboundEvent::parse("{\"delta\":\"x\"}").is_err());
        assert!(InboundEvent::parse("not json").is_err());
        assert!(InboundEvent::parse("{\"type\":7}").is_err());
        assert!(InboundEvent::parse("[]").is_err());
    }

    #[test]
    fn test_ensure_timestamp() {
        let mut event = inbound(json!({"type": "response.created"}));
        assert!(event.timestamp.is_none());
        event.ensure_timestamp();
        assert!(event.timestamp.is_some());

        let mut event = inbound(json!({"type": "x", "timestamp": "remote"}));
        event.ensure_timestamp();
        assert_eq!(event.timestamp.as_deref(), Some("remote"));

        let event = InboundEvent::parse(r#"{"type":"x","timestamp":1700000000}"#).unwrap();
        assert_eq!(event.timestamp.as_deref(), Some("1700000000"));
    }

    #[test]
    fn test_classify_deltas() {
        let event = inbound(json!({"type": "response.text.delta", "delta": "Hel"}));
        assert_eq!(ServerEvent::classify(&event), ServerEvent::Delta("Hel".into()));

        let event = inbound(json!({"type": "response.audio_transcript.delta", "delta": {"text": "lo"}}));
        assert_eq!(ServerEvent::classify(&event), ServerEvent::Delta("lo".into()));

        let event = inbound(json!({"type": "response.text.delta"}));
        assert_eq!(ServerEvent::classify(&event), ServerEvent::Other);
    }

    #[test]
    fn test_classify_complete_text() {
        let event = inbound(json!({"type": "response.audio_transcript.done", "transcript": "Hello"}));
        assert_eq!(ServerEvent::classify(&event), ServerEvent::Complete("Hello".into()));

        let event = inbound(json!({
            "type": "response.content_part.done",
            "part": {"type": "audio", "transcript": "Fore!"}
        }));
        assert_eq!(ServerEvent::classify(&event), ServerEvent::Complete("Fore!".into()));

        let event = inbound(json!({
            "type": "conversation.item.created",
            "item": {"type": "message", "role": "user", "content": [{"type": "text", "text": "me"}]}
        }));
        assert_eq!(ServerEvent::classify(&event), ServerEvent::Other);

        let event = inbound(json!({
            "type": "conversation.item.created",
            "item": {"type": "message", "role": "assistant", "content": [{"type": "text", "text": "Par 4"}]}
        }));
        assert_eq!(ServerEvent::classify(&event), ServerEvent::Complete("Par 4".into()));
    }

    #[test]
    fn test_classify_response_done_with_function_calls() {
        let event = inbound(json!({
            "type": "response.done",
            "response": {
                "output": [
                    {"type": "function_call", "name": "get_current_weather", "call_id": "c1", "arguments": "{\"location\":\"Austin\"}"},
                    {"type": "function_call", "name": "get_hole_layout", "call_id": "c2"},
                    {"type": "message", "role": "assistant"}
                ]
            }
        }));
        match ServerEvent::classify(&event) {
            ServerEvent::ResponseDone { text, function_calls } => {
                assert!(text.is_none());
                assert_eq!(function_calls.len(), 2);
                assert_eq!(function_calls[0].call_id, "c1");
                assert_eq!(function_calls[1].arguments, "{}");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_classify_response_done_text() {
        let event = inbound(json!({
            "type": "response.done",
            "response": {"output": [{"type": "text", "text": "Aim left edge"}]}
        }));
        assert_eq!(
            ServerEvent::classify(&event),
            ServerEvent::ResponseDone {
                text: Some("Aim left edge".into()),
                function_calls: vec![]
            }
        );

        let event = inbound(json!({"type": "response.done", "response": "garbage"}));
        assert_eq!(
            ServerEvent::classify(&event),
            ServerEvent::ResponseDone {
                text: None,
                function_calls: vec![]
            }
        );
    }

    #[test]
    fn test_classify_session_and_errors() {
        let event = inbound(json!({"type": "session.created", "session": {"id": "sess_1"}}));
        assert_eq!(
            ServerEvent::classify(&event),
            ServerEvent::SessionCreated {
                session_id: Some("sess_1".into())
            }
        );

        let event = inbound(json!({"type": "error", "error": {"type": "invalid_request_error", "message": "bad"}}));
        assert_eq!(
            ServerEvent::classify(&event),
            ServerEvent::Error {
                error_type: "invalid_request_error".into(),
                message: "bad".into()
            }
        );

        let event = inbound(json!({"type": "session.updated"}));
        assert_eq!(ServerEvent::classify(&event), ServerEvent::Other);
    }
}
