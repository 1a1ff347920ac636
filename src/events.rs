//! Wire envelope and typed decoding for the agent event channel.
//!
//! Every socket event wraps its payload in `{ user_id, event_type, message }`.
//! `decode` is the only place raw JSON becomes an [`InboundEvent`]; anything
//! that fails here is dropped by the caller without touching state.

use crate::conversation::Version;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Event names
// ---------------------------------------------------------------------------

pub const EVENT_AGENT_CHANNEL: &str = "agent_events_channel";
pub const EVENT_LOOP_FINISHED: &str = "agent_loop_finished";
pub const EVENT_RESPONSE: &str = "response";
pub const EVENT_RESPONSE_FINISHED: &str = "responseFinished";

pub const EMIT_MESSAGE: &str = "message";
pub const EMIT_REGISTER_USER: &str = "register_user";
pub const EMIT_REGISTER_WIDGET_SESSION: &str = "register_widget_session";

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unknown event `{0}`")]
    UnknownEvent(String),
    #[error("event `{0}` carries no payload")]
    MissingPayload(String),
    #[error("event `{event}` has an invalid payload: {source}")]
    InvalidPayload {
        event: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("malformed envelope: {0}")]
    Json(#[from] serde_json::Error),
}

/// `{ user_id, event_type, message }` exactly as it travels on the socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub user_id: u64,
    #[serde(default)]
    pub event_type: String,
    #[serde(default)]
    pub message: Option<Value>,
}

impl Envelope {
    pub fn outbound(user_id: u64, event_type: &str, message: Value) -> Self {
        Self {
            user_id,
            event_type: event_type.to_string(),
            message: Some(message),
        }
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum AgentEventKind {
    ToolCallStart,
    ToolCallEnd,
    LoopStart,
    IterationStart,
    AgentComplete,
    Error,
    Other(String),
}

impl From<String> for AgentEventKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "tool_call_start" => Self::ToolCallStart,
            "tool_call_end" => Self::ToolCallEnd,
            "loop_start" => Self::LoopStart,
            "iteration_start" => Self::IterationStart,
            "agent_complete" => Self::AgentComplete,
            "error" => Self::Error,
            _ => Self::Other(value),
        }
    }
}

/// Payload of `agent_events_channel`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AgentEvent {
    #[serde(rename = "type")]
    pub kind: AgentEventKind,
    #[serde(default, deserialize_with = "de_opt_id")]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(default)]
    pub total: Option<u32>,
    #[serde(default)]
    pub index: Option<u32>,
    #[serde(default)]
    pub agent_name: Option<String>,
    #[serde(default)]
    pub iteration: Option<u32>,
}

#[cfg(test)]
impl AgentEvent {
    pub fn new(kind: AgentEventKind, conversation_id: &str) -> Self {
        Self {
            kind,
            conversation_id: Some(conversation_id.to_string()),
            tool_name: None,
            error: None,
            total: None,
            index: None,
            agent_name: None,
            iteration: None,
        }
    }
}

/// Server-assigned identity for a completed turn (multi-agent widget shape).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Finalization {
    #[serde(default, deserialize_with = "de_opt_id")]
    pub ai_message_id: Option<String>,
    #[serde(default, deserialize_with = "de_opt_id")]
    pub user_message_id: Option<String>,
    #[serde(default)]
    pub versions: Option<Vec<Version>>,
    #[serde(default)]
    pub next_agent_slug: Option<String>,
}

impl Finalization {
    pub fn is_empty(&self) -> bool {
        self.ai_message_id.is_none()
            && self.user_message_id.is_none()
            && self.versions.is_none()
            && self.next_agent_slug.is_none()
    }
}

/// Payload of `agent_loop_finished`. The simple single-agent fields and the
/// finalization fields can both be present.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LoopFinished {
    #[serde(default, deserialize_with = "de_opt_id")]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default, deserialize_with = "de_opt_id")]
    pub message_id: Option<String>,
    #[serde(default)]
    pub iterations: Option<u32>,
    #[serde(default)]
    pub tool_calls_count: Option<u32>,
    #[serde(flatten)]
    pub finalization: Finalization,
}

/// Payload of `response`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResponseChunk {
    pub chunk: String,
    #[serde(default)]
    pub agent_slug: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Agent(AgentEvent),
    LoopFinished(LoopFinished),
    Chunk(ResponseChunk),
    ResponseFinished(Option<Finalization>),
}

impl InboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Agent(_) => EVENT_AGENT_CHANNEL,
            Self::LoopFinished(_) => EVENT_LOOP_FINISHED,
            Self::Chunk(_) => EVENT_RESPONSE,
            Self::ResponseFinished(_) => EVENT_RESPONSE_FINISHED,
        }
    }
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

pub fn decode(event_name: &str, raw: &str) -> Result<InboundEvent, DecodeError> {
    let envelope: Envelope = serde_json::from_str(raw)?;
    decode_envelope(event_name, envelope)
}

pub fn decode_envelope(event_name: &str, envelope: Envelope) -> Result<InboundEvent, DecodeError> {
    let payload = envelope.message.filter(|v| !v.is_null());
    match event_name {
        EVENT_AGENT_CHANNEL => Ok(InboundEvent::Agent(parse_payload(event_name, payload)?)),
        EVENT_LOOP_FINISHED => Ok(InboundEvent::LoopFinished(parse_payload(
            event_name, payload,
        )?)),
        EVENT_RESPONSE => Ok(InboundEvent::Chunk(parse_payload(event_name, payload)?)),
        EVENT_RESPONSE_FINISHED => {
            // A bare `responseFinished` still ends the stream.
            let Some(payload) = payload else {
                return Ok(InboundEvent::ResponseFinished(None));
            };
            let fin: Finalization = parse_payload(event_name, Some(payload))?;
            Ok(InboundEvent::ResponseFinished(
                (!fin.is_empty()).then_some(fin),
            ))
        }
        other => Err(DecodeError::UnknownEvent(other.to_string())),
    }
}

fn parse_payload<T: serde::de::DeserializeOwned>(
    event_name: &str,
    payload: Option<Value>,
) -> Result<T, DecodeError> {
    let payload = payload.ok_or_else(|| DecodeError::MissingPayload(event_name.to_string()))?;
    serde_json::from_value(payload).map_err(|source| DecodeError::InvalidPayload {
        event: event_name.to_string(),
        source,
    })
}

/// Ids arrive as numbers from the REST side and as strings from the widget.
pub(crate) fn de_opt_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) if !s.is_empty() => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

pub(crate) fn de_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    de_opt_id(deserializer)?
        .ok_or_else(|| serde::de::Error::custom("expected a string or numeric id"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_tool_event() {
        let raw = r#"{"user_id":7,"event_type":"agent_events_channel","message":{"type":"tool_call_start","conversation_id":12,"tool_name":"search"}}"#;
        let event = decode(EVENT_AGENT_CHANNEL, raw).unwrap();
        let InboundEvent::Agent(ev) = event else {
            panic!("expected agent event");
        };
        assert_eq!(ev.kind, AgentEventKind::ToolCallStart);
        assert_eq!(ev.conversation_id.as_deref(), Some("12"));
        assert_eq!(ev.tool_name.as_deref(), Some("search"));
    }

    #[test]
    fn test_unknown_agent_event_type_is_kept() {
        let raw = r#"{"user_id":1,"event_type":"x","message":{"type":"thinking","conversation_id":"c"}}"#;
        let InboundEvent::Agent(ev) = decode(EVENT_AGENT_CHANNEL, raw).unwrap() else {
            panic!("expected agent event");
        };
        assert_eq!(ev.kind, AgentEventKind::Other("thinking".into()));
    }

    #[test]
    fn test_missing_payload_is_an_error() {
        let raw = r#"{"user_id":1,"event_type":"response"}"#;
        assert!(matches!(
            decode(EVENT_RESPONSE, raw),
            Err(DecodeError::MissingPayload(_))
        ));
        let raw = r#"{"user_id":1,"event_type":"response","message":null}"#;
        assert!(matches!(
            decode(EVENT_RESPONSE, raw),
            Err(DecodeError::MissingPayload(_))
        ));
    }

    #[test]
    fn test_invalid_payload_and_envelope() {
        let raw = r#"{"user_id":1,"event_type":"response","message":{"agent_slug":"a1"}}"#;
        assert!(matches!(
            decode(EVENT_RESPONSE, raw),
            Err(DecodeError::InvalidPayload { .. })
        ));
        assert!(matches!(
            decode(EVENT_RESPONSE, "not json"),
            Err(DecodeError::Json(_))
        ));
        assert!(matches!(
            decode("typing", r#"{"message":{}}"#),
            Err(DecodeError::UnknownEvent(_))
        ));
    }

    #[test]
    fn test_response_finished_shapes() {
        let bare = decode(EVENT_RESPONSE_FINISHED, r#"{"user_id":1,"event_type":"x"}"#).unwrap();
        assert_eq!(bare, InboundEvent::ResponseFinished(None));

        let empty = decode(
            EVENT_RESPONSE_FINISHED,
            r#"{"user_id":1,"event_type":"x","message":{}}"#,
        )
        .unwrap();
        assert_eq!(empty, InboundEvent::ResponseFinished(None));

        let full = decode(
            EVENT_RESPONSE_FINISHED,
            r#"{"user_id":1,"event_type":"x","message":{"ai_message_id":42,"user_message_id":"41"}}"#,
        )
        .unwrap();
        let InboundEvent::ResponseFinished(Some(fin)) = full else {
            panic!("expected finalization");
        };
        assert_eq!(fin.ai_message_id.as_deref(), Some("42"));
        assert_eq!(fin.user_message_id.as_deref(), Some("41"));
    }

    #[test]
    fn test_loop_finished_carries_both_shapes() {
        let raw = r#"{"user_id":1,"event_type":"agent_loop_finished","message":{
            "conversation_id":"c1","output":"done","message_id":9,"iterations":2,"tool_calls_count":1,
            "ai_message_id":10,"versions":[{"agent_slug":"a1","text":"hi"}],"next_agent_slug":"a2"}}"#;
        let InboundEvent::LoopFinished(lf) = decode(EVENT_LOOP_FINISHED, raw).unwrap() else {
            panic!("expected loop finished");
        };
        assert_eq!(lf.message_id.as_deref(), Some("9"));
        assert_eq!(lf.output.as_deref(), Some("done"));
        assert_eq!(lf.finalization.ai_message_id.as_deref(), Some("10"));
        assert_eq!(lf.finalization.next_agent_slug.as_deref(), Some("a2"));
        assert_eq!(lf.finalization.versions.as_ref().map(Vec::len), Some(1));
    }
}
