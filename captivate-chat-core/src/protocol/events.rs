//! Event envelopes exchanged with the chat service

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Action name wrapping every outbound event
pub const SEND_MESSAGE_ACTION: &str = "sendMessage";

/// Event type tags
pub mod tags {
    /// Handshake confirmation sent once the service accepts the connection
    pub const SOCKET_CONNECTED: &str = "socket_connected";
    /// Request to open a new conversation
    pub const CONVERSATION_START: &str = "conversation_start";
    /// Reply to `conversation_start`, carries `conversation_id`
    pub const CONVERSATION_START_SUCCESS: &str = "conversation_start_success";
    /// User message
    pub const MESSAGE: &str = "message";
    pub const SET_METADATA: &str = "set_metadata";
    /// Custom action, both directions
    pub const ACTION: &str = "action";
    pub const GET_TRANSCRIPT: &str = "get_transcript";
    /// Reply to `get_transcript`
    pub const TRANSCRIPT: &str = "transcript";
    pub const BOT_MESSAGE: &str = "bot_message";
    pub const LIVECHAT_MESSAGE: &str = "livechat_message";
    pub const CONVERSATION_UPDATE: &str = "conversation_update";
    pub const ERROR: &str = "error";
}

/// A tagged event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event type tag
    pub event_type: String,
    /// Tag-specific payload
    #[serde(default)]
    pub event_payload: Value,
}

impl Event {
    /// Create a new event
    pub fn new(event_type: impl Into<String>, event_payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            event_payload,
        }
    }

    /// Conversation the event is scoped to, if any
    pub fn conversation_id(&self) -> Option<&str> {
        self.event_payload
            .get("conversation_id")
            .and_then(Value::as_str)
    }
}

/// Frame written to the service
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundEnvelope {
    pub action: String,
    pub event: Event,
}

impl OutboundEnvelope {
    /// Wrap an event in the `sendMessage` action
    pub fn new(event: Event) -> Self {
        Self {
            action: SEND_MESSAGE_ACTION.to_string(),
            event,
        }
    }

    /// `conversation_start` request
    pub fn conversation_start(user_id: &str, user_basic_info: Value, user_data: Value) -> Self {
        Self::new(Event::new(
            tags::CONVERSATION_START,
            json!({
                "userId": user_id,
                "userBasicInfo": user_basic_info,
                "userData": user_data,
            }),
        ))
    }

    /// Event scoped to a conversation: `conversation_id` is added to `fields`
    pub fn scoped(
        event_type: impl Into<String>,
        conversation_id: &str,
        mut fields: Map<String, Value>,
    ) -> Self {
        fields.insert(
            "conversation_id".to_string(),
            Value::String(conversation_id.to_string()),
        );
        Self::new(Event::new(event_type, Value::Object(fields)))
    }

    /// Event type tag of the wrapped event
    pub fn event_type(&self) -> &str {
        &self.event.event_type
    }
}

/// Frame received from the service
#[derive(Debug, Clone, Deserialize)]
pub struct InboundEnvelope {
    pub event: Event,
}

/// A parsed inbound event with its arrival time
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub event: Event,
    pub received_at: DateTime<Utc>,
}

impl InboundEvent {
    /// Parse one transport frame
    pub fn parse(raw: &str) -> crate::Result<Self> {
        let envelope: InboundEnvelope = serde_json::from_str(raw)?;
        Ok(Self {
            event: envelope.event,
            received_at: Utc::now(),
        })
    }

    pub fn event_type(&self) -> &str {
        &self.event.event_type
    }

    pub fn payload(&self) -> &Value {
        &self.event.event_payload
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.event.conversation_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversation_start_wire_shape() {
        let envelope = OutboundEnvelope::conversation_start(
            "user-1",
            json!({"name": "Ada"}),
            json!({"plan": "pro"}),
        );
        let wire = serde_json::to_value(&envelope).unwrap();

        assert_eq!(
            wire,
            json!({
                "action": "sendMessage",
                "event": {
                    "event_type": "conversation_start",
                    "event_payload": {
                        "userId": "user-1",
                        "userBasicInfo": {"name": "Ada"},
                        "userData": {"plan": "pro"}
                    }
                }
            })
        );
    }

    #[test]
    fn test_scoped_envelope_carries_conversation_id() {
        let mut fields = Map::new();
        fields.insert("content".to_string(), json!("hi"));
        let envelope = OutboundEnvelope::scoped(tags::MESSAGE, "conv-9", fields);

        assert_eq!(envelope.event_type(), "message");
        assert_eq!(envelope.event.conversation_id(), Some("conv-9"));
        assert_eq!(envelope.event.event_payload["content"], json!("hi"));
    }

    #[test]
    fn test_parse_inbound_without_payload() {
        let event = InboundEvent::parse(r#"{"event":{"event_type":"socket_connected"}}"#).unwrap();
        assert_eq!(event.event_type(), tags::SOCKET_CONNECTED);
        assert!(event.payload().is_null());
        assert_eq!(event.conversation_id(), None);
    }

    #[test]
    fn test_parse_inbound_scoped() {
        let raw = r#"{"event":{"event_type":"bot_message","event_payload":{"conversation_id":"c1","content":"hello"}}}"#;
        let event = InboundEvent::parse(raw).unwrap();
        assert_eq!(event.conversation_id(), Some("c1"));
        assert_eq!(event.payload()["content"], json!("hello"));
    }

    #[test]
    fn test_parse_rejects_malformed_frames() {
        assert!(InboundEvent::parse("not json").is_err());
        assert!(InboundEvent::parse(r#"{"type":"status"}"#).is_err());
    }

    #[test]
    fn test_non_string_conversation_id_is_unscoped() {
        let event = Event::new(tags::ERROR, json!({"conversation_id": 42}));
        assert_eq!(event.conversation_id(), None);
    }
}
