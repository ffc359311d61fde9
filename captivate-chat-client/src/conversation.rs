//! Conversations multiplexed over a session's channel

use captivate_chat_core::protocol::{tags, InboundEvent, OutboundEnvelope};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::channel::{Channel, Delivery, ReplyMatcher};
use crate::error::{ClientError, Result};
use crate::listeners::{Listener, ListenerRegistry};

/// One record of a conversation transcript, as returned by the service
pub type TranscriptRecord = Value;

/// Who sent an inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOrigin {
    Bot,
    LiveAgent,
}

impl MessageOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageOrigin::Bot => "bot",
            MessageOrigin::LiveAgent => "livechat",
        }
    }
}

impl fmt::Display for MessageOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who speaks first in a newly created conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartMode {
    /// An empty message is sent right after creation so the bot opens
    #[default]
    BotFirst,
    UserFirst,
}

impl fmt::Display for StartMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartMode::BotFirst => f.write_str("bot-first"),
            StartMode::UserFirst => f.write_str("user-first"),
        }
    }
}

impl FromStr for StartMode {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "bot-first" => Ok(StartMode::BotFirst),
            "user-first" => Ok(StartMode::UserFirst),
            other => Err(ClientError::State(format!(
                "unknown start mode '{}', expected bot-first or user-first",
                other
            ))),
        }
    }
}

/// Listeners registered through one convenience call
#[derive(Clone)]
pub struct Subscription {
    entries: Vec<(&'static str, Listener)>,
}

impl Subscription {
    /// Event tags covered by this subscription
    pub fn event_types(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|(tag, _)| *tag)
    }
}

struct ConversationInner {
    conversation_id: String,
    channel: Arc<Channel>,
    listeners: ListenerRegistry,
    request_timeout: Duration,
}

/// A logical conversation, identified by the service-issued id.
///
/// Cloning is cheap and clones share one listener registry. The conversation
/// writes through the session's channel but can never close it.
#[derive(Clone)]
pub struct Conversation {
    inner: Arc<ConversationInner>,
}

impl Conversation {
    pub(crate) fn new(
        conversation_id: impl Into<String>,
        channel: Arc<Channel>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(ConversationInner {
                conversation_id: conversation_id.into(),
                channel,
                listeners: ListenerRegistry::new(),
                request_timeout,
            }),
        }
    }

    /// The service-issued conversation id
    pub fn conversation_id(&self) -> &str {
        &self.inner.conversation_id
    }

    /// Whether both handles refer to the same conversation instance
    pub fn ptr_eq(&self, other: &Conversation) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Register a callback for inbound `event_type` events scoped to this
    /// conversation. Keep the returned handle to remove it with [`off`].
    ///
    /// [`off`]: Conversation::off
    pub fn on<F>(&self, event_type: impl Into<String>, callback: F) -> Listener
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let listener: Listener = Arc::new(callback);
        self.add_listener(event_type, Arc::clone(&listener));
        listener
    }

    /// Register an existing listener handle
    pub fn add_listener(&self, event_type: impl Into<String>, listener: Listener) {
        self.inner.listeners.add(event_type, listener);
    }

    /// Remove a listener; returns whether it was registered
    pub fn off(&self, event_type: &str, listener: &Listener) -> bool {
        self.inner.listeners.remove(event_type, listener)
    }

    /// Messages from the bot or a live agent
    pub fn on_message<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&str, MessageOrigin) + Send + Sync + 'static,
    {
        let callback = Arc::new(callback);
        let entries = [
            (tags::BOT_MESSAGE, MessageOrigin::Bot),
            (tags::LIVECHAT_MESSAGE, MessageOrigin::LiveAgent),
        ]
        .into_iter()
        .map(|(tag, origin)| {
            let callback = Arc::clone(&callback);
            let listener = self.on(tag, move |payload: &Value| {
                callback(str_field(payload, "content"), origin);
            });
            (tag, listener)
        })
        .collect();
        Subscription { entries }
    }

    /// Custom actions pushed by the service: `(action_id, data)`
    pub fn on_action_received<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        let listener = self.on(tags::ACTION, move |payload: &Value| {
            let data = payload.get("data").unwrap_or(&Value::Null);
            callback(str_field(payload, "action_id"), data);
        });
        Subscription {
            entries: vec![(tags::ACTION, listener)],
        }
    }

    pub fn on_conversation_update<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let listener = self.on(tags::CONVERSATION_UPDATE, callback);
        Subscription {
            entries: vec![(tags::CONVERSATION_UPDATE, listener)],
        }
    }

    pub fn on_error<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let listener = self.on(tags::ERROR, callback);
        Subscription {
            entries: vec![(tags::ERROR, listener)],
        }
    }

    /// Remove every listener of a subscription
    pub fn unsubscribe(&self, subscription: &Subscription) {
        for (tag, listener) in &subscription.entries {
            self.off(tag, listener);
        }
    }

    /// Number of listeners for `event_type`
    pub fn listener_count(&self, event_type: &str) -> usize {
        self.inner.listeners.count(event_type)
    }

    /// Send a user message. Fire-and-forget.
    pub async fn send_message(&self, content: &str) -> Delivery {
        let mut fields = Map::new();
        fields.insert("content".to_string(), Value::String(content.to_string()));
        self.send_scoped(tags::MESSAGE, fields).await
    }

    /// Attach metadata to the conversation. Fire-and-forget.
    pub async fn set_metadata(&self, metadata: Value) -> Delivery {
        let mut fields = Map::new();
        fields.insert("metadata".to_string(), metadata);
        self.send_scoped(tags::SET_METADATA, fields).await
    }

    /// Send a custom action; `data` defaults to an empty object.
    /// Fire-and-forget.
    pub async fn send_action(&self, action_id: &str, data: Option<Value>) -> Delivery {
        let mut fields = Map::new();
        fields.insert("action_id".to_string(), Value::String(action_id.to_string()));
        fields.insert(
            "data".to_string(),
            data.unwrap_or_else(|| Value::Object(Map::new())),
        );
        self.send_scoped(tags::ACTION, fields).await
    }

    /// Request the transcript and wait for the reply
    pub async fn get_transcript(&self) -> Result<Vec<TranscriptRecord>> {
        let channel = &self.inner.channel;
        let pending = channel.register_reply(ReplyMatcher::scoped(
            tags::TRANSCRIPT,
            self.conversation_id(),
        ));

        if !self.send_scoped(tags::GET_TRANSCRIPT, Map::new()).await.is_sent() {
            return Err(ClientError::State(
                "transcript request not sent: channel is not open".to_string(),
            ));
        }

        let reply = pending
            .wait("getTranscript", self.inner.request_timeout)
            .await?;
        match reply.payload().get("transcript") {
            Some(Value::Array(records)) => Ok(records.clone()),
            Some(Value::Null) | None => Ok(Vec::new()),
            Some(other) => Err(ClientError::Protocol(format!(
                "transcript reply is not a list: {}",
                other
            ))),
        }
    }

    async fn send_scoped(&self, event_type: &str, fields: Map<String, Value>) -> Delivery {
        let envelope = OutboundEnvelope::scoped(event_type, self.conversation_id(), fields);
        self.inner.channel.send(&envelope).await
    }

    /// Run the listeners for an inbound event routed to this conversation
    pub(crate) fn dispatch(&self, event: &InboundEvent) -> usize {
        self.inner.listeners.emit(event.event_type(), event.payload())
    }

    pub(crate) fn clear_listeners(&self) {
        self.inner.listeners.clear();
    }
}

impl fmt::Debug for Conversation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conversation")
            .field("conversation_id", &self.inner.conversation_id)
            .field("listeners", &self.inner.listeners.total())
            .finish()
    }
}

fn str_field<'a>(payload: &'a Value, key: &str) -> &'a str {
    payload.get(key).and_then(Value::as_str).unwrap_or_default()
}

/// Conversations of one session, keyed by id
#[derive(Default)]
pub(crate) struct ConversationTable {
    conversations: RwLock<HashMap<String, Conversation>>,
}

impl ConversationTable {
    pub(crate) fn get(&self, conversation_id: &str) -> Option<Conversation> {
        self.conversations.read().get(conversation_id).cloned()
    }

    /// Return the existing instance for `conversation_id` or insert a new one
    pub(crate) fn get_or_insert_with(
        &self,
        conversation_id: &str,
        make: impl FnOnce() -> Conversation,
    ) -> Conversation {
        if let Some(existing) = self.get(conversation_id) {
            return existing;
        }
        let mut conversations = self.conversations.write();
        conversations
            .entry(conversation_id.to_string())
            .or_insert_with(|| {
                debug!(conversation_id, "Registering conversation");
                make()
            })
            .clone()
    }

    pub(crate) fn ids(&self) -> Vec<String> {
        self.conversations.read().keys().cloned().collect()
    }

    pub(crate) fn drain(&self) -> Vec<Conversation> {
        self.conversations
            .write()
            .drain()
            .map(|(_, conversation)| conversation)
            .collect()
    }
}
