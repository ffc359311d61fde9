//! Shared wire handle
//!
//! A [`Channel`] wraps the open transport sink. The session owns it and every
//! conversation writes through it. It also keeps the pending-reply registry:
//! the protocol carries no request ids, so a suspended operation registers a
//! [`ReplyMatcher`] and the dispatch loop completes the first matching waiters.

use captivate_chat_core::protocol::{InboundEvent, OutboundEnvelope};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use crate::error::{ClientError, Result};
use crate::transport::TransportSink;

/// Local outcome of a fire-and-forget send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The frame was written to the transport
    Sent,
    /// The channel was not open or the write failed; a diagnostic was logged
    Dropped,
}

impl Delivery {
    pub fn is_sent(self) -> bool {
        self == Delivery::Sent
    }
}

/// Which inbound event completes a pending reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyMatcher {
    event_type: String,
    conversation_id: Option<String>,
}

impl ReplyMatcher {
    /// Match on event type only
    pub fn event(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            conversation_id: None,
        }
    }

    /// Match on event type and the payload's conversation id
    pub fn scoped(event_type: impl Into<String>, conversation_id: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            conversation_id: Some(conversation_id.into()),
        }
    }

    pub fn matches(&self, event: &InboundEvent) -> bool {
        if event.event_type() != self.event_type {
            return false;
        }
        match &self.conversation_id {
            Some(id) => event.conversation_id() == Some(id.as_str()),
            None => true,
        }
    }
}

struct Waiter {
    id: u64,
    matcher: ReplyMatcher,
    tx: oneshot::Sender<Result<InboundEvent>>,
}

/// The shared transport handle
pub struct Channel {
    sink: tokio::sync::Mutex<Box<dyn TransportSink>>,
    open: AtomicBool,
    waiters: Mutex<Vec<Waiter>>,
    next_waiter_id: AtomicU64,
}

impl Channel {
    pub(crate) fn new(sink: Box<dyn TransportSink>) -> Self {
        Self {
            sink: tokio::sync::Mutex::new(sink),
            open: AtomicBool::new(true),
            waiters: Mutex::new(Vec::new()),
            next_waiter_id: AtomicU64::new(1),
        }
    }

    /// Whether writes are currently accepted
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_closed(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    /// Serialize and write one envelope.
    ///
    /// Never fails: a closed channel or a failed write is logged and reported
    /// as [`Delivery::Dropped`].
    pub async fn send(&self, envelope: &OutboundEnvelope) -> Delivery {
        if !self.is_open() {
            warn!(
                event_type = envelope.event_type(),
                "Socket is not open. Message not sent"
            );
            return Delivery::Dropped;
        }

        let payload = match serde_json::to_string(envelope) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to serialize {} event: {}", envelope.event_type(), e);
                return Delivery::Dropped;
            }
        };

        let mut sink = self.sink.lock().await;
        match sink.send_text(payload).await {
            Ok(()) => {
                debug!(event_type = envelope.event_type(), "Event sent");
                Delivery::Sent
            }
            Err(e) => {
                warn!(
                    event_type = envelope.event_type(),
                    "Message not sent: {}", e
                );
                Delivery::Dropped
            }
        }
    }

    /// Register a pending reply. It is deregistered when the returned guard
    /// is dropped, whatever the outcome.
    pub fn register_reply(self: &Arc<Self>, matcher: ReplyMatcher) -> PendingReply {
        let id = self.next_waiter_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().push(Waiter { id, matcher, tx });
        PendingReply {
            id,
            rx,
            channel: Arc::clone(self),
        }
    }

    /// Complete every pending reply matching `event`
    pub(crate) fn resolve(&self, event: &InboundEvent) -> usize {
        let matched: Vec<Waiter> = {
            let mut waiters = self.waiters.lock();
            let (matched, rest): (Vec<Waiter>, Vec<Waiter>) = waiters
                .drain(..)
                .partition(|waiter| waiter.matcher.matches(event));
            *waiters = rest;
            matched
        };

        let count = matched.len();
        for waiter in matched {
            let _ = waiter.tx.send(Ok(event.clone()));
        }
        count
    }

    /// Fail every pending reply
    pub(crate) fn fail_pending(&self, make_error: impl Fn() -> ClientError) {
        let waiters: Vec<Waiter> = self.waiters.lock().drain(..).collect();
        for waiter in waiters {
            let _ = waiter.tx.send(Err(make_error()));
        }
    }

    /// Number of replies currently awaited
    pub fn pending_replies(&self) -> usize {
        self.waiters.lock().len()
    }

    fn forget(&self, id: u64) {
        self.waiters.lock().retain(|waiter| waiter.id != id);
    }

    /// Stop accepting writes, fail pending replies and close the sink
    pub(crate) async fn shutdown(&self, reason: &str) {
        self.mark_closed();
        self.fail_pending(|| ClientError::State(reason.to_string()));
        if let Err(e) = self.sink.lock().await.close().await {
            debug!("Closing transport: {}", e);
        }
    }
}

/// A registered wait for one inbound reply
pub struct PendingReply {
    id: u64,
    rx: oneshot::Receiver<Result<InboundEvent>>,
    channel: Arc<Channel>,
}

impl PendingReply {
    /// Wait for the reply for at most `window`
    pub async fn wait(mut self, operation: &'static str, window: Duration) -> Result<InboundEvent> {
        match tokio::time::timeout(window, &mut self.rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(ClientError::State(format!(
                "{} abandoned: channel shut down",
                operation
            ))),
            Err(_) => Err(ClientError::timeout(operation, window)),
        }
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        self.channel.forget(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{memory, Connector};
    use serde_json::{json, Value};

    async fn open_channel() -> (Arc<Channel>, memory::MemoryRemote) {
        let (connector, remote) = memory::pair();
        let transport = connector.open("mem://test").await.unwrap();
        (Arc::new(Channel::new(transport.sink)), remote)
    }

    fn inbound(event_type: &str, payload: Value) -> InboundEvent {
        let raw = json!({"event": {"event_type": event_type, "event_payload": payload}});
        InboundEvent::parse(&raw.to_string()).unwrap()
    }

    #[test]
    fn test_matcher_scoping() {
        let any = ReplyMatcher::event("transcript");
        let scoped = ReplyMatcher::scoped("transcript", "c1");

        let for_c1 = inbound("transcript", json!({"conversation_id": "c1"}));
        let for_c2 = inbound("transcript", json!({"conversation_id": "c2"}));
        let other = inbound("bot_message", json!({"conversation_id": "c1"}));

        assert!(any.matches(&for_c1) && any.matches(&for_c2));
        assert!(scoped.matches(&for_c1));
        assert!(!scoped.matches(&for_c2));
        assert!(!scoped.matches(&other));
    }

    #[tokio::test]
    async fn test_send_writes_envelope() {
        let (channel, mut remote) = open_channel().await;
        let envelope = OutboundEnvelope::conversation_start("u1", json!({}), json!({}));

        assert_eq!(channel.send(&envelope).await, Delivery::Sent);
        let frame = remote.next_outbound().await.unwrap();
        assert_eq!(frame["action"], json!("sendMessage"));
        assert_eq!(frame["event"]["event_type"], json!("conversation_start"));
    }

    #[tokio::test]
    async fn test_send_on_closed_channel_is_dropped() {
        let (channel, mut remote) = open_channel().await;
        channel.mark_closed();

        let envelope = OutboundEnvelope::conversation_start("u1", json!({}), json!({}));
        assert_eq!(channel.send(&envelope).await, Delivery::Dropped);
        assert_eq!(remote.try_next_outbound(), None);
    }

    #[tokio::test]
    async fn test_send_failure_is_dropped_not_error() {
        let (channel, remote) = open_channel().await;
        remote.hang_up();

        let envelope = OutboundEnvelope::conversation_start("u1", json!({}), json!({}));
        assert!(!channel.send(&envelope).await.is_sent());
    }

    #[tokio::test]
    async fn test_resolve_completes_and_deregisters() {
        let (channel, _remote) = open_channel().await;
        let pending = channel.register_reply(ReplyMatcher::event("conversation_start_success"));
        assert_eq!(channel.pending_replies(), 1);

        let unrelated = inbound("bot_message", json!({}));
        assert_eq!(channel.resolve(&unrelated), 0);

        let reply = inbound("conversation_start_success", json!({"conversation_id": "c1"}));
        assert_eq!(channel.resolve(&reply), 1);
        assert_eq!(channel.pending_replies(), 0);

        let event = pending
            .wait("createConversation", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(event.conversation_id(), Some("c1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out_and_deregisters() {
        let (channel, _remote) = open_channel().await;
        let pending = channel.register_reply(ReplyMatcher::event("socket_connected"));

        let err = pending
            .wait("connect", Duration::from_secs(10))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(channel.pending_replies(), 0);
    }

    #[tokio::test]
    async fn test_dropping_pending_reply_deregisters() {
        let (channel, _remote) = open_channel().await;
        let first = channel.register_reply(ReplyMatcher::event("a"));
        let _second = channel.register_reply(ReplyMatcher::event("b"));
        assert_eq!(channel.pending_replies(), 2);

        drop(first);
        assert_eq!(channel.pending_replies(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_fails_pending_with_state_error() {
        let (channel, remote) = open_channel().await;
        let pending = channel.register_reply(ReplyMatcher::event("transcript"));

        channel.shutdown("session closed").await;

        assert!(!channel.is_open());
        assert!(remote.is_closed());
        let err = pending
            .wait("getTranscript", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::State(msg) if msg == "session closed"));
    }
}
