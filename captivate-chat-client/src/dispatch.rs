//! Inbound dispatch loop
//!
//! One task per connected session drains the transport's event queue. Each
//! frame first completes matching pending replies, then is routed to the
//! conversation named by its payload. Listeners run on this task, one event
//! at a time; the socket itself is read by the transport's own task, so a
//! slow listener delays dispatch but never reads off the wire.

use captivate_chat_core::protocol::InboundEvent;
use captivate_chat_core::utils::truncate;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::channel::Channel;
use crate::conversation::ConversationTable;
use crate::error::ClientError;
use crate::transport::TransportEvent;

/// Drain `events` until the transport closes or fails
pub(crate) async fn run(
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    channel: Arc<Channel>,
    conversations: Arc<ConversationTable>,
) {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Text(raw) => route_frame(&raw, &channel, &conversations),
            TransportEvent::Error(message) => {
                error!("WebSocket Error: {}", message);
                channel.mark_closed();
                channel.fail_pending(|| ClientError::Transport(message.clone()));
                break;
            }
            TransportEvent::Closed => {
                info!("WebSocket connection closed");
                channel.mark_closed();
                channel.fail_pending(|| {
                    ClientError::Transport("connection closed by remote".to_string())
                });
                break;
            }
        }
    }
    debug!("Dispatch loop ended");
}

/// Handle one inbound text frame
pub(crate) fn route_frame(raw: &str, channel: &Channel, conversations: &ConversationTable) {
    let event = match InboundEvent::parse(raw) {
        Ok(event) => event,
        Err(e) => {
            warn!("Error parsing message: {} (raw: {})", e, truncate(raw, 100));
            return;
        }
    };

    let resolved = channel.resolve(&event);
    if resolved > 0 {
        debug!(
            event_type = event.event_type(),
            resolved, "Completed pending replies"
        );
    }

    let Some(conversation_id) = event.conversation_id() else {
        return;
    };
    match conversations.get(conversation_id) {
        Some(conversation) => {
            let fired = conversation.dispatch(&event);
            debug!(
                conversation_id,
                event_type = event.event_type(),
                fired,
                "Routed event"
            );
        }
        None => debug!(
            conversation_id,
            event_type = event.event_type(),
            "No conversation registered for event"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ReplyMatcher;
    use crate::conversation::Conversation;
    use crate::transport::{memory, Connector};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::time::Duration;

    async fn setup() -> (Arc<Channel>, Arc<ConversationTable>, memory::MemoryRemote) {
        let (connector, remote) = memory::pair();
        let transport = connector.open("mem://test").await.unwrap();
        (
            Arc::new(Channel::new(transport.sink)),
            Arc::new(ConversationTable::default()),
            remote,
        )
    }

    fn register(
        table: &ConversationTable,
        channel: &Arc<Channel>,
        id: &str,
    ) -> (Conversation, Arc<Mutex<Vec<String>>>) {
        let conv = table.get_or_insert_with(id, || {
            Conversation::new(id, Arc::clone(channel), Duration::from_secs(10))
        });
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        conv.on_message(move |content, _| sink.lock().push(content.to_string()));
        (conv, seen)
    }

    #[tokio::test]
    async fn test_routes_only_to_matching_conversation() {
        let (channel, table, _remote) = setup().await;
        let (_a, seen_a) = register(&table, &channel, "a");
        let (_b, seen_b) = register(&table, &channel, "b");

        let raw = json!({"event": {"event_type": "bot_message",
            "event_payload": {"conversation_id": "b", "content": "for b"}}});
        route_frame(&raw.to_string(), &channel, &table);

        assert!(seen_a.lock().is_empty());
        assert_eq!(*seen_b.lock(), vec!["for b"]);
    }

    #[tokio::test]
    async fn test_malformed_and_unscoped_frames_are_skipped() {
        let (channel, table, _remote) = setup().await;
        let (_a, seen_a) = register(&table, &channel, "a");
        let pending = channel.register_reply(ReplyMatcher::event("socket_connected"));

        route_frame("{not json", &channel, &table);
        route_frame(r#"{"unexpected":true}"#, &channel, &table);
        route_frame(
            r#"{"event":{"event_type":"bot_message","event_payload":{"content":"nobody"}}}"#,
            &channel,
            &table,
        );
        route_frame(
            r#"{"event":{"event_type":"bot_message","event_payload":{"conversation_id":"zzz","content":"?"}}}"#,
            &channel,
            &table,
        );

        assert!(seen_a.lock().is_empty());
        assert_eq!(channel.pending_replies(), 1);
        drop(pending);
    }

    #[tokio::test]
    async fn test_run_completes_pending_then_fails_rest_on_error() {
        let (channel, table, _remote) = setup().await;
        let (tx, rx) = mpsc::unbounded_channel();
        let handshake = channel.register_reply(ReplyMatcher::event("socket_connected"));
        let later = channel.register_reply(ReplyMatcher::event("conversation_start_success"));

        tx.send(TransportEvent::Text(
            r#"{"event":{"event_type":"socket_connected"}}"#.to_string(),
        ))
        .unwrap();
        tx.send(TransportEvent::Error("reset by peer".to_string()))
            .unwrap();
        run(rx, Arc::clone(&channel), table).await;

        assert!(handshake
            .wait("connect", Duration::from_secs(1))
            .await
            .is_ok());
        let err = later
            .wait("createConversation", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Transport(msg) if msg == "reset by peer"));
        assert!(!channel.is_open());
    }

    #[tokio::test]
    async fn test_panicking_listener_does_not_stop_dispatch() {
        let (channel, table, _remote) = setup().await;
        let failing = table.get_or_insert_with("a", || {
            Conversation::new("a", Arc::clone(&channel), Duration::from_secs(10))
        });
        failing.on_message(|_, _| panic!("listener failure"));
        let (_b, seen_b) = register(&table, &channel, "b");
        let pending = channel.register_reply(ReplyMatcher::scoped("transcript", "b"));

        let (tx, rx) = mpsc::unbounded_channel();
        for (id, content) in [("a", "boom"), ("b", "first"), ("a", "boom again"), ("b", "second")] {
            let raw = json!({"event": {"event_type": "bot_message",
                "event_payload": {"conversation_id": id, "content": content}}});
            tx.send(TransportEvent::Text(raw.to_string())).unwrap();
        }
        tx.send(TransportEvent::Text(
            json!({"event": {"event_type": "transcript",
                "event_payload": {"conversation_id": "b", "transcript": []}}})
            .to_string(),
        ))
        .unwrap();
        drop(tx);

        run(rx, Arc::clone(&channel), Arc::clone(&table)).await;

        assert_eq!(*seen_b.lock(), vec!["first", "second"]);
        assert!(pending
            .wait("getTranscript", Duration::from_secs(1))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_run_stops_on_close() {
        let (channel, table, _remote) = setup().await;
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(TransportEvent::Closed).unwrap();
        tx.send(TransportEvent::Text("ignored".to_string())).unwrap();

        run(rx, Arc::clone(&channel), table).await;
        assert!(!channel.is_open());
    }
}
