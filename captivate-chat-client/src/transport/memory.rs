//! In-process transport
//!
//! [`pair`] returns a connector for the session and a [`MemoryRemote`] that
//! plays the service: it pushes inbound frames and observes outbound ones.
//! Frames pushed before the session connects are buffered and delivered once
//! the transport opens.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::{Connector, TransportEvent, TransportPair, TransportSink};
use crate::error::{ClientError, Result};

struct Slot {
    events: mpsc::UnboundedReceiver<TransportEvent>,
    outbound_tx: mpsc::UnboundedSender<String>,
}

/// Connector side of an in-process transport; opens at most once
pub struct MemoryConnector {
    slot: Mutex<Option<Slot>>,
    opened_urls: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
    refusal: Option<String>,
}

/// Service side of an in-process transport
pub struct MemoryRemote {
    inbound_tx: mpsc::UnboundedSender<TransportEvent>,
    outbound_rx: mpsc::UnboundedReceiver<String>,
    opened_urls: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

/// Create a connected connector/remote pair
pub fn pair() -> (MemoryConnector, MemoryRemote) {
    let (inbound_tx, events) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let opened_urls = Arc::new(Mutex::new(Vec::new()));
    let closed = Arc::new(AtomicBool::new(false));

    let connector = MemoryConnector {
        slot: Mutex::new(Some(Slot {
            events,
            outbound_tx,
        })),
        opened_urls: Arc::clone(&opened_urls),
        closed: Arc::clone(&closed),
        refusal: None,
    };
    let remote = MemoryRemote {
        inbound_tx,
        outbound_rx,
        opened_urls,
        closed,
    };
    (connector, remote)
}

impl MemoryConnector {
    /// A connector whose `open` always fails with `reason`
    pub fn refusing(reason: impl Into<String>) -> Self {
        Self {
            slot: Mutex::new(None),
            opened_urls: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
            refusal: Some(reason.into()),
        }
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn open(&self, url: &str) -> Result<TransportPair> {
        if let Some(reason) = &self.refusal {
            return Err(ClientError::Transport(reason.clone()));
        }

        let slot = self
            .slot
            .lock()
            .take()
            .ok_or_else(|| ClientError::Transport("memory transport already opened".to_string()))?;
        self.opened_urls.lock().push(url.to_string());

        Ok(TransportPair {
            sink: Box::new(MemorySink {
                outbound_tx: slot.outbound_tx,
                closed: Arc::clone(&self.closed),
            }),
            events: slot.events,
        })
    }
}

struct MemorySink {
    outbound_tx: mpsc::UnboundedSender<String>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl TransportSink for MemorySink {
    async fn send_text(&mut self, text: String) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::Transport("memory transport closed".to_string()));
        }
        self.outbound_tx
            .send(text)
            .map_err(|_| ClientError::Transport("memory remote dropped".to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

impl MemoryRemote {
    /// Push one raw text frame
    pub fn push_raw(&self, raw: impl Into<String>) {
        let _ = self.inbound_tx.send(TransportEvent::Text(raw.into()));
    }

    /// Push one JSON frame
    pub fn push(&self, frame: Value) {
        self.push_raw(frame.to_string());
    }

    /// Push an inbound envelope `{"event": {"event_type", "event_payload"}}`
    pub fn push_event(&self, event_type: &str, payload: Value) {
        self.push(json!({
            "event": {
                "event_type": event_type,
                "event_payload": payload,
            }
        }));
    }

    /// Report a transport error to the session
    pub fn fail(&self, message: impl Into<String>) {
        let _ = self.inbound_tx.send(TransportEvent::Error(message.into()));
    }

    /// Close the connection from the service side
    pub fn hang_up(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let _ = self.inbound_tx.send(TransportEvent::Closed);
    }

    /// Wait for the next outbound frame, parsed as JSON
    pub async fn next_outbound(&mut self) -> Option<Value> {
        self.outbound_rx.recv().await.map(|raw| parse_frame(&raw))
    }

    /// Take the next outbound frame if one is already queued
    pub fn try_next_outbound(&mut self) -> Option<Value> {
        self.outbound_rx.try_recv().ok().map(|raw| parse_frame(&raw))
    }

    /// URLs the connector was opened with
    pub fn opened_urls(&self) -> Vec<String> {
        self.opened_urls.lock().clone()
    }

    /// Whether either side closed the transport
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

fn parse_frame(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
