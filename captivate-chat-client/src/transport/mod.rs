//! Duplex transport abstraction
//!
//! A [`Connector`] opens the wire and hands back a [`TransportPair`]: a sink
//! for outbound text frames and a queue of inbound [`TransportEvent`]s. The
//! session layer never knows which implementation it is driving.

pub mod memory;
pub mod websocket;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;

pub use memory::{MemoryConnector, MemoryRemote};
pub use websocket::WebSocketConnector;

/// Something that happened on the inbound side of the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One text frame
    Text(String),
    /// The remote closed the connection
    Closed,
    /// The transport failed
    Error(String),
}

/// Outbound half of an open transport
#[async_trait]
pub trait TransportSink: Send {
    /// Write one text frame
    async fn send_text(&mut self, text: String) -> Result<()>;

    /// Close the connection
    async fn close(&mut self) -> Result<()>;
}

/// An open transport
pub struct TransportPair {
    pub sink: Box<dyn TransportSink>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Factory capability that opens transports
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection to `url`
    async fn open(&self, url: &str) -> Result<TransportPair>;
}
