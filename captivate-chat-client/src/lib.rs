//! Client for the Captivate chat service
//!
//! A [`Session`] owns one duplex connection and multiplexes any number of
//! [`Conversation`]s over it. Inbound events are routed to the conversation
//! named in their payload; request/reply exchanges wait on a bounded window.

pub mod channel;
pub mod conversation;
mod dispatch;
pub mod error;
pub mod listeners;
pub mod session;
pub mod transport;

pub use captivate_chat_core::config::EndpointMode;
pub use channel::{Delivery, ReplyMatcher};
pub use conversation::{Conversation, MessageOrigin, StartMode, Subscription, TranscriptRecord};
pub use error::{ClientError, Result};
pub use listeners::Listener;
pub use session::Session;
pub use transport::{
    Connector, MemoryConnector, MemoryRemote, TransportEvent, TransportPair, TransportSink,
    WebSocketConnector,
};
