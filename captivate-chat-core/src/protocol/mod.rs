//! Wire protocol for the chat channel
//!
//! Every transport frame is one JSON envelope. Outbound frames wrap the event
//! in a `sendMessage` action; inbound frames carry the event alone. Events are
//! tagged by `event_type` and scoped to a conversation through the
//! `conversation_id` field of their payload.

pub mod events;

pub use events::{
    tags, Event, InboundEnvelope, InboundEvent, OutboundEnvelope, SEND_MESSAGE_ACTION,
};
