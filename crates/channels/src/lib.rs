//! Boundary to the external chat-protocol library.
//!
//! The gateway never talks to the network directly: a [`ClientFactory`]
//! builds one [`ProtocolClient`] per tenant session, and the client pushes
//! every inbound event into the [`EventSink`] it was created with.

pub mod error;
pub mod event;
pub mod message;
pub mod plugin;

pub use {
    error::ProtocolError,
    event::{EventSink, EventStream, ProtocolEvent, event_channel},
    message::{
        ChatPresence, MediaKind, MediaRef, MessageBody, OutgoingMessage, Presence, SendReceipt,
        UserCheck,
    },
    plugin::{ClientFactory, ConnectOutcome, ProtocolClient},
};
