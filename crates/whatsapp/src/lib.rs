//! WhatsApp access through a protocol sidecar.
//!
//! The sidecar owns the wire protocol (noise handshake, multi-device sync,
//! media encryption). Each tenant session opens one WebSocket to
//! `{base}/sessions/{tenant}`; requests are correlated by id and inbound
//! protocol events are pushed as unsolicited frames.

pub mod client;
pub mod frames;

pub use client::{BridgeClient, BridgeFactory};
