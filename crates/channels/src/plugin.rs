use std::sync::Arc;

use {async_trait::async_trait, wagate_common::TenantId};

use crate::{
    error::ProtocolError,
    event::EventSink,
    message::{ChatPresence, MediaRef, OutgoingMessage, Presence, SendReceipt, UserCheck},
};

/// Result of a successful `connect`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectOutcome {
    /// Session id when the client is already paired. A fresh pairing reports
    /// its id later through a `PairSuccess` event instead.
    pub session_id: Option<String>,
}

/// A live connection to the protocol network for one tenant.
///
/// Owned by the session manager; data-plane callers borrow it through
/// `SessionManager::live_handle` and must not keep it past a stop.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    /// Establish or resume the connection. Returns once the network accepted
    /// the session, or pairing has started for an unpaired account.
    async fn connect(&self) -> Result<ConnectOutcome, ProtocolError>;

    /// Close the connection, keeping the pairing for a later `connect`.
    async fn disconnect(&self) -> Result<(), ProtocolError>;

    /// Unlink this device from the account.
    async fn logout(&self) -> Result<(), ProtocolError>;

    /// Currently paired session id, if any.
    fn session_id(&self) -> Option<String>;

    async fn send_message(&self, message: OutgoingMessage) -> Result<SendReceipt, ProtocolError>;

    async fn set_presence(&self, presence: Presence) -> Result<(), ProtocolError>;

    async fn send_chat_presence(
        &self,
        chat: &str,
        presence: ChatPresence,
    ) -> Result<(), ProtocolError>;

    async fn mark_read(
        &self,
        chat: &str,
        sender: Option<&str>,
        message_ids: &[String],
    ) -> Result<(), ProtocolError>;

    async fn check_users(&self, phones: &[String]) -> Result<Vec<UserCheck>, ProtocolError>;

    async fn download_media(&self, media: &MediaRef) -> Result<Vec<u8>, ProtocolError>;

    /// Request a phone-number pairing code as an alternative to the QR flow.
    async fn pair_phone(&self, phone: &str) -> Result<String, ProtocolError>;
}

/// Builds protocol clients. One call per session start.
pub trait ClientFactory: Send + Sync {
    fn new_client(
        &self,
        tenant: TenantId,
        session_id: Option<String>,
        events: EventSink,
    ) -> Result<Arc<dyn ProtocolClient>, ProtocolError>;
}
