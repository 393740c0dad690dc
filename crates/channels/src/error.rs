#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("pairing failed: {0}")]
    PairingFailed(String),
    #[error("timed out waiting for the protocol network")]
    Timeout,
    #[error("connection lost: {0}")]
    ConnectionLost(String),
    #[error("client is not connected")]
    NotConnected,
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("transport error: {0}")]
    Transport(String),
}
