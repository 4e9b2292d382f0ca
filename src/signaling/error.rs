//! Fehler-Typen für Transport und Signaling

use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Fehlerhafte oder unerwartete Signaling-Nachrichten
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignalingError {
    #[error("Malformed signaling message: {0}")]
    Malformed(String),

    #[error("Failed to encode signaling message: {0}")]
    Encode(String),

    #[error("Unexpected signaling message: {0}")]
    Unexpected(String),

    #[error("Signaling server error: {0}")]
    Server(String),
}

/// Transport-, Signaling- und Verhandlungsfehler
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("Invalid signaling URL: {0}")]
    InvalidUrl(String),

    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    #[error("Not connected to signaling server")]
    NotConnected,

    #[error("Failed to send message: {0}")]
    SendFailed(String),

    #[error("Connection attempt cancelled")]
    Cancelled,

    #[error("Not in a room")]
    NotInRoom,

    #[error("No peer connection for {0}")]
    PeerNotFound(String),

    #[error("Negotiation with {peer_id} failed: {message}")]
    Negotiation { peer_id: String, message: String },

    #[error(transparent)]
    Signaling(#[from] SignalingError),
}

impl ConnectionError {
    /// Verhandlungsfehler für einen Peer
    pub fn negotiation(peer_id: &str, err: impl std::fmt::Display) -> Self {
        ConnectionError::Negotiation {
            peer_id: peer_id.to_string(),
            message: err.to_string(),
        }
    }
}
