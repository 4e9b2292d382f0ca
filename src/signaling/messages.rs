//! Message Types für das Signaling-Protokoll
//!
//! Wire-Format: `{ type, roomId?, peerId?, data?, error? }`.
//! Ausgehend ist `peerId` der Ziel-Peer, eingehend der Absender.

use super::error::SignalingError;
use serde::{Deserialize, Serialize};

// ============================================================================
// SESSION DESCRIPTION / ICE
// ============================================================================

/// Art einer Session Description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// SDP Offer/Answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }

    pub fn rollback() -> Self {
        Self {
            sdp_type: SdpType::Rollback,
            sdp: String::new(),
        }
    }
}

/// ICE Candidate im Browser-kompatiblen Format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_m_line_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
            username_fragment: None,
        }
    }
}

/// Teilnehmerliste in `room-joined`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomMembers {
    #[serde(default)]
    pub peers: Vec<String>,
}

// ============================================================================
// SIGNALING MESSAGE
// ============================================================================

/// Alle Signaling-Nachrichten (beide Richtungen)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalingMessage {
    /// SDP Offer
    #[serde(rename_all = "camelCase")]
    Offer {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_id: Option<String>,
        peer_id: String,
        data: SessionDescription,
    },

    /// SDP Answer
    #[serde(rename_all = "camelCase")]
    Answer {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_id: Option<String>,
        peer_id: String,
        data: SessionDescription,
    },

    /// Trickle ICE Candidate
    #[serde(rename_all = "camelCase")]
    IceCandidate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_id: Option<String>,
        peer_id: String,
        data: IceCandidate,
    },

    /// Client → Server: Raum betreten
    #[serde(rename_all = "camelCase")]
    JoinRoom { room_id: String, peer_id: String },

    /// Client → Server: Raum verlassen
    #[serde(rename_all = "camelCase")]
    LeaveRoom { room_id: String, peer_id: String },

    /// Server → Client: Fehler
    #[serde(rename_all = "camelCase")]
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        peer_id: Option<String>,
        error: String,
    },

    /// Server → Client: Raum betreten, mit anwesenden Peers
    #[serde(rename_all = "camelCase")]
    RoomJoined {
        room_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        peer_id: Option<String>,
        #[serde(default)]
        data: RoomMembers,
    },

    /// Server → Client: Raum verlassen
    #[serde(rename_all = "camelCase")]
    RoomLeft {
        room_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        peer_id: Option<String>,
    },

    /// Server → Client: Peer hat den Raum betreten
    #[serde(rename_all = "camelCase")]
    PeerJoined {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_id: Option<String>,
        peer_id: String,
    },

    /// Server → Client: Peer hat den Raum verlassen
    #[serde(rename_all = "camelCase")]
    PeerLeft {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_id: Option<String>,
        peer_id: String,
    },

    /// Unbekannter `type` (Vorwärtskompatibilität, wird ignoriert)
    #[serde(other)]
    Unknown,
}

impl SignalingMessage {
    /// Wert des `type`-Felds
    pub fn type_name(&self) -> &'static str {
        match self {
            SignalingMessage::Offer { .. } => "offer",
            SignalingMessage::Answer { .. } => "answer",
            SignalingMessage::IceCandidate { .. } => "ice-candidate",
            SignalingMessage::JoinRoom { .. } => "join-room",
            SignalingMessage::LeaveRoom { .. } => "leave-room",
            SignalingMessage::Error { .. } => "error",
            SignalingMessage::RoomJoined { .. } => "room-joined",
            SignalingMessage::RoomLeft { .. } => "room-left",
            SignalingMessage::PeerJoined { .. } => "peer-joined",
            SignalingMessage::PeerLeft { .. } => "peer-left",
            SignalingMessage::Unknown => "unknown",
        }
    }

    /// Peer, auf den sich die Nachricht bezieht
    pub fn peer_id(&self) -> Option<&str> {
        match self {
            SignalingMessage::Offer { peer_id, .. }
            | SignalingMessage::Answer { peer_id, .. }
            | SignalingMessage::IceCandidate { peer_id, .. }
            | SignalingMessage::JoinRoom { peer_id, .. }
            | SignalingMessage::LeaveRoom { peer_id, .. }
            | SignalingMessage::PeerJoined { peer_id, .. }
            | SignalingMessage::PeerLeft { peer_id, .. } => Some(peer_id),
            SignalingMessage::Error { peer_id, .. }
            | SignalingMessage::RoomJoined { peer_id, .. }
            | SignalingMessage::RoomLeft { peer_id, .. } => peer_id.as_deref(),
            SignalingMessage::Unknown => None,
        }
    }

    pub fn to_json(&self) -> Result<String, SignalingError> {
        serde_json::to_string(self).map_err(|e| SignalingError::Encode(e.to_string()))
    }

    pub fn from_json(text: &str) -> Result<Self, SignalingError> {
        serde_json::from_str(text).map_err(|e| SignalingError::Malformed(e.to_string()))
    }
}

// ============================================================================
// TESTS
// ============================================================================
