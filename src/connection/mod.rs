//! Connection Module - Peer Connections und Verhandlung
//!
//! Dieses Modul verwaltet:
//! - Globalen Verbindungsstatus (Signaling)
//! - Eine Peer Connection pro Peer im Raum
//! - SDP/ICE Austausch inkl. Glare-Auflösung und Candidate-Puffer
//! - Die WebRTC-Anbindung (webrtc crate)

mod manager;
mod peer;
mod webrtc_peer;

pub use crate::signaling::ConnectionError;
pub use manager::{
    ConnectionManager, ConnectionSettings, ConnectionState, ReconnectPolicy,
    WeakConnectionManager,
};
pub use peer::{PeerConnector, PeerHandle, PeerSignal, PeerSignalSender, PeerState};
pub use webrtc_peer::{default_ice_servers, IceServerConfig, WebRtcConnector};
