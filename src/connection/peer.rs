//! Peer Connection Abstraktion
//!
//! Die eigentliche Peer Connection ist eine Plattform-Anbindung. Der Manager
//! spricht sie nur über [`PeerHandle`] an und erhält Rückmeldungen
//! (lokale Candidates, Statuswechsel, Tracks) über einen [`PeerSignalSender`].

use crate::media::MediaTrack;
use crate::signaling::{ConnectionError, IceCandidate, SessionDescription};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

// ============================================================================
// PEER STATE
// ============================================================================

/// Status einer einzelnen Peer Connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Rückmeldungen einer Peer Connection an den Manager
#[derive(Debug, Clone)]
pub enum PeerSignal {
    /// Lokal gefundener ICE Candidate
    LocalCandidate(IceCandidate),
    /// Verbindungsstatus geändert
    StateChanged(PeerState),
    /// ICE-Verbindung ist gescheitert
    IceFailed,
    /// Remote Track empfangen
    TrackAdded(MediaTrack),
    /// Remote Track entfernt
    TrackRemoved(String),
}

#[derive(Debug)]
pub(crate) struct PeerEnvelope {
    pub peer_id: String,
    pub generation: u64,
    pub signal: PeerSignal,
}

/// Sender für Rückmeldungen, an eine Peer Connection gebunden
#[derive(Debug, Clone)]
pub struct PeerSignalSender {
    peer_id: String,
    generation: u64,
    tx: mpsc::UnboundedSender<PeerEnvelope>,
}

impl PeerSignalSender {
    pub(crate) fn new(
        peer_id: String,
        generation: u64,
        tx: mpsc::UnboundedSender<PeerEnvelope>,
    ) -> Self {
        Self {
            peer_id,
            generation,
            tx,
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Meldet ein Signal. Nach dem Schließen des Managers wird es verworfen.
    pub fn send(&self, signal: PeerSignal) {
        let _ = self.tx.send(PeerEnvelope {
            peer_id: self.peer_id.clone(),
            generation: self.generation,
            signal,
        });
    }
}

// ============================================================================
// PLATFORM BINDING
// ============================================================================

/// Eine Peer Connection (exklusiv im Besitz des ConnectionManagers)
#[async_trait]
pub trait PeerHandle: Send + Sync {
    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription, ConnectionError>;

    async fn create_answer(&self) -> Result<SessionDescription, ConnectionError>;

    async fn set_local_description(&self, desc: SessionDescription)
        -> Result<(), ConnectionError>;

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), ConnectionError>;

    /// Verwirft das eigene, noch unbeantwortete Offer
    async fn rollback(&self) -> Result<(), ConnectionError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), ConnectionError>;

    async fn add_track(&self, track: &MediaTrack) -> Result<(), ConnectionError>;

    /// Tauscht den gesendeten Track gleicher Art ohne Neuverhandlung
    async fn replace_track(&self, track: &MediaTrack) -> Result<(), ConnectionError>;

    async fn close(&self);
}

/// Erzeugt Peer Connections
#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn create(
        &self,
        peer_id: &str,
        signals: PeerSignalSender,
    ) -> Result<Arc<dyn PeerHandle>, ConnectionError>;
}
