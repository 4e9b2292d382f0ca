//! Connection Manager
//!
//! Besitzt alle Peer Connections eines Raums und treibt die SDP/ICE
//! Verhandlung über den SignalingClient:
//! - Wer den Raum betritt, erzeugt die Offers
//! - ICE Candidates werden sofort gesendet (Trickle)
//! - Eingehende Candidates vor der Remote Description werden gepuffert
//! - Glare: die lexikographisch kleinere Peer-ID gibt nach
//! - Offers, Antworten und Rollbacks eines Peers laufen nacheinander
//! - Verlassene Peers bleiben bis zum nächsten Raum geschlossen
//!
//! Alle eingehenden Nachrichten laufen über genau einen Task, dadurch bleibt
//! die Ankunftsreihenfolge pro Peer erhalten.

use super::peer::{PeerConnector, PeerEnvelope, PeerHandle, PeerSignal, PeerSignalSender, PeerState};
use crate::events::{ErrorSource, RtcEvent, RtcEventBus};
use crate::media::{MediaStream, MediaTrack, StreamManager};
use crate::signaling::{
    ConnectionError, IceCandidate, SessionDescription, SignalingClient, SignalingEvent,
    SignalingMessage,
};
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

// ============================================================================
// STATE & SETTINGS
// ============================================================================

/// Globaler Verbindungsstatus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

/// Backoff für die automatische Wiederverbindung des Signaling-Kanals
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
        }
    }
}

impl ReconnectPolicy {
    /// Wartezeit vor Versuch `attempt` (0-basiert), exponentiell mit Jitter
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay_ms
            .saturating_mul(1u64 << attempt.min(16))
            .min(self.max_delay_ms);
        let jitter = if exp >= 4 {
            rand::thread_rng().gen_range(0..=exp / 4)
        } else {
            0
        };
        Duration::from_millis(exp.saturating_add(jitter).min(self.max_delay_ms))
    }
}

/// Einstellungen des ConnectionManagers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Anzahl ICE-Restarts bevor ein Peer als gescheitert gilt
    pub ice_retry_budget: u32,
    /// Beim Betreten eines Raums automatisch Offers an anwesende Peers senden
    pub offer_on_join: bool,
    pub reconnect: ReconnectPolicy,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            ice_retry_budget: 3,
            offer_on_join: true,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

// ============================================================================
// INTERNAL STATE
// ============================================================================

struct PeerEntry {
    handle: Arc<dyn PeerHandle>,
    /// Eindeutig pro erzeugter Verbindung; laufende Awaits prüfen sie danach
    generation: u64,
    state: PeerState,
    remote_description_set: bool,
    pending_candidates: Vec<IceCandidate>,
    /// Die Peer Connection steht in have-local-offer
    have_local_offer: bool,
    /// Hält jeweils ein Offer bzw. eine eingehende Beschreibung
    negotiation: Arc<tokio::sync::Mutex<()>>,
    ice_restarts: u32,
}

struct Shared {
    state: ConnectionState,
    room_id: Option<String>,
    local_peer_id: Option<String>,
    peers: HashMap<String, PeerEntry>,
    /// Im aktuellen Raum geschlossene oder gegangene Peers
    departed: HashSet<String>,
    /// Candidates von Peers ohne Verbindung, bis Offer oder Join sie übernimmt
    early_candidates: HashMap<String, Vec<IceCandidate>>,
    local_stream: Option<MediaStream>,
    next_generation: u64,
}

type PumpChannels = (
    mpsc::UnboundedReceiver<SignalingEvent>,
    mpsc::UnboundedReceiver<PeerEnvelope>,
);

struct Inner {
    signaling: SignalingClient,
    connector: Arc<dyn PeerConnector>,
    streams: StreamManager,
    bus: RtcEventBus,
    settings: ConnectionSettings,
    shared: Mutex<Shared>,
    /// Wird von `disconnect` erhöht und bricht laufende Verbindungsversuche ab
    epoch: watch::Sender<u64>,
    peer_tx: mpsc::UnboundedSender<PeerEnvelope>,
    pump: Mutex<Option<PumpChannels>>,
}

enum PumpEvent {
    Signal(SignalingEvent),
    Peer(PeerEnvelope),
}

// ============================================================================
// CONNECTION MANAGER
// ============================================================================

/// Verwaltet Signaling-Verbindung und Peer Connections (billig klonbar)
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

/// Schwache Referenz, damit Media- und StreamManager keinen Zyklus bilden
#[derive(Clone, Default)]
pub struct WeakConnectionManager {
    inner: Weak<Inner>,
}

impl WeakConnectionManager {
    pub fn upgrade(&self) -> Option<ConnectionManager> {
        self.inner.upgrade().map(|inner| ConnectionManager { inner })
    }
}

impl std::fmt::Debug for WeakConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakConnectionManager")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

impl ConnectionManager {
    /// Erstellt einen neuen ConnectionManager und verbindet den StreamManager
    pub fn new(
        signaling: SignalingClient,
        connector: Arc<dyn PeerConnector>,
        streams: StreamManager,
        bus: RtcEventBus,
        settings: ConnectionSettings,
    ) -> Self {
        let signal_rx = signaling.subscribe();
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let (epoch, _) = watch::channel(0);

        let manager = Self {
            inner: Arc::new(Inner {
                signaling,
                connector,
                streams,
                bus,
                settings,
                shared: Mutex::new(Shared {
                    state: ConnectionState::Disconnected,
                    room_id: None,
                    local_peer_id: None,
                    peers: HashMap::new(),
                    departed: HashSet::new(),
                    early_candidates: HashMap::new(),
                    local_stream: None,
                    next_generation: 0,
                }),
                epoch,
                peer_tx,
                pump: Mutex::new(Some((signal_rx, peer_rx))),
            }),
        };

        manager.inner.streams.attach_connection(&manager);
        manager
    }

    pub fn downgrade(&self) -> WeakConnectionManager {
        WeakConnectionManager {
            inner: Arc::downgrade(&self.inner),
        }
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn state(&self) -> ConnectionState {
        self.inner.shared.lock().state
    }

    pub fn room_id(&self) -> Option<String> {
        self.inner.shared.lock().room_id.clone()
    }

    pub fn local_peer_id(&self) -> Option<String> {
        self.inner.shared.lock().local_peer_id.clone()
    }

    pub fn has_peer(&self, peer_id: &str) -> bool {
        self.inner.shared.lock().peers.contains_key(peer_id)
    }

    /// IDs aller Peers (sortiert)
    pub fn peer_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.shared.lock().peers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn peer_state(&self, peer_id: &str) -> Option<PeerState> {
        self.inner.shared.lock().peers.get(peer_id).map(|p| p.state)
    }

    pub fn signaling(&self) -> &SignalingClient {
        &self.inner.signaling
    }

    pub fn stream_manager(&self) -> &StreamManager {
        &self.inner.streams
    }

    // ------------------------------------------------------------------------
    // Signaling lifecycle
    // ------------------------------------------------------------------------

    /// Verbindet mit dem Signaling-Server
    ///
    /// Ein `disconnect` während des Aufbaus bricht ab und liefert
    /// [`ConnectionError::Cancelled`] ohne Error-Event.
    pub async fn connect(&self, url: &str) -> Result<(), ConnectionError> {
        self.ensure_pump();

        if self.state() == ConnectionState::Connected && self.inner.signaling.is_connected() {
            tracing::debug!("Already connected to signaling server");
            return Ok(());
        }

        let mut epoch_rx = self.inner.epoch.subscribe();
        let epoch = *epoch_rx.borrow_and_update();

        tracing::info!("Connecting to signaling server {}", url);
        self.set_state(ConnectionState::Connecting);

        let result = tokio::select! {
            result = self.inner.signaling.connect(url) => result,
            _ = epoch_rx.changed() => Err(ConnectionError::Cancelled),
        };

        // Abbruch nach erfolgreichem Aufbau
        let result = match result {
            Ok(()) if *self.inner.epoch.borrow() != epoch => {
                self.inner.signaling.disconnect().await;
                Err(ConnectionError::Cancelled)
            }
            other => other,
        };

        match result {
            Ok(()) => {
                self.set_state(ConnectionState::Connected);
                Ok(())
            }
            Err(ConnectionError::Cancelled) => {
                tracing::info!("Connection attempt to {} cancelled", url);
                Err(ConnectionError::Cancelled)
            }
            Err(e) => {
                tracing::error!("Signaling connection failed: {}", e);
                self.set_state(ConnectionState::Failed);
                self.emit_error(ErrorSource::Connection, &e);
                Err(e)
            }
        }
    }

    /// Trennt alle Verbindungen. Darf jederzeit aufgerufen werden.
    pub async fn disconnect(&self) {
        self.inner.epoch.send_modify(|e| *e += 1);

        let room = {
            let shared = self.inner.shared.lock();
            shared.room_id.clone().zip(shared.local_peer_id.clone())
        };
        if let Some((room_id, peer_id)) = room {
            if self.inner.signaling.is_connected() {
                let _ = self
                    .inner
                    .signaling
                    .send(&SignalingMessage::LeaveRoom { room_id, peer_id });
            }
        }

        self.close_all_peers().await;
        self.inner.shared.lock().room_id = None;
        self.inner.signaling.disconnect().await;
        self.inner.streams.clear();
        self.set_state(ConnectionState::Disconnected);

        tracing::info!("Disconnected");
    }

    // ------------------------------------------------------------------------
    // Rooms
    // ------------------------------------------------------------------------

    /// Betritt einen Raum; Peers werden bei `room-joined`/`peer-joined` angelegt
    pub async fn join_room(&self, room_id: &str, peer_id: &str) -> Result<(), ConnectionError> {
        {
            let mut shared = self.inner.shared.lock();
            shared.room_id = Some(room_id.to_string());
            shared.local_peer_id = Some(peer_id.to_string());
            shared.departed.clear();
            shared.early_candidates.clear();
        }

        let message = SignalingMessage::JoinRoom {
            room_id: room_id.to_string(),
            peer_id: peer_id.to_string(),
        };
        if let Err(e) = self.inner.signaling.send(&message) {
            self.inner.shared.lock().room_id = None;
            self.emit_error(ErrorSource::Connection, &e);
            return Err(e);
        }

        tracing::info!("Joining room {} as {}", room_id, peer_id);
        Ok(())
    }

    /// Verlässt den aktuellen Raum und schließt alle Peer Connections
    pub async fn leave_room(&self) -> Result<(), ConnectionError> {
        let (room_id, peer_id) = {
            let shared = self.inner.shared.lock();
            match (shared.room_id.clone(), shared.local_peer_id.clone()) {
                (Some(room), Some(peer)) => (room, peer),
                _ => return Err(ConnectionError::NotInRoom),
            }
        };

        let sent = self.inner.signaling.send(&SignalingMessage::LeaveRoom {
            room_id: room_id.clone(),
            peer_id,
        });

        self.close_all_peers().await;
        self.inner.shared.lock().room_id = None;
        self.inner.bus.emit(RtcEvent::RoomLeft { room_id });

        sent
    }

    /// Startet explizit eine Verhandlung mit einem Peer
    pub async fn call_peer(&self, peer_id: &str) -> Result<(), ConnectionError> {
        self.revive_peer(peer_id);
        self.ensure_peer(peer_id).await?;
        self.negotiate(peer_id, false).await
    }

    /// Schließt eine Peer Connection. Laufende Verhandlungen werden still verworfen.
    pub async fn close_peer_connection(&self, peer_id: &str) {
        self.remove_peer(peer_id, PeerState::Closed).await;
    }

    // ------------------------------------------------------------------------
    // Local media
    // ------------------------------------------------------------------------

    /// Setzt den lokalen Stream für alle bestehenden und künftigen Peers
    pub async fn set_local_stream(&self, stream: Option<MediaStream>) {
        self.inner.shared.lock().local_stream = stream.clone();

        if let Some(stream) = stream {
            for track in stream.tracks() {
                self.replace_local_track(track).await;
            }
        }
    }

    /// Hängt die Tracks eines Streams an einen Peer an
    ///
    /// Ist die Verbindung bereits ausgehandelt, wird neu verhandelt.
    pub async fn add_local_stream(
        &self,
        peer_id: &str,
        stream: &MediaStream,
    ) -> Result<(), ConnectionError> {
        let (handle, generation, established) = {
            let shared = self.inner.shared.lock();
            let entry = shared
                .peers
                .get(peer_id)
                .ok_or_else(|| ConnectionError::PeerNotFound(peer_id.to_string()))?;
            (
                Arc::clone(&entry.handle),
                entry.generation,
                entry.remote_description_set,
            )
        };

        for track in stream.tracks() {
            if let Err(e) = handle.add_track(track).await {
                if !self.is_current(peer_id, generation) {
                    return Ok(());
                }
                return Err(e);
            }
        }

        if established && self.is_current(peer_id, generation) {
            tracing::debug!("Renegotiating with {} after adding tracks", peer_id);
            self.negotiate(peer_id, false).await?;
        }
        Ok(())
    }

    /// Tauscht den Track gleicher Art auf allen Peers ohne Neuverhandlung
    ///
    /// Gibt die Anzahl erfolgreich aktualisierter Peers zurück.
    pub async fn replace_local_track(&self, track: &MediaTrack) -> usize {
        let handles: Vec<(String, Arc<dyn PeerHandle>)> = {
            let mut shared = self.inner.shared.lock();
            if let Some(stream) = shared.local_stream.as_mut() {
                stream.replace_track(track.clone());
            }
            shared
                .peers
                .iter()
                .map(|(id, p)| (id.clone(), Arc::clone(&p.handle)))
                .collect()
        };

        let mut replaced = 0;
        for (peer_id, handle) in handles {
            match handle.replace_track(track).await {
                Ok(()) => replaced += 1,
                Err(e) => tracing::warn!("Failed to replace track on {}: {}", peer_id, e),
            }
        }
        replaced
    }

    // ------------------------------------------------------------------------
    // Inbound signaling
    // ------------------------------------------------------------------------

    /// Verarbeitet eine eingehende Signaling-Nachricht
    pub async fn handle_message(&self, message: SignalingMessage) -> Result<(), ConnectionError> {
        match message {
            SignalingMessage::RoomJoined { room_id, data, .. } => {
                let local = {
                    let mut shared = self.inner.shared.lock();
                    shared.room_id = Some(room_id.clone());
                    shared.local_peer_id.clone()
                };

                let peers: Vec<String> = data
                    .peers
                    .into_iter()
                    .filter(|p| Some(p) != local.as_ref())
                    .collect();

                tracing::info!("Joined room {} ({} peers present)", room_id, peers.len());
                self.inner.bus.emit(RtcEvent::RoomJoined {
                    room_id,
                    peers: peers.clone(),
                });

                for peer_id in peers {
                    self.revive_peer(&peer_id);
                    let created = self.ensure_peer(&peer_id).await?;
                    if created && self.inner.settings.offer_on_join {
                        if let Err(e) = self.negotiate(&peer_id, false).await {
                            tracing::warn!("Initial offer to {} failed: {}", peer_id, e);
                            self.emit_error(ErrorSource::Connection, &e);
                        }
                    }
                }
                Ok(())
            }

            SignalingMessage::RoomLeft { room_id, .. } => {
                self.close_all_peers().await;
                self.inner.shared.lock().room_id = None;
                self.inner.bus.emit(RtcEvent::RoomLeft { room_id });
                Ok(())
            }

            SignalingMessage::PeerJoined { peer_id, .. } => {
                if self.is_local(&peer_id) {
                    return Ok(());
                }
                tracing::info!("Peer joined: {}", peer_id);
                self.revive_peer(&peer_id);
                self.ensure_peer(&peer_id).await?;
                self.inner.bus.emit(RtcEvent::PeerJoined { peer_id });
                Ok(())
            }

            SignalingMessage::PeerLeft { peer_id, .. } => {
                tracing::info!("Peer left: {}", peer_id);
                self.close_peer_connection(&peer_id).await;
                self.inner.bus.emit(RtcEvent::PeerLeft { peer_id });
                Ok(())
            }

            SignalingMessage::Offer { peer_id, data, .. } => self.handle_offer(&peer_id, data).await,

            SignalingMessage::Answer { peer_id, data, .. } => {
                self.handle_answer(&peer_id, data).await
            }

            SignalingMessage::IceCandidate { peer_id, data, .. } => {
                self.handle_remote_candidate(&peer_id, data).await
            }

            SignalingMessage::Error { error, .. } => {
                tracing::warn!("Signaling server reported: {}", error);
                self.inner
                    .bus
                    .emit(RtcEvent::error(ErrorSource::Signaling, error));
                Ok(())
            }

            SignalingMessage::JoinRoom { .. } | SignalingMessage::LeaveRoom { .. } => {
                tracing::debug!("Ignoring client-bound {}", message.type_name());
                Ok(())
            }

            SignalingMessage::Unknown => Ok(()),
        }
    }

    async fn handle_offer(
        &self,
        peer_id: &str,
        offer: SessionDescription,
    ) -> Result<(), ConnectionError> {
        if self.has_departed(peer_id) {
            tracing::debug!("Ignoring offer from departed peer {}", peer_id);
            return Ok(());
        }
        self.ensure_peer(peer_id).await?;

        let Some((turn, generation)) = self.negotiation_turn(peer_id) else {
            return Ok(());
        };
        let _turn = turn.lock().await;

        let (handle, needs_rollback) = {
            let shared = self.inner.shared.lock();
            let polite = shared
                .local_peer_id
                .as_deref()
                .map(|local| local < peer_id)
                .unwrap_or(false);

            let Some(entry) = shared.peers.get(peer_id) else {
                return Ok(());
            };
            if entry.generation != generation {
                return Ok(());
            }

            let collision = entry.have_local_offer;
            if collision && !polite {
                tracing::debug!("Ignoring colliding offer from {}", peer_id);
                return Ok(());
            }
            if collision {
                tracing::debug!("Offer collision with {}, rolling back own offer", peer_id);
            }

            (Arc::clone(&entry.handle), collision)
        };

        let result = async {
            if needs_rollback {
                handle.rollback().await?;
                self.set_have_local_offer(peer_id, generation, false);
                if !self.is_current(peer_id, generation) {
                    return Ok(());
                }
            }

            handle.set_remote_description(offer).await?;
            if !self.is_current(peer_id, generation) {
                return Ok(());
            }
            self.flush_candidates(peer_id, generation, &handle).await;

            let answer = handle.create_answer().await?;
            if !self.is_current(peer_id, generation) {
                return Ok(());
            }
            handle.set_local_description(answer.clone()).await?;
            if !self.is_current(peer_id, generation) {
                return Ok(());
            }

            let room_id = self.room_id();
            self.inner.signaling.send(&SignalingMessage::Answer {
                room_id,
                peer_id: peer_id.to_string(),
                data: answer,
            })?;
            self.update_peer_state(peer_id, generation, PeerState::Connecting);
            tracing::debug!("Answer sent to {}", peer_id);
            Ok::<(), ConnectionError>(())
        }
        .await;

        self.settle_result(peer_id, generation, result)
    }

    async fn handle_answer(
        &self,
        peer_id: &str,
        answer: SessionDescription,
    ) -> Result<(), ConnectionError> {
        let Some((turn, generation)) = self.negotiation_turn(peer_id) else {
            tracing::debug!("Ignoring answer from unknown peer {}", peer_id);
            return Ok(());
        };
        let _turn = turn.lock().await;

        let handle = {
            let shared = self.inner.shared.lock();
            match shared.peers.get(peer_id) {
                Some(entry) if entry.generation != generation => return Ok(()),
                Some(entry) if entry.have_local_offer => Arc::clone(&entry.handle),
                Some(_) => {
                    tracing::debug!("Ignoring answer from {} without pending offer", peer_id);
                    return Ok(());
                }
                None => {
                    tracing::debug!("Ignoring answer from unknown peer {}", peer_id);
                    return Ok(());
                }
            }
        };

        let result = async {
            handle.set_remote_description(answer).await?;
            self.set_have_local_offer(peer_id, generation, false);
            if !self.is_current(peer_id, generation) {
                return Ok(());
            }
            self.flush_candidates(peer_id, generation, &handle).await;
            Ok::<(), ConnectionError>(())
        }
        .await;

        self.settle_result(peer_id, generation, result)
    }

    async fn handle_remote_candidate(
        &self,
        peer_id: &str,
        candidate: IceCandidate,
    ) -> Result<(), ConnectionError> {
        let (handle, generation) = {
            let mut shared = self.inner.shared.lock();
            if shared.departed.contains(peer_id) {
                tracing::debug!("Dropping ICE candidate from departed peer {}", peer_id);
                return Ok(());
            }

            let Shared {
                peers,
                early_candidates,
                ..
            } = &mut *shared;
            let Some(entry) = peers.get_mut(peer_id) else {
                tracing::debug!("Holding ICE candidate from unknown peer {}", peer_id);
                early_candidates
                    .entry(peer_id.to_string())
                    .or_default()
                    .push(candidate);
                return Ok(());
            };
            if !entry.remote_description_set {
                tracing::debug!("Buffering ICE candidate from {}", peer_id);
                entry.pending_candidates.push(candidate);
                return Ok(());
            }
            (Arc::clone(&entry.handle), entry.generation)
        };

        if let Err(e) = handle.add_ice_candidate(candidate).await {
            if self.is_current(peer_id, generation) {
                tracing::warn!("Failed to add ICE candidate from {}: {}", peer_id, e);
            }
        }
        Ok(())
    }

    /// Markiert die Remote Description als gesetzt und wendet gepufferte
    /// Candidates in Ankunftsreihenfolge an
    async fn flush_candidates(&self, peer_id: &str, generation: u64, handle: &Arc<dyn PeerHandle>) {
        let pending = {
            let mut shared = self.inner.shared.lock();
            let Some(entry) = shared.peers.get_mut(peer_id) else {
                return;
            };
            entry.remote_description_set = true;
            std::mem::take(&mut entry.pending_candidates)
        };

        if !pending.is_empty() {
            tracing::debug!("Applying {} buffered candidates for {}", pending.len(), peer_id);
        }

        for candidate in pending {
            if !self.is_current(peer_id, generation) {
                return;
            }
            if let Err(e) = handle.add_ice_candidate(candidate).await {
                tracing::warn!("Failed to add buffered candidate for {}: {}", peer_id, e);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Negotiation
    // ------------------------------------------------------------------------

    /// Erzeugt ein Offer und sendet es an den Peer
    async fn negotiate(&self, peer_id: &str, ice_restart: bool) -> Result<(), ConnectionError> {
        let (turn, generation) = self
            .negotiation_turn(peer_id)
            .ok_or_else(|| ConnectionError::PeerNotFound(peer_id.to_string()))?;
        let _turn = turn.lock().await;

        let handle = {
            let shared = self.inner.shared.lock();
            match shared.peers.get(peer_id) {
                Some(entry) if entry.generation == generation => Arc::clone(&entry.handle),
                _ => return Ok(()),
            }
        };

        let result = async {
            let offer = handle.create_offer(ice_restart).await?;
            if !self.is_current(peer_id, generation) {
                return Ok(());
            }
            handle.set_local_description(offer.clone()).await?;
            // Ab hier steht die Verbindung in have-local-offer
            self.set_have_local_offer(peer_id, generation, true);
            if !self.is_current(peer_id, generation) {
                return Ok(());
            }

            let room_id = self.room_id();
            self.inner.signaling.send(&SignalingMessage::Offer {
                room_id,
                peer_id: peer_id.to_string(),
                data: offer,
            })?;
            self.update_peer_state(peer_id, generation, PeerState::Connecting);
            tracing::debug!(
                "Offer sent to {}{}",
                peer_id,
                if ice_restart { " (ICE restart)" } else { "" }
            );
            Ok::<(), ConnectionError>(())
        }
        .await;

        self.settle_result(peer_id, generation, result)
    }

    /// Sperre für die Verhandlung mit einem Peer und dessen aktuelle Generation
    fn negotiation_turn(&self, peer_id: &str) -> Option<(Arc<tokio::sync::Mutex<()>>, u64)> {
        self.inner
            .shared
            .lock()
            .peers
            .get(peer_id)
            .map(|p| (Arc::clone(&p.negotiation), p.generation))
    }

    fn set_have_local_offer(&self, peer_id: &str, generation: u64, value: bool) {
        if let Some(entry) = self.inner.shared.lock().peers.get_mut(peer_id) {
            if entry.generation == generation {
                entry.have_local_offer = value;
            }
        }
    }

    /// Fehler einer nicht mehr existierenden Verbindung werden verworfen
    fn settle_result(
        &self,
        peer_id: &str,
        generation: u64,
        result: Result<(), ConnectionError>,
    ) -> Result<(), ConnectionError> {
        match result {
            Err(e) if !self.is_current(peer_id, generation) => {
                tracing::debug!("Discarding error for closed peer {}: {}", peer_id, e);
                Ok(())
            }
            other => other,
        }
    }

    fn is_current(&self, peer_id: &str, generation: u64) -> bool {
        self.inner
            .shared
            .lock()
            .peers
            .get(peer_id)
            .map(|p| p.generation == generation)
            .unwrap_or(false)
    }

    fn is_local(&self, peer_id: &str) -> bool {
        self.inner.shared.lock().local_peer_id.as_deref() == Some(peer_id)
    }

    fn has_departed(&self, peer_id: &str) -> bool {
        self.inner.shared.lock().departed.contains(peer_id)
    }

    /// Ein Peer ist (wieder) im Raum
    fn revive_peer(&self, peer_id: &str) {
        self.inner.shared.lock().departed.remove(peer_id);
    }

    // ------------------------------------------------------------------------
    // Peer lifecycle
    // ------------------------------------------------------------------------

    /// Legt eine Peer Connection an, falls sie fehlt. `true` = neu erzeugt.
    async fn ensure_peer(&self, peer_id: &str) -> Result<bool, ConnectionError> {
        if self.has_peer(peer_id) {
            return Ok(false);
        }
        self.ensure_pump();

        let generation = {
            let mut shared = self.inner.shared.lock();
            shared.next_generation += 1;
            shared.next_generation
        };

        let signals = PeerSignalSender::new(
            peer_id.to_string(),
            generation,
            self.inner.peer_tx.clone(),
        );
        let handle = match self.inner.connector.create(peer_id, signals).await {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!("Failed to create peer connection for {}: {}", peer_id, e);
                self.emit_error(ErrorSource::Connection, &e);
                return Err(e);
            }
        };

        let local_stream = {
            let mut shared = self.inner.shared.lock();
            if shared.peers.contains_key(peer_id) || shared.departed.contains(peer_id) {
                None
            } else {
                let pending_candidates = shared
                    .early_candidates
                    .remove(peer_id)
                    .unwrap_or_default();
                shared.peers.insert(
                    peer_id.to_string(),
                    PeerEntry {
                        handle: Arc::clone(&handle),
                        generation,
                        state: PeerState::New,
                        remote_description_set: false,
                        pending_candidates,
                        have_local_offer: false,
                        negotiation: Arc::new(tokio::sync::Mutex::new(())),
                        ice_restarts: 0,
                    },
                );
                Some(shared.local_stream.clone())
            }
        };

        // Parallel angelegt oder inzwischen geschlossen: eigene Verbindung verwerfen
        let Some(local_stream) = local_stream else {
            handle.close().await;
            return Ok(false);
        };

        tracing::info!("Peer connection created for {}", peer_id);
        self.inner.bus.emit(RtcEvent::PeerStateChanged {
            peer_id: peer_id.to_string(),
            state: PeerState::New,
        });

        if let Some(stream) = local_stream {
            for track in stream.tracks() {
                if let Err(e) = handle.add_track(track).await {
                    tracing::warn!("Failed to attach local track to {}: {}", peer_id, e);
                }
            }
        }

        Ok(true)
    }

    async fn remove_peer(&self, peer_id: &str, final_state: PeerState) {
        let entry = {
            let mut shared = self.inner.shared.lock();
            shared.departed.insert(peer_id.to_string());
            shared.early_candidates.remove(peer_id);
            shared.peers.remove(peer_id)
        };
        let Some(entry) = entry else {
            return;
        };

        entry.handle.close().await;
        self.inner.streams.remove_remote_stream(peer_id);
        self.inner.bus.emit(RtcEvent::PeerStateChanged {
            peer_id: peer_id.to_string(),
            state: final_state,
        });
        tracing::info!("Peer connection closed for {}", peer_id);
    }

    async fn close_all_peers(&self) {
        for peer_id in self.peer_ids() {
            self.close_peer_connection(&peer_id).await;
        }
    }

    fn update_peer_state(&self, peer_id: &str, generation: u64, state: PeerState) {
        {
            let mut shared = self.inner.shared.lock();
            let Some(entry) = shared.peers.get_mut(peer_id) else {
                return;
            };
            if entry.generation != generation || entry.state == state {
                return;
            }
            entry.state = state;
        }

        self.inner.bus.emit(RtcEvent::PeerStateChanged {
            peer_id: peer_id.to_string(),
            state,
        });
    }

    // ------------------------------------------------------------------------
    // Peer signals
    // ------------------------------------------------------------------------

    async fn handle_peer_signal(&self, envelope: PeerEnvelope) {
        let PeerEnvelope {
            peer_id,
            generation,
            signal,
        } = envelope;

        if !self.is_current(&peer_id, generation) {
            return;
        }

        match signal {
            PeerSignal::LocalCandidate(candidate) => {
                let room_id = self.room_id();
                let message = SignalingMessage::IceCandidate {
                    room_id,
                    peer_id: peer_id.clone(),
                    data: candidate.clone(),
                };
                if let Err(e) = self.inner.signaling.send(&message) {
                    tracing::debug!("Could not send ICE candidate to {}: {}", peer_id, e);
                }
                self.inner
                    .bus
                    .emit(RtcEvent::IceCandidate { peer_id, candidate });
            }

            PeerSignal::StateChanged(PeerState::Failed) | PeerSignal::IceFailed => {
                self.handle_ice_failure(&peer_id, generation).await;
            }

            PeerSignal::StateChanged(state) => {
                self.update_peer_state(&peer_id, generation, state);

                if state == PeerState::Connected {
                    if let Some(entry) = self.inner.shared.lock().peers.get_mut(&peer_id) {
                        entry.ice_restarts = 0;
                    }
                    if self.state() == ConnectionState::Reconnecting
                        && self.inner.signaling.is_connected()
                    {
                        self.set_state(ConnectionState::Connected);
                    }
                }
            }

            PeerSignal::TrackAdded(track) => {
                self.inner.streams.add_remote_track(&peer_id, track);
            }

            PeerSignal::TrackRemoved(track_id) => {
                self.inner.streams.remove_remote_track(&peer_id, &track_id);
            }
        }
    }

    /// ICE-Restart innerhalb des Budgets, danach ist der Peer gescheitert
    async fn handle_ice_failure(&self, peer_id: &str, generation: u64) {
        let attempts = {
            let mut shared = self.inner.shared.lock();
            let Some(entry) = shared.peers.get_mut(peer_id) else {
                return;
            };
            entry.ice_restarts += 1;
            entry.ice_restarts
        };

        let budget = self.inner.settings.ice_retry_budget;
        if attempts <= budget {
            tracing::warn!(
                "ICE failed for {}, restarting ({}/{})",
                peer_id,
                attempts,
                budget
            );
            self.update_peer_state(peer_id, generation, PeerState::Connecting);
            self.set_state(ConnectionState::Reconnecting);

            if let Err(e) = self.negotiate(peer_id, true).await {
                tracing::warn!("ICE restart offer to {} failed: {}", peer_id, e);
                self.emit_error(ErrorSource::Connection, &e);
            }
            return;
        }

        tracing::error!("ICE failed for {} after {} restarts", peer_id, budget);
        self.remove_peer(peer_id, PeerState::Failed).await;
        self.set_state(ConnectionState::Failed);
        self.inner.bus.emit(RtcEvent::error(
            ErrorSource::Connection,
            format!("ICE connection to {} failed", peer_id),
        ));
    }

    // ------------------------------------------------------------------------
    // Event pump
    // ------------------------------------------------------------------------

    fn ensure_pump(&self) {
        let Some((signals, peers)) = self.inner.pump.lock().take() else {
            return;
        };
        tokio::spawn(Self::run_pump(Arc::downgrade(&self.inner), signals, peers));
    }

    async fn run_pump(
        inner: Weak<Inner>,
        mut signals: mpsc::UnboundedReceiver<SignalingEvent>,
        mut peers: mpsc::UnboundedReceiver<PeerEnvelope>,
    ) {
        loop {
            let event = tokio::select! {
                Some(event) = signals.recv() => PumpEvent::Signal(event),
                Some(envelope) = peers.recv() => PumpEvent::Peer(envelope),
                else => break,
            };

            let Some(inner) = inner.upgrade() else {
                break;
            };
            let manager = ConnectionManager { inner };

            match event {
                PumpEvent::Signal(SignalingEvent::Message(message)) => {
                    manager
                        .inner
                        .bus
                        .emit(RtcEvent::SignalingMessage(message.clone()));
                    let kind = message.type_name();
                    if let Err(e) = manager.handle_message(message).await {
                        tracing::warn!("Handling {} failed: {}", kind, e);
                        manager.emit_error(ErrorSource::Connection, &e);
                    }
                }
                PumpEvent::Signal(SignalingEvent::Error(e)) => {
                    manager.emit_error(ErrorSource::Signaling, &e);
                }
                PumpEvent::Signal(SignalingEvent::Disconnected { unexpected: true }) => {
                    manager.reconnect().await;
                }
                PumpEvent::Signal(_) => {}
                PumpEvent::Peer(envelope) => manager.handle_peer_signal(envelope).await,
            }
        }

        tracing::debug!("Connection event pump stopped");
    }

    /// Stellt den Signaling-Kanal nach einem Abbruch wieder her
    async fn reconnect(&self) {
        let (url, state) = (self.inner.signaling.url(), self.state());
        let Some(url) = url else {
            return;
        };
        if matches!(state, ConnectionState::Disconnected | ConnectionState::Failed) {
            return;
        }

        let epoch = *self.inner.epoch.borrow();
        let policy = self.inner.settings.reconnect.clone();
        self.set_state(ConnectionState::Reconnecting);

        for attempt in 0..policy.max_attempts {
            let delay = policy.delay(attempt);
            tracing::info!(
                "Reconnecting to signaling server in {:?} (attempt {}/{})",
                delay,
                attempt + 1,
                policy.max_attempts
            );
            tokio::time::sleep(delay).await;

            if *self.inner.epoch.borrow() != epoch {
                return;
            }

            match self.inner.signaling.connect(&url).await {
                Ok(()) => {
                    if *self.inner.epoch.borrow() != epoch {
                        self.inner.signaling.disconnect().await;
                        return;
                    }
                    self.set_state(ConnectionState::Connected);
                    self.rejoin_room();
                    return;
                }
                Err(e) => tracing::warn!("Reconnect attempt {} failed: {}", attempt + 1, e),
            }
        }

        tracing::error!("Giving up on signaling server after {} attempts", policy.max_attempts);
        self.set_state(ConnectionState::Failed);
        self.inner.bus.emit(RtcEvent::error(
            ErrorSource::Connection,
            "Signaling connection lost",
        ));
    }

    fn rejoin_room(&self) {
        let room = {
            let shared = self.inner.shared.lock();
            shared.room_id.clone().zip(shared.local_peer_id.clone())
        };
        if let Some((room_id, peer_id)) = room {
            tracing::info!("Rejoining room {}", room_id);
            if let Err(e) = self
                .inner
                .signaling
                .send(&SignalingMessage::JoinRoom { room_id, peer_id })
            {
                self.emit_error(ErrorSource::Connection, &e);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    fn set_state(&self, state: ConnectionState) {
        let changed = {
            let mut shared = self.inner.shared.lock();
            let changed = shared.state != state;
            shared.state = state;
            changed
        };

        if changed {
            tracing::info!("Connection state: {:?}", state);
            self.inner.bus.emit(RtcEvent::ConnectionStateChanged(state));
        }
    }

    fn emit_error(&self, source: ErrorSource, err: &dyn std::fmt::Display) {
        self.inner.bus.emit(RtcEvent::error(source, err.to_string()));
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state())
            .field("room_id", &self.room_id())
            .field("peers", &self.peer_ids())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RtcEventKind;
    use crate::signaling::{RoomMembers, SdpType};
    use crate::testing::{settle, test_peer, FakeConnector, FakeSignaling, LoopbackHub, PeerOp};

    fn no_auto_offer() -> ConnectionSettings {
        ConnectionSettings {
            offer_on_join: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_reconnect_delay_is_bounded() {
        let policy = ReconnectPolicy::default();
        for attempt in 0..10 {
            let delay = policy.delay(attempt);
            assert!(delay <= Duration::from_millis(policy.max_delay_ms));
            assert!(delay >= Duration::from_millis(policy.base_delay_ms));
        }
    }

    #[tokio::test]
    async fn test_joiner_sends_offer_and_gets_answer() {
        let hub = LoopbackHub::new();
        let (b, b_conn, _) = test_peer(&hub, "b", ConnectionSettings::default()).await;
        let (a, a_conn, _) = test_peer(&hub, "a", ConnectionSettings::default()).await;
        settle().await;

        assert_eq!(a.peer_ids(), vec!["b".to_string()]);
        assert_eq!(b.peer_ids(), vec!["a".to_string()]);

        let offers = hub.sent_of_type("offer");
        let answers = hub.sent_of_type("answer");
        assert_eq!(offers, vec![("a".to_string(), "b".to_string())]);
        assert_eq!(answers, vec![("b".to_string(), "a".to_string())]);

        let a_ops = a_conn.peer("b").unwrap().ops();
        assert!(a_ops.contains(&PeerOp::SetRemote(SdpType::Answer)));
        let b_ops = b_conn.peer("a").unwrap().ops();
        assert_eq!(
            b_ops,
            vec![
                PeerOp::SetRemote(SdpType::Offer),
                PeerOp::CreateAnswer,
                PeerOp::SetLocal(SdpType::Answer),
            ]
        );
    }

    #[tokio::test]
    async fn test_glare_smaller_peer_yields() {
        let hub = LoopbackHub::new();
        let (a, a_conn, _) = test_peer(&hub, "a", no_auto_offer()).await;
        let (b, b_conn, _) = test_peer(&hub, "b", no_auto_offer()).await;
        settle().await;

        let (ra, rb) = tokio::join!(a.call_peer("b"), b.call_peer("a"));
        ra.unwrap();
        rb.unwrap();
        settle().await;

        // Zwei Offers, aber genau ein abgeschlossener Austausch (a antwortet b)
        assert_eq!(hub.sent_of_type("offer").len(), 2);
        assert_eq!(
            hub.sent_of_type("answer"),
            vec![("a".to_string(), "b".to_string())]
        );

        let a_ops = a_conn.peer("b").unwrap().ops();
        assert!(a_ops.contains(&PeerOp::Rollback));
        assert!(a_ops.contains(&PeerOp::SetRemote(SdpType::Offer)));

        let b_ops = b_conn.peer("a").unwrap().ops();
        assert!(!b_ops.contains(&PeerOp::Rollback));
        assert!(!b_ops.contains(&PeerOp::SetRemote(SdpType::Offer)));
        assert!(b_ops.contains(&PeerOp::SetRemote(SdpType::Answer)));

        assert_eq!(a_conn.peer("b").unwrap().signaling_state(), FakeSignaling::Stable);
        assert_eq!(b_conn.peer("a").unwrap().signaling_state(), FakeSignaling::Stable);
    }

    #[tokio::test]
    async fn test_colliding_offer_waits_for_own_offer() {
        let hub = LoopbackHub::new();
        let (a, a_conn, bus) = test_peer(&hub, "a", no_auto_offer()).await;

        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        bus.on(RtcEventKind::Error, move |e| sink.lock().push(e.clone()));

        // Eigenes Offer hängt in create_offer
        a_conn.hold_offers();
        let caller = a.clone();
        let offering = tokio::spawn(async move { caller.call_peer("b").await });
        settle().await;

        let receiver = a.clone();
        let answering = tokio::spawn(async move {
            receiver
                .handle_message(SignalingMessage::Offer {
                    room_id: None,
                    peer_id: "b".to_string(),
                    data: SessionDescription::offer("remote"),
                })
                .await
        });
        settle().await;
        a_conn.release_offers();

        assert_eq!(offering.await.unwrap(), Ok(()));
        assert_eq!(answering.await.unwrap(), Ok(()));

        let peer = a_conn.peer("b").unwrap();
        assert_eq!(
            peer.ops(),
            vec![
                PeerOp::CreateOffer { ice_restart: false },
                PeerOp::SetLocal(SdpType::Offer),
                PeerOp::Rollback,
                PeerOp::SetRemote(SdpType::Offer),
                PeerOp::CreateAnswer,
                PeerOp::SetLocal(SdpType::Answer),
            ]
        );
        assert_eq!(peer.signaling_state(), FakeSignaling::Stable);
        assert!(!errors.lock().iter().any(|e| matches!(
            e,
            RtcEvent::Error {
                source: ErrorSource::Connection,
                ..
            }
        )));
    }

    #[tokio::test]
    async fn test_candidates_buffered_until_remote_description() {
        let hub = LoopbackHub::new();
        let (a, a_conn, _) = test_peer(&hub, "a", no_auto_offer()).await;

        a.handle_message(SignalingMessage::IceCandidate {
            room_id: None,
            peer_id: "z".to_string(),
            data: IceCandidate::new("c1"),
        })
        .await
        .unwrap();
        a.handle_message(SignalingMessage::IceCandidate {
            room_id: None,
            peer_id: "z".to_string(),
            data: IceCandidate::new("c2"),
        })
        .await
        .unwrap();

        // Candidates allein legen keine Verbindung an
        assert!(a_conn.peer("z").is_none());
        assert!(!a.has_peer("z"));

        a.handle_message(SignalingMessage::Offer {
            room_id: None,
            peer_id: "z".to_string(),
            data: SessionDescription::offer("remote"),
        })
        .await
        .unwrap();
        let peer = a_conn.peer("z").unwrap();

        a.handle_message(SignalingMessage::IceCandidate {
            room_id: None,
            peer_id: "z".to_string(),
            data: IceCandidate::new("c3"),
        })
        .await
        .unwrap();

        assert_eq!(
            peer.ops(),
            vec![
                PeerOp::SetRemote(SdpType::Offer),
                PeerOp::AddCandidate("c1".to_string()),
                PeerOp::AddCandidate("c2".to_string()),
                PeerOp::CreateAnswer,
                PeerOp::SetLocal(SdpType::Answer),
                PeerOp::AddCandidate("c3".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_close_during_negotiation_is_silent() {
        let hub = LoopbackHub::new();
        let (a, a_conn, bus) = test_peer(&hub, "a", no_auto_offer()).await;

        let errors = Arc::new(Mutex::new(0usize));
        let counter = Arc::clone(&errors);
        bus.on(RtcEventKind::Error, move |_| *counter.lock() += 1);

        a_conn.hold_answers();
        let manager = a.clone();
        let task = tokio::spawn(async move {
            manager
                .handle_message(SignalingMessage::Offer {
                    room_id: None,
                    peer_id: "z".to_string(),
                    data: SessionDescription::offer("remote"),
                })
                .await
        });
        settle().await;

        a.close_peer_connection("z").await;
        a.close_peer_connection("z").await;
        a_conn.release_answers();

        assert_eq!(task.await.unwrap(), Ok(()));
        assert!(!a.has_peer("z"));
        assert!(hub.sent_of_type("answer").is_empty());
        assert_eq!(*errors.lock(), 0);
    }

    #[tokio::test]
    async fn test_ice_failure_restarts_then_fails() {
        let hub = LoopbackHub::new();
        let settings = ConnectionSettings {
            ice_retry_budget: 1,
            ..no_auto_offer()
        };
        let (a, a_conn, _) = test_peer(&hub, "a", settings).await;
        a.call_peer("z").await.unwrap();

        let signals = a_conn.signals("z").unwrap();
        signals.send(PeerSignal::IceFailed);
        settle().await;

        assert_eq!(a.state(), ConnectionState::Reconnecting);
        assert!(a_conn
            .peer("z")
            .unwrap()
            .ops()
            .contains(&PeerOp::CreateOffer { ice_restart: true }));

        signals.send(PeerSignal::IceFailed);
        settle().await;

        assert!(!a.has_peer("z"));
        assert_eq!(a.state(), ConnectionState::Failed);
    }

    #[tokio::test]
    async fn test_peer_connected_restores_state() {
        let hub = LoopbackHub::new();
        let (a, a_conn, _) = test_peer(&hub, "a", no_auto_offer()).await;
        a.call_peer("z").await.unwrap();

        let signals = a_conn.signals("z").unwrap();
        signals.send(PeerSignal::IceFailed);
        settle().await;
        assert_eq!(a.state(), ConnectionState::Reconnecting);

        signals.send(PeerSignal::StateChanged(PeerState::Connected));
        settle().await;
        assert_eq!(a.state(), ConnectionState::Connected);
        assert_eq!(a.peer_state("z"), Some(PeerState::Connected));
    }

    #[tokio::test]
    async fn test_remote_tracks_follow_peer_signals() {
        let hub = LoopbackHub::new();
        let (a, a_conn, _) = test_peer(&hub, "a", no_auto_offer()).await;
        a.call_peer("z").await.unwrap();

        let signals = a_conn.signals("z").unwrap();
        signals.send(PeerSignal::TrackAdded(MediaTrack::remote(
            "z-audio",
            crate::media::TrackKind::Audio,
            "z-stream",
        )));
        signals.send(PeerSignal::TrackAdded(MediaTrack::remote(
            "z-video",
            crate::media::TrackKind::Video,
            "z-stream",
        )));
        settle().await;

        let streams = a.stream_manager();
        assert_eq!(streams.remote_stream("z").unwrap().tracks().len(), 2);

        // Receiver eines Tracks beendet
        signals.send(PeerSignal::TrackRemoved("z-audio".to_string()));
        settle().await;
        assert_eq!(streams.remote_stream("z").unwrap().tracks().len(), 1);

        signals.send(PeerSignal::TrackRemoved("z-video".to_string()));
        settle().await;
        assert!(streams.remote_stream("z").is_none());
    }

    #[tokio::test]
    async fn test_connect_then_disconnect_settles_disconnected() {
        let hub = LoopbackHub::new();
        hub.set_hang_connections(true);

        let bus = RtcEventBus::new();
        let errors = Arc::new(Mutex::new(0usize));
        let counter = Arc::clone(&errors);
        bus.on(RtcEventKind::Error, move |_| *counter.lock() += 1);

        let manager = ConnectionManager::new(
            SignalingClient::new(hub.transport()),
            Arc::new(FakeConnector::new()),
            StreamManager::new(bus.clone()),
            bus,
            ConnectionSettings::default(),
        );

        let connecting = manager.clone();
        let task = tokio::spawn(async move { connecting.connect("ws://hub").await });
        settle().await;
        assert_eq!(manager.state(), ConnectionState::Connecting);

        manager.disconnect().await;

        assert_eq!(task.await.unwrap(), Err(ConnectionError::Cancelled));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(*errors.lock(), 0);
    }

    #[tokio::test]
    async fn test_connect_failure_emits_error() {
        let hub = LoopbackHub::new();
        hub.set_refuse_connections(true);

        let bus = RtcEventBus::new();
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        bus.on(RtcEventKind::Error, move |e| sink.lock().push(e.clone()));

        let manager = ConnectionManager::new(
            SignalingClient::new(hub.transport()),
            Arc::new(FakeConnector::new()),
            StreamManager::new(bus.clone()),
            bus,
            ConnectionSettings::default(),
        );

        let err = manager.connect("ws://hub").await.unwrap_err();
        assert!(matches!(err, ConnectionError::ConnectFailed(_)));
        assert_eq!(manager.state(), ConnectionState::Failed);
        assert_eq!(errors.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_peer_left_closes_connection() {
        let hub = LoopbackHub::new();
        let (a, a_conn, _) = test_peer(&hub, "a", no_auto_offer()).await;

        a.handle_message(SignalingMessage::RoomJoined {
            room_id: "room".to_string(),
            peer_id: None,
            data: RoomMembers {
                peers: vec!["a".to_string(), "x".to_string()],
            },
        })
        .await
        .unwrap();
        assert_eq!(a.peer_ids(), vec!["x".to_string()]);

        a.handle_message(SignalingMessage::PeerLeft {
            room_id: None,
            peer_id: "x".to_string(),
        })
        .await
        .unwrap();

        assert!(a.peer_ids().is_empty());
        assert!(a_conn.peer("x").unwrap().ops().contains(&PeerOp::Close));
    }

    #[tokio::test]
    async fn test_departed_peer_stays_closed() {
        let hub = LoopbackHub::new();
        let (a, a_conn, _) = test_peer(&hub, "a", no_auto_offer()).await;

        a.handle_message(SignalingMessage::RoomJoined {
            room_id: "room".to_string(),
            peer_id: None,
            data: RoomMembers {
                peers: vec!["a".to_string(), "x".to_string()],
            },
        })
        .await
        .unwrap();
        a.handle_message(SignalingMessage::PeerLeft {
            room_id: None,
            peer_id: "x".to_string(),
        })
        .await
        .unwrap();
        let closed = a_conn.peer("x").unwrap();

        // Nachzügler eines gegangenen Peers
        a.handle_message(SignalingMessage::IceCandidate {
            room_id: None,
            peer_id: "x".to_string(),
            data: IceCandidate::new("late"),
        })
        .await
        .unwrap();
        a.handle_message(SignalingMessage::Offer {
            room_id: None,
            peer_id: "x".to_string(),
            data: SessionDescription::offer("stale"),
        })
        .await
        .unwrap();

        assert!(a.peer_ids().is_empty());
        assert!(Arc::ptr_eq(&closed, &a_conn.peer("x").unwrap()));
        assert_eq!(closed.ops(), vec![PeerOp::Close]);

        // Kommt der Peer zurück, wird wieder verhandelt
        a.handle_message(SignalingMessage::PeerJoined {
            room_id: None,
            peer_id: "x".to_string(),
        })
        .await
        .unwrap();
        assert_eq!(a.peer_ids(), vec!["x".to_string()]);
        assert!(!Arc::ptr_eq(&closed, &a_conn.peer("x").unwrap()));
    }

    #[tokio::test]
    async fn test_closed_peer_ignores_trailing_candidates() {
        let hub = LoopbackHub::new();
        let (a, _, _) = test_peer(&hub, "a", no_auto_offer()).await;
        a.call_peer("z").await.unwrap();

        a.close_peer_connection("z").await;
        a.handle_message(SignalingMessage::IceCandidate {
            room_id: None,
            peer_id: "z".to_string(),
            data: IceCandidate::new("late"),
        })
        .await
        .unwrap();

        assert!(!a.has_peer("z"));

        // Ein expliziter Anruf öffnet die Verbindung wieder
        a.call_peer("z").await.unwrap();
        assert!(a.has_peer("z"));
    }

    #[tokio::test]
    async fn test_join_room_requires_connection() {
        let hub = LoopbackHub::new();
        let bus = RtcEventBus::new();
        let manager = ConnectionManager::new(
            SignalingClient::new(hub.transport()),
            Arc::new(FakeConnector::new()),
            StreamManager::new(bus.clone()),
            bus,
            ConnectionSettings::default(),
        );

        assert_eq!(
            manager.join_room("room", "a").await,
            Err(ConnectionError::NotConnected)
        );
        assert_eq!(manager.leave_room().await, Err(ConnectionError::NotInRoom));
    }
}
