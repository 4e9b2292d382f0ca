//! Test-Hilfen: In-Process Signaling-Hub und Fake Peer Connections

use crate::connection::{
    ConnectionManager, ConnectionSettings, PeerConnector, PeerHandle, PeerSignalSender,
};
use crate::events::RtcEventBus;
use crate::media::{MediaTrack, StreamManager};
use crate::signaling::{
    ConnectionError, IceCandidate, InboundFrames, RoomMembers, SdpType, SessionDescription,
    SignalingClient, SignalingMessage, SignalingTransport,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Lässt gespawnte Tasks ihre Nachrichten abarbeiten
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(30)).await;
}

// ============================================================================
// LOOPBACK SIGNALING
// ============================================================================

#[derive(Default)]
struct HubState {
    hang: bool,
    refuse: bool,
    /// Offene Verbindungen je Transport
    links: HashMap<u64, mpsc::UnboundedSender<String>>,
    /// Peer-ID → Transport
    peers: HashMap<String, u64>,
    /// Raum → Mitglieder in Beitrittsreihenfolge
    rooms: HashMap<String, Vec<String>>,
    /// (Typ, von, an) aller weitergeleiteten Nachrichten
    sent: Vec<(String, String, String)>,
    /// Wird nach jedem Beitritt mit Raum und Mitgliedern aufgerufen
    on_join: Option<JoinHook>,
}

type JoinHook = Arc<dyn Fn(&str, &[String]) + Send + Sync>;

impl HubState {
    fn deliver(&self, transport: u64, message: &SignalingMessage) {
        let (Some(link), Ok(frame)) = (self.links.get(&transport), message.to_json()) else {
            return;
        };
        let _ = link.send(frame);
    }

    fn deliver_to_peer(&self, peer_id: &str, message: &SignalingMessage) -> bool {
        match self.peers.get(peer_id) {
            Some(&transport) if self.links.contains_key(&transport) => {
                self.deliver(transport, message);
                true
            }
            _ => false,
        }
    }

    fn peer_of(&self, transport: u64) -> Option<String> {
        self.peers
            .iter()
            .find(|(_, &t)| t == transport)
            .map(|(peer, _)| peer.clone())
    }

    fn leave(&mut self, room_id: &str, peer_id: &str) {
        let Some(members) = self.rooms.get_mut(room_id) else {
            return;
        };
        members.retain(|p| p != peer_id);
        let others = members.clone();

        for other in others {
            self.deliver_to_peer(
                &other,
                &SignalingMessage::PeerLeft {
                    room_id: Some(room_id.to_string()),
                    peer_id: peer_id.to_string(),
                },
            );
        }
    }

    fn drop_link(&mut self, transport: u64) {
        self.links.remove(&transport);
        if let Some(peer_id) = self.peer_of(transport) {
            self.peers.remove(&peer_id);
            let rooms: Vec<String> = self.rooms.keys().cloned().collect();
            for room_id in rooms {
                self.leave(&room_id, &peer_id);
            }
        }
    }

    fn route(&mut self, transport: u64, frame: &str) {
        let Ok(message) = SignalingMessage::from_json(frame) else {
            return;
        };

        match message {
            SignalingMessage::JoinRoom { room_id, peer_id } => {
                self.peers.insert(peer_id.clone(), transport);
                let members = self.rooms.entry(room_id.clone()).or_default();
                if !members.contains(&peer_id) {
                    members.push(peer_id.clone());
                }
                let members = members.clone();

                self.deliver(
                    transport,
                    &SignalingMessage::RoomJoined {
                        room_id: room_id.clone(),
                        peer_id: Some(peer_id.clone()),
                        data: RoomMembers {
                            peers: members.clone(),
                        },
                    },
                );
                for other in members.iter().filter(|p| **p != peer_id) {
                    self.deliver_to_peer(
                        other,
                        &SignalingMessage::PeerJoined {
                            room_id: Some(room_id.clone()),
                            peer_id: peer_id.clone(),
                        },
                    );
                }
                if let Some(hook) = &self.on_join {
                    hook(&room_id, &members);
                }
            }

            SignalingMessage::LeaveRoom { room_id, peer_id } => self.leave(&room_id, &peer_id),

            SignalingMessage::Offer { .. }
            | SignalingMessage::Answer { .. }
            | SignalingMessage::IceCandidate { .. } => {
                let from = self.peer_of(transport).unwrap_or_default();
                let kind = message.type_name().to_string();
                let (forwarded, target) = match message {
                    SignalingMessage::Offer { room_id, peer_id, data } => (
                        SignalingMessage::Offer {
                            room_id,
                            peer_id: from.clone(),
                            data,
                        },
                        peer_id,
                    ),
                    SignalingMessage::Answer { room_id, peer_id, data } => (
                        SignalingMessage::Answer {
                            room_id,
                            peer_id: from.clone(),
                            data,
                        },
                        peer_id,
                    ),
                    SignalingMessage::IceCandidate { room_id, peer_id, data } => (
                        SignalingMessage::IceCandidate {
                            room_id,
                            peer_id: from.clone(),
                            data,
                        },
                        peer_id,
                    ),
                    _ => return,
                };

                self.sent.push((kind, from, target.clone()));
                if !self.deliver_to_peer(&target, &forwarded) {
                    self.deliver(
                        transport,
                        &SignalingMessage::Error {
                            room_id: None,
                            peer_id: Some(target.clone()),
                            error: format!("peer {} not found", target),
                        },
                    );
                }
            }

            _ => {}
        }
    }
}

/// Signaling-Server im Prozess: leitet Nachrichten zwischen Transports weiter
#[derive(Clone, Default)]
pub struct LoopbackHub {
    state: Arc<Mutex<HubState>>,
    next_id: Arc<AtomicU64>,
}

impl LoopbackHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ruft `hook` synchron bei jedem `join-room` auf, noch bevor der
    /// Absender weiterläuft
    pub fn on_join(&self, hook: impl Fn(&str, &[String]) + Send + Sync + 'static) {
        self.state.lock().on_join = Some(Arc::new(hook));
    }

    /// Neuer Transport (ein Client)
    pub fn transport(&self) -> Arc<LoopbackTransport> {
        Arc::new(LoopbackTransport {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            hub: self.clone(),
        })
    }

    /// `connect` löst nie auf
    pub fn set_hang_connections(&self, hang: bool) {
        self.state.lock().hang = hang;
    }

    /// `connect` schlägt fehl
    pub fn set_refuse_connections(&self, refuse: bool) {
        self.state.lock().refuse = refuse;
    }

    /// (von, an) aller weitergeleiteten Nachrichten eines Typs
    pub fn sent_of_type(&self, kind: &str) -> Vec<(String, String)> {
        self.state
            .lock()
            .sent
            .iter()
            .filter(|(k, _, _)| k == kind)
            .map(|(_, from, to)| (from.clone(), to.clone()))
            .collect()
    }
}

pub struct LoopbackTransport {
    id: u64,
    hub: LoopbackHub,
}

impl LoopbackTransport {
    /// Stellt einen rohen Frame zu, als käme er vom Server
    pub fn inject(&self, frame: &str) {
        if let Some(link) = self.hub.state.lock().links.get(&self.id) {
            let _ = link.send(frame.to_string());
        }
    }

    /// Trennt die Verbindung serverseitig
    pub fn sever(&self) {
        self.hub.state.lock().drop_link(self.id);
    }
}

#[async_trait]
impl SignalingTransport for LoopbackTransport {
    async fn connect(&self, _url: &str) -> Result<InboundFrames, ConnectionError> {
        let (hang, refuse) = {
            let state = self.hub.state.lock();
            (state.hang, state.refuse)
        };
        if refuse {
            return Err(ConnectionError::ConnectFailed("connection refused".to_string()));
        }
        if hang {
            std::future::pending::<()>().await;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.hub.state.lock().links.insert(self.id, tx);
        Ok(rx)
    }

    fn send(&self, frame: String) -> Result<(), ConnectionError> {
        let mut state = self.hub.state.lock();
        if !state.links.contains_key(&self.id) {
            return Err(ConnectionError::NotConnected);
        }
        state.route(self.id, &frame);
        Ok(())
    }

    async fn disconnect(&self) {
        self.hub.state.lock().drop_link(self.id);
    }
}

// ============================================================================
// FAKE PEER CONNECTIONS
// ============================================================================

/// Aufgezeichnete Aufrufe an einer Fake Peer Connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerOp {
    CreateOffer { ice_restart: bool },
    CreateAnswer,
    SetLocal(SdpType),
    SetRemote(SdpType),
    Rollback,
    AddCandidate(String),
    AddTrack(String),
    ReplaceTrack(String),
    Close,
}

/// Signaling-Zustand einer Peer Connection (ohne pranswer)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeSignaling {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
}

/// Fake Peer Connection mit echten Zustandsübergängen für Offer/Answer
pub struct FakePeer {
    peer_id: String,
    ops: Mutex<Vec<PeerOp>>,
    signaling: Mutex<FakeSignaling>,
    offer_gate: watch::Receiver<bool>,
    answer_gate: watch::Receiver<bool>,
}

impl FakePeer {
    pub fn ops(&self) -> Vec<PeerOp> {
        self.ops.lock().clone()
    }

    pub fn signaling_state(&self) -> FakeSignaling {
        *self.signaling.lock()
    }

    fn record(&self, op: PeerOp) {
        self.ops.lock().push(op);
    }

    /// Wechselt den Zustand, wenn `from` ihn erlaubt
    fn transition(
        &self,
        what: &str,
        from: &[FakeSignaling],
        to: FakeSignaling,
    ) -> Result<(), ConnectionError> {
        let mut state = self.signaling.lock();
        if !from.contains(&*state) {
            return Err(ConnectionError::negotiation(
                &self.peer_id,
                format!("invalid transition from {:?} applying {}", *state, what),
            ));
        }
        *state = to;
        Ok(())
    }
}

#[async_trait]
impl PeerHandle for FakePeer {
    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription, ConnectionError> {
        let mut gate = self.offer_gate.clone();
        let _ = gate.wait_for(|open| *open).await;
        self.record(PeerOp::CreateOffer { ice_restart });
        Ok(SessionDescription::offer("v=0 fake-offer"))
    }

    async fn create_answer(&self) -> Result<SessionDescription, ConnectionError> {
        let mut gate = self.answer_gate.clone();
        let _ = gate.wait_for(|open| *open).await;
        self.record(PeerOp::CreateAnswer);
        if self.signaling_state() != FakeSignaling::HaveRemoteOffer {
            return Err(ConnectionError::negotiation(&self.peer_id, "no remote offer"));
        }
        Ok(SessionDescription::answer("v=0 fake-answer"))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), ConnectionError> {
        self.record(PeerOp::SetLocal(desc.sdp_type));
        match desc.sdp_type {
            SdpType::Offer => self.transition(
                "local offer",
                &[FakeSignaling::Stable, FakeSignaling::HaveLocalOffer],
                FakeSignaling::HaveLocalOffer,
            ),
            SdpType::Answer | SdpType::Pranswer => self.transition(
                "local answer",
                &[FakeSignaling::HaveRemoteOffer],
                FakeSignaling::Stable,
            ),
            SdpType::Rollback => self.transition(
                "local rollback",
                &[FakeSignaling::Stable, FakeSignaling::HaveLocalOffer],
                FakeSignaling::Stable,
            ),
        }
    }

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), ConnectionError> {
        self.record(PeerOp::SetRemote(desc.sdp_type));
        match desc.sdp_type {
            SdpType::Offer => self.transition(
                "remote offer",
                &[FakeSignaling::Stable, FakeSignaling::HaveRemoteOffer],
                FakeSignaling::HaveRemoteOffer,
            ),
            SdpType::Answer | SdpType::Pranswer => self.transition(
                "remote answer",
                &[FakeSignaling::HaveLocalOffer],
                FakeSignaling::Stable,
            ),
            SdpType::Rollback => self.transition(
                "remote rollback",
                &[FakeSignaling::Stable, FakeSignaling::HaveRemoteOffer],
                FakeSignaling::Stable,
            ),
        }
    }

    async fn rollback(&self) -> Result<(), ConnectionError> {
        self.record(PeerOp::Rollback);
        self.transition(
            "rollback",
            &[FakeSignaling::Stable, FakeSignaling::HaveLocalOffer],
            FakeSignaling::Stable,
        )
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), ConnectionError> {
        self.record(PeerOp::AddCandidate(candidate.candidate));
        Ok(())
    }

    async fn add_track(&self, track: &MediaTrack) -> Result<(), ConnectionError> {
        self.record(PeerOp::AddTrack(track.id().to_string()));
        Ok(())
    }

    async fn replace_track(&self, track: &MediaTrack) -> Result<(), ConnectionError> {
        self.record(PeerOp::ReplaceTrack(track.id().to_string()));
        Ok(())
    }

    async fn close(&self) {
        self.record(PeerOp::Close);
    }
}

/// Erzeugt [`FakePeer`]s und merkt sich den jeweils letzten pro Peer-ID
pub struct FakeConnector {
    peers: Mutex<HashMap<String, (Arc<FakePeer>, PeerSignalSender)>>,
    offers_open: watch::Sender<bool>,
    answers_open: watch::Sender<bool>,
}

impl FakeConnector {
    pub fn new() -> Self {
        let (offers_open, _) = watch::channel(true);
        let (answers_open, _) = watch::channel(true);
        Self {
            peers: Mutex::new(HashMap::new()),
            offers_open,
            answers_open,
        }
    }

    pub fn peer(&self, peer_id: &str) -> Option<Arc<FakePeer>> {
        self.peers.lock().get(peer_id).map(|(p, _)| Arc::clone(p))
    }

    pub fn signals(&self, peer_id: &str) -> Option<PeerSignalSender> {
        self.peers.lock().get(peer_id).map(|(_, s)| s.clone())
    }

    /// `create_offer` wartet bis `release_offers`
    pub fn hold_offers(&self) {
        self.offers_open.send_replace(false);
    }

    pub fn release_offers(&self) {
        self.offers_open.send_replace(true);
    }

    /// `create_answer` wartet bis `release_answers`
    pub fn hold_answers(&self) {
        self.answers_open.send_replace(false);
    }

    pub fn release_answers(&self) {
        self.answers_open.send_replace(true);
    }
}

#[async_trait]
impl PeerConnector for FakeConnector {
    async fn create(
        &self,
        peer_id: &str,
        signals: PeerSignalSender,
    ) -> Result<Arc<dyn PeerHandle>, ConnectionError> {
        let peer = Arc::new(FakePeer {
            peer_id: peer_id.to_string(),
            ops: Mutex::new(Vec::new()),
            signaling: Mutex::new(FakeSignaling::Stable),
            offer_gate: self.offers_open.subscribe(),
            answer_gate: self.answers_open.subscribe(),
        });
        self.peers
            .lock()
            .insert(peer_id.to_string(), (Arc::clone(&peer), signals));
        Ok(peer)
    }
}

/// Verbundener ConnectionManager, der `room` als `peer_id` betreten hat
pub async fn test_peer(
    hub: &LoopbackHub,
    peer_id: &str,
    settings: ConnectionSettings,
) -> (ConnectionManager, Arc<FakeConnector>, RtcEventBus) {
    let bus = RtcEventBus::new();
    let connector = Arc::new(FakeConnector::new());
    let manager = ConnectionManager::new(
        SignalingClient::new(hub.transport()),
        connector.clone(),
        StreamManager::new(bus.clone()),
        bus.clone(),
        settings,
    );

    manager.connect("ws://hub").await.unwrap();
    manager.join_room("room", peer_id).await.unwrap();
    settle().await;

    (manager, connector, bus)
}
