//! WebRTC Peer Connection
//!
//! Anbindung von [`PeerHandle`] an das `webrtc` crate.

use super::peer::{PeerConnector, PeerHandle, PeerSignal, PeerSignalSender, PeerState};
use crate::media::{MediaTrack, TrackKind, TrackSource};
use crate::signaling::{ConnectionError, IceCandidate, SdpType, SessionDescription};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

/// Stream-ID für alle lokalen Tracks
const LOCAL_STREAM_ID: &str = "pulse-rtc";

// ============================================================================
// ICE SERVER CONFIGURATION
// ============================================================================

/// STUN/TURN Server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

/// Standard STUN Server Konfiguration
pub fn default_ice_servers() -> Vec<IceServerConfig> {
    vec![IceServerConfig {
        urls: vec![
            "stun:stun.l.google.com:19302".to_string(),
            "stun:stun1.l.google.com:19302".to_string(),
            "stun:stun2.l.google.com:19302".to_string(),
        ],
        username: None,
        credential: None,
    }]
}

impl From<&IceServerConfig> for RTCIceServer {
    fn from(server: &IceServerConfig) -> Self {
        RTCIceServer {
            urls: server.urls.clone(),
            username: server.username.clone().unwrap_or_default(),
            credential: server.credential.clone().unwrap_or_default(),
            ..Default::default()
        }
    }
}

// ============================================================================
// CONNECTOR
// ============================================================================

/// Erzeugt WebRTC Peer Connections
pub struct WebRtcConnector {
    ice_servers: Vec<RTCIceServer>,
}

impl WebRtcConnector {
    pub fn new(ice_servers: &[IceServerConfig]) -> Self {
        Self {
            ice_servers: ice_servers.iter().map(RTCIceServer::from).collect(),
        }
    }
}

#[async_trait]
impl PeerConnector for WebRtcConnector {
    async fn create(
        &self,
        peer_id: &str,
        signals: PeerSignalSender,
    ) -> Result<Arc<dyn PeerHandle>, ConnectionError> {
        // Media Engine mit Standard-Codecs
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| ConnectionError::negotiation(peer_id, e))?;

        // Interceptors für RTCP, NACK etc.
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| ConnectionError::negotiation(peer_id, e))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        };

        let pc = Arc::new(
            api.new_peer_connection(config)
                .await
                .map_err(|e| ConnectionError::negotiation(peer_id, e))?,
        );

        WebRtcPeer::install_handlers(&pc, signals);

        Ok(Arc::new(WebRtcPeer {
            peer_id: peer_id.to_string(),
            pc,
            senders: Mutex::new(HashMap::new()),
        }))
    }
}

impl std::fmt::Debug for WebRtcConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebRtcConnector")
            .field("ice_servers", &self.ice_servers.len())
            .finish()
    }
}

// ============================================================================
// PEER
// ============================================================================

struct WebRtcPeer {
    peer_id: String,
    pc: Arc<RTCPeerConnection>,
    senders: Mutex<HashMap<TrackKind, Arc<RTCRtpSender>>>,
}

impl WebRtcPeer {
    /// Registriert Event Handler für die Peer Connection
    fn install_handlers(pc: &Arc<RTCPeerConnection>, signals: PeerSignalSender) {
        // Connection State Handler
        let tx = signals.clone();
        pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            tracing::info!("Peer connection state ({}): {:?}", tx.peer_id(), s);

            let state = match s {
                RTCPeerConnectionState::New => Some(PeerState::New),
                RTCPeerConnectionState::Connecting => Some(PeerState::Connecting),
                RTCPeerConnectionState::Connected => Some(PeerState::Connected),
                RTCPeerConnectionState::Disconnected => Some(PeerState::Disconnected),
                RTCPeerConnectionState::Closed => Some(PeerState::Closed),
                // Failed wird über den ICE-Status gemeldet
                _ => None,
            };
            if let Some(state) = state {
                tx.send(PeerSignal::StateChanged(state));
            }

            Box::pin(async {})
        }));

        // ICE Connection State Handler
        let tx = signals.clone();
        pc.on_ice_connection_state_change(Box::new(move |s: RTCIceConnectionState| {
            if s == RTCIceConnectionState::Failed {
                tx.send(PeerSignal::IceFailed);
            }
            Box::pin(async {})
        }));

        // ICE Candidate Handler (Trickle)
        let tx = signals.clone();
        pc.on_ice_candidate(Box::new(move |candidate| {
            if let Some(c) = candidate {
                match c.to_json() {
                    Ok(init) => tx.send(PeerSignal::LocalCandidate(IceCandidate {
                        candidate: init.candidate,
                        sdp_mid: init.sdp_mid,
                        sdp_m_line_index: init.sdp_mline_index,
                        username_fragment: init.username_fragment,
                    })),
                    Err(e) => tracing::warn!("Failed to serialize ICE candidate: {}", e),
                }
            }
            Box::pin(async {})
        }));

        // Track Handler (eingehende Medien)
        let tx = signals;
        pc.on_track(Box::new(move |track, _, _| {
            let kind = match track.kind() {
                RTPCodecType::Video => TrackKind::Video,
                _ => TrackKind::Audio,
            };
            let track_id = track.id().to_string();
            let remote = MediaTrack::remote(track_id.clone(), kind, track.stream_id().to_string());
            tracing::info!("Received {:?} track {}", kind, track_id);
            tx.send(PeerSignal::TrackAdded(remote));

            // Der Track endet, sobald sein Receiver stoppt (EOF beim Lesen)
            let tx = tx.clone();
            tokio::spawn(async move {
                while track.read_rtp().await.is_ok() {}
                tracing::info!("Remote track {} ended", track_id);
                tx.send(PeerSignal::TrackRemoved(track_id));
            });
            Box::pin(async {})
        }));
    }

    fn to_rtc(&self, desc: SessionDescription) -> Result<RTCSessionDescription, ConnectionError> {
        let parsed = match desc.sdp_type {
            SdpType::Offer => RTCSessionDescription::offer(desc.sdp),
            SdpType::Answer => RTCSessionDescription::answer(desc.sdp),
            SdpType::Pranswer => RTCSessionDescription::pranswer(desc.sdp),
            SdpType::Rollback => return self.rollback_description(desc.sdp),
        };
        parsed.map_err(|e| ConnectionError::negotiation(&self.peer_id, e))
    }

    /// Rollback-Beschreibung. `webrtc` parst auch hier die SDP, daher muss sie
    /// die zurückgenommene Beschreibung tragen.
    fn rollback_description(&self, sdp: String) -> Result<RTCSessionDescription, ConnectionError> {
        serde_json::from_value(serde_json::json!({ "type": "rollback", "sdp": sdp }))
            .map_err(|e| ConnectionError::negotiation(&self.peer_id, e))
    }

    fn local_track(track: &MediaTrack) -> Arc<TrackLocalStaticSample> {
        let capability = match track.kind() {
            TrackKind::Audio => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_string(),
                clock_rate: 48000,
                channels: 2,
                ..Default::default()
            },
            TrackKind::Video => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_string(),
                clock_rate: 90000,
                ..Default::default()
            },
        };
        let stream_id = match track.source() {
            TrackSource::Display => format!("{}-screen", LOCAL_STREAM_ID),
            _ => LOCAL_STREAM_ID.to_string(),
        };
        Arc::new(TrackLocalStaticSample::new(
            capability,
            track.id().to_string(),
            stream_id,
        ))
    }
}

#[async_trait]
impl PeerHandle for WebRtcPeer {
    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription, ConnectionError> {
        let options = ice_restart.then(|| RTCOfferOptions {
            ice_restart: true,
            ..Default::default()
        });
        let offer = self
            .pc
            .create_offer(options)
            .await
            .map_err(|e| ConnectionError::negotiation(&self.peer_id, e))?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription, ConnectionError> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| ConnectionError::negotiation(&self.peer_id, e))?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), ConnectionError> {
        let desc = self.to_rtc(desc)?;
        self.pc
            .set_local_description(desc)
            .await
            .map_err(|e| ConnectionError::negotiation(&self.peer_id, e))
    }

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), ConnectionError> {
        let desc = self.to_rtc(desc)?;
        self.pc
            .set_remote_description(desc)
            .await
            .map_err(|e| ConnectionError::negotiation(&self.peer_id, e))
    }

    async fn rollback(&self) -> Result<(), ConnectionError> {
        let Some(pending) = self.pc.pending_local_description().await else {
            tracing::debug!("Nothing to roll back for {}", self.peer_id);
            return Ok(());
        };

        let desc = self.rollback_description(pending.sdp)?;
        self.pc
            .set_local_description(desc)
            .await
            .map_err(|e| ConnectionError::negotiation(&self.peer_id, e))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), ConnectionError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_m_line_index,
            username_fragment: candidate.username_fragment,
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| ConnectionError::negotiation(&self.peer_id, e))
    }

    async fn add_track(&self, track: &MediaTrack) -> Result<(), ConnectionError> {
        let local = Self::local_track(track);
        let sender = self
            .pc
            .add_track(local as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| ConnectionError::negotiation(&self.peer_id, e))?;
        self.senders.lock().insert(track.kind(), sender);
        Ok(())
    }

    async fn replace_track(&self, track: &MediaTrack) -> Result<(), ConnectionError> {
        let sender = self.senders.lock().get(&track.kind()).cloned();
        let Some(sender) = sender else {
            return self.add_track(track).await;
        };

        let local = Self::local_track(track);
        sender
            .replace_track(Some(local as Arc<dyn TrackLocal + Send + Sync>))
            .await
            .map_err(|e| ConnectionError::negotiation(&self.peer_id, e))
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            tracing::debug!("Closing peer connection {} failed: {}", self.peer_id, e);
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
