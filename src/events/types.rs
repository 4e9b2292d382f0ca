//! Event-Typen des Call-Cores

use super::bus::BusEvent;
use crate::codec::CodecState;
use crate::connection::{ConnectionState, PeerState};
use crate::filter::FilterType;
use crate::media::{MediaStream, TrackKind};
use crate::record::RecordingState;
use crate::signaling::{IceCandidate, SignalingMessage};

/// Herkunft eines Fehler-Events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorSource {
    Signaling,
    Connection,
    Media,
    Codec,
    Filter,
    Record,
    Storage,
}

/// Alle Events, die über den gemeinsamen Bus laufen
#[derive(Debug, Clone)]
pub enum RtcEvent {
    /// Globaler Verbindungsstatus hat sich geändert
    ConnectionStateChanged(ConnectionState),

    /// Rohe eingehende Signaling-Nachricht (in Ankunftsreihenfolge)
    SignalingMessage(SignalingMessage),

    /// Raum betreten, `peers` sind die bereits anwesenden Teilnehmer
    RoomJoined { room_id: String, peers: Vec<String> },

    /// Raum verlassen
    RoomLeft { room_id: String },

    /// Ein Teilnehmer hat den Raum betreten
    PeerJoined { peer_id: String },

    /// Ein Teilnehmer hat den Raum verlassen
    PeerLeft { peer_id: String },

    /// Status einer Peer Connection
    PeerStateChanged { peer_id: String, state: PeerState },

    /// Lokal gefundener ICE Candidate (wird sofort gesendet)
    IceCandidate {
        peer_id: String,
        candidate: IceCandidate,
    },

    /// Neuer lokaler Stream
    LocalStream(MediaStream),

    /// Lokaler Stream wurde freigegeben
    LocalStreamStopped,

    /// Mute-Status (true = stumm)
    MuteChanged(bool),

    /// Video-Status (true = Kamera aktiv)
    VideoChanged(bool),

    /// Eingabegerät gewechselt
    DeviceSwitched { kind: TrackKind, device_id: String },

    /// Remote Stream hinzugefügt oder um Tracks erweitert
    StreamAdded { peer_id: String, stream: MediaStream },

    /// Remote Stream entfernt
    StreamRemoved { peer_id: String },

    EncoderStateChanged(CodecState),
    DecoderStateChanged(CodecState),

    /// Filter gesetzt oder ersetzt
    FilterApplied(FilterType),

    /// Filter gelöscht
    FilterRemoved(FilterType),

    /// Filter (de)aktiviert
    FilterToggled { filter_type: FilterType, enabled: bool },

    RecordingStateChanged(RecordingState),

    /// Bildschirmfreigabe gestartet
    ScreenShareStarted(MediaStream),

    /// Bildschirmfreigabe beendet
    ScreenShareStopped,

    /// Fehler für passive Beobachter
    Error { source: ErrorSource, message: String },
}

/// Schlüssel für `on`/`off`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RtcEventKind {
    ConnectionStateChanged,
    SignalingMessage,
    RoomJoined,
    RoomLeft,
    PeerJoined,
    PeerLeft,
    PeerStateChanged,
    IceCandidate,
    LocalStream,
    LocalStreamStopped,
    MuteChanged,
    VideoChanged,
    DeviceSwitched,
    StreamAdded,
    StreamRemoved,
    EncoderStateChanged,
    DecoderStateChanged,
    FilterApplied,
    FilterRemoved,
    FilterToggled,
    RecordingStateChanged,
    ScreenShareStarted,
    ScreenShareStopped,
    Error,
}

impl RtcEventKind {
    /// Name des Events, wie er in Logs erscheint
    pub fn as_str(&self) -> &'static str {
        match self {
            RtcEventKind::ConnectionStateChanged => "connection-state-changed",
            RtcEventKind::SignalingMessage => "signaling-message",
            RtcEventKind::RoomJoined => "room-joined",
            RtcEventKind::RoomLeft => "room-left",
            RtcEventKind::PeerJoined => "peer-joined",
            RtcEventKind::PeerLeft => "peer-left",
            RtcEventKind::PeerStateChanged => "peer-state-changed",
            RtcEventKind::IceCandidate => "ice-candidate",
            RtcEventKind::LocalStream => "local-stream",
            RtcEventKind::LocalStreamStopped => "local-stream-stopped",
            RtcEventKind::MuteChanged => "mute-changed",
            RtcEventKind::VideoChanged => "video-changed",
            RtcEventKind::DeviceSwitched => "device-switched",
            RtcEventKind::StreamAdded => "stream-added",
            RtcEventKind::StreamRemoved => "stream-removed",
            RtcEventKind::EncoderStateChanged => "encoder-state-changed",
            RtcEventKind::DecoderStateChanged => "decoder-state-changed",
            RtcEventKind::FilterApplied => "filter-applied",
            RtcEventKind::FilterRemoved => "filter-removed",
            RtcEventKind::FilterToggled => "filter-toggled",
            RtcEventKind::RecordingStateChanged => "recording-state-changed",
            RtcEventKind::ScreenShareStarted => "screen-share-started",
            RtcEventKind::ScreenShareStopped => "screen-share-stopped",
            RtcEventKind::Error => "error",
        }
    }
}

impl BusEvent for RtcEvent {
    type Kind = RtcEventKind;

    fn kind(&self) -> RtcEventKind {
        match self {
            RtcEvent::ConnectionStateChanged(_) => RtcEventKind::ConnectionStateChanged,
            RtcEvent::SignalingMessage(_) => RtcEventKind::SignalingMessage,
            RtcEvent::RoomJoined { .. } => RtcEventKind::RoomJoined,
            RtcEvent::RoomLeft { .. } => RtcEventKind::RoomLeft,
            RtcEvent::PeerJoined { .. } => RtcEventKind::PeerJoined,
            RtcEvent::PeerLeft { .. } => RtcEventKind::PeerLeft,
            RtcEvent::PeerStateChanged { .. } => RtcEventKind::PeerStateChanged,
            RtcEvent::IceCandidate { .. } => RtcEventKind::IceCandidate,
            RtcEvent::LocalStream(_) => RtcEventKind::LocalStream,
            RtcEvent::LocalStreamStopped => RtcEventKind::LocalStreamStopped,
            RtcEvent::MuteChanged(_) => RtcEventKind::MuteChanged,
            RtcEvent::VideoChanged(_) => RtcEventKind::VideoChanged,
            RtcEvent::DeviceSwitched { .. } => RtcEventKind::DeviceSwitched,
            RtcEvent::StreamAdded { .. } => RtcEventKind::StreamAdded,
            RtcEvent::StreamRemoved { .. } => RtcEventKind::StreamRemoved,
            RtcEvent::EncoderStateChanged(_) => RtcEventKind::EncoderStateChanged,
            RtcEvent::DecoderStateChanged(_) => RtcEventKind::DecoderStateChanged,
            RtcEvent::FilterApplied(_) => RtcEventKind::FilterApplied,
            RtcEvent::FilterRemoved(_) => RtcEventKind::FilterRemoved,
            RtcEvent::FilterToggled { .. } => RtcEventKind::FilterToggled,
            RtcEvent::RecordingStateChanged(_) => RtcEventKind::RecordingStateChanged,
            RtcEvent::ScreenShareStarted(_) => RtcEventKind::ScreenShareStarted,
            RtcEvent::ScreenShareStopped => RtcEventKind::ScreenShareStopped,
            RtcEvent::Error { .. } => RtcEventKind::Error,
        }
    }
}

impl RtcEvent {
    /// Baut ein Fehler-Event
    pub fn error(source: ErrorSource, message: impl Into<String>) -> Self {
        RtcEvent::Error {
            source,
            message: message.into(),
        }
    }
}
