//! Pulse RTC - Echtzeit Audio/Video Call-Core
//!
//! Bausteine eines Anrufs hinter einer gemeinsamen Fassade:
//! - Signaling über austauschbaren Transport (WebSocket als Standard)
//! - WebRTC Peer Connections mit Trickle ICE und Glare-Auflösung
//! - Lokale Medien, Bildschirmfreigabe, Remote Streams
//! - Codec-Pipeline (Hardware bevorzugt, Software als Fallback)
//! - Video-Filterkette und Aufnahmen
//! - SQLite oder In-Memory für Anrufhistorie, Einstellungen, Aufnahmen

pub mod codec;
pub mod config;
pub mod connection;
pub mod events;
pub mod filter;
pub mod media;
pub mod record;
pub mod signaling;
pub mod storage;

#[cfg(test)]
mod testing;

pub use config::{ConfigError, RtcConfig};
pub use events::{ErrorSource, RtcEvent, RtcEventBus, RtcEventKind, SubscriptionId};

use chrono::{DateTime, Utc};
use codec::{CodecError, CodecManager, HardwareCodecs, NoHardwareCodecs};
use connection::{ConnectionManager, PeerConnector, WebRtcConnector};
use filter::{FilterError, FilterManager};
use media::{
    create_media_backend, MediaBackend, MediaConstraints, MediaError, MediaManager, MediaStream,
    ScreenShareManager, StreamManager, TrackKind,
};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use record::{save_artifact, RecordError, RecordManager, RecordingArtifact};
use signaling::{ConnectionError, SignalingClient, SignalingError, SignalingTransport, WebSocketTransport};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use storage::{
    open_storage, CallHistory, CallStatus, CallType, NewCallRecord, Recording, StorageAdapter,
    StorageError,
};
use thiserror::Error;
use tokio::sync::broadcast;

/// Standard-Filter für `init_logging`
pub const DEFAULT_LOG_DIRECTIVE: &str = "pulse_rtc=debug,webrtc=warn";

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum RtcError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Signaling(#[from] SignalingError),

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error(transparent)]
    Record(#[from] RecordError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("A call is already active in room {0}")]
    CallInProgress(String),

    #[error("Instance has been destroyed")]
    Destroyed,
}

// ============================================================================
// LOGGING
// ============================================================================

static LOGGING: OnceCell<()> = OnceCell::new();

/// Installiert einen `tracing` Subscriber (einmalig)
///
/// `RUST_LOG` hat Vorrang vor `default_directive`. Hat die einbettende
/// Anwendung bereits einen Subscriber gesetzt, bleibt dieser aktiv.
pub fn init_logging(default_directive: &str) {
    LOGGING.get_or_init(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .or_else(|_| tracing_subscriber::EnvFilter::try_new(default_directive))
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_DIRECTIVE));

        if tracing_subscriber::fmt()
            .with_env_filter(filter)
            .try_init()
            .is_err()
        {
            tracing::debug!("Global tracing subscriber already installed");
        }
    });
}

// ============================================================================
// FACADE
// ============================================================================

/// Plattform-Anbindungen, aus denen die Fassade gebaut wird
pub struct RtcParts {
    pub config: RtcConfig,
    pub transport: Arc<dyn SignalingTransport>,
    pub connector: Arc<dyn PeerConnector>,
    pub media_backend: Arc<dyn MediaBackend>,
    pub hardware: Arc<dyn HardwareCodecs>,
    /// Bereits initialisiert
    pub storage: Arc<dyn StorageAdapter>,
}

#[derive(Debug, Clone)]
struct ActiveCall {
    room_id: String,
    call_type: CallType,
    started_at: DateTime<Utc>,
    participants: BTreeSet<String>,
}

/// Ein Call-Core: alle Manager über einem gemeinsamen Event-Bus
pub struct PulseRtc {
    config: RtcConfig,
    bus: RtcEventBus,
    connection: ConnectionManager,
    media: MediaManager,
    screen_share: ScreenShareManager,
    codec: CodecManager,
    filter: FilterManager,
    record: RecordManager,
    storage: Arc<dyn StorageAdapter>,
    call: Arc<Mutex<Option<ActiveCall>>>,
    destroyed: AtomicBool,
}

impl PulseRtc {
    /// Baut den Core mit WebSocket-Signaling, WebRTC und dem konfigurierten
    /// Storage-/Media-Backend
    pub async fn new(config: RtcConfig) -> Result<Self, RtcError> {
        config.validate()?;

        tracing::info!("Initializing Pulse RTC...");

        let storage = open_storage(&config.storage).await?;
        let media_backend = create_media_backend(config.media_backend)?;

        let parts = RtcParts {
            transport: Arc::new(WebSocketTransport::new()),
            connector: Arc::new(WebRtcConnector::new(&config.ice_servers)),
            media_backend,
            hardware: Arc::new(NoHardwareCodecs),
            storage,
            config,
        };
        Ok(Self::with_parts(parts))
    }

    /// Baut den Core aus vorgegebenen Anbindungen
    pub fn with_parts(parts: RtcParts) -> Self {
        let RtcParts {
            config,
            transport,
            connector,
            media_backend,
            hardware,
            storage,
        } = parts;

        let bus = RtcEventBus::new();
        let streams = StreamManager::new(bus.clone());
        let connection = ConnectionManager::new(
            SignalingClient::new(transport),
            connector,
            streams,
            bus.clone(),
            config.connection_settings(),
        );

        let media = MediaManager::new(Arc::clone(&media_backend), bus.clone());
        media.attach_connection(connection.downgrade());

        let call: Arc<Mutex<Option<ActiveCall>>> = Arc::new(Mutex::new(None));
        Self::track_participants(&bus, &call);

        Self {
            screen_share: ScreenShareManager::new(media_backend, bus.clone()),
            codec: CodecManager::new(hardware, bus.clone()),
            filter: FilterManager::new(bus.clone()),
            record: RecordManager::new(bus.clone()),
            config,
            bus,
            connection,
            media,
            storage,
            call,
            destroyed: AtomicBool::new(false),
        }
    }

    /// Merkt sich alle Teilnehmer des laufenden Anrufs für die Historie
    fn track_participants(bus: &RtcEventBus, call: &Arc<Mutex<Option<ActiveCall>>>) {
        let joined = Arc::clone(call);
        bus.on(RtcEventKind::RoomJoined, move |event| {
            if let RtcEvent::RoomJoined { room_id, peers } = event {
                if let Some(call) = joined.lock().as_mut() {
                    if &call.room_id == room_id {
                        call.participants.extend(peers.iter().cloned());
                    }
                }
            }
        });

        let peer = Arc::clone(call);
        bus.on(RtcEventKind::PeerJoined, move |event| {
            if let RtcEvent::PeerJoined { peer_id } = event {
                if let Some(call) = peer.lock().as_mut() {
                    call.participants.insert(peer_id.clone());
                }
            }
        });
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn config(&self) -> &RtcConfig {
        &self.config
    }

    pub fn events(&self) -> &RtcEventBus {
        &self.bus
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn media(&self) -> &MediaManager {
        &self.media
    }

    pub fn stream(&self) -> &StreamManager {
        self.connection.stream_manager()
    }

    pub fn screen_share(&self) -> &ScreenShareManager {
        &self.screen_share
    }

    pub fn codec(&self) -> &CodecManager {
        &self.codec
    }

    pub fn filter(&self) -> &FilterManager {
        &self.filter
    }

    pub fn record(&self) -> &RecordManager {
        &self.record
    }

    pub fn database(&self) -> &Arc<dyn StorageAdapter> {
        &self.storage
    }

    /// Raum des laufenden Anrufs
    pub fn active_room(&self) -> Option<String> {
        self.call.lock().as_ref().map(|c| c.room_id.clone())
    }

    // ------------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------------

    pub fn on<F>(&self, kind: RtcEventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&RtcEvent) + Send + Sync + 'static,
    {
        self.bus.on(kind, handler)
    }

    pub fn off(&self, kind: RtcEventKind, id: SubscriptionId) -> bool {
        self.bus.off(kind, id)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RtcEvent> {
        self.bus.subscribe()
    }

    // ------------------------------------------------------------------------
    // Call flow
    // ------------------------------------------------------------------------

    fn ensure_alive(&self) -> Result<(), RtcError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(RtcError::Destroyed);
        }
        Ok(())
    }

    /// Verbindet mit dem konfigurierten Signaling-Server
    pub async fn connect(&self) -> Result<(), RtcError> {
        self.ensure_alive()?;
        self.connection.connect(&self.config.signaling_url).await?;
        Ok(())
    }

    /// Erfasst lokale Medien und betritt den Raum
    ///
    /// Schlägt der Beitritt fehl, wird der lokale Stream wieder freigegeben.
    pub async fn start_call(
        &self,
        room_id: &str,
        peer_id: &str,
        constraints: MediaConstraints,
    ) -> Result<MediaStream, RtcError> {
        self.ensure_alive()?;
        if let Some(room) = self.active_room() {
            return Err(RtcError::CallInProgress(room));
        }

        let stream = self.media.get_user_media(constraints).await?;

        let call_type = if stream.first_track(TrackKind::Video).is_some() {
            CallType::Video
        } else {
            CallType::Audio
        };

        // Vor dem Beitritt, damit `room-joined` die Teilnehmer schon eintragen kann
        *self.call.lock() = Some(ActiveCall {
            room_id: room_id.to_string(),
            call_type,
            started_at: Utc::now(),
            participants: BTreeSet::from([peer_id.to_string()]),
        });

        if let Err(e) = self.connection.join_room(room_id, peer_id).await {
            tracing::error!("Failed to start call in {}: {}", room_id, e);
            self.call.lock().take();
            self.media.stop_local_stream().await;
            return Err(e.into());
        }

        tracing::info!("Call started in room {} as {}", room_id, peer_id);
        Ok(stream)
    }

    /// Beendet den laufenden Anruf und speichert ihn in der Historie
    ///
    /// Eine laufende Aufnahme wird beendet, geschrieben und dem Anruf
    /// zugeordnet. Ohne laufenden Anruf `Ok(None)`.
    pub async fn end_call(&self, status: CallStatus) -> Result<Option<CallHistory>, RtcError> {
        let Some(call) = self.call.lock().take() else {
            return Ok(None);
        };

        match self.connection.leave_room().await {
            Ok(()) | Err(ConnectionError::NotInRoom) => {}
            Err(e) => tracing::warn!("Leaving room {} failed: {}", call.room_id, e),
        }
        self.media.stop_local_stream().await;
        self.screen_share.stop_screen_share();

        let saved = self
            .storage
            .save_call_record(NewCallRecord {
                room_id: Some(call.room_id.clone()),
                participants: call.participants.into_iter().collect(),
                start_time: call.started_at,
                end_time: Some(Utc::now()),
                call_type: call.call_type,
                status,
            })
            .await
            .map_err(|e| self.storage_failed(e))?;

        tracing::info!(
            "Call in room {} ended after {} ms",
            call.room_id,
            saved.duration_ms.unwrap_or_default()
        );

        if self.record.state() != record::RecordingState::Inactive {
            let mut artifact = self.record.stop_recording()?;
            artifact.call_history_id = Some(saved.id.clone());
            self.save_recording(&artifact).await?;
        }

        Ok(Some(saved))
    }

    /// Schreibt eine Aufnahme ins Aufnahme-Verzeichnis und legt den Datensatz an
    pub async fn save_recording(&self, artifact: &RecordingArtifact) -> Result<Recording, RtcError> {
        let new_recording = save_artifact(self.config.recordings_dir(), artifact).await?;
        let recording = self
            .storage
            .save_recording(new_recording)
            .await
            .map_err(|e| self.storage_failed(e))?;
        Ok(recording)
    }

    fn storage_failed(&self, err: StorageError) -> RtcError {
        tracing::error!("Storage error: {}", err);
        self.bus
            .emit(RtcEvent::error(ErrorSource::Storage, err.to_string()));
        err.into()
    }

    /// Baut alles ab. Mehrfacher Aufruf ist ein No-Op.
    pub async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        tracing::info!("Destroying Pulse RTC instance");

        if let Err(e) = self.end_call(CallStatus::Success).await {
            tracing::warn!("Could not finish active call: {}", e);
        }
        if self.record.state() != record::RecordingState::Inactive {
            if let Err(e) = self.record.stop_recording() {
                tracing::warn!("Could not stop recording: {}", e);
            }
        }

        self.screen_share.stop_screen_share();
        self.media.stop_local_stream().await;
        self.codec.stop_encoding();
        self.codec.stop_decoding();
        self.filter.clear_filters();
        self.connection.disconnect().await;

        if let Err(e) = self.storage.close().await {
            tracing::warn!("Closing storage failed: {}", e);
        }

        self.bus.clear();
    }
}

impl std::fmt::Debug for PulseRtc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PulseRtc")
            .field("connection", &self.connection)
            .field("storage", &self.storage.name())
            .field("active_room", &self.active_room())
            .field("destroyed", &self.destroyed.load(Ordering::SeqCst))
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionSettings, ConnectionState};
    use crate::media::VirtualMediaBackend;
    use crate::record::RecordingOptions;
    use crate::storage::{MemoryStorage, Page, StorageBackend};
    use crate::testing::{settle, test_peer, FakeConnector, LoopbackHub};

    async fn facade(hub: &LoopbackHub, recordings: &std::path::Path) -> PulseRtc {
        let storage: Arc<dyn StorageAdapter> = Arc::new(MemoryStorage::new());
        storage.initialize().await.unwrap();

        let config = RtcConfig {
            signaling_url: "ws://hub".to_string(),
            storage: StorageBackend::Memory,
            recordings_dir: Some(recordings.to_path_buf()),
            ..Default::default()
        };

        PulseRtc::with_parts(RtcParts {
            config,
            transport: hub.transport(),
            connector: Arc::new(FakeConnector::new()),
            media_backend: Arc::new(VirtualMediaBackend::new()),
            hardware: Arc::new(NoHardwareCodecs),
            storage,
        })
    }

    #[tokio::test]
    async fn test_call_is_saved_with_participants() {
        let dir = tempfile::tempdir().unwrap();
        let hub = LoopbackHub::new();
        let rtc = facade(&hub, dir.path()).await;

        rtc.connect().await.unwrap();
        let stream = rtc
            .start_call("room", "a", MediaConstraints::audio_only())
            .await
            .unwrap();
        assert!(stream.first_track(TrackKind::Audio).is_some());
        assert!(matches!(
            rtc.start_call("room", "a", MediaConstraints::audio_only())
                .await,
            Err(RtcError::CallInProgress(_))
        ));

        let (_b, _, _) = test_peer(&hub, "b", ConnectionSettings::default()).await;
        settle().await;
        assert_eq!(rtc.connection().peer_ids(), vec!["b".to_string()]);

        let saved = rtc.end_call(CallStatus::Success).await.unwrap().unwrap();
        assert_eq!(saved.room_id.as_deref(), Some("room"));
        assert_eq!(saved.participants, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(saved.call_type, CallType::Audio);
        assert!(saved.duration_ms.is_some());

        assert!(rtc.media().local_stream().is_none());
        assert!(rtc.connection().peer_ids().is_empty());
        assert!(rtc.end_call(CallStatus::Success).await.unwrap().is_none());

        let history = rtc.database().get_call_history(Page::default()).await.unwrap();
        assert_eq!(history, vec![saved]);
    }

    #[tokio::test]
    async fn test_members_reported_during_join_are_kept() {
        let dir = tempfile::tempdir().unwrap();
        let hub = LoopbackHub::new();
        let (_b, _, _) = test_peer(&hub, "b", ConnectionSettings::default()).await;
        let (_c, _, _) = test_peer(&hub, "c", ConnectionSettings::default()).await;

        let rtc = facade(&hub, dir.path()).await;
        rtc.connect().await.unwrap();

        // room-joined wird verarbeitet, bevor start_call zurückkehrt
        let bus = rtc.events().clone();
        hub.on_join(move |room_id, members| {
            bus.emit(RtcEvent::RoomJoined {
                room_id: room_id.to_string(),
                peers: members.iter().filter(|p| *p != "a").cloned().collect(),
            });
        });

        rtc.start_call("room", "a", MediaConstraints::audio_only())
            .await
            .unwrap();
        let saved = rtc.end_call(CallStatus::Success).await.unwrap().unwrap();

        assert_eq!(
            saved.participants,
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
    }

    #[tokio::test]
    async fn test_failed_join_clears_call() {
        let dir = tempfile::tempdir().unwrap();
        let hub = LoopbackHub::new();
        let rtc = facade(&hub, dir.path()).await;

        assert!(rtc
            .start_call("room", "a", MediaConstraints::audio_only())
            .await
            .is_err());
        assert_eq!(rtc.active_room(), None);
        assert!(rtc.media().local_stream().is_none());
    }

    #[tokio::test]
    async fn test_end_call_stores_running_recording() {
        let dir = tempfile::tempdir().unwrap();
        let hub = LoopbackHub::new();
        let rtc = facade(&hub, dir.path()).await;

        rtc.connect().await.unwrap();
        rtc.start_call("room", "a", MediaConstraints::default())
            .await
            .unwrap();
        rtc.record()
            .start_recording(RecordingOptions::default())
            .unwrap();
        rtc.record().push_data(vec![1u8, 2, 3]).unwrap();

        let saved = rtc.end_call(CallStatus::Success).await.unwrap().unwrap();
        let recordings = rtc.database().get_recordings_by_call(&saved.id).await.unwrap();

        assert_eq!(recordings.len(), 1);
        assert_eq!(recordings[0].file_size, 3);
        assert!(recordings[0].file_path.starts_with(dir.path().to_str().unwrap()));
        assert_eq!(rtc.record().state(), record::RecordingState::Inactive);
    }

    #[tokio::test]
    async fn test_start_call_without_connection_releases_media() {
        let dir = tempfile::tempdir().unwrap();
        let hub = LoopbackHub::new();
        let rtc = facade(&hub, dir.path()).await;

        let errors = Arc::new(Mutex::new(0usize));
        let counter = Arc::clone(&errors);
        rtc.on(RtcEventKind::Error, move |_| *counter.lock() += 1);

        let err = rtc
            .start_call("room", "a", MediaConstraints::audio_only())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RtcError::Connection(ConnectionError::NotConnected)
        ));
        assert!(rtc.media().local_stream().is_none());
        assert!(rtc.active_room().is_none());
        assert_eq!(*errors.lock(), 1);
    }

    #[tokio::test]
    async fn test_on_off_through_facade() {
        let dir = tempfile::tempdir().unwrap();
        let hub = LoopbackHub::new();
        let rtc = facade(&hub, dir.path()).await;

        let states = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&states);
        let id = rtc.on(RtcEventKind::ConnectionStateChanged, move |e| {
            if let RtcEvent::ConnectionStateChanged(state) = e {
                sink.lock().push(*state);
            }
        });

        rtc.connect().await.unwrap();
        assert!(rtc.off(RtcEventKind::ConnectionStateChanged, id));
        rtc.connection().disconnect().await;

        assert_eq!(
            *states.lock(),
            vec![ConnectionState::Connecting, ConnectionState::Connected]
        );
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent_and_closes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let hub = LoopbackHub::new();
        let rtc = facade(&hub, dir.path()).await;

        rtc.connect().await.unwrap();
        rtc.start_call("room", "a", MediaConstraints::audio_only())
            .await
            .unwrap();

        rtc.destroy().await;
        rtc.destroy().await;

        assert_eq!(rtc.connection().state(), ConnectionState::Disconnected);
        assert!(rtc.media().local_stream().is_none());
        assert!(matches!(
            rtc.database().get_user_settings().await,
            Err(StorageError::Closed)
        ));
        assert!(matches!(rtc.connect().await, Err(RtcError::Destroyed)));
    }

    #[tokio::test]
    async fn test_new_rejects_invalid_url() {
        let config = RtcConfig {
            signaling_url: "ftp://example.com".to_string(),
            storage: StorageBackend::Memory,
            ..Default::default()
        };
        assert!(matches!(
            PulseRtc::new(config).await,
            Err(RtcError::Config(ConfigError::InvalidUrl { .. }))
        ));
    }

    #[tokio::test]
    async fn test_new_builds_default_stack() {
        let config = RtcConfig {
            storage: StorageBackend::Memory,
            ..Default::default()
        };
        let rtc = PulseRtc::new(config).await.unwrap();

        assert_eq!(rtc.database().name(), "memory");
        assert_eq!(rtc.media().backend_name(), "virtual");
        assert_eq!(rtc.connection().state(), ConnectionState::Disconnected);
        assert!(!rtc.codec().supported_codecs().is_empty());
        init_logging(DEFAULT_LOG_DIRECTIVE);
        init_logging("off");
    }
}
