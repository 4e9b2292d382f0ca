//! Tracks, Streams, Geräte und Constraints

use super::error::MediaError;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// ============================================================================
// DEVICES
// ============================================================================

/// Art eines Medien-Tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

/// Art eines Geräts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    AudioInput,
    AudioOutput,
    VideoInput,
}

impl DeviceKind {
    /// Track-Art, die dieses Gerät liefert (Ausgabegeräte liefern keine)
    pub fn track_kind(self) -> Option<TrackKind> {
        match self {
            DeviceKind::AudioInput => Some(TrackKind::Audio),
            DeviceKind::VideoInput => Some(TrackKind::Video),
            DeviceKind::AudioOutput => None,
        }
    }
}

/// Momentaufnahme eines verfügbaren Geräts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaDeviceInfo {
    pub device_id: String,
    pub kind: DeviceKind,
    pub label: String,
    pub group_id: String,
}

// ============================================================================
// TRACKS
// ============================================================================

/// Herkunft eines Tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackSource {
    Device,
    Display,
    Remote,
}

struct TrackInner {
    id: String,
    kind: TrackKind,
    label: String,
    device_id: Option<String>,
    source: TrackSource,
    stream_id: Option<String>,
    enabled: AtomicBool,
    live: AtomicBool,
}

/// Ein Audio- oder Video-Track
///
/// Klone teilen sich `enabled`/`live`, wie Referenzen auf denselben Track.
#[derive(Clone)]
pub struct MediaTrack {
    inner: Arc<TrackInner>,
}

impl MediaTrack {
    /// Neuer lokaler Track
    pub fn new(
        kind: TrackKind,
        label: impl Into<String>,
        device_id: Option<String>,
        source: TrackSource,
    ) -> Self {
        Self::build(
            uuid::Uuid::new_v4().to_string(),
            kind,
            label.into(),
            device_id,
            source,
            None,
        )
    }

    /// Track eines Remote-Peers
    pub fn remote(id: impl Into<String>, kind: TrackKind, stream_id: impl Into<String>) -> Self {
        let id = id.into();
        Self::build(
            id.clone(),
            kind,
            id,
            None,
            TrackSource::Remote,
            Some(stream_id.into()),
        )
    }

    fn build(
        id: String,
        kind: TrackKind,
        label: String,
        device_id: Option<String>,
        source: TrackSource,
        stream_id: Option<String>,
    ) -> Self {
        Self {
            inner: Arc::new(TrackInner {
                id,
                kind,
                label,
                device_id,
                source,
                stream_id,
                enabled: AtomicBool::new(true),
                live: AtomicBool::new(true),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> TrackKind {
        self.inner.kind
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn device_id(&self) -> Option<&str> {
        self.inner.device_id.as_deref()
    }

    pub fn source(&self) -> TrackSource {
        self.inner.source
    }

    /// Stream-ID des Remote-Peers
    pub fn stream_id(&self) -> Option<&str> {
        self.inner.stream_id.as_deref()
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_live(&self) -> bool {
        self.inner.live.load(Ordering::SeqCst)
    }

    /// Beendet den Track endgültig
    pub fn stop(&self) {
        if self.inner.live.swap(false, Ordering::SeqCst) {
            tracing::debug!("Track stopped: {} ({:?})", self.inner.id, self.inner.kind);
        }
    }
}

impl PartialEq for MediaTrack {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for MediaTrack {}

impl std::fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("label", &self.inner.label)
            .field("source", &self.inner.source)
            .field("enabled", &self.is_enabled())
            .field("live", &self.is_live())
            .finish()
    }
}

// ============================================================================
// STREAMS
// ============================================================================

/// Gruppe von Tracks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaStream {
    id: String,
    tracks: Vec<MediaTrack>,
}

impl MediaStream {
    pub fn new(tracks: Vec<MediaTrack>) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), tracks)
    }

    pub fn with_id(id: impl Into<String>, tracks: Vec<MediaTrack>) -> Self {
        Self {
            id: id.into(),
            tracks,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn tracks_of(&self, kind: TrackKind) -> impl Iterator<Item = &MediaTrack> {
        self.tracks.iter().filter(move |t| t.kind() == kind)
    }

    pub fn first_track(&self, kind: TrackKind) -> Option<&MediaTrack> {
        self.tracks_of(kind).next()
    }

    pub fn track(&self, id: &str) -> Option<&MediaTrack> {
        self.tracks.iter().find(|t| t.id() == id)
    }

    /// Fügt einen Track hinzu (gleiche ID wird ersetzt)
    pub fn add_track(&mut self, track: MediaTrack) {
        match self.tracks.iter_mut().find(|t| t.id() == track.id()) {
            Some(existing) => *existing = track,
            None => self.tracks.push(track),
        }
    }

    pub fn remove_track(&mut self, id: &str) -> Option<MediaTrack> {
        let index = self.tracks.iter().position(|t| t.id() == id)?;
        Some(self.tracks.remove(index))
    }

    /// Ersetzt den ersten Track gleicher Art und gibt den alten zurück
    pub fn replace_track(&mut self, track: MediaTrack) -> Option<MediaTrack> {
        match self.tracks.iter_mut().find(|t| t.kind() == track.kind()) {
            Some(existing) => Some(std::mem::replace(existing, track)),
            None => {
                self.tracks.push(track);
                None
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Mindestens ein Track läuft noch
    pub fn is_active(&self) -> bool {
        self.tracks.iter().any(MediaTrack::is_live)
    }

    /// Beendet alle Tracks
    pub fn stop(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

// ============================================================================
// CONSTRAINTS
// ============================================================================

/// Anforderungen an die Audio-Erfassung
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AudioConstraints {
    pub device_id: Option<String>,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
}

impl Default for AudioConstraints {
    fn default() -> Self {
        Self {
            device_id: None,
            echo_cancellation: true,
            noise_suppression: true,
            sample_rate: None,
            channels: None,
        }
    }
}

/// Anforderungen an die Video-Erfassung
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VideoConstraints {
    pub device_id: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: Option<u32>,
}

/// Constraints für `get_user_media`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConstraints {
    pub audio: Option<AudioConstraints>,
    pub video: Option<VideoConstraints>,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: Some(AudioConstraints::default()),
            video: Some(VideoConstraints::default()),
        }
    }
}

impl MediaConstraints {
    pub fn audio_only() -> Self {
        Self {
            audio: Some(AudioConstraints::default()),
            video: None,
        }
    }

    pub fn video_only() -> Self {
        Self {
            audio: None,
            video: Some(VideoConstraints::default()),
        }
    }

    /// Prüft die Constraints vor dem Geräte-Zugriff
    pub fn validate(&self) -> Result<(), MediaError> {
        if self.audio.is_none() && self.video.is_none() {
            return Err(MediaError::InvalidConstraints(
                "at least one of audio or video must be requested".to_string(),
            ));
        }

        if let Some(audio) = &self.audio {
            if matches!(audio.channels, Some(0)) {
                return Err(MediaError::InvalidConstraints(
                    "channels must be positive".to_string(),
                ));
            }
            if matches!(audio.sample_rate, Some(0)) {
                return Err(MediaError::InvalidConstraints(
                    "sample rate must be positive".to_string(),
                ));
            }
        }

        if let Some(video) = &self.video {
            validate_dimensions(video.width, video.height, video.frame_rate)?;
        }

        Ok(())
    }
}

/// Constraints für die Bildschirmfreigabe
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DisplayConstraints {
    /// System-Audio mit aufnehmen
    pub audio: bool,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: Option<u32>,
}

impl DisplayConstraints {
    pub fn validate(&self) -> Result<(), MediaError> {
        validate_dimensions(self.width, self.height, self.frame_rate)
    }
}

fn validate_dimensions(
    width: Option<u32>,
    height: Option<u32>,
    frame_rate: Option<u32>,
) -> Result<(), MediaError> {
    if matches!(width, Some(0)) || matches!(height, Some(0)) {
        return Err(MediaError::InvalidConstraints(
            "width and height must be positive".to_string(),
        ));
    }
    if let Some(fps) = frame_rate {
        if !(1..=120).contains(&fps) {
            return Err(MediaError::InvalidConstraints(format!(
                "frame rate {} out of range 1..=120",
                fps
            )));
        }
    }
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
