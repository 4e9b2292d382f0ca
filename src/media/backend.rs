//! Plattform-Anbindung für Geräte-Zugriff
//!
//! Der MediaManager kennt nur [`MediaBackend`]. Welche Implementierung
//! verwendet wird, entscheidet [`create_media_backend`] beim Aufbau.

use super::error::MediaError;
use super::types::{
    DeviceKind, DisplayConstraints, MediaConstraints, MediaDeviceInfo, MediaStream, MediaTrack,
    TrackKind, TrackSource,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// ============================================================================
// BACKEND TRAIT
// ============================================================================

#[async_trait]
pub trait MediaBackend: Send + Sync {
    /// Erfasst Kamera und/oder Mikrofon
    async fn get_user_media(&self, constraints: &MediaConstraints)
        -> Result<MediaStream, MediaError>;

    /// Erfasst den Bildschirm
    async fn get_display_media(
        &self,
        constraints: &DisplayConstraints,
    ) -> Result<MediaStream, MediaError>;

    async fn enumerate_devices(&self) -> Result<Vec<MediaDeviceInfo>, MediaError>;

    fn name(&self) -> &'static str;
}

/// Auswahl der Plattform-Anbindung
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaBackendKind {
    /// Synthetische Geräte (Tests, Headless-Betrieb)
    #[default]
    Virtual,
    /// Native Audio-Geräte über cpal
    Native,
}

/// Erzeugt das konfigurierte Backend
pub fn create_media_backend(kind: MediaBackendKind) -> Result<Arc<dyn MediaBackend>, MediaError> {
    match kind {
        MediaBackendKind::Virtual => Ok(Arc::new(VirtualMediaBackend::new())),
        #[cfg(feature = "native-audio")]
        MediaBackendKind::Native => Ok(Arc::new(super::native::CpalMediaBackend::new())),
        #[cfg(not(feature = "native-audio"))]
        MediaBackendKind::Native => Err(MediaError::NotSupported(
            "native media backend requires the `native-audio` feature".to_string(),
        )),
    }
}

// ============================================================================
// VIRTUAL BACKEND
// ============================================================================

/// Backend mit synthetischen Geräten
pub struct VirtualMediaBackend {
    devices: RwLock<Vec<MediaDeviceInfo>>,
    deny_user_media: AtomicBool,
    deny_display_media: AtomicBool,
    devices_unavailable: AtomicBool,
}

impl VirtualMediaBackend {
    /// Ein Mikrofon, ein Lautsprecher, eine Kamera
    pub fn new() -> Self {
        Self::with_devices(vec![
            device("virtual-mic", DeviceKind::AudioInput, "Virtual Microphone"),
            device("virtual-speaker", DeviceKind::AudioOutput, "Virtual Speaker"),
            device("virtual-camera", DeviceKind::VideoInput, "Virtual Camera"),
        ])
    }

    pub fn with_devices(devices: Vec<MediaDeviceInfo>) -> Self {
        Self {
            devices: RwLock::new(devices),
            deny_user_media: AtomicBool::new(false),
            deny_display_media: AtomicBool::new(false),
            devices_unavailable: AtomicBool::new(false),
        }
    }

    pub fn add_device(&self, info: MediaDeviceInfo) {
        self.devices.write().push(info);
    }

    /// Simuliert eine verweigerte Kamera-/Mikrofon-Freigabe
    pub fn set_deny_user_media(&self, deny: bool) {
        self.deny_user_media.store(deny, Ordering::SeqCst);
    }

    /// Simuliert eine verweigerte Bildschirmfreigabe
    pub fn set_deny_display_media(&self, deny: bool) {
        self.deny_display_media.store(deny, Ordering::SeqCst);
    }

    /// Simuliert eine fehlende Geräte-Abfrage
    pub fn set_devices_unavailable(&self, unavailable: bool) {
        self.devices_unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn resolve(
        &self,
        kind: DeviceKind,
        device_id: Option<&str>,
    ) -> Result<MediaDeviceInfo, MediaError> {
        let devices = self.devices.read();
        let mut candidates = devices.iter().filter(|d| d.kind == kind);

        match device_id {
            Some(id) => candidates
                .find(|d| d.device_id == id)
                .cloned()
                .ok_or_else(|| MediaError::DeviceNotFound(id.to_string())),
            None => candidates
                .next()
                .cloned()
                .ok_or_else(|| MediaError::DeviceNotFound(format!("no {:?} device", kind))),
        }
    }
}

impl Default for VirtualMediaBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn device(id: &str, kind: DeviceKind, label: &str) -> MediaDeviceInfo {
    MediaDeviceInfo {
        device_id: id.to_string(),
        kind,
        label: label.to_string(),
        group_id: "virtual".to_string(),
    }
}

#[async_trait]
impl MediaBackend for VirtualMediaBackend {
    async fn get_user_media(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<MediaStream, MediaError> {
        if self.deny_user_media.load(Ordering::SeqCst) {
            return Err(MediaError::PermissionDenied(
                "camera/microphone access denied".to_string(),
            ));
        }

        let mut tracks = Vec::new();

        if let Some(audio) = &constraints.audio {
            let info = self.resolve(DeviceKind::AudioInput, audio.device_id.as_deref())?;
            tracks.push(MediaTrack::new(
                TrackKind::Audio,
                info.label,
                Some(info.device_id),
                TrackSource::Device,
            ));
        }

        if let Some(video) = &constraints.video {
            let info = self.resolve(DeviceKind::VideoInput, video.device_id.as_deref())?;
            tracks.push(MediaTrack::new(
                TrackKind::Video,
                info.label,
                Some(info.device_id),
                TrackSource::Device,
            ));
        }

        Ok(MediaStream::new(tracks))
    }

    async fn get_display_media(
        &self,
        constraints: &DisplayConstraints,
    ) -> Result<MediaStream, MediaError> {
        if self.deny_display_media.load(Ordering::SeqCst) {
            return Err(MediaError::PermissionDenied(
                "screen capture denied".to_string(),
            ));
        }

        let mut tracks = vec![MediaTrack::new(
            TrackKind::Video,
            "Virtual Screen",
            None,
            TrackSource::Display,
        )];
        if constraints.audio {
            tracks.push(MediaTrack::new(
                TrackKind::Audio,
                "Virtual System Audio",
                None,
                TrackSource::Display,
            ));
        }

        Ok(MediaStream::new(tracks))
    }

    async fn enumerate_devices(&self) -> Result<Vec<MediaDeviceInfo>, MediaError> {
        if self.devices_unavailable.load(Ordering::SeqCst) {
            return Err(MediaError::NotSupported(
                "device enumeration unavailable".to_string(),
            ));
        }
        Ok(self.devices.read().clone())
    }

    fn name(&self) -> &'static str {
        "virtual"
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{AudioConstraints, VideoConstraints};

    #[tokio::test]
    async fn test_user_media_picks_requested_device() {
        let backend = VirtualMediaBackend::new();
        backend.add_device(device("cam-2", DeviceKind::VideoInput, "Second Camera"));

        let stream = backend
            .get_user_media(&MediaConstraints {
                audio: Some(AudioConstraints::default()),
                video: Some(VideoConstraints {
                    device_id: Some("cam-2".to_string()),
                    ..Default::default()
                }),
            })
            .await
            .unwrap();

        let video = stream.first_track(TrackKind::Video).unwrap();
        assert_eq!(video.device_id(), Some("cam-2"));
        assert_eq!(video.label(), "Second Camera");
        assert!(stream.first_track(TrackKind::Audio).is_some());
    }

    #[tokio::test]
    async fn test_unknown_device_is_rejected() {
        let backend = VirtualMediaBackend::new();
        let err = backend
            .get_user_media(&MediaConstraints {
                audio: Some(AudioConstraints {
                    device_id: Some("missing".to_string()),
                    ..Default::default()
                }),
                video: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err, MediaError::DeviceNotFound("missing".to_string()));
    }

    #[tokio::test]
    async fn test_display_media_with_audio() {
        let backend = VirtualMediaBackend::new();
        let stream = backend
            .get_display_media(&DisplayConstraints {
                audio: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(stream.tracks().len(), 2);
        assert!(stream
            .tracks()
            .iter()
            .all(|t| t.source() == TrackSource::Display));
    }

    #[test]
    fn test_factory() {
        assert_eq!(
            create_media_backend(MediaBackendKind::Virtual)
                .unwrap()
                .name(),
            "virtual"
        );
    }
}
