//! Media Manager
//!
//! Hält genau einen lokalen Stream. Ein neuer `get_user_media` Aufruf ersetzt
//! den alten Stream und beendet dessen Tracks. Gerätewechsel tauschen die
//! Tracks auf allen Peers ohne Neuverhandlung.

use super::backend::MediaBackend;
use super::error::MediaError;
use super::types::{
    AudioConstraints, MediaConstraints, MediaDeviceInfo, MediaStream, MediaTrack, TrackKind,
    VideoConstraints,
};
use crate::connection::WeakConnectionManager;
use crate::events::{ErrorSource, RtcEvent, RtcEventBus};
use parking_lot::Mutex;
use std::sync::Arc;

pub struct MediaManager {
    backend: Arc<dyn MediaBackend>,
    bus: RtcEventBus,
    local: Mutex<Option<MediaStream>>,
    constraints: Mutex<Option<MediaConstraints>>,
    connection: Mutex<WeakConnectionManager>,
}

impl MediaManager {
    pub fn new(backend: Arc<dyn MediaBackend>, bus: RtcEventBus) -> Self {
        Self {
            backend,
            bus,
            local: Mutex::new(None),
            constraints: Mutex::new(None),
            connection: Mutex::new(WeakConnectionManager::default()),
        }
    }

    /// Lokale Streams werden an diesen ConnectionManager weitergereicht
    pub fn attach_connection(&self, connection: WeakConnectionManager) {
        *self.connection.lock() = connection;
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Erfasst einen lokalen Stream und ersetzt den bisherigen
    pub async fn get_user_media(
        &self,
        constraints: MediaConstraints,
    ) -> Result<MediaStream, MediaError> {
        constraints.validate()?;

        let stream = match self.backend.get_user_media(&constraints).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!("Failed to acquire local media: {}", e);
                self.bus.emit(RtcEvent::error(ErrorSource::Media, e.to_string()));
                return Err(e);
            }
        };

        let previous = self.local.lock().replace(stream.clone());
        *self.constraints.lock() = Some(constraints);

        if let Some(previous) = previous {
            tracing::debug!("Releasing previous local stream {}", previous.id());
            previous.stop();
        }

        tracing::info!(
            "Local stream acquired: {} ({} tracks)",
            stream.id(),
            stream.tracks().len()
        );
        self.bus.emit(RtcEvent::LocalStream(stream.clone()));

        let connection = self.connection.lock().upgrade();
        if let Some(connection) = connection {
            connection.set_local_stream(Some(stream.clone())).await;
        }

        Ok(stream)
    }

    /// Beendet den lokalen Stream
    pub async fn stop_local_stream(&self) {
        let Some(stream) = self.local.lock().take() else {
            return;
        };

        stream.stop();
        tracing::info!("Local stream stopped");
        self.bus.emit(RtcEvent::LocalStreamStopped);

        let connection = self.connection.lock().upgrade();
        if let Some(connection) = connection {
            connection.set_local_stream(None).await;
        }
    }

    pub fn local_stream(&self) -> Option<MediaStream> {
        self.local.lock().clone()
    }

    /// Schaltet das Mikrofon stumm bzw. wieder an
    ///
    /// Gibt den neuen Mute-Status zurück, `false` ohne lokalen Audio-Track.
    pub fn toggle_mute(&self) -> bool {
        let Some(track) = self.first_local_track(TrackKind::Audio) else {
            return false;
        };

        track.set_enabled(!track.is_enabled());
        let muted = !track.is_enabled();

        tracing::debug!("Microphone muted: {}", muted);
        self.bus.emit(RtcEvent::MuteChanged(muted));
        muted
    }

    /// Schaltet die Kamera an bzw. aus
    ///
    /// Gibt zurück, ob Video jetzt aktiv ist, `false` ohne lokalen Video-Track.
    pub fn toggle_video(&self) -> bool {
        let Some(track) = self.first_local_track(TrackKind::Video) else {
            return false;
        };

        track.set_enabled(!track.is_enabled());
        let enabled = track.is_enabled();

        tracing::debug!("Camera enabled: {}", enabled);
        self.bus.emit(RtcEvent::VideoChanged(enabled));
        enabled
    }

    pub fn is_muted(&self) -> bool {
        self.first_local_track(TrackKind::Audio)
            .map(|t| !t.is_enabled())
            .unwrap_or(false)
    }

    pub fn is_video_enabled(&self) -> bool {
        self.first_local_track(TrackKind::Video)
            .map(|t| t.is_enabled())
            .unwrap_or(false)
    }

    /// Wechselt das Gerät für eine Track-Art
    ///
    /// Der neue Track übernimmt den `enabled`-Status des alten und wird auf
    /// allen Peers per Track-Tausch eingesetzt.
    pub async fn switch_device(&self, kind: TrackKind, device_id: &str) -> Result<(), MediaError> {
        let (old_track, base) = {
            let local = self.local.lock();
            let stream = local.as_ref().ok_or(MediaError::NoLocalStream)?;
            (
                stream.first_track(kind).cloned(),
                self.constraints.lock().clone().unwrap_or_default(),
            )
        };

        let request = match kind {
            TrackKind::Audio => MediaConstraints {
                audio: Some(AudioConstraints {
                    device_id: Some(device_id.to_string()),
                    ..base.audio.clone().unwrap_or_default()
                }),
                video: None,
            },
            TrackKind::Video => MediaConstraints {
                audio: None,
                video: Some(VideoConstraints {
                    device_id: Some(device_id.to_string()),
                    ..base.video.clone().unwrap_or_default()
                }),
            },
        };

        let acquired = match self.backend.get_user_media(&request).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!("Failed to switch {:?} device: {}", kind, e);
                self.bus.emit(RtcEvent::error(ErrorSource::Media, e.to_string()));
                return Err(e);
            }
        };
        let Some(new_track) = acquired.first_track(kind).cloned() else {
            return Err(MediaError::DeviceNotFound(device_id.to_string()));
        };

        if let Some(old) = &old_track {
            new_track.set_enabled(old.is_enabled());
        }

        // Stream wurde inzwischen freigegeben
        {
            let mut local = self.local.lock();
            let Some(stream) = local.as_mut() else {
                new_track.stop();
                return Err(MediaError::NoLocalStream);
            };
            if let Some(old) = stream.replace_track(new_track.clone()) {
                old.stop();
            }
        }

        {
            let mut constraints = self.constraints.lock();
            let mut updated = base;
            match kind {
                TrackKind::Audio => updated.audio = request.audio,
                TrackKind::Video => updated.video = request.video,
            }
            *constraints = Some(updated);
        }

        let connection = self.connection.lock().upgrade();
        if let Some(connection) = connection {
            let replaced = connection.replace_local_track(&new_track).await;
            tracing::debug!("Replaced {:?} track on {} peers", kind, replaced);
        }

        tracing::info!("Switched {:?} device to {}", kind, device_id);
        self.bus.emit(RtcEvent::DeviceSwitched {
            kind,
            device_id: device_id.to_string(),
        });
        Ok(())
    }

    /// Verfügbare Geräte; leer, wenn die Plattform keine Abfrage erlaubt
    pub async fn get_devices(&self) -> Vec<MediaDeviceInfo> {
        match self.backend.enumerate_devices().await {
            Ok(devices) => devices,
            Err(e) => {
                tracing::warn!("Device enumeration unavailable: {}", e);
                Vec::new()
            }
        }
    }

    fn first_local_track(&self, kind: TrackKind) -> Option<MediaTrack> {
        self.local
            .lock()
            .as_ref()
            .and_then(|s| s.first_track(kind).cloned())
    }
}

impl std::fmt::Debug for MediaManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaManager")
            .field("backend", &self.backend.name())
            .field("local", &self.local.lock().as_ref().map(|s| s.id().to_string()))
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
