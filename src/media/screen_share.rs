//! Bildschirmfreigabe, unabhängig von Kamera und Mikrofon

use super::backend::MediaBackend;
use super::error::MediaError;
use super::types::{DisplayConstraints, MediaStream};
use crate::events::{ErrorSource, RtcEvent, RtcEventBus};
use parking_lot::Mutex;
use std::sync::Arc;

pub struct ScreenShareManager {
    backend: Arc<dyn MediaBackend>,
    bus: RtcEventBus,
    stream: Mutex<Option<MediaStream>>,
}

impl ScreenShareManager {
    pub fn new(backend: Arc<dyn MediaBackend>, bus: RtcEventBus) -> Self {
        Self {
            backend,
            bus,
            stream: Mutex::new(None),
        }
    }

    /// Startet die Freigabe; läuft bereits eine, wird sie zurückgegeben
    pub async fn start_screen_share(
        &self,
        constraints: DisplayConstraints,
    ) -> Result<MediaStream, MediaError> {
        if let Some(stream) = self.stream().filter(MediaStream::is_active) {
            return Ok(stream);
        }
        constraints.validate()?;

        let stream = match self.backend.get_display_media(&constraints).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!("Failed to start screen share: {}", e);
                self.bus.emit(RtcEvent::error(ErrorSource::Media, e.to_string()));
                return Err(e);
            }
        };

        if let Some(stale) = self.stream.lock().replace(stream.clone()) {
            stale.stop();
        }

        tracing::info!("Screen share started: {}", stream.id());
        self.bus.emit(RtcEvent::ScreenShareStarted(stream.clone()));
        Ok(stream)
    }

    /// Beendet die Freigabe; ohne aktive Freigabe ein No-Op
    pub fn stop_screen_share(&self) {
        let Some(stream) = self.stream.lock().take() else {
            return;
        };

        stream.stop();
        tracing::info!("Screen share stopped");
        self.bus.emit(RtcEvent::ScreenShareStopped);
    }

    /// Startet oder beendet die Freigabe; gibt zurück, ob sie jetzt läuft
    pub async fn toggle_screen_share(
        &self,
        constraints: DisplayConstraints,
    ) -> Result<bool, MediaError> {
        if self.is_sharing() {
            self.stop_screen_share();
            return Ok(false);
        }

        self.start_screen_share(constraints).await?;
        Ok(true)
    }

    pub fn is_sharing(&self) -> bool {
        self.stream
            .lock()
            .as_ref()
            .map(MediaStream::is_active)
            .unwrap_or(false)
    }

    pub fn stream(&self) -> Option<MediaStream> {
        self.stream.lock().clone()
    }
}

impl std::fmt::Debug for ScreenShareManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScreenShareManager")
            .field("sharing", &self.is_sharing())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
