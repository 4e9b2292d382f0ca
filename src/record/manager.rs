//! Record Manager
//!
//! Zustandsmaschine inactive → recording ⇄ paused → inactive.
//! Daten kommen als Blöcke über [`RecordManager::push_data`] herein und
//! werden beim Stoppen zu einem Artefakt zusammengeführt.

use super::error::RecordError;
use super::types::{
    merge_segments, RecordingArtifact, RecordingOptions, RecordingSegment, RecordingState,
};
use crate::events::{RtcEvent, RtcEventBus};
use crate::storage::NewRecording;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::path::Path;
use std::time::Duration;
use tokio::time::Instant;

struct Session {
    state: RecordingState,
    options: RecordingOptions,
    segments: Vec<RecordingSegment>,
    started_at: DateTime<Utc>,
    started: Instant,
    paused_total: Duration,
    paused_at: Option<Instant>,
}

impl Session {
    /// Aufgenommene Zeit ohne Pausen
    fn active_ms(&self, now: Instant) -> u64 {
        let paused = self.paused_total + self.paused_at.map(|p| now - p).unwrap_or_default();
        (now - self.started).saturating_sub(paused).as_millis() as u64
    }
}

pub struct RecordManager {
    session: Mutex<Option<Session>>,
    bus: RtcEventBus,
}

impl RecordManager {
    pub fn new(bus: RtcEventBus) -> Self {
        Self {
            session: Mutex::new(None),
            bus,
        }
    }

    pub fn state(&self) -> RecordingState {
        self.session
            .lock()
            .as_ref()
            .map(|s| s.state)
            .unwrap_or(RecordingState::Inactive)
    }

    pub fn is_recording(&self) -> bool {
        self.state() == RecordingState::Recording
    }

    pub fn segment_count(&self) -> usize {
        self.session
            .lock()
            .as_ref()
            .map(|s| s.segments.len())
            .unwrap_or(0)
    }

    /// Bisher aufgenommene Zeit in ms (0 wenn inaktiv)
    pub fn duration_ms(&self) -> u64 {
        self.session
            .lock()
            .as_ref()
            .map(|s| s.active_ms(Instant::now()))
            .unwrap_or(0)
    }

    /// Startet eine Aufnahme; nur aus `Inactive` erlaubt
    pub fn start_recording(&self, options: RecordingOptions) -> Result<(), RecordError> {
        options.validate()?;

        {
            let mut session = self.session.lock();
            if let Some(current) = session.as_ref() {
                return Err(RecordError::InvalidState(current.state));
            }

            tracing::info!("Recording started ({})", options.mime_type);
            *session = Some(Session {
                state: RecordingState::Recording,
                options,
                segments: Vec::new(),
                started_at: Utc::now(),
                started: Instant::now(),
                paused_total: Duration::ZERO,
                paused_at: None,
            });
        }

        self.bus
            .emit(RtcEvent::RecordingStateChanged(RecordingState::Recording));
        Ok(())
    }

    /// Hängt einen Datenblock an. Während einer Pause werden Daten verworfen
    /// (`Ok(false)`).
    pub fn push_data(&self, data: impl Into<Bytes>) -> Result<bool, RecordError> {
        let mut guard = self.session.lock();
        let session = guard
            .as_mut()
            .ok_or(RecordError::InvalidState(RecordingState::Inactive))?;

        if session.state == RecordingState::Paused {
            return Ok(false);
        }

        let start_ms = session.segments.last().map(|s| s.end_ms).unwrap_or(0);
        let end_ms = session.active_ms(Instant::now()).max(start_ms);
        let segment =
            RecordingSegment::new(start_ms, end_ms, session.options.mime_type.clone(), data);
        session.segments.push(segment);
        Ok(true)
    }

    /// Pausiert; kein Fehler, wenn nicht aufgenommen wird
    pub fn pause_recording(&self) -> bool {
        let paused = {
            let mut guard = self.session.lock();
            match guard.as_mut() {
                Some(session) if session.state == RecordingState::Recording => {
                    session.state = RecordingState::Paused;
                    session.paused_at = Some(Instant::now());
                    true
                }
                _ => false,
            }
        };

        if paused {
            tracing::debug!("Recording paused");
            self.bus
                .emit(RtcEvent::RecordingStateChanged(RecordingState::Paused));
        }
        paused
    }

    /// Setzt fort; kein Fehler, wenn nicht pausiert
    pub fn resume_recording(&self) -> bool {
        let resumed = {
            let mut guard = self.session.lock();
            match guard.as_mut() {
                Some(session) if session.state == RecordingState::Paused => {
                    if let Some(paused_at) = session.paused_at.take() {
                        session.paused_total += paused_at.elapsed();
                    }
                    session.state = RecordingState::Recording;
                    true
                }
                _ => false,
            }
        };

        if resumed {
            tracing::debug!("Recording resumed");
            self.bus
                .emit(RtcEvent::RecordingStateChanged(RecordingState::Recording));
        }
        resumed
    }

    /// Beendet die Aufnahme und liefert ein zusammengeführtes Artefakt
    pub fn stop_recording(&self) -> Result<RecordingArtifact, RecordError> {
        let session = self
            .session
            .lock()
            .take()
            .ok_or(RecordError::InvalidState(RecordingState::Inactive))?;

        let duration_ms = session.active_ms(Instant::now());
        let (mime_type, data) = match merge_segments(&session.segments) {
            Ok(merged) => (merged.mime_type, merged.data),
            Err(RecordError::NoSegments) => (session.options.mime_type.clone(), Bytes::new()),
            Err(e) => return Err(e),
        };

        let artifact = RecordingArtifact {
            id: uuid::Uuid::new_v4().to_string(),
            mime_type,
            data,
            started_at: session.started_at,
            duration_ms,
            segment_count: session.segments.len(),
            resolution: session.options.resolution,
            call_history_id: session.options.call_history_id,
        };

        tracing::info!(
            "Recording stopped: {} ms, {} segments, {} bytes",
            artifact.duration_ms,
            artifact.segment_count,
            artifact.data.len()
        );
        self.bus
            .emit(RtcEvent::RecordingStateChanged(RecordingState::Inactive));
        Ok(artifact)
    }
}

/// Schreibt ein Artefakt nach `dir` und liefert den Datensatz für die Storage
pub async fn save_artifact(
    dir: impl AsRef<Path>,
    artifact: &RecordingArtifact,
) -> Result<NewRecording, RecordError> {
    let dir = dir.as_ref();
    tokio::fs::create_dir_all(dir).await?;

    let file_name = artifact.file_name();
    let path = dir.join(&file_name);
    tokio::fs::write(&path, &artifact.data).await?;
    tracing::info!("Recording written to {:?}", path);

    Ok(NewRecording {
        call_history_id: artifact.call_history_id.clone(),
        file_path: path.to_string_lossy().into_owned(),
        file_name,
        file_size: artifact.data.len() as u64,
        duration_ms: artifact.duration_ms as i64,
        format: artifact.format(),
        resolution: artifact.resolution.clone(),
    })
}

// ============================================================================
// TESTS
// ============================================================================
