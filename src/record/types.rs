//! Aufnahme-Typen

use super::error::RecordError;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingState {
    Inactive,
    Recording,
    Paused,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecordingOptions {
    /// Container/Codec, z.B. `video/webm;codecs=vp8`
    pub mime_type: String,
    pub resolution: Option<String>,
    /// Anruf, zu dem die Aufnahme gehört
    pub call_history_id: Option<String>,
}

impl Default for RecordingOptions {
    fn default() -> Self {
        Self {
            mime_type: "video/webm".to_string(),
            resolution: None,
            call_history_id: None,
        }
    }
}

impl RecordingOptions {
    pub fn validate(&self) -> Result<(), RecordError> {
        let essence = self.mime_type.split(';').next().unwrap_or_default().trim();
        match essence.split_once('/') {
            Some((kind, sub)) if !kind.is_empty() && !sub.is_empty() => Ok(()),
            _ => Err(RecordError::InvalidOptions(format!(
                "invalid mime type '{}'",
                self.mime_type
            ))),
        }
    }
}

/// Dateiendung aus dem MIME-Typ (`video/webm;codecs=vp8` → `webm`)
pub fn format_of(mime_type: &str) -> String {
    mime_type
        .split(';')
        .next()
        .and_then(|essence| essence.split_once('/'))
        .map(|(_, sub)| sub.trim().to_string())
        .filter(|sub| !sub.is_empty())
        .unwrap_or_else(|| "bin".to_string())
}

/// Ausschnitt einer Aufnahme; Zeiten relativ zum Aufnahmestart
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingSegment {
    pub id: String,
    pub start_ms: u64,
    pub end_ms: u64,
    pub mime_type: String,
    pub data: Bytes,
}

impl RecordingSegment {
    pub fn new(start_ms: u64, end_ms: u64, mime_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            start_ms,
            end_ms,
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }
}

/// Fügt Segmente in der gegebenen Reihenfolge zusammen.
/// Der MIME-Typ des Ergebnisses ist der des ersten Segments.
pub fn merge_segments(segments: &[RecordingSegment]) -> Result<RecordingSegment, RecordError> {
    let (first, last) = match (segments.first(), segments.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return Err(RecordError::NoSegments),
    };

    let mut data = BytesMut::with_capacity(segments.iter().map(|s| s.data.len()).sum());
    for segment in segments {
        data.extend_from_slice(&segment.data);
    }

    Ok(RecordingSegment::new(
        first.start_ms,
        last.end_ms,
        first.mime_type.clone(),
        data.freeze(),
    ))
}

/// Fertige Aufnahme nach `stop_recording`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingArtifact {
    pub id: String,
    pub mime_type: String,
    pub data: Bytes,
    pub started_at: DateTime<Utc>,
    /// Aufgenommene Zeit ohne Pausen
    pub duration_ms: u64,
    pub segment_count: usize,
    pub resolution: Option<String>,
    pub call_history_id: Option<String>,
}

impl RecordingArtifact {
    pub fn format(&self) -> String {
        format_of(&self.mime_type)
    }

    pub fn file_name(&self) -> String {
        format!(
            "recording-{}-{}.{}",
            self.started_at.format("%Y%m%d-%H%M%S"),
            &self.id[..8.min(self.id.len())],
            self.format()
        )
    }
}
