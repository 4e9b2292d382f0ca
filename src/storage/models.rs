//! Datenmodelle der Persistenz
//!
//! Zeitstempel werden mit Millisekunden-Genauigkeit gespeichert; alle
//! Eingaben werden beim Speichern darauf gekürzt.

use super::error::StorageError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// CALL HISTORY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallType {
    Audio,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Success,
    Failed,
    Missed,
}

/// Abgeschlossener Anruf
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallHistory {
    pub id: String,
    pub room_id: Option<String>,
    pub participants: Vec<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// Aus Start und Ende berechnet
    pub duration_ms: Option<i64>,
    #[serde(rename = "type")]
    pub call_type: CallType,
    pub status: CallStatus,
    pub created_at: DateTime<Utc>,
}

/// Neuer Anruf ohne ID (für INSERT)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCallRecord {
    pub room_id: Option<String>,
    pub participants: Vec<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(rename = "type")]
    pub call_type: CallType,
    pub status: CallStatus,
}

/// Teil-Update eines Anrufs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRecordUpdate {
    pub end_time: Option<DateTime<Utc>>,
    pub status: Option<CallStatus>,
}

impl CallHistory {
    pub(crate) fn from_new(id: String, record: NewCallRecord, created_at: DateTime<Utc>) -> Self {
        let start_time = truncate_millis(record.start_time);
        let end_time = record.end_time.map(truncate_millis);
        Self {
            id,
            room_id: record.room_id,
            participants: record.participants,
            start_time,
            end_time,
            duration_ms: duration_ms(start_time, end_time),
            call_type: record.call_type,
            status: record.status,
            created_at,
        }
    }

    pub(crate) fn apply(&mut self, update: CallRecordUpdate) {
        if let Some(end) = update.end_time {
            self.end_time = Some(truncate_millis(end));
            self.duration_ms = duration_ms(self.start_time, self.end_time);
        }
        if let Some(status) = update.status {
            self.status = status;
        }
    }
}

fn duration_ms(start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> Option<i64> {
    end.map(|end| (end - start).num_milliseconds().max(0))
}

// ============================================================================
// USER SETTINGS
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecPreference {
    #[default]
    Hardware,
    Software,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingQuality {
    Low,
    #[default]
    Medium,
    High,
}

/// Einzelner Einstellungs-Datensatz
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSettings {
    pub id: String,
    pub default_call_type: CallType,
    pub enable_video_by_default: bool,
    pub enable_audio_by_default: bool,
    pub codec_preference: CodecPreference,
    pub recording_quality: RecordingQuality,
    pub auto_record: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserSettings {
    pub const SINGLETON_ID: &'static str = "default";

    pub(crate) fn defaults(now: DateTime<Utc>) -> Self {
        Self {
            id: Self::SINGLETON_ID.to_string(),
            default_call_type: CallType::Video,
            enable_video_by_default: true,
            enable_audio_by_default: true,
            codec_preference: CodecPreference::default(),
            recording_quality: RecordingQuality::default(),
            auto_record: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub(crate) fn apply(&mut self, update: UserSettingsUpdate, now: DateTime<Utc>) {
        if let Some(v) = update.default_call_type {
            self.default_call_type = v;
        }
        if let Some(v) = update.enable_video_by_default {
            self.enable_video_by_default = v;
        }
        if let Some(v) = update.enable_audio_by_default {
            self.enable_audio_by_default = v;
        }
        if let Some(v) = update.codec_preference {
            self.codec_preference = v;
        }
        if let Some(v) = update.recording_quality {
            self.recording_quality = v;
        }
        if let Some(v) = update.auto_record {
            self.auto_record = v;
        }
        self.updated_at = now;
    }
}

/// Teil-Update der Einstellungen
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSettingsUpdate {
    pub default_call_type: Option<CallType>,
    pub enable_video_by_default: Option<bool>,
    pub enable_audio_by_default: Option<bool>,
    pub codec_preference: Option<CodecPreference>,
    pub recording_quality: Option<RecordingQuality>,
    pub auto_record: Option<bool>,
}

// ============================================================================
// RECORDINGS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recording {
    pub id: String,
    pub call_history_id: Option<String>,
    pub file_path: String,
    pub file_name: String,
    pub file_size: u64,
    pub duration_ms: i64,
    pub format: String,
    pub resolution: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRecording {
    pub call_history_id: Option<String>,
    pub file_path: String,
    pub file_name: String,
    pub file_size: u64,
    pub duration_ms: i64,
    pub format: String,
    pub resolution: Option<String>,
}

impl Recording {
    pub(crate) fn from_new(id: String, rec: NewRecording, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            call_history_id: rec.call_history_id,
            file_path: rec.file_path,
            file_name: rec.file_name,
            file_size: rec.file_size,
            duration_ms: rec.duration_ms,
            format: rec.format,
            resolution: rec.resolution,
            created_at,
        }
    }
}

// ============================================================================
// STATS & PAGING
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageStats {
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub missed_calls: u64,
    pub total_call_duration_ms: i64,
    pub total_recordings: u64,
    pub total_recording_bytes: u64,
}

impl StorageStats {
    pub(crate) fn count_call(&mut self, call: &CallHistory) {
        self.total_calls += 1;
        match call.status {
            CallStatus::Success => self.successful_calls += 1,
            CallStatus::Failed => self.failed_calls += 1,
            CallStatus::Missed => self.missed_calls += 1,
        }
        self.total_call_duration_ms += call.duration_ms.unwrap_or(0);
    }

    pub(crate) fn count_recording(&mut self, recording: &Recording) {
        self.total_recordings += 1;
        self.total_recording_bytes += recording.file_size;
    }
}

/// Seitenweise Abfrage, neueste zuerst
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: usize,
    pub offset: usize,
}

impl Page {
    pub fn first(limit: usize) -> Self {
        Self { limit, offset: 0 }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
        }
    }
}

// ============================================================================
// TIME HELPERS
// ============================================================================

pub(crate) fn truncate_millis(time: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(time.timestamp_millis()).unwrap_or(time)
}

pub(crate) fn now_millis() -> DateTime<Utc> {
    truncate_millis(Utc::now())
}

pub(crate) fn from_millis(ms: i64) -> Result<DateTime<Utc>, StorageError> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| StorageError::Corrupt(format!("timestamp {} out of range", ms)))
}
