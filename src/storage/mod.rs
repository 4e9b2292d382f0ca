//! Storage Module - Anrufhistorie, Einstellungen, Aufnahmen
//!
//! Eine Schnittstelle ([`StorageAdapter`]), zwei Implementierungen:
//! - [`SqliteStorage`]: native Datenbank (rusqlite)
//! - [`MemoryStorage`]: Objekt-Speicher mit aufsteigenden Indizes
//!
//! Die Auswahl passiert beim Erzeugen über [`open_storage`].

mod adapter;
mod error;
mod memory;
mod models;
mod sqlite;

pub use adapter::StorageAdapter;
pub use error::StorageError;
pub use memory::MemoryStorage;
pub use models::{
    CallHistory, CallRecordUpdate, CallStatus, CallType, CodecPreference, NewCallRecord,
    NewRecording, Page, Recording, RecordingQuality, StorageStats, UserSettings,
    UserSettingsUpdate,
};
pub use sqlite::SqliteStorage;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Wahl des Speicher-Backends
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "kind")]
pub enum StorageBackend {
    Sqlite { path: PathBuf },
    SqliteInMemory,
    Memory,
}

impl Default for StorageBackend {
    fn default() -> Self {
        match SqliteStorage::default_path() {
            Ok(path) => StorageBackend::Sqlite { path },
            Err(_) => StorageBackend::SqliteInMemory,
        }
    }
}

/// Erzeugt und initialisiert das gewählte Backend
pub async fn open_storage(backend: &StorageBackend) -> Result<Arc<dyn StorageAdapter>, StorageError> {
    let storage: Arc<dyn StorageAdapter> = match backend {
        StorageBackend::Sqlite { path } => Arc::new(SqliteStorage::open(path.clone())),
        StorageBackend::SqliteInMemory => Arc::new(SqliteStorage::open_in_memory()),
        StorageBackend::Memory => Arc::new(MemoryStorage::new()),
    };

    storage.initialize().await?;
    tracing::info!("Storage ready ({})", storage.name());
    Ok(storage)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    async fn adapters() -> Vec<Arc<dyn StorageAdapter>> {
        vec![
            open_storage(&StorageBackend::SqliteInMemory).await.unwrap(),
            open_storage(&StorageBackend::Memory).await.unwrap(),
        ]
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(secs * 1000 + 123).unwrap()
    }

    fn call(start: i64, status: CallStatus) -> NewCallRecord {
        NewCallRecord {
            room_id: Some("room-1".to_string()),
            participants: vec!["alice".to_string(), "bob".to_string()],
            start_time: at(start),
            end_time: Some(at(start + 30)),
            call_type: CallType::Video,
            status,
        }
    }

    fn recording(call_history_id: Option<String>, size: u64) -> NewRecording {
        NewRecording {
            call_history_id,
            file_path: "/tmp/rec.webm".to_string(),
            file_name: "rec.webm".to_string(),
            file_size: size,
            duration_ms: 30_000,
            format: "webm".to_string(),
            resolution: Some("1280x720".to_string()),
        }
    }

    #[tokio::test]
    async fn test_save_and_get_call_record() {
        for db in adapters().await {
            let input = call(100, CallStatus::Success);
            let saved = db.save_call_record(input.clone()).await.unwrap();
            let loaded = db.get_call_record(&saved.id).await.unwrap().unwrap();

            assert_eq!(loaded, saved, "{}", db.name());
            assert_eq!(loaded.room_id, input.room_id);
            assert_eq!(loaded.participants, input.participants);
            assert_eq!(loaded.start_time, input.start_time);
            assert_eq!(loaded.end_time, input.end_time);
            assert_eq!(loaded.call_type, input.call_type);
            assert_eq!(loaded.status, input.status);
            assert_eq!(loaded.duration_ms, Some(30_000));

            assert!(db.get_call_record("missing").await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn test_history_is_paginated_newest_first() {
        for db in adapters().await {
            for start in [30, 10, 50, 20, 40] {
                db.save_call_record(call(start, CallStatus::Success))
                    .await
                    .unwrap();
            }

            let page = db.get_call_history(Page::first(2)).await.unwrap();
            let starts: Vec<_> = page.iter().map(|c| c.start_time).collect();
            assert_eq!(starts, vec![at(50), at(40)], "{}", db.name());

            let next = db
                .get_call_history(Page {
                    limit: 2,
                    offset: 2,
                })
                .await
                .unwrap();
            let starts: Vec<_> = next.iter().map(|c| c.start_time).collect();
            assert_eq!(starts, vec![at(30), at(20)], "{}", db.name());
        }
    }

    #[tokio::test]
    async fn test_update_call_record() {
        for db in adapters().await {
            let mut input = call(0, CallStatus::Missed);
            input.end_time = None;
            let saved = db.save_call_record(input).await.unwrap();
            assert_eq!(saved.duration_ms, None);

            let updated = db
                .update_call_record(
                    &saved.id,
                    CallRecordUpdate {
                        end_time: Some(at(90)),
                        status: Some(CallStatus::Success),
                    },
                )
                .await
                .unwrap();
            assert_eq!(updated.duration_ms, Some(90_000));

            let loaded = db.get_call_record(&saved.id).await.unwrap().unwrap();
            assert_eq!(loaded, updated, "{}", db.name());

            assert!(matches!(
                db.update_call_record("missing", CallRecordUpdate::default())
                    .await,
                Err(StorageError::NotFound(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_settings_created_on_first_access() {
        for db in adapters().await {
            let first = db.get_user_settings().await.unwrap();
            assert_eq!(first.id, UserSettings::SINGLETON_ID);
            assert_eq!(first.codec_preference, CodecPreference::Hardware);

            let updated = db
                .update_user_settings(UserSettingsUpdate {
                    codec_preference: Some(CodecPreference::Software),
                    auto_record: Some(true),
                    ..Default::default()
                })
                .await
                .unwrap();
            assert_eq!(updated.codec_preference, CodecPreference::Software);
            assert!(updated.auto_record);
            assert!(updated.updated_at >= first.updated_at);
            assert_eq!(updated.created_at, first.created_at);

            assert_eq!(db.get_user_settings().await.unwrap(), updated, "{}", db.name());
        }
    }

    #[tokio::test]
    async fn test_recordings_link_and_cascade() {
        for db in adapters().await {
            let saved = db
                .save_call_record(call(0, CallStatus::Success))
                .await
                .unwrap();

            let linked = db
                .save_recording(recording(Some(saved.id.clone()), 10))
                .await
                .unwrap();
            let loose = db.save_recording(recording(None, 20)).await.unwrap();

            assert!(matches!(
                db.save_recording(recording(Some("nope".to_string()), 1))
                    .await,
                Err(StorageError::InvalidReference(_))
            ));

            let by_call = db.get_recordings_by_call(&saved.id).await.unwrap();
            assert_eq!(by_call, vec![linked.clone()]);

            let all = db.get_recordings(Page::default()).await.unwrap();
            assert_eq!(all.len(), 2);
            assert_eq!(all[0].id, loose.id, "{}", db.name());

            assert!(db.delete_call_record(&saved.id).await.unwrap());
            assert!(db.get_recording(&linked.id).await.unwrap().is_none());
            assert!(db.get_recording(&loose.id).await.unwrap().is_some());
            assert!(!db.delete_call_record(&saved.id).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_stats_and_clear() {
        for db in adapters().await {
            db.save_call_record(call(0, CallStatus::Success))
                .await
                .unwrap();
            db.save_call_record(call(100, CallStatus::Failed))
                .await
                .unwrap();
            db.save_recording(recording(None, 1_000)).await.unwrap();

            let stats = db.get_stats().await.unwrap();
            assert_eq!(stats.total_calls, 2);
            assert_eq!(stats.successful_calls, 1);
            assert_eq!(stats.failed_calls, 1);
            assert_eq!(stats.total_call_duration_ms, 60_000);
            assert_eq!(stats.total_recordings, 1);
            assert_eq!(stats.total_recording_bytes, 1_000);

            db.clear_all().await.unwrap();
            assert_eq!(db.get_stats().await.unwrap(), StorageStats::default());
        }
    }

    #[tokio::test]
    async fn test_closed_storage_rejects_calls() {
        for db in adapters().await {
            db.close().await.unwrap();
            assert!(matches!(
                db.get_user_settings().await,
                Err(StorageError::Closed)
            ));
        }
    }
}
