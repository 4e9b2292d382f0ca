//! SQLite Storage
//!
//! Native Persistenz über rusqlite. Zeitstempel als INTEGER (ms seit Epoch),
//! Teilnehmer als JSON-Text.

use super::adapter::StorageAdapter;
use super::error::StorageError;
use super::models::{
    now_millis, CallHistory, CallRecordUpdate, NewCallRecord, NewRecording, Page, Recording,
    StorageStats, UserSettings, UserSettingsUpdate,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::PathBuf;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS call_history (
        id TEXT PRIMARY KEY,
        room_id TEXT,
        participants TEXT NOT NULL,
        start_time INTEGER NOT NULL,
        end_time INTEGER,
        duration INTEGER,
        type TEXT NOT NULL CHECK (type IN ('audio', 'video')),
        status TEXT NOT NULL CHECK (status IN ('success', 'failed', 'missed')),
        created_at INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_call_history_start_time ON call_history(start_time DESC);
    CREATE INDEX IF NOT EXISTS idx_call_history_room_id ON call_history(room_id);

    CREATE TABLE IF NOT EXISTS user_settings (
        id TEXT PRIMARY KEY,
        default_call_type TEXT NOT NULL CHECK (default_call_type IN ('audio', 'video')),
        enable_video_by_default INTEGER NOT NULL,
        enable_audio_by_default INTEGER NOT NULL,
        codec_preference TEXT NOT NULL CHECK (codec_preference IN ('hardware', 'software')),
        recording_quality TEXT NOT NULL CHECK (recording_quality IN ('low', 'medium', 'high')),
        auto_record INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS recordings (
        id TEXT PRIMARY KEY,
        call_history_id TEXT REFERENCES call_history(id) ON DELETE CASCADE,
        file_path TEXT NOT NULL,
        file_name TEXT NOT NULL,
        file_size INTEGER NOT NULL,
        duration INTEGER NOT NULL,
        format TEXT NOT NULL,
        resolution TEXT,
        created_at INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_recordings_call_history_id ON recordings(call_history_id);
    CREATE INDEX IF NOT EXISTS idx_recordings_created_at ON recordings(created_at DESC);
"#;

const CALL_COLUMNS: &str =
    "id, room_id, participants, start_time, end_time, duration, type, status, created_at";

const RECORDING_COLUMNS: &str =
    "id, call_history_id, file_path, file_name, file_size, duration, format, resolution, created_at";

const SETTINGS_COLUMNS: &str = "id, default_call_type, enable_video_by_default, \
    enable_audio_by_default, codec_preference, recording_quality, auto_record, created_at, updated_at";

// ============================================================================
// ROW MAPPING
// ============================================================================

fn time_from_row(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let ms: i64 = row.get(idx)?;
    DateTime::<Utc>::from_timestamp_millis(ms).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ms))
}

fn enum_from_row<T: DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_value(serde_json::Value::String(text))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Serde-Name einer Enum-Variante (identisch mit den CHECK-Werten)
fn enum_text<T: Serialize>(value: &T) -> Result<String, StorageError> {
    match serde_json::to_value(value)? {
        serde_json::Value::String(text) => Ok(text),
        other => Err(StorageError::Corrupt(format!("not a unit variant: {}", other))),
    }
}

fn call_from_row(row: &Row) -> rusqlite::Result<CallHistory> {
    let participants: String = row.get(2)?;
    let participants = serde_json::from_str(&participants)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;
    let end_time = match row.get::<_, Option<i64>>(4)? {
        Some(_) => Some(time_from_row(row, 4)?),
        None => None,
    };

    Ok(CallHistory {
        id: row.get(0)?,
        room_id: row.get(1)?,
        participants,
        start_time: time_from_row(row, 3)?,
        end_time,
        duration_ms: row.get(5)?,
        call_type: enum_from_row(row, 6)?,
        status: enum_from_row(row, 7)?,
        created_at: time_from_row(row, 8)?,
    })
}

fn recording_from_row(row: &Row) -> rusqlite::Result<Recording> {
    Ok(Recording {
        id: row.get(0)?,
        call_history_id: row.get(1)?,
        file_path: row.get(2)?,
        file_name: row.get(3)?,
        file_size: row.get::<_, i64>(4)?.max(0) as u64,
        duration_ms: row.get(5)?,
        format: row.get(6)?,
        resolution: row.get(7)?,
        created_at: time_from_row(row, 8)?,
    })
}

fn settings_from_row(row: &Row) -> rusqlite::Result<UserSettings> {
    Ok(UserSettings {
        id: row.get(0)?,
        default_call_type: enum_from_row(row, 1)?,
        enable_video_by_default: row.get::<_, i32>(2)? != 0,
        enable_audio_by_default: row.get::<_, i32>(3)? != 0,
        codec_preference: enum_from_row(row, 4)?,
        recording_quality: enum_from_row(row, 5)?,
        auto_record: row.get::<_, i32>(6)? != 0,
        created_at: time_from_row(row, 7)?,
        updated_at: time_from_row(row, 8)?,
    })
}

// ============================================================================
// DATABASE
// ============================================================================

enum Location {
    File(PathBuf),
    Memory,
}

/// SQLite-Datenbank (Thread-safe durch Mutex)
pub struct SqliteStorage {
    location: Location,
    conn: Mutex<Option<Connection>>,
}

impl SqliteStorage {
    /// Datenbank-Datei; wird bei `initialize` geöffnet bzw. angelegt
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            location: Location::File(path.into()),
            conn: Mutex::new(None),
        }
    }

    /// In-Memory Datenbank (Tests, flüchtige Sessions)
    pub fn open_in_memory() -> Self {
        Self {
            location: Location::Memory,
            conn: Mutex::new(None),
        }
    }

    /// Standardpfad im App-Datenverzeichnis
    pub fn default_path() -> Result<PathBuf, StorageError> {
        let proj_dirs = directories::ProjectDirs::from("com", "pulse", "pulse-rtc").ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "Could not determine app data directory",
            )
        })?;

        let mut path = proj_dirs.data_dir().to_path_buf();
        path.push("pulse-rtc.db");
        Ok(path)
    }

    fn connect(&self) -> Result<Connection, StorageError> {
        let conn = match &self.location {
            Location::File(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                tracing::info!("Opening database at {:?}", path);
                Connection::open(path)?
            }
            Location::Memory => Connection::open_in_memory()?,
        };

        // Für ON DELETE CASCADE und die Referenzprüfung
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(conn)
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let mut guard = self.conn.lock();
        let conn = guard.as_mut().ok_or(StorageError::Closed)?;
        f(conn)
    }

    fn ensure_settings(conn: &Connection) -> Result<UserSettings, StorageError> {
        let defaults = UserSettings::defaults(now_millis());
        conn.execute(
            r#"
            INSERT OR IGNORE INTO user_settings (
                id, default_call_type, enable_video_by_default, enable_audio_by_default,
                codec_preference, recording_quality, auto_record, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                defaults.id,
                enum_text(&defaults.default_call_type)?,
                defaults.enable_video_by_default as i32,
                defaults.enable_audio_by_default as i32,
                enum_text(&defaults.codec_preference)?,
                enum_text(&defaults.recording_quality)?,
                defaults.auto_record as i32,
                defaults.created_at.timestamp_millis(),
                defaults.updated_at.timestamp_millis(),
            ],
        )?;

        let sql = format!("SELECT {} FROM user_settings WHERE id = ?1", SETTINGS_COLUMNS);
        Ok(conn.query_row(&sql, params![UserSettings::SINGLETON_ID], settings_from_row)?)
    }

    fn get_call_inner(conn: &Connection, id: &str) -> Result<Option<CallHistory>, StorageError> {
        let sql = format!("SELECT {} FROM call_history WHERE id = ?1", CALL_COLUMNS);
        Ok(conn.query_row(&sql, params![id], call_from_row).optional()?)
    }
}

#[async_trait]
impl StorageAdapter for SqliteStorage {
    async fn initialize(&self) -> Result<(), StorageError> {
        let mut guard = self.conn.lock();
        if guard.is_none() {
            *guard = Some(self.connect()?);
            tracing::info!("SQLite storage initialized");
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), StorageError> {
        if let Some(conn) = self.conn.lock().take() {
            conn.close().map_err(|(_, e)| StorageError::Sqlite(e))?;
            tracing::info!("SQLite storage closed");
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn save_call_record(&self, record: NewCallRecord) -> Result<CallHistory, StorageError> {
        let call = CallHistory::from_new(uuid::Uuid::new_v4().to_string(), record, now_millis());

        self.with_conn(|conn| {
            conn.execute(
                r#"
                INSERT INTO call_history (
                    id, room_id, participants, start_time, end_time, duration, type, status, created_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
                params![
                    call.id,
                    call.room_id,
                    serde_json::to_string(&call.participants)?,
                    call.start_time.timestamp_millis(),
                    call.end_time.map(|t| t.timestamp_millis()),
                    call.duration_ms,
                    enum_text(&call.call_type)?,
                    enum_text(&call.status)?,
                    call.created_at.timestamp_millis(),
                ],
            )?;
            Ok(())
        })?;

        tracing::debug!("Saved call record {}", call.id);
        Ok(call)
    }

    async fn get_call_record(&self, id: &str) -> Result<Option<CallHistory>, StorageError> {
        self.with_conn(|conn| Self::get_call_inner(conn, id))
    }

    async fn get_call_history(&self, page: Page) -> Result<Vec<CallHistory>, StorageError> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM call_history ORDER BY start_time DESC, rowid DESC LIMIT ?1 OFFSET ?2",
                CALL_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let calls = stmt
                .query_map(
                    params![page.limit as i64, page.offset as i64],
                    call_from_row,
                )?
                .collect::<rusqlite::Result<Vec<CallHistory>>>()?;
            Ok(calls)
        })
    }

    async fn update_call_record(
        &self,
        id: &str,
        update: CallRecordUpdate,
    ) -> Result<CallHistory, StorageError> {
        self.with_conn(|conn| {
            let mut call = Self::get_call_inner(conn, id)?
                .ok_or_else(|| StorageError::NotFound(format!("call {}", id)))?;
            call.apply(update);

            conn.execute(
                r#"
                UPDATE call_history
                SET end_time = ?2, duration = ?3, status = ?4
                WHERE id = ?1
                "#,
                params![
                    id,
                    call.end_time.map(|t| t.timestamp_millis()),
                    call.duration_ms,
                    enum_text(&call.status)?,
                ],
            )?;
            Ok(call)
        })
    }

    async fn delete_call_record(&self, id: &str) -> Result<bool, StorageError> {
        self.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM call_history WHERE id = ?1", params![id])?;
            Ok(changed > 0)
        })
    }

    async fn get_user_settings(&self) -> Result<UserSettings, StorageError> {
        self.with_conn(|conn| Self::ensure_settings(conn))
    }

    async fn update_user_settings(
        &self,
        update: UserSettingsUpdate,
    ) -> Result<UserSettings, StorageError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let mut settings = Self::ensure_settings(&tx)?;
            settings.apply(update, now_millis());

            tx.execute(
                r#"
                UPDATE user_settings
                SET default_call_type = ?2,
                    enable_video_by_default = ?3,
                    enable_audio_by_default = ?4,
                    codec_preference = ?5,
                    recording_quality = ?6,
                    auto_record = ?7,
                    updated_at = ?8
                WHERE id = ?1
                "#,
                params![
                    settings.id,
                    enum_text(&settings.default_call_type)?,
                    settings.enable_video_by_default as i32,
                    settings.enable_audio_by_default as i32,
                    enum_text(&settings.codec_preference)?,
                    enum_text(&settings.recording_quality)?,
                    settings.auto_record as i32,
                    settings.updated_at.timestamp_millis(),
                ],
            )?;
            tx.commit()?;
            Ok(settings)
        })
    }

    async fn save_recording(&self, recording: NewRecording) -> Result<Recording, StorageError> {
        let recording =
            Recording::from_new(uuid::Uuid::new_v4().to_string(), recording, now_millis());

        self.with_conn(|conn| {
            if let Some(call_id) = &recording.call_history_id {
                let exists = conn
                    .query_row(
                        "SELECT 1 FROM call_history WHERE id = ?1",
                        params![call_id],
                        |_| Ok(()),
                    )
                    .optional()?
                    .is_some();
                if !exists {
                    return Err(StorageError::InvalidReference(call_id.clone()));
                }
            }

            conn.execute(
                r#"
                INSERT INTO recordings (
                    id, call_history_id, file_path, file_name, file_size, duration, format,
                    resolution, created_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
                params![
                    recording.id,
                    recording.call_history_id,
                    recording.file_path,
                    recording.file_name,
                    recording.file_size as i64,
                    recording.duration_ms,
                    recording.format,
                    recording.resolution,
                    recording.created_at.timestamp_millis(),
                ],
            )?;
            Ok(())
        })?;

        tracing::debug!("Saved recording {}", recording.id);
        Ok(recording)
    }

    async fn get_recording(&self, id: &str) -> Result<Option<Recording>, StorageError> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM recordings WHERE id = ?1", RECORDING_COLUMNS);
            Ok(conn.query_row(&sql, params![id], recording_from_row).optional()?)
        })
    }

    async fn get_recordings(&self, page: Page) -> Result<Vec<Recording>, StorageError> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM recordings ORDER BY created_at DESC, rowid DESC LIMIT ?1 OFFSET ?2",
                RECORDING_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let recordings = stmt
                .query_map(
                    params![page.limit as i64, page.offset as i64],
                    recording_from_row,
                )?
                .collect::<rusqlite::Result<Vec<Recording>>>()?;
            Ok(recordings)
        })
    }

    async fn get_recordings_by_call(
        &self,
        call_history_id: &str,
    ) -> Result<Vec<Recording>, StorageError> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM recordings WHERE call_history_id = ?1 \
                 ORDER BY created_at DESC, rowid DESC",
                RECORDING_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let recordings = stmt
                .query_map(params![call_history_id], recording_from_row)?
                .collect::<rusqlite::Result<Vec<Recording>>>()?;
            Ok(recordings)
        })
    }

    async fn delete_recording(&self, id: &str) -> Result<bool, StorageError> {
        self.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM recordings WHERE id = ?1", params![id])?;
            Ok(changed > 0)
        })
    }

    async fn get_stats(&self) -> Result<StorageStats, StorageError> {
        self.with_conn(|conn| {
            let mut stats = StorageStats::default();

            let sql = format!("SELECT {} FROM call_history", CALL_COLUMNS);
            let mut stmt = conn.prepare(&sql)?;
            for call in stmt.query_map([], call_from_row)? {
                stats.count_call(&call?);
            }

            let sql = format!("SELECT {} FROM recordings", RECORDING_COLUMNS);
            let mut stmt = conn.prepare(&sql)?;
            for recording in stmt.query_map([], recording_from_row)? {
                stats.count_recording(&recording?);
            }

            Ok(stats)
        })
    }

    async fn clear_all(&self) -> Result<(), StorageError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute_batch(
                r#"
                DELETE FROM recordings;
                DELETE FROM call_history;
                DELETE FROM user_settings;
                "#,
            )?;
            tx.commit()?;
            tracing::info!("Storage cleared");
            Ok(())
        })
    }
}
