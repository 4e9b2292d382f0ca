//! Gemeinsame Schnittstelle aller Speicher-Backends

use super::error::StorageError;
use super::models::{
    CallHistory, CallRecordUpdate, NewCallRecord, NewRecording, Page, Recording, StorageStats,
    UserSettings, UserSettingsUpdate,
};
use async_trait::async_trait;

/// CRUD über Anrufhistorie, Einstellungen und Aufnahmen
///
/// Listen kommen immer neueste zuerst. Fehler werden nicht wiederholt,
/// Retry-Logik liegt beim Aufrufer.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Legt Schema bzw. Indizes an; mehrfacher Aufruf ist erlaubt
    async fn initialize(&self) -> Result<(), StorageError>;

    /// Danach liefern alle Operationen [`StorageError::Closed`]
    async fn close(&self) -> Result<(), StorageError>;

    fn name(&self) -> &'static str;

    // ------------------------------------------------------------------------
    // Call History
    // ------------------------------------------------------------------------

    async fn save_call_record(&self, record: NewCallRecord) -> Result<CallHistory, StorageError>;

    async fn get_call_record(&self, id: &str) -> Result<Option<CallHistory>, StorageError>;

    /// Nach `start_time` absteigend
    async fn get_call_history(&self, page: Page) -> Result<Vec<CallHistory>, StorageError>;

    async fn update_call_record(
        &self,
        id: &str,
        update: CallRecordUpdate,
    ) -> Result<CallHistory, StorageError>;

    /// Löscht auch die zugehörigen Aufnahmen
    async fn delete_call_record(&self, id: &str) -> Result<bool, StorageError>;

    // ------------------------------------------------------------------------
    // User Settings
    // ------------------------------------------------------------------------

    /// Legt den Datensatz beim ersten Zugriff mit Standardwerten an
    async fn get_user_settings(&self) -> Result<UserSettings, StorageError>;

    async fn update_user_settings(
        &self,
        update: UserSettingsUpdate,
    ) -> Result<UserSettings, StorageError>;

    // ------------------------------------------------------------------------
    // Recordings
    // ------------------------------------------------------------------------

    /// Unbekannte `call_history_id` wird abgelehnt
    async fn save_recording(&self, recording: NewRecording) -> Result<Recording, StorageError>;

    async fn get_recording(&self, id: &str) -> Result<Option<Recording>, StorageError>;

    /// Nach `created_at` absteigend
    async fn get_recordings(&self, page: Page) -> Result<Vec<Recording>, StorageError>;

    async fn get_recordings_by_call(
        &self,
        call_history_id: &str,
    ) -> Result<Vec<Recording>, StorageError>;

    async fn delete_recording(&self, id: &str) -> Result<bool, StorageError>;

    // ------------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------------

    /// Aggregiert per Full Scan
    async fn get_stats(&self) -> Result<StorageStats, StorageError>;

    /// Löscht alle Daten (inklusive Einstellungen)
    async fn clear_all(&self) -> Result<(), StorageError>;
}
