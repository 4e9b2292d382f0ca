//! Fehler bei Geräte-Zugriff und Medien-Erfassung

use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Invalid constraints: {0}")]
    InvalidConstraints(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("No local stream")]
    NoLocalStream,

    #[error("Media backend error: {0}")]
    Backend(String),
}
