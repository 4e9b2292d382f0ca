//! Fehler-Typen für Encoder und Decoder

use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Invalid codec configuration: {0}")]
    InvalidConfig(String),

    #[error("Codec not configured: {0}")]
    NotConfigured(String),

    #[error("Codec not active: {0}")]
    NotActive(String),

    #[error("Codec not supported: {0}")]
    Unsupported(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Codec backend error: {0}")]
    Backend(String),
}
