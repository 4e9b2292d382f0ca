use super::types::RecordingState;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecordError {
    #[error("Invalid recording state: {0:?}")]
    InvalidState(RecordingState),

    #[error("No segments to merge")]
    NoSegments,

    #[error("Invalid recording options: {0}")]
    InvalidOptions(String),

    #[error("Failed to write recording: {0}")]
    Io(#[from] std::io::Error),
}
