use super::types::FilterType;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FilterError {
    #[error("Invalid {field}: {value} (allowed {min}..={max})")]
    OutOfRange {
        field: &'static str,
        value: f32,
        min: f32,
        max: f32,
    },

    #[error("Invalid filter config: {0}")]
    InvalidConfig(String),

    #[error("Filter not configured: {0:?}")]
    NotFound(FilterType),

    #[error("Unsupported frame: {0}")]
    UnsupportedFrame(String),

    #[error("Segmentation failed: {0}")]
    Segmentation(String),
}
