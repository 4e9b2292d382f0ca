//! Record Module - Aufnahme einer Session
//!
//! Unabhängig von der Call-Media: Daten werden blockweise zugeführt,
//! beim Stoppen zusammengeführt und optional auf Platte geschrieben.

mod error;
mod manager;
mod types;

pub use error::RecordError;
pub use manager::{save_artifact, RecordManager};
pub use types::{
    format_of, merge_segments, RecordingArtifact, RecordingOptions, RecordingSegment,
    RecordingState,
};
