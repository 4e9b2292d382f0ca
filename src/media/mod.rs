//! Media Module
//!
//! Lokale Geräte-Streams, Remote-Streams pro Peer und Bildschirmfreigabe.

mod backend;
mod error;
mod frame;
mod manager;
#[cfg(feature = "native-audio")]
mod native;
mod screen_share;
mod stream;
mod types;

pub use backend::{create_media_backend, MediaBackend, MediaBackendKind, VirtualMediaBackend};
pub use error::MediaError;
pub use frame::{AudioFrame, PixelFormat, VideoFrame};
pub use manager::MediaManager;
#[cfg(feature = "native-audio")]
pub use native::CpalMediaBackend;
pub use screen_share::ScreenShareManager;
pub use stream::StreamManager;
pub use types::{
    AudioConstraints, DeviceKind, DisplayConstraints, MediaConstraints, MediaDeviceInfo,
    MediaStream, MediaTrack, TrackKind, TrackSource, VideoConstraints,
};
