//! Codec Module
//!
//! Encoder- und Decoder-Zustandsmaschinen mit Hardware/Software-Pfadwahl.
//! Hardware-Codecs sind eine Plattform-Anbindung ([`HardwareCodecs`]);
//! Software-Pfade: H.264 über OpenH264 und G.711 µ-law.

mod backend;
mod config;
mod error;
mod manager;
mod software;

pub use backend::{
    AudioDecoderBackend, AudioEncoderBackend, CodecId, CodecPath, EncodedChunk, HardwareCodecs,
    NoHardwareCodecs, VideoDecoderBackend, VideoEncoderBackend,
};
pub use config::{
    AudioCodec, AudioDecoderConfig, AudioEncoderConfig, DecoderConfig, EncoderConfig,
    HardwareAcceleration, VideoCodec, VideoDecoderConfig, VideoEncoderConfig,
};
pub use error::CodecError;
pub use manager::{CodecCapability, CodecManager, CodecState, CodecStats};
pub use software::{g711, software_codecs};
