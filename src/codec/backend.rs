//! Codec-Backends
//!
//! Ein Backend verarbeitet genau eine Medienart in eine Richtung.
//! `Ok(None)` heißt "noch keine Ausgabe" (Puffern, Rate-Control) und ist
//! kein Fehler.

use super::config::{
    AudioCodec, AudioDecoderConfig, AudioEncoderConfig, VideoCodec, VideoDecoderConfig,
    VideoEncoderConfig,
};
use super::error::CodecError;
use crate::media::{AudioFrame, TrackKind, VideoFrame};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

// ============================================================================
// SHARED TYPES
// ============================================================================

/// Ausführungspfad eines aktiven Codecs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecPath {
    Hardware,
    Software,
}

/// Codec unabhängig von der Medienart
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "codec")]
pub enum CodecId {
    Video(VideoCodec),
    Audio(AudioCodec),
}

impl CodecId {
    pub fn mime_type(self) -> &'static str {
        match self {
            CodecId::Video(codec) => codec.mime_type(),
            CodecId::Audio(codec) => codec.mime_type(),
        }
    }
}

/// Kodierte Einheit (ein Video-Frame bzw. ein Audio-Paket)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedChunk {
    pub kind: TrackKind,
    pub data: Bytes,
    pub timestamp_us: u64,
    pub keyframe: bool,
}

// ============================================================================
// BACKEND TRAITS
// ============================================================================

pub trait VideoEncoderBackend: Send {
    fn encode(&mut self, frame: &VideoFrame) -> Result<Option<EncodedChunk>, CodecError>;

    /// Nächster Frame wird ein Keyframe
    fn request_keyframe(&mut self);
}

pub trait VideoDecoderBackend: Send {
    fn decode(&mut self, chunk: &EncodedChunk) -> Result<Option<VideoFrame>, CodecError>;
}

pub trait AudioEncoderBackend: Send {
    fn encode(&mut self, frame: &AudioFrame) -> Result<Option<EncodedChunk>, CodecError>;
}

pub trait AudioDecoderBackend: Send {
    fn decode(&mut self, chunk: &EncodedChunk) -> Result<Option<AudioFrame>, CodecError>;
}

// ============================================================================
// HARDWARE BINDING
// ============================================================================

/// Plattform-Anbindung für Hardware-Codecs
///
/// Jede Methode ist zugleich die Fähigkeitsprüfung: ein Fehler heißt, dass
/// der Pfad nicht verfügbar ist und auf Software ausgewichen wird.
pub trait HardwareCodecs: Send + Sync {
    fn name(&self) -> &'static str;

    /// Von der Hardware angebotene Codecs
    fn supported(&self) -> Vec<CodecId>;

    fn video_encoder(
        &self,
        config: &VideoEncoderConfig,
    ) -> Result<Box<dyn VideoEncoderBackend>, CodecError>;

    fn video_decoder(
        &self,
        config: &VideoDecoderConfig,
    ) -> Result<Box<dyn VideoDecoderBackend>, CodecError>;

    fn audio_encoder(
        &self,
        config: &AudioEncoderConfig,
    ) -> Result<Box<dyn AudioEncoderBackend>, CodecError>;

    fn audio_decoder(
        &self,
        config: &AudioDecoderConfig,
    ) -> Result<Box<dyn AudioDecoderBackend>, CodecError>;
}

/// Plattform ohne Hardware-Codecs
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHardwareCodecs;

impl NoHardwareCodecs {
    fn unavailable(what: &str) -> CodecError {
        CodecError::Unsupported(format!("no hardware {}", what))
    }
}

impl HardwareCodecs for NoHardwareCodecs {
    fn name(&self) -> &'static str {
        "none"
    }

    fn supported(&self) -> Vec<CodecId> {
        Vec::new()
    }

    fn video_encoder(
        &self,
        _config: &VideoEncoderConfig,
    ) -> Result<Box<dyn VideoEncoderBackend>, CodecError> {
        Err(Self::unavailable("video encoder"))
    }

    fn video_decoder(
        &self,
        _config: &VideoDecoderConfig,
    ) -> Result<Box<dyn VideoDecoderBackend>, CodecError> {
        Err(Self::unavailable("video decoder"))
    }

    fn audio_encoder(
        &self,
        _config: &AudioEncoderConfig,
    ) -> Result<Box<dyn AudioEncoderBackend>, CodecError> {
        Err(Self::unavailable("audio encoder"))
    }

    fn audio_decoder(
        &self,
        _config: &AudioDecoderConfig,
    ) -> Result<Box<dyn AudioDecoderBackend>, CodecError> {
        Err(Self::unavailable("audio decoder"))
    }
}
