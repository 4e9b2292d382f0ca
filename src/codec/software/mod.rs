//! Software-Codecs

pub mod g711;
#[cfg(feature = "software-h264")]
mod h264;

use super::backend::{
    AudioDecoderBackend, AudioEncoderBackend, CodecId, VideoDecoderBackend, VideoEncoderBackend,
};
use super::config::{
    AudioCodec, AudioDecoderConfig, AudioEncoderConfig, VideoCodec, VideoDecoderConfig,
    VideoEncoderConfig,
};
use super::error::CodecError;

/// Codecs mit Software-Pfad in diesem Build
pub fn software_codecs() -> Vec<CodecId> {
    let mut codecs = Vec::new();
    if cfg!(feature = "software-h264") {
        codecs.push(CodecId::Video(VideoCodec::H264));
    }
    codecs.push(CodecId::Audio(AudioCodec::Pcmu));
    codecs
}

fn unsupported(codec: CodecId) -> CodecError {
    CodecError::Unsupported(format!("no software path for {}", codec.mime_type()))
}

pub(crate) fn video_encoder(
    config: &VideoEncoderConfig,
) -> Result<Box<dyn VideoEncoderBackend>, CodecError> {
    match config.codec {
        #[cfg(feature = "software-h264")]
        VideoCodec::H264 => Ok(Box::new(h264::OpenH264Encoder::new(config.clone())?)),
        codec => Err(unsupported(CodecId::Video(codec))),
    }
}

pub(crate) fn video_decoder(
    config: &VideoDecoderConfig,
) -> Result<Box<dyn VideoDecoderBackend>, CodecError> {
    match config.codec {
        #[cfg(feature = "software-h264")]
        VideoCodec::H264 => Ok(Box::new(h264::OpenH264Decoder::new()?)),
        codec => Err(unsupported(CodecId::Video(codec))),
    }
}

pub(crate) fn audio_encoder(
    config: &AudioEncoderConfig,
) -> Result<Box<dyn AudioEncoderBackend>, CodecError> {
    match config.codec {
        AudioCodec::Pcmu => Ok(Box::new(g711::G711Encoder::new())),
        codec => Err(unsupported(CodecId::Audio(codec))),
    }
}

pub(crate) fn audio_decoder(
    config: &AudioDecoderConfig,
) -> Result<Box<dyn AudioDecoderBackend>, CodecError> {
    match config.codec {
        AudioCodec::Pcmu => Ok(Box::new(g711::G711Decoder)),
        codec => Err(unsupported(CodecId::Audio(codec))),
    }
}
