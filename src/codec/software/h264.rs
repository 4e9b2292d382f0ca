//! Software H.264 über OpenH264

use crate::codec::backend::{EncodedChunk, VideoDecoderBackend, VideoEncoderBackend};
use crate::codec::config::VideoEncoderConfig;
use crate::codec::error::CodecError;
use crate::media::{PixelFormat, TrackKind, VideoFrame};
use bytes::Bytes;
use openh264::decoder::Decoder;
use openh264::encoder::{
    BitRate, Encoder, EncoderConfig, FrameRate, IntraFramePeriod, RateControlMode, SpsPpsStrategy,
    UsageType,
};
use openh264::formats::{RgbSliceU8, YUVBuffer, YUVSource};
use openh264::OpenH264API;

/// NAL-Typ eines IDR-Slices
const NAL_IDR: u8 = 5;

// ============================================================================
// ENCODER
// ============================================================================

pub struct OpenH264Encoder {
    config: VideoEncoderConfig,
    encoder: Encoder,
}

impl OpenH264Encoder {
    pub fn new(config: VideoEncoderConfig) -> Result<Self, CodecError> {
        let encoder = Self::build(&config)?;
        tracing::debug!(
            "OpenH264 encoder ready: {}x{} @ {} fps, {} bps",
            config.width,
            config.height,
            config.frame_rate,
            config.bitrate_bps
        );
        Ok(Self { config, encoder })
    }

    fn build(config: &VideoEncoderConfig) -> Result<Encoder, CodecError> {
        let cfg = EncoderConfig::new()
            .usage_type(UsageType::CameraVideoRealTime)
            .max_frame_rate(FrameRate::from_hz(config.frame_rate as f32))
            .bitrate(BitRate::from_bps(config.bitrate_bps))
            .rate_control_mode(RateControlMode::Bitrate)
            // SPS/PPS mit jedem Keyframe, damit neue Decoder einsteigen können
            .sps_pps_strategy(SpsPpsStrategy::InAccessUnit)
            .intra_frame_period(IntraFramePeriod::from_num_frames(config.keyframe_interval));

        Encoder::with_api_config(OpenH264API::from_source(), cfg)
            .map_err(|e| CodecError::Backend(e.to_string()))
    }
}

impl VideoEncoderBackend for OpenH264Encoder {
    fn encode(&mut self, frame: &VideoFrame) -> Result<Option<EncodedChunk>, CodecError> {
        if frame.format != PixelFormat::Rgb24 || !frame.is_valid() {
            return Err(CodecError::InvalidInput(
                "expected a complete RGB24 frame".to_string(),
            ));
        }
        if (frame.width, frame.height) != (self.config.width, self.config.height) {
            return Err(CodecError::InvalidInput(format!(
                "frame is {}x{}, encoder expects {}x{}",
                frame.width, frame.height, self.config.width, self.config.height
            )));
        }

        let rgb = RgbSliceU8::new(&frame.data, (frame.width as usize, frame.height as usize));
        let yuv = YUVBuffer::from_rgb_source(rgb);

        let data = self
            .encoder
            .encode(&yuv)
            .map_err(|e| CodecError::Backend(e.to_string()))?
            .to_vec();

        // Von der Rate-Control übersprungen
        if data.is_empty() {
            return Ok(None);
        }

        Ok(Some(EncodedChunk {
            kind: TrackKind::Video,
            keyframe: contains_idr(&data),
            data: Bytes::from(data),
            timestamp_us: frame.timestamp_us,
        }))
    }

    fn request_keyframe(&mut self) {
        // Ein frischer Encoder beginnt immer mit einem IDR-Frame
        match Self::build(&self.config) {
            Ok(encoder) => self.encoder = encoder,
            Err(e) => tracing::warn!("Keyframe request failed: {}", e),
        }
    }
}

/// Sucht einen IDR-Slice im Annex-B Bytestream
fn contains_idr(data: &[u8]) -> bool {
    data.windows(4).any(|w| w[..3] == [0, 0, 1] && w[3] & 0x1F == NAL_IDR)
}

// ============================================================================
// DECODER
// ============================================================================

pub struct OpenH264Decoder {
    decoder: Decoder,
}

impl OpenH264Decoder {
    pub fn new() -> Result<Self, CodecError> {
        let decoder = Decoder::new().map_err(|e| CodecError::Backend(e.to_string()))?;
        Ok(Self { decoder })
    }
}

impl VideoDecoderBackend for OpenH264Decoder {
    fn decode(&mut self, chunk: &EncodedChunk) -> Result<Option<VideoFrame>, CodecError> {
        let Some(yuv) = self
            .decoder
            .decode(&chunk.data)
            .map_err(|e| CodecError::Backend(e.to_string()))?
        else {
            // Decoder braucht weitere Daten (z.B. nur SPS/PPS erhalten)
            return Ok(None);
        };

        let (width, height) = yuv.dimensions();
        let mut rgb = vec![0u8; width * height * 3];
        yuv.write_rgb8(&mut rgb);

        Ok(Some(VideoFrame::rgb(
            width as u32,
            height as u32,
            chunk.timestamp_us,
            rgb,
        )))
    }
}

// ============================================================================
// TESTS
// ============================================================================
