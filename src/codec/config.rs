//! Encoder/Decoder Konfiguration

use super::error::CodecError;
use serde::{Deserialize, Serialize};

/// Maximale unterstützte Auflösung (8K)
const MAX_WIDTH: u32 = 7680;
const MAX_HEIGHT: u32 = 4320;

const MIN_BITRATE: u32 = 8_000;
const MAX_BITRATE: u32 = 50_000_000;

const SAMPLE_RATES: [u32; 5] = [8000, 16000, 24000, 44100, 48000];

// ============================================================================
// CODECS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    H264,
    Vp8,
    Vp9,
    Av1,
}

impl VideoCodec {
    pub fn mime_type(self) -> &'static str {
        match self {
            VideoCodec::H264 => "video/H264",
            VideoCodec::Vp8 => "video/VP8",
            VideoCodec::Vp9 => "video/VP9",
            VideoCodec::Av1 => "video/AV1",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    Opus,
    /// G.711 µ-law
    Pcmu,
}

impl AudioCodec {
    pub fn mime_type(self) -> &'static str {
        match self {
            AudioCodec::Opus => "audio/opus",
            AudioCodec::Pcmu => "audio/PCMU",
        }
    }
}

/// Bevorzugter Ausführungspfad
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HardwareAcceleration {
    #[default]
    PreferHardware,
    PreferSoftware,
    NoPreference,
}

impl HardwareAcceleration {
    /// Hardware wird zuerst versucht
    pub fn tries_hardware(self) -> bool {
        !matches!(self, HardwareAcceleration::PreferSoftware)
    }
}

// ============================================================================
// ENCODER CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoEncoderConfig {
    pub codec: VideoCodec,
    pub width: u32,
    pub height: u32,
    pub bitrate_bps: u32,
    pub frame_rate: u32,
    /// Abstand zwischen Keyframes in Frames (0 = nur auf Anforderung)
    pub keyframe_interval: u32,
    #[serde(default)]
    pub hardware_acceleration: HardwareAcceleration,
}

impl Default for VideoEncoderConfig {
    fn default() -> Self {
        Self {
            codec: VideoCodec::H264,
            width: 640,
            height: 480,
            bitrate_bps: 1_000_000,
            frame_rate: 30,
            keyframe_interval: 60,
            hardware_acceleration: HardwareAcceleration::PreferHardware,
        }
    }
}

impl VideoEncoderConfig {
    pub fn validate(&self) -> Result<(), CodecError> {
        validate_dimensions(self.width, self.height)?;
        if self.codec == VideoCodec::H264 && (self.width % 2 != 0 || self.height % 2 != 0) {
            return Err(CodecError::InvalidConfig(
                "H.264 requires even dimensions".to_string(),
            ));
        }
        if !(MIN_BITRATE..=MAX_BITRATE).contains(&self.bitrate_bps) {
            return Err(CodecError::InvalidConfig(format!(
                "bitrate {} out of range {}..={}",
                self.bitrate_bps, MIN_BITRATE, MAX_BITRATE
            )));
        }
        if !(1..=120).contains(&self.frame_rate) {
            return Err(CodecError::InvalidConfig(format!(
                "frame rate {} out of range 1..=120",
                self.frame_rate
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioEncoderConfig {
    pub codec: AudioCodec,
    pub sample_rate: u32,
    pub channels: u16,
    pub bitrate_bps: u32,
}

impl Default for AudioEncoderConfig {
    fn default() -> Self {
        Self {
            codec: AudioCodec::Pcmu,
            sample_rate: 8000,
            channels: 1,
            bitrate_bps: 64_000,
        }
    }
}

impl AudioEncoderConfig {
    pub fn validate(&self) -> Result<(), CodecError> {
        validate_audio(self.codec, self.sample_rate, self.channels)?;
        if !(MIN_BITRATE..=512_000).contains(&self.bitrate_bps) {
            return Err(CodecError::InvalidConfig(format!(
                "audio bitrate {} out of range",
                self.bitrate_bps
            )));
        }
        Ok(())
    }
}

/// Encoder-Konfiguration pro Medienart
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    pub video: Option<VideoEncoderConfig>,
    pub audio: Option<AudioEncoderConfig>,
}

impl EncoderConfig {
    pub fn validate(&self) -> Result<(), CodecError> {
        if self.video.is_none() && self.audio.is_none() {
            return Err(CodecError::InvalidConfig(
                "encoder config needs video or audio".to_string(),
            ));
        }
        if let Some(video) = &self.video {
            video.validate()?;
        }
        if let Some(audio) = &self.audio {
            audio.validate()?;
        }
        Ok(())
    }
}

// ============================================================================
// DECODER CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoDecoderConfig {
    pub codec: VideoCodec,
    /// Erwartete Auflösung (optional, wird aus dem Bitstream gelesen)
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub hardware_acceleration: HardwareAcceleration,
}

impl Default for VideoDecoderConfig {
    fn default() -> Self {
        Self {
            codec: VideoCodec::H264,
            width: None,
            height: None,
            hardware_acceleration: HardwareAcceleration::PreferHardware,
        }
    }
}

impl VideoDecoderConfig {
    pub fn validate(&self) -> Result<(), CodecError> {
        match (self.width, self.height) {
            (Some(w), Some(h)) => validate_dimensions(w, h),
            (None, None) => Ok(()),
            _ => Err(CodecError::InvalidConfig(
                "width and height must be given together".to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioDecoderConfig {
    pub codec: AudioCodec,
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for AudioDecoderConfig {
    fn default() -> Self {
        Self {
            codec: AudioCodec::Pcmu,
            sample_rate: 8000,
            channels: 1,
        }
    }
}

impl AudioDecoderConfig {
    pub fn validate(&self) -> Result<(), CodecError> {
        validate_audio(self.codec, self.sample_rate, self.channels)
    }
}

/// Decoder-Konfiguration pro Medienart
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    pub video: Option<VideoDecoderConfig>,
    pub audio: Option<AudioDecoderConfig>,
}

impl DecoderConfig {
    pub fn validate(&self) -> Result<(), CodecError> {
        if self.video.is_none() && self.audio.is_none() {
            return Err(CodecError::InvalidConfig(
                "decoder config needs video or audio".to_string(),
            ));
        }
        if let Some(video) = &self.video {
            video.validate()?;
        }
        if let Some(audio) = &self.audio {
            audio.validate()?;
        }
        Ok(())
    }
}

// ============================================================================
// VALIDATION
// ============================================================================

fn validate_dimensions(width: u32, height: u32) -> Result<(), CodecError> {
    if width == 0 || height == 0 || width > MAX_WIDTH || height > MAX_HEIGHT {
        return Err(CodecError::InvalidConfig(format!(
            "resolution {}x{} out of range",
            width, height
        )));
    }
    Ok(())
}

fn validate_audio(codec: AudioCodec, sample_rate: u32, channels: u16) -> Result<(), CodecError> {
    if !SAMPLE_RATES.contains(&sample_rate) {
        return Err(CodecError::InvalidConfig(format!(
            "unsupported sample rate {}",
            sample_rate
        )));
    }
    if !(1..=2).contains(&channels) {
        return Err(CodecError::InvalidConfig(format!(
            "unsupported channel count {}",
            channels
        )));
    }
    if codec == AudioCodec::Pcmu && (sample_rate != 8000 || channels != 1) {
        return Err(CodecError::InvalidConfig(
            "PCMU requires 8 kHz mono".to_string(),
        ));
    }
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(VideoEncoderConfig::default().validate().is_ok());
        assert!(AudioEncoderConfig::default().validate().is_ok());
        assert!(VideoDecoderConfig::default().validate().is_ok());
        assert!(AudioDecoderConfig::default().validate().is_ok());
    }

    #[test]
    fn test_empty_config_rejected() {
        assert!(EncoderConfig::default().validate().is_err());
        assert!(DecoderConfig::default().validate().is_err());
    }

    #[test]
    fn test_video_limits() {
        let odd = VideoEncoderConfig {
            width: 641,
            ..Default::default()
        };
        assert!(odd.validate().is_err());

        let slow = VideoEncoderConfig {
            frame_rate: 0,
            ..Default::default()
        };
        assert!(slow.validate().is_err());

        let huge = VideoEncoderConfig {
            bitrate_bps: 100_000_000,
            ..Default::default()
        };
        assert!(huge.validate().is_err());
    }

    #[test]
    fn test_pcmu_requires_narrowband() {
        let wide = AudioEncoderConfig {
            sample_rate: 48000,
            ..Default::default()
        };
        assert!(wide.validate().is_err());

        let opus = AudioEncoderConfig {
            codec: AudioCodec::Opus,
            sample_rate: 48000,
            channels: 2,
            bitrate_bps: 64_000,
        };
        assert!(opus.validate().is_ok());
    }

    #[test]
    fn test_acceleration_wire_names() {
        assert_eq!(
            serde_json::to_string(&HardwareAcceleration::PreferSoftware).unwrap(),
            "\"prefer-software\""
        );
    }
}
