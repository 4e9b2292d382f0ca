//! G.711 µ-law (PCMU)
//!
//! Arbeitet intern mit i16 Samples, die öffentliche API verwendet f32 im
//! Bereich [-1.0, 1.0] wie der restliche Medienpfad.

use crate::codec::backend::{AudioDecoderBackend, AudioEncoderBackend, EncodedChunk};
use crate::codec::error::CodecError;
use crate::media::{AudioFrame, TrackKind};
use bytes::Bytes;

pub const SAMPLE_RATE: u32 = 8000;

/// Samples pro Paket (20ms @ 8kHz)
pub const PACKET_SAMPLES: usize = 160;

const BIAS: i32 = 0x84;
const CLIP: i32 = 32635;

/// Kodiert f32 PCM zu µ-law Bytes
pub fn encode(pcm_samples: &[f32]) -> Vec<u8> {
    pcm_samples
        .iter()
        .map(|&sample| {
            let s = (sample * 32767.0) as i32;
            linear_to_ulaw(s.clamp(-32768, 32767) as i16)
        })
        .collect()
}

/// Dekodiert µ-law Bytes zu f32 PCM
pub fn decode(ulaw_bytes: &[u8]) -> Vec<f32> {
    ulaw_bytes
        .iter()
        .map(|&byte| ulaw_to_linear(byte) as f32 / 32767.0)
        .collect()
}

fn linear_to_ulaw(sample: i16) -> u8 {
    let sign = ((sample >> 8) & 0x80) as u8;
    let magnitude = (sample as i32).abs().min(CLIP) + BIAS;

    let mut mask = 0x4000;
    let mut exponent = 7;
    while magnitude & mask == 0 && exponent > 0 {
        mask >>= 1;
        exponent -= 1;
    }

    let mantissa = ((magnitude >> (exponent + 3)) & 0x0F) as u8;
    !(sign | ((exponent as u8) << 4) | mantissa)
}

fn ulaw_to_linear(ulaw_byte: u8) -> i16 {
    let byte = !ulaw_byte;
    let sign = byte & 0x80;
    let exponent = (byte >> 4) & 0x07;
    let mantissa = byte & 0x0F;

    let magnitude = ((((mantissa as i32) << 3) + BIAS) << exponent) - BIAS;
    if sign != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

// ============================================================================
// BACKENDS
// ============================================================================

/// Paketiert Eingangs-Samples in 20ms Pakete
pub struct G711Encoder {
    pending: Vec<f32>,
    /// Zeitstempel des ersten gepufferten Samples
    pending_start_us: Option<u64>,
}

impl G711Encoder {
    pub fn new() -> Self {
        Self {
            pending: Vec::with_capacity(PACKET_SAMPLES * 2),
            pending_start_us: None,
        }
    }
}

impl Default for G711Encoder {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioEncoderBackend for G711Encoder {
    fn encode(&mut self, frame: &AudioFrame) -> Result<Option<EncodedChunk>, CodecError> {
        if frame.sample_rate != SAMPLE_RATE || frame.channels != 1 {
            return Err(CodecError::InvalidInput(format!(
                "PCMU expects 8 kHz mono, got {} Hz / {} channels",
                frame.sample_rate, frame.channels
            )));
        }

        if self.pending.is_empty() {
            self.pending_start_us = Some(frame.timestamp_us);
        }
        self.pending.extend_from_slice(&frame.samples);

        if self.pending.len() < PACKET_SAMPLES {
            return Ok(None);
        }

        let packet: Vec<f32> = self.pending.drain(..PACKET_SAMPLES).collect();
        let timestamp_us = self.pending_start_us.unwrap_or(frame.timestamp_us);

        // Rest beginnt 20ms später
        self.pending_start_us = if self.pending.is_empty() {
            None
        } else {
            Some(timestamp_us + PACKET_SAMPLES as u64 * 1_000_000 / SAMPLE_RATE as u64)
        };

        Ok(Some(EncodedChunk {
            kind: TrackKind::Audio,
            data: Bytes::from(encode(&packet)),
            timestamp_us,
            keyframe: true,
        }))
    }
}

pub struct G711Decoder;

impl AudioDecoderBackend for G711Decoder {
    fn decode(&mut self, chunk: &EncodedChunk) -> Result<Option<AudioFrame>, CodecError> {
        if chunk.data.is_empty() {
            return Ok(None);
        }
        Ok(Some(AudioFrame::new(
            SAMPLE_RATE,
            1,
            chunk.timestamp_us,
            decode(&chunk.data),
        )))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_companding_is_close() {
        for original in [0.5f32, -0.25, 0.01] {
            let decoded = decode(&encode(&[original]));
            let diff = (original - decoded[0]).abs();
            assert!(diff < 0.05, "{} decoded as {}", original, decoded[0]);
        }
    }

    #[test]
    fn test_silence_and_clipping() {
        assert!(decode(&encode(&[0.0]))[0].abs() < 0.01);
        assert!(decode(&encode(&[1.5]))[0] > 0.9);
    }

    #[test]
    fn test_encoder_buffers_until_full_packet() {
        let mut encoder = G711Encoder::new();

        let half = AudioFrame::new(SAMPLE_RATE, 1, 1_000, vec![0.1; 100]);
        assert_eq!(encoder.encode(&half).unwrap(), None);

        let rest = AudioFrame::new(SAMPLE_RATE, 1, 13_500, vec![0.1; 100]);
        let chunk = encoder.encode(&rest).unwrap().unwrap();
        assert_eq!(chunk.data.len(), PACKET_SAMPLES);
        assert_eq!(chunk.timestamp_us, 1_000);
        assert_eq!(encoder.pending.len(), 40);
        assert_eq!(encoder.pending_start_us, Some(21_000));
    }

    #[test]
    fn test_encoder_rejects_wideband() {
        let mut encoder = G711Encoder::new();
        let frame = AudioFrame::new(48000, 1, 0, vec![0.0; 960]);
        assert!(matches!(
            encoder.encode(&frame),
            Err(CodecError::InvalidInput(_))
        ));
    }
}
