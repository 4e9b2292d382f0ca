//! Roh-Frames im Medienpfad (vor dem Encoder, nach dem Decoder)

use bytes::Bytes;

/// Pixel-Layout eines Video-Frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// 3 Bytes pro Pixel, zeilenweise
    Rgb24,
    /// Planares YUV 4:2:0
    I420,
}

impl PixelFormat {
    /// Erwartete Puffergröße für die gegebenen Dimensionen
    pub fn buffer_len(self, width: u32, height: u32) -> usize {
        let (w, h) = (width as usize, height as usize);
        match self {
            PixelFormat::Rgb24 => w * h * 3,
            PixelFormat::I420 => w * h + 2 * (w.div_ceil(2) * h.div_ceil(2)),
        }
    }
}

/// Unkomprimierter Video-Frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub timestamp_us: u64,
    pub data: Bytes,
}

impl VideoFrame {
    pub fn rgb(width: u32, height: u32, timestamp_us: u64, data: impl Into<Bytes>) -> Self {
        Self {
            width,
            height,
            format: PixelFormat::Rgb24,
            timestamp_us,
            data: data.into(),
        }
    }

    /// Einfarbiger RGB-Frame
    pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let data: Vec<u8> = rgb
            .iter()
            .copied()
            .cycle()
            .take(PixelFormat::Rgb24.buffer_len(width, height))
            .collect();
        Self::rgb(width, height, 0, data)
    }

    /// Puffergröße passt zu Format und Dimensionen
    pub fn is_valid(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.data.len() == self.format.buffer_len(self.width, self.height)
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Unkomprimierter Audio-Frame (interleaved f32 Samples)
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub sample_rate: u32,
    pub channels: u16,
    pub timestamp_us: u64,
    pub samples: Vec<f32>,
}

impl AudioFrame {
    pub fn new(sample_rate: u32, channels: u16, timestamp_us: u64, samples: Vec<f32>) -> Self {
        Self {
            sample_rate,
            channels,
            timestamp_us,
            samples,
        }
    }

    /// Dauer des Frames in Mikrosekunden
    pub fn duration_us(&self) -> u64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0;
        }
        let per_channel = self.samples.len() as u64 / self.channels as u64;
        per_channel * 1_000_000 / self.sample_rate as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_lengths() {
        assert_eq!(PixelFormat::Rgb24.buffer_len(4, 2), 24);
        assert_eq!(PixelFormat::I420.buffer_len(4, 2), 8 + 2 * 2);
        assert_eq!(PixelFormat::I420.buffer_len(3, 3), 9 + 2 * 4);
    }

    #[test]
    fn test_solid_frame_is_valid() {
        let frame = VideoFrame::solid(8, 4, [1, 2, 3]);
        assert!(frame.is_valid());
        assert_eq!(&frame.data[..6], &[1, 2, 3, 1, 2, 3]);
    }

    #[test]
    fn test_audio_duration() {
        // 20ms @ 48kHz mono
        let frame = AudioFrame::new(48000, 1, 0, vec![0.0; 960]);
        assert_eq!(frame.duration_us(), 20_000);
    }
}
