//! Pixel-Effekte auf RGB24-Frames

use super::types::{BackgroundMode, BeautyParams, ColorParams};
use crate::media::VideoFrame;

const BYTES_PER_PIXEL: usize = 3;

fn clamp_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// Box-Blur mit getrennten Durchgängen (horizontal, dann vertikal)
pub fn box_blur(data: &[u8], width: usize, height: usize, radius: usize) -> Vec<u8> {
    if radius == 0 || width == 0 || height == 0 {
        return data.to_vec();
    }

    let mut horizontal = vec![0u8; data.len()];
    for y in 0..height {
        for x in 0..width {
            let x0 = x.saturating_sub(radius);
            let x1 = (x + radius).min(width - 1);
            let count = (x1 - x0 + 1) as u32;
            for c in 0..BYTES_PER_PIXEL {
                let sum: u32 = (x0..=x1)
                    .map(|xi| data[(y * width + xi) * BYTES_PER_PIXEL + c] as u32)
                    .sum();
                horizontal[(y * width + x) * BYTES_PER_PIXEL + c] = (sum / count) as u8;
            }
        }
    }

    let mut out = vec![0u8; data.len()];
    for y in 0..height {
        let y0 = y.saturating_sub(radius);
        let y1 = (y + radius).min(height - 1);
        let count = (y1 - y0 + 1) as u32;
        for x in 0..width {
            for c in 0..BYTES_PER_PIXEL {
                let sum: u32 = (y0..=y1)
                    .map(|yi| horizontal[(yi * width + x) * BYTES_PER_PIXEL + c] as u32)
                    .sum();
                out[(y * width + x) * BYTES_PER_PIXEL + c] = (sum / count) as u8;
            }
        }
    }
    out
}

/// Hautglättung: Original und Blur werden nach `intensity` gemischt
pub fn beauty(frame: &VideoFrame, params: &BeautyParams) -> VideoFrame {
    let (w, h) = (frame.width as usize, frame.height as usize);
    let smoothed = box_blur(&frame.data, w, h, 1);
    let lift = params.brighten * 40.0;

    let data: Vec<u8> = frame
        .data
        .iter()
        .zip(smoothed.iter())
        .map(|(&orig, &blur)| {
            let mixed = orig as f32 * (1.0 - params.intensity) + blur as f32 * params.intensity;
            clamp_u8(mixed + lift)
        })
        .collect();

    VideoFrame::rgb(frame.width, frame.height, frame.timestamp_us, data)
}

/// Rotiert den Farbton um `degrees` (Rotation um die Graudiagonale)
fn hue_matrix(degrees: f32) -> [[f32; 3]; 3] {
    let (sin, cos) = degrees.to_radians().sin_cos();
    let third: f32 = 1.0 / 3.0;
    let sq = third.sqrt();

    let a = cos + (1.0 - cos) * third;
    let b = third * (1.0 - cos) - sq * sin;
    let c = third * (1.0 - cos) + sq * sin;

    [[a, b, c], [c, a, b], [b, c, a]]
}

/// Helligkeit, Kontrast, Sättigung, Farbton
pub fn color(frame: &VideoFrame, params: &ColorParams) -> VideoFrame {
    let brightness = params.brightness * 2.55;
    let contrast = (100.0 + params.contrast) / 100.0;
    let saturation = (100.0 + params.saturation) / 100.0;
    let hue = (params.hue != 0.0).then(|| hue_matrix(params.hue));

    let mut data = Vec::with_capacity(frame.data.len());
    for px in frame.data.chunks_exact(BYTES_PER_PIXEL) {
        let mut rgb = [px[0] as f32, px[1] as f32, px[2] as f32];

        for v in rgb.iter_mut() {
            *v = (*v - 128.0) * contrast + 128.0 + brightness;
        }

        let gray = 0.299 * rgb[0] + 0.587 * rgb[1] + 0.114 * rgb[2];
        for v in rgb.iter_mut() {
            *v = gray + (*v - gray) * saturation;
        }

        if let Some(m) = &hue {
            rgb = [
                m[0][0] * rgb[0] + m[0][1] * rgb[1] + m[0][2] * rgb[2],
                m[1][0] * rgb[0] + m[1][1] * rgb[1] + m[1][2] * rgb[2],
                m[2][0] * rgb[0] + m[2][1] * rgb[1] + m[2][2] * rgb[2],
            ];
        }

        data.extend(rgb.iter().map(|&v| clamp_u8(v)));
    }

    VideoFrame::rgb(frame.width, frame.height, frame.timestamp_us, data)
}

/// Ersetzt bzw. verwischt den Hintergrund
///
/// `mask` enthält pro Pixel die Vordergrund-Wahrscheinlichkeit (0.0..=1.0).
pub fn background(frame: &VideoFrame, mask: &[f32], mode: &BackgroundMode) -> VideoFrame {
    let (w, h) = (frame.width as usize, frame.height as usize);
    let backdrop: Vec<u8> = match mode {
        BackgroundMode::Blur { radius } => box_blur(&frame.data, w, h, *radius as usize),
        BackgroundMode::Replace { color } => color
            .iter()
            .copied()
            .cycle()
            .take(frame.data.len())
            .collect(),
    };

    let mut data = Vec::with_capacity(frame.data.len());
    for (i, (fg, bg)) in frame
        .data
        .chunks_exact(BYTES_PER_PIXEL)
        .zip(backdrop.chunks_exact(BYTES_PER_PIXEL))
        .enumerate()
    {
        let alpha = mask.get(i).copied().unwrap_or(1.0).clamp(0.0, 1.0);
        for c in 0..BYTES_PER_PIXEL {
            data.push(clamp_u8(fg[c] as f32 * alpha + bg[c] as f32 * (1.0 - alpha)));
        }
    }

    VideoFrame::rgb(frame.width, frame.height, frame.timestamp_us, data)
}

// ============================================================================
// TESTS
// ============================================================================
