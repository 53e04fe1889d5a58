//! Frame type and pixel conversions: YUYV to RGB, RGB to RGB565.

use image::RgbImage;
use std::time::Instant;

/// A captured RGB camera frame. Immutable once built; consumers clone it.
#[derive(Clone)]
pub struct Frame {
    image: RgbImage,
    timestamp: Instant,
    sequence: u32,
}

impl Frame {
    pub const CHANNELS: u32 = 3;

    /// Wrap packed RGB888 bytes (`width * height * 3`).
    pub fn new(data: Vec<u8>, width: u32, height: u32, sequence: u32) -> Result<Self, FrameError> {
        let expected = (width * height * Self::CHANNELS) as usize;
        let actual = data.len();
        let image = RgbImage::from_raw(width, height, data)
            .filter(|_| actual == expected)
            .ok_or(FrameError::InvalidLength { expected, actual })?;
        Ok(Self::from_rgb_image(image, sequence))
    }

    pub fn from_rgb_image(image: RgbImage, sequence: u32) -> Self {
        Self {
            image,
            timestamp: Instant::now(),
            sequence,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn channels(&self) -> u32 {
        Self::CHANNELS
    }

    pub fn data(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }

    /// Average luma (0.0–255.0), BT.601 weights.
    pub fn avg_brightness(&self) -> f32 {
        let n = self.image.pixels().len();
        if n == 0 {
            return 0.0;
        }
        let sum: f32 = self
            .image
            .pixels()
            .map(|p| 0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32)
            .sum();
        sum / n as f32
    }
}

/// Convert packed YUYV (4:2:2) to RGB888 using BT.601 limited-range
/// coefficients.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for chunk in yuyv[..expected].chunks_exact(4) {
        let (u, v) = (chunk[1], chunk[3]);
        rgb.extend_from_slice(&ycbcr_to_rgb(chunk[0], u, v));
        rgb.extend_from_slice(&ycbcr_to_rgb(chunk[2], u, v));
    }
    Ok(rgb)
}

fn ycbcr_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clamp = |x: i32| ((x + 128) >> 8).clamp(0, 255) as u8;
    [
        clamp(298 * c + 409 * e),
        clamp(298 * c - 100 * d - 208 * e),
        clamp(298 * c + 516 * d),
    ]
}

/// Pack one RGB888 pixel into RGB565.
pub fn pack_rgb565(r: u8, g: u8, b: u8) -> u16 {
    ((r as u16 & 0xF8) << 8) | ((g as u16 & 0xFC) << 3) | (b as u16 >> 3)
}

/// Pack a horizontal run of RGB888 pixels into big-endian RGB565 bytes.
pub fn rgb_row_to_rgb565_be(rgb: &[u8], out: &mut Vec<u8>) {
    for px in rgb.chunks_exact(3) {
        out.extend_from_slice(&pack_rgb565(px[0], px[1], px[2]).to_be_bytes());
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}
