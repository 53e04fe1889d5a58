use image::RgbImage;
use serde::{Deserialize, Serialize};

/// Bounding box for a located face, in frame pixel coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Width over height. Zero-height boxes report 0.0.
    pub fn aspect_ratio(&self) -> f32 {
        if self.height > 0.0 {
            self.width / self.height
        } else {
            0.0
        }
    }

    /// Integer pixel rectangle clipped to a `frame_w` x `frame_h` image.
    ///
    /// Returns `(x, y, width, height)`, or `None` when nothing of the box
    /// lies inside the image.
    pub fn pixel_rect(&self, frame_w: u32, frame_h: u32) -> Option<(u32, u32, u32, u32)> {
        let x0 = self.x.max(0.0).floor() as u32;
        let y0 = self.y.max(0.0).floor() as u32;
        let x1 = ((self.x + self.width).min(frame_w as f32)).ceil().max(0.0) as u32;
        let y1 = ((self.y + self.height).min(frame_h as f32)).ceil().max(0.0) as u32;
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some((x0, y0, x1 - x0, y1 - y0))
    }

    /// Copy the region out of `image` into an owned crop.
    pub fn crop(&self, image: &RgbImage) -> Option<RgbImage> {
        let (x, y, w, h) = self.pixel_rect(image.width(), image.height())?;
        Some(image::imageops::crop_imm(image, x, y, w, h).to_image())
    }
}

/// Unit-length face descriptor.
///
/// The only way to build one is [`Descriptor::from_raw`], which normalizes,
/// so every value of this type is safe to feed into a dot-product similarity.
/// Extractors signal an invalid result with `None` instead of a descriptor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Descriptor {
    values: Vec<f32>,
}

impl Descriptor {
    /// L2-normalize `raw`. Empty, non-finite or zero-norm input yields `None`.
    pub fn from_raw(raw: Vec<f32>) -> Option<Self> {
        if raw.is_empty() || raw.iter().any(|v| !v.is_finite()) {
            return None;
        }
        let norm = raw.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm <= f32::EPSILON {
            return None;
        }
        Some(Self {
            values: raw.into_iter().map(|v| v / norm).collect(),
        })
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Cosine similarity in [-1, 1].
    ///
    /// Both sides are unit length, so this is the clamped dot product.
    /// Descriptors of different dimension never match and score -1.
    pub fn similarity(&self, other: &Descriptor) -> f32 {
        if self.values.len() != other.values.len() {
            return -1.0;
        }
        let dot: f32 = self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| a * b)
            .sum();
        dot.clamp(-1.0, 1.0)
    }
}

impl<'de> Deserialize<'de> for Descriptor {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            values: Vec<f32>,
        }
        let raw = Raw::deserialize(deserializer)?;
        Descriptor::from_raw(raw.values)
            .ok_or_else(|| serde::de::Error::custom("descriptor is empty or not normalizable"))
    }
}

/// An enrolled identity as held in the roster snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub name: String,
    pub descriptor: Descriptor,
}
