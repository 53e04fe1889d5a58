//! Face crop quality scoring and geometric alignment checks.
//!
//! The composite score weighs region size (25%), sharpness (35%),
//! brightness (25%) and contrast (15%); every sub-score lies in [0, 1].

use crate::types::BoundingBox;
use image::{GrayImage, RgbImage};
use imageproc::filter::laplacian_filter;

const SIZE_WEIGHT: f32 = 0.25;
const SHARPNESS_WEIGHT: f32 = 0.35;
const BRIGHTNESS_WEIGHT: f32 = 0.25;
const CONTRAST_WEIGHT: f32 = 0.15;

/// Laplacian variance at which a crop counts as fully sharp.
const SHARPNESS_REFERENCE: f32 = 300.0;
/// 5th-to-95th percentile luma spread at which contrast saturates.
const CONTRAST_REFERENCE: f32 = 128.0;

const CANDIDATE_QUALITY_WEIGHT: f32 = 0.8;
const CANDIDATE_SIZE_WEIGHT: f32 = 0.2;

/// Geometric limits a region must satisfy to count as a centered, frontal face.
#[derive(Debug, Clone)]
pub struct AlignmentPolicy {
    pub min_aspect: f32,
    pub max_aspect: f32,
    /// Minimum region area in square pixels.
    pub min_area: f32,
    /// Distance in pixels the region must keep from every frame edge.
    pub border_margin: f32,
}

impl Default for AlignmentPolicy {
    fn default() -> Self {
        Self {
            min_aspect: 0.75,
            max_aspect: 1.25,
            min_area: 3600.0,
            border_margin: 8.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignmentRejection {
    Aspect,
    TooSmall,
    NearBorder,
}

/// Reject regions that are skewed, too small, or touching the frame border.
pub fn check_alignment(
    region: &BoundingBox,
    frame_w: u32,
    frame_h: u32,
    policy: &AlignmentPolicy,
) -> Result<(), AlignmentRejection> {
    let aspect = region.aspect_ratio();
    if !(policy.min_aspect..=policy.max_aspect).contains(&aspect) {
        return Err(AlignmentRejection::Aspect);
    }
    if region.area() < policy.min_area {
        return Err(AlignmentRejection::TooSmall);
    }
    let m = policy.border_margin;
    if region.x < m
        || region.y < m
        || region.x + region.width > frame_w as f32 - m
        || region.y + region.height > frame_h as f32 - m
    {
        return Err(AlignmentRejection::NearBorder);
    }
    Ok(())
}

/// Composite quality of a face crop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityScore {
    pub size: f32,
    pub sharpness: f32,
    pub brightness: f32,
    pub contrast: f32,
    pub overall: f32,
}

impl QualityScore {
    /// Score a crop. `ideal_face_size` is the short-side length in pixels
    /// at which the size sub-score saturates.
    pub fn measure(crop: &RgbImage, ideal_face_size: f32) -> Self {
        let gray = image::imageops::grayscale(crop);

        let short_side = crop.width().min(crop.height()) as f32;
        let size = if ideal_face_size > 0.0 {
            (short_side / ideal_face_size).clamp(0.0, 1.0)
        } else {
            1.0
        };
        let sharpness = (laplacian_variance(&gray) / SHARPNESS_REFERENCE).clamp(0.0, 1.0);
        let (brightness, contrast) = luma_scores(&gray);

        let overall = size * SIZE_WEIGHT
            + sharpness * SHARPNESS_WEIGHT
            + brightness * BRIGHTNESS_WEIGHT
            + contrast * CONTRAST_WEIGHT;

        Self {
            size,
            sharpness,
            brightness,
            contrast,
            overall,
        }
    }

    pub fn meets(&self, floor: f32) -> bool {
        self.overall >= floor
    }
}

/// Variance of the 3x3 Laplacian response; blur drives it toward zero.
fn laplacian_variance(gray: &GrayImage) -> f32 {
    if gray.width() < 3 || gray.height() < 3 {
        return 0.0;
    }
    let response = laplacian_filter(gray);
    let n = (response.width() * response.height()) as f64;
    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    for p in response.pixels() {
        let v = p[0] as f64;
        sum += v;
        sum_sq += v * v;
    }
    let mean = sum / n;
    ((sum_sq / n) - mean * mean).max(0.0) as f32
}

/// Brightness closeness to mid-gray and 5–95 percentile contrast range.
fn luma_scores(gray: &GrayImage) -> (f32, f32) {
    let total = (gray.width() * gray.height()) as usize;
    if total == 0 {
        return (0.0, 0.0);
    }

    let mut hist = [0usize; 256];
    let mut sum = 0u64;
    for p in gray.pixels() {
        hist[p[0] as usize] += 1;
        sum += p[0] as u64;
    }

    let mean = sum as f32 / total as f32;
    let brightness = 1.0 - ((mean - 127.5).abs() / 127.5).min(1.0);

    let percentile = |q: f32| -> usize {
        let target = ((total as f32) * q).ceil().max(1.0) as usize;
        let mut acc = 0usize;
        for (value, &count) in hist.iter().enumerate() {
            acc += count;
            if acc >= target {
                return value;
            }
        }
        255
    };
    let spread = percentile(0.95).saturating_sub(percentile(0.05)) as f32;
    let contrast = (spread / CONTRAST_REFERENCE).clamp(0.0, 1.0);

    (brightness, contrast)
}

/// A region chosen for this cycle together with its crop and quality.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub region: BoundingBox,
    pub crop: RgbImage,
    pub quality: QualityScore,
    /// Selection score: quality·0.8 + normalized size·0.2.
    pub score: f32,
}

/// Pick the best-scoring region of one cycle.
///
/// With a policy, regions failing [`check_alignment`] are ignored; without
/// one, every croppable region competes. Size is normalized against the
/// largest competing region. Ties keep the earlier region.
pub fn select_candidate(
    frame: &RgbImage,
    regions: &[BoundingBox],
    policy: Option<&AlignmentPolicy>,
    ideal_face_size: f32,
) -> Option<Candidate> {
    let (w, h) = frame.dimensions();
    let eligible: Vec<&BoundingBox> = regions
        .iter()
        .filter(|r| policy.map_or(true, |p| check_alignment(r, w, h, p).is_ok()))
        .collect();

    let largest = eligible.iter().map(|r| r.area()).fold(0.0f32, f32::max);
    if largest <= 0.0 {
        return None;
    }

    let mut best: Option<Candidate> = None;
    for region in eligible {
        let Some(crop) = region.crop(frame) else {
            continue;
        };
        let quality = QualityScore::measure(&crop, ideal_face_size);
        let score = quality.overall * CANDIDATE_QUALITY_WEIGHT
            + (region.area() / largest) * CANDIDATE_SIZE_WEIGHT;
        if best.as_ref().map_or(true, |b| score > b.score) {
            best = Some(Candidate {
                region: region.clone(),
                crop,
                quality,
                score,
            });
        }
    }
    best
}
