//! Photometric and geometric variants of an enrollment crop.

use image::{imageops, Rgb, RgbImage};
use imageproc::filter::gaussian_blur_f32;
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};

const BRIGHTNESS_DELTA: i32 = 30;
const ROTATION_DEGREES: f32 = 8.0;
const BLUR_SIGMA: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Augmentation {
    /// The crop as captured.
    Original,
    Mirror,
    Brightness(i32),
    /// Rotation about the crop center, in degrees.
    Rotate(f32),
    Blur(f32),
}

/// Variants each accepted enrollment sample is expanded into.
pub const ENROLLMENT_AUGMENTATIONS: [Augmentation; 7] = [
    Augmentation::Original,
    Augmentation::Mirror,
    Augmentation::Brightness(BRIGHTNESS_DELTA),
    Augmentation::Brightness(-BRIGHTNESS_DELTA),
    Augmentation::Rotate(ROTATION_DEGREES),
    Augmentation::Rotate(-ROTATION_DEGREES),
    Augmentation::Blur(BLUR_SIGMA),
];

impl Augmentation {
    pub fn apply(self, crop: &RgbImage) -> RgbImage {
        match self {
            Augmentation::Original => crop.clone(),
            Augmentation::Mirror => imageops::flip_horizontal(crop),
            Augmentation::Brightness(delta) => imageops::brighten(crop, delta),
            Augmentation::Rotate(degrees) => rotate_about_center(
                crop,
                degrees.to_radians(),
                Interpolation::Bilinear,
                Rgb([0, 0, 0]),
            ),
            Augmentation::Blur(sigma) => gaussian_blur_f32(crop, sigma),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, _| {
            let v = (x * 255 / (w - 1)) as u8;
            Rgb([v, v, v])
        })
    }

    #[test]
    fn test_variants_keep_dimensions() {
        let crop = gradient(64, 48);
        for aug in ENROLLMENT_AUGMENTATIONS {
            assert_eq!(aug.apply(&crop).dimensions(), (64, 48), "{aug:?}");
        }
    }

    #[test]
    fn test_mirror_flips_columns() {
        let crop = gradient(64, 4);
        let mirrored = Augmentation::Mirror.apply(&crop);
        assert_eq!(mirrored.get_pixel(0, 0), crop.get_pixel(63, 0));
        assert_eq!(mirrored.get_pixel(63, 2), crop.get_pixel(0, 2));
    }

    #[test]
    fn test_brightness_shifts_and_saturates() {
        let crop = RgbImage::from_pixel(4, 4, Rgb([240, 100, 10]));
        let up = Augmentation::Brightness(30).apply(&crop);
        assert_eq!(up.get_pixel(0, 0), &Rgb([255, 130, 40]));
        let down = Augmentation::Brightness(-30).apply(&crop);
        assert_eq!(down.get_pixel(0, 0), &Rgb([210, 70, 0]));
    }

    #[test]
    fn test_original_is_identity() {
        let crop = gradient(16, 16);
        assert_eq!(Augmentation::Original.apply(&crop), crop);
    }
}
