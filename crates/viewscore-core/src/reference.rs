//! Reference image loading and alpha compositing.

use std::path::Path;

use image::{DynamicImage, Rgb, RgbImage};
use tracing::debug;

use crate::error::{EvalError, Result};

/// Loads the reference image and flattens any transparency onto a solid
/// backdrop, so every scorer sees the same background.
#[derive(Debug, Clone)]
pub struct ReferencePreparer {
    background: Rgb<u8>,
}

impl Default for ReferencePreparer {
    fn default() -> Self {
        Self::new()
    }
}

impl ReferencePreparer {
    /// Composites over opaque white.
    pub fn new() -> Self {
        Self {
            background: Rgb([255, 255, 255]),
        }
    }

    pub fn with_background(background: Rgb<u8>) -> Self {
        Self { background }
    }

    /// Read `path` and return an opaque 8-bit RGB buffer.
    pub fn prepare(&self, path: &Path) -> Result<RgbImage> {
        let image = image::open(path).map_err(|e| EvalError::read(path, e))?;
        debug!(
            path = %path.display(),
            width = image.width(),
            height = image.height(),
            alpha = image.color().has_alpha(),
            "Loaded reference image"
        );
        Ok(self.flatten(&image))
    }

    /// `rgb * alpha + background * (1 - alpha)` per channel, alpha in [0, 1].
    pub fn flatten(&self, image: &DynamicImage) -> RgbImage {
        if !image.color().has_alpha() {
            return image.to_rgb8();
        }

        let rgba = image.to_rgba32f();
        let bg = self.background.0.map(|c| c as f32 / 255.0);
        let mut out = RgbImage::new(rgba.width(), rgba.height());

        for (dst, src) in out.pixels_mut().zip(rgba.pixels()) {
            let alpha = src[3].clamp(0.0, 1.0);
            for c in 0..3 {
                let v = src[c] * alpha + bg[c] * (1.0 - alpha);
                dst[c] = to_u8(v);
            }
        }

        out
    }
}

fn to_u8(v: f32) -> u8 {
    (v * 255.0).round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn transparent_pixel_becomes_white() {
        let img = RgbaImage::from_pixel(2, 2, Rgba([12, 200, 40, 0]));
        let out = ReferencePreparer::new().flatten(&DynamicImage::ImageRgba8(img));
        assert!(out.pixels().all(|p| *p == Rgb([255, 255, 255])));
    }

    #[test]
    fn opaque_pixel_is_unchanged() {
        let img = RgbaImage::from_pixel(3, 1, Rgba([12, 200, 40, 255]));
        let out = ReferencePreparer::new().flatten(&DynamicImage::ImageRgba8(img));
        assert!(out.pixels().all(|p| *p == Rgb([12, 200, 40])));
    }

    #[test]
    fn half_alpha_blends_toward_background() {
        let img = RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 128]));
        let out = ReferencePreparer::new().flatten(&DynamicImage::ImageRgba8(img));
        let v = out.get_pixel(0, 0)[0];
        assert!((126..=128).contains(&v), "got {v}");
    }

    #[test]
    fn rgb_input_passes_through() {
        let img = RgbImage::from_pixel(4, 4, Rgb([1, 2, 3]));
        let out = ReferencePreparer::new().flatten(&DynamicImage::ImageRgb8(img.clone()));
        assert_eq!(out, img);
    }

    #[test]
    fn custom_background() {
        let img = RgbaImage::from_pixel(1, 1, Rgba([255, 255, 255, 0]));
        let prep = ReferencePreparer::with_background(Rgb([0, 0, 0]));
        let out = prep.flatten(&DynamicImage::ImageRgba8(img));
        assert_eq!(*out.get_pixel(0, 0), Rgb([0, 0, 0]));
    }

    #[test]
    fn missing_file_is_read_error() {
        let err = ReferencePreparer::new()
            .prepare(Path::new("/nonexistent/reference.png"))
            .unwrap_err();
        assert!(matches!(err, EvalError::Read { .. }));
    }

    #[test]
    fn prepare_reads_png_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ref.png");
        RgbaImage::from_pixel(8, 8, Rgba([255, 0, 0, 255]))
            .save(&path)
            .unwrap();

        let out = ReferencePreparer::new().prepare(&path).unwrap();
        assert_eq!(out.dimensions(), (8, 8));
        assert!(out.pixels().all(|p| *p == Rgb([255, 0, 0])));
    }
}
