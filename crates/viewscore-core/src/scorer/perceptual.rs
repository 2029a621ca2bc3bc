//! Perceptual distance on canonical-size buffers.

use std::sync::Arc;

use image::RgbImage;

use super::{check_buffer, Metric, PerceptualModel, Scorer};
use crate::error::{EvalError, Result};
use crate::resample::resize_area;

pub const DEFAULT_CANONICAL_SIZE: u32 = 512;

/// Learned perceptual distance, lower is more similar.
///
/// Both buffers are area-resampled to `canonical_size` × `canonical_size`
/// before the model sees them. The model output is reported as-is.
pub struct PerceptualDistance {
    model: Arc<dyn PerceptualModel>,
    canonical_size: u32,
}

impl PerceptualDistance {
    pub fn new(model: Arc<dyn PerceptualModel>, canonical_size: u32) -> Self {
        Self {
            model,
            canonical_size,
        }
    }

    pub fn canonical_size(&self) -> u32 {
        self.canonical_size
    }

    fn canonical(&self, what: &str, image: &RgbImage) -> Result<RgbImage> {
        check_buffer(Metric::Perceptual, what, image)?;
        if self.canonical_size == 0 {
            return Err(EvalError::scoring(
                Metric::Perceptual,
                "canonical size must be positive",
            ));
        }
        Ok(resize_area(image, self.canonical_size, self.canonical_size))
    }
}

impl Scorer for PerceptualDistance {
    type Reference = RgbImage;

    fn metric(&self) -> Metric {
        Metric::Perceptual
    }

    fn prepare_reference(&self, reference: &RgbImage) -> Result<RgbImage> {
        self.canonical("reference", reference)
    }

    fn score_prepared(&self, reference: &RgbImage, rendered: &RgbImage) -> Result<f64> {
        let view = self.canonical("rendered", rendered)?;
        let d = self
            .model
            .distance(reference, &view)
            .map_err(|e| EvalError::scoring(Metric::Perceptual, format!("{e:#}")))?;

        if !d.is_finite() || d < 0.0 {
            return Err(EvalError::scoring(
                Metric::Perceptual,
                format!("model returned invalid distance {d}"),
            ));
        }
        Ok(d as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use std::sync::Mutex;

    /// Mean absolute channel difference in [0, 1]; records the sizes it saw.
    #[derive(Default)]
    struct MeanAbsDiff {
        seen: Mutex<Vec<(u32, u32)>>,
    }

    impl PerceptualModel for MeanAbsDiff {
        fn distance(&self, a: &RgbImage, b: &RgbImage) -> anyhow::Result<f32> {
            anyhow::ensure!(a.dimensions() == b.dimensions(), "size mismatch");
            if let Ok(mut seen) = self.seen.lock() {
                seen.push(a.dimensions());
            }
            let total: f32 = a
                .pixels()
                .zip(b.pixels())
                .flat_map(|(p, q)| (0..3).map(move |c| (p[c] as f32 - q[c] as f32).abs()))
                .sum();
            Ok(total / (a.width() * a.height() * 3) as f32 / 255.0)
        }
    }

    struct Negative;

    impl PerceptualModel for Negative {
        fn distance(&self, _a: &RgbImage, _b: &RgbImage) -> anyhow::Result<f32> {
            Ok(-0.25)
        }
    }

    #[test]
    fn buffers_reach_model_at_canonical_size() {
        let model = Arc::new(MeanAbsDiff::default());
        let scorer = PerceptualDistance::new(model.clone(), 64);
        let reference = RgbImage::from_pixel(200, 120, Rgb([255, 0, 0]));
        let rendered = RgbImage::from_pixel(800, 800, Rgb([255, 0, 0]));

        let d = scorer.score(&reference, &rendered).unwrap();
        assert!(d.abs() < 1e-9);
        assert_eq!(model.seen.lock().unwrap().as_slice(), &[(64, 64)]);
    }

    #[test]
    fn distance_grows_with_difference() {
        let scorer = PerceptualDistance::new(Arc::new(MeanAbsDiff::default()), 32);
        let reference = RgbImage::from_pixel(50, 50, Rgb([0, 0, 0]));
        let near = RgbImage::from_pixel(50, 50, Rgb([20, 20, 20]));
        let far = RgbImage::from_pixel(50, 50, Rgb([200, 200, 200]));

        let d_near = scorer.score(&reference, &near).unwrap();
        let d_far = scorer.score(&reference, &far).unwrap();
        assert!(d_near < d_far);
    }

    #[test]
    fn inputs_are_not_mutated() {
        let scorer = PerceptualDistance::new(Arc::new(MeanAbsDiff::default()), 16);
        let reference = RgbImage::from_fn(40, 30, |x, y| Rgb([x as u8, y as u8, 7]));
        let rendered = RgbImage::from_fn(30, 40, |x, y| Rgb([y as u8, x as u8, 9]));
        let (r0, v0) = (reference.clone(), rendered.clone());

        scorer.score(&reference, &rendered).unwrap();
        assert_eq!(reference, r0);
        assert_eq!(rendered, v0);
    }

    #[test]
    fn negative_distance_is_rejected() {
        let scorer = PerceptualDistance::new(Arc::new(Negative), 8);
        let img = RgbImage::from_pixel(8, 8, Rgb([1, 1, 1]));
        assert!(matches!(
            scorer.score(&img, &img),
            Err(EvalError::Scoring { .. })
        ));
    }
}
