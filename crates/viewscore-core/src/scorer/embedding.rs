//! Embedding cosine similarity.

use std::sync::Arc;

use image::RgbImage;

use super::{check_buffer, ImageEmbedder, Metric, Scorer};
use crate::error::{EvalError, Result};

/// Cosine similarity between unit embeddings of the reference and the view.
///
/// Vectors returned by the embedder are re-normalised by their L2 norm
/// before the dot product, so the score is always in [-1, 1].
pub struct EmbeddingCosine {
    embedder: Arc<dyn ImageEmbedder>,
}

impl EmbeddingCosine {
    pub fn new(embedder: Arc<dyn ImageEmbedder>) -> Self {
        Self { embedder }
    }

    fn embed(&self, what: &str, image: &RgbImage) -> Result<Vec<f32>> {
        check_buffer(Metric::Embedding, what, image)?;
        let features = self
            .embedder
            .embed_image(image)
            .map_err(|e| EvalError::scoring(Metric::Embedding, format!("{e:#}")))?;
        unit(features)
    }
}

impl Scorer for EmbeddingCosine {
    type Reference = Vec<f32>;

    fn metric(&self) -> Metric {
        Metric::Embedding
    }

    fn prepare_reference(&self, reference: &RgbImage) -> Result<Vec<f32>> {
        self.embed("reference", reference)
    }

    fn score_prepared(&self, reference: &Vec<f32>, rendered: &RgbImage) -> Result<f64> {
        let view = self.embed("rendered", rendered)?;
        cosine(reference, &view)
    }
}

/// Divide by the L2 norm.
pub fn unit(mut v: Vec<f32>) -> Result<Vec<f32>> {
    if v.is_empty() {
        return Err(EvalError::scoring(Metric::Embedding, "embedding is empty"));
    }
    let norm = v.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    if !norm.is_finite() || norm == 0.0 {
        return Err(EvalError::scoring(
            Metric::Embedding,
            format!("embedding has degenerate norm {norm}"),
        ));
    }
    for x in &mut v {
        *x = (*x as f64 / norm) as f32;
    }
    Ok(v)
}

/// Dot product of two unit vectors, clamped against rounding drift.
pub fn cosine(a: &[f32], b: &[f32]) -> Result<f64> {
    if a.len() != b.len() {
        return Err(EvalError::scoring(
            Metric::Embedding,
            format!("embedding width mismatch: {} vs {}", a.len(), b.len()),
        ));
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| *x as f64 * *y as f64).sum();
    Ok(dot.clamp(-1.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    /// Mean colour, with a constant bias so black is not a zero vector.
    struct MeanColor;

    impl ImageEmbedder for MeanColor {
        fn embed_image(&self, image: &RgbImage) -> anyhow::Result<Vec<f32>> {
            let n = (image.width() * image.height()) as f32;
            let mut acc = [0f32; 3];
            for p in image.pixels() {
                for c in 0..3 {
                    acc[c] += p[c] as f32 / 255.0;
                }
            }
            Ok(vec![acc[0] / n - 0.5, acc[1] / n - 0.5, acc[2] / n - 0.5, 0.1])
        }

        fn embed_text(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            anyhow::bail!("no text tower")
        }
    }

    fn scorer() -> EmbeddingCosine {
        EmbeddingCosine::new(Arc::new(MeanColor))
    }

    #[test]
    fn self_similarity_is_one() {
        let img = RgbImage::from_pixel(16, 16, Rgb([30, 140, 220]));
        let s = scorer().score(&img, &img).unwrap();
        assert!((s - 1.0).abs() < 1e-6, "got {s}");
    }

    #[test]
    fn symmetric_and_bounded() {
        let colors = [
            Rgb([0, 0, 0]),
            Rgb([255, 255, 255]),
            Rgb([255, 0, 0]),
            Rgb([0, 90, 200]),
        ];
        let scorer = scorer();
        for a in colors {
            for b in colors {
                let ia = RgbImage::from_pixel(4, 4, a);
                let ib = RgbImage::from_pixel(4, 4, b);
                let ab = scorer.score(&ia, &ib).unwrap();
                let ba = scorer.score(&ib, &ia).unwrap();
                assert!((ab - ba).abs() < 1e-9);
                assert!((-1.0..=1.0).contains(&ab));
            }
        }
    }

    #[test]
    fn empty_buffer_is_scoring_error() {
        let img = RgbImage::from_pixel(4, 4, Rgb([1, 2, 3]));
        let empty = RgbImage::new(0, 4);
        let err = scorer().score(&img, &empty).unwrap_err();
        assert!(matches!(err, EvalError::Scoring { .. }));
    }

    #[test]
    fn width_mismatch_is_scoring_error() {
        assert!(matches!(
            cosine(&[1.0, 0.0], &[1.0, 0.0, 0.0]),
            Err(EvalError::Scoring { .. })
        ));
    }

    #[test]
    fn zero_vector_cannot_be_normalised() {
        assert!(unit(vec![0.0; 8]).is_err());
        assert!(unit(Vec::new()).is_err());
        let v = unit(vec![3.0, 4.0]).unwrap();
        assert!((v[0] - 0.6).abs() < 1e-6 && (v[1] - 0.8).abs() < 1e-6);
    }
}
