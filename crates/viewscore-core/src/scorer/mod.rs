//! Similarity scoring between the reference and a rendered view.
//!
//! Two metric families are supported:
//! - **Embedding cosine** (`CLIP-S`): cosine similarity of unit image
//!   embeddings, higher is better, bounded to [-1, 1].
//! - **Perceptual distance** (`LPIPS_VGG`): learned perceptual distance on
//!   buffers resampled to a canonical square, lower is better.
//!
//! Each variant owns its own resize/normalize policy; callers only hand over
//! the raw reference and rendered buffers.

pub mod embedding;
pub mod perceptual;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::error::{EvalError, Result};

pub use embedding::EmbeddingCosine;
pub use perceptual::PerceptualDistance;

/// Metric family of a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Embedding,
    Perceptual,
}

impl Metric {
    pub fn name(&self) -> &'static str {
        match self {
            Metric::Embedding => "embedding",
            Metric::Perceptual => "perceptual",
        }
    }

    /// Label printed next to a run summary.
    pub fn label(&self) -> &'static str {
        match self {
            Metric::Embedding => "CLIP-S",
            Metric::Perceptual => "LPIPS_VGG",
        }
    }

    /// File name of this metric's append-only record.
    pub fn record_file(&self) -> &'static str {
        match self {
            Metric::Embedding => "clip_s.txt",
            Metric::Perceptual => "lpips_vgg.txt",
        }
    }

    pub fn higher_is_better(&self) -> bool {
        matches!(self, Metric::Embedding)
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Metric {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "embedding" | "clip" => Ok(Metric::Embedding),
            "perceptual" | "lpips" => Ok(Metric::Perceptual),
            other => Err(EvalError::Config(format!(
                "unknown metric '{other}' (expected embedding or perceptual)"
            ))),
        }
    }
}

/// Maps an image to a unit-length feature vector.
pub trait ImageEmbedder {
    fn embed_image(&self, image: &RgbImage) -> anyhow::Result<Vec<f32>>;

    /// Text tower of the same model. Not used by the scoring loop.
    fn embed_text(&self, text: &str) -> anyhow::Result<Vec<f32>>;
}

/// Maps an image pair of equal size to a non-negative distance.
pub trait PerceptualModel {
    fn distance(&self, a: &RgbImage, b: &RgbImage) -> anyhow::Result<f32>;
}

/// Scores a rendered view against a reference.
///
/// The reference is invariant across a run, so scorers split the work into
/// a one-off [`Scorer::prepare_reference`] and a per-view
/// [`Scorer::score_prepared`]. Neither mutates its inputs.
pub trait Scorer {
    /// Reference in whatever form the metric compares against.
    type Reference;

    fn metric(&self) -> Metric;

    fn prepare_reference(&self, reference: &RgbImage) -> Result<Self::Reference>;

    fn score_prepared(&self, reference: &Self::Reference, rendered: &RgbImage) -> Result<f64>;

    /// Prepare and score in one call; no caching.
    fn score(&self, reference: &RgbImage, rendered: &RgbImage) -> Result<f64> {
        let prepared = self.prepare_reference(reference)?;
        self.score_prepared(&prepared, rendered)
    }
}

/// Runtime-selected scorer.
pub enum SimilarityScorer {
    EmbeddingCosine(EmbeddingCosine),
    PerceptualDistance(PerceptualDistance),
}

/// Reference prepared by a [`SimilarityScorer`].
#[derive(Debug, Clone)]
pub enum PreparedReference {
    Embedding(Vec<f32>),
    Canonical(RgbImage),
}

impl SimilarityScorer {
    pub fn embedding(embedder: Arc<dyn ImageEmbedder>) -> Self {
        SimilarityScorer::EmbeddingCosine(EmbeddingCosine::new(embedder))
    }

    pub fn perceptual(model: Arc<dyn PerceptualModel>, canonical_size: u32) -> Self {
        SimilarityScorer::PerceptualDistance(PerceptualDistance::new(model, canonical_size))
    }
}

impl Scorer for SimilarityScorer {
    type Reference = PreparedReference;

    fn metric(&self) -> Metric {
        match self {
            SimilarityScorer::EmbeddingCosine(s) => s.metric(),
            SimilarityScorer::PerceptualDistance(s) => s.metric(),
        }
    }

    fn prepare_reference(&self, reference: &RgbImage) -> Result<PreparedReference> {
        match self {
            SimilarityScorer::EmbeddingCosine(s) => {
                s.prepare_reference(reference).map(PreparedReference::Embedding)
            }
            SimilarityScorer::PerceptualDistance(s) => {
                s.prepare_reference(reference).map(PreparedReference::Canonical)
            }
        }
    }

    fn score_prepared(&self, reference: &PreparedReference, rendered: &RgbImage) -> Result<f64> {
        match (self, reference) {
            (SimilarityScorer::EmbeddingCosine(s), PreparedReference::Embedding(r)) => {
                s.score_prepared(r, rendered)
            }
            (SimilarityScorer::PerceptualDistance(s), PreparedReference::Canonical(r)) => {
                s.score_prepared(r, rendered)
            }
            _ => Err(EvalError::scoring(
                self.metric(),
                "reference was prepared for a different metric",
            )),
        }
    }
}

/// Rejects buffers no model can consume.
pub(crate) fn check_buffer(metric: Metric, what: &str, image: &RgbImage) -> Result<()> {
    if image.width() == 0 || image.height() == 0 {
        return Err(EvalError::scoring(
            metric,
            format!("{what} buffer is empty ({}x{})", image.width(), image.height()),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_parses_aliases() {
        assert_eq!("embedding".parse::<Metric>().unwrap(), Metric::Embedding);
        assert_eq!("CLIP".parse::<Metric>().unwrap(), Metric::Embedding);
        assert_eq!("perceptual".parse::<Metric>().unwrap(), Metric::Perceptual);
        assert_eq!("lpips".parse::<Metric>().unwrap(), Metric::Perceptual);
        assert!("ssim".parse::<Metric>().is_err());
    }

    #[test]
    fn metric_records_are_distinct() {
        assert_ne!(
            Metric::Embedding.record_file(),
            Metric::Perceptual.record_file()
        );
        assert!(Metric::Embedding.higher_is_better());
        assert!(!Metric::Perceptual.higher_is_better());
    }
}
