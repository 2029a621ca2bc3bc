//! viewscore-fab - Rust-native scoring models for multi-view evaluation.
//!
//! Concrete collaborators for `viewscore-core` scorers:
//! - **ClipEmbedder**: CLIP ViT-B/32 image and text embeddings
//! - **Lpips**: LPIPS perceptual distance over a VGG16 backbone
//!
//! # Features
//!
//! - `metal` - Enable Metal acceleration (Apple Silicon)
//! - `cuda` - Enable CUDA acceleration (NVIDIA GPUs)

pub mod clip;
pub mod device;
pub mod lpips;

use std::sync::Arc;

use anyhow::{bail, Result};
use viewscore_core::config::ScoringSettings;
use viewscore_core::{Metric, SimilarityScorer};

pub use clip::{ClipConfig, ClipEmbedder};
pub use device::select_device;
pub use lpips::{Lpips, LpipsWeights};

/// Load the model `metric` needs and wrap it in its scorer.
pub fn load_scorer(metric: Metric, settings: &ScoringSettings) -> Result<SimilarityScorer> {
    match metric {
        Metric::Embedding => {
            let embedder = ClipEmbedder::new(ClipConfig::with_model(&settings.clip_model)?)?;
            Ok(SimilarityScorer::embedding(Arc::new(embedder)))
        }
        Metric::Perceptual => {
            let weights = match (&settings.lpips_weights, &settings.lpips_repo) {
                (Some(path), _) => LpipsWeights::File(path),
                (None, Some(repo)) => LpipsWeights::Hub {
                    repo,
                    file: &settings.lpips_file,
                },
                (None, None) => bail!(
                    "perceptual scoring needs LPIPS weights: pass --lpips-weights or set scoring.lpips_weights / scoring.lpips_repo"
                ),
            };
            let model = Lpips::load(weights)?;
            Ok(SimilarityScorer::perceptual(
                Arc::new(model),
                settings.canonical_size,
            ))
        }
    }
}
