//! CLIP image/text embedder.

use std::path::Path;

use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::clip::{self, ClipModel};
use hf_hub::{api::sync::Api, Repo, RepoType};
use image::imageops::{self, FilterType};
use image::RgbImage;
use tokenizers::Tokenizer;
use tracing::info;
use viewscore_core::ImageEmbedder;

use crate::device::select_device;

/// CLIP's fixed text context length.
const CONTEXT_LENGTH: usize = 77;

const MEAN: [f32; 3] = [0.48145466, 0.4578275, 0.40821073];
const STD: [f32; 3] = [0.26862954, 0.26130258, 0.27577711];

/// Hub checkpoints whose layout matches a candle CLIP architecture, with the
/// revision that carries `model.safetensors`.
const SUPPORTED_MODELS: &[(&str, &str, fn() -> clip::ClipConfig)] = &[(
    "openai/clip-vit-base-patch32",
    "refs/pr/15",
    clip::ClipConfig::vit_base_patch32,
)];

/// Configuration for the CLIP embedder.
#[derive(Debug, Clone)]
pub struct ClipConfig {
    pub model_id: String,
    /// Hub revision carrying `model.safetensors`
    pub revision: String,
}

impl Default for ClipConfig {
    fn default() -> Self {
        let (model_id, revision, _) = SUPPORTED_MODELS[0];
        Self {
            model_id: model_id.to_string(),
            revision: revision.to_string(),
        }
    }
}

impl ClipConfig {
    /// Config for a supported hub model, at its safetensors revision.
    pub fn with_model(model_id: &str) -> Result<Self> {
        let (id, revision, _) = lookup(model_id)?;
        Ok(Self {
            model_id: id.to_string(),
            revision: revision.to_string(),
        })
    }

    /// Network shape of `model_id`.
    pub fn architecture(&self) -> Result<clip::ClipConfig> {
        let (_, _, arch) = lookup(&self.model_id)?;
        Ok(arch())
    }
}

fn lookup(model_id: &str) -> Result<(&'static str, &'static str, fn() -> clip::ClipConfig)> {
    SUPPORTED_MODELS
        .iter()
        .copied()
        .find(|(id, _, _)| *id == model_id)
        .with_context(|| {
            let known: Vec<&str> = SUPPORTED_MODELS.iter().map(|(id, _, _)| *id).collect();
            format!(
                "Unsupported CLIP model '{model_id}' (supported: {})",
                known.join(", ")
            )
        })
}

/// ViT-B/32 CLIP with projection heads; produces unit-length embeddings.
pub struct ClipEmbedder {
    device: Device,
    model: ClipModel,
    tokenizer: Tokenizer,
    image_size: usize,
}

impl ClipEmbedder {
    /// Download (or reuse the cached) checkpoint from the HuggingFace Hub.
    pub fn new(config: ClipConfig) -> Result<Self> {
        let architecture = config.architecture()?;
        let api = Api::new().context("Failed to create HF API")?;
        let repo = api.repo(Repo::with_revision(
            config.model_id.clone(),
            RepoType::Model,
            config.revision.clone(),
        ));

        info!(model = %config.model_id, revision = %config.revision, "Loading CLIP model");

        let weights = repo
            .get("model.safetensors")
            .context("Failed to download model.safetensors")?;
        let tokenizer = repo
            .get("tokenizer.json")
            .context("Failed to download tokenizer.json")?;

        Self::from_files(&architecture, &weights, &tokenizer, select_device()?)
    }

    /// Load from local safetensors and tokenizer files.
    pub fn from_files(
        clip_config: &clip::ClipConfig,
        weights: &Path,
        tokenizer: &Path,
        device: Device,
    ) -> Result<Self> {
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights], DType::F32, &device)
                .with_context(|| format!("Failed to map {}", weights.display()))?
        };
        let model = ClipModel::new(vb, clip_config)?;

        let tokenizer = Tokenizer::from_file(tokenizer).map_err(|e| anyhow::anyhow!("{}", e))?;

        Ok(Self {
            device,
            model,
            tokenizer,
            image_size: clip_config.image_size,
        })
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    fn unit_vec(features: Tensor) -> Result<Vec<f32>> {
        let features = features.squeeze(0)?.to_dtype(DType::F32)?;
        let norm = features.sqr()?.sum_all()?.sqrt()?;
        let normalized = features.broadcast_div(&norm)?;
        Ok(normalized.to_vec1::<f32>()?)
    }
}

impl ImageEmbedder for ClipEmbedder {
    fn embed_image(&self, image: &RgbImage) -> Result<Vec<f32>> {
        let size = self.image_size;
        let pixels = pixel_values(image, size as u32);
        let input = Tensor::from_vec(pixels, (1, 3, size, size), &self.device)?;
        let features = self.model.get_image_features(&input)?;
        Self::unit_vec(features)
    }

    fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| anyhow::anyhow!("Tokenizer error: {}", e))?;

        let padded = pad_ids(encoding.get_ids());
        let input_ids = Tensor::new(&padded[..], &self.device)?.unsqueeze(0)?;
        let features = self.model.get_text_features(&input_ids)?;
        Self::unit_vec(features)
    }
}

/// Fit token ids into the text context. Zero padding keeps the end-of-text
/// id the row maximum, which is how the text tower locates its pooled token;
/// an over-long prompt is cut before its last id so that token survives.
pub fn pad_ids(ids: &[u32]) -> Vec<u32> {
    let mut padded = vec![0u32; CONTEXT_LENGTH];
    if ids.len() > CONTEXT_LENGTH {
        padded[..CONTEXT_LENGTH - 1].copy_from_slice(&ids[..CONTEXT_LENGTH - 1]);
        padded[CONTEXT_LENGTH - 1] = ids[ids.len() - 1];
    } else {
        padded[..ids.len()].copy_from_slice(ids);
    }
    padded
}

/// Resize the short side to `size`, centre-crop to a square, and apply CLIP
/// normalisation. Returns CHW floats.
pub fn pixel_values(image: &RgbImage, size: u32) -> Vec<f32> {
    let (w, h) = image.dimensions();
    let scale = size as f32 / w.min(h).max(1) as f32;
    let rw = ((w as f32 * scale).round() as u32).max(size);
    let rh = ((h as f32 * scale).round() as u32).max(size);

    let resized = imageops::resize(image, rw, rh, FilterType::CatmullRom);
    let cropped = imageops::crop_imm(&resized, (rw - size) / 2, (rh - size) / 2, size, size)
        .to_image();

    let plane = (size * size) as usize;
    let mut pixels = vec![0f32; 3 * plane];
    for (i, pixel) in cropped.pixels().enumerate() {
        for c in 0..3 {
            pixels[c * plane + i] = (pixel[c] as f32 / 255.0 - MEAN[c]) / STD[c];
        }
    }
    pixels
}
