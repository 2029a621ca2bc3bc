//! LPIPS perceptual distance with a VGG16 backbone.
//!
//! Weights follow the `lpips` state-dict layout, converted to safetensors:
//! `net.slice{1..5}.{idx}.{weight,bias}` for the backbone convolutions and
//! `lin{0..4}.model.1.weight` for the per-layer 1×1 heads.

use std::path::Path;

use anyhow::{Context, Result};
use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{conv2d, conv2d_no_bias, Conv2d, Conv2dConfig, VarBuilder};
use hf_hub::{api::sync::Api, Repo, RepoType};
use image::RgbImage;
use tracing::info;
use viewscore_core::PerceptualModel;

use crate::device::select_device;

/// Input scaling applied before the backbone.
const SHIFT: [f32; 3] = [-0.030, -0.088, -0.188];
const SCALE: [f32; 3] = [0.458, 0.448, 0.450];

/// `(pool first, [(layer index, in, out)])` per VGG16 slice.
const SLICES: [(bool, &[(usize, usize, usize)]); 5] = [
    (false, &[(0, 3, 64), (2, 64, 64)]),
    (true, &[(5, 64, 128), (7, 128, 128)]),
    (true, &[(10, 128, 256), (12, 256, 256), (14, 256, 256)]),
    (true, &[(17, 256, 512), (19, 512, 512), (21, 512, 512)]),
    (true, &[(24, 512, 512), (26, 512, 512), (28, 512, 512)]),
];

const EPS: f64 = 1e-10;

/// Where to load LPIPS weights from.
#[derive(Debug, Clone)]
pub enum LpipsWeights<'a> {
    File(&'a Path),
    Hub { repo: &'a str, file: &'a str },
}

struct Slice {
    pool_first: bool,
    convs: Vec<Conv2d>,
}

/// LPIPS(VGG) network.
pub struct Lpips {
    device: Device,
    slices: Vec<Slice>,
    heads: Vec<Conv2d>,
    shift: Tensor,
    scale: Tensor,
}

impl Lpips {
    pub fn load(weights: LpipsWeights<'_>) -> Result<Self> {
        let path = match weights {
            LpipsWeights::File(path) => path.to_path_buf(),
            LpipsWeights::Hub { repo, file } => {
                let api = Api::new().context("Failed to create HF API")?;
                api.repo(Repo::new(repo.to_string(), RepoType::Model))
                    .get(file)
                    .with_context(|| format!("Failed to download {file} from {repo}"))?
            }
        };

        info!(weights = %path.display(), "Loading LPIPS(VGG) model");
        let device = select_device()?;
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[&path], DType::F32, &device)
                .with_context(|| format!("Failed to map {}", path.display()))?
        };
        Self::new(vb, device)
    }

    /// Build the network from any var builder.
    pub fn new(vb: VarBuilder, device: Device) -> Result<Self> {
        let backbone = vb.pp("net");
        let conv_cfg = Conv2dConfig {
            padding: 1,
            ..Default::default()
        };

        let mut slices = Vec::with_capacity(SLICES.len());
        let mut heads = Vec::with_capacity(SLICES.len());
        for (i, (pool_first, layers)) in SLICES.iter().enumerate() {
            let vb_slice = backbone.pp(format!("slice{}", i + 1));
            let convs = layers
                .iter()
                .map(|&(idx, c_in, c_out)| conv2d(c_in, c_out, 3, conv_cfg, vb_slice.pp(idx)))
                .collect::<candle_core::Result<Vec<_>>>()?;
            slices.push(Slice {
                pool_first: *pool_first,
                convs,
            });

            let channels = layers[layers.len() - 1].2;
            let head = conv2d_no_bias(
                channels,
                1,
                1,
                Conv2dConfig::default(),
                vb.pp(format!("lin{i}")).pp("model").pp(1),
            )?;
            heads.push(head);
        }

        let shift = Tensor::new(&SHIFT, &device)?.reshape((1, 3, 1, 1))?;
        let scale = Tensor::new(&SCALE, &device)?.reshape((1, 3, 1, 1))?;

        Ok(Self {
            device,
            slices,
            heads,
            shift,
            scale,
        })
    }

    /// Batch of two images as `[2, 3, H, W]` in [-1, 1].
    fn input(&self, a: &RgbImage, b: &RgbImage) -> Result<Tensor> {
        let (w, h) = a.dimensions();
        let data: Vec<f32> = [a, b]
            .iter()
            .flat_map(|img| {
                (0..3).flat_map(move |c| img.pixels().map(move |p| p[c] as f32 / 127.5 - 1.0))
            })
            .collect();
        Ok(Tensor::from_vec(data, (2, 3, h as usize, w as usize), &self.device)?)
    }

    fn features(&self, x: &Tensor) -> Result<Vec<Tensor>> {
        let mut x = x.broadcast_sub(&self.shift)?.broadcast_div(&self.scale)?;
        let mut out = Vec::with_capacity(self.slices.len());
        for slice in &self.slices {
            if slice.pool_first {
                x = x.max_pool2d(2)?;
            }
            for conv in &slice.convs {
                x = conv.forward(&x)?.relu()?;
            }
            out.push(x.clone());
        }
        Ok(out)
    }

    /// Distance between two equally sized images.
    pub fn forward(&self, a: &RgbImage, b: &RgbImage) -> Result<f32> {
        anyhow::ensure!(
            a.dimensions() == b.dimensions(),
            "LPIPS inputs differ in size: {:?} vs {:?}",
            a.dimensions(),
            b.dimensions()
        );
        let (w, h) = a.dimensions();
        anyhow::ensure!(
            w >= 16 && h >= 16,
            "LPIPS needs at least 16x16 inputs, got {w}x{h}"
        );

        let feats = self.features(&self.input(a, b)?)?;
        let mut total = 0f32;
        for (feat, head) in feats.iter().zip(&self.heads) {
            let f0 = unit_channels(&feat.narrow(0, 0, 1)?)?;
            let f1 = unit_channels(&feat.narrow(0, 1, 1)?)?;
            let diff = (f0 - f1)?.sqr()?;
            let layer = head
                .forward(&diff)?
                .mean_all()?
                .to_dtype(DType::F32)?
                .to_scalar::<f32>()?;
            total += layer;
        }
        Ok(total)
    }
}

/// Normalise each spatial feature vector to unit length along channels.
fn unit_channels(x: &Tensor) -> candle_core::Result<Tensor> {
    let norm = (x.sqr()?.sum_keepdim(1)?.sqrt()? + EPS)?;
    x.broadcast_div(&norm)
}

impl PerceptualModel for Lpips {
    fn distance(&self, a: &RgbImage, b: &RgbImage) -> Result<f32> {
        self.forward(a, b)
    }
}
