//! [`ViewRenderer`] backed by the CPU rasterizer.

use std::path::Path;

use anyhow::{Context, Result};
use image::{Rgb32FImage, RgbImage};
use tracing::{debug, info, warn};
use viewscore_core::{resize_area, Pose, RenderMode, RenderSettings, ViewRenderer, MAX_RENDER_DIM};

use crate::camera::OrbitCamera;
use crate::mesh::Mesh;
use crate::raster::Rasterizer;

/// Largest half-extent of a normalised asset.
pub const ASSET_BOUND: f32 = 0.9;

/// Renders a loaded mesh from an orbit camera.
///
/// Frames are cached until the camera moves or `mark_dirty` is called.
pub struct SoftwareRenderer {
    settings: RenderSettings,
    camera: OrbitCamera,
    mesh: Option<Mesh>,
    envmap: Option<Rgb32FImage>,
    dirty: bool,
    frame: Option<RgbImage>,
}

impl SoftwareRenderer {
    pub fn new(settings: RenderSettings) -> Result<Self> {
        let (w, h) = settings.internal_size();
        let limit = MAX_RENDER_DIM as f64;
        if !(w.is_finite() && h.is_finite()) || w > limit || h > limit {
            anyhow::bail!("supersampled frame {w}x{h} exceeds {MAX_RENDER_DIM} pixels per side");
        }
        let envmap = match (&settings.envmap, settings.effective_mode()) {
            (Some(path), RenderMode::Pbr) => {
                let map = image::open(path)
                    .with_context(|| format!("Failed to open envmap: {}", path.display()))?
                    .to_rgb32f();
                if map.width() == 0 || map.height() == 0 {
                    warn!(envmap = %path.display(), "Environment map has no pixels, lighting is uniform");
                } else {
                    info!(envmap = %path.display(), width = map.width(), "Loaded environment map");
                }
                Some(map)
            }
            (None, RenderMode::Pbr) => anyhow::bail!("pbr shading requires an envmap"),
            _ => None,
        };

        Ok(Self {
            camera: OrbitCamera::new(settings.radius, settings.fovy),
            settings,
            mesh: None,
            envmap,
            dirty: true,
            frame: None,
        })
    }

    /// Use an already loaded mesh. It is normalised and oriented like a
    /// loaded asset.
    pub fn with_mesh(mut self, mut mesh: Mesh) -> Self {
        mesh.orient(self.settings.front_dir);
        mesh.normalize(ASSET_BOUND);
        self.mesh = Some(mesh);
        self.dirty = true;
        self
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    fn internal_size(&self) -> (u32, u32) {
        let (w, h) = self.settings.internal_size();
        ((w.round() as u32).max(1), (h.round() as u32).max(1))
    }

    fn draw(&self) -> Result<RgbImage> {
        let mesh = self.mesh.as_ref().context("No asset loaded")?;
        let (w, h) = self.internal_size();

        let frame = Rasterizer {
            mesh,
            mode: self.settings.effective_mode(),
            envmap: self.envmap.as_ref(),
            background: self.settings.background,
            backend: self.settings.backend,
        }
        .draw(&self.camera, w, h);

        if (w, h) == (self.settings.width, self.settings.height) {
            Ok(frame)
        } else {
            Ok(resize_area(&frame, self.settings.width, self.settings.height))
        }
    }
}

impl ViewRenderer for SoftwareRenderer {
    fn load_asset(&mut self, path: &Path) -> Result<()> {
        let mut mesh = Mesh::load(path)?;
        mesh.orient(self.settings.front_dir);
        mesh.normalize(ASSET_BOUND);
        info!(
            asset = %path.display(),
            triangles = mesh.triangles.len(),
            "Loaded asset"
        );
        self.mesh = Some(mesh);
        self.frame = None;
        self.dirty = true;
        Ok(())
    }

    fn set_camera(&mut self, pose: Pose) {
        if self.camera.pose != pose {
            self.camera.pose = pose;
            self.dirty = true;
        }
    }

    fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    fn render(&mut self) -> Result<RgbImage> {
        if !self.dirty {
            if let Some(frame) = &self.frame {
                return Ok(frame.clone());
            }
        }

        let frame = self.draw()?;
        debug!(pose = %self.camera.pose, "Rendered view");
        self.frame = Some(frame.clone());
        self.dirty = false;
        Ok(frame)
    }
}
