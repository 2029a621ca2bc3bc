//! Run configuration, loaded from `viewscore.yaml`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::camera::CameraPath;
use crate::error::EvalError;

pub const CONFIG_FILE: &str = "viewscore.yaml";

/// Largest supersampled frame side the renderer will allocate.
pub const MAX_RENDER_DIM: u32 = 16384;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalConfig {
    pub render: RenderSettings,
    pub camera: CameraSettings,
    pub scoring: ScoringSettings,
    pub records: RecordSettings,
}

/// Rasterizer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    /// Output width in pixels
    pub width: u32,

    /// Output height in pixels
    pub height: u32,

    /// Super-sampling anti-aliasing ratio
    pub ssaa: f32,

    /// Camera distance from the asset centre
    pub radius: f32,

    /// Vertical field of view in degrees
    pub fovy: f32,

    pub mode: RenderMode,

    /// Which axis of the asset is its front
    pub front_dir: FrontDir,

    pub backend: RasterBackend,

    /// Shade with the environment map (implies `mode: pbr`)
    pub pbr: bool,

    /// Equirectangular environment map for `pbr`
    pub envmap: Option<PathBuf>,

    /// Backdrop colour of rendered views
    pub background: [u8; 3],
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            width: 800,
            height: 800,
            ssaa: 1.0,
            radius: 3.0,
            fovy: 50.0,
            mode: RenderMode::default(),
            front_dir: FrontDir::default(),
            backend: RasterBackend::default(),
            pbr: false,
            envmap: None,
            background: [255, 255, 255],
        }
    }
}

impl RenderSettings {
    /// Unrounded size of the supersampled frame.
    pub fn internal_size(&self) -> (f64, f64) {
        let s = self.ssaa as f64;
        (self.width as f64 * s, self.height as f64 * s)
    }
}

impl RenderSettings {
    /// `pbr: true` overrides `mode`.
    pub fn effective_mode(&self) -> RenderMode {
        if self.pbr {
            RenderMode::Pbr
        } else {
            self.mode
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    pub elevations: Vec<f64>,
    pub num_azimuth: usize,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            elevations: vec![0.0],
            num_azimuth: 8,
        }
    }
}

impl CameraSettings {
    pub fn path(&self) -> CameraPath {
        CameraPath::new(self.elevations.clone(), self.num_azimuth)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringSettings {
    /// HuggingFace repo of the CLIP checkpoint
    pub clip_model: String,

    /// Side of the square both buffers are resampled to for perceptual scoring
    pub canonical_size: u32,

    /// Local LPIPS(VGG) safetensors file
    pub lpips_weights: Option<PathBuf>,

    /// HuggingFace repo to fetch `lpips_file` from when no local file is set
    pub lpips_repo: Option<String>,

    pub lpips_file: String,
}

impl Default for ScoringSettings {
    fn default() -> Self {
        Self {
            clip_model: "openai/clip-vit-base-patch32".to_string(),
            canonical_size: 512,
            lpips_weights: None,
            lpips_repo: None,
            lpips_file: "lpips_vgg.safetensors".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordSettings {
    /// Directory holding `clip_s.txt` / `lpips_vgg.txt`; the working
    /// directory when unset
    pub dir: Option<PathBuf>,
}

impl RecordSettings {
    pub fn dir(&self) -> &Path {
        self.dir.as_deref().unwrap_or(Path::new("."))
    }
}

impl EvalConfig {
    /// Load configuration from a YAML file. Relative paths inside it are
    /// resolved against the file's directory.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        let mut config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    /// `viewscore.yaml` in `dir` if present, otherwise defaults.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        let config_path = dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Resolve relative paths against `base`.
    pub fn resolve_paths(&mut self, base: &Path) {
        if let Some(envmap) = &self.render.envmap {
            self.render.envmap = Some(base.join(envmap));
        }
        if let Some(weights) = &self.scoring.lpips_weights {
            self.scoring.lpips_weights = Some(base.join(weights));
        }
        if let Some(dir) = &self.records.dir {
            self.records.dir = Some(base.join(dir));
        }
    }

    /// Reject settings no run could succeed with.
    pub fn validate(&self) -> std::result::Result<(), EvalError> {
        let r = &self.render;
        if r.width == 0 || r.height == 0 {
            return Err(EvalError::Config(format!(
                "render size must be positive, got {}x{}",
                r.width, r.height
            )));
        }
        if !(r.ssaa.is_finite() && r.ssaa > 0.0) {
            return Err(EvalError::Config(format!("ssaa must be positive, got {}", r.ssaa)));
        }
        let (w, h) = r.internal_size();
        if w > MAX_RENDER_DIM as f64 || h > MAX_RENDER_DIM as f64 {
            return Err(EvalError::Config(format!(
                "supersampled frame {w}x{h} exceeds {MAX_RENDER_DIM} pixels per side"
            )));
        }
        if !(r.radius.is_finite() && r.radius > 0.0) {
            return Err(EvalError::Config(format!(
                "camera radius must be positive, got {}",
                r.radius
            )));
        }
        if !(r.fovy > 0.0 && r.fovy < 180.0) {
            return Err(EvalError::Config(format!(
                "fovy must be in (0, 180), got {}",
                r.fovy
            )));
        }
        if r.effective_mode() == RenderMode::Pbr && r.envmap.is_none() {
            return Err(EvalError::Config(
                "pbr shading requires an envmap".to_string(),
            ));
        }
        if self.camera.elevations.iter().any(|e| !e.is_finite()) {
            return Err(EvalError::Config("elevations must be finite".to_string()));
        }
        if self.scoring.canonical_size == 0 {
            return Err(EvalError::Config(
                "canonical_size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// What the rasterizer writes into each pixel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
    /// Unlit base colour
    #[default]
    Albedo,
    /// Base colour with a headlight diffuse term
    Lambertian,
    /// World-space normal mapped to RGB
    Normal,
    /// Normalised view depth
    Depth,
    /// Base colour lit by the environment map
    Pbr,
}

impl FromStr for RenderMode {
    type Err = EvalError;

    fn from_str(s: &str) -> std::result::Result<Self, EvalError> {
        match s {
            "albedo" => Ok(RenderMode::Albedo),
            "lambertian" => Ok(RenderMode::Lambertian),
            "normal" => Ok(RenderMode::Normal),
            "depth" => Ok(RenderMode::Depth),
            "pbr" => Ok(RenderMode::Pbr),
            other => Err(EvalError::Config(format!("unknown render mode '{other}'"))),
        }
    }
}

/// Axis the asset's front faces, rotated onto +z before rendering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrontDir {
    #[serde(rename = "+x")]
    PosX,
    #[serde(rename = "-x")]
    NegX,
    #[serde(rename = "+y")]
    PosY,
    #[serde(rename = "-y")]
    NegY,
    #[default]
    #[serde(rename = "+z")]
    PosZ,
    #[serde(rename = "-z")]
    NegZ,
}

impl FromStr for FrontDir {
    type Err = EvalError;

    fn from_str(s: &str) -> std::result::Result<Self, EvalError> {
        match s {
            "+x" | "x" => Ok(FrontDir::PosX),
            "-x" => Ok(FrontDir::NegX),
            "+y" | "y" => Ok(FrontDir::PosY),
            "-y" => Ok(FrontDir::NegY),
            "+z" | "z" => Ok(FrontDir::PosZ),
            "-z" => Ok(FrontDir::NegZ),
            other => Err(EvalError::Config(format!("unknown front dir '{other}'"))),
        }
    }
}

impl fmt::Display for FrontDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FrontDir::PosX => "+x",
            FrontDir::NegX => "-x",
            FrontDir::PosY => "+y",
            FrontDir::NegY => "-y",
            FrontDir::PosZ => "+z",
            FrontDir::NegZ => "-z",
        };
        f.write_str(s)
    }
}

/// How triangles are rasterized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RasterBackend {
    Serial,
    /// Row bands rasterized on the rayon pool
    #[default]
    Parallel,
}

impl FromStr for RasterBackend {
    type Err = EvalError;

    fn from_str(s: &str) -> std::result::Result<Self, EvalError> {
        match s {
            "serial" => Ok(RasterBackend::Serial),
            "parallel" => Ok(RasterBackend::Parallel),
            other => Err(EvalError::Config(format!("unknown raster backend '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_cli_defaults() {
        let config = EvalConfig::default();
        assert_eq!((config.render.width, config.render.height), (800, 800));
        assert_eq!(config.render.radius, 3.0);
        assert_eq!(config.render.fovy, 50.0);
        assert_eq!(config.camera.elevations, vec![0.0]);
        assert_eq!(config.camera.num_azimuth, 8);
        assert_eq!(config.scoring.canonical_size, 512);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let yaml = "render:\n  width: 256\n  front_dir: \"-x\"\ncamera:\n  num_azimuth: 4\n";
        let config: EvalConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.render.width, 256);
        assert_eq!(config.render.height, 800);
        assert_eq!(config.render.front_dir, FrontDir::NegX);
        assert_eq!(config.camera.num_azimuth, 4);
        assert_eq!(config.camera.elevations, vec![0.0]);
    }

    #[test]
    fn load_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "render:\n  envmap: env.hdr\nrecords:\n  dir: scores\n",
        )
        .unwrap();

        let config = EvalConfig::load_from_dir(dir.path()).unwrap();
        assert_eq!(config.render.envmap, Some(dir.path().join("env.hdr")));
        assert_eq!(config.records.dir(), dir.path().join("scores"));
    }

    #[test]
    fn unset_records_dir_stays_in_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("configs");
        std::fs::create_dir(&nested).unwrap();
        std::fs::write(nested.join(CONFIG_FILE), "render:\n  width: 64\n").unwrap();

        let config = EvalConfig::load_from_dir(&nested).unwrap();
        assert_eq!(config.render.width, 64);
        assert!(config.records.dir.is_none());
        assert_eq!(config.records.dir(), Path::new("."));
    }

    #[test]
    fn oversized_supersampling_is_rejected() {
        let mut config = EvalConfig::default();
        config.render.ssaa = 1000.0;
        let Err(EvalError::Config(msg)) = config.validate() else {
            panic!("expected config error");
        };
        assert!(msg.contains("exceeds"), "{msg}");

        config.render.ssaa = 2.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_config_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = EvalConfig::load_from_dir(dir.path()).unwrap();
        assert_eq!(config.render.width, 800);
    }

    #[test]
    fn pbr_without_envmap_is_rejected() {
        let mut config = EvalConfig::default();
        config.render.pbr = true;
        assert!(matches!(config.validate(), Err(EvalError::Config(_))));

        config.render.envmap = Some(PathBuf::from("studio.hdr"));
        assert!(config.validate().is_ok());
        assert_eq!(config.render.effective_mode(), RenderMode::Pbr);
    }

    #[test]
    fn zero_size_is_rejected() {
        let mut config = EvalConfig::default();
        config.render.width = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn enums_parse_from_cli_strings() {
        assert_eq!("normal".parse::<RenderMode>().unwrap(), RenderMode::Normal);
        assert_eq!("-y".parse::<FrontDir>().unwrap(), FrontDir::NegY);
        assert_eq!("serial".parse::<RasterBackend>().unwrap(), RasterBackend::Serial);
        assert!("phong".parse::<RenderMode>().is_err());
    }
}
