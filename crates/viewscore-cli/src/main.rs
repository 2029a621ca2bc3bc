//! viewscore CLI - multi-view evaluation of 3D assets.
//!
//! - `viewscore evaluate <reference> <asset> <mode>` - render an orbit of views
//!   and score each against the reference image
//! - `viewscore convert <inp> <out>` - mesh format conversion / turntable video

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::{fmt, EnvFilter};

use viewscore_core::{
    EvalConfig, Evaluator, FileResultLog, FrontDir, Metric, RasterBackend, RenderMode, RunObserver,
    RunRequest, RunState, SimilaritySample,
};
use viewscore_render::{SoftwareRenderer, DEFAULT_VIDEO_COMMAND};

#[derive(Parser)]
#[command(name = "viewscore")]
#[command(about = "Render-and-score evaluation of 3D assets", version)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score an asset's views against a reference image
    Evaluate {
        /// Reference image (RGBA is composited onto white)
        reference: PathBuf,

        /// Asset to render (.obj, .glb, .gltf, .stl)
        asset: PathBuf,

        /// Metric: embedding (clip) or perceptual (lpips). Perceptual needs
        /// LPIPS weights from --lpips-weights or scoring.lpips_repo
        mode: Metric,

        /// Local LPIPS(VGG) safetensors file for perceptual scoring
        #[arg(long)]
        lpips_weights: Option<PathBuf>,

        #[command(flatten)]
        render: RenderArgs,

        /// Config file (default: ./viewscore.yaml if present)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Directory holding clip_s.txt / lpips_vgg.txt
        #[arg(long)]
        records_dir: Option<PathBuf>,

        /// Print the full run summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Convert a mesh, or a directory of meshes, to another format
    Convert {
        /// Input file or directory
        inp: PathBuf,

        /// Output file or directory
        out: PathBuf,

        /// Output extension when converting a directory, e.g. .obj
        #[arg(long)]
        fmt: Option<String>,

        /// Renderer invoked for .mp4 output
        #[arg(long, default_value = DEFAULT_VIDEO_COMMAND)]
        video_command: String,
    },
}

/// Command-line overrides of the `render` and `camera` config sections.
#[derive(Args)]
struct RenderArgs {
    /// Output width
    #[arg(short = 'W', long)]
    width: Option<u32>,

    /// Output height
    #[arg(short = 'H', long)]
    height: Option<u32>,

    /// Supersampling ratio
    #[arg(long)]
    ssaa: Option<f32>,

    /// Camera orbit radius
    #[arg(long)]
    radius: Option<f32>,

    /// Vertical field of view in degrees
    #[arg(long)]
    fovy: Option<f32>,

    /// Camera elevation in degrees; repeat for several rings
    #[arg(long, allow_negative_numbers = true)]
    elevation: Vec<f64>,

    /// Views per elevation ring
    #[arg(long)]
    num_azimuth: Option<usize>,

    /// Shading: albedo, lambertian, normal, depth, pbr
    #[arg(long)]
    render_mode: Option<RenderMode>,

    /// Axis the asset's front faces: +x, -x, +y, -y, +z, -z
    #[arg(long, allow_hyphen_values = true)]
    front_dir: Option<FrontDir>,

    /// Rasterizer: serial or parallel
    #[arg(long)]
    backend: Option<RasterBackend>,

    /// Environment-lit shading (needs --envmap)
    #[arg(long)]
    pbr: bool,

    /// Environment map for pbr shading
    #[arg(long)]
    envmap: Option<PathBuf>,
}

impl RenderArgs {
    fn apply(self, config: &mut EvalConfig) {
        let r = &mut config.render;
        if let Some(v) = self.width {
            r.width = v;
        }
        if let Some(v) = self.height {
            r.height = v;
        }
        if let Some(v) = self.ssaa {
            r.ssaa = v;
        }
        if let Some(v) = self.radius {
            r.radius = v;
        }
        if let Some(v) = self.fovy {
            r.fovy = v;
        }
        if let Some(v) = self.render_mode {
            r.mode = v;
        }
        if let Some(v) = self.front_dir {
            r.front_dir = v;
        }
        if let Some(v) = self.backend {
            r.backend = v;
        }
        if self.pbr {
            r.pbr = true;
        }
        if self.envmap.is_some() {
            r.envmap = self.envmap;
        }

        if !self.elevation.is_empty() {
            config.camera.elevations = self.elevation;
        }
        if let Some(v) = self.num_azimuth {
            config.camera.num_azimuth = v;
        }
    }
}

/// Drives a progress bar from run state changes.
struct Progress {
    bar: Option<ProgressBar>,
    style: ProgressStyle,
}

impl Progress {
    fn new() -> Result<Self> {
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-");
        Ok(Self { bar: None, style })
    }
}

impl RunObserver for Progress {
    fn on_state(&mut self, state: &RunState) {
        match state {
            RunState::Rendering { total, pose, .. } => {
                let bar = self.bar.get_or_insert_with(|| {
                    ProgressBar::new(*total as u64).with_style(self.style.clone())
                });
                bar.set_message(pose.to_string());
            }
            RunState::Done | RunState::Failed => {
                if let Some(bar) = self.bar.take() {
                    bar.finish_and_clear();
                }
            }
            _ => {}
        }
    }

    fn on_sample(&mut self, _index: usize, _total: usize, _sample: &SimilaritySample) {
        if let Some(bar) = &self.bar {
            bar.inc(1);
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Evaluate {
            reference,
            asset,
            mode,
            render,
            config,
            lpips_weights,
            records_dir,
            json,
        } => {
            let mut config = load_config(config.as_deref())?;
            render.apply(&mut config);
            if lpips_weights.is_some() {
                config.scoring.lpips_weights = lpips_weights;
            }
            if let Some(dir) = records_dir {
                config.records.dir = Some(dir);
            }
            evaluate(&config, &reference, &asset, mode, json)
        }
        Commands::Convert {
            inp,
            out,
            fmt,
            video_command,
        } => {
            let written = viewscore_render::convert(&inp, &out, fmt.as_deref(), &video_command)?;
            tracing::info!(files = written.len(), "Conversion complete");
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<EvalConfig> {
    match path {
        Some(path) => EvalConfig::load(path),
        None => {
            let cwd = std::env::current_dir().context("Failed to get current directory")?;
            EvalConfig::load_from_dir(&cwd)
        }
    }
}

fn evaluate(
    config: &EvalConfig,
    reference: &Path,
    asset: &Path,
    metric: Metric,
    json: bool,
) -> Result<()> {
    config.validate()?;

    tracing::info!(
        metric = %metric,
        asset = %asset.display(),
        reference = %reference.display(),
        "Starting evaluation"
    );

    let renderer = SoftwareRenderer::new(config.render.clone())?;
    let scorer = viewscore_fab::load_scorer(metric, &config.scoring)?;
    let log = FileResultLog::new(config.records.dir());
    let camera = config.camera.path();

    let mut evaluator = Evaluator::new(renderer, scorer, log);
    let mut progress = Progress::new()?;
    let summary = evaluator.run_observed(
        RunRequest {
            asset,
            reference,
            camera: &camera,
        },
        &mut progress,
    )?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{summary}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn evaluate_flags_override_config() {
        let cli = parse(&[
            "viewscore", "evaluate", "ref.png", "chair.glb", "lpips", "-W", "256", "--ssaa", "2",
            "--elevation", "-15", "--elevation", "0", "--front-dir", "-x", "--backend", "serial",
        ]);
        let Commands::Evaluate { mode, render, .. } = cli.command else {
            panic!("expected evaluate");
        };
        assert_eq!(mode, Metric::Perceptual);

        let mut config = EvalConfig::default();
        render.apply(&mut config);
        assert_eq!(config.render.width, 256);
        assert_eq!(config.render.height, 800);
        assert_eq!(config.render.ssaa, 2.0);
        assert_eq!(config.render.front_dir, FrontDir::NegX);
        assert_eq!(config.render.backend, RasterBackend::Serial);
        assert_eq!(config.camera.elevations, vec![-15.0, 0.0]);
        assert_eq!(config.camera.num_azimuth, 8);
    }

    #[test]
    fn evaluate_help_names_lpips_weights() {
        let mut cli = Cli::command();
        let help = cli
            .find_subcommand_mut("evaluate")
            .unwrap()
            .render_long_help()
            .to_string();
        assert!(help.contains("--lpips-weights"));
        assert!(help.contains("Perceptual needs"));
    }

    #[test]
    fn lpips_weights_flag_is_parsed() {
        let cli = parse(&[
            "viewscore", "evaluate", "ref.png", "chair.obj", "perceptual", "--lpips-weights",
            "vgg.safetensors",
        ]);
        let Commands::Evaluate { lpips_weights, .. } = cli.command else {
            panic!("expected evaluate");
        };
        assert_eq!(lpips_weights, Some(PathBuf::from("vgg.safetensors")));
    }

    #[test]
    fn unknown_mode_is_rejected() {
        assert!(Cli::try_parse_from(["viewscore", "evaluate", "a.png", "b.glb", "ssim"]).is_err());
    }

    #[test]
    fn convert_defaults_to_kire() {
        let cli = parse(&["viewscore", "convert", "in.glb", "out.mp4"]);
        let Commands::Convert { video_command, fmt, .. } = cli.command else {
            panic!("expected convert");
        };
        assert_eq!(video_command, "kire");
        assert!(fmt.is_none());
    }
}
