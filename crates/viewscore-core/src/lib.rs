//! viewscore-core - multi-view render-and-score evaluation of 3D assets.
//!
//! A run renders an asset from an elevation × azimuth grid of camera poses,
//! scores every view against one reference image, and appends the mean to
//! an append-only per-metric record:
//!
//! - [`ReferencePreparer`]: loads the reference, flattens alpha onto white
//! - [`CameraPath`]: ordered, restartable pose sequence
//! - [`SimilarityScorer`]: embedding cosine or perceptual distance
//! - [`ResultAggregator`]: per-view samples to a [`RunSummary`]
//! - [`FileResultLog`]: `clip_s.txt` / `lpips_vgg.txt`
//! - [`Evaluator`]: wires it together over injected collaborators
//!
//! The renderer and the models are collaborators behind
//! [`ViewRenderer`], [`ImageEmbedder`] and [`PerceptualModel`].
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use viewscore_core::{
//!     CameraPath, Evaluator, FileResultLog, ImageEmbedder, RunRequest, SimilarityScorer,
//!     ViewRenderer,
//! };
//!
//! fn evaluate(renderer: impl ViewRenderer, embedder: Arc<dyn ImageEmbedder>) {
//!     let scorer = SimilarityScorer::embedding(embedder);
//!     let mut evaluator = Evaluator::new(renderer, scorer, FileResultLog::new("."));
//!     let camera = CameraPath::new(vec![0.0], 8);
//!     let summary = evaluator
//!         .run(RunRequest {
//!             asset: Path::new("model.glb"),
//!             reference: Path::new("front.png"),
//!             camera: &camera,
//!         })
//!         .unwrap();
//!     println!("{summary}");
//! }
//! ```

pub mod aggregate;
pub mod camera;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod record;
pub mod reference;
pub mod resample;
pub mod scorer;

pub use aggregate::{ResultAggregator, RunSummary, SimilaritySample};
pub use camera::{CameraPath, Pose};
pub use config::{EvalConfig, FrontDir, RasterBackend, RenderMode, RenderSettings, MAX_RENDER_DIM};
pub use error::{EvalError, Result};
pub use pipeline::{Evaluator, Quiet, RunObserver, RunRequest, RunState, ViewRenderer};
pub use record::{FileResultLog, MemoryResultLog, ResultLog};
pub use reference::ReferencePreparer;
pub use resample::resize_area;
pub use scorer::{
    EmbeddingCosine, ImageEmbedder, Metric, PerceptualDistance, PerceptualModel, Scorer,
    SimilarityScorer,
};
