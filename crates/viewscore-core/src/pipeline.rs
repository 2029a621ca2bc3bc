//! Run orchestration: render every pose, score it, summarise, record.

use std::path::Path;

use image::RgbImage;
use tracing::{debug, error, info};

use crate::aggregate::{ResultAggregator, RunSummary, SimilaritySample};
use crate::camera::{CameraPath, Pose};
use crate::error::{EvalError, Result};
use crate::record::ResultLog;
use crate::reference::ReferencePreparer;
use crate::scorer::Scorer;

/// Turns a camera pose into a pixel buffer of the loaded asset.
pub trait ViewRenderer {
    fn load_asset(&mut self, path: &Path) -> anyhow::Result<()>;

    fn set_camera(&mut self, pose: Pose);

    /// Invalidate the cached frame; the next `render` must redraw.
    fn mark_dirty(&mut self);

    fn render(&mut self) -> anyhow::Result<RgbImage>;
}

impl<T: ViewRenderer + ?Sized> ViewRenderer for Box<T> {
    fn load_asset(&mut self, path: &Path) -> anyhow::Result<()> {
        (**self).load_asset(path)
    }

    fn set_camera(&mut self, pose: Pose) {
        (**self).set_camera(pose)
    }

    fn mark_dirty(&mut self) {
        (**self).mark_dirty()
    }

    fn render(&mut self) -> anyhow::Result<RgbImage> {
        (**self).render()
    }
}

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RunState {
    Idle,
    Preparing,
    Rendering { index: usize, total: usize, pose: Pose },
    Scoring { index: usize, total: usize, pose: Pose },
    Aggregating,
    Logging,
    Done,
    Failed,
}

/// Progress hooks. Poses arrive elevation-major, azimuth-minor.
pub trait RunObserver {
    fn on_state(&mut self, _state: &RunState) {}

    fn on_sample(&mut self, _index: usize, _total: usize, _sample: &SimilaritySample) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct Quiet;

impl RunObserver for Quiet {}

/// Inputs of one run.
#[derive(Debug, Clone, Copy)]
pub struct RunRequest<'a> {
    pub asset: &'a Path,
    pub reference: &'a Path,
    pub camera: &'a CameraPath,
}

/// Drives a run over injected collaborators.
///
/// The renderer and scorer are long-lived and reused across runs; each run
/// gets its own aggregator. A run either completes and appends exactly one
/// line to the record, or fails with the first collaborator error and
/// records nothing.
pub struct Evaluator<R, S, L> {
    renderer: R,
    scorer: S,
    log: L,
    preparer: ReferencePreparer,
    state: RunState,
}

impl<R, S, L> Evaluator<R, S, L>
where
    R: ViewRenderer,
    S: Scorer,
    L: ResultLog,
{
    pub fn new(renderer: R, scorer: S, log: L) -> Self {
        Self {
            renderer,
            scorer,
            log,
            preparer: ReferencePreparer::new(),
            state: RunState::Idle,
        }
    }

    pub fn with_preparer(mut self, preparer: ReferencePreparer) -> Self {
        self.preparer = preparer;
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn log(&self) -> &L {
        &self.log
    }

    pub fn run(&mut self, request: RunRequest<'_>) -> Result<RunSummary> {
        self.run_observed(request, &mut Quiet)
    }

    pub fn run_observed(
        &mut self,
        request: RunRequest<'_>,
        observer: &mut dyn RunObserver,
    ) -> Result<RunSummary> {
        let metric = self.scorer.metric();
        info!(
            asset = %request.asset.display(),
            reference = %request.reference.display(),
            metric = %metric,
            views = request.camera.len(),
            "Starting evaluation run"
        );

        match self.execute(request, observer) {
            Ok(summary) => {
                self.transition(RunState::Done, observer);
                info!(metric = %metric, mean = summary.mean, views = summary.views, "Run complete");
                Ok(summary)
            }
            Err(err) => {
                self.transition(RunState::Failed, observer);
                error!(metric = %metric, error = %err, "Run failed");
                Err(err)
            }
        }
    }

    fn execute(
        &mut self,
        request: RunRequest<'_>,
        observer: &mut dyn RunObserver,
    ) -> Result<RunSummary> {
        self.transition(RunState::Preparing, observer);
        let reference = self.preparer.prepare(request.reference)?;
        self.renderer
            .load_asset(request.asset)
            .map_err(|e| EvalError::read(request.asset, format!("{e:#}")))?;
        let reference = self.scorer.prepare_reference(&reference)?;

        let total = request.camera.len();
        let mut aggregator = ResultAggregator::with_capacity(self.scorer.metric(), total);

        for (index, pose) in request.camera.iter().enumerate() {
            self.transition(RunState::Rendering { index, total, pose }, observer);
            self.renderer.set_camera(pose);
            self.renderer.mark_dirty();
            let view = self.renderer.render().map_err(|e| EvalError::Render {
                pose,
                reason: format!("{e:#}"),
            })?;

            self.transition(RunState::Scoring { index, total, pose }, observer);
            let value = self.scorer.score_prepared(&reference, &view)?;
            debug!(
                elevation = pose.elevation,
                azimuth = pose.azimuth,
                score = value,
                "Scored view"
            );

            let sample = SimilaritySample { pose, value };
            observer.on_sample(index, total, &sample);
            aggregator.add(sample);
        }

        self.transition(RunState::Aggregating, observer);
        let summary = aggregator.summarize()?;

        self.transition(RunState::Logging, observer);
        self.log.append(summary.metric, summary.mean)?;

        Ok(summary)
    }

    fn transition(&mut self, state: RunState, observer: &mut dyn RunObserver) {
        self.state = state;
        observer.on_state(&state);
    }
}
