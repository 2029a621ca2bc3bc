//! Error taxonomy for evaluation runs.

use std::path::PathBuf;

use thiserror::Error;

use crate::camera::Pose;
use crate::scorer::Metric;

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("Failed to read {}: {reason}", path.display())]
    Read { path: PathBuf, reason: String },

    #[error("Render failed at {pose}: {reason}")]
    Render { pose: Pose, reason: String },

    #[error("Scoring failed ({metric}): {reason}")]
    Scoring { metric: Metric, reason: String },

    #[error("No samples recorded for {0}; a run with zero views has no score")]
    EmptyResult(Metric),

    #[error("Failed to append to {}: {source}", path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl EvalError {
    pub(crate) fn read(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        EvalError::Read {
            path: path.into(),
            reason: err.to_string(),
        }
    }

    pub(crate) fn scoring(metric: Metric, reason: impl Into<String>) -> Self {
        EvalError::Scoring {
            metric,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EvalError>;
