//! Per-view sample accumulation and run summaries.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::camera::Pose;
use crate::error::{EvalError, Result};
use crate::scorer::Metric;

/// One score for one pose.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilaritySample {
    pub pose: Pose,
    pub value: f64,
}

/// Arithmetic mean of a run's samples, tagged with the metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub metric: Metric,
    pub mean: f64,
    pub views: usize,
    /// Samples in arrival order.
    pub samples: Vec<SimilaritySample>,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.metric.label(), self.mean)
    }
}

/// Collects samples for a single run. Construct a fresh one per run.
#[derive(Debug, Clone)]
pub struct ResultAggregator {
    metric: Metric,
    samples: Vec<SimilaritySample>,
}

impl ResultAggregator {
    pub fn new(metric: Metric) -> Self {
        Self {
            metric,
            samples: Vec::new(),
        }
    }

    pub fn with_capacity(metric: Metric, capacity: usize) -> Self {
        Self {
            metric,
            samples: Vec::with_capacity(capacity),
        }
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn add(&mut self, sample: SimilaritySample) {
        self.samples.push(sample);
    }

    pub fn samples(&self) -> &[SimilaritySample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Mean of every sample so far. Zero samples is an error, never 0 or NaN.
    pub fn summarize(&self) -> Result<RunSummary> {
        if self.samples.is_empty() {
            return Err(EvalError::EmptyResult(self.metric));
        }
        let total: f64 = self.samples.iter().map(|s| s.value).sum();
        Ok(RunSummary {
            metric: self.metric,
            mean: total / self.samples.len() as f64,
            views: self.samples.len(),
            samples: self.samples.clone(),
        })
    }
}
