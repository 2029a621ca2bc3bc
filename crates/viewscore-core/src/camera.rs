//! Camera path generation: the ordered set of poses a run samples.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A camera viewpoint around the asset, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub elevation: f64,
    pub azimuth: f64,
}

impl Pose {
    pub fn new(elevation: f64, azimuth: f64) -> Self {
        Self { elevation, azimuth }
    }
}

impl fmt::Display for Pose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "elevation {}°, azimuth {}°",
            self.elevation, self.azimuth
        )
    }
}

/// Elevation × azimuth grid.
///
/// Azimuths partition `[0, 360)` evenly, starting at 0 and never reaching
/// 360, so no view is sampled twice. Iteration is elevation-major,
/// azimuth-minor; progress reporting depends on that order.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraPath {
    elevations: Vec<f64>,
    azimuth_count: usize,
}

impl CameraPath {
    pub fn new(elevations: impl Into<Vec<f64>>, azimuth_count: usize) -> Self {
        Self {
            elevations: elevations.into(),
            azimuth_count,
        }
    }

    pub fn elevations(&self) -> &[f64] {
        &self.elevations
    }

    pub fn azimuth_count(&self) -> usize {
        self.azimuth_count
    }

    /// Total number of poses.
    pub fn len(&self) -> usize {
        self.elevations.len() * self.azimuth_count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Azimuth of the `index`-th sample in degrees.
    fn azimuth(&self, index: usize) -> f64 {
        360.0 * index as f64 / self.azimuth_count as f64
    }

    /// Lazily yields every pose. Each call starts over from the first pose.
    pub fn iter(&self) -> Poses<'_> {
        Poses {
            path: self,
            next: 0,
        }
    }
}

impl<'a> IntoIterator for &'a CameraPath {
    type Item = Pose;
    type IntoIter = Poses<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over the poses of a [`CameraPath`].
#[derive(Debug, Clone)]
pub struct Poses<'a> {
    path: &'a CameraPath,
    next: usize,
}

impl Iterator for Poses<'_> {
    type Item = Pose;

    fn next(&mut self) -> Option<Pose> {
        if self.next >= self.path.len() {
            return None;
        }
        let elevation = self.path.elevations[self.next / self.path.azimuth_count];
        let azimuth = self.path.azimuth(self.next % self.path.azimuth_count);
        self.next += 1;
        Some(Pose::new(elevation, azimuth))
    }

    fn nth(&mut self, n: usize) -> Option<Pose> {
        self.next = self.next.saturating_add(n).min(self.path.len());
        self.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.path.len() - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Poses<'_> {}
