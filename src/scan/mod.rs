//! Scan points and the model that selects which of them a trajectory covers.
//!
//! Points come from a [`PointGenerator`]. The generator is prepared once and
//! then read by index; it is shared behind an `Arc` so that chunks compiled
//! later in the scan read the same sequence. A [`TrajectoryModel`] pairs the
//! generator with the half-open step range of the current scan and is never
//! mutated: a duration correction produces a new model.

pub mod generator;

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use crate::error::{ScanError, ScanResult};

pub use generator::{CompoundGenerator, Dimension, LineGenerator, StaticGenerator};

/// One scan point: demand positions at the start, middle and end of the
/// point, keyed by axis name.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Point {
    /// Midpoint demand.
    pub positions: HashMap<String, f64>,
    /// Entry demand.
    pub lower: HashMap<String, f64>,
    /// Exit demand.
    pub upper: HashMap<String, f64>,
    /// Time from `lower` to `upper`, in seconds.
    pub duration: f64,
    /// Pause requested after the point, in seconds.
    pub delay_after: Option<f64>,
}

impl Point {
    /// True if a non-zero pause follows this point.
    pub fn has_delay_after(&self) -> bool {
        self.delay_after.is_some_and(|delay| delay > 0.0)
    }
}

/// Axes driven by one sub-generator of a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AxisGroup {
    /// Axis names.
    pub axes: Vec<String>,
    /// A static sub-generator holds its axes still for the whole scan.
    pub is_static: bool,
}

/// Source of scan points.
pub trait PointGenerator: Send + Sync + Debug {
    /// Compute whatever is needed for indexed access.
    fn prepare(&mut self);

    /// Number of points.
    fn size(&self) -> usize;

    /// Per-point duration in seconds.
    fn duration(&self) -> f64;

    /// An unprepared copy with a different per-point duration.
    fn with_duration(&self, duration: f64) -> Box<dyn PointGenerator>;

    /// Axes of every sub-generator, outermost first.
    fn axis_groups(&self) -> Vec<AxisGroup>;

    /// Point at `index`, or `None` past the end or before `prepare`.
    fn get_point(&self, index: usize) -> Option<Point>;
}

/// A prepared generator and the `[start_index, end_index)` steps to scan.
#[derive(Debug, Clone)]
pub struct TrajectoryModel {
    generator: Arc<dyn PointGenerator>,
    /// First step of the scan.
    pub start_index: usize,
    /// One past the last step of the scan.
    pub end_index: usize,
}

impl TrajectoryModel {
    /// Prepare `generator` and scan every point of it.
    pub fn all_steps(mut generator: Box<dyn PointGenerator>) -> Self {
        generator.prepare();
        let end_index = generator.size();
        Self {
            generator: Arc::from(generator),
            start_index: 0,
            end_index,
        }
    }

    /// Prepare `generator` and scan `[start_index, end_index)` of it.
    pub fn do_steps(
        mut generator: Box<dyn PointGenerator>,
        start_index: usize,
        end_index: usize,
    ) -> ScanResult<Self> {
        generator.prepare();
        if start_index > end_index || end_index > generator.size() {
            return Err(ScanError::validation(format!(
                "steps {start_index}..{end_index} outside generator of {} points",
                generator.size()
            )));
        }
        Ok(Self {
            generator: Arc::from(generator),
            start_index,
            end_index,
        })
    }

    /// Same steps over a replacement generator, which is prepared here.
    pub fn with_revised_generator(&self, mut generator: Box<dyn PointGenerator>) -> Self {
        generator.prepare();
        Self {
            generator: Arc::from(generator),
            start_index: self.start_index,
            end_index: self.end_index,
        }
    }

    /// The point source.
    pub fn generator(&self) -> &dyn PointGenerator {
        self.generator.as_ref()
    }

    /// Per-point duration.
    pub fn duration(&self) -> f64 {
        self.generator.duration()
    }

    /// Number of steps in the range.
    pub fn steps(&self) -> usize {
        self.end_index - self.start_index
    }

    /// Point at `index`.
    pub fn point(&self, index: usize) -> ScanResult<Point> {
        self.generator.get_point(index).ok_or_else(|| {
            ScanError::validation(format!(
                "point {index} is not available from the generator ({} points)",
                self.generator.size()
            ))
        })
    }
}
