//! Trajectory buffer contents.
//!
//! A [`PmacTrajectoryProfile`] holds segment durations in seconds as the
//! compiler produces them. Before it is written, the optional code arrays are
//! padded and the durations are converted to integer ticks by a
//! [`TickQuantizer`], giving a [`TickProfile`].

use serde::Serialize;

use crate::error::{ScanError, ScanResult};
use crate::pmac::consts::{MIN_TIME, TICK_S};
use crate::pmac::cs_axes::{CsAxis, CsAxisArrays};
use crate::pmac::modes::{UserProgram, VelocityMode};

/// Parallel segment arrays of one trajectory chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PmacTrajectoryProfile {
    /// Segment durations in seconds.
    pub time_array: Vec<f64>,
    /// Velocity mode per segment; zeros when absent.
    pub velocity_mode: Option<Vec<VelocityMode>>,
    /// User program per segment; zeros when absent.
    pub user_programs: Option<Vec<UserProgram>>,
    /// Demand positions per CS axis; empty for unused axes.
    pub axes: CsAxisArrays,
}

impl PmacTrajectoryProfile {
    /// A single short segment that only drives the trigger outputs low.
    pub fn clean() -> Self {
        Self {
            time_array: vec![MIN_TIME],
            user_programs: Some(vec![UserProgram::ZeroProgram]),
            ..Self::default()
        }
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.time_array.len()
    }

    /// True when there are no segments.
    pub fn is_empty(&self) -> bool {
        self.time_array.is_empty()
    }

    /// Sum of all segment durations in seconds.
    pub fn total_time(&self) -> f64 {
        self.time_array.iter().sum()
    }

    /// Copy with absent code arrays filled with zero codes.
    ///
    /// # Errors
    ///
    /// `Validation` if any present array does not have one entry per segment.
    pub fn with_padded_optionals(&self) -> ScanResult<Self> {
        let n = self.len();
        let velocity_mode = self
            .velocity_mode
            .clone()
            .unwrap_or_else(|| vec![VelocityMode::default(); n]);
        let user_programs = self
            .user_programs
            .clone()
            .unwrap_or_else(|| vec![UserProgram::default(); n]);
        if velocity_mode.len() != n || user_programs.len() != n {
            return Err(ScanError::validation(format!(
                "profile of {n} segments has {} velocity modes and {} user programs",
                velocity_mode.len(),
                user_programs.len()
            )));
        }
        if let Some((axis, positions)) = self.axes.used().find(|(_, p)| p.len() != n) {
            return Err(ScanError::validation(format!(
                "profile of {n} segments has {} positions on axis {axis}",
                positions.len()
            )));
        }
        Ok(Self {
            time_array: self.time_array.clone(),
            velocity_mode: Some(velocity_mode),
            user_programs: Some(user_programs),
            axes: self.axes.clone(),
        })
    }

    /// Padded copy with durations converted to ticks.
    pub fn with_ticks(&self, quantizer: &mut TickQuantizer) -> ScanResult<TickProfile> {
        let padded = self.with_padded_optionals()?;
        let time_array = padded
            .time_array
            .iter()
            .map(|&seconds| quantizer.ticks(seconds))
            .collect::<ScanResult<Vec<u32>>>()?;
        Ok(TickProfile {
            time_array,
            velocity_mode: padded.velocity_mode.unwrap_or_default(),
            user_programs: padded.user_programs.unwrap_or_default(),
            axes: padded.axes,
        })
    }
}

/// Converts seconds to ticks, carrying the rounding remainder forward so the
/// total never drifts by more than half a tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickQuantizer {
    overflow: f64,
}

impl TickQuantizer {
    /// Quantizer with no carried remainder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remainder carried into the next conversion, in ticks.
    pub fn overflow(&self) -> f64 {
        self.overflow
    }

    /// Ticks for one segment of `seconds`.
    pub fn ticks(&mut self, seconds: f64) -> ScanResult<u32> {
        if !(seconds.is_finite() && seconds > 0.0) {
            return Err(ScanError::validation(format!(
                "segment duration {seconds}s cannot be written"
            )));
        }
        let exact = seconds / TICK_S;
        if exact >= f64::from(u32::MAX) {
            return Err(ScanError::validation(format!(
                "segment duration {seconds}s exceeds the time array range"
            )));
        }
        self.overflow += exact.fract();
        let mut ticks = exact.trunc() as u32;
        if self.overflow > 0.5 {
            self.overflow -= 1.0;
            ticks += 1;
        }
        Ok(ticks)
    }
}

/// Padded, tick-quantized profile in the form written to the controller.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TickProfile {
    /// Segment durations in ticks.
    pub time_array: Vec<u32>,
    /// Velocity mode per segment.
    pub velocity_mode: Vec<VelocityMode>,
    /// User program per segment.
    pub user_programs: Vec<UserProgram>,
    /// Demand positions per CS axis.
    pub axes: CsAxisArrays,
}

impl TickProfile {
    /// Number of segments.
    pub fn len(&self) -> usize {
        self.time_array.len()
    }

    /// True when there are no segments.
    pub fn is_empty(&self) -> bool {
        self.time_array.is_empty()
    }

    /// Velocity mode codes as written to the controller.
    pub fn velocity_mode_codes(&self) -> Vec<i32> {
        self.velocity_mode.iter().map(|m| m.code()).collect()
    }

    /// User program codes as written to the controller.
    pub fn user_program_codes(&self) -> Vec<i32> {
        self.user_programs.iter().map(|p| p.code()).collect()
    }

    /// Positions for `axis`, or `None` if the axis is unused.
    pub fn axis_positions(&self, axis: CsAxis) -> Option<&[f64]> {
        let positions = &self.axes[axis];
        (!positions.is_empty()).then_some(positions.as_slice())
    }
}
