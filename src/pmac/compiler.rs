//! Trajectory compiler.
//!
//! Turns the points of a [`TrajectoryModel`] into PVT segments. A
//! [`TrajectoryCompiler`] is created once per scan and compiles the scan in
//! chunks of at most [`PROFILE_POINTS`] segments; sparse trigger time, the last
//! demanded position and the segment-to-step lookup carry over from one chunk
//! to the next.
//!
//! Segments of a chunk, in order:
//!
//! 1. a run-up from rest to the first `lower` (first chunk only),
//! 2. per point either a midpoint/upper pair (every-point triggers) or a
//!    sparse segment that only lands where the velocity changes,
//! 3. a gap wherever two points are not joined, solved per axis with
//!    [`VelocityProfile`]s sharing one time column,
//! 4. a tail-off from the last `upper` to rest (final chunk only).
//!
//! Everything here is synchronous; the controller does the I/O.

use std::collections::BTreeMap;
use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, trace};

use crate::error::{ScanError, ScanResult};
use crate::pmac::consts::{is_close, MAX_MOVE_TIME, MIN_INTERVAL, MIN_TIME, PROFILE_POINTS};
use crate::pmac::modes::{MotionTrigger, PointType, UserProgram, VelocityMode};
use crate::pmac::motion_axes::AxisMapping;
use crate::pmac::profile::PmacTrajectoryProfile;
use crate::pmac::velocity_profile::VelocityProfile;
use crate::scan::{Point, TrajectoryModel};

/// Shared gap breakpoints closer than this are merged before interval checks.
const COLUMN_EPSILON: f64 = 1e-9;

/// Demand per scan axis.
pub type AxisPositions = BTreeMap<String, f64>;

fn demand(values: &HashMap<String, f64>, axis: &str, which: &str) -> ScanResult<f64> {
    values.get(axis).copied().ok_or_else(|| {
        ScanError::validation(format!("scan point has no {which} demand for axis '{axis}'"))
    })
}

/// Velocity of every mapped axis at the entry (`lower`) or exit (`upper`) of
/// `point`, assuming constant acceleration across the point.
///
/// # Errors
///
/// `Kinematic` if any axis would move at or above its velocity limit;
/// `Validation` if the point has no duration or lacks a mapped axis.
pub fn point_velocities(
    mapping: &AxisMapping,
    point: &Point,
    entry: bool,
) -> ScanResult<AxisPositions> {
    if !(point.duration > 0.0) {
        return Err(ScanError::validation(format!(
            "scan point duration must be positive, got {}",
            point.duration
        )));
    }
    let mut velocities = AxisPositions::new();
    for (axis, motor) in mapping {
        let lower = demand(&point.lower, axis, "lower")?;
        let position = demand(&point.positions, axis, "midpoint")?;
        let upper = demand(&point.upper, axis, "upper")?;
        let vp = (upper - lower) / point.duration;
        let d_half = if entry { position - lower } else { upper - position };
        let velocity = 4.0 * d_half / point.duration - vp;
        motor.check_velocity(velocity)?;
        velocities.insert(axis.clone(), velocity);
    }
    Ok(velocities)
}

/// True if `point` ends exactly where `next` starts on every mapped axis and
/// no pause is requested in between.
pub fn points_joined(mapping: &AxisMapping, point: &Point, next: &Point) -> bool {
    !point.has_delay_after()
        && mapping.keys().all(|axis| {
            matches!(
                (point.upper.get(axis), next.lower.get(axis)),
                (Some(upper), Some(lower)) if upper == lower
            )
        })
}

/// True if `p1` and `p2` move every mapped axis by the same amounts in the
/// same time, so the segment between them is a straight line.
pub fn is_same_velocity(mapping: &AxisMapping, p1: &Point, p2: &Point) -> bool {
    if !is_close(p1.duration, p2.duration) {
        return false;
    }
    let deltas = |p: &Point, axis: &str| -> Option<(f64, f64)> {
        let lower = p.lower.get(axis)?;
        let position = p.positions.get(axis)?;
        let upper = p.upper.get(axis)?;
        Some((lower - position, position - upper))
    };
    mapping.keys().all(|axis| match (deltas(p1, axis), deltas(p2, axis)) {
        (Some((a1, b1)), Some((a2, b2))) => is_close(a1, a2) && is_close(b1, b2),
        _ => false,
    })
}

/// Where each mapped axis must start so that a ramp from rest reaches the
/// entry velocity of `first` exactly at its `lower` demand.
pub fn starting_position(mapping: &AxisMapping, first: &Point) -> ScanResult<AxisPositions> {
    let velocities = point_velocities(mapping, first, true)?;
    let mut positions = AxisPositions::new();
    for (axis, motor) in mapping {
        let lower = demand(&first.lower, axis, "lower")?;
        positions.insert(axis.clone(), lower - motor.ramp_distance(0.0, velocities[axis], None));
    }
    Ok(positions)
}

/// Solve per-axis velocity profiles from the exit of `point` to the entry of
/// `next` that all take the same total time, at least `min_time`.
///
/// The slowest axis sets the time for the others; a second pass confirms
/// every axis can match it. Profiles with intervals shorter than
/// `min_interval` are quantized.
///
/// # Errors
///
/// `Convergence` if the axes still disagree after the second pass or an axis
/// cannot cover its distance in the shared time; `Kinematic` if an entry or
/// exit velocity is over the limit.
pub fn profile_between_points(
    mapping: &AxisMapping,
    point: &Point,
    next: &Point,
    min_time: f64,
    min_interval: f64,
) -> ScanResult<BTreeMap<String, VelocityProfile>> {
    let start_velocities = point_velocities(mapping, point, false)?;
    let end_velocities = point_velocities(mapping, next, true)?;

    let mut distances = AxisPositions::new();
    for axis in mapping.keys() {
        let distance = demand(&next.lower, axis, "lower")? - demand(&point.upper, axis, "upper")?;
        distances.insert(axis.clone(), distance);
    }

    let mut min_time = min_time;
    for iteration in 0..2 {
        let mut profiles = BTreeMap::new();
        for (axis, motor) in mapping {
            let profile = motor.make_velocity_profile(
                start_velocities[axis],
                end_velocities[axis],
                distances[axis],
                min_time,
                min_interval,
            )?;
            profiles.insert(axis.clone(), profile);
        }
        let t_max = profiles
            .values()
            .map(VelocityProfile::t_total)
            .fold(min_time, f64::max);
        if profiles.values().all(|p| is_close(p.t_total(), t_max)) {
            for profile in profiles.values_mut() {
                if profile.check_quantize() {
                    profile.quantize()?;
                }
            }
            trace!(iteration, t_total = t_max, axes = profiles.len(), "gap profiles agree");
            return Ok(profiles);
        }
        min_time = t_max;
    }
    Err(ScanError::Convergence(format!(
        "gap profiles did not agree on a duration after 2 iterations (last {min_time}s)"
    )))
}

/// One compiled chunk of a scan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileChunk {
    /// Segments of the chunk.
    pub profile: PmacTrajectoryProfile,
    /// First step compiled into the chunk.
    pub start_index: usize,
    /// Step the next chunk starts from.
    pub end_index: usize,
    /// True if the chunk ends with the tail-off.
    pub finished: bool,
}

#[derive(Debug, Clone)]
struct Checkpoint {
    segments: usize,
    lookup: usize,
    time_since_last_pvt: f64,
    last_positions: AxisPositions,
}

/// Compiles the points of one scan into PVT chunks.
#[derive(Debug)]
pub struct TrajectoryCompiler {
    axis_mapping: AxisMapping,
    trigger: MotionTrigger,
    min_turnaround: f64,
    min_interval: f64,
    profile: PmacTrajectoryProfile,
    time_since_last_pvt: f64,
    completed_steps_lookup: Vec<usize>,
    last_positions: AxisPositions,
}

impl TrajectoryCompiler {
    /// Compiler for the axes in `axis_mapping`.
    ///
    /// `min_turnaround` is raised to [`MIN_TIME`] and `min_interval` to
    /// [`MIN_INTERVAL`] if smaller.
    pub fn new(
        axis_mapping: AxisMapping,
        trigger: MotionTrigger,
        min_turnaround: f64,
        min_interval: f64,
    ) -> Self {
        Self {
            axis_mapping,
            trigger,
            min_turnaround: min_turnaround.max(MIN_TIME),
            min_interval: min_interval.max(MIN_INTERVAL),
            profile: Self::empty_profile(),
            time_since_last_pvt: 0.0,
            completed_steps_lookup: Vec::new(),
            last_positions: AxisPositions::new(),
        }
    }

    fn empty_profile() -> PmacTrajectoryProfile {
        PmacTrajectoryProfile {
            velocity_mode: Some(Vec::new()),
            user_programs: Some(Vec::new()),
            ..PmacTrajectoryProfile::default()
        }
    }

    /// Mapping the compiler was built for.
    pub fn axis_mapping(&self) -> &AxisMapping {
        &self.axis_mapping
    }

    /// Trigger mode.
    pub fn trigger(&self) -> MotionTrigger {
        self.trigger
    }

    /// Completed generator steps at the end of every segment emitted so far in
    /// this scan, indexed by segment.
    pub fn completed_steps_lookup(&self) -> &[usize] {
        &self.completed_steps_lookup
    }

    /// Compile the points from `start_index` until the chunk is full or the
    /// model's range is exhausted.
    ///
    /// `run_up` starts a new scan: the lookup and carried state are cleared
    /// and a run-up segment is emitted first.
    ///
    /// # Errors
    ///
    /// `Validation` if `start_index` is outside the model or a single point
    /// does not fit in a chunk; otherwise whatever the velocity checks and
    /// gap solves return. The carried state is unspecified after an error.
    pub fn compile_chunk(
        &mut self,
        model: &TrajectoryModel,
        start_index: usize,
        run_up: bool,
    ) -> ScanResult<ProfileChunk> {
        if start_index >= model.end_index {
            return Err(ScanError::validation(format!(
                "cannot compile from step {start_index}, the scan ends at {}",
                model.end_index
            )));
        }
        self.profile = Self::empty_profile();
        if run_up {
            self.completed_steps_lookup.clear();
            self.time_since_last_pvt = 0.0;
            self.add_run_up(&model.point(start_index)?, start_index)?;
        }

        let mut point = model.point(start_index)?;
        for index in start_index..model.end_index {
            let checkpoint = self.checkpoint();
            let next = if index + 1 < model.end_index {
                Some(model.point(index + 1)?)
            } else {
                None
            };
            let joined = next
                .as_ref()
                .is_some_and(|next| points_joined(&self.axis_mapping, &point, next));

            if self.trigger.every_point() {
                self.add_point_pair(&point, index, joined)?;
            } else {
                self.add_sparse_point(&point, index, next.as_ref(), joined)?;
            }
            match &next {
                Some(next) if !joined => self.insert_gap(&point, next, index + 1)?,
                Some(_) => {}
                None => self.add_tail_off(&point, model.end_index)?,
            }

            if self.profile.len() > PROFILE_POINTS {
                if index == start_index {
                    return Err(ScanError::validation(format!(
                        "step {index} alone needs more than {PROFILE_POINTS} segments"
                    )));
                }
                self.restore(checkpoint);
                debug!(
                    start_index,
                    end_index = index,
                    segments = self.profile.len(),
                    "chunk full"
                );
                return Ok(self.take_chunk(start_index, index, false));
            }
            if let Some(next) = next {
                point = next;
            }
        }
        debug!(
            start_index,
            end_index = model.end_index,
            segments = self.profile.len(),
            "final chunk compiled"
        );
        Ok(self.take_chunk(start_index, model.end_index, true))
    }

    fn take_chunk(&mut self, start_index: usize, end_index: usize, finished: bool) -> ProfileChunk {
        ProfileChunk {
            profile: std::mem::replace(&mut self.profile, Self::empty_profile()),
            start_index,
            end_index,
            finished,
        }
    }

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            segments: self.profile.len(),
            lookup: self.completed_steps_lookup.len(),
            time_since_last_pvt: self.time_since_last_pvt,
            last_positions: self.last_positions.clone(),
        }
    }

    fn restore(&mut self, checkpoint: Checkpoint) {
        let n = checkpoint.segments;
        self.profile.time_array.truncate(n);
        if let Some(modes) = self.profile.velocity_mode.as_mut() {
            modes.truncate(n);
        }
        if let Some(programs) = self.profile.user_programs.as_mut() {
            programs.truncate(n);
        }
        for motor in self.axis_mapping.values() {
            self.profile.axes[motor.cs_axis].truncate(n);
        }
        self.completed_steps_lookup.truncate(checkpoint.lookup);
        self.time_since_last_pvt = checkpoint.time_since_last_pvt;
        self.last_positions = checkpoint.last_positions;
    }

    /// Append one segment without splitting.
    fn push_segment(
        &mut self,
        time: f64,
        mode: VelocityMode,
        program: UserProgram,
        completed_step: usize,
        positions: &AxisPositions,
    ) {
        self.profile.time_array.push(time);
        if let Some(modes) = self.profile.velocity_mode.as_mut() {
            modes.push(mode);
        }
        if let Some(programs) = self.profile.user_programs.as_mut() {
            programs.push(program);
        }
        for (axis, motor) in &self.axis_mapping {
            if let Some(&position) = positions.get(axis) {
                self.profile.axes[motor.cs_axis].push(position);
                self.last_positions.insert(axis.clone(), position);
            }
        }
        self.completed_steps_lookup.push(completed_step);
    }

    /// Append a segment, splitting it into equal pieces with linearly
    /// interpolated positions if it is longer than [`MAX_MOVE_TIME`].
    fn add_profile_point(
        &mut self,
        time: f64,
        mode: VelocityMode,
        point_type: PointType,
        completed_step: usize,
        positions: &AxisPositions,
    ) {
        let program = self.trigger.user_program(point_type);
        if time <= MAX_MOVE_TIME {
            self.push_segment(time, mode, program, completed_step, positions);
            return;
        }
        let nsplit = (time / MAX_MOVE_TIME).ceil() as usize;
        let piece = time / nsplit as f64;
        let filler_step = self
            .completed_steps_lookup
            .last()
            .copied()
            .unwrap_or(completed_step);
        let from = self.last_positions.clone();
        trace!(time, nsplit, "splitting long segment");
        for k in 1..nsplit {
            let fraction = k as f64 / nsplit as f64;
            let interpolated: AxisPositions = positions
                .iter()
                .map(|(axis, &target)| {
                    let start = from.get(axis).copied().unwrap_or(target);
                    (axis.clone(), start + (target - start) * fraction)
                })
                .collect();
            self.push_segment(
                piece,
                VelocityMode::PrevToNext,
                UserProgram::NoProgram,
                filler_step,
                &interpolated,
            );
        }
        self.push_segment(piece, mode, program, completed_step, positions);
    }

    fn demands(&self, values: &HashMap<String, f64>, which: &str) -> ScanResult<AxisPositions> {
        self.axis_mapping
            .keys()
            .map(|axis| Ok((axis.clone(), demand(values, axis, which)?)))
            .collect()
    }

    fn add_run_up(&mut self, first: &Point, start_index: usize) -> ScanResult<()> {
        let velocities = point_velocities(&self.axis_mapping, first, true)?;
        let mut run_up_time = MIN_TIME;
        for (axis, motor) in &self.axis_mapping {
            run_up_time = run_up_time.max(motor.acceleration_time(0.0, velocities[axis]));
        }
        self.last_positions = starting_position(&self.axis_mapping, first)?;
        let lower = self.demands(&first.lower, "lower")?;
        debug!(run_up_time, start_index, "adding run-up");
        self.add_profile_point(
            run_up_time,
            VelocityMode::PrevToCurrent,
            PointType::StartOfRow,
            start_index,
            &lower,
        );
        Ok(())
    }

    fn upper_segment_kind(joined: bool) -> (VelocityMode, PointType) {
        if joined {
            (VelocityMode::PrevToNext, PointType::PointJoin)
        } else {
            (VelocityMode::PrevToCurrent, PointType::EndOfRow)
        }
    }

    fn add_point_pair(&mut self, point: &Point, index: usize, joined: bool) -> ScanResult<()> {
        let half = point.duration / 2.0;
        let positions = self.demands(&point.positions, "midpoint")?;
        self.add_profile_point(
            half,
            VelocityMode::PrevToNext,
            PointType::MidPoint,
            index,
            &positions,
        );
        let upper = self.demands(&point.upper, "upper")?;
        let (mode, point_type) = Self::upper_segment_kind(joined);
        self.add_profile_point(half, mode, point_type, index + 1, &upper);
        Ok(())
    }

    fn add_sparse_point(
        &mut self,
        point: &Point,
        index: usize,
        next: Option<&Point>,
        joined: bool,
    ) -> ScanResult<()> {
        // after a skipped point the row end still needs its boundary segment
        let do_skip = if self.time_since_last_pvt > 0.0 && !joined {
            true
        } else {
            next.is_some_and(|next| joined && is_same_velocity(&self.axis_mapping, point, next))
        };

        if do_skip {
            self.time_since_last_pvt += point.duration;
        } else {
            let positions = self.demands(&point.positions, "midpoint")?;
            self.add_profile_point(
                self.time_since_last_pvt + point.duration / 2.0,
                VelocityMode::PrevToNext,
                PointType::MidPoint,
                index,
                &positions,
            );
            self.time_since_last_pvt = point.duration / 2.0;
        }

        if !do_skip || !joined {
            let upper = self.demands(&point.upper, "upper")?;
            let (mode, point_type) = Self::upper_segment_kind(joined);
            self.add_profile_point(self.time_since_last_pvt, mode, point_type, index + 1, &upper);
            self.time_since_last_pvt = 0.0;
        }
        Ok(())
    }

    /// Shared, strictly increasing gap breakpoint times (excluding 0) and
    /// whether each one was added only to respect [`MAX_MOVE_TIME`].
    fn gap_time_column(&self, profiles: &BTreeMap<String, VelocityProfile>) -> Vec<(f64, bool)> {
        let total = profiles
            .values()
            .map(VelocityProfile::t_total)
            .fold(0.0, f64::max);
        let mut times: Vec<f64> = profiles
            .values()
            .flat_map(|p| p.make_arrays().0)
            .filter(|&t| t > COLUMN_EPSILON && t < total - COLUMN_EPSILON)
            .collect();
        times.push(total);
        times.sort_by(f64::total_cmp);
        times.dedup_by(|a, b| (*a - *b).abs() < COLUMN_EPSILON);

        // merge intervals the union made shorter than min_interval
        let mut merged: Vec<f64> = Vec::with_capacity(times.len());
        let last = times.len() - 1;
        for (k, &t) in times.iter().enumerate() {
            let prev = merged.last().copied().unwrap_or(0.0);
            if t - prev < self.min_interval - COLUMN_EPSILON {
                if k != last {
                    continue;
                }
                merged.pop();
            }
            merged.push(t);
        }

        let mut column = Vec::with_capacity(merged.len());
        let mut prev = 0.0;
        for t in merged {
            let dt = t - prev;
            if dt > MAX_MOVE_TIME {
                let n = (dt / MAX_MOVE_TIME).ceil() as usize;
                for k in 1..n {
                    column.push((prev + dt * k as f64 / n as f64, true));
                }
            }
            column.push((t, false));
            prev = t;
        }
        column
    }

    fn insert_gap(&mut self, point: &Point, next: &Point, completed_step: usize) -> ScanResult<()> {
        let min_turnaround = self.min_turnaround.max(point.delay_after.unwrap_or(0.0));
        let lower = self.demands(&next.lower, "lower")?;
        let start_program = self.trigger.user_program(PointType::StartOfRow);

        if self.axis_mapping.is_empty() {
            self.push_segment(
                min_turnaround,
                VelocityMode::PrevToCurrent,
                start_program,
                completed_step,
                &lower,
            );
            return Ok(());
        }

        let profiles = profile_between_points(
            &self.axis_mapping,
            point,
            next,
            min_turnaround,
            self.min_interval,
        )?;
        let upper = self.demands(&point.upper, "upper")?;
        let column = self.gap_time_column(&profiles);
        debug!(
            completed_step,
            segments = column.len(),
            duration = column.last().map_or(0.0, |(t, _)| *t),
            "inserting gap"
        );

        let turnaround = self.trigger.user_program(PointType::Turnaround);
        let last = column.len() - 1;
        let mut prev = 0.0;
        for (k, &(t, filler)) in column.iter().enumerate() {
            let (positions, program) = if k == last {
                (lower.clone(), start_program)
            } else {
                let positions = profiles
                    .iter()
                    .map(|(axis, profile)| (axis.clone(), upper[axis] + profile.position_at(t)))
                    .collect();
                let program = if filler { UserProgram::NoProgram } else { turnaround };
                (positions, program)
            };
            let mode = if filler {
                VelocityMode::PrevToNext
            } else {
                VelocityMode::PrevToCurrent
            };
            self.push_segment(t - prev, mode, program, completed_step, &positions);
            prev = t;
        }
        Ok(())
    }

    fn add_tail_off(&mut self, last: &Point, end_index: usize) -> ScanResult<()> {
        let velocities = point_velocities(&self.axis_mapping, last, false)?;
        let mut tail_off_time = MIN_TIME;
        let mut positions = AxisPositions::new();
        for (axis, motor) in &self.axis_mapping {
            let velocity = velocities[axis];
            tail_off_time = tail_off_time.max(motor.acceleration_time(0.0, velocity));
            let upper = demand(&last.upper, axis, "upper")?;
            positions.insert(axis.clone(), upper + motor.ramp_distance(velocity, 0.0, None));
        }
        debug!(tail_off_time, end_index, "adding tail-off");
        self.add_profile_point(
            tail_off_time,
            VelocityMode::ZeroVelocity,
            PointType::Turnaround,
            end_index,
            &positions,
        );
        Ok(())
    }
}
