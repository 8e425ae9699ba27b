//! Scan controller.
//!
//! Drives one PMAC coordinate system through a fly scan:
//!
//! ```text
//! Init -> Validated -> Configured -> Building -> Executing -> Complete
//!   \________\___________\_____________\____________\-> Aborted
//! ```
//!
//! Everything that can reject a scan (duration, axis mapping, firmware
//! version, point velocities, the first chunk) is checked before the first
//! buffer write. Once writing has started, errors are returned as they are
//! and nothing is retried; the caller decides whether to [`abort`].
//!
//! Methods take `&mut self`, so a controller drives a single scan at a time.
//!
//! [`abort`]: ScanController::abort

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::config::ScanConfig;
use crate::error::{ScanError, ScanResult};
use crate::hardware::capabilities::{ExecutionState, MotorChannel, PmacController};
use crate::pmac::compiler::{
    point_velocities, starting_position, AxisPositions, TrajectoryCompiler,
};
use crate::pmac::consts::{is_close, NOMINAL_SERVO_FREQUENCY, PROFILE_POINTS};
use crate::pmac::modes::MotionTrigger;
use crate::pmac::motion_axes::{cs_axis_mapping, cs_port_with_motors_in, get_motion_axes, AxisMapping};
use crate::pmac::profile::{PmacTrajectoryProfile, TickQuantizer};
use crate::pmac::profile_io::{
    abort_profile, bounded, check_program_version, execute_profile, write_profile, IoSettings,
};
use crate::scan::TrajectoryModel;

/// Lifecycle of a scan on one coordinate system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScanState {
    /// Nothing validated yet.
    Init,
    /// Duration checked against the servo rate.
    Validated,
    /// Axes resolved and the first chunk compiled.
    Configured,
    /// Buffer being written; ready to execute once configuration returns.
    Building,
    /// Trajectory running.
    Executing,
    /// Trajectory finished.
    Complete,
    /// Stopped by an explicit abort.
    Aborted,
}

impl ScanState {
    /// `Complete` or `Aborted`.
    pub fn is_terminal(self) -> bool {
        matches!(self, ScanState::Complete | ScanState::Aborted)
    }
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScanState::Init => "init",
            ScanState::Validated => "validated",
            ScanState::Configured => "configured",
            ScanState::Building => "building",
            ScanState::Executing => "executing",
            ScanState::Complete => "complete",
            ScanState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Scan behaviour and I/O bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScanSettings {
    /// Which segments fire detector triggers.
    pub output_triggers: MotionTrigger,
    /// Shortest turnaround between rows, in seconds.
    pub min_turnaround: f64,
    /// Shortest interval between turnaround breakpoints, in seconds.
    pub min_interval: f64,
    /// Channel I/O bounds.
    pub io: IoSettings,
    /// Progress polling interval while executing.
    pub poll_interval: Duration,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self::from(&ScanConfig::default())
    }
}

impl From<&ScanConfig> for ScanSettings {
    fn from(config: &ScanConfig) -> Self {
        Self {
            output_triggers: config.output_triggers,
            min_turnaround: config.min_turnaround,
            min_interval: config.min_interval,
            io: IoSettings {
                timeout: Duration::from_millis(config.io_timeout_ms),
            },
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        }
    }
}

/// Outcome of [`ScanController::scan_points`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanSummary {
    /// Generator steps completed.
    pub completed_steps: usize,
    /// Per-point duration actually scanned.
    pub duration: f64,
    /// True if the requested duration was corrected to the servo rate.
    pub revised: bool,
    /// Coordinate system port, or `None` if no trajectory was needed.
    pub cs_port: Option<String>,
    /// Chunks written (first build plus appends).
    pub chunks: usize,
    /// Segments written over all chunks.
    pub segments: usize,
}

#[derive(Debug)]
struct ActiveScan {
    model: TrajectoryModel,
    compiler: TrajectoryCompiler,
    cs_port: String,
    next_index: usize,
    finished: bool,
    chunks: usize,
    segments: usize,
}

/// Drives trajectory scans on one controller.
pub struct ScanController {
    pmac: Arc<dyn PmacController>,
    settings: ScanSettings,
    state: ScanState,
    quantizer: TickQuantizer,
    active: Option<ActiveScan>,
    completed_steps: usize,
}

impl fmt::Debug for ScanController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanController")
            .field("settings", &self.settings)
            .field("state", &self.state)
            .field("completed_steps", &self.completed_steps)
            .finish_non_exhaustive()
    }
}

impl ScanController {
    /// Controller for `pmac` in the `Init` state.
    pub fn new(pmac: Arc<dyn PmacController>, settings: ScanSettings) -> Self {
        Self {
            pmac,
            settings,
            state: ScanState::Init,
            quantizer: TickQuantizer::new(),
            active: None,
            completed_steps: 0,
        }
    }

    /// Current state.
    pub fn state(&self) -> ScanState {
        self.state
    }

    /// Settings in use.
    pub fn settings(&self) -> &ScanSettings {
        &self.settings
    }

    /// Generator steps completed by the running or last scan.
    pub fn completed_steps(&self) -> usize {
        self.completed_steps
    }

    /// Segment-to-step lookup of the current scan, empty if none is active.
    pub fn completed_steps_lookup(&self) -> &[usize] {
        self.active
            .as_ref()
            .map_or(&[], |active| active.compiler.completed_steps_lookup())
    }

    fn expect_state(&self, action: &str, allowed: &[ScanState]) -> ScanResult<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(ScanError::InvalidState {
                action: action.to_string(),
                state: self.state.to_string(),
            })
        }
    }

    /// Check that half the point duration is a whole number of servo ticks.
    ///
    /// Returns a model over a re-prepared generator with the corrected
    /// duration if the requested one does not fit, `None` if it does. The
    /// given model is never modified.
    #[instrument(skip_all, fields(duration = model.duration()))]
    pub async fn validate_trajectory_scan(
        &mut self,
        model: &TrajectoryModel,
    ) -> ScanResult<Option<TrajectoryModel>> {
        self.expect_state("validate", &[ScanState::Init, ScanState::Validated])?;
        let duration = model.duration();
        if !(duration.is_finite() && duration > 0.0) {
            return Err(ScanError::validation(format!(
                "trajectory scans need a fixed positive point duration, got {duration}"
            )));
        }
        let servo_frequency =
            bounded("read servo frequency", self.settings.io, self.pmac.servo_frequency()).await?;

        // half a point in whole servo ticks, rounded down
        let mut ticks = (servo_frequency * 0.5 * duration).floor();
        if !is_close(servo_frequency, NOMINAL_SERVO_FREQUENCY) {
            // servo jitter when I10 is not a whole number of move timer ticks
            ticks += 0.002;
        }
        let micros = (ticks / servo_frequency * 1e6).ceil();
        let revised = 2.0 * micros / 1e6;

        self.state = ScanState::Validated;
        if (revised - duration).abs() > 1e-12 {
            if revised <= 0.0 {
                return Err(ScanError::validation(format!(
                    "point duration {duration}s is shorter than two servo cycles at {servo_frequency} Hz"
                )));
            }
            info!(requested = duration, revised, servo_frequency, "point duration revised");
            let generator = model.generator().with_duration(revised);
            return Ok(Some(model.with_revised_generator(generator)));
        }
        debug!(servo_frequency, "point duration fits the servo rate");
        Ok(None)
    }

    /// Resolve the axes, compile the first chunk and prime the controller.
    ///
    /// Writes a clean profile and executes it to reset the trigger outputs,
    /// moves every scanned axis to its run-up position, then builds the first
    /// chunk. A scan that moves no axis and fires no triggers needs no
    /// trajectory; it is configured without touching the hardware.
    #[instrument(skip_all, fields(start = model.start_index, end = model.end_index))]
    pub async fn configure_pmac_for_scan(&mut self, model: TrajectoryModel) -> ScanResult<()> {
        self.expect_state("configure", &[ScanState::Validated])?;
        let io = self.settings.io;
        let trigger = self.settings.output_triggers;
        let axes = get_motion_axes(model.generator());
        if axes.is_empty() && trigger == MotionTrigger::None {
            info!("no axes move and no triggers requested, trajectory not needed");
            self.active = None;
            self.completed_steps = model.start_index;
            self.state = ScanState::Configured;
            return Ok(());
        }

        let motors = self.pmac.motors();
        let (mapping, cs_port) = if axes.is_empty() {
            let port = bounded("find CS port", io, cs_port_with_motors_in(&motors)).await?;
            (AxisMapping::new(), port)
        } else {
            let mapping = bounded("resolve axis mapping", io, cs_axis_mapping(&motors, &axes)).await?;
            let port = mapping
                .values()
                .next()
                .map(|info| info.cs_port.clone())
                .ok_or_else(|| ScanError::validation("no scan axis resolved to a motor"))?;
            (mapping, port)
        };
        let trajectory = self.pmac.trajectory();
        check_program_version(trajectory.as_ref(), io).await?;

        let first = model.point(model.start_index)?;
        let start = starting_position(&mapping, &first)?;
        let mut compiler = TrajectoryCompiler::new(
            mapping,
            trigger,
            self.settings.min_turnaround,
            self.settings.min_interval,
        );
        let chunk = compiler.compile_chunk(&model, model.start_index, true)?;
        chunk.profile.with_ticks(&mut TickQuantizer::new())?;
        check_point_velocities(compiler.axis_mapping(), &model, chunk.end_index)?;
        self.state = ScanState::Configured;
        info!(
            cs_port = %cs_port,
            axes = compiler.axis_mapping().len(),
            segments = chunk.profile.len(),
            finished = chunk.finished,
            "first chunk compiled"
        );

        self.state = ScanState::Building;
        write_profile(
            trajectory.as_ref(),
            &PmacTrajectoryProfile::clean(),
            &mut TickQuantizer::new(),
            Some(&cs_port),
            io,
        )
        .await?;
        execute_profile(trajectory.as_ref(), io).await?;
        move_to_start(&motors, &start, io).await?;

        self.quantizer = TickQuantizer::new();
        write_profile(
            trajectory.as_ref(),
            &chunk.profile,
            &mut self.quantizer,
            Some(&cs_port),
            io,
        )
        .await?;

        self.completed_steps = model.start_index;
        self.active = Some(ActiveScan {
            model,
            compiler,
            cs_port,
            next_index: chunk.end_index,
            finished: chunk.finished,
            chunks: 1,
            segments: chunk.profile.len(),
        });
        Ok(())
    }

    /// Start the built trajectory.
    pub async fn execute(&mut self) -> ScanResult<()> {
        self.expect_state("execute", &[ScanState::Configured, ScanState::Building])?;
        if self.active.is_none() {
            self.state = ScanState::Complete;
            return Ok(());
        }
        execute_profile(self.pmac.trajectory().as_ref(), self.settings.io).await?;
        self.state = ScanState::Executing;
        Ok(())
    }

    /// Report progress and keep the buffer topped up.
    ///
    /// `scanned` is the controller's count of completed segments; it maps to
    /// generator steps through the segment lookup. While fewer than
    /// [`PROFILE_POINTS`] segments are queued ahead of it and points remain,
    /// further chunks are compiled and appended.
    pub async fn update_step(&mut self, scanned: usize) -> ScanResult<usize> {
        self.expect_state("update progress", &[ScanState::Executing])?;
        let io = self.settings.io;
        let trajectory = self.pmac.trajectory();
        let Some(active) = self.active.as_mut() else {
            return Ok(self.completed_steps);
        };

        let lookup = active.compiler.completed_steps_lookup();
        if scanned > 0 && !lookup.is_empty() {
            self.completed_steps = lookup[scanned.min(lookup.len()) - 1];
        }

        while !active.finished
            && active
                .compiler
                .completed_steps_lookup()
                .len()
                .saturating_sub(scanned)
                < PROFILE_POINTS
        {
            let chunk = active
                .compiler
                .compile_chunk(&active.model, active.next_index, false)?;
            write_profile(trajectory.as_ref(), &chunk.profile, &mut self.quantizer, None, io).await?;
            active.next_index = chunk.end_index;
            active.finished = chunk.finished;
            active.chunks += 1;
            active.segments += chunk.profile.len();
            debug!(
                start = chunk.start_index,
                end = chunk.end_index,
                segments = chunk.profile.len(),
                "chunk appended"
            );
        }
        Ok(self.completed_steps)
    }

    /// Poll progress until the trajectory finishes, appending chunks as it
    /// runs. Returns the completed generator steps.
    ///
    /// # Errors
    ///
    /// `Hardware` if the trajectory fails, is aborted elsewhere or runs out of
    /// points before the last chunk was written. The state is left as it was,
    /// so the caller can still abort.
    pub async fn run_to_completion(&mut self) -> ScanResult<usize> {
        self.expect_state("run", &[ScanState::Executing])?;
        let io = self.settings.io;
        let trajectory = self.pmac.trajectory();
        loop {
            let scanned = bounded("read points scanned", io, trajectory.points_scanned()).await?;
            let completed = self.update_step(scanned).await?;
            match bounded("read execution state", io, trajectory.execution_state()).await? {
                ExecutionState::Done => {
                    let all_written = self.active.as_ref().map_or(true, |a| a.finished);
                    if !all_written {
                        return Err(ScanError::Hardware(format!(
                            "trajectory finished after {scanned} segments before the scan was fully written"
                        )));
                    }
                    self.state = ScanState::Complete;
                    info!(completed_steps = completed, "trajectory complete");
                    return Ok(completed);
                }
                ExecutionState::Aborted => {
                    warn!(completed_steps = completed, "trajectory aborted outside the controller");
                    return Err(ScanError::Hardware("trajectory was aborted".to_string()));
                }
                ExecutionState::Failed(message) => {
                    warn!(completed_steps = completed, %message, "trajectory failed");
                    return Err(ScanError::Hardware(message));
                }
                ExecutionState::Idle | ExecutionState::Executing => {
                    tokio::time::sleep(self.settings.poll_interval).await;
                }
            }
        }
    }

    /// Stop the trajectory on the controller.
    pub async fn abort(&mut self) -> ScanResult<()> {
        if self.state.is_terminal() {
            return Err(ScanError::InvalidState {
                action: "abort".to_string(),
                state: self.state.to_string(),
            });
        }
        abort_profile(self.pmac.trajectory().as_ref(), self.settings.io).await?;
        warn!(state = %self.state, completed_steps = self.completed_steps, "scan aborted");
        self.state = ScanState::Aborted;
        Ok(())
    }

    /// Return a finished or aborted controller to `Init`.
    pub fn reset(&mut self) -> ScanResult<()> {
        if !self.state.is_terminal() {
            return Err(ScanError::InvalidState {
                action: "reset".to_string(),
                state: self.state.to_string(),
            });
        }
        self.state = ScanState::Init;
        self.active = None;
        self.quantizer = TickQuantizer::new();
        self.completed_steps = 0;
        Ok(())
    }

    /// Validate (revising the duration if needed), configure, execute and run
    /// `model` to completion.
    pub async fn scan_points(&mut self, model: TrajectoryModel) -> ScanResult<ScanSummary> {
        let (model, revised) = match self.validate_trajectory_scan(&model).await? {
            Some(revised) => (revised, true),
            None => (model, false),
        };
        let duration = model.duration();
        self.configure_pmac_for_scan(model).await?;
        self.execute().await?;
        let completed_steps = if self.state == ScanState::Executing {
            self.run_to_completion().await?
        } else {
            self.completed_steps
        };
        let active = self.active.as_ref();
        Ok(ScanSummary {
            completed_steps,
            duration,
            revised,
            cs_port: active.map(|a| a.cs_port.clone()),
            chunks: active.map_or(0, |a| a.chunks),
            segments: active.map_or(0, |a| a.segments),
        })
    }
}

/// Put every scanned axis at its run-up position, all moves at once.
/// Entry and exit velocities of the points from `from` to the end of the
/// scan, which later chunks compile only once the trajectory is running.
fn check_point_velocities(
    mapping: &AxisMapping,
    model: &TrajectoryModel,
    from: usize,
) -> ScanResult<()> {
    for index in from..model.end_index {
        let point = model.point(index)?;
        point_velocities(mapping, &point, true)?;
        point_velocities(mapping, &point, false)?;
    }
    Ok(())
}

async fn move_to_start(
    motors: &[Arc<dyn MotorChannel>],
    start: &AxisPositions,
    io: IoSettings,
) -> ScanResult<()> {
    let mut moves = Vec::with_capacity(start.len());
    for motor in motors {
        let name = bounded("read scannable name", io, motor.scannable_name()).await?;
        if let Some(&demand) = start.get(&name) {
            debug!(axis = %name, demand, "moving to run-up position");
            moves.push(bounded("move to start", io, motor.set_setpoint(demand)));
        }
    }
    try_join_all(moves).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::{MockMotor, MockPmac, NOMINAL_I10};
    use crate::pmac::motor_info::MotorCs;
    use crate::scan::{CompoundGenerator, Dimension, LineGenerator};
    use tracing_test::traced_test;

    fn pmac(i10: f64) -> Arc<MockPmac> {
        Arc::new(
            MockPmac::new()
                .with_i10(i10)
                .with_motor(|log| MockMotor::new("x", MotorCs::new("CS1", "X"), 10.0, 0.1).with_log(log)),
        )
    }

    fn model(duration: f64) -> TrajectoryModel {
        TrajectoryModel::all_steps(Box::new(CompoundGenerator::new(
            vec![Dimension::Line(LineGenerator::new("x", "mm", 0.0, 1.0, 5))],
            duration,
        )))
    }

    #[tokio::test]
    async fn test_nominal_duration_not_revised() {
        let mut controller = ScanController::new(pmac(NOMINAL_I10), ScanSettings::default());
        assert!(controller.validate_trajectory_scan(&model(0.1)).await.unwrap().is_none());
        assert_eq!(controller.state(), ScanState::Validated);
    }

    #[tokio::test]
    async fn test_off_nominal_duration_revised() {
        // 8388608000 / 3_000_000 = 2796.2 Hz
        let mut controller = ScanController::new(pmac(3_000_000.0), ScanSettings::default());
        let original = model(0.1);
        let revised = controller
            .validate_trajectory_scan(&original)
            .await
            .unwrap()
            .unwrap();
        // floor(139.81) + 0.002 ticks = 49711 us per half point
        assert!((revised.duration() - 0.099422).abs() < 1e-12);
        assert_eq!(original.duration(), 0.1);
        assert_eq!(revised.point(0).unwrap().duration, revised.duration());
    }

    #[tokio::test]
    async fn test_zero_duration_rejected() {
        let mut controller = ScanController::new(pmac(NOMINAL_I10), ScanSettings::default());
        let err = controller.validate_trajectory_scan(&model(0.0)).await.unwrap_err();
        assert!(matches!(err, ScanError::Validation(_)));
        assert_eq!(controller.state(), ScanState::Init);
    }

    #[tokio::test]
    async fn test_execute_before_configure_is_invalid() {
        let mut controller = ScanController::new(pmac(NOMINAL_I10), ScanSettings::default());
        let err = controller.execute().await.unwrap_err();
        assert!(matches!(err, ScanError::InvalidState { .. }));
        assert!(controller.reset().is_err());
    }

    #[tokio::test]
    async fn test_scan_points_runs_to_completion() {
        let pmac = pmac(NOMINAL_I10);
        let mut controller = ScanController::new(pmac.clone(), ScanSettings {
            poll_interval: Duration::from_millis(1),
            ..ScanSettings::default()
        });
        let summary = controller.scan_points(model(0.1)).await.unwrap();
        assert_eq!(summary.completed_steps, 5);
        assert_eq!(summary.cs_port.as_deref(), Some("CS1"));
        assert_eq!(summary.chunks, 1);
        assert_eq!(controller.state(), ScanState::Complete);
        controller.reset().unwrap();
        assert_eq!(controller.state(), ScanState::Init);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_scan_logs_progress() {
        let mut controller = ScanController::new(pmac(NOMINAL_I10), ScanSettings {
            poll_interval: Duration::from_millis(1),
            ..ScanSettings::default()
        });
        controller.scan_points(model(0.1)).await.unwrap();
        assert!(logs_contain("first chunk compiled"));
        assert!(logs_contain("trajectory complete"));
    }
}
