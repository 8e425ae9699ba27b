//! Mock PMAC Implementations
//!
//! Provides a simulated controller for testing without physical hardware.
//! All mock channels use async-safe operations (tokio::time::sleep, not
//! std::thread::sleep).
//!
//! # Available Mocks
//!
//! - `MockMotor` - Motor record in a coordinate system
//! - `MockTrajectory` - Trajectory buffer that stages, builds, appends and runs
//! - `MockPmac` - Controller owning one trajectory buffer and a set of motors
//!
//! Every channel operation is appended to a call log shared by all mocks of
//! one `MockPmac`, so tests can check the order of hardware access.
//!
//! # Simulated Execution
//!
//! After `Execute`, every `points_scanned` readback advances by
//! `points_per_poll` segments until the end of the built buffer, at which
//! point the execution state becomes `Done`.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::{sleep, Duration};
use tracing::debug;

use crate::config::SimulationConfig;
use crate::error::{ScanError, ScanResult};
use crate::hardware::capabilities::{
    ActionStatus, ExecutionState, MotorChannel, PmacController, ProfileAction, TrajectoryBuffer,
};
use crate::pmac::consts::TRAJECTORY_PROGRAM_NUM;
use crate::pmac::cs_axes::{CsAxis, CsAxisArrays};
use crate::pmac::motor_info::MotorCs;

/// I10 of a controller running at the nominal 3.2 kHz servo rate.
pub const NOMINAL_I10: f64 = 2_621_440.0;

/// Shared, ordered record of channel operations.
pub type CallLog = Arc<Mutex<Vec<String>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn record(log: &CallLog, call: impl Into<String>) {
    lock(log).push(call.into());
}

// =============================================================================
// MockMotor - Simulated Motor Record
// =============================================================================

/// Mock motor record
///
/// Setpoints are reached immediately. Resolution defaults to 1 µm and units
/// to `mm`.
///
/// # Example
///
/// ```rust,ignore
/// let motor = MockMotor::new("x", MotorCs::new("CS1", "X"), 10.0, 0.1);
/// motor.set_setpoint(2.5).await?;
/// assert_eq!(motor.position().await?, 2.5);
/// ```
pub struct MockMotor {
    name: String,
    cs: Mutex<MotorCs>,
    position: Arc<RwLock<f64>>,
    max_velocity: f64,
    acceleration_time: f64,
    resolution: f64,
    offset: f64,
    units: String,
    log: CallLog,
}

impl MockMotor {
    /// Motor at position 0 driving scan axis `name`.
    pub fn new(name: &str, cs: MotorCs, max_velocity: f64, acceleration_time: f64) -> Self {
        Self {
            name: name.to_string(),
            cs: Mutex::new(cs),
            position: Arc::new(RwLock::new(0.0)),
            max_velocity,
            acceleration_time,
            resolution: 0.001,
            offset: 0.0,
            units: "mm".to_string(),
            log: CallLog::default(),
        }
    }

    /// Start at `position`.
    pub fn with_position(self, position: f64) -> Self {
        Self {
            position: Arc::new(RwLock::new(position)),
            ..self
        }
    }

    /// Override resolution and offset.
    pub fn with_scaling(self, resolution: f64, offset: f64) -> Self {
        Self {
            resolution,
            offset,
            ..self
        }
    }

    /// Record calls into `log`.
    pub fn with_log(self, log: CallLog) -> Self {
        Self { log, ..self }
    }

    /// Name of the driven axis.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current position without logging a call.
    pub async fn peek_position(&self) -> f64 {
        *self.position.read().await
    }
}

#[async_trait]
impl MotorChannel for MockMotor {
    async fn scannable_name(&self) -> ScanResult<String> {
        Ok(self.name.clone())
    }

    async fn position(&self) -> ScanResult<f64> {
        Ok(*self.position.read().await)
    }

    async fn set_setpoint(&self, demand: f64) -> ScanResult<()> {
        record(&self.log, format!("set_setpoint:{}", self.name));
        *self.position.write().await = demand;
        debug!(motor = %self.name, demand, "mock setpoint reached");
        Ok(())
    }

    async fn max_velocity(&self) -> ScanResult<f64> {
        Ok(self.max_velocity)
    }

    async fn acceleration_time(&self) -> ScanResult<f64> {
        Ok(self.acceleration_time)
    }

    async fn resolution(&self) -> ScanResult<f64> {
        Ok(self.resolution)
    }

    async fn offset(&self) -> ScanResult<f64> {
        Ok(self.offset)
    }

    async fn units(&self) -> ScanResult<String> {
        Ok(self.units.clone())
    }

    async fn cs(&self) -> ScanResult<MotorCs> {
        Ok(lock(&self.cs).clone())
    }

    async fn set_cs(&self, cs: MotorCs) -> ScanResult<()> {
        record(&self.log, format!("set_cs:{}", self.name));
        *lock(&self.cs) = cs;
        Ok(())
    }
}

// =============================================================================
// MockTrajectory - Simulated Trajectory Buffer
// =============================================================================

/// Contents of the mock trajectory buffer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BufferState {
    /// Last written buffer capacity.
    pub max_points: u32,
    /// Last written CS port.
    pub cs_port: Option<String>,
    /// Built (and appended) durations in ticks.
    pub time_array: Vec<u32>,
    /// Built velocity mode codes.
    pub velocity_mode: Vec<i32>,
    /// Built user program codes.
    pub user_programs: Vec<i32>,
    /// Built positions per CS axis.
    pub axes: CsAxisArrays,
    /// Number of accepted builds.
    pub builds: usize,
    /// Number of accepted appends.
    pub appends: usize,
    /// Number of executes.
    pub executes: usize,
    /// Number of aborts.
    pub aborts: usize,
}

#[derive(Debug, Default)]
struct Staged {
    num_points: usize,
    time_array: Vec<u32>,
    velocity_mode: Vec<i32>,
    user_programs: Vec<i32>,
    axes: CsAxisArrays,
}

#[derive(Debug)]
struct TrajectoryState {
    buffer: BufferState,
    staged: Staged,
    status: ActionStatus,
    execution: ExecutionState,
    points_scanned: usize,
}

/// Mock trajectory buffer
///
/// Array writes are staged; `Build` replaces the buffer with the staged
/// arrays and `Append` extends it. Failure and latency can be injected.
pub struct MockTrajectory {
    program_version: f64,
    build_failure: Option<String>,
    abort_failure: Option<String>,
    latency: Duration,
    points_per_poll: usize,
    state: Mutex<TrajectoryState>,
    log: CallLog,
}

impl Default for MockTrajectory {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTrajectory {
    /// Empty buffer running the supported trajectory program.
    pub fn new() -> Self {
        Self {
            program_version: TRAJECTORY_PROGRAM_NUM,
            build_failure: None,
            abort_failure: None,
            latency: Duration::ZERO,
            points_per_poll: 1000,
            state: Mutex::new(TrajectoryState {
                buffer: BufferState::default(),
                staged: Staged::default(),
                status: ActionStatus::Idle,
                execution: ExecutionState::Idle,
                points_scanned: 0,
            }),
            log: CallLog::default(),
        }
    }

    /// Report a different trajectory program version.
    pub fn with_program_version(self, program_version: f64) -> Self {
        Self {
            program_version,
            ..self
        }
    }

    /// Reject every build and append with `message`.
    pub fn with_build_failure(self, message: &str) -> Self {
        Self {
            build_failure: Some(message.to_string()),
            ..self
        }
    }

    /// Fail every abort with `message`.
    pub fn with_abort_failure(self, message: &str) -> Self {
        Self {
            abort_failure: Some(message.to_string()),
            ..self
        }
    }

    /// Delay every channel operation.
    pub fn with_latency(self, latency: Duration) -> Self {
        Self { latency, ..self }
    }

    /// Segments completed per `points_scanned` readback while executing.
    pub fn with_points_per_poll(self, points_per_poll: usize) -> Self {
        Self {
            points_per_poll: points_per_poll.max(1),
            ..self
        }
    }

    /// Record calls into `log`.
    pub fn with_log(self, log: CallLog) -> Self {
        Self { log, ..self }
    }

    /// Snapshot of the built buffer.
    pub fn buffer(&self) -> BufferState {
        lock(&self.state).buffer.clone()
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.log).clone()
    }

    /// Stop the running trajectory with an error.
    pub fn fail_execution(&self, message: &str) {
        lock(&self.state).execution = ExecutionState::Failed(message.to_string());
    }

    async fn channel(&self, call: impl Into<String>) {
        record(&self.log, call);
        if !self.latency.is_zero() {
            sleep(self.latency).await;
        }
    }

    fn commit(&self, state: &mut TrajectoryState, action: ProfileAction) {
        let staged = std::mem::take(&mut state.staged);
        let n = staged.num_points;
        let buffer = &mut state.buffer;
        if action == ProfileAction::Build {
            buffer.time_array.clear();
            buffer.velocity_mode.clear();
            buffer.user_programs.clear();
            buffer.axes = CsAxisArrays::default();
            buffer.builds += 1;
            state.points_scanned = 0;
            state.execution = ExecutionState::Idle;
        } else {
            buffer.appends += 1;
        }
        buffer.time_array.extend(staged.time_array.iter().take(n));
        buffer.velocity_mode.extend(staged.velocity_mode.iter().take(n));
        buffer.user_programs.extend(staged.user_programs.iter().take(n));
        for axis in CsAxis::ALL {
            buffer.axes[axis].extend(staged.axes[axis].iter().take(n));
        }
    }
}

#[async_trait]
impl TrajectoryBuffer for MockTrajectory {
    async fn program_version(&self) -> ScanResult<f64> {
        self.channel("program_version").await;
        Ok(self.program_version)
    }

    async fn set_max_points(&self, max_points: u32) -> ScanResult<()> {
        self.channel("set_max_points").await;
        lock(&self.state).buffer.max_points = max_points;
        Ok(())
    }

    async fn set_cs_port(&self, port: &str) -> ScanResult<()> {
        self.channel("set_cs_port").await;
        lock(&self.state).buffer.cs_port = Some(port.to_string());
        Ok(())
    }

    async fn set_num_points_to_build(&self, num_points: usize) -> ScanResult<()> {
        self.channel("set_num_points_to_build").await;
        lock(&self.state).staged.num_points = num_points;
        Ok(())
    }

    async fn write_time_array(&self, ticks: &[u32]) -> ScanResult<()> {
        self.channel("write_time_array").await;
        lock(&self.state).staged.time_array = ticks.to_vec();
        Ok(())
    }

    async fn write_velocity_mode(&self, modes: &[i32]) -> ScanResult<()> {
        self.channel("write_velocity_mode").await;
        lock(&self.state).staged.velocity_mode = modes.to_vec();
        Ok(())
    }

    async fn write_user_programs(&self, programs: &[i32]) -> ScanResult<()> {
        self.channel("write_user_programs").await;
        lock(&self.state).staged.user_programs = programs.to_vec();
        Ok(())
    }

    async fn write_axis(&self, axis: CsAxis, positions: Option<&[f64]>) -> ScanResult<()> {
        self.channel(format!("write_axis:{axis}")).await;
        lock(&self.state).staged.axes[axis] = positions.map(<[f64]>::to_vec).unwrap_or_default();
        Ok(())
    }

    async fn trigger(&self, action: ProfileAction) -> ScanResult<()> {
        self.channel(format!("trigger:{}", action.as_str())).await;
        let mut state = lock(&self.state);
        match action {
            ProfileAction::Execute => {
                if state.buffer.time_array.is_empty() {
                    return Err(ScanError::Hardware("execute with an empty buffer".into()));
                }
                state.buffer.executes += 1;
                state.execution = ExecutionState::Executing;
            }
            ProfileAction::Build | ProfileAction::Append => {
                if let Some(message) = &self.build_failure {
                    state.status = ActionStatus::Failure(message.clone());
                    return Ok(());
                }
                self.commit(&mut state, action);
                state.status = ActionStatus::Success;
            }
        }
        Ok(())
    }

    async fn abort(&self) -> ScanResult<()> {
        self.channel("abort").await;
        if let Some(message) = &self.abort_failure {
            return Err(ScanError::Hardware(message.clone()));
        }
        let mut state = lock(&self.state);
        state.buffer.aborts += 1;
        state.execution = ExecutionState::Aborted;
        Ok(())
    }

    async fn action_status(&self, _action: ProfileAction) -> ScanResult<ActionStatus> {
        self.channel("action_status").await;
        Ok(lock(&self.state).status.clone())
    }

    async fn execution_state(&self) -> ScanResult<ExecutionState> {
        self.channel("execution_state").await;
        Ok(lock(&self.state).execution.clone())
    }

    async fn points_scanned(&self) -> ScanResult<usize> {
        self.channel("points_scanned").await;
        let mut state = lock(&self.state);
        if state.execution == ExecutionState::Executing {
            let total = state.buffer.time_array.len();
            state.points_scanned = (state.points_scanned + self.points_per_poll).min(total);
            if state.points_scanned == total {
                state.execution = ExecutionState::Done;
            }
        }
        Ok(state.points_scanned)
    }
}

// =============================================================================
// MockPmac - Simulated Controller
// =============================================================================

/// Mock controller
///
/// # Example
///
/// ```rust,ignore
/// let pmac = MockPmac::new()
///     .with_motor(|log| MockMotor::new("x", MotorCs::new("CS1", "X"), 10.0, 0.1).with_log(log));
/// assert_eq!(pmac.servo_frequency().await?, 3200.0);
/// ```
pub struct MockPmac {
    i10: f64,
    trajectory: Arc<MockTrajectory>,
    motors: Vec<Arc<MockMotor>>,
    log: CallLog,
}

impl Default for MockPmac {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPmac {
    /// Controller at the nominal servo rate with no motors.
    pub fn new() -> Self {
        let log = CallLog::default();
        Self {
            i10: NOMINAL_I10,
            trajectory: Arc::new(MockTrajectory::new().with_log(log.clone())),
            motors: Vec::new(),
            log,
        }
    }

    /// Build a controller from the simulation section of the configuration.
    pub fn from_config(config: &SimulationConfig) -> Self {
        let mut pmac = Self::new().with_i10(config.i10).with_trajectory(|log| {
            MockTrajectory::new()
                .with_program_version(config.program_version)
                .with_points_per_poll(config.points_per_poll)
                .with_log(log)
        });
        for motor in &config.motors {
            pmac = pmac.with_motor(|log| {
                MockMotor::new(
                    &motor.name,
                    MotorCs::new(motor.cs_port.as_str(), motor.cs_axis.as_str()),
                    motor.max_velocity,
                    motor.acceleration_time,
                )
                .with_scaling(motor.resolution, motor.offset)
                .with_position(motor.position)
                .with_log(log)
            });
        }
        pmac
    }

    /// Report a different I10.
    pub fn with_i10(self, i10: f64) -> Self {
        Self { i10, ..self }
    }

    /// Replace the trajectory buffer; `build` receives the shared call log.
    pub fn with_trajectory(self, build: impl FnOnce(CallLog) -> MockTrajectory) -> Self {
        let trajectory = Arc::new(build(self.log.clone()));
        Self { trajectory, ..self }
    }

    /// Add a motor; `build` receives the shared call log.
    pub fn with_motor(mut self, build: impl FnOnce(CallLog) -> MockMotor) -> Self {
        self.motors.push(Arc::new(build(self.log.clone())));
        self
    }

    /// The mock trajectory buffer.
    pub fn trajectory_mock(&self) -> &MockTrajectory {
        &self.trajectory
    }

    /// The mock motor driving `name`.
    pub fn motor_mock(&self, name: &str) -> Option<&MockMotor> {
        self.motors.iter().find(|m| m.name() == name).map(Arc::as_ref)
    }

    /// Every call made to any channel of this controller, in order.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.log).clone()
    }

    /// Forget the calls made so far.
    pub fn clear_calls(&self) {
        lock(&self.log).clear();
    }
}

#[async_trait]
impl PmacController for MockPmac {
    fn trajectory(&self) -> Arc<dyn TrajectoryBuffer> {
        self.trajectory.clone()
    }

    fn motors(&self) -> Vec<Arc<dyn MotorChannel>> {
        self.motors
            .iter()
            .map(|m| m.clone() as Arc<dyn MotorChannel>)
            .collect()
    }

    async fn i10(&self) -> ScanResult<f64> {
        record(&self.log, "i10");
        Ok(self.i10)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_motor_setpoint() {
        let motor = MockMotor::new("x", MotorCs::new("CS1", "X"), 10.0, 0.1).with_position(1.0);
        assert_eq!(motor.position().await.unwrap(), 1.0);
        motor.set_setpoint(2.5).await.unwrap();
        assert_eq!(motor.position().await.unwrap(), 2.5);
        assert_eq!(motor.cs().await.unwrap().cs_axis().unwrap(), CsAxis::X);
    }

    #[tokio::test]
    async fn test_mock_servo_frequency() {
        let pmac = MockPmac::new();
        assert_eq!(pmac.servo_frequency().await.unwrap(), 3200.0);
        let bad = MockPmac::new().with_i10(0.0);
        assert!(bad.servo_frequency().await.is_err());
    }

    #[tokio::test]
    async fn test_execution_advances_to_done() {
        let trajectory = MockTrajectory::new().with_points_per_poll(2);
        trajectory.set_num_points_to_build(3).await.unwrap();
        trajectory.write_time_array(&[1, 2, 3]).await.unwrap();
        trajectory.trigger(ProfileAction::Build).await.unwrap();
        trajectory.trigger(ProfileAction::Execute).await.unwrap();
        assert_eq!(trajectory.points_scanned().await.unwrap(), 2);
        assert_eq!(trajectory.points_scanned().await.unwrap(), 3);
        assert_eq!(trajectory.execution_state().await.unwrap(), ExecutionState::Done);
    }

    #[tokio::test]
    async fn test_execute_needs_buffer() {
        let trajectory = MockTrajectory::new();
        assert!(trajectory.trigger(ProfileAction::Execute).await.is_err());
    }

    #[tokio::test]
    async fn test_shared_call_log() {
        let pmac = MockPmac::new()
            .with_motor(|log| MockMotor::new("x", MotorCs::new("CS1", "X"), 1.0, 1.0).with_log(log));
        pmac.motors()[0].set_setpoint(1.0).await.unwrap();
        pmac.trajectory().abort().await.unwrap();
        assert_eq!(pmac.calls(), vec!["set_setpoint:x", "abort"]);
    }
}
