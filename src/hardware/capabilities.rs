//! PMAC Channel Capabilities
//!
//! The scan controller never talks to a transport directly. It talks to three
//! capability traits, each covering one group of controller channels:
//!
//! - [`MotorChannel`] - one motor record (position, setpoint, limits, CS assignment)
//! - [`TrajectoryBuffer`] - the trajectory scan channels of one PMAC
//! - [`PmacController`] - the controller itself, owning the two above
//!
//! A hardware backend implements these over its channel layer; the
//! [`mock`](crate::hardware::mock) backend implements them in memory.
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Returns [`ScanResult`] so that timeouts and failure statuses keep their kind
//! - Maps one method to one channel (or one trigger)
//!
//! # Example
//!
//! ```rust,ignore
//! async fn describe(pmac: &dyn PmacController) -> ScanResult<()> {
//!     for motor in pmac.motors() {
//!         let cs = motor.cs().await?;
//!         println!("{} -> {}:{}", motor.scannable_name().await?, cs.port, cs.axis);
//!     }
//!     println!("servo at {} Hz", pmac.servo_frequency().await?);
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{ScanError, ScanResult};
use crate::pmac::consts::SERVO_CLOCK;
use crate::pmac::cs_axes::CsAxis;
use crate::pmac::motor_info::MotorCs;

/// Capability: Motor Record
///
/// # Contract
/// - Positions are in user units (`units`), the same units as scan points
/// - `set_setpoint` starts a move and resolves once the demand is accepted
/// - `cs` reports the coordinate system port and axis letter the motor is
///   assigned to; an unassigned motor reports an empty or non-letter axis
#[async_trait]
pub trait MotorChannel: Send + Sync {
    /// Name of the scan axis this motor drives.
    async fn scannable_name(&self) -> ScanResult<String>;

    /// Current readback position.
    async fn position(&self) -> ScanResult<f64>;

    /// Demand a new position.
    async fn set_setpoint(&self, demand: f64) -> ScanResult<()>;

    /// Velocity limit in units per second.
    async fn max_velocity(&self) -> ScanResult<f64>;

    /// Time to reach `max_velocity` from rest, in seconds.
    async fn acceleration_time(&self) -> ScanResult<f64>;

    /// User units per encoder count.
    async fn resolution(&self) -> ScanResult<f64>;

    /// User offset in user units.
    async fn offset(&self) -> ScanResult<f64>;

    /// Engineering units of the motor.
    async fn units(&self) -> ScanResult<String>;

    /// Coordinate system assignment.
    async fn cs(&self) -> ScanResult<MotorCs>;

    /// Reassign the motor to another coordinate system axis.
    async fn set_cs(&self, cs: MotorCs) -> ScanResult<()>;
}

/// Trigger channels of the trajectory program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProfileAction {
    /// Start a new trajectory from the written arrays.
    Build,
    /// Add the written arrays to the current trajectory.
    Append,
    /// Run the trajectory.
    Execute,
}

impl ProfileAction {
    /// Value written to the trigger channel.
    pub fn as_str(self) -> &'static str {
        match self {
            ProfileAction::Build => "Build",
            ProfileAction::Append => "Append",
            ProfileAction::Execute => "Execute",
        }
    }
}

/// Status readback of the last build or append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionStatus {
    /// Nothing has been requested yet.
    Idle,
    /// Accepted by the trajectory program.
    Success,
    /// Rejected, with the controller's message.
    Failure(String),
}

/// Execution state readback of the trajectory program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionState {
    /// Not running.
    Idle,
    /// Moving through the buffer.
    Executing,
    /// Reached the end of the buffer.
    Done,
    /// Stopped by an abort.
    Aborted,
    /// Stopped by an error, with the controller's message.
    Failed(String),
}

/// Capability: Trajectory Buffer
///
/// # Contract
/// - Array writes only stage data; nothing reaches the trajectory program
///   until [`trigger`](TrajectoryBuffer::trigger) is called with `Build` or `Append`
/// - `trigger` resolves when the controller acknowledges the action;
///   [`action_status`](TrajectoryBuffer::action_status) tells whether it was accepted
/// - `points_scanned` counts buffer segments completed since the last build
#[async_trait]
pub trait TrajectoryBuffer: Send + Sync {
    /// Version of the trajectory program loaded on the controller.
    async fn program_version(&self) -> ScanResult<f64>;

    /// Buffer capacity for the next build.
    async fn set_max_points(&self, max_points: u32) -> ScanResult<()>;

    /// Coordinate system the next build runs in.
    async fn set_cs_port(&self, port: &str) -> ScanResult<()>;

    /// Number of segments in the staged arrays.
    async fn set_num_points_to_build(&self, num_points: usize) -> ScanResult<()>;

    /// Segment durations in ticks.
    async fn write_time_array(&self, ticks: &[u32]) -> ScanResult<()>;

    /// Velocity mode code per segment.
    async fn write_velocity_mode(&self, modes: &[i32]) -> ScanResult<()>;

    /// User program code per segment.
    async fn write_user_programs(&self, programs: &[i32]) -> ScanResult<()>;

    /// `(use, positions)` pair of one CS axis; `None` clears `use`.
    async fn write_axis(&self, axis: CsAxis, positions: Option<&[f64]>) -> ScanResult<()>;

    /// Fire a trigger channel and wait for the acknowledgment.
    async fn trigger(&self, action: ProfileAction) -> ScanResult<()>;

    /// Stop the running trajectory.
    async fn abort(&self) -> ScanResult<()>;

    /// Outcome of the last `Build` or `Append`.
    async fn action_status(&self, action: ProfileAction) -> ScanResult<ActionStatus>;

    /// Current execution state.
    async fn execution_state(&self) -> ScanResult<ExecutionState>;

    /// Segments completed since the last build.
    async fn points_scanned(&self) -> ScanResult<usize>;
}

/// Capability: PMAC Controller
#[async_trait]
pub trait PmacController: Send + Sync {
    /// Trajectory channels of the controller.
    fn trajectory(&self) -> Arc<dyn TrajectoryBuffer>;

    /// Every motor record attached to the controller.
    fn motors(&self) -> Vec<Arc<dyn MotorChannel>>;

    /// Servo clock divider (I10).
    async fn i10(&self) -> ScanResult<f64>;

    /// Servo loop frequency in Hz, derived from I10.
    async fn servo_frequency(&self) -> ScanResult<f64> {
        let i10 = self.i10().await?;
        if !(i10.is_finite() && i10 > 0.0) {
            return Err(ScanError::Hardware(format!("invalid I10 readback {i10}")));
        }
        Ok(SERVO_CLOCK / i10)
    }
}
