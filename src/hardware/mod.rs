//! Controller channel abstraction
//!
//! [`capabilities`] defines the async traits the scan controller drives;
//! [`mock`] implements them in memory for the binary and the tests.

pub mod capabilities;
pub mod mock;

pub use capabilities::{
    ActionStatus, ExecutionState, MotorChannel, PmacController, ProfileAction, TrajectoryBuffer,
};
pub use mock::{MockMotor, MockPmac, MockTrajectory};
