//! PMAC trajectory scans
//!
//! Compiles scan points into the per-segment arrays of the PMAC trajectory
//! program and streams them to the controller while it executes.
//!
//! - [`velocity_profile`] - single-axis velocity curves between two states
//! - [`motor_info`] - per-axis kinematics read from the motor records
//! - [`motion_axes`] - which motors drive the scan and in which coordinate system
//! - [`compiler`] - points to segments, in chunks of bounded size
//! - [`profile`] / [`profile_io`] - segment arrays and writing them to the buffer
//! - [`controller`] - the scan state machine

pub mod compiler;
pub mod consts;
pub mod controller;
pub mod cs_axes;
pub mod modes;
pub mod motion_axes;
pub mod motor_info;
pub mod profile;
pub mod profile_io;
pub mod velocity_profile;

pub use compiler::{ProfileChunk, TrajectoryCompiler};
pub use controller::{ScanController, ScanSettings, ScanState, ScanSummary};
pub use cs_axes::{CsAxis, CsAxisArrays};
pub use modes::{MotionTrigger, PointType, UserProgram, VelocityMode};
pub use motion_axes::AxisMapping;
pub use motor_info::{MotorCs, MotorInfo};
pub use profile::{PmacTrajectoryProfile, TickProfile, TickQuantizer};
pub use profile_io::IoSettings;
pub use velocity_profile::{ProfileRequest, VelocityProfile};
