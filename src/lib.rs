//! Core library for rust_flyscan.
//!
//! Turns a sequence of scan points into a PMAC trajectory profile (segment
//! durations, per-axis positions, velocity modes and trigger programs) and
//! streams it to the controller in bounded chunks while the scan runs.
//!
//! The entry point is [`pmac::ScanController`], which talks to the controller
//! through the traits in [`hardware::capabilities`]. Points come from a
//! [`scan::PointGenerator`].

pub mod config;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod pmac;
pub mod scan;

pub use error::{ScanError, ScanResult};
