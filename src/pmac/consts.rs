//! Firmware constants shared by the compiler, the profile writer and the
//! controller. Values must match the trajectory program on the PMAC.

/// Minimum duration of any emitted segment, in seconds.
pub const MIN_TIME: f64 = 0.002;

/// Minimum interval between velocity profile breakpoints, in seconds.
pub const MIN_INTERVAL: f64 = 0.002;

/// Resolution of the trajectory time array, in seconds.
pub const TICK_S: f64 = 0.000_001;

/// Longest single segment the trajectory program accepts, in seconds.
pub const MAX_MOVE_TIME: f64 = 4.0;

/// Segments per profile chunk (and lookahead kept queued while executing).
pub const PROFILE_POINTS: usize = 10_000;

/// Trajectory program version this crate writes buffers for.
pub const TRAJECTORY_PROGRAM_NUM: f64 = 2.0;

/// Buffer capacity written on every build.
pub const MAX_NUM_POINTS: u32 = 4_000_000;

/// Servo frequency the duration quantization was calibrated against, in Hz.
pub const NOMINAL_SERVO_FREQUENCY: f64 = 3200.0;

/// Numerator of the PMAC servo frequency formula (`freq = SERVO_CLOCK / I10`).
pub const SERVO_CLOCK: f64 = 8_388_608_000.0;

/// Relative and absolute tolerances used for floating point comparisons.
pub const REL_TOL: f64 = 1e-5;
/// See [`REL_TOL`].
pub const ABS_TOL: f64 = 1e-8;

/// `|a - b| <= ABS_TOL + REL_TOL * |b|`
pub fn is_close(a: f64, b: f64) -> bool {
    (a - b).abs() <= ABS_TOL + REL_TOL * b.abs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_close() {
        assert!(is_close(0.005, 0.005 + 1e-12));
        assert!(is_close(3200.0, 3200.01));
        assert!(!is_close(3200.0, 3210.0));
        assert!(!is_close(0.0, 1e-6));
    }
}
