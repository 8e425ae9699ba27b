//! Per-axis kinematics snapshot.
//!
//! A [`MotorInfo`] is read once from the motor record when a scan is
//! configured and is not refreshed while the scan runs. All of the ramp
//! arithmetic used by the compiler lives here.

use serde::{Deserialize, Serialize};

use crate::error::{ScanError, ScanResult};
use crate::hardware::capabilities::MotorChannel;
use crate::pmac::cs_axes::CsAxis;
use crate::pmac::velocity_profile::{ProfileRequest, VelocityProfile};

/// Coordinate system assignment as reported by a motor record.
///
/// `axis` is kept as the raw readback; motors outside any coordinate system
/// report something that is not one of the nine axis letters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotorCs {
    /// Port of the coordinate system, e.g. `CS1`.
    pub port: String,
    /// Axis letter inside the coordinate system.
    pub axis: String,
}

impl MotorCs {
    /// Create a CS assignment.
    pub fn new(port: impl Into<String>, axis: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            axis: axis.into(),
        }
    }

    /// Parsed axis letter.
    pub fn cs_axis(&self) -> ScanResult<CsAxis> {
        self.axis.parse()
    }
}

/// Raw motor record values a [`MotorInfo`] is derived from.
#[derive(Debug, Clone, PartialEq)]
pub struct MotorParameters {
    /// Scan axis name.
    pub scannable: String,
    /// Velocity limit.
    pub max_velocity: f64,
    /// Time from rest to `max_velocity`.
    pub acceleration_time: f64,
    /// User units per encoder count.
    pub resolution: f64,
    /// User offset.
    pub offset: f64,
    /// Readback position at snapshot time.
    pub current_position: f64,
    /// Engineering units.
    pub units: String,
}

/// Kinematic snapshot of one motor in a coordinate system.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotorInfo {
    pub cs_port: String,
    pub cs_axis: CsAxis,
    pub acceleration: f64,
    pub resolution: f64,
    pub offset: f64,
    pub max_velocity: f64,
    pub current_position: f64,
    pub scannable: String,
    pub velocity_settle: f64,
    pub units: String,
}

impl MotorInfo {
    /// Build a snapshot, validating the CS assignment and the limits.
    pub fn new(cs: &MotorCs, params: MotorParameters) -> ScanResult<Self> {
        let cs_axis = cs.cs_axis().map_err(|_| {
            ScanError::validation(format!(
                "motor for '{}' is on CS axis '{}', expected one of ABCUVWXYZ",
                params.scannable, cs.axis
            ))
        })?;
        if !(params.max_velocity.is_finite() && params.max_velocity > 0.0) {
            return Err(ScanError::validation(format!(
                "motor for '{}' has max_velocity {}",
                params.scannable, params.max_velocity
            )));
        }
        if !(params.acceleration_time.is_finite() && params.acceleration_time > 0.0) {
            return Err(ScanError::validation(format!(
                "motor for '{}' has acceleration_time {}",
                params.scannable, params.acceleration_time
            )));
        }
        Ok(Self {
            cs_port: cs.port.clone(),
            cs_axis,
            acceleration: params.max_velocity / params.acceleration_time,
            resolution: params.resolution,
            offset: params.offset,
            max_velocity: params.max_velocity,
            current_position: params.current_position,
            scannable: params.scannable,
            velocity_settle: 0.0,
            units: params.units,
        })
    }

    /// Time to change velocity from `v1` to `v2`.
    pub fn acceleration_time(&self, v1: f64, v2: f64) -> f64 {
        (v2 - v1).abs() / self.acceleration
    }

    /// Distance covered ramping from `v1` to `v2` over `ramp_time`
    /// (defaults to the acceleration time).
    pub fn ramp_distance(&self, v1: f64, v2: f64, ramp_time: Option<f64>) -> f64 {
        let ramp_time = ramp_time.unwrap_or_else(|| self.acceleration_time(v1, v2));
        (v1 + v2) * ramp_time / 2.0
    }

    /// Convert a position in user units to encoder counts.
    pub fn in_cts(&self, position: f64) -> i64 {
        ((position - self.offset) / self.resolution).round() as i64
    }

    /// Fail if `velocity` is at or above the limit of this axis.
    pub fn check_velocity(&self, velocity: f64) -> ScanResult<()> {
        if velocity.abs() >= self.max_velocity {
            return Err(ScanError::Kinematic {
                axis: self.scannable.clone(),
                velocity,
                limit: self.max_velocity,
            });
        }
        Ok(())
    }

    /// Solve a velocity profile moving this axis by `distance`.
    pub fn make_velocity_profile(
        &self,
        v1: f64,
        v2: f64,
        distance: f64,
        min_time: f64,
        min_interval: f64,
    ) -> ScanResult<VelocityProfile> {
        for v in [v1, v2] {
            if v.abs() > self.max_velocity {
                return Err(ScanError::Kinematic {
                    axis: self.scannable.clone(),
                    velocity: v,
                    limit: self.max_velocity,
                });
            }
        }
        VelocityProfile::solve(ProfileRequest {
            v1,
            v2,
            distance,
            min_time,
            acceleration: self.acceleration,
            max_velocity: self.max_velocity,
            velocity_settle: self.velocity_settle,
            min_interval,
        })
        .map_err(|e| match e {
            ScanError::Convergence(msg) => {
                ScanError::Convergence(format!("axis '{}': {msg}", self.scannable))
            }
            other => other,
        })
    }
}

/// Read every kinematic channel of `motor` concurrently.
pub async fn motor_info(
    cs: &MotorCs,
    scannable: String,
    motor: &dyn MotorChannel,
) -> ScanResult<MotorInfo> {
    let (max_velocity, acceleration_time, resolution, offset, current_position, units) = tokio::try_join!(
        motor.max_velocity(),
        motor.acceleration_time(),
        motor.resolution(),
        motor.offset(),
        motor.position(),
        motor.units(),
    )?;
    MotorInfo::new(
        cs,
        MotorParameters {
            scannable,
            max_velocity,
            acceleration_time,
            resolution,
            offset,
            current_position,
            units,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> MotorInfo {
        MotorInfo::new(
            &MotorCs::new("CS1", "X"),
            MotorParameters {
                scannable: "x".into(),
                max_velocity: 10.0,
                acceleration_time: 0.5,
                resolution: 0.001,
                offset: 1.0,
                current_position: 0.0,
                units: "mm".into(),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_acceleration_from_limits() {
        let m = info();
        assert_eq!(m.acceleration, 20.0);
        assert_eq!(m.cs_axis, CsAxis::X);
        assert_eq!(m.velocity_settle, 0.0);
    }

    #[test]
    fn test_ramp_math() {
        let m = info();
        assert_eq!(m.acceleration_time(0.0, 10.0), 0.5);
        assert_eq!(m.acceleration_time(4.0, -6.0), 0.5);
        assert_eq!(m.ramp_distance(0.0, 10.0, None), 2.5);
        assert_eq!(m.ramp_distance(2.0, 4.0, Some(1.0)), 3.0);
    }

    #[test]
    fn test_in_cts() {
        let m = info();
        assert_eq!(m.in_cts(1.0), 0);
        assert_eq!(m.in_cts(2.5), 1500);
        assert_eq!(m.in_cts(0.9996), 0);
    }

    #[test]
    fn test_invalid_cs_axis_rejected() {
        let err = MotorInfo::new(
            &MotorCs::new("CS1", "I"),
            MotorParameters {
                scannable: "x".into(),
                max_velocity: 1.0,
                acceleration_time: 1.0,
                resolution: 1.0,
                offset: 0.0,
                current_position: 0.0,
                units: "mm".into(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, ScanError::Validation(_)));
    }

    #[test]
    fn test_velocity_limit_is_exclusive() {
        let m = info();
        assert!(m.check_velocity(9.99).is_ok());
        let err = m.check_velocity(-10.0).unwrap_err();
        assert!(err.to_string().contains("'x'"));
    }

    #[test]
    fn test_profile_rejects_fast_end_velocity() {
        let err = info()
            .make_velocity_profile(0.0, 12.0, 1.0, 0.0, 0.002)
            .unwrap_err();
        assert!(matches!(err, ScanError::Kinematic { .. }));
    }
}
