//! Writing profiles to the trajectory buffer.
//!
//! A write is a batch: every staged array is written concurrently and all of
//! them must be acknowledged before the build or append is triggered. Each
//! channel operation is bounded by [`IoSettings::timeout`].

use std::future::Future;
use std::time::Duration;

use futures::future::{try_join_all, BoxFuture, FutureExt};
use tracing::{debug, info, instrument};

use crate::error::{ScanError, ScanResult};
use crate::hardware::capabilities::{ActionStatus, ProfileAction, TrajectoryBuffer};
use crate::pmac::consts::{is_close, MAX_NUM_POINTS, TRAJECTORY_PROGRAM_NUM};
use crate::pmac::cs_axes::CsAxis;
use crate::pmac::profile::{PmacTrajectoryProfile, TickQuantizer};

/// Channel I/O bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoSettings {
    /// Longest any single channel read, write or trigger may take.
    pub timeout: Duration,
}

impl Default for IoSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
        }
    }
}

/// Run `future`, failing with `HardwareTimeout` if it takes longer than the
/// configured bound.
pub(crate) async fn bounded<T, F>(operation: &str, io: IoSettings, future: F) -> ScanResult<T>
where
    F: Future<Output = ScanResult<T>>,
{
    match tokio::time::timeout(io.timeout, future).await {
        Ok(result) => result,
        Err(_) => Err(ScanError::HardwareTimeout {
            operation: operation.to_string(),
            timeout: io.timeout,
        }),
    }
}

/// Fail unless the loaded trajectory program is the supported version.
pub async fn check_program_version(
    trajectory: &dyn TrajectoryBuffer,
    io: IoSettings,
) -> ScanResult<()> {
    let found = bounded("read program version", io, trajectory.program_version()).await?;
    if !is_close(found, TRAJECTORY_PROGRAM_NUM) {
        return Err(ScanError::FirmwareMismatch {
            found,
            expected: TRAJECTORY_PROGRAM_NUM,
        });
    }
    Ok(())
}

/// Write `profile` and trigger a build (when `cs_port` is given) or an append.
///
/// Durations are converted to ticks with `quantizer`, whose remainder carries
/// into the next write of the same scan.
///
/// # Errors
///
/// `Validation` for inconsistent arrays and `FirmwareMismatch` for the wrong
/// program version, both before anything is written; `HardwareTimeout` if a
/// channel does not answer; `Hardware` if the controller rejects the action.
#[instrument(skip_all, fields(segments = profile.len(), build = cs_port.is_some()))]
pub async fn write_profile(
    trajectory: &dyn TrajectoryBuffer,
    profile: &PmacTrajectoryProfile,
    quantizer: &mut TickQuantizer,
    cs_port: Option<&str>,
    io: IoSettings,
) -> ScanResult<()> {
    // convert on a copy so a rejected write leaves the carried remainder alone
    let mut staged = quantizer.clone();
    let ticks = profile.with_ticks(&mut staged)?;
    check_program_version(trajectory, io).await?;

    let action = match cs_port {
        Some(port) => {
            bounded("set max points", io, trajectory.set_max_points(MAX_NUM_POINTS)).await?;
            bounded("set CS port", io, trajectory.set_cs_port(port)).await?;
            ProfileAction::Build
        }
        None => ProfileAction::Append,
    };

    let velocity_modes = ticks.velocity_mode_codes();
    let user_programs = ticks.user_program_codes();
    let mut writes: Vec<BoxFuture<'_, ScanResult<()>>> = vec![
        bounded(
            "write num points",
            io,
            trajectory.set_num_points_to_build(ticks.len()),
        )
        .boxed(),
        bounded("write time array", io, trajectory.write_time_array(&ticks.time_array)).boxed(),
        bounded(
            "write velocity mode",
            io,
            trajectory.write_velocity_mode(&velocity_modes),
        )
        .boxed(),
        bounded(
            "write user programs",
            io,
            trajectory.write_user_programs(&user_programs),
        )
        .boxed(),
    ];
    for axis in CsAxis::ALL {
        writes.push(
            bounded(
                "write axis positions",
                io,
                trajectory.write_axis(axis, ticks.axis_positions(axis)),
            )
            .boxed(),
        );
    }
    try_join_all(writes).await?;
    debug!(action = action.as_str(), "arrays written");

    bounded(action.as_str(), io, trajectory.trigger(action)).await?;
    match bounded("read action status", io, trajectory.action_status(action)).await? {
        ActionStatus::Failure(message) => {
            return Err(ScanError::Hardware(format!(
                "{} rejected: {message}",
                action.as_str()
            )))
        }
        ActionStatus::Idle | ActionStatus::Success => {}
    }
    *quantizer = staged;
    info!(action = action.as_str(), segments = ticks.len(), "profile written");
    Ok(())
}

/// Start running the built trajectory.
pub async fn execute_profile(trajectory: &dyn TrajectoryBuffer, io: IoSettings) -> ScanResult<()> {
    bounded("Execute", io, trajectory.trigger(ProfileAction::Execute)).await?;
    info!("trajectory executing");
    Ok(())
}

/// Stop the running trajectory.
pub async fn abort_profile(trajectory: &dyn TrajectoryBuffer, io: IoSettings) -> ScanResult<()> {
    bounded("Abort", io, trajectory.abort()).await?;
    info!("trajectory aborted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::MockTrajectory;
    use crate::pmac::modes::UserProgram;

    fn profile() -> PmacTrajectoryProfile {
        let mut profile = PmacTrajectoryProfile {
            time_array: vec![0.1, 0.2],
            ..Default::default()
        };
        profile.axes[CsAxis::Z] = vec![1.0, 2.0];
        profile
    }

    #[tokio::test]
    async fn test_build_writes_everything() {
        let trajectory = MockTrajectory::new();
        let mut quantizer = TickQuantizer::new();
        write_profile(&trajectory, &profile(), &mut quantizer, Some("CS1"), IoSettings::default())
            .await
            .unwrap();
        let buffer = trajectory.buffer();
        assert_eq!(buffer.cs_port.as_deref(), Some("CS1"));
        assert_eq!(buffer.max_points, MAX_NUM_POINTS);
        assert_eq!(buffer.time_array, vec![100_000, 200_000]);
        assert_eq!(buffer.axes[CsAxis::Z], vec![1.0, 2.0]);
        assert!(buffer.axes[CsAxis::A].is_empty());
        assert_eq!(buffer.builds, 1);
    }

    #[tokio::test]
    async fn test_append_extends_buffer() {
        let trajectory = MockTrajectory::new();
        let mut quantizer = TickQuantizer::new();
        let io = IoSettings::default();
        write_profile(&trajectory, &profile(), &mut quantizer, Some("CS1"), io)
            .await
            .unwrap();
        write_profile(&trajectory, &profile(), &mut quantizer, None, io)
            .await
            .unwrap();
        let buffer = trajectory.buffer();
        assert_eq!(buffer.time_array.len(), 4);
        assert_eq!(buffer.appends, 1);
        assert_eq!(buffer.user_programs, vec![UserProgram::NoProgram.code(); 4]);
    }

    #[tokio::test]
    async fn test_firmware_mismatch_writes_nothing() {
        let trajectory = MockTrajectory::new().with_program_version(1.0);
        let mut quantizer = TickQuantizer::new();
        let err = write_profile(&trajectory, &profile(), &mut quantizer, Some("CS1"), IoSettings::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::FirmwareMismatch { found, .. } if found == 1.0));
        assert!(trajectory.calls().iter().all(|c| c == "program_version"));
        assert!(trajectory.buffer().time_array.is_empty());
    }

    #[tokio::test]
    async fn test_rejected_build_is_hardware_error() {
        let trajectory = MockTrajectory::new().with_build_failure("bad arrays");
        let mut quantizer = TickQuantizer::new();
        let err = write_profile(&trajectory, &profile(), &mut quantizer, Some("CS1"), IoSettings::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::Hardware(ref m) if m.contains("bad arrays")));
    }

    #[tokio::test]
    async fn test_slow_channel_times_out() {
        let trajectory = MockTrajectory::new().with_latency(Duration::from_millis(200));
        let io = IoSettings {
            timeout: Duration::from_millis(20),
        };
        let err = check_program_version(&trajectory, io).await.unwrap_err();
        assert!(matches!(err, ScanError::HardwareTimeout { .. }));
    }
}
