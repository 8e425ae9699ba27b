//! End-to-end scans against the mock controller.

mod common;

use std::sync::Arc;

use common::{fast_settings, grid_pmac, snake_grid, snake_grid_with_jump};
use rust_flyscan::hardware::mock::{MockMotor, MockPmac, MockTrajectory, NOMINAL_I10};
use rust_flyscan::pmac::consts::PROFILE_POINTS;
use rust_flyscan::pmac::{MotionTrigger, MotorCs, ScanController, ScanState};
use rust_flyscan::scan::{CompoundGenerator, Dimension, StaticGenerator, TrajectoryModel};
use rust_flyscan::ScanError;

fn milestones(calls: &[String]) -> Vec<&str> {
    calls
        .iter()
        .map(String::as_str)
        .filter(|c| c.starts_with("trigger:") || c.starts_with("set_setpoint:") || *c == "abort")
        .collect()
}

#[tokio::test]
async fn test_grid_scan_runs_to_completion() {
    let pmac = grid_pmac(NOMINAL_I10, 1000);
    let mut controller = ScanController::new(pmac.clone(), fast_settings(MotionTrigger::EveryPoint));
    let summary = controller.scan_points(snake_grid(32, 16, 0.01)).await.unwrap();

    assert_eq!(summary.completed_steps, 512);
    assert!(!summary.revised);
    assert_eq!(summary.cs_port.as_deref(), Some("CS1"));
    assert_eq!(summary.chunks, 1);
    assert_eq!(controller.state(), ScanState::Complete);

    let buffer = pmac.trajectory_mock().buffer();
    assert_eq!(buffer.time_array.len(), summary.segments);
    assert_eq!(buffer.builds, 2);
    assert_eq!(buffer.executes, 2);
    assert_eq!(buffer.appends, 0);
    // every point is 2 x 5000 ticks
    assert_eq!(buffer.time_array[1], 5000);
}

#[tokio::test]
async fn test_hardware_access_order() {
    let pmac = grid_pmac(NOMINAL_I10, 1000);
    let mut controller = ScanController::new(pmac.clone(), fast_settings(MotionTrigger::EveryPoint));
    controller.scan_points(snake_grid(4, 2, 0.1)).await.unwrap();

    let calls = pmac.calls();
    assert_eq!(calls.first().map(String::as_str), Some("i10"));
    assert_eq!(
        milestones(&calls),
        vec![
            "trigger:Build",
            "trigger:Execute",
            "set_setpoint:x",
            "set_setpoint:y",
            "trigger:Build",
            "trigger:Execute",
        ]
    );
}

#[tokio::test]
async fn test_axes_move_to_run_up_start() {
    let pmac = grid_pmac(NOMINAL_I10, 1000);
    let mut controller = ScanController::new(pmac.clone(), fast_settings(MotionTrigger::EveryPoint));
    let model = snake_grid(4, 2, 0.1);
    assert!(controller.validate_trajectory_scan(&model).await.unwrap().is_none());
    controller.configure_pmac_for_scan(model).await.unwrap();
    assert_eq!(controller.state(), ScanState::Building);

    // x: lower bound -0.005 less a 0.1 mm/s ramp over 1 ms
    let x = pmac.motor_mock("x").unwrap().peek_position().await;
    assert!((x - (-0.005 - 0.00005)).abs() < 1e-12);
    let y = pmac.motor_mock("y").unwrap().peek_position().await;
    assert_eq!(y, 0.0);
}

#[tokio::test]
async fn test_unmapped_axis_is_rejected_before_any_write() {
    let pmac = Arc::new(
        MockPmac::new().with_motor(|log| MockMotor::new("x", MotorCs::new("CS1", "X"), 10.0, 0.1).with_log(log)),
    );
    let mut controller = ScanController::new(pmac.clone(), fast_settings(MotionTrigger::EveryPoint));
    // the grid moves x and y; only x has a motor
    let err = controller.scan_points(snake_grid(4, 2, 0.1)).await.unwrap_err();
    assert!(matches!(err, ScanError::Validation(ref m) if m.contains("\"y\"")));
    assert!(err.is_request_error());
    assert!(milestones(&pmac.calls()).is_empty());
    assert_eq!(controller.state(), ScanState::Validated);
}

#[tokio::test]
async fn test_firmware_mismatch_leaves_buffer_untouched() {
    let pmac = Arc::new(
        MockPmac::new()
            .with_trajectory(|log| MockTrajectory::new().with_program_version(1.0).with_log(log))
            .with_motor(|log| MockMotor::new("x", MotorCs::new("CS1", "X"), 10.0, 0.1).with_log(log))
            .with_motor(|log| MockMotor::new("y", MotorCs::new("CS1", "Y"), 10.0, 0.1).with_log(log)),
    );
    let mut controller = ScanController::new(pmac.clone(), fast_settings(MotionTrigger::EveryPoint));
    let err = controller.scan_points(snake_grid(4, 2, 0.1)).await.unwrap_err();

    assert!(matches!(err, ScanError::FirmwareMismatch { found, expected } if found == 1.0 && expected == 2.0));
    assert!(milestones(&pmac.calls()).is_empty());
    assert_eq!(pmac.trajectory_mock().buffer().builds, 0);
}

#[tokio::test]
async fn test_point_too_fast_is_rejected() {
    let pmac = grid_pmac(NOMINAL_I10, 1000);
    let mut controller = ScanController::new(pmac.clone(), fast_settings(MotionTrigger::EveryPoint));
    // 0.01 mm per point in well under 1 ms
    let err = controller.scan_points(snake_grid(4, 2, 0.001)).await.unwrap_err();
    assert!(matches!(err, ScanError::Kinematic { ref axis, .. } if axis == "x"));
    assert!(milestones(&pmac.calls()).is_empty());
}

#[tokio::test]
async fn test_fast_point_in_later_chunk_is_rejected_before_writes() {
    let pmac = grid_pmac(NOMINAL_I10, 1000);
    let mut controller = ScanController::new(pmac.clone(), fast_settings(MotionTrigger::EveryPoint));
    // 120 x 50 needs more than one chunk; point 5900 sits in the last row
    let model = snake_grid_with_jump(120, 50, 0.01, 5900, 5.0);
    let err = controller.scan_points(model).await.unwrap_err();

    assert!(matches!(err, ScanError::Kinematic { ref axis, .. } if axis == "x"));
    assert!(!pmac.calls().iter().any(|c| c.starts_with("trigger:")));
    let buffer = pmac.trajectory_mock().buffer();
    assert_eq!(buffer.builds, 0);
    assert_eq!(buffer.executes, 0);
    assert_eq!(controller.state(), ScanState::Validated);
}

#[tokio::test]
async fn test_off_nominal_servo_revises_duration() {
    let pmac = grid_pmac(3_000_000.0, 1000);
    let mut controller = ScanController::new(pmac.clone(), fast_settings(MotionTrigger::EveryPoint));
    let summary = controller.scan_points(snake_grid(4, 2, 0.1)).await.unwrap();

    assert!(summary.revised);
    assert!((summary.duration - 0.099422).abs() < 1e-12);
    // half point of 49711 us
    assert_eq!(pmac.trajectory_mock().buffer().time_array[1], 49711);
}

#[tokio::test]
async fn test_long_scan_is_streamed_in_chunks() {
    let pmac = grid_pmac(NOMINAL_I10, 2000);
    let mut controller = ScanController::new(pmac.clone(), fast_settings(MotionTrigger::EveryPoint));
    let summary = controller.scan_points(snake_grid(120, 50, 0.01)).await.unwrap();

    assert_eq!(summary.completed_steps, 6000);
    assert!(summary.chunks >= 2);
    let buffer = pmac.trajectory_mock().buffer();
    assert_eq!(buffer.appends, summary.chunks - 1);
    assert_eq!(buffer.time_array.len(), summary.segments);
    assert!(summary.segments > PROFILE_POINTS);
}

#[tokio::test]
async fn test_failed_execution_reports_and_aborts() {
    let pmac = grid_pmac(NOMINAL_I10, 1);
    let mut controller = ScanController::new(pmac.clone(), fast_settings(MotionTrigger::EveryPoint));
    let model = snake_grid(4, 2, 0.1);
    controller.validate_trajectory_scan(&model).await.unwrap();
    controller.configure_pmac_for_scan(model).await.unwrap();
    controller.execute().await.unwrap();
    assert_eq!(controller.state(), ScanState::Executing);

    pmac.trajectory_mock().fail_execution("following error on X");
    let err = controller.run_to_completion().await.unwrap_err();
    assert!(matches!(err, ScanError::Hardware(ref m) if m.contains("following error")));
    assert_eq!(controller.state(), ScanState::Executing);

    controller.abort().await.unwrap();
    assert_eq!(controller.state(), ScanState::Aborted);
    assert_eq!(pmac.trajectory_mock().buffer().aborts, 1);
    assert!(controller.abort().await.is_err());
    controller.reset().unwrap();
    assert_eq!(controller.state(), ScanState::Init);
}

#[tokio::test]
async fn test_progress_maps_segments_to_steps() {
    let pmac = grid_pmac(NOMINAL_I10, 1);
    let mut controller = ScanController::new(pmac.clone(), fast_settings(MotionTrigger::EveryPoint));
    let model = snake_grid(4, 1, 0.1);
    controller.validate_trajectory_scan(&model).await.unwrap();
    controller.configure_pmac_for_scan(model).await.unwrap();
    controller.execute().await.unwrap();

    // run-up, then a midpoint and an upper bound per point
    assert_eq!(controller.update_step(0).await.unwrap(), 0);
    assert_eq!(controller.update_step(1).await.unwrap(), 0);
    assert_eq!(controller.update_step(3).await.unwrap(), 1);
    assert_eq!(controller.update_step(8).await.unwrap(), 3);
    assert_eq!(controller.update_step(9).await.unwrap(), 4);
    assert_eq!(controller.completed_steps(), 4);
    assert_eq!(
        controller.completed_steps_lookup(),
        &[0, 0, 1, 1, 2, 2, 3, 3, 4, 4]
    );
}

#[tokio::test]
async fn test_operations_out_of_order_are_rejected() {
    let pmac = grid_pmac(NOMINAL_I10, 1000);
    let mut controller = ScanController::new(pmac, fast_settings(MotionTrigger::EveryPoint));
    let model = snake_grid(4, 2, 0.1);

    let err = controller.configure_pmac_for_scan(model.clone()).await.unwrap_err();
    assert!(matches!(err, ScanError::InvalidState { ref state, .. } if state == "init"));
    assert!(controller.update_step(1).await.is_err());
    assert!(controller.run_to_completion().await.is_err());

    controller.scan_points(model.clone()).await.unwrap();
    let err = controller.validate_trajectory_scan(&model).await.unwrap_err();
    assert!(matches!(err, ScanError::InvalidState { ref action, .. } if action == "validate"));
}

#[tokio::test]
async fn test_static_scan_without_triggers_needs_no_trajectory() {
    let pmac = grid_pmac(NOMINAL_I10, 1000);
    let mut controller = ScanController::new(pmac.clone(), fast_settings(MotionTrigger::None));
    let model = TrajectoryModel::all_steps(Box::new(CompoundGenerator::new(
        vec![Dimension::Static(StaticGenerator::new(5))],
        0.1,
    )));
    let summary = controller.scan_points(model).await.unwrap();

    assert_eq!(summary.cs_port, None);
    assert_eq!(summary.chunks, 0);
    assert_eq!(controller.state(), ScanState::Complete);
    assert!(milestones(&pmac.calls()).is_empty());
}

#[tokio::test]
async fn test_static_scan_with_triggers_uses_motor_cs() {
    let pmac = grid_pmac(NOMINAL_I10, 1000);
    let mut controller = ScanController::new(pmac.clone(), fast_settings(MotionTrigger::EveryPoint));
    let model = TrajectoryModel::all_steps(Box::new(CompoundGenerator::new(
        vec![Dimension::Static(StaticGenerator::new(3))],
        0.1,
    )));
    let summary = controller.scan_points(model).await.unwrap();

    assert_eq!(summary.cs_port.as_deref(), Some("CS1"));
    assert_eq!(summary.completed_steps, 3);
    // run-up, three joined pairs, tail-off
    assert_eq!(summary.segments, 8);
    let buffer = pmac.trajectory_mock().buffer();
    assert_eq!(buffer.time_array.len(), 8);
    assert!(buffer.axes.used().next().is_none());
}

#[test]
fn test_validation_outside_async_context() {
    let pmac = grid_pmac(NOMINAL_I10, 1000);
    let mut controller = ScanController::new(pmac, fast_settings(MotionTrigger::EveryPoint));
    let revised = tokio_test::block_on(controller.validate_trajectory_scan(&snake_grid(4, 2, 0.1)));
    assert!(revised.unwrap().is_none());
}
