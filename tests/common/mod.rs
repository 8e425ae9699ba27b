//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use rust_flyscan::hardware::mock::{MockMotor, MockPmac, MockTrajectory};
use rust_flyscan::pmac::{MotionTrigger, MotorCs, ScanSettings};
use rust_flyscan::scan::{
    AxisGroup, CompoundGenerator, Dimension, LineGenerator, Point, PointGenerator, TrajectoryModel,
};

/// Spacing between neighbouring grid points along both axes.
pub const GRID_STEP: f64 = 0.01;

/// Snake grid: `rows` lines along y, `columns` points along x, `duration`
/// seconds per point.
pub fn snake_grid(columns: usize, rows: usize, duration: f64) -> TrajectoryModel {
    TrajectoryModel::all_steps(Box::new(snake_generator(columns, rows, duration)))
}

fn snake_generator(columns: usize, rows: usize, duration: f64) -> CompoundGenerator {
    snake_generator_over(
        GRID_STEP * (columns as f64 - 1.0),
        GRID_STEP * (rows as f64 - 1.0),
        columns,
        rows,
        duration,
    )
}

fn snake_generator_over(
    width: f64,
    height: f64,
    columns: usize,
    rows: usize,
    duration: f64,
) -> CompoundGenerator {
    CompoundGenerator::new(
        vec![
            Dimension::Line(LineGenerator::new("y", "mm", 0.0, height, rows)),
            Dimension::Line(LineGenerator::new("x", "mm", 0.0, width, columns).with_alternate(true)),
        ],
        duration,
    )
}

/// Snake grid spanning `width` along x and `height` along y.
pub fn snake_grid_over(
    width: f64,
    height: f64,
    columns: usize,
    rows: usize,
    duration: f64,
) -> TrajectoryModel {
    TrajectoryModel::all_steps(Box::new(snake_generator_over(
        width, height, columns, rows, duration,
    )))
}

/// Wraps a generator and makes x jump by `jump` across one point.
#[derive(Debug)]
pub struct JumpGenerator {
    inner: Box<dyn PointGenerator>,
    index: usize,
    jump: f64,
}

impl PointGenerator for JumpGenerator {
    fn prepare(&mut self) {
        self.inner.prepare();
    }

    fn size(&self) -> usize {
        self.inner.size()
    }

    fn duration(&self) -> f64 {
        self.inner.duration()
    }

    fn with_duration(&self, duration: f64) -> Box<dyn PointGenerator> {
        Box::new(JumpGenerator {
            inner: self.inner.with_duration(duration),
            index: self.index,
            jump: self.jump,
        })
    }

    fn axis_groups(&self) -> Vec<AxisGroup> {
        self.inner.axis_groups()
    }

    fn get_point(&self, index: usize) -> Option<Point> {
        let mut point = self.inner.get_point(index)?;
        if index == self.index {
            *point.positions.get_mut("x")? += self.jump / 2.0;
            *point.upper.get_mut("x")? += self.jump;
        }
        Some(point)
    }
}

/// Snake grid whose point `index` moves x by an extra `jump`.
pub fn snake_grid_with_jump(
    columns: usize,
    rows: usize,
    duration: f64,
    index: usize,
    jump: f64,
) -> TrajectoryModel {
    TrajectoryModel::all_steps(Box::new(JumpGenerator {
        inner: Box::new(snake_generator(columns, rows, duration)),
        index,
        jump,
    }))
}

/// Controller with x and y motors on CS1, 10 mm/s, 0.1 s acceleration.
pub fn grid_pmac(i10: f64, points_per_poll: usize) -> Arc<MockPmac> {
    grid_pmac_with_velocity(i10, points_per_poll, 10.0)
}

/// Controller with x and y motors on CS1 limited to `max_velocity`.
pub fn grid_pmac_with_velocity(i10: f64, points_per_poll: usize, max_velocity: f64) -> Arc<MockPmac> {
    Arc::new(
        MockPmac::new()
            .with_i10(i10)
            .with_trajectory(|log| {
                MockTrajectory::new()
                    .with_points_per_poll(points_per_poll)
                    .with_log(log)
            })
            .with_motor(|log| {
                MockMotor::new("x", MotorCs::new("CS1", "X"), max_velocity, 0.1)
                    .with_position(5.0)
                    .with_log(log)
            })
            .with_motor(|log| {
                MockMotor::new("y", MotorCs::new("CS1", "Y"), max_velocity, 0.1).with_log(log)
            }),
    )
}

/// Settings that poll quickly.
pub fn fast_settings(output_triggers: MotionTrigger) -> ScanSettings {
    ScanSettings {
        output_triggers,
        poll_interval: Duration::from_millis(1),
        ..ScanSettings::default()
    }
}
