//! Per-segment codes written to the trajectory buffer.
//!
//! `VelocityMode` and `UserProgram` discriminants are the integers the PMAC
//! trajectory program reads, so they must not be renumbered.

use serde::{Deserialize, Serialize};

/// How the controller derives the velocity at the end of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(i32)]
pub enum VelocityMode {
    /// Average of the previous and next segment velocities.
    #[default]
    PrevToNext = 0,
    /// Velocity of the segment ending at this point.
    PrevToCurrent = 1,
    /// Velocity of the segment starting at this point.
    CurrentToNext = 2,
    /// Stop at this point.
    ZeroVelocity = 3,
}

impl VelocityMode {
    /// Integer written to the `velocity_mode` array.
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Trigger program run by the controller when a segment completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(i32)]
pub enum UserProgram {
    /// Leave the outputs as they are.
    #[default]
    NoProgram = 0,
    /// Start of a live frame.
    LiveProgram = 1,
    /// End of the last live frame of a row.
    DeadProgram = 2,
    /// Midpoint of a frame.
    MidProgram = 4,
    /// Drive all outputs low.
    ZeroProgram = 8,
}

impl UserProgram {
    /// Integer written to the `user_programs` array.
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Role of an emitted segment inside the scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointType {
    /// Arrival at the lower bound of the first point of a row.
    StartOfRow,
    /// Arrival at the midpoint of a point.
    MidPoint,
    /// Arrival at the upper bound of a point joined to the next one.
    PointJoin,
    /// Arrival at the upper bound of the last point of a row.
    EndOfRow,
    /// Any segment of a run-up, gap or tail-off.
    Turnaround,
}

/// Which segments should fire detector triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionTrigger {
    /// No triggers at all.
    None,
    /// One gate per row.
    RowGate,
    /// A trigger at every point boundary and midpoint.
    #[default]
    EveryPoint,
}

impl MotionTrigger {
    /// True when points are emitted individually rather than accumulated.
    pub fn every_point(self) -> bool {
        matches!(self, Self::EveryPoint)
    }

    /// Trigger program for a segment of the given role.
    pub fn user_program(self, point_type: PointType) -> UserProgram {
        match self {
            Self::None => UserProgram::NoProgram,
            Self::RowGate => match point_type {
                PointType::StartOfRow => UserProgram::LiveProgram,
                PointType::EndOfRow => UserProgram::ZeroProgram,
                _ => UserProgram::NoProgram,
            },
            Self::EveryPoint => match point_type {
                PointType::StartOfRow | PointType::PointJoin => UserProgram::LiveProgram,
                PointType::EndOfRow => UserProgram::DeadProgram,
                PointType::MidPoint => UserProgram::MidProgram,
                PointType::Turnaround => UserProgram::ZeroProgram,
            },
        }
    }
}

impl std::str::FromStr for MotionTrigger {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "none" => Ok(Self::None),
            "row_gate" => Ok(Self::RowGate),
            "every_point" => Ok(Self::EveryPoint),
            other => Err(format!(
                "unknown trigger mode '{other}' (expected none, row_gate or every_point)"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_firmware_codes() {
        assert_eq!(VelocityMode::PrevToNext.code(), 0);
        assert_eq!(VelocityMode::PrevToCurrent.code(), 1);
        assert_eq!(VelocityMode::CurrentToNext.code(), 2);
        assert_eq!(VelocityMode::ZeroVelocity.code(), 3);
        assert_eq!(UserProgram::NoProgram.code(), 0);
        assert_eq!(UserProgram::LiveProgram.code(), 1);
        assert_eq!(UserProgram::DeadProgram.code(), 2);
        assert_eq!(UserProgram::MidProgram.code(), 4);
        assert_eq!(UserProgram::ZeroProgram.code(), 8);
    }

    #[test]
    fn test_every_point_programs() {
        let t = MotionTrigger::EveryPoint;
        assert_eq!(t.user_program(PointType::StartOfRow), UserProgram::LiveProgram);
        assert_eq!(t.user_program(PointType::PointJoin), UserProgram::LiveProgram);
        assert_eq!(t.user_program(PointType::MidPoint), UserProgram::MidProgram);
        assert_eq!(t.user_program(PointType::EndOfRow), UserProgram::DeadProgram);
        assert_eq!(t.user_program(PointType::Turnaround), UserProgram::ZeroProgram);
    }

    #[test]
    fn test_row_gate_programs() {
        let t = MotionTrigger::RowGate;
        assert_eq!(t.user_program(PointType::StartOfRow), UserProgram::LiveProgram);
        assert_eq!(t.user_program(PointType::EndOfRow), UserProgram::ZeroProgram);
        assert_eq!(t.user_program(PointType::MidPoint), UserProgram::NoProgram);
        assert_eq!(t.user_program(PointType::Turnaround), UserProgram::NoProgram);
        assert_eq!(
            MotionTrigger::None.user_program(PointType::StartOfRow),
            UserProgram::NoProgram
        );
    }

    #[test]
    fn test_parse_trigger() {
        assert_eq!("row-gate".parse::<MotionTrigger>(), Ok(MotionTrigger::RowGate));
        assert_eq!("EVERY_POINT".parse::<MotionTrigger>(), Ok(MotionTrigger::EveryPoint));
        assert!("sometimes".parse::<MotionTrigger>().is_err());
    }
}
