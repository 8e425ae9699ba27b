//! Resolve scan axes to motors in one coordinate system.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::debug;

use crate::error::{ScanError, ScanResult};
use crate::hardware::capabilities::MotorChannel;
use crate::pmac::cs_axes::CsAxis;
use crate::pmac::motor_info::{motor_info, MotorInfo};
use crate::scan::PointGenerator;

/// Scan axis name to motor snapshot, ordered by axis name.
pub type AxisMapping = BTreeMap<String, MotorInfo>;

/// Axes that actually move: those of every non-static sub-generator.
pub fn get_motion_axes(generator: &dyn PointGenerator) -> Vec<String> {
    generator
        .axis_groups()
        .into_iter()
        .filter(|group| !group.is_static)
        .flat_map(|group| group.axes)
        .collect()
}

/// Snapshot the motors driving `axes_to_move`.
///
/// # Errors
///
/// `Validation` if an axis has no motor or more than one, if the motors are spread over more
/// than one CS port, if two axes share a CS axis letter, or if a matched motor
/// is not on a valid CS axis.
pub async fn cs_axis_mapping(
    motors: &[Arc<dyn MotorChannel>],
    axes_to_move: &[String],
) -> ScanResult<AxisMapping> {
    let mut mapping = AxisMapping::new();
    let mut ports = BTreeSet::new();
    for motor in motors {
        let name = motor.scannable_name().await?;
        if !axes_to_move.contains(&name) {
            continue;
        }
        if mapping.contains_key(&name) {
            return Err(ScanError::validation(format!(
                "more than one motor is named '{name}'"
            )));
        }
        let cs = motor.cs().await?;
        let info = motor_info(&cs, name.clone(), motor.as_ref()).await?;
        debug!(axis = %name, port = %cs.port, cs_axis = %info.cs_axis, "mapped scan axis");
        ports.insert(cs.port);
        mapping.insert(name, info);
    }

    let missing: Vec<&str> = axes_to_move
        .iter()
        .filter(|axis| !mapping.contains_key(*axis))
        .map(String::as_str)
        .collect();
    if !missing.is_empty() {
        return Err(ScanError::validation(format!(
            "scan axes {missing:?} are not driven by any motor in a coordinate system"
        )));
    }
    if ports.len() != 1 {
        return Err(ScanError::validation(format!(
            "scan axes must share one CS port, found {ports:?}"
        )));
    }

    let mut seen: BTreeMap<CsAxis, &str> = BTreeMap::new();
    for (name, info) in &mapping {
        if let Some(other) = seen.insert(info.cs_axis, name) {
            return Err(ScanError::validation(format!(
                "scan axes '{other}' and '{name}' are both on CS axis {}",
                info.cs_axis
            )));
        }
    }
    Ok(mapping)
}

/// Port of the first motor that sits on a valid CS axis.
///
/// Used when no axis moves but the trajectory program is still needed for
/// triggers.
pub async fn cs_port_with_motors_in(motors: &[Arc<dyn MotorChannel>]) -> ScanResult<String> {
    for motor in motors {
        let cs = motor.cs().await?;
        if cs.cs_axis().is_ok() {
            return Ok(cs.port);
        }
    }
    Err(ScanError::validation(
        "no motor is assigned to a coordinate system axis",
    ))
}
