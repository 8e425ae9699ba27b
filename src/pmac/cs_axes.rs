//! Coordinate system axis letters and per-axis demand arrays.

use std::fmt;
use std::ops::{Index, IndexMut};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ScanError;

/// One of the nine axis letters a PMAC coordinate system exposes.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CsAxis {
    A,
    B,
    C,
    U,
    V,
    W,
    X,
    Y,
    Z,
}

impl CsAxis {
    /// All axes in buffer order.
    pub const ALL: [CsAxis; 9] = [
        CsAxis::A,
        CsAxis::B,
        CsAxis::C,
        CsAxis::U,
        CsAxis::V,
        CsAxis::W,
        CsAxis::X,
        CsAxis::Y,
        CsAxis::Z,
    ];

    /// Position of the axis in [`CsAxis::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }

    /// Upper-case letter used by the controller.
    pub fn letter(self) -> char {
        match self {
            CsAxis::A => 'A',
            CsAxis::B => 'B',
            CsAxis::C => 'C',
            CsAxis::U => 'U',
            CsAxis::V => 'V',
            CsAxis::W => 'W',
            CsAxis::X => 'X',
            CsAxis::Y => 'Y',
            CsAxis::Z => 'Z',
        }
    }
}

impl fmt::Display for CsAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

impl FromStr for CsAxis {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CsAxis::ALL
            .into_iter()
            .find(|axis| s.eq_ignore_ascii_case(&axis.letter().to_string()))
            .ok_or_else(|| {
                ScanError::validation(format!(
                    "'{s}' is not a coordinate system axis (expected one of ABCUVWXYZ)"
                ))
            })
    }
}

/// One position array per CS axis. Unused axes hold empty arrays.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CsAxisArrays {
    arrays: [Vec<f64>; 9],
}

impl CsAxisArrays {
    /// Axes with a non-empty position array.
    pub fn used(&self) -> impl Iterator<Item = (CsAxis, &[f64])> {
        CsAxis::ALL
            .into_iter()
            .zip(self.arrays.iter())
            .filter(|(_, positions)| !positions.is_empty())
            .map(|(axis, positions)| (axis, positions.as_slice()))
    }
}

impl Index<CsAxis> for CsAxisArrays {
    type Output = Vec<f64>;

    fn index(&self, axis: CsAxis) -> &Self::Output {
        &self.arrays[axis.index()]
    }
}

impl IndexMut<CsAxis> for CsAxisArrays {
    fn index_mut(&mut self, axis: CsAxis) -> &mut Self::Output {
        &mut self.arrays[axis.index()]
    }
}
