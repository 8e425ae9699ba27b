//! Grid point generators.
//!
//! A [`CompoundGenerator`] nests [`Dimension`]s, outermost first, like the
//! rows and columns of a raster. The innermost line is scanned continuously:
//! each of its points carries `lower`/`upper` bounds halfway to its
//! neighbours, computed from one shared bound table so that adjacent points
//! of a row meet exactly. Every other axis holds its position for the whole
//! point. A line with `alternate` set runs backwards on every other pass
//! (snake scan).

use super::{AxisGroup, Point, PointGenerator};

/// Evenly spaced positions along one axis, both ends included.
#[derive(Debug, Clone, PartialEq)]
pub struct LineGenerator {
    /// Axis name.
    pub axis: String,
    /// Engineering units.
    pub units: String,
    /// First position.
    pub start: f64,
    /// Last position.
    pub stop: f64,
    /// Number of positions.
    pub size: usize,
    /// Reverse direction on every other pass.
    pub alternate: bool,
}

impl LineGenerator {
    /// Line from `start` to `stop` in `size` points.
    pub fn new(axis: &str, units: &str, start: f64, stop: f64, size: usize) -> Self {
        Self {
            axis: axis.to_string(),
            units: units.to_string(),
            start,
            stop,
            size,
            alternate: false,
        }
    }

    /// Set snake mode.
    pub fn with_alternate(mut self, alternate: bool) -> Self {
        self.alternate = alternate;
        self
    }

    fn step(&self) -> f64 {
        if self.size > 1 {
            (self.stop - self.start) / (self.size - 1) as f64
        } else {
            0.0
        }
    }

    fn position(&self, index: usize) -> f64 {
        self.start + index as f64 * self.step()
    }

    /// Boundary between positions `index - 1` and `index`.
    fn bound(&self, index: usize) -> f64 {
        self.start + (index as f64 - 0.5) * self.step()
    }
}

/// Repeats without moving; optionally holds one axis at a fixed position.
#[derive(Debug, Clone, PartialEq)]
pub struct StaticGenerator {
    /// Number of repeats.
    pub size: usize,
    /// Held axis and its position.
    pub axis: Option<(String, f64)>,
}

impl StaticGenerator {
    /// `size` repeats with no axis.
    pub fn new(size: usize) -> Self {
        Self { size, axis: None }
    }

    /// Hold `axis` at `position` during the repeats.
    pub fn holding(mut self, axis: &str, position: f64) -> Self {
        self.axis = Some((axis.to_string(), position));
        self
    }
}

/// One nesting level of a compound scan.
#[derive(Debug, Clone, PartialEq)]
pub enum Dimension {
    /// A moving axis.
    Line(LineGenerator),
    /// Repeats, possibly holding an axis.
    Static(StaticGenerator),
}

impl Dimension {
    fn size(&self) -> usize {
        match self {
            Dimension::Line(line) => line.size,
            Dimension::Static(repeats) => repeats.size,
        }
    }

    fn alternate(&self) -> bool {
        matches!(self, Dimension::Line(line) if line.alternate)
    }
}

/// Nested dimensions with a fixed per-point duration.
#[derive(Debug, Clone, PartialEq)]
pub struct CompoundGenerator {
    dimensions: Vec<Dimension>,
    duration: f64,
    delay_after: Option<f64>,
    continuous: bool,
    sizes: Vec<usize>,
}

impl CompoundGenerator {
    /// Scan `dimensions` (outermost first) spending `duration` on each point.
    pub fn new(dimensions: Vec<Dimension>, duration: f64) -> Self {
        Self {
            dimensions,
            duration,
            delay_after: None,
            continuous: true,
            sizes: Vec::new(),
        }
    }

    /// Pause for `delay_after` seconds after every point.
    pub fn with_delay_after(mut self, delay_after: f64) -> Self {
        self.delay_after = Some(delay_after);
        self
    }

    /// Turn bounds on the innermost line on or off.
    pub fn with_continuous(mut self, continuous: bool) -> Self {
        self.continuous = continuous;
        self
    }

    fn is_prepared(&self) -> bool {
        self.sizes.len() == self.dimensions.len() && !self.dimensions.is_empty()
    }
}

impl PointGenerator for CompoundGenerator {
    fn prepare(&mut self) {
        self.sizes = self.dimensions.iter().map(Dimension::size).collect();
    }

    fn size(&self) -> usize {
        if self.dimensions.is_empty() {
            return 0;
        }
        self.dimensions.iter().map(Dimension::size).product()
    }

    fn duration(&self) -> f64 {
        self.duration
    }

    fn with_duration(&self, duration: f64) -> Box<dyn PointGenerator> {
        Box::new(Self {
            duration,
            sizes: Vec::new(),
            ..self.clone()
        })
    }

    fn axis_groups(&self) -> Vec<AxisGroup> {
        self.dimensions
            .iter()
            .map(|dimension| match dimension {
                Dimension::Line(line) => AxisGroup {
                    axes: vec![line.axis.clone()],
                    is_static: false,
                },
                Dimension::Static(repeats) => AxisGroup {
                    axes: repeats.axis.iter().map(|(axis, _)| axis.clone()).collect(),
                    is_static: true,
                },
            })
            .collect()
    }

    fn get_point(&self, index: usize) -> Option<Point> {
        if !self.is_prepared() || index >= self.size() {
            return None;
        }
        let mut point = Point {
            duration: self.duration,
            delay_after: self.delay_after,
            ..Point::default()
        };

        let innermost = self.dimensions.len() - 1;
        // points per pass of each dimension's inner block
        let mut block = 1;
        for (level, dimension) in self.dimensions.iter().enumerate().rev() {
            let size = self.sizes[level];
            let pass = index / (block * size);
            let mut i = (index / block) % size;
            let reversed = dimension.alternate() && pass % 2 == 1;
            if reversed {
                i = size - 1 - i;
            }
            block *= size;

            match dimension {
                Dimension::Line(line) => {
                    let position = line.position(i);
                    let (lower, upper) = if level == innermost && self.continuous {
                        if reversed {
                            (line.bound(i + 1), line.bound(i))
                        } else {
                            (line.bound(i), line.bound(i + 1))
                        }
                    } else {
                        (position, position)
                    };
                    point.positions.insert(line.axis.clone(), position);
                    point.lower.insert(line.axis.clone(), lower);
                    point.upper.insert(line.axis.clone(), upper);
                }
                Dimension::Static(repeats) => {
                    if let Some((axis, position)) = &repeats.axis {
                        for map in [&mut point.positions, &mut point.lower, &mut point.upper] {
                            map.insert(axis.clone(), *position);
                        }
                    }
                }
            }
        }
        Some(point)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(alternate: bool) -> CompoundGenerator {
        let mut generator = CompoundGenerator::new(
            vec![
                Dimension::Line(LineGenerator::new("y", "mm", 0.0, 1.0, 2)),
                Dimension::Line(LineGenerator::new("x", "mm", 0.0, 2.0, 3).with_alternate(alternate)),
            ],
            0.1,
        );
        generator.prepare();
        generator
    }

    #[test]
    fn test_raster_order_and_bounds() {
        let generator = grid(false);
        assert_eq!(generator.size(), 6);
        let p0 = generator.get_point(0).unwrap();
        assert_eq!(p0.positions["x"], 0.0);
        assert_eq!(p0.lower["x"], -0.5);
        assert_eq!(p0.upper["x"], 0.5);
        assert_eq!(p0.lower["y"], 0.0);
        let p3 = generator.get_point(3).unwrap();
        assert_eq!(p3.positions["x"], 0.0);
        assert_eq!(p3.positions["y"], 1.0);
        assert!(generator.get_point(6).is_none());
    }

    #[test]
    fn test_adjacent_points_share_bounds() {
        let generator = grid(false);
        let a = generator.get_point(0).unwrap();
        let b = generator.get_point(1).unwrap();
        assert_eq!(a.upper["x"], b.lower["x"]);
    }

    #[test]
    fn test_snake_reverses_odd_rows() {
        let generator = grid(true);
        let p3 = generator.get_point(3).unwrap();
        assert_eq!(p3.positions["x"], 2.0);
        assert_eq!(p3.lower["x"], 2.5);
        assert_eq!(p3.upper["x"], 1.5);
        let p4 = generator.get_point(4).unwrap();
        assert_eq!(p3.upper["x"], p4.lower["x"]);
        // row turn keeps x at the shared bound
        let p2 = generator.get_point(2).unwrap();
        assert_eq!(p2.upper["x"], p3.lower["x"]);
    }

    #[test]
    fn test_static_axes_are_flagged() {
        let mut generator = CompoundGenerator::new(
            vec![
                Dimension::Static(StaticGenerator::new(2).holding("z", 4.0)),
                Dimension::Line(LineGenerator::new("x", "mm", 0.0, 1.0, 2)),
            ],
            0.5,
        );
        generator.prepare();
        let groups = generator.axis_groups();
        assert!(groups[0].is_static);
        assert_eq!(groups[0].axes, vec!["z".to_string()]);
        assert_eq!(generator.get_point(3).unwrap().upper["z"], 4.0);
    }

    #[test]
    fn test_with_duration_needs_prepare() {
        let generator = grid(false);
        let mut revised = generator.with_duration(0.2);
        assert!(revised.get_point(0).is_none());
        revised.prepare();
        assert_eq!(revised.get_point(0).unwrap().duration, 0.2);
    }
}
