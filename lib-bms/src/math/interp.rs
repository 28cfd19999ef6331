use core::cell::Cell;

use super::range::Range;

/// Piecewise linear lookup over a fixed set of `(x, y)` points.
///
/// Outside the table each edge either holds the boundary `y` (saturate) or
/// continues the slope of the outermost segment (extrapolate).
pub struct InterpolationTable<'a> {
    points: &'a [(f32, f32)],
    saturate_left: bool,
    saturate_right: bool,
    last_result: Cell<f32>,
}

impl<'a> InterpolationTable<'a> {
    /// `points` must hold at least two entries with strictly increasing x.
    /// The table is never reordered, so an unsorted table gives meaningless
    /// results (checked in debug builds only).
    pub const fn new(points: &'a [(f32, f32)], saturate_left: bool, saturate_right: bool) -> Self {
        assert!(points.len() >= 2, "interpolation table needs at least two points");

        Self {
            points,
            saturate_left,
            saturate_right,
            last_result: Cell::new(0.0),
        }
    }

    /// Table that holds the boundary value on both edges.
    pub const fn saturating(points: &'a [(f32, f32)]) -> Self {
        Self::new(points, true, true)
    }

    pub fn points(&self) -> &'a [(f32, f32)] {
        self.points
    }

    pub fn last_result(&self) -> f32 {
        self.last_result.get()
    }

    pub fn is_strictly_increasing(&self) -> bool {
        self.points.windows(2).all(|w| w[0].0 < w[1].0)
    }

    pub fn interpolate(&self, x: f32) -> f32 {
        debug_assert!(self.is_strictly_increasing(), "interpolation table x values must be strictly increasing");

        let y = self.evaluate(x);
        self.last_result.set(y);
        y
    }

    fn evaluate(&self, x: f32) -> f32 {
        let n = self.points.len();
        let first = self.points[0];
        let last = self.points[n - 1];

        if x <= first.0 {
            if self.saturate_left {
                return first.1;
            }

            return Self::segment_map(first, self.points[1], x);
        }

        if x >= last.0 {
            if self.saturate_right {
                return last.1;
            }

            // anchor on the last point so x == last.0 is exact
            return Self::segment_map(last, self.points[n - 2], x);
        }

        for w in self.points.windows(2) {
            if w[0].0 <= x && x < w[1].0 {
                return Self::segment_map(w[0], w[1], x);
            }
        }

        // only reachable for NaN input
        first.1
    }

    fn segment_map(from: (f32, f32), to: (f32, f32), x: f32) -> f32 {
        Range::new(from.0, to.0).map_value_to_range(x, &Range::new(from.1, to.1))
    }
}
