use super::Number;

/// Closed interval `[start, end]`. `end` may be below `start`, which lets a
/// map run "downhill" (e.g. a limit that falls as temperature rises).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Range<T>
where
    T: Number
{
    start: T,
    end: T,
}

impl<T> Range<T>
where
    T: Number
{
    pub const fn new(start: T, end: T) -> Self {
        Range { start, end }
    }

    pub fn start(&self) -> T {
        self.start
    }

    pub fn end(&self) -> T {
        self.end
    }

    pub fn min(&self) -> T {
        if self.start <= self.end { self.start } else { self.end }
    }

    pub fn max(&self) -> T {
        if self.start <= self.end { self.end } else { self.start }
    }

    pub fn contains(&self, val: T) -> bool {
        self.min() <= val && val <= self.max()
    }

    /// Linearly maps `val` from this range onto `new_range`. Values outside
    /// this range are extrapolated along the same line.
    pub fn map_value_to_range(&self, val: T, new_range: &Range<T>) -> T {
        let scale = (new_range.end - new_range.start) / (self.end - self.start);

        (val - self.start) * scale + new_range.start
    }
}

#[cfg(test)]
mod tests {
    use super::Range;

    #[test]
    fn maps_onto_wider_range() {
        let small = Range::new(0.0f32, 10.0);
        let large = Range::new(0.0f32, 50.0);
        assert_eq!(small.map_value_to_range(5.0, &large), 25.0);
    }

    #[test]
    fn moves_zero_point() {
        let small = Range::new(0.0f32, 10.0);
        let shifted = Range::new(10.0f32, 50.0);
        assert_eq!(small.map_value_to_range(5.0, &shifted), 30.0);
    }

    #[test]
    fn maps_downhill() {
        let temp = Range::new(48.0f32, 60.0);
        let limit = Range::new(120.0f32, 0.0);
        assert_eq!(temp.map_value_to_range(54.0, &limit), 60.0);
        assert_eq!(temp.min(), 48.0);
        assert_eq!(limit.max(), 120.0);
    }

    #[test]
    fn extrapolates_outside() {
        let r = Range::new(1.0f32, 2.0);
        let out = Range::new(10.0f32, 20.0);
        assert_eq!(r.map_value_to_range(3.0, &out), 30.0);
        assert!(!r.contains(3.0));
    }
}
