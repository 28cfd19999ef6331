use crate::math::interp::InterpolationTable;

pub mod model;

/// Open-circuit voltage to state of charge translation, in percent.
pub trait SocLookup {
    fn soc_from_ocv(&self, ocv: f32) -> f32;
}

impl<'a> SocLookup for InterpolationTable<'a> {
    fn soc_from_ocv(&self, ocv: f32) -> f32 {
        self.interpolate(ocv).clamp(0.0, 100.0)
    }
}
