use crate::math::interp::InterpolationTable;

pub const NMC_CELL_MAX_VOLTAGE: f32 = 4.2;
pub const NMC_CELL_MIN_VOLTAGE: f32 = 3.0;

// rested open circuit voltage (V) -> state of charge (%), 25C, C/20 pulse test
pub const NMC_CELL_OCV_SOC: [(f32, f32); 21] = [
    (3.00, 0.0),
    (3.30, 5.0),
    (3.45, 10.0),
    (3.52, 15.0),
    (3.56, 20.0),
    (3.59, 25.0),
    (3.62, 30.0),
    (3.64, 35.0),
    (3.66, 40.0),
    (3.69, 45.0),
    (3.72, 50.0),
    (3.76, 55.0),
    (3.80, 60.0),
    (3.84, 65.0),
    (3.88, 70.0),
    (3.92, 75.0),
    (3.97, 80.0),
    (4.02, 85.0),
    (4.07, 90.0),
    (4.13, 95.0),
    (4.20, 100.0),
];

// state of charge (%) -> series resistance (ohm)
pub const NMC_CELL_R0_SOC: [(f32, f32); 6] = [
    (0.0, 0.0045),
    (10.0, 0.0032),
    (20.0, 0.0028),
    (50.0, 0.0025),
    (80.0, 0.0026),
    (100.0, 0.0028),
];

// state of charge (%) -> RC branch resistance (ohm)
pub const NMC_CELL_R1_SOC: [(f32, f32); 5] = [
    (0.0, 0.0030),
    (20.0, 0.0018),
    (50.0, 0.0015),
    (80.0, 0.0016),
    (100.0, 0.0019),
];

// state of charge (%) -> RC branch capacitance (F)
pub const NMC_CELL_C1_SOC: [(f32, f32); 5] = [
    (0.0, 15000.0),
    (20.0, 25000.0),
    (50.0, 30000.0),
    (80.0, 28000.0),
    (100.0, 24000.0),
];

pub fn nmc_cell_ocv_soc_table() -> InterpolationTable<'static> {
    InterpolationTable::saturating(&NMC_CELL_OCV_SOC)
}
