// Variable Naming Scheme
// plausibility bounds mark a reading as a measurement error, the cell is excluded from the pack statistics
// under/over voltage thresholds mark a valid reading as a cell fault, the pack reports zero current limits
// derate thresholds only reduce the current limits and never fault the pack

use embassy_time::Duration;

// number of cell channels on the AFE multiplexer
pub const CELL_COUNT: usize = 16;

////////////////////////
//  Hardware Scaling  //
////////////////////////

// segment output of the AFE is the average cell voltage, the full segment is 16 in series
pub const SERIES_CELL_VOLTAGE_MULTIPLIER: f32 = 16.0;
// parasitic calibration readings come back in 1/128 fixed point
pub const PARASITIC_FIXED_POINT_SCALE: f32 = 128.0;
pub const MV_PER_V: f32 = 1000.0;

//////////////
//  Timing  //
//////////////

pub const SLOW_TICK_PERIOD: Duration = Duration::from_millis(1000);
pub const FAST_TICK_PERIOD: Duration = Duration::from_millis(1);

// AFE needs this long after the first pack voltage sample before the UV flags are valid
pub const INIT_SETTLE_DELAY: Duration = Duration::from_millis(100);
// single sampling window (pack, parasitic, diagnostic and per-cell)
pub const SAMPLE_DURATION: Duration = Duration::from_millis(2);
// a cell conversion not reported within this is lost, the scan is abandoned
pub const CONVERSION_TIMEOUT: Duration = Duration::from_millis(10);
// fast ticks spent in Waiting between scans, ~100ms at 1kHz
pub const WAITING_TICKS: u16 = 100;
// slow ticks between calibration / diagnostic steps
pub const CALIBRATION_DIVIDER: u8 = 2;
// balancing target from the vehicle is stale after this
pub const BALANCING_TARGET_TIMEOUT: Duration = Duration::from_millis(1000);
// slow ticks the AFE may stay not ready during init before the pack is faulted
pub const INIT_READY_RETRIES: u8 = 5;
// AFE polls on wake before giving up, the driver bounds each poll
pub const WAKE_POLL_LIMIT: u32 = 1000;

/////////////
//  Cells  //
/////////////

pub const CELL_PLAUSIBLE_MIN_V: f32 = 2.0;
pub const CELL_PLAUSIBLE_MAX_V: f32 = 4.5;
pub const CELL_UNDERVOLTAGE_V: f32 = 2.5;
pub const CELL_OVERVOLTAGE_V: f32 = 4.2;
// cells this far above the target are bled
pub const BALANCING_MARGIN_V: f32 = 0.010;

//////////////
//  Limits  //
//////////////

pub const NOMINAL_CHARGE_CURRENT_A: f32 = 60.0;
pub const NOMINAL_DISCHARGE_CURRENT_A: f32 = 150.0;
pub const DISCHARGE_DERATE_STEP_A: f32 = 5.0;
pub const DISCHARGE_DERATE_DELAY: Duration = Duration::from_millis(1000);

// charge tapers to zero over the top of the SOC range
pub const CHARGE_TAPER_START_SOC: f32 = 80.0;
// discharge steps down below this SOC
pub const DISCHARGE_DERATE_SOC: f32 = 20.0;

pub const THERMAL_DERATE_START_C: f32 = 48.0;
pub const THERMAL_CUTOFF_C: f32 = 60.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CellThresholds {
    pub plausible_min_v: f32,
    pub plausible_max_v: f32,
    pub undervoltage_v: f32,
    pub overvoltage_v: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LimitConfig {
    pub nominal_charge_a: f32,
    pub nominal_discharge_a: f32,
    pub discharge_step_a: f32,
    pub discharge_derate_delay: Duration,
    pub charge_taper_start_soc: f32,
    pub discharge_derate_soc: f32,
    pub thermal_derate_start_c: f32,
    pub thermal_cutoff_c: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SequencerConfig {
    pub series_cells: usize,
    pub series_cell_voltage_multiplier: f32,
    pub parasitic_fixed_point_scale: f32,
    pub init_settle_delay: Duration,
    pub sample_duration: Duration,
    pub conversion_timeout: Duration,
    pub waiting_ticks: u16,
    pub calibration_divider: u8,
    pub balancing_target_timeout: Duration,
    pub balancing_margin_v: f32,
    pub init_ready_retries: u8,
    pub wake_poll_limit: u32,
    pub cells: CellThresholds,
    pub limits: LimitConfig,
}

pub const CELL_THRESHOLDS: CellThresholds = CellThresholds {
    plausible_min_v: CELL_PLAUSIBLE_MIN_V,
    plausible_max_v: CELL_PLAUSIBLE_MAX_V,
    undervoltage_v: CELL_UNDERVOLTAGE_V,
    overvoltage_v: CELL_OVERVOLTAGE_V,
};

pub const LIMIT_CONFIG: LimitConfig = LimitConfig {
    nominal_charge_a: NOMINAL_CHARGE_CURRENT_A,
    nominal_discharge_a: NOMINAL_DISCHARGE_CURRENT_A,
    discharge_step_a: DISCHARGE_DERATE_STEP_A,
    discharge_derate_delay: DISCHARGE_DERATE_DELAY,
    charge_taper_start_soc: CHARGE_TAPER_START_SOC,
    discharge_derate_soc: DISCHARGE_DERATE_SOC,
    thermal_derate_start_c: THERMAL_DERATE_START_C,
    thermal_cutoff_c: THERMAL_CUTOFF_C,
};

pub const SEQUENCER_CONFIG: SequencerConfig = SequencerConfig {
    series_cells: CELL_COUNT,
    series_cell_voltage_multiplier: SERIES_CELL_VOLTAGE_MULTIPLIER,
    parasitic_fixed_point_scale: PARASITIC_FIXED_POINT_SCALE,
    init_settle_delay: INIT_SETTLE_DELAY,
    sample_duration: SAMPLE_DURATION,
    conversion_timeout: CONVERSION_TIMEOUT,
    waiting_ticks: WAITING_TICKS,
    calibration_divider: CALIBRATION_DIVIDER,
    balancing_target_timeout: BALANCING_TARGET_TIMEOUT,
    balancing_margin_v: BALANCING_MARGIN_V,
    init_ready_retries: INIT_READY_RETRIES,
    wake_poll_limit: WAKE_POLL_LIMIT,
    cells: CELL_THRESHOLDS,
    limits: LIMIT_CONFIG,
};
