//! Interface to the analog front end and the other collaborators the
//! measurement core needs. The register level drivers live with the board
//! support code; everything here is plain data plus the traits they implement.

use embassy_time::Instant;

/// What the AFE routes to its analog output for the next conversion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OutputSelection {
    PackVoltage,
    CellVoltage(usize),
    AmplifierSelfCalibration,
    ParasiticErrorCalibration,
}

/// Command half of the AFE exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AfeCommand {
    pub sampling_enabled: bool,
    pub diagnostic_enabled: bool,
    pub low_power_mode: bool,
    pub balancing_mask: u32,
    pub output_selection: OutputSelection,
}

impl AfeCommand {
    pub const fn new() -> Self {
        Self {
            sampling_enabled: false,
            diagnostic_enabled: false,
            low_power_mode: false,
            balancing_mask: 0,
            output_selection: OutputSelection::PackVoltage,
        }
    }
}

impl Default for AfeCommand {
    fn default() -> Self {
        Self::new()
    }
}

/// Status half of the AFE exchange, read only.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AfeStatus {
    pub ready: bool,
    // bit per cell input
    pub rail_undervoltage_flags: u32,
    // series cell count the AFE is strapped for
    pub series_cell_count: usize,
}

impl AfeStatus {
    pub fn cell_undervoltage(&self, cell: usize) -> bool {
        cell < 32 && self.rail_undervoltage_flags & (1 << cell) != 0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AfeError {
    NotReady,
    Bus,
}

/// Blocking, bounded command/status exchange with the AFE.
pub trait AfeDriver {
    fn read_write(&mut self, command: &AfeCommand) -> Result<AfeStatus, AfeError>;
}

/// Synchronous analog readings and the cell multiplexer.
pub trait AnalogInput {
    /// Segment output of the AFE in volts.
    fn segment_voltage(&mut self) -> f32;

    /// Route the multiplexer for the next conversion.
    fn select_cell(&mut self, cell: usize);
}

/// Monotonic millisecond clock. `embassy_time::Instant::now` on target.
pub trait Clock {
    fn now(&self) -> Instant;
}

/// Balancing target published by the vehicle with its receive time.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BalancingTarget {
    pub voltage: f32,
    pub received_at: Instant,
}

/// Read access to signals received from the vehicle network.
pub trait SignalBus {
    fn balancing_target(&self) -> Option<BalancingTarget>;

    /// Hottest cell or segment temperature in C.
    fn max_temperature_c(&self) -> f32;

    /// Charge drawn from the pack by the coulomb counter since full, in Ah.
    fn consumed_ah(&self) -> Option<f32>;
}
