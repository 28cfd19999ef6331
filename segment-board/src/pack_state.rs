use crate::sequencer::SequencerState;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectivityState {
    Disconnected,
    Connected,
    Error,
    FaultUndervoltage,
    FaultOvervoltage,
}

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CellRecord {
    // volts, parasitic correction applied
    pub voltage: f32,
    pub parasitic_correction: f32,
    // percent
    pub relative_soc: f32,
    pub connectivity_state: ConnectivityState,
}

impl CellRecord {
    pub const fn new() -> Self {
        Self {
            voltage: 0.0,
            parasitic_correction: 0.0,
            relative_soc: 0.0,
            connectivity_state: ConnectivityState::Disconnected,
        }
    }

    pub fn is_valid(&self) -> bool {
        !matches!(self.connectivity_state, ConnectivityState::Error | ConnectivityState::Disconnected)
    }
}

impl Default for CellRecord {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Stats {
    pub min: f32,
    pub max: f32,
    pub avg: f32,
}

impl Stats {
    pub const fn zero() -> Self {
        Self { min: 0.0, max: 0.0, avg: 0.0 }
    }
}

/// Electrical state of the segment. Written by the sequencer (state and AFE
/// fields) and by the aggregator (statistics and fault), read by everyone else.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PackState<const CELLS: usize> {
    pub sequencer_state: SequencerState,
    pub fault: bool,
    pub connected_cells: usize,
    pub cells: [CellRecord; CELLS],
    pub pack_voltage_mv: f32,
    pub calculated_pack_voltage_mv: f32,
    pub voltage_stats: Stats,
    pub soc_stats: Stats,
    pub charge_limit_a: f32,
    pub discharge_limit_a: f32,
    pub balancing_mask: u32,
}

impl<const CELLS: usize> PackState<CELLS> {
    pub const fn new() -> Self {
        Self {
            sequencer_state: SequencerState::Init,
            fault: false,
            connected_cells: 0,
            cells: [CellRecord::new(); CELLS],
            pack_voltage_mv: 0.0,
            calculated_pack_voltage_mv: 0.0,
            voltage_stats: Stats::zero(),
            soc_stats: Stats::zero(),
            charge_limit_a: 0.0,
            discharge_limit_a: 0.0,
            balancing_mask: 0,
        }
    }

    /// Cells below `connected_cells`; later slots carry no meaning.
    pub fn connected(&self) -> &[CellRecord] {
        &self.cells[..self.connected_cells.min(CELLS)]
    }

    /// Max minus min of the valid cells, zero without valid cells.
    pub fn cell_voltage_spread(&self) -> f32 {
        let mut valid = self.connected().iter().filter(|c| c.is_valid()).map(|c| c.voltage);
        let first = match valid.next() {
            Some(v) => v,
            None => return 0.0,
        };

        let (min, max) = valid.fold((first, first), |(min, max), v| (min.min(v), max.max(v)));
        max - min
    }

    pub fn is_balancing(&self, cell: usize) -> bool {
        cell < CELLS && cell < 32 && self.balancing_mask & (1 << cell) != 0
    }
}

impl<const CELLS: usize> Default for PackState<CELLS> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(voltage: f32, connectivity_state: ConnectivityState) -> CellRecord {
        CellRecord { voltage, connectivity_state, ..CellRecord::new() }
    }

    #[test]
    fn new_pack_starts_in_init() {
        let pack = PackState::<4>::new();
        assert_eq!(pack.sequencer_state, SequencerState::Init);
        assert!(!pack.fault);
        assert!(pack.connected().is_empty());
    }

    #[test]
    fn spread_ignores_error_and_unconnected_cells() {
        let mut pack = PackState::<4>::new();
        pack.connected_cells = 3;
        pack.cells[0] = cell(3.50, ConnectivityState::Connected);
        pack.cells[1] = cell(4.60, ConnectivityState::Error);
        pack.cells[2] = cell(3.75, ConnectivityState::FaultOvervoltage);
        pack.cells[3] = cell(1.00, ConnectivityState::Connected);

        assert_eq!(pack.cell_voltage_spread(), 0.25);
    }

    #[test]
    fn spread_without_valid_cells_is_zero() {
        let pack = PackState::<4>::new();
        assert_eq!(pack.cell_voltage_spread(), 0.0);
    }
}
