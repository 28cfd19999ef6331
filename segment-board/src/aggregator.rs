use ateam_lib_bms::power::SocLookup;

use crate::config::{CellThresholds, MV_PER_V};
use crate::pack_state::{ConnectivityState, PackState, Stats};

pub fn classify_cell(voltage: f32, thresholds: &CellThresholds) -> ConnectivityState {
    if voltage < thresholds.plausible_min_v || voltage > thresholds.plausible_max_v {
        ConnectivityState::Error
    } else if voltage < thresholds.undervoltage_v {
        ConnectivityState::FaultUndervoltage
    } else if voltage > thresholds.overvoltage_v {
        ConnectivityState::FaultOvervoltage
    } else {
        ConnectivityState::Connected
    }
}

/// Folds one scan of raw cell readings into the pack statistics.
///
/// Cells classified as `Error` are left out of every aggregate and get no SOC.
/// Returns true if any connected cell is not `Connected` or has its rail
/// undervoltage flag set.
pub fn aggregate<const CELLS: usize, L: SocLookup>(
    pack: &mut PackState<CELLS>,
    raw_readings: &[f32; CELLS],
    rail_undervoltage_flags: u32,
    thresholds: &CellThresholds,
    soc_lookup: &L,
) -> bool {
    let connected = pack.connected_cells.min(CELLS);

    let mut min = f32::MAX;
    let mut max = 0.0f32;
    let mut sum = 0.0f32;
    let mut valid_cells = 0usize;
    let mut fault = false;

    for (i, (cell, raw)) in pack.cells.iter_mut().zip(raw_readings.iter()).enumerate().take(connected) {
        let voltage = raw + cell.parasitic_correction;
        let state = classify_cell(voltage, thresholds);

        if state != cell.connectivity_state && state != ConnectivityState::Connected {
            warn!("cell {} left the valid band at {} V", i, voltage);
        }

        cell.voltage = voltage;
        cell.connectivity_state = state;

        if state == ConnectivityState::Error {
            cell.relative_soc = 0.0;
        } else {
            cell.relative_soc = soc_lookup.soc_from_ocv(voltage);
            min = min.min(voltage);
            max = max.max(voltage);
            sum += voltage;
            valid_cells += 1;
        }

        let rail_undervoltage = i < 32 && rail_undervoltage_flags & (1 << i) != 0;
        if state != ConnectivityState::Connected || rail_undervoltage {
            fault = true;
        }
    }

    for cell in pack.cells.iter_mut().skip(connected) {
        cell.connectivity_state = ConnectivityState::Disconnected;
    }

    // no valid cell replaced the sentinel
    if min == f32::MAX {
        min = 0.0;
    }

    let avg = if valid_cells > 0 { sum / valid_cells as f32 } else { 0.0 };

    pack.voltage_stats = Stats { min, max, avg };
    pack.soc_stats = Stats {
        min: soc_lookup.soc_from_ocv(min),
        max: soc_lookup.soc_from_ocv(max),
        avg: soc_lookup.soc_from_ocv(avg),
    };
    pack.calculated_pack_voltage_mv = sum * MV_PER_V;

    debug!("pack stats: {} valid cells, min {} max {} avg {}", valid_cells, min, max, avg);

    fault
}

#[cfg(test)]
mod tests {
    use ateam_lib_bms::math::interp::InterpolationTable;

    use super::*;
    use crate::config::CELL_THRESHOLDS;

    // 3.0V -> 0%, 4.0V -> 100%
    const LINEAR_OCV: [(f32, f32); 2] = [(3.0, 0.0), (4.0, 100.0)];

    fn pack_with(connected: usize) -> PackState<4> {
        let mut pack = PackState::<4>::new();
        pack.connected_cells = connected;
        pack
    }

    #[test]
    fn classification_bands() {
        assert_eq!(classify_cell(1.9, &CELL_THRESHOLDS), ConnectivityState::Error);
        assert_eq!(classify_cell(4.6, &CELL_THRESHOLDS), ConnectivityState::Error);
        assert_eq!(classify_cell(2.4, &CELL_THRESHOLDS), ConnectivityState::FaultUndervoltage);
        assert_eq!(classify_cell(4.3, &CELL_THRESHOLDS), ConnectivityState::FaultOvervoltage);
        assert_eq!(classify_cell(3.7, &CELL_THRESHOLDS), ConnectivityState::Connected);
        assert_eq!(classify_cell(2.5, &CELL_THRESHOLDS), ConnectivityState::Connected);
        assert_eq!(classify_cell(4.2, &CELL_THRESHOLDS), ConnectivityState::Connected);
    }

    #[test]
    fn implausible_cell_is_excluded() {
        let table = InterpolationTable::saturating(&LINEAR_OCV);
        let mut pack = pack_with(4);

        let fault = aggregate(&mut pack, &[3.0, 3.2, 4.6, 3.1], 0, &CELL_THRESHOLDS, &table);

        assert!(fault);
        assert_eq!(pack.cells[2].connectivity_state, ConnectivityState::Error);
        assert_eq!(pack.cells[2].relative_soc, 0.0);
        assert_eq!(pack.voltage_stats.max, 3.2);
        assert_eq!(pack.voltage_stats.min, 3.0);
        assert!((pack.voltage_stats.avg - 3.1).abs() < 1e-5);
        assert!((pack.calculated_pack_voltage_mv - 9300.0).abs() < 0.01);
        assert_eq!(pack.soc_stats.min, 0.0);
        assert!((pack.soc_stats.max - 20.0).abs() < 1e-3);
    }

    #[test]
    fn healthy_pack_clears_fault() {
        let table = InterpolationTable::saturating(&LINEAR_OCV);
        let mut pack = pack_with(4);

        let fault = aggregate(&mut pack, &[3.5, 3.5, 3.5, 3.5], 0, &CELL_THRESHOLDS, &table);

        assert!(!fault);
        assert!(pack.connected().iter().all(|c| c.connectivity_state == ConnectivityState::Connected));
        assert_eq!(pack.voltage_stats, Stats { min: 3.5, max: 3.5, avg: 3.5 });
        assert_eq!(pack.soc_stats.avg, 50.0);
        assert_eq!(pack.cells[0].relative_soc, 50.0);
    }

    #[test]
    fn parasitic_correction_is_applied() {
        let table = InterpolationTable::saturating(&LINEAR_OCV);
        let mut pack = pack_with(2);
        pack.cells[0].parasitic_correction = 0.25;
        pack.cells[1].parasitic_correction = -0.25;

        aggregate(&mut pack, &[3.25, 3.75, 0.0, 0.0], 0, &CELL_THRESHOLDS, &table);

        assert_eq!(pack.cells[0].voltage, 3.5);
        assert_eq!(pack.cells[1].voltage, 3.5);
    }

    #[test]
    fn fault_cells_still_count_towards_stats() {
        let table = InterpolationTable::saturating(&LINEAR_OCV);
        let mut pack = pack_with(2);

        let fault = aggregate(&mut pack, &[2.25, 3.75, 0.0, 0.0], 0, &CELL_THRESHOLDS, &table);

        assert!(fault);
        assert_eq!(pack.cells[0].connectivity_state, ConnectivityState::FaultUndervoltage);
        assert_eq!(pack.voltage_stats.min, 2.25);
        assert_eq!(pack.voltage_stats.avg, 3.0);
    }

    #[test]
    fn rail_undervoltage_faults_pack() {
        let table = InterpolationTable::saturating(&LINEAR_OCV);
        let mut pack = pack_with(4);

        let fault = aggregate(&mut pack, &[3.5; 4], 0b0100, &CELL_THRESHOLDS, &table);
        assert!(fault);

        // flags on unconnected inputs are ignored
        let mut pack = pack_with(2);
        let fault = aggregate(&mut pack, &[3.5; 4], 0b1000, &CELL_THRESHOLDS, &table);
        assert!(!fault);
        assert_eq!(pack.cells[3].connectivity_state, ConnectivityState::Disconnected);
    }

    #[test]
    fn no_valid_cells_zeroes_stats() {
        let table = InterpolationTable::saturating(&LINEAR_OCV);
        let mut pack = pack_with(2);

        let fault = aggregate(&mut pack, &[0.5, 5.0, 0.0, 0.0], 0, &CELL_THRESHOLDS, &table);

        assert!(fault);
        assert_eq!(pack.voltage_stats, Stats::zero());
        assert_eq!(pack.soc_stats, Stats::zero());
        assert_eq!(pack.calculated_pack_voltage_mv, 0.0);
    }
}
