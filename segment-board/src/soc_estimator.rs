use ateam_lib_bms::power::model::ecm::EquivalentCircuitEstimator;
use embassy_time::Instant;

use crate::afe::SignalBus;
use crate::pack_state::PackState;

/// Board side of the equivalent circuit estimator. Seeds the SOC from the
/// vehicle's coulomb counter on first use, then tracks it from measured
/// cell voltage and pack current.
pub struct CellSocEstimator<'a> {
    estimator: EquivalentCircuitEstimator<'a>,
}

impl<'a> CellSocEstimator<'a> {
    pub fn new(estimator: EquivalentCircuitEstimator<'a>) -> Self {
        Self { estimator }
    }

    pub fn estimator(&self) -> &EquivalentCircuitEstimator<'a> {
        &self.estimator
    }

    /// Forgets the estimate, the next update bootstraps again.
    pub fn reset(&mut self) {
        self.estimator.reset();
    }

    /// Returns the SOC in percent. `current_a` is negative on discharge.
    pub fn update<B: SignalBus>(&mut self, bus: &B, cell_voltage: f32, current_a: f32, now: Instant) -> f32 {
        if !self.estimator.is_initialized() {
            match bus.consumed_ah() {
                Some(consumed_ah) => {
                    self.estimator.bootstrap_from_coulomb_count(consumed_ah);
                }
                None => debug!("no coulomb count on the bus, soc starts from ocv"),
            }
        }

        self.estimator.update(cell_voltage, current_a, now)
    }

    /// Updates from the average valid cell voltage of an aggregated pack.
    /// None while the pack has no valid cell.
    pub fn update_from_pack<B: SignalBus, const CELLS: usize>(
        &mut self,
        bus: &B,
        pack: &PackState<CELLS>,
        current_a: f32,
        now: Instant,
    ) -> Option<f32> {
        if !pack.connected().iter().any(|cell| cell.is_valid()) {
            return None;
        }

        Some(self.update(bus, pack.voltage_stats.avg, current_a, now))
    }
}

#[cfg(test)]
mod tests {
    use ateam_lib_bms::power::model::ecm::{EcmTableSet, SignConvention};
    use ateam_lib_bms::power::SocLookup;

    use super::*;
    use crate::afe::BalancingTarget;
    use crate::pack_state::ConnectivityState;

    struct CoulombBus(Option<f32>);

    impl SignalBus for CoulombBus {
        fn balancing_target(&self) -> Option<BalancingTarget> {
            None
        }

        fn max_temperature_c(&self) -> f32 {
            25.0
        }

        fn consumed_ah(&self) -> Option<f32> {
            self.0
        }
    }

    fn tracker() -> CellSocEstimator<'static> {
        CellSocEstimator::new(EquivalentCircuitEstimator::new(
            EcmTableSet::nmc_cell(),
            SignConvention::Thevenin,
            5.0,
        ))
    }

    #[test]
    fn first_update_bootstraps_from_bus() {
        let mut soc = tracker();
        let bus = CoulombBus(Some(2.5));

        soc.update(&bus, 3.7, 0.0, Instant::from_millis(0));
        assert!(soc.estimator().is_initialized());
        // parameters were looked up at the seeded 50% rather than the 100% default
        assert!((soc.estimator().state().r0 - 0.0025).abs() < 1e-7);
    }

    #[test]
    fn missing_coulomb_count_starts_from_ocv() {
        let mut soc = tracker();
        let bus = CoulombBus(None);

        let estimate = soc.update(&bus, 3.7, 0.0, Instant::from_millis(0));
        assert!(soc.estimator().is_initialized());
        assert!((soc.estimator().state().r0 - 0.0028).abs() < 1e-7);
        assert_eq!(estimate, soc.estimator().ocv_to_soc().soc_from_ocv(3.7));
    }

    #[test]
    fn bootstrap_reads_bus_once() {
        let mut soc = tracker();

        soc.update(&CoulombBus(Some(2.5)), 3.7, 0.0, Instant::from_millis(0));
        let first = soc.estimator().soc();

        // a later count is ignored, the soc follows the measured voltage
        soc.update(&CoulombBus(Some(0.0)), 3.7, 0.0, Instant::from_millis(1_000));
        assert_eq!(soc.estimator().soc(), first);

        soc.reset();
        assert!(!soc.estimator().is_initialized());
        soc.update(&CoulombBus(Some(2.5)), 3.7, 0.0, Instant::from_millis(2_000));
        assert!((soc.estimator().state().r0 - 0.0025).abs() < 1e-7);
    }

    #[test]
    fn pack_without_valid_cells_is_skipped() {
        let mut soc = tracker();
        let bus = CoulombBus(Some(2.5));
        let mut pack = PackState::<2>::new();

        assert_eq!(soc.update_from_pack(&bus, &pack, 0.0, Instant::from_millis(0)), None);
        assert!(!soc.estimator().is_initialized());

        pack.connected_cells = 2;
        pack.cells[0].connectivity_state = ConnectivityState::Error;
        pack.cells[1].connectivity_state = ConnectivityState::Connected;
        pack.voltage_stats.avg = 3.7;

        assert!(soc.update_from_pack(&bus, &pack, 0.0, Instant::from_millis(0)).is_some());
        assert_eq!(soc.estimator().state().terminal_voltage, 3.7);
    }
}
