// Variable Naming Scheme
// taper: charge limit reduction as the highest cell approaches full
// derate: discharge limit step down while the lowest cell is nearly empty
// thermal: reduction of both limits between the derate start and cutoff temperature
// Any fault, an errored or sleeping sequencer, or a cell above the cutoff forces both limits to zero.

use ateam_lib_bms::math::{linear_map::LinearMap, range::Range};
use ateam_lib_bms::time::OneShotTimer;
use embassy_time::Instant;
use libm::{fmaxf, fminf};

use crate::config::LimitConfig;
use crate::pack_state::Stats;
use crate::sequencer::SequencerState;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LimitInputs {
    pub soc: Stats,
    pub max_temperature_c: f32,
    pub fault: bool,
    pub sequencer_state: SequencerState,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CurrentLimits {
    pub charge_a: f32,
    pub discharge_a: f32,
}

impl CurrentLimits {
    pub const ZERO: CurrentLimits = CurrentLimits { charge_a: 0.0, discharge_a: 0.0 };
}

pub struct LimitCalculator {
    config: LimitConfig,
    charge_taper: LinearMap<f32>,
    thermal_fraction: LinearMap<f32>,
    // discharge limit after low SOC steps, before thermal derate
    discharge_base_a: f32,
    derate_timer: OneShotTimer,
}

impl LimitCalculator {
    pub fn new(config: LimitConfig) -> Self {
        Self {
            config,
            charge_taper: LinearMap::new(
                Range::new(config.charge_taper_start_soc, 100.0),
                Range::new(config.nominal_charge_a, 0.0)),
            thermal_fraction: LinearMap::new(
                Range::new(config.thermal_derate_start_c, config.thermal_cutoff_c),
                Range::new(0.0, 1.0)),
            discharge_base_a: config.nominal_discharge_a,
            derate_timer: OneShotTimer::new(),
        }
    }

    pub fn config(&self) -> &LimitConfig {
        &self.config
    }

    pub fn derate_armed(&self) -> bool {
        self.derate_timer.is_armed()
    }

    pub fn update(&mut self, inputs: &LimitInputs, now: Instant) -> CurrentLimits {
        let forced_off = inputs.max_temperature_c > self.config.thermal_cutoff_c
            || inputs.fault
            || inputs.sequencer_state == SequencerState::Error
            || inputs.sequencer_state == SequencerState::Sleeping;

        if forced_off {
            return CurrentLimits::ZERO;
        }

        let thermal_fraction = self.thermal_fraction.map_bounded(inputs.max_temperature_c);

        let charge_a = self.charge_taper.map_bounded(inputs.soc.max)
            - thermal_fraction * self.config.nominal_charge_a;

        self.update_discharge_base(&inputs.soc, now);
        let discharge_a = self.discharge_base_a
            - thermal_fraction * self.config.nominal_discharge_a;

        CurrentLimits {
            charge_a: Self::clamp_limit(charge_a, self.config.nominal_charge_a),
            discharge_a: Self::clamp_limit(discharge_a, self.config.nominal_discharge_a),
        }
    }

    fn update_discharge_base(&mut self, soc: &Stats, now: Instant) {
        if soc.min > self.config.discharge_derate_soc {
            self.discharge_base_a = self.config.nominal_discharge_a;
            self.derate_timer.disarm();
            return;
        }

        if self.derate_timer.arm_if_disarmed(now) {
            return;
        }

        if self.derate_timer.expired(now, self.config.discharge_derate_delay) {
            let floor = soc.avg / self.config.discharge_derate_soc * self.config.nominal_discharge_a;
            let stepped = self.discharge_base_a - self.config.discharge_step_a;
            self.discharge_base_a = Self::clamp_limit(fmaxf(stepped, floor), self.config.nominal_discharge_a);
            self.derate_timer.disarm();

            info!("low soc discharge derate, limit now {} A", self.discharge_base_a);
        }
    }

    fn clamp_limit(value: f32, nominal: f32) -> f32 {
        fminf(fmaxf(value, 0.0), nominal)
    }
}
