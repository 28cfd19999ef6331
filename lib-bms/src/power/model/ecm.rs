/*
 * Single RC branch (Thevenin) equivalent circuit of a cell.
 *
 *        R0        R1
 *   +---/\/\---+--/\/\--+
 *   |          |        |      terminal voltage V, current I
 *  OCV         +---||---+      (I < 0 is discharge)
 *   |               C1
 *   +--------------------------
 *
 * The branch voltage is integrated with explicit Euler at the update rate,
 * so the step must stay well below 2 * R1 * C1 (tens of seconds for the
 * default tables).
 */

use embassy_time::Instant;

use crate::math::interp::InterpolationTable;
use crate::power::SocLookup;

use super::cell_tables::{NMC_CELL_C1_SOC, NMC_CELL_OCV_SOC, NMC_CELL_R0_SOC, NMC_CELL_R1_SOC};

/// SOC value held until the first bootstrap or update. Parameter lookups
/// saturate at the top of their tables while it is set.
pub const SOC_UNINITIALIZED: f32 = 100.0;

/// How the ohmic drop and branch voltage are folded back into the open
/// circuit voltage.
///
/// - `Additive`: `OCV = V + I*R1 + Vb`
/// - `Subtractive`: `OCV = V - I*R1 - Vb`
/// - `Thevenin`: `OCV = V - I*R0 + Vb`, the series resistance drop of the
///   Thevenin model, consistent with the branch update
///   `dVb = (-Vb / (R1*C1) - I / C1) * dt` and negative current on discharge.
///
/// Additive and Subtractive fold the branch resistance R1 into the ohmic
/// term. Which one matches a given board depends on the current sense wiring.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SignConvention {
    Additive,
    Subtractive,
    Thevenin,
}

impl SignConvention {
    // (ohmic term sign, branch term sign)
    const fn signs(self) -> (f32, f32) {
        match self {
            SignConvention::Additive => (1.0, 1.0),
            SignConvention::Subtractive => (-1.0, -1.0),
            SignConvention::Thevenin => (-1.0, 1.0),
        }
    }

    /// Resistance multiplying the current in the ohmic term.
    pub fn ohmic_resistance(self, r0: f32, r1: f32) -> f32 {
        match self {
            SignConvention::Additive | SignConvention::Subtractive => r1,
            SignConvention::Thevenin => r0,
        }
    }
}

/// Parameter tables for one cell chemistry. R0, R1 and C1 are indexed by
/// SOC in percent, `ocv_to_soc` by open circuit voltage.
pub struct EcmTableSet<'a> {
    pub r0: InterpolationTable<'a>,
    pub r1: InterpolationTable<'a>,
    pub c1: InterpolationTable<'a>,
    pub ocv_to_soc: InterpolationTable<'a>,
}

impl EcmTableSet<'static> {
    pub fn nmc_cell() -> Self {
        Self {
            r0: InterpolationTable::saturating(&NMC_CELL_R0_SOC),
            r1: InterpolationTable::saturating(&NMC_CELL_R1_SOC),
            c1: InterpolationTable::saturating(&NMC_CELL_C1_SOC),
            ocv_to_soc: InterpolationTable::saturating(&NMC_CELL_OCV_SOC),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EcmState {
    pub terminal_voltage: f32,
    pub open_circuit_voltage: f32,
    pub soc: f32,
    pub r0: f32,
    pub r1: f32,
    pub c1: f32,
    pub branch_voltage: f32,
    pub branch_voltage_delta: f32,
    pub current: f32,
    pub last_update: Option<Instant>,
}

impl EcmState {
    pub const fn new() -> Self {
        Self {
            terminal_voltage: 0.0,
            open_circuit_voltage: 0.0,
            soc: SOC_UNINITIALIZED,
            r0: 0.0,
            r1: 0.0,
            c1: 0.0,
            branch_voltage: 0.0,
            branch_voltage_delta: 0.0,
            current: 0.0,
            last_update: None,
        }
    }
}

impl Default for EcmState {
    fn default() -> Self {
        Self::new()
    }
}

pub struct EquivalentCircuitEstimator<'a> {
    tables: EcmTableSet<'a>,
    convention: SignConvention,
    capacity_ah: f32,
    state: EcmState,
    initialized: bool,
}

impl<'a> EquivalentCircuitEstimator<'a> {
    pub fn new(tables: EcmTableSet<'a>, convention: SignConvention, capacity_ah: f32) -> Self {
        debug_assert!(capacity_ah > 0.0, "cell capacity must be positive");

        Self {
            tables,
            convention,
            capacity_ah,
            state: EcmState::new(),
            initialized: false,
        }
    }

    pub fn reset(&mut self) {
        self.state = EcmState::new();
        self.initialized = false;
    }

    pub fn state(&self) -> &EcmState {
        &self.state
    }

    pub fn soc(&self) -> f32 {
        self.state.soc
    }

    pub fn open_circuit_voltage(&self) -> f32 {
        self.state.open_circuit_voltage
    }

    pub fn branch_voltage(&self) -> f32 {
        self.state.branch_voltage
    }

    pub fn convention(&self) -> SignConvention {
        self.convention
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn ocv_to_soc(&self) -> &InterpolationTable<'a> {
        &self.tables.ocv_to_soc
    }

    /// Seeds the SOC from the coulomb counter. Only the first call after a
    /// reset has any effect; returns whether the seed was applied.
    pub fn bootstrap_from_coulomb_count(&mut self, consumed_ah: f32) -> bool {
        if self.initialized {
            return false;
        }

        let soc = (self.capacity_ah - consumed_ah) / self.capacity_ah * 100.0;
        self.state.soc = soc.clamp(0.0, 100.0);
        self.initialized = true;

        info!("ecm soc bootstrapped from coulomb count: {}%", self.state.soc);
        true
    }

    /// Runs one update using the time since the previous call as the step.
    /// The first call after a reset has a zero step.
    pub fn update(&mut self, terminal_voltage: f32, current: f32, now: Instant) -> f32 {
        let dt_s = match self.state.last_update {
            Some(last) => now.saturating_duration_since(last).as_micros() as f32 / 1_000_000.0,
            None => 0.0,
        };
        self.state.last_update = Some(now);

        self.step(terminal_voltage, current, dt_s)
    }

    /// Runs one update with an explicit step in seconds and returns the new
    /// SOC in percent.
    pub fn step(&mut self, terminal_voltage: f32, current: f32, dt_s: f32) -> f32 {
        let soc = self.state.soc;
        let r0 = self.tables.r0.interpolate(soc);
        let r1 = self.tables.r1.interpolate(soc);
        let c1 = self.tables.c1.interpolate(soc);

        let branch_voltage_delta = if r1 > 0.0 && c1 > 0.0 {
            ((-self.state.branch_voltage / (r1 * c1)) - current / c1) * dt_s
        } else {
            warn!("ecm parameter lookup gave non-positive R1 {} or C1 {}", r1, c1);
            0.0
        };
        let branch_voltage = self.state.branch_voltage + branch_voltage_delta;

        let (ohmic_sign, branch_sign) = self.convention.signs();
        let open_circuit_voltage = terminal_voltage
            + ohmic_sign * current * self.convention.ohmic_resistance(r0, r1)
            + branch_sign * branch_voltage;

        let soc = self.tables.ocv_to_soc.soc_from_ocv(open_circuit_voltage);

        self.state = EcmState {
            terminal_voltage,
            open_circuit_voltage,
            soc,
            r0,
            r1,
            c1,
            branch_voltage,
            branch_voltage_delta,
            current,
            last_update: self.state.last_update,
        };
        self.initialized = true;

        trace!("ecm: ocv {} vb {} soc {}", open_circuit_voltage, branch_voltage, soc);
        soc
    }
}
