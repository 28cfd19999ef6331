/*
 * Measurement sequencer for the segment AFE.
 *
 * Driven from three places:
 * 1. slow_tick (~1Hz): init handshake, amplifier calibration and diagnostics.
 * 2. fast_tick (~1kHz): sampling windows, the Waiting countdown and aggregation.
 * 3. on_conversion_complete: AFE conversion done interrupt during a cell scan.
 *
 * INVARIANTS:
 * 1. At most one sampling window is in flight. A window is armed only when
 *   none is armed and is disarmed before the next one starts.
 * 2. on_conversion_complete only mutates state in Holding or
 *   ParasiticMeasurement. Those states are entered only from fast_tick and
 *   left by the last completion, a conversion timeout, or sleep/error which
 *   abandon the scan.
 * 3. Callers never run two entry points at once. The scheduler glue in
 *   `tasks` holds the sequencer in a critical section mutex, which also
 *   masks the conversion interrupt while a tick runs.
 * 4. Limits are only published from a scan completed since the last
 *   sleep or abandoned scan.
 */

use ateam_lib_bms::math::interp::InterpolationTable;
use ateam_lib_bms::time::OneShotTimer;
use embassy_time::Instant;

use crate::afe::{AfeCommand, AfeDriver, AfeError, AfeStatus, AnalogInput, Clock, OutputSelection, SignalBus};
use crate::aggregator::aggregate;
use crate::config::{SequencerConfig, MV_PER_V};
use crate::limits::{LimitCalculator, LimitInputs};
use crate::pack_state::{ConnectivityState, PackState};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SequencerState {
    Init,
    Calibrating,
    Parasitic,
    ParasiticMeasurement,
    Waiting,
    Sampling,
    Holding,
    Diagnostic,
    Error,
    Sleeping,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SequencerError {
    AfeNotReady,
    UnexpectedConversion(SequencerState),
    CellOutOfRange(usize),
}

pub struct Sequencer<'a, A, C, B, const CELLS: usize>
where
    A: AfeDriver + AnalogInput,
    C: Clock,
    B: SignalBus,
{
    config: SequencerConfig,
    afe: A,
    clock: C,
    bus: B,
    soc_table: InterpolationTable<'a>,
    limits: LimitCalculator,

    pack: PackState<CELLS>,
    command: AfeCommand,
    status: AfeStatus,

    raw_readings: [f32; CELLS],
    parasitic_readings: [f32; CELLS],

    sample_window: OneShotTimer,
    init_settle: OneShotTimer,
    init_not_ready_ticks: u8,
    waiting_ticks: u16,
    slow_tick_count: u8,
    balance_odd_cells: bool,

    // a complete scan is waiting for aggregation
    fresh_scan: bool,
    afe_not_ready: bool,
    cells_fault: bool,
}

impl<'a, A, C, B, const CELLS: usize> Sequencer<'a, A, C, B, CELLS>
where
    A: AfeDriver + AnalogInput,
    C: Clock,
    B: SignalBus,
{
    pub fn new(config: SequencerConfig, afe: A, clock: C, bus: B, soc_table: InterpolationTable<'a>) -> Self {
        debug_assert!(CELLS <= 32, "balancing mask holds at most 32 cells");
        debug_assert!(config.series_cells <= CELLS, "configured series cells exceed cell slots");

        Self {
            config,
            afe,
            clock,
            bus,
            soc_table,
            limits: LimitCalculator::new(config.limits),
            pack: PackState::new(),
            command: AfeCommand::new(),
            status: AfeStatus::default(),
            raw_readings: [0.0; CELLS],
            parasitic_readings: [0.0; CELLS],
            sample_window: OneShotTimer::new(),
            init_settle: OneShotTimer::new(),
            init_not_ready_ticks: 0,
            waiting_ticks: 0,
            slow_tick_count: 0,
            balance_odd_cells: false,
            fresh_scan: false,
            afe_not_ready: false,
            cells_fault: false,
        }
    }

    /// Drops all measurement state and restarts from Init.
    pub fn reset(&mut self) {
        info!("sequencer reset");

        self.limits = LimitCalculator::new(self.config.limits);
        self.pack = PackState::new();
        self.command = AfeCommand::new();
        self.status = AfeStatus::default();
        self.raw_readings = [0.0; CELLS];
        self.parasitic_readings = [0.0; CELLS];
        self.sample_window.disarm();
        self.init_settle.disarm();
        self.init_not_ready_ticks = 0;
        self.waiting_ticks = 0;
        self.slow_tick_count = 0;
        self.balance_odd_cells = false;
        self.fresh_scan = false;
        self.afe_not_ready = false;
        self.cells_fault = false;
    }

    pub fn state(&self) -> SequencerState {
        self.pack.sequencer_state
    }

    pub fn pack(&self) -> &PackState<CELLS> {
        &self.pack
    }

    pub fn command(&self) -> &AfeCommand {
        &self.command
    }

    pub fn status(&self) -> &AfeStatus {
        &self.status
    }

    pub fn config(&self) -> &SequencerConfig {
        &self.config
    }

    pub fn window_in_flight(&self) -> bool {
        self.sample_window.is_armed()
    }

    pub fn afe(&self) -> &A {
        &self.afe
    }

    pub fn afe_mut(&mut self) -> &mut A {
        &mut self.afe
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    ///////////////////
    //  Entry Points //
    ///////////////////

    pub fn slow_tick(&mut self) {
        let now = self.clock.now();

        if self.pack.fault {
            self.poll_afe_recovery();
            return;
        }

        self.slow_tick_count = self.slow_tick_count.wrapping_add(1);

        match self.state() {
            SequencerState::Init => self.init_step(now),
            SequencerState::Waiting => {
                if self.slow_tick_count % self.config.calibration_divider.max(1) == 0 {
                    self.calibrate();
                } else {
                    self.start_diagnostic(now);
                }
            }
            _ => {}
        }
    }

    pub fn fast_tick(&mut self) {
        let now = self.clock.now();

        match self.state() {
            SequencerState::Parasitic => self.parasitic_step(now),
            SequencerState::Sampling => self.sampling_step(now),
            SequencerState::Waiting => self.waiting_step(now),
            SequencerState::Diagnostic => self.diagnostic_step(now),
            SequencerState::Calibrating => self.calibrating_step(),
            SequencerState::Holding | SequencerState::ParasiticMeasurement => self.scan_timeout_step(now),
            _ => {}
        }
    }

    /// AFE conversion complete. `value` is the reading of the currently
    /// selected cell in volts.
    pub fn on_conversion_complete(&mut self, value: f32) -> Result<(), SequencerError> {
        let state = self.state();
        if state != SequencerState::Holding && state != SequencerState::ParasiticMeasurement {
            warn!("conversion complete outside a scan in state {}", state);
            return Err(SequencerError::UnexpectedConversion(state));
        }

        let cell = match self.command.output_selection {
            OutputSelection::CellVoltage(cell) if cell < self.connected_cells() => cell,
            OutputSelection::CellVoltage(cell) => return Err(SequencerError::CellOutOfRange(cell)),
            _ => return Err(SequencerError::UnexpectedConversion(state)),
        };

        let now = self.clock.now();
        self.sample_window.disarm();

        if state == SequencerState::Holding {
            self.raw_readings[cell] = value;
        } else {
            self.parasitic_readings[cell] = value;
        }

        if cell == 0 {
            self.measurement_complete(state, now);
        } else {
            self.select_cell(cell - 1);
            self.exchange_logged();
            self.arm_window(now);
        }

        Ok(())
    }

    pub fn sleep(&mut self) {
        info!("sequencer entering sleep");

        self.command.low_power_mode = true;
        self.command.sampling_enabled = false;
        self.command.balancing_mask = 0;
        self.exchange_logged();

        // an in flight window is abandoned, the AFE resets on the mode change
        self.sample_window.disarm();
        // readings from before the sleep are never aggregated
        self.fresh_scan = false;
        self.pack.balancing_mask = 0;
        self.pack.charge_limit_a = 0.0;
        self.pack.discharge_limit_a = 0.0;
        self.transition(SequencerState::Sleeping);
    }

    /// Polls the AFE until it reports ready, at most `wake_poll_limit` times.
    ///
    /// Blocks the caller for up to `wake_poll_limit` driver exchanges, each
    /// bounded by the driver's own timeout. Schedulers that must keep the
    /// conversion interrupt unmasked drive [`Self::poll_wake`] one exchange per
    /// lock instead.
    pub fn wake(&mut self) -> Result<(), SequencerError> {
        for _ in 0..self.config.wake_poll_limit.max(1) {
            if self.poll_wake() {
                return Ok(());
            }
        }

        self.abandon_wake()
    }

    /// One wake attempt. True once the sequencer is out of Sleeping.
    pub fn poll_wake(&mut self) -> bool {
        if self.state() != SequencerState::Sleeping {
            return true;
        }

        self.command.low_power_mode = false;
        self.command.output_selection = OutputSelection::PackVoltage;

        match self.exchange() {
            Ok(status) if status.ready => {
                self.waiting_ticks = 0;
                self.fresh_scan = false;
                self.transition(SequencerState::Waiting);
                true
            }
            _ => false,
        }
    }

    /// Gives up on a wake that never saw the AFE ready. The sequencer stays
    /// asleep with the pack faulted until the AFE recovers.
    pub fn abandon_wake(&mut self) -> Result<(), SequencerError> {
        if self.state() != SequencerState::Sleeping {
            return Ok(());
        }

        error!("afe not ready after wake");
        self.afe_not_ready = true;
        self.update_fault();
        Err(SequencerError::AfeNotReady)
    }

    //////////////////
    //  Slow Steps  //
    //////////////////

    fn init_step(&mut self, now: Instant) {
        if !self.init_settle.is_armed() {
            match self.exchange() {
                Ok(status) if status.ready => {
                    self.init_not_ready_ticks = 0;
                    self.command.sampling_enabled = true;
                    self.command.diagnostic_enabled = true;
                    self.command.output_selection = OutputSelection::PackVoltage;
                    if self.exchange().is_ok() {
                        self.init_settle.arm(now);
                    } else {
                        self.note_init_not_ready();
                    }
                }
                _ => self.note_init_not_ready(),
            }
            return;
        }

        if !self.init_settle.expired(now, self.config.init_settle_delay) {
            return;
        }
        self.init_settle.disarm();

        self.command.sampling_enabled = false;
        // the second read returns the undervoltage flags latched by the first
        let status = match self.exchange().and_then(|_| self.exchange()) {
            Ok(status) => status,
            Err(_) => {
                self.note_init_not_ready();
                return;
            }
        };

        let detected = status.series_cell_count;
        self.pack.connected_cells = detected.min(CELLS);

        let mut init_error = false;
        if detected != self.config.series_cells {
            error!("afe reports {} series cells, configured for {}", detected, self.config.series_cells);
            init_error = true;
        }

        let connected = self.pack.connected_cells;
        for (i, cell) in self.pack.cells.iter_mut().enumerate() {
            cell.connectivity_state = if i >= connected {
                ConnectivityState::Disconnected
            } else if status.cell_undervoltage(i) {
                error!("cell {} undervoltage at init", i);
                init_error = true;
                ConnectivityState::Error
            } else {
                ConnectivityState::Connected
            };
        }

        if init_error {
            self.cells_fault = true;
            self.update_fault();
            self.transition(SequencerState::Error);
        } else {
            self.transition(SequencerState::Parasitic);
        }
    }

    fn note_init_not_ready(&mut self) {
        self.init_not_ready_ticks = self.init_not_ready_ticks.saturating_add(1);
        warn!("afe not ready during init ({})", self.init_not_ready_ticks);

        if self.init_not_ready_ticks > self.config.init_ready_retries {
            error!("afe did not become ready, faulting pack");
            self.afe_not_ready = true;
            self.update_fault();
        }
    }

    fn poll_afe_recovery(&mut self) {
        if let Ok(status) = self.exchange() {
            if status.ready && self.afe_not_ready {
                info!("afe ready again");
                self.afe_not_ready = false;
                self.init_not_ready_ticks = 0;
                self.update_fault();
            }
        }
    }

    fn calibrate(&mut self) {
        self.command.sampling_enabled = true;
        self.command.output_selection = OutputSelection::AmplifierSelfCalibration;
        self.exchange_logged();

        self.command.output_selection = OutputSelection::PackVoltage;
        self.exchange_logged();

        self.transition(SequencerState::Calibrating);
    }

    fn start_diagnostic(&mut self, now: Instant) {
        self.command.sampling_enabled = true;
        self.command.diagnostic_enabled = true;
        self.command.output_selection = OutputSelection::PackVoltage;
        self.exchange_logged();

        self.arm_window(now);
        self.transition(SequencerState::Diagnostic);
    }

    //////////////////
    //  Fast Steps  //
    //////////////////

    fn parasitic_step(&mut self, now: Instant) {
        if !self.sample_window.is_armed() {
            self.command.sampling_enabled = true;
            self.command.output_selection = OutputSelection::ParasiticErrorCalibration;
            self.exchange_logged();
            self.arm_window(now);
            return;
        }

        if self.sample_window.expired(now, self.config.sample_duration) {
            self.sample_window.disarm();
            self.record_pack_voltage();

            if self.start_cell_scan(now) {
                self.transition(SequencerState::ParasiticMeasurement);
            } else {
                self.transition(SequencerState::Waiting);
            }
        }
    }

    fn sampling_step(&mut self, now: Instant) {
        if !self.sample_window.is_armed() {
            self.command.sampling_enabled = true;
            self.command.output_selection = OutputSelection::PackVoltage;
            // route the mux to the top cell so the scan starts right after the pack read
            if let Some(top) = self.top_cell() {
                self.afe.select_cell(top);
            }
            self.exchange_logged();
            self.arm_window(now);
            return;
        }

        if self.sample_window.expired(now, self.config.sample_duration) {
            self.sample_window.disarm();
            self.record_pack_voltage();

            if self.start_cell_scan(now) {
                self.transition(SequencerState::Holding);
            } else {
                self.transition(SequencerState::Waiting);
            }
        }
    }

    fn waiting_step(&mut self, now: Instant) {
        self.waiting_ticks = self.waiting_ticks.saturating_add(1);
        if self.waiting_ticks < self.config.waiting_ticks {
            return;
        }
        self.waiting_ticks = 0;

        if self.fresh_scan {
            self.fresh_scan = false;
            self.run_aggregation(now);
        }

        self.command.diagnostic_enabled = false;
        self.command.low_power_mode = false;
        self.transition(SequencerState::Sampling);
    }

    fn diagnostic_step(&mut self, now: Instant) {
        if !self.sample_window.is_armed() {
            self.arm_window(now);
            return;
        }

        if self.sample_window.expired(now, self.config.sample_duration) {
            self.sample_window.disarm();

            self.command.diagnostic_enabled = false;
            self.command.output_selection = OutputSelection::PackVoltage;
            self.exchange_logged();

            self.transition(SequencerState::Sampling);
        }
    }

    // a lost conversion interrupt would otherwise hold the scan forever
    fn scan_timeout_step(&mut self, now: Instant) {
        if self.sample_window.arm_if_disarmed(now) {
            return;
        }
        if !self.sample_window.expired(now, self.config.conversion_timeout) {
            return;
        }

        let state = self.state();
        warn!("cell conversion timed out in {}, abandoning scan", state);

        self.sample_window.disarm();
        self.fresh_scan = false;
        self.command.output_selection = OutputSelection::PackVoltage;
        self.exchange_logged();

        if state == SequencerState::ParasiticMeasurement {
            // corrections stay unset until a parasitic scan completes
            self.transition(SequencerState::Parasitic);
        } else {
            self.pack.charge_limit_a = 0.0;
            self.pack.discharge_limit_a = 0.0;
            self.waiting_ticks = 0;
            self.transition(SequencerState::Waiting);
        }
    }

    fn calibrating_step(&mut self) {
        if let Ok(status) = self.exchange() {
            if status.ready {
                self.transition(SequencerState::Waiting);
            }
        }
    }

    ///////////////
    //  Helpers  //
    ///////////////

    fn measurement_complete(&mut self, prior: SequencerState, now: Instant) {
        match prior {
            SequencerState::Holding => {
                self.fresh_scan = true;
                self.transition(SequencerState::Waiting);
                self.update_balancing(now);
            }
            SequencerState::ParasiticMeasurement => {
                let scale = self.config.parasitic_fixed_point_scale;
                let connected = self.connected_cells();
                for (cell, raw) in self.pack.cells.iter_mut().zip(self.parasitic_readings.iter()).take(connected) {
                    cell.parasitic_correction = raw / scale;
                }
                self.transition(SequencerState::Waiting);
            }
            _ => {}
        }
    }

    fn update_balancing(&mut self, now: Instant) {
        let timeout = self.config.balancing_target_timeout;
        let target = self
            .bus
            .balancing_target()
            .filter(|target| now.saturating_duration_since(target.received_at) <= timeout);

        match target {
            Some(target) => {
                let threshold = target.voltage + self.config.balancing_margin_v;
                let parity = usize::from(self.balance_odd_cells);

                let mut mask = 0u32;
                for (i, cell) in self.pack.connected().iter().enumerate() {
                    let voltage = self.raw_readings[i] + cell.parasitic_correction;
                    if i % 2 == parity && i < 32 && cell.is_valid() && voltage > threshold {
                        mask |= 1 << i;
                    }
                }
                // alternate halves so adjacent bleed resistors are never on together
                self.balance_odd_cells = !self.balance_odd_cells;

                self.command.low_power_mode = false;
                self.command.balancing_mask = mask;
            }
            None => {
                self.command.low_power_mode = true;
                self.command.balancing_mask = 0;
            }
        }

        self.pack.balancing_mask = self.command.balancing_mask;
        self.exchange_logged();
    }

    fn run_aggregation(&mut self, now: Instant) {
        self.cells_fault = aggregate(
            &mut self.pack,
            &self.raw_readings,
            self.status.rail_undervoltage_flags,
            &self.config.cells,
            &self.soc_table,
        );
        self.update_fault();

        let inputs = LimitInputs {
            soc: self.pack.soc_stats,
            max_temperature_c: self.bus.max_temperature_c(),
            fault: self.pack.fault,
            sequencer_state: self.state(),
        };
        let limits = self.limits.update(&inputs, now);
        self.pack.charge_limit_a = limits.charge_a;
        self.pack.discharge_limit_a = limits.discharge_a;
    }

    fn record_pack_voltage(&mut self) {
        let segment = self.afe.segment_voltage();
        self.pack.pack_voltage_mv = segment * self.config.series_cell_voltage_multiplier * MV_PER_V;
    }

    // returns false if there is nothing to scan
    fn start_cell_scan(&mut self, now: Instant) -> bool {
        match self.top_cell() {
            Some(top) => {
                self.select_cell(top);
                self.exchange_logged();
                self.arm_window(now);
                true
            }
            None => false,
        }
    }

    fn select_cell(&mut self, cell: usize) {
        self.command.output_selection = OutputSelection::CellVoltage(cell);
        self.afe.select_cell(cell);
    }

    fn top_cell(&self) -> Option<usize> {
        self.connected_cells().checked_sub(1)
    }

    fn connected_cells(&self) -> usize {
        self.pack.connected_cells.min(CELLS)
    }

    fn arm_window(&mut self, now: Instant) {
        debug_assert!(!self.sample_window.is_armed(), "sampling window already in flight");
        self.sample_window.arm(now);
    }

    fn update_fault(&mut self) {
        let fault = self.cells_fault || self.afe_not_ready;
        if fault != self.pack.fault {
            info!("pack fault {}", fault);
        }
        self.pack.fault = fault;
    }

    fn transition(&mut self, next: SequencerState) {
        if next != self.pack.sequencer_state {
            debug!("sequencer {} -> {}", self.pack.sequencer_state, next);
        }
        self.pack.sequencer_state = next;
    }

    fn exchange(&mut self) -> Result<AfeStatus, AfeError> {
        let status = self.afe.read_write(&self.command)?;
        self.status = status;
        Ok(status)
    }

    fn exchange_logged(&mut self) {
        if let Err(err) = self.exchange() {
            warn!("afe exchange failed: {}", err);
        }
    }
}
