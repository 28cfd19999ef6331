#![allow(dead_code)]

use std::cell::Cell;
use std::rc::Rc;

use ateam_lib_bms::math::interp::InterpolationTable;
use ateam_segment_board::afe::{
    AfeCommand, AfeDriver, AfeError, AfeStatus, AnalogInput, BalancingTarget, Clock, SignalBus,
};
use ateam_segment_board::config::{SequencerConfig, SEQUENCER_CONFIG};
use ateam_segment_board::sequencer::{Sequencer, SequencerState};
use embassy_time::Instant;

pub const CELLS: usize = 4;

// 3.0V -> 0%, 4.2V -> 100%
pub static OCV_TABLE: [(f32, f32); 2] = [(3.0, 0.0), (4.2, 100.0)];

#[derive(Clone, Default)]
pub struct MockClock(Rc<Cell<u64>>);

impl MockClock {
    pub fn advance(&self, ms: u64) {
        self.0.set(self.0.get() + ms);
    }

    pub fn millis(&self) -> u64 {
        self.0.get()
    }

    pub fn instant(&self) -> Instant {
        Instant::from_millis(self.0.get())
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.instant()
    }
}

pub struct MockAfe {
    pub ready: bool,
    pub rail_undervoltage_flags: u32,
    pub series_cell_count: usize,
    pub segment_voltage: f32,
    pub fail_exchanges: bool,
    pub commands: Vec<AfeCommand>,
    pub selected: Vec<usize>,
}

impl MockAfe {
    pub fn healthy() -> Self {
        Self {
            ready: true,
            rail_undervoltage_flags: 0,
            series_cell_count: CELLS,
            segment_voltage: 3.5,
            fail_exchanges: false,
            commands: Vec::new(),
            selected: Vec::new(),
        }
    }

    pub fn last_command(&self) -> AfeCommand {
        *self.commands.last().expect("no afe exchange yet")
    }
}

impl AfeDriver for MockAfe {
    fn read_write(&mut self, command: &AfeCommand) -> Result<AfeStatus, AfeError> {
        self.commands.push(*command);

        if self.fail_exchanges {
            return Err(AfeError::Bus);
        }

        Ok(AfeStatus {
            ready: self.ready,
            rail_undervoltage_flags: self.rail_undervoltage_flags,
            series_cell_count: self.series_cell_count,
        })
    }
}

impl AnalogInput for MockAfe {
    fn segment_voltage(&mut self) -> f32 {
        self.segment_voltage
    }

    fn select_cell(&mut self, cell: usize) {
        self.selected.push(cell);
    }
}

pub struct MockBus {
    pub target: Option<BalancingTarget>,
    pub temperature_c: f32,
    pub consumed_ah: Option<f32>,
}

impl Default for MockBus {
    fn default() -> Self {
        Self { target: None, temperature_c: 25.0, consumed_ah: None }
    }
}

impl SignalBus for MockBus {
    fn balancing_target(&self) -> Option<BalancingTarget> {
        self.target
    }

    fn max_temperature_c(&self) -> f32 {
        self.temperature_c
    }

    fn consumed_ah(&self) -> Option<f32> {
        self.consumed_ah
    }
}

pub type TestSequencer = Sequencer<'static, MockAfe, MockClock, MockBus, CELLS>;

pub fn config() -> SequencerConfig {
    SequencerConfig { series_cells: CELLS, wake_poll_limit: 10, ..SEQUENCER_CONFIG }
}

pub fn sequencer(afe: MockAfe) -> (TestSequencer, MockClock) {
    let clock = MockClock::default();
    let sequencer = Sequencer::new(
        config(),
        afe,
        clock.clone(),
        MockBus::default(),
        InterpolationTable::saturating(&OCV_TABLE),
    );
    (sequencer, clock)
}

/// Runs the init handshake: ready check, settle delay and UV flag read.
pub fn boot(sequencer: &mut TestSequencer, clock: &MockClock) {
    sequencer.slow_tick();
    clock.advance(sequencer.config().init_settle_delay.as_millis());
    sequencer.slow_tick();
}

/// Runs the parasitic calibration scan, feeding `raw[i]` for cell `i`.
pub fn parasitic_scan(sequencer: &mut TestSequencer, clock: &MockClock, raw: [f32; CELLS]) {
    assert_eq!(sequencer.state(), SequencerState::Parasitic);

    sequencer.fast_tick();
    clock.advance(sequencer.config().sample_duration.as_millis());
    sequencer.fast_tick();
    assert_eq!(sequencer.state(), SequencerState::ParasiticMeasurement);

    for cell in (0..CELLS).rev() {
        sequencer.on_conversion_complete(raw[cell]).expect("parasitic conversion rejected");
    }
}

/// Boots to the first Waiting state with zero parasitic corrections.
pub fn boot_to_waiting(sequencer: &mut TestSequencer, clock: &MockClock) {
    boot(sequencer, clock);
    parasitic_scan(sequencer, clock, [0.0; CELLS]);
    assert_eq!(sequencer.state(), SequencerState::Waiting);
}

/// Fast ticks through Waiting until the sequencer moves on.
pub fn run_waiting(sequencer: &mut TestSequencer, clock: &MockClock) {
    for _ in 0..=sequencer.config().waiting_ticks {
        if sequencer.state() != SequencerState::Waiting {
            break;
        }
        clock.advance(1);
        sequencer.fast_tick();
    }
    assert_ne!(sequencer.state(), SequencerState::Waiting);
}

/// Runs one pack sample and cell scan from Sampling, feeding `readings[i]` for cell `i`.
pub fn cell_scan(sequencer: &mut TestSequencer, clock: &MockClock, readings: [f32; CELLS]) {
    assert_eq!(sequencer.state(), SequencerState::Sampling);

    sequencer.fast_tick();
    clock.advance(sequencer.config().sample_duration.as_millis());
    sequencer.fast_tick();
    assert_eq!(sequencer.state(), SequencerState::Holding);

    for cell in (0..CELLS).rev() {
        sequencer.on_conversion_complete(readings[cell]).expect("cell conversion rejected");
    }
}

/// A full measurement cycle from Waiting: countdown, scan and the
/// countdown that aggregates the scan. Ends in Sampling.
pub fn measure(sequencer: &mut TestSequencer, clock: &MockClock, readings: [f32; CELLS]) {
    run_waiting(sequencer, clock);
    cell_scan(sequencer, clock, readings);
    run_waiting(sequencer, clock);
}
