use core::cell::{Cell, RefCell};

use embassy_futures::select::{select, Either};
use embassy_sync::{blocking_mutex::{raw::CriticalSectionRawMutex, Mutex}, signal::Signal};
use embassy_time::Ticker;

use crate::afe::{AfeDriver, AnalogInput, Clock, SignalBus};
use crate::config::{FAST_TICK_PERIOD, SLOW_TICK_PERIOD};
use crate::pack_state::PackState;
use crate::sequencer::{Sequencer, SequencerError, SequencerState};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerCommand {
    Sleep,
    Wake,
}

/// Single owner of the sequencer. Both tick loops and the AFE conversion
/// interrupt go through here; every entry point runs inside a critical
/// section so the interrupt can never land in the middle of a tick.
pub struct SharedSequencer<'a, A, C, B, const CELLS: usize>
where
    A: AfeDriver + AnalogInput,
    C: Clock,
    B: SignalBus,
{
    sequencer: Mutex<CriticalSectionRawMutex, RefCell<Sequencer<'a, A, C, B, CELLS>>>,
    // latest unhandled power command, the signal only wakes the fast loop
    power_command: Mutex<CriticalSectionRawMutex, Cell<Option<PowerCommand>>>,
    power_command_pending: Signal<CriticalSectionRawMutex, ()>,
}

impl<'a, A, C, B, const CELLS: usize> SharedSequencer<'a, A, C, B, CELLS>
where
    A: AfeDriver + AnalogInput,
    C: Clock,
    B: SignalBus,
{
    pub fn new(sequencer: Sequencer<'a, A, C, B, CELLS>) -> Self {
        Self {
            sequencer: Mutex::new(RefCell::new(sequencer)),
            power_command: Mutex::new(Cell::new(None)),
            power_command_pending: Signal::new(),
        }
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut Sequencer<'a, A, C, B, CELLS>) -> R) -> R {
        self.sequencer.lock(|sequencer| f(&mut sequencer.borrow_mut()))
    }

    pub fn slow_tick(&self) {
        self.with(|sequencer| sequencer.slow_tick());
    }

    pub fn fast_tick(&self) {
        self.with(|sequencer| sequencer.fast_tick());
    }

    /// Called from the AFE conversion complete interrupt.
    pub fn conversion_complete(&self, value: f32) -> Result<(), SequencerError> {
        self.with(|sequencer| sequencer.on_conversion_complete(value))
    }

    pub fn pack(&self) -> PackState<CELLS> {
        self.with(|sequencer| *sequencer.pack())
    }

    pub fn state(&self) -> SequencerState {
        self.with(|sequencer| sequencer.state())
    }

    /// Queue a sleep or wake for the fast tick loop. A newer command
    /// replaces one that has not been handled yet.
    pub fn request(&self, command: PowerCommand) {
        self.power_command.lock(|pending| pending.set(Some(command)));
        self.power_command_pending.signal(());
    }

    pub fn handle_power_command(&self, command: PowerCommand) -> Result<(), SequencerError> {
        match command {
            PowerCommand::Sleep => {
                self.with(|sequencer| sequencer.sleep());
                Ok(())
            }
            PowerCommand::Wake => self.wake(),
        }
    }

    /// Wakes the sequencer with one AFE poll per critical section, so the
    /// conversion interrupt is only masked for a single exchange at a time.
    pub fn wake(&self) -> Result<(), SequencerError> {
        let attempts = self.with(|sequencer| sequencer.config().wake_poll_limit.max(1));
        for _ in 0..attempts {
            if self.with(|sequencer| sequencer.poll_wake()) {
                return Ok(());
            }
        }

        self.with(|sequencer| sequencer.abandon_wake())
    }

    /// Handles a queued power command without waiting for one.
    pub fn poll_power_command(&self) -> Option<Result<(), SequencerError>> {
        self.power_command
            .lock(|pending| pending.take())
            .map(|command| self.handle_power_command(command))
    }
}

pub async fn slow_tick_loop<A, C, B, const CELLS: usize>(shared: &SharedSequencer<'_, A, C, B, CELLS>) -> !
where
    A: AfeDriver + AnalogInput,
    C: Clock,
    B: SignalBus,
{
    let mut ticker = Ticker::every(SLOW_TICK_PERIOD);
    loop {
        shared.slow_tick();
        ticker.next().await;
    }
}

pub async fn fast_tick_loop<A, C, B, const CELLS: usize>(shared: &SharedSequencer<'_, A, C, B, CELLS>) -> !
where
    A: AfeDriver + AnalogInput,
    C: Clock,
    B: SignalBus,
{
    let mut ticker = Ticker::every(FAST_TICK_PERIOD);
    loop {
        match select(ticker.next(), shared.power_command_pending.wait()).await {
            Either::First(_) => shared.fast_tick(),
            Either::Second(()) => {
                if let Some(Err(err)) = shared.poll_power_command() {
                    warn!("power command failed: {}", err);
                }
            }
        }
    }
}
