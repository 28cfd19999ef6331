pub mod measurement_task;

pub use measurement_task::{fast_tick_loop, slow_tick_loop, PowerCommand, SharedSequencer};
