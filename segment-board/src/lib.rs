#![no_std]

// must stay first so the logging macros are visible to every module
mod fmt;

pub mod afe;
pub mod aggregator;
pub mod config;
pub mod limits;
pub mod pack_state;
pub mod sequencer;
pub mod soc_estimator;
pub mod tasks;
