#![no_std]

// must be declared first so the logging macros are visible to every module
mod fmt;

pub mod math;
pub mod power;
pub mod time;
