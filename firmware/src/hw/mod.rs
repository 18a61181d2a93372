//! Hardware adapters binding the node-core capability traits to the MCU.

pub mod afe;
pub mod flash;
pub mod rails;
pub mod ticks;
