//! HAL backends.
//!
//! The simulation backend is always compiled and backs both tests and the
//! daemon's `--simulate` mode. The Raspberry Pi backend only exists under
//! the `raspi` feature so the workspace builds on development hosts.

pub mod simulation;

#[cfg(feature = "raspi")]
pub mod raspi;
