//! This crate drives an Agilent E3631 triple-output bench supply over RS-232
//! and runs the polling daemon that exposes it to operators.
//!
//! The supply speaks SCPI: ASCII command lines terminated by CR+LF, one reply
//! line per query and none for settings. Its DTR/DSR handshake is documented
//! but unreliable in practice, so every transaction discards stale input,
//! waits a bounded time on the "has data" line, and retries read timeouts a
//! fixed number of times. See [psu::E3631].
//!
//! [control::Controller] ties the engine to a [storage::Storage] backend: on one
//! timer it executes queued operator commands, on the other it mirrors a full
//! [types::DeviceState] snapshot. After a configured number of consecutive
//! failures it gives up and hands the last error to its caller.
//!
//! The serial port used for PSU comms should be configured like so:
//! * Default baud rate: 9600
//! * Data bits: 8
//! * Stop bits: 2
//! * Parity: None
//! * Flow control: none (DSR/CTS are read by the engine itself)

pub mod commands;
pub mod config;
pub mod control;
pub mod error;
pub mod psu;
pub mod scheduler;
pub mod serial;
pub mod storage;
pub mod trace;
pub mod transport;
pub mod types;

#[cfg(test)]
mod mock_serial;

pub use error::{Error, Result};
