//! Daemon configuration.
//!
//! Every field has a default matching the bench setup the daemon was written
//! for, so an empty file (or no file) is a valid configuration.

use core::time::Duration;
use std::path::Path;

use fugit::MillisDurationU32;
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    types::{Milli, Terminal},
};

/// Port value that asks the daemon to search every port for the supply.
pub const AUTO_PORT: &str = "auto";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Serial device path, or `auto`.
    pub port: String,
    pub baud_rate: u32,
    /// How often the command queue is polled.
    pub command_interval_ms: u32,
    /// How often the state mirror is refreshed.
    pub update_interval_ms: u32,
    pub terminal: Terminal,
    pub default_voltage: Milli,
    pub default_current_limit: Milli,
    /// Consecutive failures after which the control loop gives up.
    pub failure_threshold: u32,
    pub timing: Timing,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
            command_interval_ms: 200,
            update_interval_ms: 500,
            terminal: Terminal::P25V,
            default_voltage: Milli::from_thousandths(2500),
            default_current_limit: Milli::from_thousandths(100),
            failure_threshold: 3,
            timing: Timing::default(),
        }
    }
}

impl Config {
    /// Read a YAML configuration file and validate it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.command_interval_ms == 0 || self.update_interval_ms == 0 {
            return Err(Error::Config("poll intervals must be non-zero".into()));
        }
        if self.failure_threshold == 0 {
            return Err(Error::Config("failure_threshold must be at least 1".into()));
        }
        self.timing.validate()
    }

    pub fn command_interval(&self) -> MillisDurationU32 {
        MillisDurationU32::millis(self.command_interval_ms)
    }

    pub fn update_interval(&self) -> MillisDurationU32 {
        MillisDurationU32::millis(self.update_interval_ms)
    }

    pub fn is_auto_port(&self) -> bool {
        self.port.eq_ignore_ascii_case(AUTO_PORT)
    }
}

/// Transaction timing. These are empirical values for the E3631 and are all tunable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timing {
    /// Per-attempt wait for a reply line. Has to be over 300 ms on real hardware.
    pub read_timeout_ms: u32,
    /// Pause after write-only commands; DSR is not trustworthy right after them.
    pub settle_delay_ms: u32,
    /// How long a resync waits for the device to signal ready.
    pub resync_timeout_ms: u32,
    /// Sleep between handshake polls.
    pub poll_interval_ms: u32,
    /// Attempts per query transaction.
    pub attempts: u32,
    /// Bound on handshake polls while waiting for the reply flag to clear.
    pub handshake_polls: u32,
    /// Window within which two timers are reported as firing together.
    pub tolerance_ms: u32,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            read_timeout_ms: 500,
            settle_delay_ms: 300,
            resync_timeout_ms: 1000,
            poll_interval_ms: 1,
            attempts: 3,
            handshake_polls: 1000,
            tolerance_ms: 10,
        }
    }
}

impl Timing {
    pub fn validate(&self) -> Result<()> {
        if self.attempts == 0 {
            return Err(Error::Config("timing.attempts must be at least 1".into()));
        }
        if self.handshake_polls == 0 {
            return Err(Error::Config("timing.handshake_polls must be at least 1".into()));
        }
        Ok(())
    }

    pub fn read_timeout(&self) -> MillisDurationU32 {
        MillisDurationU32::millis(self.read_timeout_ms)
    }

    pub fn settle_delay(&self) -> MillisDurationU32 {
        MillisDurationU32::millis(self.settle_delay_ms)
    }

    pub fn resync_timeout(&self) -> MillisDurationU32 {
        MillisDurationU32::millis(self.resync_timeout_ms)
    }

    pub fn poll_interval(&self) -> MillisDurationU32 {
        MillisDurationU32::millis(self.poll_interval_ms)
    }

    pub fn tolerance(&self) -> MillisDurationU32 {
        MillisDurationU32::millis(self.tolerance_ms)
    }
}

/// Convert a fugit duration into a std one for sleeping and `Instant` maths.
pub fn to_std(duration: MillisDurationU32) -> Duration {
    Duration::from_millis(u64::from(duration.to_millis()))
}
