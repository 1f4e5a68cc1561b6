use std::{thread, time::Instant};

use tracing::{debug, info, warn};

use crate::{
    commands::Scpi,
    config::{Config, Timing, to_std},
    error::{Error, Result},
    trace::{TransactionLog, TransactionRecord},
    transport::{SerialLine, Transport},
    types::{DeviceState, Milli, State, Terminal},
};

/// Read-only measurement capability of a supply.
pub trait Measurements {
    /// Measured output voltage.
    fn voltage(&mut self) -> Result<Milli>;
    /// Measured output current.
    fn current(&mut self) -> Result<Milli>;
}

/// Whether `reply` looks like the E3631's `yyyy.x` SCPI version string.
pub fn is_firmware_version(reply: &str) -> bool {
    let bytes = reply.trim().as_bytes();
    bytes.len() >= 6
        && bytes[..4].iter().all(u8::is_ascii_digit)
        && bytes[4] == b'.'
        && bytes[5].is_ascii_digit()
}

/// You can create an E3631 using any [SerialLine], i.e. any interface which
/// implements [embedded_io::Read] & [embedded_io::Write] and can report the
/// two handshake lines.
///
/// Methods follow the device's own vocabulary: a "setting" is a configured set
/// point and is read back after every write, while "measured" values come
/// from the output stage. Every call is one or two transactions on the wire;
/// nothing is cached.
pub struct E3631<S: SerialLine, const L: usize = 128> {
    transport: Transport<S, L>,
    /// Output that measurements are taken from.
    terminal: Terminal,
    timing: Timing,
    log: TransactionLog,
}

impl<S: SerialLine, const L: usize> E3631<S, L> {
    /// Wrap a line without talking to the device. See [Self::connect].
    pub fn new(line: S, terminal: Terminal, timing: Timing) -> Self {
        Self {
            transport: Transport::new(line, to_std(timing.poll_interval())),
            terminal,
            timing,
            log: TransactionLog::new(),
        }
    }

    /// Open a session: identify the device and put it in the configured default state.
    pub fn connect(line: S, config: &Config) -> Result<Self> {
        let mut psu = Self::new(line, config.terminal, config.timing.clone());
        psu.initialize(config.default_voltage, config.default_current_limit)?;
        Ok(psu)
    }

    /// Run the connect sequence on an existing session.
    ///
    /// Every set point is read back; any mismatch is an
    /// [Error::InitializationFailed] and the session should be dropped.
    pub fn initialize(&mut self, voltage: Milli, current_limit: Milli) -> Result<()> {
        info!(port = self.transport.name(), "connecting to E3631");
        self.transport
            .discard_and_resync(to_std(self.timing.resync_timeout()))
            .map_err(|e| self.classify(e))?;

        let version = self.version()?;
        if !is_firmware_version(&version) {
            return Err(Error::UnrecognizedDevice { response: version });
        }
        info!(%version, "device identified");

        self.set_remote()?;

        let wanted = self.terminal;
        let selected = self.select_terminal(wanted)?;
        if selected != wanted {
            return Err(Error::InitializationFailed {
                what: "terminal",
                expected: wanted.to_string(),
                actual: selected.to_string(),
            });
        }

        let readback = self.set_voltage(voltage)?;
        if readback != voltage {
            return Err(Error::InitializationFailed {
                what: "voltage",
                expected: voltage.to_string(),
                actual: readback.to_string(),
            });
        }

        let readback = self.set_current_limit(current_limit)?;
        if readback != current_limit {
            return Err(Error::InitializationFailed {
                what: "current limit",
                expected: current_limit.to_string(),
                actual: readback.to_string(),
            });
        }

        info!(terminal = %wanted, %voltage, %current_limit, "initialized");
        Ok(())
    }

    /// Read whether the outputs are enabled.
    pub fn power(&mut self) -> Result<bool> {
        let reply = self.transact(Scpi::OutputQuery)?;
        match reply.trim().parse::<State>() {
            Ok(state) => Ok(state.into()),
            Err(_) => Err(invalid_response(Scpi::OutputQuery, reply)),
        }
    }

    /// Enable/disable the outputs. Returns the state read back afterwards.
    pub fn set_power(&mut self, on: bool) -> Result<bool> {
        self.write_command(Scpi::Output(State::from(on)))?;
        self.power()
    }

    /// Get the voltage setting of the selected terminal.
    pub fn voltage(&mut self) -> Result<Milli> {
        self.query_milli(Scpi::VoltageQuery)
    }

    /// Set the voltage of the selected terminal. Returns the setting read back afterwards.
    pub fn set_voltage(&mut self, volts: Milli) -> Result<Milli> {
        self.write_command(Scpi::Voltage(volts))?;
        self.voltage()
    }

    /// Get the current limit of the selected terminal.
    pub fn current_limit(&mut self) -> Result<Milli> {
        self.query_milli(Scpi::CurrentQuery)
    }

    /// Set the current limit of the selected terminal. Returns the limit read back afterwards.
    pub fn set_current_limit(&mut self, amps: Milli) -> Result<Milli> {
        self.write_command(Scpi::Current(amps))?;
        self.current_limit()
    }

    /// Return the measured output voltage.
    pub fn measured_voltage(&mut self) -> Result<Milli> {
        self.query_milli(Scpi::MeasureVoltage(self.terminal))
    }

    /// Return the measured output current.
    pub fn measured_current(&mut self) -> Result<Milli> {
        self.query_milli(Scpi::MeasureCurrent(self.terminal))
    }

    /// Read the SCPI version string, e.g. `1995.0`.
    pub fn version(&mut self) -> Result<String> {
        Ok(self.transact(Scpi::VersionQuery)?.trim().to_string())
    }

    /// Switch the instrument to remote operation. The front panel locks out.
    pub fn set_remote(&mut self) -> Result<()> {
        self.write_command(Scpi::Remote)
    }

    /// Select the terminal that settings apply to, returning the selection read back.
    pub fn select_terminal(&mut self, terminal: Terminal) -> Result<Terminal> {
        self.write_command(Scpi::Select(terminal))?;
        self.terminal = terminal;
        self.selected_terminal()
    }

    pub fn selected_terminal(&mut self) -> Result<Terminal> {
        let reply = self.transact(Scpi::SelectQuery)?;
        match reply.trim().trim_matches('"').parse() {
            Ok(terminal) => Ok(terminal),
            Err(_) => Err(invalid_response(Scpi::SelectQuery, reply)),
        }
    }

    /// Set voltage and current limit of a terminal in one command.
    ///
    /// This also selects `terminal` on the device.
    pub fn apply(&mut self, terminal: Terminal, volts: Milli, amps: Milli) -> Result<()> {
        self.write_command(Scpi::Apply(terminal, volts, amps))?;
        self.terminal = terminal;
        Ok(())
    }

    /// Read the voltage and current settings of a terminal.
    pub fn applied(&mut self, terminal: Terminal) -> Result<(Milli, Milli)> {
        let command = Scpi::ApplyQuery(terminal);
        let reply = self.transact(command)?;
        let parsed = reply
            .trim()
            .trim_matches('"')
            .split_once(',')
            .and_then(|(v, i)| Some((v.parse().ok()?, i.parse().ok()?)));
        parsed.ok_or_else(|| invalid_response(command, reply))
    }

    /// Read a full snapshot of the supply, one transaction per field.
    pub fn state(&mut self) -> Result<DeviceState> {
        Ok(DeviceState {
            power: self.power()?,
            voltage_setting: self.voltage()?,
            current_limit: self.current_limit()?,
            measured_voltage: self.measured_voltage()?,
            measured_current: self.measured_current()?,
        })
    }

    /// Recent transactions, oldest first.
    pub fn transactions(&self) -> &TransactionLog {
        &self.log
    }

    pub fn terminal(&self) -> Terminal {
        self.terminal
    }

    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    pub fn line(&self) -> &S {
        self.transport.line()
    }

    pub fn line_mut(&mut self) -> &mut S {
        self.transport.line_mut()
    }

    pub fn into_inner(self) -> S {
        self.transport.into_inner()
    }

    /// Send a query and return its reply line.
    ///
    /// Stale input is dropped before every attempt. Read timeouts are retried
    /// within the attempt budget, a handshake that never settles only once.
    pub fn transact(&mut self, command: Scpi) -> Result<String> {
        let text = command.to_string();
        let started = Instant::now();
        let result = self.transact_with_retries(&text);
        let elapsed = started.elapsed();
        self.log.push(TransactionRecord {
            elapsed,
            command: text.clone(),
            response: result.as_ref().ok().cloned(),
        });
        match result {
            Ok(reply) => {
                debug!(command = %text, %reply, ?elapsed, "transaction");
                Ok(reply)
            }
            Err(err) => Err(self.classify(err)),
        }
    }

    /// Send a command that gets no reply, then give the device time to settle.
    pub fn write_command(&mut self, command: Scpi) -> Result<()> {
        let text = command.to_string();
        let started = Instant::now();
        let result = self
            .transport
            .discard()
            .and_then(|_| self.transport.write(&text));
        self.log.push(TransactionRecord {
            elapsed: started.elapsed(),
            command: text.clone(),
            response: None,
        });
        result.map_err(|e| self.classify(e))?;
        debug!(command = %text, "write");

        // DSR cannot be trusted right after a state change.
        let settle = to_std(self.timing.settle_delay());
        if !settle.is_zero() {
            thread::sleep(settle);
        }
        Ok(())
    }

    fn transact_with_retries(&mut self, command: &str) -> Result<String> {
        let mut handshake_retried = false;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match self.attempt(command) {
                Ok(reply) => return Ok(reply),
                Err(err) => err,
            };
            let retryable = match err {
                Error::ReadTimeout { .. } => true,
                Error::DeviceNotResponding { .. } => !core::mem::replace(&mut handshake_retried, true),
                _ => false,
            };
            if !retryable || attempt >= self.timing.attempts || !self.transport.link_present() {
                return Err(err);
            }
            warn!(command, attempt, error = %err, "transaction failed, retrying");
        }
    }

    fn attempt(&mut self, command: &str) -> Result<String> {
        self.transport.discard()?;
        self.transport.write(command)?;
        self.transport
            .wait_while_has_data(command, self.timing.handshake_polls)?;
        self.transport
            .read_line(command, to_std(self.timing.read_timeout()))
    }

    fn query_milli(&mut self, command: Scpi) -> Result<Milli> {
        let reply = self.transact(command)?;
        match reply.parse() {
            Ok(value) => Ok(value),
            Err(_) => Err(invalid_response(command, reply)),
        }
    }

    /// A timeout on a vanished device node is a lost link, not a slow device.
    fn classify(&self, err: Error) -> Error {
        if err.is_link_symptom() && !self.transport.link_present() {
            Error::LinkLost {
                path: self.transport.name().to_string(),
            }
        } else {
            err
        }
    }
}

impl<S: SerialLine, const L: usize> Measurements for E3631<S, L> {
    fn voltage(&mut self) -> Result<Milli> {
        self.measured_voltage()
    }

    fn current(&mut self) -> Result<Milli> {
        self.measured_current()
    }
}

fn invalid_response(command: Scpi, response: String) -> Error {
    Error::InvalidResponse {
        command: command.to_string(),
        response,
    }
}
