//! We use this mocking module in unit tests to emulate an E3631 on a serial port.
//!
//! Complete command lines written to the mock are answered by a small model of
//! the instrument. Tests can override individual query replies, inject stale
//! input and drive the handshake lines.

use std::collections::VecDeque;

use crate::{
    transport::SerialLine,
    types::{Milli, Terminal},
};

/// Scripted answer to the next query, overriding the instrument model.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Sent with its terminator.
    Line(String),
    /// Sent without a terminator, as if cut off.
    Truncated(String),
    /// Nothing at all.
    Silent,
}

#[derive(Debug)]
pub enum MockSerialError {
    /// Would block - no data available
    WouldBlock,
    /// Generic simulated error for testing
    SimulatedError,
}

impl core::fmt::Display for MockSerialError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            MockSerialError::WouldBlock => write!(f, "no data available"),
            MockSerialError::SimulatedError => write!(f, "simulated serial error"),
        }
    }
}

impl core::error::Error for MockSerialError {}

impl embedded_io::Error for MockSerialError {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self {
            MockSerialError::WouldBlock => embedded_io::ErrorKind::Other,
            MockSerialError::SimulatedError => embedded_io::ErrorKind::BrokenPipe,
        }
    }
}

/// Behavioural model of the supply, enough to answer our command set.
#[derive(Debug, Clone)]
pub struct Instrument {
    pub version: String,
    pub remote: bool,
    pub power: bool,
    pub terminal: Terminal,
    pub voltage: Milli,
    pub current_limit: Milli,
    /// Added to voltage readbacks, to provoke verification mismatches.
    pub voltage_offset: Milli,
    /// Load resistance used for current measurements.
    pub load_ohms: i32,
}

impl Default for Instrument {
    fn default() -> Self {
        Self {
            version: "1995.0".to_string(),
            remote: false,
            power: false,
            terminal: Terminal::P6V,
            voltage: Milli::ZERO,
            current_limit: Milli::from_thousandths(1000),
            voltage_offset: Milli::ZERO,
            load_ohms: 10,
        }
    }
}

impl Instrument {
    fn measured_voltage(&self) -> Milli {
        if self.power {
            self.voltage
        } else {
            Milli::ZERO
        }
    }

    fn measured_current(&self) -> Milli {
        let amps = self.measured_voltage().thousandths() / self.load_ohms;
        Milli::from_thousandths(amps.min(self.current_limit.thousandths()))
    }

    /// Execute one command line, returning the reply for queries.
    pub fn handle(&mut self, line: &str) -> Option<String> {
        let line = line.trim().to_ascii_uppercase();
        let (header, argument) = match line.split_once(' ') {
            Some((header, argument)) => (header, Some(argument.trim())),
            None => (line.as_str(), None),
        };
        match (header, argument) {
            ("OUTP?", _) => Some(if self.power { "1" } else { "0" }.to_string()),
            ("OUTP", Some(state)) => {
                self.power = matches!(state, "ON" | "1");
                None
            }
            ("SOUR:VOLT:IMM?" | "VOLT?", _) => {
                let readback = self.voltage.thousandths() + self.voltage_offset.thousandths();
                Some(Milli::from_thousandths(readback).to_scientific())
            }
            ("VOLT", Some(value)) => {
                self.voltage = value.parse().ok()?;
                None
            }
            ("CURR?", _) => Some(self.current_limit.to_scientific()),
            ("CURR", Some(value)) => {
                self.current_limit = value.parse().ok()?;
                None
            }
            ("MEAS?" | "MEAS:VOLT?", _) => Some(self.measured_voltage().to_scientific()),
            ("MEAS:CURR?", _) => Some(self.measured_current().to_scientific()),
            ("SYST:VERS?", _) => Some(self.version.clone()),
            ("SYST:REM", _) => {
                self.remote = true;
                None
            }
            ("INST?", _) => Some(self.terminal.to_string()),
            ("INST", Some(terminal)) => {
                self.terminal = terminal.parse().ok()?;
                None
            }
            ("APPL?", _) => Some(format!(
                "\"{},{}\"",
                self.voltage.to_scientific(),
                self.current_limit.to_scientific()
            )),
            ("APPL", Some(arguments)) => {
                let mut parts = arguments.split(',');
                self.terminal = parts.next()?.trim().parse().ok()?;
                self.voltage = parts.next()?.trim().parse().ok()?;
                self.current_limit = parts.next()?.trim().parse().ok()?;
                None
            }
            // The real device beeps and queues an error, it never replies.
            _ => None,
        }
    }
}

/// Our mock type used to emulate the instrument's serial port.
pub struct MockSerial {
    /// Every byte written to the mock.
    write_buffer: Vec<u8>,
    /// Partial command line, up to the next terminator.
    pending: Vec<u8>,
    /// Bytes waiting to be read.
    read_buffer: VecDeque<u8>,
    /// Overrides for upcoming query replies.
    script: VecDeque<Reply>,
    /// Complete command lines received.
    commands: Vec<String>,
    pub instrument: Instrument,
    /// Answer every query with silence.
    silent: bool,
    ready: bool,
    busy_polls: usize,
    busy_remaining: usize,
    stuck_busy: bool,
    has_data_polls: usize,
    discards: usize,
    link_present: bool,
    should_error_on_write: bool,
}

impl MockSerial {
    /// Create a new MockSerial with an idle, healthy instrument.
    pub fn new() -> Self {
        Self {
            write_buffer: Vec::new(),
            pending: Vec::new(),
            read_buffer: VecDeque::new(),
            script: VecDeque::new(),
            commands: Vec::new(),
            instrument: Instrument::default(),
            silent: false,
            ready: true,
            busy_polls: 0,
            busy_remaining: 0,
            stuck_busy: false,
            has_data_polls: 0,
            discards: 0,
            link_present: true,
            should_error_on_write: false,
        }
    }

    /// Queue bytes to be read, as if they had arrived unprompted.
    pub fn preload_input(&mut self, data: &[u8]) {
        self.read_buffer.extend(data.iter().copied());
    }

    /// Override the reply to the next unscripted query.
    pub fn script_reply(&mut self, reply: Reply) {
        self.script.push_back(reply);
    }

    pub fn set_silent(&mut self, silent: bool) {
        self.silent = silent;
    }

    pub fn set_ready(&mut self, ready: bool) {
        self.ready = ready;
    }

    /// Report "has data" for this many polls after every command.
    pub fn set_busy_polls(&mut self, polls: usize) {
        self.busy_polls = polls;
    }

    pub fn set_stuck_busy(&mut self, stuck: bool) {
        self.stuck_busy = stuck;
    }

    pub fn set_link_present(&mut self, present: bool) {
        self.link_present = present;
    }

    /// Configure whether write operations should fail with an error
    pub fn set_write_error(&mut self, should_error: bool) {
        self.should_error_on_write = should_error;
    }

    /// Get a reference to the data that was written to this mock serial port
    pub fn written_data(&self) -> &[u8] {
        &self.write_buffer
    }

    /// Complete command lines, terminators stripped.
    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    pub fn count_of(&self, command: &str) -> usize {
        self.commands.iter().filter(|c| c.as_str() == command).count()
    }

    pub fn has_data_polls(&self) -> usize {
        self.has_data_polls
    }

    pub fn discard_count(&self) -> usize {
        self.discards
    }

    fn complete_line(&mut self) {
        let line = String::from_utf8_lossy(&self.pending)
            .trim_end_matches('\r')
            .to_string();
        self.pending.clear();
        self.busy_remaining = self.busy_polls;

        let model_reply = self.instrument.handle(&line);
        if line.contains('?') {
            let reply = if self.silent {
                Reply::Silent
            } else if let Some(scripted) = self.script.pop_front() {
                scripted
            } else {
                model_reply.map_or(Reply::Silent, Reply::Line)
            };
            match reply {
                Reply::Line(text) => {
                    self.read_buffer.extend(text.bytes());
                    self.read_buffer.extend(b"\r\n".iter().copied());
                }
                Reply::Truncated(text) => self.read_buffer.extend(text.bytes()),
                Reply::Silent => {}
            }
        }
        self.commands.push(line);
    }
}

impl embedded_io::ErrorType for MockSerial {
    type Error = MockSerialError;
}

impl embedded_io::Write for MockSerial {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        if self.should_error_on_write {
            return Err(MockSerialError::SimulatedError);
        }
        for &byte in buf {
            self.write_buffer.push(byte);
            match byte {
                // Interrupt: abandon the partial line.
                0x03 => self.pending.clear(),
                b'\n' => self.complete_line(),
                _ => self.pending.push(byte),
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        if self.should_error_on_write {
            return Err(MockSerialError::SimulatedError);
        }
        Ok(())
    }
}

impl embedded_io::Read for MockSerial {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if self.read_buffer.is_empty() {
            return Err(MockSerialError::WouldBlock);
        }
        let mut count = 0;
        while count < buf.len() {
            match self.read_buffer.pop_front() {
                Some(byte) => {
                    buf[count] = byte;
                    count += 1;
                }
                None => break,
            }
        }
        Ok(count)
    }
}

impl SerialLine for MockSerial {
    fn remote_ready(&mut self) -> Result<bool, Self::Error> {
        Ok(self.ready)
    }

    fn remote_has_data(&mut self) -> Result<bool, Self::Error> {
        self.has_data_polls += 1;
        if self.stuck_busy {
            return Ok(true);
        }
        if self.busy_remaining > 0 {
            self.busy_remaining -= 1;
            return Ok(true);
        }
        Ok(false)
    }

    fn discard_buffers(&mut self) -> Result<(), Self::Error> {
        self.discards += 1;
        self.read_buffer.clear();
        Ok(())
    }

    fn link_present(&self) -> bool {
        self.link_present
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_io::{Read, Write};

    fn read_all(mock: &mut MockSerial) -> String {
        let mut out = Vec::new();
        let mut buf = [0u8; 8];
        while let Ok(n) = mock.read(&mut buf) {
            out.extend_from_slice(&buf[..n]);
        }
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn answers_version_query() {
        let mut mock = MockSerial::new();
        mock.write_all(b"SYST:VERS?\r\n").unwrap();
        assert_eq!(read_all(&mut mock), "1995.0\r\n");
        assert_eq!(mock.commands(), &["SYST:VERS?".to_string()]);
    }

    #[test]
    fn writes_get_no_reply() {
        let mut mock = MockSerial::new();
        mock.write_all(b"VOLT 3.300\r\nOUTP ON\r\n").unwrap();
        assert!(mock.read(&mut [0u8; 4]).is_err());
        assert_eq!(mock.instrument.voltage, Milli::from_thousandths(3300));
        assert!(mock.instrument.power);
    }

    #[test]
    fn measurements_follow_output_state() {
        let mut mock = MockSerial::new();
        mock.write_all(b"VOLT 5\r\nMEAS? P6V\r\n").unwrap();
        assert_eq!(read_all(&mut mock), "+0.00000000E+00\r\n");
        mock.write_all(b"OUTP ON\r\nMEAS? P6V\r\nMEAS:CURR? P6V\r\n").unwrap();
        assert_eq!(read_all(&mut mock), "+5.00000000E+00\r\n+5.00000000E-01\r\n");
    }

    #[test]
    fn scripted_replies_take_precedence() {
        let mut mock = MockSerial::new();
        mock.script_reply(Reply::Truncated("+3.3".into()));
        mock.write_all(b"SOUR:VOLT:IMM?\r\n").unwrap();
        assert_eq!(read_all(&mut mock), "+3.3");
        mock.write_all(b"SOUR:VOLT:IMM?\r\n").unwrap();
        assert_eq!(read_all(&mut mock), "+0.00000000E+00\r\n");
    }

    #[test]
    fn interrupt_discards_partial_line() {
        let mut mock = MockSerial::new();
        mock.write_all(b"SYST:VE").unwrap();
        mock.write_all(&[0x03]).unwrap();
        mock.write_all(b"INST?\r\n").unwrap();
        assert_eq!(mock.commands(), &["INST?".to_string()]);
        assert_eq!(read_all(&mut mock), "P6V\r\n");
    }

    #[test]
    fn apply_sets_everything() {
        let mut mock = MockSerial::new();
        mock.write_all(b"APPL P25V,12.000,0.250\r\nAPPL? P25V\r\n").unwrap();
        assert_eq!(mock.instrument.terminal, Terminal::P25V);
        assert_eq!(read_all(&mut mock), "\"+1.20000000E+01,+2.50000000E-01\"\r\n");
    }

    #[test]
    fn errors_describe_themselves() {
        use embedded_io::Error as _;
        assert_eq!(MockSerialError::WouldBlock.to_string(), "no data available");
        assert_eq!(MockSerialError::WouldBlock.kind(), embedded_io::ErrorKind::Other);
        assert_eq!(
            MockSerialError::SimulatedError.kind(),
            embedded_io::ErrorKind::BrokenPipe
        );
    }

    #[test]
    fn write_error_simulation() {
        let mut mock = MockSerial::new();
        mock.set_write_error(true);
        assert!(mock.write(b"OUTP?\r\n").is_err());
        assert!(mock.written_data().is_empty());
    }
}
