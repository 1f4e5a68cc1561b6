//! Line discipline and handshake access for the instrument's serial port.
//!
//! The E3631 speaks CR+LF terminated ASCII lines and uses DTR/DSR style
//! handshaking. [`SerialLine`] is what a port has to offer on top of plain
//! byte I/O; [`Transport`] turns that into whole lines.

use core::time::Duration;
use std::{thread, time::Instant};

use embedded_io::Error as _;
use tracing::trace;

use crate::error::{Error, Result};

/// Line terminator used by the E3631 in both directions.
pub const TERMINATOR: &[u8] = b"\r\n";

/// Makes the device drop whatever reply it was in the middle of.
const INTERRUPT: u8 = 0x03;

/// A serial port with the two handshake inputs wired to the instrument.
///
/// Any interface which implements [embedded_io::Read] & [embedded_io::Write]
/// can be used, given it can also report the handshake lines.
pub trait SerialLine: embedded_io::Read + embedded_io::Write {
    /// "Remote ready to send" (RRTS): the device is ready to take a command.
    fn remote_ready(&mut self) -> core::result::Result<bool, Self::Error>;

    /// "Remote has data" (RHD): the device believes it still owes a reply.
    fn remote_has_data(&mut self) -> core::result::Result<bool, Self::Error>;

    /// Drop anything sitting in the OS input and output buffers.
    fn discard_buffers(&mut self) -> core::result::Result<(), Self::Error>;

    /// Whether the device node behind this line still exists.
    fn link_present(&self) -> bool;

    /// Device path, for diagnostics.
    fn name(&self) -> &str;
}

/// Owns the line and frames traffic to and from the instrument.
///
/// `L` is the capacity of the receive line buffer.
pub struct Transport<S: SerialLine, const L: usize = 128> {
    line: S,
    poll_interval: Duration,
}

impl<S: SerialLine, const L: usize> Transport<S, L> {
    pub fn new(line: S, poll_interval: Duration) -> Self {
        Self {
            line,
            poll_interval,
        }
    }

    pub fn line(&self) -> &S {
        &self.line
    }

    pub fn line_mut(&mut self) -> &mut S {
        &mut self.line
    }

    pub fn into_inner(self) -> S {
        self.line
    }

    pub fn link_present(&self) -> bool {
        self.line.link_present()
    }

    pub fn name(&self) -> &str {
        self.line.name()
    }

    /// Send one command line. The terminator is appended here.
    pub fn write(&mut self, command: &str) -> Result<()> {
        trace!(command, "tx");
        self.line
            .write_all(command.as_bytes())
            .map_err(|e| self.serial_error(e))?;
        self.line
            .write_all(TERMINATOR)
            .map_err(|e| self.serial_error(e))?;
        self.line.flush().map_err(|e| self.serial_error(e))
    }

    /// Read one line, waiting at most `timeout` for its terminator.
    ///
    /// The returned text has the terminator stripped. `command` is only used
    /// to give a timeout some context.
    pub fn read_line(&mut self, command: &str, timeout: Duration) -> Result<String> {
        let started = Instant::now();
        let mut buff: heapless::Vec<u8, L> = heapless::Vec::new();
        // Byte at a time, so nothing past the terminator is consumed.
        let mut byte = [0u8; 1];
        loop {
            match self.line.read(&mut byte) {
                Ok(0) => {}
                Ok(_) => {
                    if buff.push(byte[0]).is_err() {
                        return Err(Error::BufferOverflow(L));
                    }
                    if buff.ends_with(b"\n") {
                        let text = String::from_utf8_lossy(&buff);
                        let text = text.trim_end_matches(['\r', '\n']).to_string();
                        trace!(command, reply = %text, "rx");
                        return Ok(text);
                    }
                    continue;
                }
                // Serial ports report an expired read timeout, the mock reports
                // an empty buffer; either way there is just nothing yet.
                Err(e)
                    if matches!(
                        e.kind(),
                        embedded_io::ErrorKind::TimedOut
                            | embedded_io::ErrorKind::Interrupted
                            | embedded_io::ErrorKind::Other
                    ) => {}
                Err(e) => return Err(self.serial_error(e)),
            }

            let elapsed = started.elapsed();
            if elapsed >= timeout {
                if !buff.is_empty() {
                    trace!(command, partial = %String::from_utf8_lossy(&buff), "unterminated reply");
                }
                return Err(Error::ReadTimeout {
                    command: command.to_string(),
                    elapsed,
                });
            }
            thread::sleep(self.poll_interval.min(timeout - elapsed));
        }
    }

    /// Throw away stale input, e.g. a late reply to an earlier command.
    pub fn discard(&mut self) -> Result<()> {
        self.line.discard_buffers().map_err(|e| self.serial_error(e))
    }

    /// Clear both directions, interrupt any reply in progress and wait for
    /// the device to signal it is ready again.
    pub fn discard_and_resync(&mut self, timeout: Duration) -> Result<()> {
        self.discard()?;
        self.line
            .write_all(&[INTERRUPT])
            .map_err(|e| self.serial_error(e))?;
        self.line.flush().map_err(|e| self.serial_error(e))?;

        let started = Instant::now();
        loop {
            if self.line.remote_ready().map_err(|e| self.serial_error(e))? {
                return Ok(());
            }
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                return Err(Error::DeviceNotResponding {
                    command: "<resync>".to_string(),
                    elapsed,
                });
            }
            thread::sleep(self.poll_interval.min(timeout - elapsed));
        }
    }

    /// Poll until the "has data" flag drops, at most `max_polls` times.
    ///
    /// Asserted RHD means the device still considers a reply pending; reading
    /// before it clears tends to pick up the previous reply.
    pub fn wait_while_has_data(&mut self, command: &str, max_polls: u32) -> Result<()> {
        let started = Instant::now();
        for _ in 0..max_polls {
            if !self.line.remote_has_data().map_err(|e| self.serial_error(e))? {
                return Ok(());
            }
            thread::sleep(self.poll_interval);
        }
        Err(Error::DeviceNotResponding {
            command: command.to_string(),
            elapsed: started.elapsed(),
        })
    }

    fn serial_error(&self, err: S::Error) -> Error {
        if self.line.link_present() {
            Error::Serial(err.kind())
        } else {
            Error::LinkLost {
                path: self.line.name().to_string(),
            }
        }
    }
}
