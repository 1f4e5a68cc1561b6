//! [SerialLine] over a host serial port, and probing for the supply.

use core::time::Duration;
use std::path::Path;

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use tracing::{debug, info};

use crate::{
    config::Timing,
    error::{Error, Result},
    psu::{E3631, is_firmware_version},
    transport::SerialLine,
    types::Terminal,
};

/// Blocking read granularity. Whole-line timeouts are handled by the transport.
const READ_POLL: Duration = Duration::from_millis(10);

/// Per-port reply timeout while probing.
const PROBE_TIMEOUT_MS: u32 = 300;

#[derive(Debug)]
pub struct IoError(std::io::Error);

impl core::fmt::Display for IoError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for IoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}

impl embedded_io::Error for IoError {
    fn kind(&self) -> embedded_io::ErrorKind {
        io_kind(self.0.kind())
    }
}

fn io_kind(kind: std::io::ErrorKind) -> embedded_io::ErrorKind {
    use embedded_io::ErrorKind as E;
    use std::io::ErrorKind as Io;
    match kind {
        Io::NotFound => E::NotFound,
        Io::PermissionDenied => E::PermissionDenied,
        Io::NotConnected => E::NotConnected,
        Io::BrokenPipe => E::BrokenPipe,
        Io::AlreadyExists => E::AlreadyExists,
        Io::InvalidInput => E::InvalidInput,
        Io::InvalidData => E::InvalidData,
        Io::TimedOut => E::TimedOut,
        Io::Interrupted => E::Interrupted,
        Io::Unsupported => E::Unsupported,
        Io::OutOfMemory => E::OutOfMemory,
        // A port with nothing to read is "no data yet", same as a timeout.
        Io::WouldBlock => E::TimedOut,
        _ => E::Other,
    }
}

fn open_error(path: &str, err: serialport::Error) -> Error {
    match err.kind() {
        serialport::ErrorKind::NoDevice
        | serialport::ErrorKind::Io(std::io::ErrorKind::NotFound) => Error::LinkLost {
            path: path.to_string(),
        },
        serialport::ErrorKind::Io(kind) => Error::Serial(io_kind(kind)),
        serialport::ErrorKind::InvalidInput => Error::Serial(embedded_io::ErrorKind::InvalidInput),
        serialport::ErrorKind::Unknown => Error::Serial(embedded_io::ErrorKind::Other),
    }
}

/// A host serial port wired to the E3631: 8 data bits, no parity, 2 stop bits,
/// DTR asserted, DSR read as "ready" and CTS as "has data".
pub struct SerialPortLine {
    port: Box<dyn SerialPort>,
    path: String,
}

impl SerialPortLine {
    pub fn open(path: &str, baud_rate: u32) -> Result<Self> {
        let mut port = serialport::new(path, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::Two)
            .flow_control(FlowControl::None)
            .timeout(READ_POLL)
            .open()
            .map_err(|e| open_error(path, e))?;
        port.write_data_terminal_ready(true)
            .map_err(|e| open_error(path, e))?;
        debug!(path, baud_rate, "serial port open");
        Ok(Self {
            port,
            path: path.to_string(),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl embedded_io::ErrorType for SerialPortLine {
    type Error = IoError;
}

impl embedded_io::Read for SerialPortLine {
    fn read(&mut self, buf: &mut [u8]) -> core::result::Result<usize, Self::Error> {
        std::io::Read::read(&mut self.port, buf).map_err(IoError)
    }
}

impl embedded_io::Write for SerialPortLine {
    fn write(&mut self, buf: &[u8]) -> core::result::Result<usize, Self::Error> {
        std::io::Write::write(&mut self.port, buf).map_err(IoError)
    }

    fn flush(&mut self) -> core::result::Result<(), Self::Error> {
        std::io::Write::flush(&mut self.port).map_err(IoError)
    }
}

impl SerialLine for SerialPortLine {
    fn remote_ready(&mut self) -> core::result::Result<bool, Self::Error> {
        self.port
            .read_data_set_ready()
            .map_err(|e| IoError(e.into()))
    }

    fn remote_has_data(&mut self) -> core::result::Result<bool, Self::Error> {
        self.port
            .read_clear_to_send()
            .map_err(|e| IoError(e.into()))
    }

    fn discard_buffers(&mut self) -> core::result::Result<(), Self::Error> {
        self.port
            .clear(ClearBuffer::All)
            .map_err(|e| IoError(e.into()))
    }

    fn link_present(&self) -> bool {
        // Only device nodes can vanish; other platforms name ports differently.
        !cfg!(unix) || Path::new(&self.path).exists()
    }

    fn name(&self) -> &str {
        &self.path
    }
}

/// Probe every serial port for an E3631 and return the first one that answers
/// `SYST:VERS?` with a firmware version.
pub fn find_device(baud_rate: u32) -> Option<String> {
    let ports = match serialport::available_ports() {
        Ok(ports) => ports,
        Err(err) => {
            debug!(error = %err, "cannot enumerate serial ports");
            return None;
        }
    };
    let timing = Timing {
        read_timeout_ms: PROBE_TIMEOUT_MS,
        attempts: 1,
        ..Timing::default()
    };
    for info in ports {
        let path = info.port_name;
        let line = match SerialPortLine::open(&path, baud_rate) {
            Ok(line) => line,
            Err(err) => {
                debug!(%path, error = %err, "skipping port");
                continue;
            }
        };
        let mut psu: E3631<SerialPortLine> = E3631::new(line, Terminal::P25V, timing.clone());
        match psu.version() {
            Ok(version) if is_firmware_version(&version) => {
                info!(%path, %version, "found E3631");
                return Some(path);
            }
            Ok(reply) => debug!(%path, %reply, "not an E3631"),
            Err(err) => debug!(%path, error = %err, "no answer"),
        }
    }
    None
}
