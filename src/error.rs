//! Our error types for the E3631 daemon.

use core::time::Duration;

use thiserror::Error;

use crate::types::CommandKind;

pub type Result<T> = core::result::Result<T, Error>;

/// Every failure the engine, the control loop or a collaborator can report.
///
/// Transport problems are classified here by the protocol engine, so the
/// control loop only ever matches on these variants.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("serial read timeout after {elapsed:?} waiting for reply to `{command}`")]
    ReadTimeout { command: String, elapsed: Duration },
    #[error("device not responding to `{command}`, handshake did not settle within {elapsed:?}")]
    DeviceNotResponding { command: String, elapsed: Duration },
    #[error("unrecognized device, `{response}` is not a firmware version")]
    UnrecognizedDevice { response: String },
    #[error("initialization failed: {what} set to `{expected}` but device reports `{actual}`")]
    InitializationFailed {
        what: &'static str,
        expected: String,
        actual: String,
    },
    #[error("serial link lost, `{path}` no longer exists")]
    LinkLost { path: String },
    #[error("storage failure: {0}")]
    StorageFailure(String),
    #[error("serial communication error: {0:?}")]
    Serial(embedded_io::ErrorKind),
    #[error("invalid response `{response}` to `{command}`")]
    InvalidResponse { command: String, response: String },
    #[error("invalid value `{value}` for {kind}")]
    InvalidValue { kind: CommandKind, value: String },
    #[error("reply exceeded the {0} byte line buffer")]
    BufferOverflow(usize),
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether the link itself is suspect, i.e. worth checking the device path.
    pub(crate) fn is_link_symptom(&self) -> bool {
        matches!(
            self,
            Error::ReadTimeout { .. } | Error::DeviceNotResponding { .. } | Error::Serial(_)
        )
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Config(err.to_string())
    }
}
