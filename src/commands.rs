//! This module defines the SCPI commands we send to the E3631.
//!
//! Short forms are used throughout; the instrument accepts either.

use core::fmt;

use crate::types::{Milli, State, Terminal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scpi {
    /// __Q__ - Output state, replies `0` or `1`.
    OutputQuery,
    /// __W__ - Enable/disable the outputs.
    Output(State),
    /// __Q__ - Voltage set point of the selected terminal.
    VoltageQuery,
    /// __W__ - Voltage set point of the selected terminal.
    Voltage(Milli),
    /// __Q__ - Current limit of the selected terminal.
    CurrentQuery,
    /// __W__ - Current limit of the selected terminal.
    Current(Milli),
    /// __Q__ - Measured DC voltage at a terminal.
    MeasureVoltage(Terminal),
    /// __Q__ - Measured DC current at a terminal.
    MeasureCurrent(Terminal),
    /// __Q__ - SCPI version, `yyyy.v`.
    VersionQuery,
    /// __W__ - Place the instrument in remote mode.
    Remote,
    /// __W__ - Select the terminal that following commands apply to.
    Select(Terminal),
    /// __Q__ - Currently selected terminal.
    SelectQuery,
    /// __W__ - Set voltage and current of a terminal in one go.
    Apply(Terminal, Milli, Milli),
    /// __Q__ - Voltage and current set points of a terminal.
    ApplyQuery(Terminal),
}

impl fmt::Display for Scpi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scpi::OutputQuery => f.write_str("OUTP?"),
            Scpi::Output(state) => write!(f, "OUTP {state}"),
            Scpi::VoltageQuery => f.write_str("SOUR:VOLT:IMM?"),
            Scpi::Voltage(volts) => write!(f, "VOLT {volts}"),
            Scpi::CurrentQuery => f.write_str("CURR?"),
            Scpi::Current(amps) => write!(f, "CURR {amps}"),
            Scpi::MeasureVoltage(terminal) => write!(f, "MEAS? {terminal}"),
            Scpi::MeasureCurrent(terminal) => write!(f, "MEAS:CURR? {terminal}"),
            Scpi::VersionQuery => f.write_str("SYST:VERS?"),
            Scpi::Remote => f.write_str("SYST:REM"),
            Scpi::Select(terminal) => write!(f, "INST {terminal}"),
            Scpi::SelectQuery => f.write_str("INST?"),
            Scpi::Apply(terminal, volts, amps) => write!(f, "APPL {terminal},{volts},{amps}"),
            Scpi::ApplyQuery(terminal) => write!(f, "APPL? {terminal}"),
        }
    }
}
