//! This module contains the value types shared by the engine, the control loop and storage.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};
use thiserror::Error;

/// Exact decimal with three fractional digits, stored as a count of thousandths.
///
/// The E3631 resolves set points to the millivolt / milliamp, and answers
/// queries in engineering notation (`+3.30000000E+00`). Parsing that text into
/// thousandths keeps comparisons against commanded set points exact, which a
/// binary float cannot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Milli(i32);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseMilliError {
    #[error("no digits")]
    Empty,
    #[error("invalid character in decimal")]
    InvalidDigit,
    #[error("invalid exponent")]
    InvalidExponent,
    #[error("value out of range")]
    Overflow,
}

impl Milli {
    pub const ZERO: Milli = Milli(0);

    pub const fn from_thousandths(thousandths: i32) -> Self {
        Self(thousandths)
    }

    pub const fn thousandths(&self) -> i32 {
        self.0
    }

    /// Render as the instrument does, e.g. `+3.30000000E+00`.
    pub fn to_scientific(&self) -> String {
        let sign = if self.0 < 0 { '-' } else { '+' };
        if self.0 == 0 {
            return "+0.00000000E+00".to_string();
        }
        let digits = self.0.unsigned_abs().to_string();
        let exponent = digits.len() as i32 - 1 - 3;
        let mut mantissa = String::with_capacity(10);
        mantissa.push_str(&digits[..1]);
        mantissa.push('.');
        mantissa.push_str(&digits[1..]);
        while mantissa.len() < 10 {
            mantissa.push('0');
        }
        let exponent_sign = if exponent < 0 { '-' } else { '+' };
        format!("{sign}{mantissa}E{exponent_sign}{:02}", exponent.abs())
    }
}

impl fmt::Display for Milli {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let magnitude = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:03}", magnitude / 1000, magnitude % 1000)
    }
}

impl FromStr for Milli {
    type Err = ParseMilliError;

    /// Parses plain (`3.3`, `-0.05`) and engineering (`+3.30000000E+00`) notation,
    /// rounding half away from zero at the third decimal place.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (negative, unsigned) = match s.as_bytes().first() {
            Some(b'-') => (true, &s[1..]),
            Some(b'+') => (false, &s[1..]),
            _ => (false, s),
        };
        let (mantissa, exponent) = match unsigned.find(['e', 'E']) {
            Some(idx) => {
                let exponent = unsigned[idx + 1..]
                    .parse::<i32>()
                    .map_err(|_| ParseMilliError::InvalidExponent)?;
                (&unsigned[..idx], exponent)
            }
            None => (unsigned, 0),
        };

        let (whole, fraction) = mantissa.split_once('.').unwrap_or((mantissa, ""));
        if whole.is_empty() && fraction.is_empty() {
            return Err(ParseMilliError::Empty);
        }
        let mut digits: Vec<u8> = Vec::with_capacity(whole.len() + fraction.len());
        for c in whole.bytes().chain(fraction.bytes()) {
            if !c.is_ascii_digit() {
                return Err(ParseMilliError::InvalidDigit);
            }
            digits.push(c - b'0');
        }

        // value = digits * 10^(exponent - fraction.len()); we want thousandths.
        let shift = i64::from(exponent) - fraction.len() as i64 + 3;
        let mut value: u64 = 0;
        if shift >= 0 {
            for &d in &digits {
                value = value
                    .checked_mul(10)
                    .and_then(|v| v.checked_add(u64::from(d)))
                    .ok_or(ParseMilliError::Overflow)?;
            }
            for _ in 0..shift {
                value = value.checked_mul(10).ok_or(ParseMilliError::Overflow)?;
                if value == 0 {
                    break;
                }
            }
        } else {
            let dropped = usize::try_from(-shift).map_err(|_| ParseMilliError::Overflow)?;
            let kept = digits.len().saturating_sub(dropped);
            for &d in &digits[..kept] {
                value = value
                    .checked_mul(10)
                    .and_then(|v| v.checked_add(u64::from(d)))
                    .ok_or(ParseMilliError::Overflow)?;
            }
            let round_digit = if dropped <= digits.len() { digits[kept] } else { 0 };
            if round_digit >= 5 {
                value += 1;
            }
        }

        let magnitude = i32::try_from(value).map_err(|_| ParseMilliError::Overflow)?;
        Ok(Milli(if negative { -magnitude } else { magnitude }))
    }
}

impl Serialize for Milli {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Milli {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct MilliVisitor;

        impl serde::de::Visitor<'_> for MilliVisitor {
            type Value = Milli;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a decimal number with up to three fractional digits")
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Milli, E> {
                v.parse().map_err(E::custom)
            }

            fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<Milli, E> {
                v.to_string().parse().map_err(E::custom)
            }

            fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<Milli, E> {
                v.to_string().parse().map_err(E::custom)
            }

            // Shortest round-trip formatting gives back the decimal text written in the file.
            fn visit_f64<E: serde::de::Error>(self, v: f64) -> Result<Milli, E> {
                v.to_string().parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(MilliVisitor)
    }
}

/// Selectable output terminals of the E3631.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Display,
    AsRefStr,
    EnumString,
    EnumIter,
    Serialize,
    Deserialize,
)]
#[strum(ascii_case_insensitive)]
pub enum Terminal {
    /// +6V, 5A output.
    P6V,
    /// +25V, 1A output.
    P25V,
    /// -25V, 1A output.
    N25V,
}

/// Used to be less ambiguous about whether the output is on or off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, AsRefStr, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum State {
    /// Disabled.
    #[default]
    #[strum(to_string = "OFF", serialize = "0")]
    Off,
    /// Enabled.
    #[strum(to_string = "ON", serialize = "1")]
    On,
}

impl From<State> for bool {
    fn from(value: State) -> Self {
        match value {
            State::Off => false,
            State::On => true,
        }
    }
}

impl From<bool> for State {
    fn from(value: bool) -> Self {
        match value {
            true => State::On,
            false => State::Off,
        }
    }
}

/// One full read of the supply, never cached past the read that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceState {
    pub power: bool,
    pub voltage_setting: Milli,
    pub current_limit: Milli,
    pub measured_voltage: Milli,
    pub measured_current: Milli,
}

/// What an operator can ask the daemon to do.
///
/// Parses both the labels used in the command table (`SET VOLTAGE`) and the
/// variant names (`SetVoltage`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr, EnumString, EnumIter)]
#[strum(ascii_case_insensitive)]
pub enum CommandKind {
    #[strum(to_string = "SET VOLTAGE", serialize = "SetVoltage")]
    SetVoltage,
    #[strum(to_string = "SET CURRENT LIMIT", serialize = "SetCurrentLimit")]
    SetCurrentLimit,
    #[strum(to_string = "SET POWER", serialize = "SetPower")]
    SetPower,
}

/// A pending operator command, as handed out by storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub id: i64,
    pub kind: CommandKind,
    pub value: String,
}
