//! The line protocol spoken by the MLX90381 UART bridge.
//!
//! Host to bridge: single ASCII characters, one per command, plus the
//! loader fields sent by [`crate::sequencer`]. Bridge to host: text lines.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::constants::{commands, IDENTIFY_TOKEN};

/// Bridge command. One byte on the wire, no framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Command {
    /// Bridge answers with the identification token.
    Identify,
    /// Dump the 8 customer registers as `<addr> <word>` pairs.
    ReadRegisters,
    /// Dump all 16 MTP words as `<addr> <word>` pairs.
    ReadMtp,
    /// Switch the sensor to application mode and sample OUT1/OUT2.
    Measure,
    /// Start the interactive register loader.
    LoadRegisters,
    /// Start the interactive MTP loader.
    LoadMtp,
    /// Write the loaded words to the registers.
    CommitRegisters,
    /// Burn the loaded words into MTP.
    CommitMtp,
    /// Set MEMLOCK. Permanent.
    LockMtp,
    /// Print the last I2C acknowledge status.
    Acknowledge,
}

impl Command {
    pub const fn as_byte(self) -> u8 {
        match self {
            Command::Identify => commands::IDENTIFY,
            Command::ReadRegisters => commands::READ_REGISTERS,
            Command::ReadMtp => commands::READ_MTP,
            Command::Measure => commands::MEASURE,
            Command::LoadRegisters => commands::LOAD_REGISTERS,
            Command::LoadMtp => commands::LOAD_MTP,
            Command::CommitRegisters => commands::COMMIT_REGISTERS,
            Command::CommitMtp => commands::COMMIT_MTP,
            Command::LockMtp => commands::LOCK_MTP,
            Command::Acknowledge => commands::ACKNOWLEDGE,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_byte() as char)
    }
}

/// One OUT1/OUT2 sample pair, raw ADC counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Measurement {
    pub out1: u32,
    pub out2: u32,
}

/// A decoded bridge line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Identify,
    Measurement(Measurement),
    /// `(address, word)` pairs from a `C` or `R` dump, in line order.
    AddressWords(Vec<(u16, u16)>),
    /// Prompts, banners, echoes. Ignored.
    Unrecognized,
}

static MEASUREMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)OUT1\s+([0-9]+)\s+OUT2\s+([0-9]+)").unwrap());
static HEX_PAIR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([0-9A-Fa-f]+)\s+([0-9A-Fa-f]+)").unwrap());

/// Classify one line, already stripped of its terminator.
///
/// Identification wins over measurement, which wins over hex pairs. A line
/// is never reinterpreted once a pattern matched.
pub fn decode(line: &str) -> Line {
    if line.trim() == IDENTIFY_TOKEN {
        return Line::Identify;
    }

    if let Some(caps) = MEASUREMENT_RE.captures(line) {
        return Line::Measurement(Measurement {
            out1: saturating_decimal(&caps[1]),
            out2: saturating_decimal(&caps[2]),
        });
    }

    let pairs: Vec<(u16, u16)> = HEX_PAIR_RE
        .captures_iter(line)
        .map(|caps| (low_word(&caps[1]), low_word(&caps[2])))
        .collect();
    if pairs.is_empty() {
        Line::Unrecognized
    } else {
        Line::AddressWords(pairs)
    }
}

// digits only, so the only failure is overflow
fn saturating_decimal(digits: &str) -> u32 {
    digits.parse().unwrap_or(u32::MAX)
}

/// Low 16 bits of an arbitrarily long hex token.
fn low_word(hex: &str) -> u16 {
    let tail = &hex[hex.len().saturating_sub(4)..];
    u16::from_str_radix(tail, 16).unwrap_or_default()
}
