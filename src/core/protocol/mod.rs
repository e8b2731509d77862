//! Connect112 wire protocol
//!
//! ASCII commands terminated by a single `\n`. The firmware answers each
//! command with free text after a fixed settle delay; there is no response
//! terminator, so the delay itself is the framing boundary.
//!
//! While auto-test is enabled the fixture also pushes unsolicited
//! `PASS:<pin>` lines, which are assembled by [`LineAssembler`].

mod framing;

pub use framing::{clean_response, LineAssembler};

use std::fmt;

/// Substring the fixture includes in its identification reply
pub const IDENTIFY_TOKEN: &str = "CONNECT_112";

/// Reply to a successful `RESET`
pub const RESET_ACK: &str = "INIT";

/// Reply to `READ:<pin>` when the pin has continuity
pub const PIN_CLOSED: &str = "1";

/// Reply to `AUTO_ON` / `AUTO_OFF`
pub const AUTO_ACK: &str = "P";

const PASS_PREFIX: &str = "PASS:";

/// Host to fixture command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Identification handshake (`IDEN`)
    Identify,
    /// Return the fixture to its power-on state (`RESET`)
    Reset,
    /// Read the continuity of one pin (`READ:<pin>`)
    ReadPin(usize),
    /// Let the fixture report passing pins on its own (`AUTO_ON`)
    AutoOn,
    /// Back to host-driven reads (`AUTO_OFF`)
    AutoOff,
}

impl Command {
    /// Whether `response` (already cleaned) means the command succeeded
    pub fn accepts(&self, response: &str) -> bool {
        match self {
            Self::Identify => response.contains(IDENTIFY_TOKEN),
            Self::Reset => response.trim() == RESET_ACK,
            Self::ReadPin(_) => response == PIN_CLOSED,
            Self::AutoOn | Self::AutoOff => response == AUTO_ACK,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identify => write!(f, "IDEN"),
            Self::Reset => write!(f, "RESET"),
            Self::ReadPin(pin) => write!(f, "READ:{}", pin),
            Self::AutoOn => write!(f, "AUTO_ON"),
            Self::AutoOff => write!(f, "AUTO_OFF"),
        }
    }
}

/// Parse an auto-test notification into a zero-based pin index.
///
/// Accepts `PASS:<n>` with a case-insensitive prefix. Anything else,
/// including a missing or non-numeric index, yields `None`.
pub fn parse_pass_notification(line: &str) -> Option<usize> {
    let line = clean_response(line);
    let prefix = line.get(..PASS_PREFIX.len())?;
    if !prefix.eq_ignore_ascii_case(PASS_PREFIX) {
        return None;
    }

    line.split(':').nth(1)?.trim().parse().ok()
}
