//! Commands that can be sent to the gate microcontroller.
//!
//! Encoding is pure and total: it never depends on gate state and never fails.
//! The inverse, [`Command::parse`], is used on the device side (the emulator)
//! and does reject malformed input.

use crate::codec::LineFramer;
use crate::error::{ProtocolError, ProtocolResult};

/// Auto-close timeout presets offered by the reference UI, in seconds.
pub const TIMEOUT_PRESETS: [u32; 6] = [5, 10, 15, 20, 25, 30];

/// Valid IR sensitivity range on the reference firmware.
pub const SENSITIVITY_RANGE: std::ops::RangeInclusive<u32> = 1..=10;

/// Commands that can be sent to the gate controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Open the gate.
    Open,

    /// Close the gate.
    Close,

    /// Ask the device for a full status report.
    Status,

    /// Set the auto-close timeout.
    SetTimeout {
        /// Timeout in seconds.
        secs: u32,
    },

    /// Set the IR sensor sensitivity.
    SetSensitivity {
        /// Sensitivity level (1-10 on the reference firmware).
        level: u32,
    },
}

impl Command {
    /// Encode the command as a line to send to the device.
    /// Returns the bytes to send (including the `\n` terminator).
    pub fn encode(&self) -> Vec<u8> {
        LineFramer::encode_line(&self.to_command_string())
    }

    /// Get the command string without the terminator.
    pub fn to_command_string(&self) -> String {
        match self {
            Command::Open => "OPEN".to_string(),
            Command::Close => "CLOSE".to_string(),
            Command::Status => "STATUS".to_string(),
            Command::SetTimeout { secs } => format!("TIMEOUT:{}", secs),
            Command::SetSensitivity { level } => format!("SENSITIVITY:{}", level),
        }
    }

    /// Parse a command line as received by the device.
    pub fn parse(line: &str) -> ProtocolResult<Command> {
        let line = line.trim();

        match line {
            "OPEN" => return Ok(Command::Open),
            "CLOSE" => return Ok(Command::Close),
            "STATUS" => return Ok(Command::Status),
            _ => {}
        }

        let Some((name, value)) = line.split_once(':') else {
            return Err(ProtocolError::InvalidCommand(line.to_string()));
        };
        let value: u32 = value
            .trim()
            .parse()
            .map_err(|_| ProtocolError::InvalidCommand(format!("invalid argument: {}", line)))?;

        match name {
            "TIMEOUT" => Ok(Command::SetTimeout { secs: value }),
            "SENSITIVITY" => Ok(Command::SetSensitivity { level: value }),
            _ => Err(ProtocolError::InvalidCommand(line.to_string())),
        }
    }
}
