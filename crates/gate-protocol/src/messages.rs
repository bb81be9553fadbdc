//! Message parsing for device → host lines.
//!
//! Every line is classified as one of:
//! - `STATUS:` status report with `KEY:VALUE` fields
//! - `EVENT:` animal passage event `DIRECTION,TRIGGER`
//! - anything else, kept verbatim for diagnostics
//!
//! Parsing is fault tolerant at field granularity: a bad token inside a status
//! report is recorded in [`StatusFields::malformed`] and skipped, the rest of
//! the report still applies.

use std::fmt;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Marker identifying a status report.
pub const STATUS_MARKER: &str = "STATUS:";

/// Marker identifying an animal event.
pub const EVENT_MARKER: &str = "EVENT:";

/// Status field keys.
pub mod keys {
    pub const GATE: &str = "GATE";
    pub const IR: &str = "IR";
    pub const ANIMAL: &str = "ANIMAL";
    pub const BAT: &str = "BAT";
    pub const TIME: &str = "TIME";
}

/// Which way an animal passed through the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    /// Wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::In => "IN",
            Direction::Out => "OUT",
        }
    }

    /// Parse a direction token, ignoring case and surrounding whitespace.
    pub fn parse(s: &str) -> Option<Direction> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("IN") {
            Some(Direction::In)
        } else if s.eq_ignore_ascii_case("OUT") {
            Some(Direction::Out)
        } else {
            None
        }
    }
}

/// What triggered an animal event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    /// The passive infrared sensor.
    Ir,
    /// A manual open from the operator.
    Manual,
}

impl Trigger {
    /// Wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::Ir => "IR",
            Trigger::Manual => "MANUAL",
        }
    }

    /// Parse a trigger token, ignoring case and surrounding whitespace.
    pub fn parse(s: &str) -> Option<Trigger> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("IR") {
            Some(Trigger::Ir)
        } else if s.eq_ignore_ascii_case("MANUAL") {
            Some(Trigger::Manual)
        } else {
            None
        }
    }
}

/// Why a status token was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MalformedReason {
    /// Token has no `:` separator.
    MissingSeparator,
    /// Value is not a number where one is required.
    InvalidNumber,
}

impl fmt::Display for MalformedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MalformedReason::MissingSeparator => f.write_str("missing ':' separator"),
            MalformedReason::InvalidNumber => f.write_str("value is not a valid number"),
        }
    }
}

/// A status token that was skipped during parsing.
#[derive(Debug, Clone, PartialEq)]
pub struct MalformedField {
    /// The raw token as it appeared on the line.
    pub token: String,
    /// Why it was rejected.
    pub reason: MalformedReason,
}

impl From<&MalformedField> for ProtocolError {
    fn from(field: &MalformedField) -> Self {
        ProtocolError::MalformedField {
            token: field.token.clone(),
            reason: field.reason.to_string(),
        }
    }
}

impl fmt::Display for MalformedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", ProtocolError::from(self))
    }
}

/// Fields decoded from a status report.
///
/// `None` means the field was absent from the line (or malformed); the
/// reconciler leaves the corresponding state untouched in that case.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StatusFields {
    /// `GATE`: `OPEN` is open, any other value is closed.
    pub gate_open: Option<bool>,
    /// `IR`: `1` is triggered.
    pub ir_sensor: Option<bool>,
    /// `ANIMAL`: `1` is detected.
    pub animal_detected: Option<bool>,
    /// `BAT`: battery percentage, clamped to 0-100.
    pub battery: Option<f32>,
    /// `TIME`: seconds until auto-close.
    pub time_remaining: Option<u32>,
    /// Tokens that were skipped.
    pub malformed: Vec<MalformedField>,
}

impl StatusFields {
    /// The report applied when the auto-close timer expires.
    pub fn auto_close() -> StatusFields {
        StatusFields {
            gate_open: Some(false),
            ir_sensor: Some(false),
            animal_detected: Some(false),
            time_remaining: Some(0),
            ..Default::default()
        }
    }

    /// Check whether no field at all was decoded.
    pub fn is_empty(&self) -> bool {
        self.gate_open.is_none()
            && self.ir_sensor.is_none()
            && self.animal_detected.is_none()
            && self.battery.is_none()
            && self.time_remaining.is_none()
    }

    /// Encode the present fields as a `STATUS:` line (without terminator).
    pub fn encode(&self) -> String {
        let mut parts = Vec::with_capacity(5);
        if let Some(open) = self.gate_open {
            parts.push(format!("{}:{}", keys::GATE, if open { "OPEN" } else { "CLOSED" }));
        }
        if let Some(ir) = self.ir_sensor {
            parts.push(format!("{}:{}", keys::IR, ir as u8));
        }
        if let Some(animal) = self.animal_detected {
            parts.push(format!("{}:{}", keys::ANIMAL, animal as u8));
        }
        if let Some(bat) = self.battery {
            parts.push(format!("{}:{}", keys::BAT, bat));
        }
        if let Some(time) = self.time_remaining {
            parts.push(format!("{}:{}", keys::TIME, time));
        }
        format!("{}{}", STATUS_MARKER, parts.join(","))
    }

    fn apply_token(&mut self, token: &str) {
        let token = token.trim();
        if token.is_empty() {
            return;
        }

        let Some((key, value)) = token.split_once(':') else {
            self.reject(token, MalformedReason::MissingSeparator);
            return;
        };
        let value = value.trim();

        match key.trim() {
            keys::GATE => self.gate_open = Some(value == "OPEN"),
            keys::IR => self.ir_sensor = Some(value == "1"),
            keys::ANIMAL => self.animal_detected = Some(value == "1"),
            keys::BAT => match value.parse::<f32>() {
                Ok(level) if level.is_finite() => self.battery = Some(level.clamp(0.0, 100.0)),
                _ => self.reject(token, MalformedReason::InvalidNumber),
            },
            keys::TIME => match value.parse::<u32>() {
                Ok(secs) => self.time_remaining = Some(secs),
                Err(_) => self.reject(token, MalformedReason::InvalidNumber),
            },
            other => debug!("ignoring unknown status key '{}'", other),
        }
    }

    fn reject(&mut self, token: &str, reason: MalformedReason) {
        debug!("skipping status token '{}': {}", token, reason);
        self.malformed.push(MalformedField {
            token: token.to_string(),
            reason,
        });
    }
}

/// A line from the device, classified and decoded.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedMessage {
    /// A status report.
    StatusUpdate(StatusFields),

    /// An animal passed through the gate.
    AnimalEvent {
        direction: Direction,
        trigger: Trigger,
    },

    /// Anything else. Kept for diagnostics only.
    Unrecognized(String),
}

impl DecodedMessage {
    /// Classify and decode a single line. Never fails.
    ///
    /// A line containing `STATUS:` is a status report even if it also
    /// contains `EVENT:`.
    pub fn parse(line: &str) -> DecodedMessage {
        if let Some(idx) = line.find(STATUS_MARKER) {
            let mut fields = StatusFields::default();
            for token in line[idx + STATUS_MARKER.len()..].split(',') {
                fields.apply_token(token);
            }
            return DecodedMessage::StatusUpdate(fields);
        }

        if let Some(idx) = line.find(EVENT_MARKER) {
            if let Some(msg) = Self::try_parse_event(&line[idx + EVENT_MARKER.len()..]) {
                return msg;
            }
        }

        DecodedMessage::Unrecognized(line.to_string())
    }

    /// Try to parse the `DIRECTION,TRIGGER` body of an event.
    fn try_parse_event(body: &str) -> Option<DecodedMessage> {
        let parts: Vec<&str> = body.split(',').collect();
        if parts.len() != 2 {
            return None;
        }

        let direction = Direction::parse(parts[0])?;
        let trigger = Trigger::parse(parts[1])?;
        Some(DecodedMessage::AnimalEvent { direction, trigger })
    }

    /// Check if this line was not understood.
    pub fn is_unrecognized(&self) -> bool {
        matches!(self, DecodedMessage::Unrecognized(_))
    }
}

/// Encode an animal event as an `EVENT:` line (without terminator).
pub fn encode_event(direction: Direction, trigger: Trigger) -> String {
    format!("{}{},{}", EVENT_MARKER, direction.as_str(), trigger.as_str())
}
