//! Animal Gate Serial Protocol
//!
//! This crate provides types and utilities for talking to the gate
//! microcontroller over its serial line. The protocol is plain ASCII, one
//! message per newline-terminated line, in both directions.
//!
//! # Protocol Overview
//!
//! - **Device → host**: status reports and animal passage events
//!   - `STATUS:GATE:<OPEN|CLOSED>,IR:<0|1>,ANIMAL:<0|1>,BAT:<n>,TIME:<n>`
//!     (any subset of fields, any order)
//!   - `EVENT:<IN|OUT>,<IR|MANUAL>`
//! - **Host → device**: `OPEN`, `CLOSE`, `STATUS`, `TIMEOUT:<n>`, `SENSITIVITY:<n>`
//!
//! The device side is untrusted: lines may arrive split across reads, carry
//! junk, or omit fields. Nothing in this crate fails on bad input; the
//! [`LineFramer`] never errors and [`DecodedMessage::parse`] is total.
//!
//! # Example
//!
//! ```rust
//! use gate_protocol::{Command, DecodedMessage, LineFramer};
//!
//! let mut framer = LineFramer::new();
//! assert!(framer.feed(b"STATUS:GATE:OP").is_empty());
//! let lines = framer.feed(b"EN,BAT:85\n");
//!
//! match DecodedMessage::parse(&lines[0]) {
//!     DecodedMessage::StatusUpdate(fields) => assert_eq!(fields.gate_open, Some(true)),
//!     other => panic!("unexpected {:?}", other),
//! }
//!
//! assert_eq!(Command::Open.encode(), b"OPEN\n");
//! ```

mod codec;
mod commands;
mod error;
mod messages;

pub use codec::*;
pub use commands::*;
pub use error::*;
pub use messages::*;
