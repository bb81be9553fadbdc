//! Line-oriented control input for `gatectl run`.

use gate_protocol::{Command, SENSITIVITY_RANGE};

/// A request typed at the console.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleInput {
    Intent(Command),
    Connect,
    Disconnect,
    Show,
    Help,
    Quit,
}

pub const HELP: &str = "\
commands:
  open | close          toggle the gate
  status                request a status report
  timeout <secs>        set the auto-close timeout
  sensitivity <1-10>    set the IR sensitivity
  connect | disconnect  switch between hardware and simulation
  show                  print the current snapshot
  quit";

/// Parse one console line. Blank lines yield `Ok(None)`.
pub fn parse_input(line: &str) -> Result<Option<ConsoleInput>, String> {
    let mut words = line.split_whitespace();
    let Some(word) = words.next() else {
        return Ok(None);
    };
    let argument = words.next();
    if let Some(extra) = words.next() {
        return Err(format!("unexpected argument '{}'", extra));
    }

    let input = match (word.to_ascii_lowercase().as_str(), argument) {
        ("open", None) => ConsoleInput::Intent(Command::Open),
        ("close", None) => ConsoleInput::Intent(Command::Close),
        ("status", None) => ConsoleInput::Intent(Command::Status),
        ("timeout", Some(arg)) => {
            let secs = parse_number(arg)?;
            if secs == 0 {
                return Err("timeout must be at least 1 second".to_string());
            }
            ConsoleInput::Intent(Command::SetTimeout { secs })
        }
        ("sensitivity", Some(arg)) => {
            let level = parse_number(arg)?;
            if !SENSITIVITY_RANGE.contains(&level) {
                return Err(format!(
                    "sensitivity must be within {}-{}",
                    SENSITIVITY_RANGE.start(),
                    SENSITIVITY_RANGE.end()
                ));
            }
            ConsoleInput::Intent(Command::SetSensitivity { level })
        }
        ("connect", None) => ConsoleInput::Connect,
        ("disconnect", None) => ConsoleInput::Disconnect,
        ("show", None) => ConsoleInput::Show,
        ("help" | "?", None) => ConsoleInput::Help,
        ("quit" | "exit", None) => ConsoleInput::Quit,
        ("timeout" | "sensitivity", None) => return Err(format!("'{}' needs a value", word)),
        (
            "open" | "close" | "status" | "connect" | "disconnect" | "show" | "help" | "?" | "quit"
            | "exit",
            Some(arg),
        ) => {
            return Err(format!("unexpected argument '{}'", arg))
        }
        _ => return Err(format!("unknown command '{}' (try 'help')", word)),
    };
    Ok(Some(input))
}

fn parse_number(arg: &str) -> Result<u32, String> {
    arg.parse().map_err(|_| format!("'{}' is not a number", arg))
}
