//! Worker line protocol.
//!
//! The worker and the supervisor exchange newline-terminated text over the
//! worker's standard streams:
//!
//! | Direction           | Line           | Meaning                             |
//! |---------------------|----------------|-------------------------------------|
//! | worker stdout       | `READY`        | connected to the requested device   |
//! | worker stdout       | `DISCONNECTED` | worker is shutting down             |
//! | worker stdout       | anything else  | log line, stored verbatim           |
//! | worker stderr       | anything       | stored as `[ERROR]: <text>`         |
//! | worker stdin        | `TRIGGER`      | run one measurement cycle           |
//! | worker stdin        | `QUIT`         | shut down gracefully                |
//!
//! Commands are fire-and-forget; the worker never acknowledges them.

use bytes::{BufMut, BytesMut};
use std::fmt;
use std::io;
use tokio_util::codec::Encoder;

/// Prefix applied to every line the worker writes to stderr.
pub const ERROR_PREFIX: &str = "[ERROR]: ";

/// A stdout line with protocol significance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlToken {
    Ready,
    Disconnected,
}

impl ControlToken {
    /// Recognize a control token. Only exact matches count; anything else,
    /// including surrounding whitespace, is an ordinary log line.
    pub fn parse(line: &str) -> Option<Self> {
        match line {
            "READY" => Some(Self::Ready),
            "DISCONNECTED" => Some(Self::Disconnected),
            _ => None,
        }
    }
}

/// Commands written to the worker's stdin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerCommand {
    Trigger,
    Quit,
}

impl WorkerCommand {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trigger => "TRIGGER",
            Self::Quit => "QUIT",
        }
    }
}

impl fmt::Display for WorkerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tag a stderr line for the log buffer.
pub fn error_entry(line: &str) -> String {
    format!("{ERROR_PREFIX}{line}")
}

/// Encoder for [`WorkerCommand`]s, one per line.
#[derive(Debug, Default)]
pub struct CommandEncoder;

impl Encoder<WorkerCommand> for CommandEncoder {
    type Error = io::Error;

    fn encode(&mut self, command: WorkerCommand, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let text = command.as_str();
        dst.reserve(text.len() + 1);
        dst.put_slice(text.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("READY", Some(ControlToken::Ready); "ready")]
    #[test_case("DISCONNECTED", Some(ControlToken::Disconnected); "disconnected")]
    #[test_case("ready", None; "wrong case")]
    #[test_case(" READY", None; "leading space")]
    #[test_case("READY.", None; "trailing text")]
    #[test_case("Disconnecting...", None; "worker chatter")]
    #[test_case("", None; "empty")]
    fn test_control_token_parse(line: &str, expected: Option<ControlToken>) {
        assert_eq!(ControlToken::parse(line), expected);
    }

    #[test]
    fn test_commands_encode_as_lines() {
        let mut dst = BytesMut::new();
        let mut encoder = CommandEncoder;

        encoder.encode(WorkerCommand::Trigger, &mut dst).unwrap();
        encoder.encode(WorkerCommand::Quit, &mut dst).unwrap();

        assert_eq!(&dst[..], b"TRIGGER\nQUIT\n");
    }

    #[test]
    fn test_error_entry_prefix() {
        assert_eq!(error_entry("sensor timeout"), "[ERROR]: sensor timeout");
    }
}
