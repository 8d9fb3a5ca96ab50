//! Configuration for the supervisor and scanner.
//!
//! Parsed from environment variables; the console binary layers its command
//! line flags on top.

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

/// Default time the worker gets to exit on its own after `QUIT`.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_millis(2000);

/// Default number of log lines retained.
pub const DEFAULT_LOG_CAPACITY: usize = 10_000;

const DEFAULT_WORKER: &str = "python3 ble_data_logger_wrapper.py";
const DEFAULT_SCANNER: &str = "python3 scan_ble_devices.py";

/// A program and its leading arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    pub fn new(
        program: impl Into<String>,
        args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

impl FromStr for CommandLine {
    type Err = Error;

    /// Split on whitespace; the first word is the program.
    fn from_str(s: &str) -> Result<Self> {
        let mut words = s.split_whitespace();
        let program = words
            .next()
            .ok_or_else(|| Error::Config("empty command line".into()))?;
        Ok(Self::new(program, words))
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Supervisor and scanner configuration.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Worker command; the device name is appended as the last argument.
    pub worker: CommandLine,

    /// Discovery helper command.
    pub scanner: CommandLine,

    /// How long a worker may take to exit after `QUIT` before it is killed.
    pub grace_period: Duration,

    /// Maximum number of log lines kept.
    pub log_capacity: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            worker: CommandLine::new("python3", ["ble_data_logger_wrapper.py"]),
            scanner: CommandLine::new("python3", ["scan_ble_devices.py"]),
            grace_period: DEFAULT_GRACE_PERIOD,
            log_capacity: DEFAULT_LOG_CAPACITY,
        }
    }
}

impl SupervisorConfig {
    /// Build a configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `BENCHLINK_WORKER`: worker command line (default: `python3 ble_data_logger_wrapper.py`)
    /// - `BENCHLINK_SCANNER`: scan helper command line (default: `python3 scan_ble_devices.py`)
    /// - `BENCHLINK_GRACE_MS`: grace period in milliseconds (default: 2000)
    /// - `BENCHLINK_LOG_CAPACITY`: retained log lines, at least 1 (default: 10000)
    pub fn from_env() -> Result<Self> {
        let worker = var_or("BENCHLINK_WORKER", DEFAULT_WORKER).parse()?;
        let scanner = var_or("BENCHLINK_SCANNER", DEFAULT_SCANNER).parse()?;

        let grace_period = match env::var("BENCHLINK_GRACE_MS") {
            Ok(ms) => Duration::from_millis(parse_number("BENCHLINK_GRACE_MS", &ms)?),
            Err(_) => DEFAULT_GRACE_PERIOD,
        };

        let log_capacity = match env::var("BENCHLINK_LOG_CAPACITY") {
            Ok(n) => validate_capacity(parse_number("BENCHLINK_LOG_CAPACITY", &n)?)?,
            Err(_) => DEFAULT_LOG_CAPACITY,
        };

        Ok(Self {
            worker,
            scanner,
            grace_period,
            log_capacity,
        })
    }
}

/// Reject a zero-sized log buffer.
pub fn validate_capacity(capacity: usize) -> Result<usize> {
    if capacity == 0 {
        return Err(Error::Config("log capacity must be at least 1".into()));
    }
    Ok(capacity)
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_number<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{name}={value:?} is not a valid number")))
}
