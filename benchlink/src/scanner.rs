//! Device discovery through the external scan helper.
//!
//! The helper is a short-lived program that prints a JSON array of device
//! names (e.g. `["THOR-01","THOR-02"]`) and exits.

use std::process::Stdio;
use tokio::process::Command;

use crate::config::CommandLine;
use crate::error::{Error, Result};
use crate::tracing::prelude::*;

/// Runs the discovery helper once per [`scan`](Self::scan).
#[derive(Debug, Clone)]
pub struct DeviceScanner {
    command: CommandLine,
}

impl DeviceScanner {
    pub fn new(command: CommandLine) -> Self {
        Self { command }
    }

    /// Run the helper to completion and return the devices it found.
    ///
    /// A non-zero exit is a [`Error::ScanFailed`] carrying the helper's
    /// stderr. Output that is not a JSON array of strings yields an empty
    /// list rather than an error; the problem is only logged.
    pub async fn scan(&self) -> Result<Vec<String>> {
        debug!(program = %self.command, "Scanning for devices");

        let output = Command::new(&self.command.program)
            .args(&self.command.args)
            .env("PYTHONUNBUFFERED", "1")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| Error::Spawn {
                program: self.command.to_string(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(status = %output.status, stderr = %stderr, "Device scan failed");
            return Err(Error::ScanFailed {
                status: output.status.to_string(),
                stderr,
            });
        }

        Ok(parse_device_list(&output.stdout))
    }
}

/// Parse the helper's stdout, falling back to an empty list.
fn parse_device_list(stdout: &[u8]) -> Vec<String> {
    match serde_json::from_slice::<Vec<String>>(stdout) {
        Ok(devices) => {
            debug!(count = devices.len(), "Device scan finished");
            devices
        }
        Err(e) => {
            warn!(
                error = %e,
                output = %String::from_utf8_lossy(stdout).trim(),
                "Unparsable scan output, reporting no devices"
            );
            Vec::new()
        }
    }
}
