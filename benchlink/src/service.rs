//! The operations offered to a UI.
//!
//! [`BenchService`] is the context object a front end is given. It owns the
//! supervisor and the scanner; each method maps to one client request.

use tokio::sync::broadcast;

use crate::config::SupervisorConfig;
use crate::error::Result;
use crate::scanner::DeviceScanner;
use crate::state::{ConnectionEvent, ConnectionStatus};
use crate::supervisor::Supervisor;

#[derive(Clone)]
pub struct BenchService {
    supervisor: Supervisor,
    scanner: DeviceScanner,
}

impl BenchService {
    pub fn new(config: &SupervisorConfig) -> Self {
        Self::from_parts(
            Supervisor::new(config),
            DeviceScanner::new(config.scanner.clone()),
        )
    }

    pub fn from_parts(supervisor: Supervisor, scanner: DeviceScanner) -> Self {
        Self {
            supervisor,
            scanner,
        }
    }

    /// List nearby devices. Completes when the scan helper exits.
    pub async fn scan(&self) -> Result<Vec<String>> {
        self.scanner.scan().await
    }

    /// Start connecting to `device_name`; completion is reported by a
    /// `Connected` event.
    pub async fn connect(&self, device_name: &str) -> Result<()> {
        self.supervisor.connect(device_name).await
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.supervisor.disconnect().await
    }

    pub async fn trigger(&self) -> Result<()> {
        self.supervisor.trigger_read().await
    }

    pub async fn status(&self) -> ConnectionStatus {
        self.supervisor.status().await
    }

    pub async fn logs(&self) -> Vec<String> {
        self.supervisor.logs().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.supervisor.subscribe()
    }

    pub async fn shutdown(&self) {
        self.supervisor.shutdown().await;
    }
}
