//! Process adapter for the worker.
//!
//! The supervisor never touches `tokio::process` directly. It asks a
//! [`WorkerSpawner`] for a [`SpawnedWorker`]: three byte streams plus a
//! [`WorkerChild`] to wait on or kill. [`process::CommandSpawner`] launches
//! real programs; tests substitute in-memory pipes.

pub mod process;

#[cfg(test)]
pub(crate) mod fake;

use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite};

pub use process::CommandSpawner;

pub type WorkerStdin = Box<dyn AsyncWrite + Send + Unpin>;
pub type WorkerOutput = Box<dyn AsyncRead + Send + Unpin>;

/// A running worker's streams and process.
pub struct SpawnedWorker {
    pub stdin: WorkerStdin,
    pub stdout: WorkerOutput,
    pub stderr: WorkerOutput,
    pub child: Box<dyn WorkerChild>,
}

/// The process side of a worker.
#[async_trait]
pub trait WorkerChild: Send {
    /// Wait for the process to exit. Yields the exit code, or `None` when the
    /// process was ended by a signal.
    async fn wait(&mut self) -> io::Result<Option<i32>>;

    /// Forcibly terminate the process and reap it.
    async fn kill(&mut self) -> io::Result<()>;
}

/// Launches workers.
pub trait WorkerSpawner: Send + Sync {
    /// Start a worker for `device_name`. Failure means nothing was started.
    fn spawn(&self, device_name: &str) -> io::Result<SpawnedWorker>;

    /// Name of what is being launched, for logs and errors.
    fn program(&self) -> String;
}
