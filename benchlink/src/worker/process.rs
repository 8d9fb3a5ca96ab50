//! Real worker processes via `tokio::process`.

use async_trait::async_trait;
use std::io;
use std::process::Stdio;
use tokio::process::{Child, Command};

use super::{SpawnedWorker, WorkerChild, WorkerSpawner};
use crate::config::CommandLine;
use crate::tracing::prelude::*;

/// Spawns the configured command with the device name as its last argument.
#[derive(Debug, Clone)]
pub struct CommandSpawner {
    command: CommandLine,
}

impl CommandSpawner {
    pub fn new(command: CommandLine) -> Self {
        Self { command }
    }
}

impl WorkerSpawner for CommandSpawner {
    fn spawn(&self, device_name: &str) -> io::Result<SpawnedWorker> {
        let mut child = Command::new(&self.command.program)
            .args(&self.command.args)
            .arg(device_name)
            // Python workers otherwise block-buffer stdout when it is a pipe.
            .env("PYTHONUNBUFFERED", "1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::other("worker stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("worker stdout unavailable"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| io::Error::other("worker stderr unavailable"))?;

        debug!(pid = ?child.id(), program = %self.command, device = %device_name, "Worker spawned");

        Ok(SpawnedWorker {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
            child: Box::new(ProcessChild(child)),
        })
    }

    fn program(&self) -> String {
        self.command.to_string()
    }
}

struct ProcessChild(Child);

#[async_trait]
impl WorkerChild for ProcessChild {
    async fn wait(&mut self) -> io::Result<Option<i32>> {
        let status = self.0.wait().await?;
        Ok(status.code())
    }

    async fn kill(&mut self) -> io::Result<()> {
        self.0.kill().await
    }
}
