//! In-memory worker for supervisor tests.
//!
//! Each spawn creates duplex pipes and hands the far ends to the test as a
//! [`FakeWorker`], which plays the worker's side of the protocol.

use async_trait::async_trait;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::StreamExt;
use tokio_util::codec::FramedRead;

use super::{SpawnedWorker, WorkerChild, WorkerSpawner};
use crate::line_splitter::LineSplitter;

const PIPE_SIZE: usize = 4096;

pub(crate) struct FakeSpawner {
    launched: mpsc::UnboundedSender<FakeWorker>,
    refuse: bool,
}

impl FakeSpawner {
    /// A spawner and the receiver on which each launched worker appears.
    pub(crate) fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<FakeWorker>) {
        let (launched, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                launched,
                refuse: false,
            }),
            rx,
        )
    }

    /// A spawner whose program cannot be started.
    pub(crate) fn refusing() -> Arc<Self> {
        let (launched, _) = mpsc::unbounded_channel();
        Arc::new(Self {
            launched,
            refuse: true,
        })
    }
}

impl WorkerSpawner for FakeSpawner {
    fn spawn(&self, device_name: &str) -> io::Result<SpawnedWorker> {
        if self.refuse {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no such file"));
        }

        let (stdin, stdin_far) = tokio::io::duplex(PIPE_SIZE);
        let (stdout, stdout_far) = tokio::io::duplex(PIPE_SIZE);
        let (stderr, stderr_far) = tokio::io::duplex(PIPE_SIZE);
        let (exit_tx, exit_rx) = oneshot::channel();
        let killed = Arc::new(AtomicBool::new(false));

        let worker = FakeWorker {
            device_name: device_name.to_string(),
            commands: FramedRead::new(stdin_far, LineSplitter::new()),
            stdout: stdout_far,
            stderr: stderr_far,
            exit: Some(exit_tx),
            killed: Arc::clone(&killed),
        };
        self.launched
            .send(worker)
            .map_err(|_| io::Error::other("test dropped the worker receiver"))?;

        Ok(SpawnedWorker {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
            child: Box::new(FakeChild {
                exit: exit_rx,
                killed,
            }),
        })
    }

    fn program(&self) -> String {
        "fake-worker".into()
    }
}

/// The test's side of a spawned worker.
pub(crate) struct FakeWorker {
    pub(crate) device_name: String,
    commands: FramedRead<DuplexStream, LineSplitter>,
    stdout: DuplexStream,
    stderr: DuplexStream,
    exit: Option<oneshot::Sender<Option<i32>>>,
    killed: Arc<AtomicBool>,
}

impl FakeWorker {
    /// Write a full line to stdout.
    pub(crate) async fn print(&mut self, line: &str) {
        self.write_stdout(format!("{line}\n").as_bytes()).await;
    }

    /// Write raw bytes to stdout, e.g. half a line.
    pub(crate) async fn write_stdout(&mut self, bytes: &[u8]) {
        self.stdout.write_all(bytes).await.unwrap();
        self.stdout.flush().await.unwrap();
    }

    pub(crate) async fn eprint(&mut self, line: &str) {
        self.stderr
            .write_all(format!("{line}\n").as_bytes())
            .await
            .unwrap();
        self.stderr.flush().await.unwrap();
    }

    /// Next command line the supervisor wrote to stdin.
    pub(crate) async fn next_command(&mut self) -> Option<String> {
        self.commands.next().await.map(|line| line.unwrap())
    }

    /// Make the process exit. Its pipes stay open until the worker is dropped.
    pub(crate) fn exit(&mut self, code: i32) {
        if let Some(tx) = self.exit.take() {
            let _ = tx.send(Some(code));
        }
    }

    pub(crate) fn was_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    /// Observe the kill after the worker itself has been dropped.
    pub(crate) fn kill_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.killed)
    }
}

struct FakeChild {
    exit: oneshot::Receiver<Option<i32>>,
    killed: Arc<AtomicBool>,
}

#[async_trait]
impl WorkerChild for FakeChild {
    async fn wait(&mut self) -> io::Result<Option<i32>> {
        match (&mut self.exit).await {
            Ok(code) => Ok(code),
            // The test dropped its side without exiting: a worker that never
            // exits on its own.
            Err(_) => std::future::pending().await,
        }
    }

    async fn kill(&mut self) -> io::Result<()> {
        self.killed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
