//! Worker process supervisor.
//!
//! [`Supervisor`] launches at most one worker at a time and wires it up:
//!
//! ```text
//!   stdout ──LineSplitter──> state machine ──(non-control lines)──> log buffer
//!   stderr ──LineSplitter──> "[ERROR]: ..." ───────────────────────> log buffer
//!   exit   ──────────────────────────────────> cleanup
//!   stdin  <──CommandEncoder── trigger_read() / disconnect()
//! ```
//!
//! Each worker gets three tasks: a reader per output stream and an exit
//! monitor that owns the child process. `disconnect()` arms a grace timer
//! and writes `QUIT` from a background task. When the timer fires, a session
//! that has not ended yet is cleaned up directly, and the monitor is told to
//! kill the process in any case; a worker that said `DISCONNECTED` but kept
//! running is reaped too. All termination paths end in the state machine's
//! session-checked cleanup, so whichever runs first wins and the rest are
//! no-ops.

use futures::SinkExt;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio_stream::StreamExt;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::SupervisorConfig;
use crate::error::{Error, Result};
use crate::line_splitter::LineSplitter;
use crate::log_buffer::LogRingBuffer;
use crate::protocol::{error_entry, CommandEncoder, WorkerCommand};
use crate::state::{
    ConnectionEvent, ConnectionStateMachine, ConnectionStatus, LineDisposition, SessionId,
};
use crate::tracing::prelude::*;
use crate::worker::{
    CommandSpawner, SpawnedWorker, WorkerChild, WorkerOutput, WorkerSpawner, WorkerStdin,
};

const EVENT_CHANNEL_CAPACITY: usize = 16;

type CommandSink = FramedWrite<WorkerStdin, CommandEncoder>;

/// What the state machine holds for a live worker.
struct WorkerHandle {
    stdin: Arc<Mutex<CommandSink>>,
    /// Tells the exit monitor to kill the process.
    kill: CancellationToken,
}

struct Inner {
    machine: ConnectionStateMachine<WorkerHandle>,
    logs: LogRingBuffer,
    last_session: u64,
}

impl Inner {
    /// Append output from `session`. Output of the most recently spawned
    /// worker is kept even after its session ended (e.g. lines flushed right
    /// before exit); output of older workers is dropped.
    fn append_log(&mut self, session: SessionId, entry: String) {
        if session.0 == self.last_session {
            self.logs.push(entry);
        } else {
            trace!(session = %session, "Dropping output from superseded worker");
        }
    }
}

struct Shared {
    spawner: Arc<dyn WorkerSpawner>,
    grace_period: Duration,
    inner: Mutex<Inner>,
    events: broadcast::Sender<ConnectionEvent>,
    tasks: TaskTracker,
    shutdown: CancellationToken,
}

/// Owns the worker slot and serves the connection operations.
///
/// Cheap to clone; clones share the same worker.
#[derive(Clone)]
pub struct Supervisor {
    shared: Arc<Shared>,
}

impl Supervisor {
    /// Create a supervisor that launches the configured worker command.
    pub fn new(config: &SupervisorConfig) -> Self {
        Self::with_spawner(
            Arc::new(CommandSpawner::new(config.worker.clone())),
            config.grace_period,
            config.log_capacity,
        )
    }

    /// Create a supervisor with a custom process adapter.
    pub fn with_spawner(
        spawner: Arc<dyn WorkerSpawner>,
        grace_period: Duration,
        log_capacity: usize,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let machine = ConnectionStateMachine::new(events.clone());

        Self {
            shared: Arc::new(Shared {
                spawner,
                grace_period,
                inner: Mutex::new(Inner {
                    machine,
                    logs: LogRingBuffer::new(log_capacity),
                    last_session: 0,
                }),
                events,
                tasks: TaskTracker::new(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Receive `Connected`/`Disconnected` notifications from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.events.subscribe()
    }

    /// Start a worker for `device_name`.
    ///
    /// Returns once the process is launched; the connection is established
    /// when the worker reports `READY` (observe via [`subscribe`] or
    /// [`status`]). Clears the log buffer first.
    ///
    /// [`subscribe`]: Self::subscribe
    /// [`status`]: Self::status
    pub async fn connect(&self, device_name: &str) -> Result<()> {
        if self.shared.shutdown.is_cancelled() {
            return Err(Error::ShutDown);
        }

        let mut inner = self.shared.inner.lock().await;
        if inner.machine.is_occupied() {
            warn!(device = %device_name, "Connect rejected, worker already running");
            return Err(Error::AlreadyConnected);
        }

        inner.logs.clear();

        let SpawnedWorker {
            stdin,
            stdout,
            stderr,
            child,
        } = match self.shared.spawner.spawn(device_name) {
            Ok(worker) => worker,
            Err(source) => {
                let program = self.shared.spawner.program();
                error!(program = %program, error = %source, "Failed to start worker");
                inner
                    .logs
                    .push(error_entry(&format!("failed to start {program}: {source}")));
                return Err(Error::Spawn { program, source });
            }
        };

        inner.last_session += 1;
        let session = SessionId(inner.last_session);
        // Shutdown reaches every monitor, including those of ended sessions
        // whose process has not exited yet.
        let kill = self.shared.shutdown.child_token();
        let handle = WorkerHandle {
            stdin: Arc::new(Mutex::new(FramedWrite::new(stdin, CommandEncoder))),
            kill: kill.clone(),
        };
        inner.machine.begin(session, device_name, handle)?;
        drop(inner);

        let tasks = &self.shared.tasks;
        tasks.spawn(read_stdout(Arc::clone(&self.shared), session, stdout));
        tasks.spawn(read_stderr(Arc::clone(&self.shared), session, stderr));
        tasks.spawn(monitor_exit(Arc::clone(&self.shared), session, child, kill));

        info!(device = %device_name, session = %session, "Worker started");
        Ok(())
    }

    /// Ask the worker to quit.
    ///
    /// Sends `QUIT` and returns. If the worker has not ended its session
    /// within the grace period it is killed. Without a running worker this is
    /// a successful no-op.
    pub async fn disconnect(&self) -> Result<()> {
        if !self.request_quit().await {
            debug!("Disconnect requested with no worker running");
        }
        Ok(())
    }

    /// Like [`disconnect`](Self::disconnect), but fails with
    /// [`Error::NotConnected`] when no worker is running.
    pub async fn disconnect_strict(&self) -> Result<()> {
        if self.request_quit().await {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    /// Arm the grace timer and send `QUIT` in the background. False if there
    /// is no worker.
    ///
    /// Nothing here waits on the worker's stdin: a worker that stopped
    /// reading still gets killed when the grace period runs out.
    async fn request_quit(&self) -> bool {
        let (session, stdin, kill) = {
            let inner = self.shared.inner.lock().await;
            match (inner.machine.active_session(), inner.machine.handle()) {
                (Some(session), Some(handle)) => (
                    session,
                    Arc::clone(&handle.stdin),
                    handle.kill.clone(),
                ),
                _ => return false,
            }
        };

        let deadline = tokio::time::sleep(self.shared.grace_period);
        let shared = Arc::clone(&self.shared);
        self.shared.tasks.spawn(async move {
            tokio::pin!(deadline);

            tokio::select! {
                result = send_command(&stdin, WorkerCommand::Quit) => {
                    if let Err(e) = result {
                        // Most likely the worker is already gone; its exit cleans up.
                        warn!(session = %session, error = %e, "Failed to send QUIT");
                    }
                }
                _ = &mut deadline => {
                    warn!(session = %session, "Worker stdin blocked, QUIT not delivered");
                }
                _ = shared.shutdown.cancelled() => return,
            }
            drop(stdin);

            tokio::select! {
                _ = &mut deadline => shared.expire_grace_period(session, &kill).await,
                _ = shared.shutdown.cancelled() => {}
            }
        });

        true
    }

    /// Ask the worker for one measurement cycle.
    ///
    /// Succeeds once `TRIGGER` is written; the worker sends no acknowledgment.
    pub async fn trigger_read(&self) -> Result<()> {
        let stdin = {
            let inner = self.shared.inner.lock().await;
            inner
                .machine
                .handle()
                .map(|handle| Arc::clone(&handle.stdin))
                .ok_or(Error::NotConnected)?
        };

        match tokio::time::timeout(
            self.shared.grace_period,
            send_command(&stdin, WorkerCommand::Trigger),
        )
        .await
        {
            Ok(result) => result.map_err(Error::WorkerIo),
            Err(_) => Err(Error::WorkerIo(io::Error::new(
                io::ErrorKind::TimedOut,
                "worker is not reading commands",
            ))),
        }
    }

    pub async fn status(&self) -> ConnectionStatus {
        self.shared.inner.lock().await.machine.status()
    }

    /// Snapshot of the log buffer, oldest first.
    pub async fn logs(&self) -> Vec<String> {
        self.shared.inner.lock().await.logs.snapshot()
    }

    /// Kill every worker process still alive and wait for the supervisor's
    /// tasks to finish. Further `connect` calls fail.
    pub async fn shutdown(&self) {
        // Cancels each session's kill token as well.
        self.shared.shutdown.cancel();

        {
            let mut inner = self.shared.inner.lock().await;
            if let Some(session) = inner.machine.active_session() {
                info!(session = %session, "Terminating worker for shutdown");
                inner.machine.cleanup(session);
            }
        }

        self.shared.tasks.close();
        if tokio::time::timeout(self.shared.grace_period, self.shared.tasks.wait())
            .await
            .is_err()
        {
            warn!(
                remaining = self.shared.tasks.len(),
                "Supervisor tasks still running after shutdown"
            );
        }
    }
}

impl Shared {
    async fn cleanup(&self, session: SessionId) {
        // Dropping the handle closes the worker's stdin.
        self.inner.lock().await.machine.cleanup(session);
    }

    /// End `session` and kill its process. The kill also applies when the
    /// session already ended through `DISCONNECTED` but the process stayed
    /// alive; once the process has exited it is a no-op.
    async fn expire_grace_period(&self, session: SessionId, kill: &CancellationToken) {
        let mut inner = self.inner.lock().await;
        if inner.machine.active_session() == Some(session) {
            warn!(
                session = %session,
                grace_ms = self.grace_period.as_millis() as u64,
                "Worker did not exit after QUIT, terminating"
            );
            inner.machine.cleanup(session);
        } else {
            trace!(session = %session, "Grace period over, reaping worker if still running");
        }
        kill.cancel();
    }
}

async fn send_command(stdin: &Mutex<CommandSink>, command: WorkerCommand) -> io::Result<()> {
    debug!(command = %command, "Sending command to worker");
    stdin.lock().await.send(command).await
}

async fn read_stdout(shared: Arc<Shared>, session: SessionId, stdout: WorkerOutput) {
    let mut lines = FramedRead::new(stdout, LineSplitter::new());

    while let Some(line) = lines.next().await {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!(session = %session, error = %e, "Worker stdout read failed");
                break;
            }
        };

        trace!(session = %session, line = %line, "Worker stdout");
        let mut inner = shared.inner.lock().await;
        if inner.machine.handle_line(session, &line) == LineDisposition::Log {
            inner.append_log(session, line);
        }
    }

    trace!(session = %session, "Worker stdout closed");
}

async fn read_stderr(shared: Arc<Shared>, session: SessionId, stderr: WorkerOutput) {
    let mut lines = FramedRead::new(stderr, LineSplitter::new());

    while let Some(line) = lines.next().await {
        match line {
            Ok(line) => {
                debug!(session = %session, line = %line, "Worker stderr");
                shared
                    .inner
                    .lock()
                    .await
                    .append_log(session, error_entry(&line));
            }
            Err(e) => {
                warn!(session = %session, error = %e, "Worker stderr read failed");
                break;
            }
        }
    }

    trace!(session = %session, "Worker stderr closed");
}

/// Own the child until it exits or is killed, then end its session.
async fn monitor_exit(
    shared: Arc<Shared>,
    session: SessionId,
    mut child: Box<dyn WorkerChild>,
    kill: CancellationToken,
) {
    let exited = tokio::select! {
        status = child.wait() => Some(status),
        _ = kill.cancelled() => None,
    };

    match exited {
        Some(Ok(code)) => debug!(session = %session, code = ?code, "Worker exited"),
        Some(Err(e)) => warn!(session = %session, error = %e, "Failed to wait for worker"),
        None => match child.kill().await {
            Ok(()) => info!(session = %session, "Worker killed"),
            Err(e) => error!(session = %session, error = %e, "Failed to kill worker"),
        },
    }

    shared.cleanup(session).await;
}
