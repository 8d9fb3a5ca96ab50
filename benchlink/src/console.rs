//! Interactive line console over [`BenchService`].
//!
//! Each input line is one command. Results go to the output stream; lifecycle
//! events are reported through tracing. The console owns the shutdown path:
//! `quit`, end of input, SIGINT and SIGTERM all tear the worker down before
//! returning.

use std::str::FromStr;

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::signal::unix::{self, SignalKind};
use tokio::sync::broadcast::error::RecvError;
use tokio_stream::StreamExt;
use tokio_util::codec::FramedRead;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::line_splitter::LineSplitter;
use crate::service::BenchService;
use crate::state::ConnectionEvent;
use crate::tracing::prelude::*;

const HELP: &str = "\
commands:
  scan               list nearby devices
  connect <device>   start the worker for a device
  disconnect         ask the worker to quit
  trigger            request one measurement
  status             show the connection state
  logs               print the retained worker output
  help               show this text
  quit               disconnect and exit";

/// A parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Scan,
    Connect(String),
    Disconnect,
    Trigger,
    Status,
    Logs,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseCommandError {
    #[error("empty command")]
    Empty,

    #[error("unknown command `{0}`, try `help`")]
    Unknown(String),

    #[error("usage: connect <device>")]
    MissingDevice,

    #[error("`{0}` takes no arguments")]
    UnexpectedArgument(String),
}

impl FromStr for ConsoleCommand {
    type Err = ParseCommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        // Device names may contain spaces; everything after `connect` is the name.
        if word.eq_ignore_ascii_case("connect") {
            if rest.is_empty() {
                return Err(ParseCommandError::MissingDevice);
            }
            return Ok(ConsoleCommand::Connect(rest.to_string()));
        }

        let command = match word.to_ascii_lowercase().as_str() {
            "" => return Err(ParseCommandError::Empty),
            "scan" => ConsoleCommand::Scan,
            "disconnect" => ConsoleCommand::Disconnect,
            "trigger" => ConsoleCommand::Trigger,
            "status" => ConsoleCommand::Status,
            "logs" => ConsoleCommand::Logs,
            "help" => ConsoleCommand::Help,
            "quit" | "exit" => ConsoleCommand::Quit,
            _ => return Err(ParseCommandError::Unknown(word.to_string())),
        };

        if !rest.is_empty() {
            return Err(ParseCommandError::UnexpectedArgument(word.to_string()));
        }
        Ok(command)
    }
}

pub struct Console {
    service: BenchService,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl Console {
    pub fn new(service: BenchService) -> Self {
        Self {
            service,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Serve stdin/stdout until `quit`, end of input or a termination signal.
    pub async fn run(self) -> anyhow::Result<()> {
        self.spawn_event_reporter();

        let mut sigint = unix::signal(SignalKind::interrupt())?;
        let mut sigterm = unix::signal(SignalKind::terminate())?;

        info!("Console ready, type `help` for commands.");

        tokio::select! {
            result = self.serve(tokio::io::stdin(), tokio::io::stdout()) => {
                result?;
            }
            _ = sigint.recv() => {
                info!("Received SIGINT.");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM.");
            }
        }

        self.stop().await;
        info!("Exiting.");
        Ok(())
    }

    /// Read commands from `input` and write replies to `output`.
    ///
    /// Returns on `quit`, at end of input or once the console is stopped.
    pub async fn serve<R, W>(&self, input: R, mut output: W) -> std::io::Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = FramedRead::new(input, LineSplitter::new());

        loop {
            let line = tokio::select! {
                line = lines.next() => line,
                _ = self.shutdown.cancelled() => break,
            };
            let Some(line) = line else {
                debug!("End of console input");
                break;
            };
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }

            let reply = match line.parse::<ConsoleCommand>() {
                Ok(ConsoleCommand::Quit) => break,
                Ok(command) => self.execute(command).await,
                Err(e) => format!("error: {}", e),
            };

            output.write_all(reply.as_bytes()).await?;
            output.write_all(b"\n").await?;
            output.flush().await?;
        }

        Ok(())
    }

    /// Run one command and render its reply.
    pub async fn execute(&self, command: ConsoleCommand) -> String {
        let result = match command {
            ConsoleCommand::Scan => self.service.scan().await.map(|devices| to_json(&devices)),
            ConsoleCommand::Connect(device_name) => {
                self.service.connect(&device_name).await.map(|_| ok())
            }
            ConsoleCommand::Disconnect => self.service.disconnect().await.map(|_| ok()),
            ConsoleCommand::Trigger => self.service.trigger().await.map(|_| ok()),
            ConsoleCommand::Status => Ok(to_json(&self.service.status().await)),
            ConsoleCommand::Logs => Ok(to_json(&self.service.logs().await)),
            ConsoleCommand::Help => Ok(HELP.to_string()),
            ConsoleCommand::Quit => Ok(ok()),
        };

        result.unwrap_or_else(|e| format!("error: {}", e))
    }

    /// Stop serving, tear down the worker and wait for background tasks.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        self.service.shutdown().await;
        self.tracker.close();
        self.tracker.wait().await;
    }

    fn spawn_event_reporter(&self) {
        let mut events = self.service.subscribe();
        let shutdown = self.shutdown.clone();

        self.tracker.spawn(async move {
            loop {
                let event = tokio::select! {
                    event = events.recv() => event,
                    _ = shutdown.cancelled() => break,
                };
                match event {
                    Ok(ConnectionEvent::Connected { device_name }) => {
                        info!(device = %device_name, "Connected.");
                    }
                    Ok(ConnectionEvent::Disconnected) => info!("Disconnected."),
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "Console fell behind on connection events");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }
}

fn ok() -> String {
    "ok".to_string()
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| format!("error: {}", e))
}
