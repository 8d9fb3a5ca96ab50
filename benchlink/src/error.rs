//! Error type shared by the supervisor, scanner and configuration.

use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// A worker is already owned, either connected or still starting up.
    #[error("a worker is already running")]
    AlreadyConnected,

    #[error("no worker is running")]
    NotConnected,

    /// The discovery helper exited unsuccessfully.
    #[error("device scan failed ({status}): {stderr}")]
    ScanFailed { status: String, stderr: String },

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// Writing a command to the worker's stdin failed.
    #[error("worker stdin: {0}")]
    WorkerIo(#[source] io::Error),

    #[error("supervisor is shut down")]
    ShutDown,

    #[error("invalid configuration: {0}")]
    Config(String),
}
