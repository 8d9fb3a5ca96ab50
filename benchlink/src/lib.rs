//! Supervision of the bench instrument's BLE worker process.
//!
//! All hardware access is delegated to an external worker program. This
//! crate launches that worker, decodes its line protocol, keeps a bounded log
//! of what it prints, injects commands into its stdin and tears it down
//! within a bounded grace period. Device discovery is delegated to a
//! separate one-shot helper.

pub mod config;
pub mod console;
pub mod error;
pub mod line_splitter;
pub mod log_buffer;
pub mod protocol;
pub mod scanner;
pub mod service;
pub mod state;
pub mod supervisor;
pub mod tracing;
pub mod worker;

pub use config::{CommandLine, SupervisorConfig};
pub use error::{Error, Result};
pub use scanner::DeviceScanner;
pub use service::BenchService;
pub use state::{ConnectionEvent, ConnectionState, ConnectionStatus};
pub use supervisor::Supervisor;
