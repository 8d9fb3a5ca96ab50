//! Connection state machine.
//!
//! The machine owns the handle of the single live worker (if any) and is the
//! only thing that changes the connection state. Its inputs are a closed set:
//!
//! - [`begin`](ConnectionStateMachine::begin): a worker was spawned for a
//!   device and is pending,
//! - a `READY` token from that worker: pending becomes connected,
//! - a `DISCONNECTED` token, a process-exit notification or an expired
//!   grace period: [`cleanup`](ConnectionStateMachine::cleanup).
//!
//! Every input is tagged with the [`SessionId`] of the worker it came from.
//! Inputs from any other session are ignored, which makes `cleanup` safe to
//! call from each termination path: the first call releases the worker and
//! emits `Disconnected`, later calls for the same session do nothing.

use std::fmt;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::error::{Error, Result};
use crate::protocol::ControlToken;
use crate::tracing::prelude::*;

/// Identifies one spawned worker, from spawn to cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Externally visible connection state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected {
        device_name: String,
    },
}

/// Serializable status, as reported to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub connected: bool,
    pub device_name: Option<String>,
}

impl From<&ConnectionState> for ConnectionStatus {
    fn from(state: &ConnectionState) -> Self {
        match state {
            ConnectionState::Disconnected => Self {
                connected: false,
                device_name: None,
            },
            ConnectionState::Connected { device_name } => Self {
                connected: true,
                device_name: Some(device_name.clone()),
            },
        }
    }
}

/// Lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The worker reported `READY` for this device.
    Connected { device_name: String },

    /// The worker session ended, whichever way it ended.
    Disconnected,
}

/// What became of a worker stdout line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineDisposition {
    /// Consumed as a control token; must not be logged.
    Control(ControlToken),

    /// Ordinary output for the log buffer.
    Log,
}

struct Session<H> {
    id: SessionId,
    device_name: String,
    handle: H,
}

/// State machine over the single worker slot.
///
/// Generic over the handle type so it can be driven without processes.
pub struct ConnectionStateMachine<H> {
    state: ConnectionState,
    session: Option<Session<H>>,
    events: broadcast::Sender<ConnectionEvent>,
}

impl<H> ConnectionStateMachine<H> {
    pub fn new(events: broadcast::Sender<ConnectionEvent>) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            session: None,
            events,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus::from(&self.state)
    }

    /// Whether a worker handle is currently owned (pending or connected).
    pub fn is_occupied(&self) -> bool {
        self.session.is_some()
    }

    pub fn active_session(&self) -> Option<SessionId> {
        self.session.as_ref().map(|s| s.id)
    }

    pub fn handle(&self) -> Option<&H> {
        self.session.as_ref().map(|s| &s.handle)
    }

    /// Take ownership of a freshly spawned worker. The state stays
    /// `Disconnected` until the worker reports `READY`.
    pub fn begin(&mut self, id: SessionId, device_name: &str, handle: H) -> Result<()> {
        if self.session.is_some() {
            return Err(Error::AlreadyConnected);
        }

        debug!(session = %id, device = %device_name, "Worker pending");
        self.session = Some(Session {
            id,
            device_name: device_name.to_string(),
            handle,
        });
        Ok(())
    }

    /// Route one stdout line from session `id`.
    ///
    /// Control tokens are always consumed, but only act when they come from
    /// the active session.
    pub fn handle_line(&mut self, id: SessionId, line: &str) -> LineDisposition {
        let Some(token) = ControlToken::parse(line) else {
            return LineDisposition::Log;
        };

        if self.active_session() != Some(id) {
            trace!(session = %id, token = ?token, "Ignoring token from inactive worker");
            return LineDisposition::Control(token);
        }

        match token {
            ControlToken::Ready => self.on_ready(),
            ControlToken::Disconnected => {
                self.cleanup(id);
            }
        }
        LineDisposition::Control(token)
    }

    fn on_ready(&mut self) {
        let Some(session) = &self.session else {
            return;
        };

        if matches!(self.state, ConnectionState::Connected { .. }) {
            debug!(session = %session.id, "Duplicate READY ignored");
            return;
        }

        info!(device = %session.device_name, "Connected");
        self.state = ConnectionState::Connected {
            device_name: session.device_name.clone(),
        };
        // No subscribers is fine; status() remains authoritative.
        let _ = self.events.send(ConnectionEvent::Connected {
            device_name: session.device_name.clone(),
        });
    }

    /// End session `id`: release its handle, return to `Disconnected` and
    /// emit `Disconnected`.
    ///
    /// Returns the released handle, or `None` when `id` is not the active
    /// session (already cleaned up, or superseded), in which case nothing
    /// happens.
    pub fn cleanup(&mut self, id: SessionId) -> Option<H> {
        if self.active_session() != Some(id) {
            return None;
        }
        let session = self.session.take()?;

        info!(session = %id, device = %session.device_name, "Disconnected");
        self.state = ConnectionState::Disconnected;
        let _ = self.events.send(ConnectionEvent::Disconnected);
        Some(session.handle)
    }
}
