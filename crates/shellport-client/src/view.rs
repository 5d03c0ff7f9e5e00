//! Read-only projection of a manager's connection state.

use std::fmt;

use shellport_core::error::{LinkError, LinkResult};
use shellport_core::transport::TransportHandle;
use tokio::sync::watch;

/// Transport connectivity and session readiness, as seen by collaborators.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionState {
    /// The transport reports an active connection.
    pub connected: bool,
    /// The remote peer confirmed the interactive session is usable.
    pub ready: bool,
}

/// Coarse lifecycle phase, for rendering status affordances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// No transport is owned.
    Idle,
    /// A transport is owned but not connected (handshake or reconnect pending).
    Connecting,
    /// Connected, waiting for the session to become ready.
    Connected,
    /// Connected and the session is ready.
    Ready,
}

impl fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Connecting => f.write_str("connecting"),
            Self::Connected => f.write_str("connected, session pending"),
            Self::Ready => f.write_str("session ready"),
        }
    }
}

/// What the manager publishes on every change.
#[derive(Debug, Clone, Default)]
pub(crate) struct Snapshot {
    pub(crate) state: ConnectionState,
    pub(crate) handle: Option<TransportHandle>,
    pub(crate) last_failure: Option<String>,
}

impl Snapshot {
    fn phase(&self) -> ConnectionPhase {
        match (self.handle.is_some(), self.state) {
            (false, _) => ConnectionPhase::Idle,
            (true, ConnectionState { connected: false, .. }) => ConnectionPhase::Connecting,
            (true, ConnectionState { ready: false, .. }) => ConnectionPhase::Connected,
            (true, _) => ConnectionPhase::Ready,
        }
    }
}

/// Cloneable read-only view onto a `SessionConnectionManager`.
///
/// Exposes accessors only; every mutation goes through the manager.
#[derive(Debug, Clone)]
pub struct ConnectionView {
    rx: watch::Receiver<Snapshot>,
}

impl ConnectionView {
    pub(crate) fn new(rx: watch::Receiver<Snapshot>) -> Self {
        Self { rx }
    }

    pub fn connected(&self) -> bool {
        self.rx.borrow().state.connected
    }

    pub fn ready(&self) -> bool {
        self.rx.borrow().state.ready
    }

    pub fn state(&self) -> ConnectionState {
        self.rx.borrow().state
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.rx.borrow().phase()
    }

    /// The transport currently owned by the manager, if any.
    pub fn handle(&self) -> Option<TransportHandle> {
        self.rx.borrow().handle.clone()
    }

    /// Why the transport last left (or failed to reach) the connected state.
    /// Cleared when a new connection opens.
    pub fn last_failure(&self) -> Option<String> {
        self.rx.borrow().last_failure.clone()
    }

    /// Wait for the next published change and return the new state.
    ///
    /// Fails with [`LinkError::Closed`] once the manager is dropped.
    pub async fn changed(&mut self) -> LinkResult<ConnectionState> {
        self.rx.changed().await.map_err(|_| LinkError::Closed)?;
        let state = self.rx.borrow_and_update().state;
        Ok(state)
    }

    /// Wait until `predicate` holds for the current state.
    pub async fn wait_until<F>(&mut self, mut predicate: F) -> LinkResult<ConnectionState>
    where
        F: FnMut(&ConnectionState) -> bool,
    {
        loop {
            let state = self.rx.borrow_and_update().state;
            if predicate(&state) {
                return Ok(state);
            }
            self.rx.changed().await.map_err(|_| LinkError::Closed)?;
        }
    }
}
