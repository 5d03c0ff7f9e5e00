//! Session-connection manager.
//!
//! `SessionConnectionManager` owns at most one transport at a time and
//! publishes two independent flags: transport connectivity and session
//! readiness. Readiness is only ever true while the transport is connected;
//! every transition out of the connected state clears it in the same update.
//!
//! Control operations never block. Outcomes of a connection attempt arrive
//! later through the transport's lifecycle callbacks, which are applied only
//! when they come from the transport the manager currently owns.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use shellport_core::error::LinkError;
use shellport_core::options::ConnectOptions;
use shellport_core::transport::{
    CloseReason, Connector, Transport, TransportHandle, TransportId, TransportObserver,
};

use crate::transport::WsConnector;
use crate::view::{ConnectionState, ConnectionView, Snapshot};

/// The transport slot. `id` is reserved before the connector is asked for a
/// transport so callbacks fired during `open` are already attributable.
#[derive(Default)]
struct Current {
    id: Option<TransportId>,
    transport: Option<Arc<dyn Transport>>,
}

struct Inner {
    current: Mutex<Current>,
    next_id: AtomicU64,
    state: watch::Sender<Snapshot>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Current> {
        self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn apply_open(&self, id: TransportId) {
        let current = self.lock();
        if current.id != Some(id) {
            debug!(transport = %id, "ignoring open from stale transport");
            return;
        }
        info!(transport = %id, "transport connected");
        self.state.send_if_modified(|snap| {
            let changed = !snap.state.connected || snap.last_failure.is_some();
            snap.state.connected = true;
            snap.last_failure = None;
            changed
        });
    }

    fn apply_down(&self, id: TransportId, failure: String) {
        let current = self.lock();
        if current.id != Some(id) {
            debug!(transport = %id, %failure, "ignoring event from stale transport");
            return;
        }
        self.state.send_modify(|snap| {
            snap.state = ConnectionState::default();
            snap.last_failure = Some(failure);
        });
    }

    /// Release a transport that will not reconnect. `last_failure` is kept so
    /// callers can still tell why it went away.
    fn apply_stopped(&self, id: TransportId) {
        let released = {
            let mut current = self.lock();
            if current.id != Some(id) {
                debug!(transport = %id, "ignoring stop from stale transport");
                return;
            }
            current.id = None;
            let released = current.transport.take();
            self.state.send_modify(|snap| {
                snap.state = ConnectionState::default();
                snap.handle = None;
            });
            released
        };

        info!(transport = %id, "transport stopped, releasing it");
        if let Some(transport) = released {
            transport.close();
        }
    }
}

/// Observer bound to one transport generation.
struct Binding {
    id: TransportId,
    inner: Weak<Inner>,
}

impl TransportObserver for Binding {
    fn on_open(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.apply_open(self.id);
        }
    }

    fn on_close(&self, reason: CloseReason) {
        info!(transport = %self.id, %reason, "transport disconnected");
        if let Some(inner) = self.inner.upgrade() {
            inner.apply_down(self.id, reason.to_string());
        }
    }

    fn on_error(&self, err: &LinkError) {
        error!(transport = %self.id, "transport connection error: {}", err);
        if let Some(inner) = self.inner.upgrade() {
            inner.apply_down(self.id, err.to_string());
        }
    }

    fn on_stopped(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.apply_stopped(self.id);
        }
    }
}

/// Owns the transport for one interactive session and tracks its state.
pub struct SessionConnectionManager {
    connector: Arc<dyn Connector>,
    inner: Arc<Inner>,
}

impl SessionConnectionManager {
    /// Create a manager with no transport, using `connector` to open one.
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        let (state, _) = watch::channel(Snapshot::default());
        Self {
            connector,
            inner: Arc::new(Inner {
                current: Mutex::new(Current::default()),
                next_id: AtomicU64::new(1),
                state,
            }),
        }
    }

    /// Create a manager backed by the WebSocket transport.
    pub fn with_websocket() -> Self {
        Self::new(Arc::new(WsConnector::new()))
    }

    /// Transport-level connectivity.
    pub fn connected(&self) -> bool {
        self.inner.state.borrow().state.connected
    }

    /// Application-level session readiness.
    pub fn ready(&self) -> bool {
        self.inner.state.borrow().state.ready
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.borrow().state
    }

    /// The currently owned transport, for payload collaborators.
    pub fn handle(&self) -> Option<TransportHandle> {
        self.inner.state.borrow().handle.clone()
    }

    /// Why the transport last went down, if it did since the last connect.
    pub fn last_failure(&self) -> Option<String> {
        self.inner.state.borrow().last_failure.clone()
    }

    /// A read-only view that can be handed to other components.
    pub fn view(&self) -> ConnectionView {
        ConnectionView::new(self.inner.state.subscribe())
    }

    /// Open a transport to `endpoint`.
    ///
    /// A no-op if the owned transport is already connected. A held transport
    /// that is not connected (still connecting, or dropped) is closed and
    /// replaced. Failures are reported through the published state.
    pub fn connect(&self, endpoint: &str, options: &ConnectOptions) {
        let (id, stale) = {
            let mut current = self.inner.lock();
            if let Some(transport) = &current.transport {
                if transport.is_connected() {
                    debug!("transport already connected");
                    self.inner.state.send_if_modified(|snap| {
                        let changed = !snap.state.connected;
                        snap.state.connected = true;
                        changed
                    });
                    return;
                }
            }

            let id = TransportId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
            let stale = current.transport.take();
            current.id = Some(id);
            self.inner.state.send_modify(|snap| {
                snap.state = ConnectionState::default();
                snap.handle = None;
                snap.last_failure = None;
            });
            (id, stale)
        };

        if let Some(stale) = stale {
            debug!("releasing stale transport before reconnecting");
            stale.close();
        }

        info!(transport = %id, endpoint, "connecting");
        let observer = Arc::new(Binding {
            id,
            inner: Arc::downgrade(&self.inner),
        });

        match self.connector.open(endpoint, options, observer) {
            Ok(transport) => {
                let mut current = self.inner.lock();
                if current.id == Some(id) {
                    current.transport = Some(Arc::clone(&transport));
                    self.inner.state.send_modify(|snap| {
                        snap.handle = Some(TransportHandle::new(id, transport));
                    });
                } else {
                    // Superseded by a concurrent connect/disconnect.
                    drop(current);
                    transport.close();
                }
            }
            Err(e) => {
                error!(transport = %id, endpoint, "failed to open transport: {}", e);
                let mut current = self.inner.lock();
                if current.id == Some(id) {
                    current.id = None;
                    self.inner.state.send_modify(|snap| {
                        snap.state = ConnectionState::default();
                        snap.handle = None;
                        snap.last_failure = Some(e.to_string());
                    });
                }
            }
        }
    }

    /// Tear down the owned transport, if any, and reset both flags.
    ///
    /// Teardown is fire-and-forget and also abandons a pending attempt.
    pub fn disconnect(&self) {
        let released = {
            let mut current = self.inner.lock();
            current.id = None;
            let released = current.transport.take();
            self.inner.state.send_if_modified(|snap| {
                let changed = snap.state != ConnectionState::default() || snap.handle.is_some();
                snap.state = ConnectionState::default();
                snap.handle = None;
                changed
            });
            released
        };

        if let Some(transport) = released {
            transport.close();
            info!("session transport disconnected");
        }
    }

    /// Record whether the remote interactive session is usable.
    ///
    /// Calling this without a connection is not an error, but readiness is
    /// clamped to the transport: `true` while not connected is dropped with a
    /// warning, so `ready && !connected` is never published. The flag is not
    /// remembered either; a caller that marks the session ready before the
    /// transport opens has to mark it again after `on_open`.
    pub fn mark_session_ready(&self, is_ready: bool) {
        let _current = self.inner.lock();
        self.inner.state.send_if_modified(|snap| {
            if is_ready && !snap.state.connected {
                warn!("session marked ready while transport is not connected");
                return false;
            }
            let changed = snap.state.ready != is_ready;
            snap.state.ready = is_ready;
            changed
        });
    }
}

impl Drop for SessionConnectionManager {
    fn drop(&mut self) {
        let released = self.inner.lock().transport.take();
        if let Some(transport) = released {
            transport.close();
        }
    }
}
