//! Abstract transport for shellport.
//!
//! A transport is one persistent bidirectional connection to the
//! session-transport service. The session manager never talks to a socket
//! directly: it asks a [`Connector`] for a transport and learns about its
//! lifecycle through a [`TransportObserver`].

use std::fmt;
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::error::{LinkError, LinkResult};
use crate::options::ConnectOptions;

/// A raw payload carried by the transport. Framing inside the payload
/// belongs to the collaborator that parses session messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

/// Why a transport left the connected state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed the connection on purpose.
    ServerDisconnect,
    /// We closed it (`close()` was called).
    ClientDisconnect,
    /// The underlying stream ended without a close handshake.
    TransportClose,
    /// The underlying stream failed.
    TransportError(String),
    /// No traffic from the peer within the keepalive window.
    PingTimeout,
}

impl CloseReason {
    /// Whether the transport should try to reconnect after this close.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::ServerDisconnect | Self::ClientDisconnect)
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ServerDisconnect => f.write_str("io server disconnect"),
            Self::ClientDisconnect => f.write_str("io client disconnect"),
            Self::TransportClose => f.write_str("transport close"),
            Self::TransportError(detail) => write!(f, "transport error: {detail}"),
            Self::PingTimeout => f.write_str("ping timeout"),
        }
    }
}

/// Lifecycle callbacks a transport fires, in emission order.
pub trait TransportObserver: Send + Sync {
    /// The transport reached the connected state.
    fn on_open(&self);

    /// The transport left the connected state.
    fn on_close(&self, reason: CloseReason);

    /// A connection attempt failed (timeout, refused, handshake error).
    fn on_error(&self, err: &LinkError);

    /// The transport gave up for good and no further event will follow.
    /// Fired once, after the last `on_close`/`on_error`.
    fn on_stopped(&self);
}

/// One live bidirectional connection.
pub trait Transport: Send + Sync {
    /// Whether the transport currently reports an active connection.
    fn is_connected(&self) -> bool;

    /// Queue a frame for the peer. Fails with [`LinkError::Closed`] once the
    /// transport has been closed and with [`LinkError::QueueFull`] while the
    /// outgoing queue is at capacity.
    fn send(&self, frame: Frame) -> LinkResult<()>;

    /// Subscribe to frames received from the peer.
    fn subscribe(&self) -> broadcast::Receiver<Frame>;

    /// Request teardown. Returns immediately; abandons a pending attempt.
    fn close(&self);
}

/// Creates transports. `open` must not block: the handshake completes in the
/// background and is reported through `observer`.
pub trait Connector: Send + Sync {
    fn open(
        &self,
        endpoint: &str,
        options: &ConnectOptions,
        observer: Arc<dyn TransportObserver>,
    ) -> LinkResult<Arc<dyn Transport>>;
}

/// Generation number of a transport within one manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransportId(pub u64);

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Cloneable reference to the transport currently owned by a manager.
///
/// Handed to collaborators that send and receive session payloads.
#[derive(Clone)]
pub struct TransportHandle {
    id: TransportId,
    transport: Arc<dyn Transport>,
}

impl TransportHandle {
    pub fn new(id: TransportId, transport: Arc<dyn Transport>) -> Self {
        Self { id, transport }
    }

    pub fn id(&self) -> TransportId {
        self.id
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub fn send(&self, frame: Frame) -> LinkResult<()> {
        self.transport.send(frame)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Frame> {
        self.transport.subscribe()
    }
}

impl fmt::Debug for TransportHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportHandle")
            .field("id", &self.id)
            .field("connected", &self.transport.is_connected())
            .finish()
    }
}
