//! shellport-client: session-connection manager for remote terminal sessions.
//!
//! Owns the bidirectional transport that carries an interactive session and
//! tracks two independent signals: whether the transport is connected, and
//! whether the remote peer has made the session ready.
//!
//! # Quick Start
//!
//! ```no_run
//! use shellport_client::{ConnectOptions, SessionConnectionManager};
//!
//! # async fn example() {
//! let manager = SessionConnectionManager::with_websocket();
//! let mut view = manager.view();
//!
//! manager.connect("http://localhost:3000/ssh", &ConnectOptions::default());
//! view.wait_until(|s| s.connected).await.ok();
//!
//! // Once the peer reports that a shell was allocated:
//! manager.mark_session_ready(true);
//!
//! manager.disconnect();
//! # }
//! ```

pub mod manager;
pub mod transport;
pub mod view;

// Re-export primary public types.
pub use manager::SessionConnectionManager;
pub use transport::{WsConnector, WsTransport};
pub use view::{ConnectionPhase, ConnectionState, ConnectionView};

// Re-export shellport-core types for convenience.
pub use shellport_core::{
    CloseReason, ConnectOptions, Frame, LinkError, LinkResult, TransportHandle, TransportId,
};
