//! shellport-core: shared types for the shellport session-connection layer.
//!
//! Provides the error type, connect options, endpoint normalization, and the
//! transport/observer/connector traits the session manager is written against.

pub mod endpoint;
pub mod error;
pub mod options;
pub mod transport;

// Re-export commonly used items at crate root.
pub use endpoint::{to_websocket_url, DEFAULT_ENDPOINT, ENDPOINT_ENV};
pub use error::{LinkError, LinkResult};
pub use options::ConnectOptions;
pub use transport::{
    CloseReason, Connector, Frame, Transport, TransportHandle, TransportId, TransportObserver,
};
