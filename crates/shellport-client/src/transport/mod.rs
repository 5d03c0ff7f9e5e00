//! Transport implementations for shellport.
//!
//! The session manager only depends on the `Connector`/`Transport` traits from
//! `shellport-core`; this module provides the WebSocket implementation used in
//! production.

pub mod websocket;

pub use websocket::{WsConnector, WsTransport};
