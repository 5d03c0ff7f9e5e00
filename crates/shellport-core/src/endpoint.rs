//! Endpoint normalization.
//!
//! The session-transport service is usually configured with its HTTP URL
//! (`http://host:3000/ssh`). The WebSocket transport needs the matching
//! `ws://` or `wss://` URL:
//! - `http://` → `ws://`
//! - `https://` → `wss://`
//! - `ws://` / `wss://` are kept as-is

use crate::error::{LinkError, LinkResult};

/// Built-in endpoint used when nothing else is configured.
pub const DEFAULT_ENDPOINT: &str = "http://localhost:3000/ssh";

/// Environment variable that overrides [`DEFAULT_ENDPOINT`].
pub const ENDPOINT_ENV: &str = "SHELLPORT_API_URL";

/// Convert an endpoint into a WebSocket URL.
pub fn to_websocket_url(endpoint: &str) -> LinkResult<String> {
    let trimmed = endpoint.trim();
    let (scheme, rest) = trimmed
        .split_once("://")
        .ok_or_else(|| LinkError::InvalidEndpoint(format!("missing scheme: {endpoint}")))?;

    let ws_scheme = match scheme.to_ascii_lowercase().as_str() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        _ => {
            return Err(LinkError::InvalidEndpoint(format!(
                "unsupported URL scheme: {endpoint} (expected http://, https://, ws://, or wss://)"
            )))
        }
    };

    let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
    if host.is_empty() {
        return Err(LinkError::InvalidEndpoint(format!("missing host: {endpoint}")));
    }

    Ok(format!("{ws_scheme}://{rest}"))
}
