//! `shellport probe [ENDPOINT]` — check that the endpoint accepts a transport.
//!
//! Makes a single attempt (no reconnection), waits for it to open or fail,
//! reports the outcome, and tears the transport down again.

use std::time::Duration;

use anyhow::{bail, Result};
use shellport_client::{ConnectOptions, SessionConnectionManager};
use tokio::time::{self, Instant};
use tracing::info;

/// Slack on top of the connect timeout before we stop waiting ourselves.
const GRACE: Duration = Duration::from_millis(500);

pub async fn run(endpoint: &str, mut options: ConnectOptions) -> Result<()> {
    options.reconnection_attempts = 0;

    let manager = SessionConnectionManager::with_websocket();
    let mut view = manager.view();
    let started = Instant::now();
    manager.connect(endpoint, &options);

    let wait = options.connect_timeout + GRACE;
    let outcome = time::timeout(wait, async {
        loop {
            if view.connected() {
                return Ok(());
            }
            if let Some(reason) = view.last_failure() {
                return Err(reason);
            }
            if view.changed().await.is_err() {
                return Err("session manager went away".to_string());
            }
        }
    })
    .await;

    manager.disconnect();

    match outcome {
        Ok(Ok(())) => {
            let elapsed = started.elapsed();
            info!(endpoint, ?elapsed, "probe succeeded");
            println!("{endpoint}: connected in {} ms", elapsed.as_millis());
            Ok(())
        }
        Ok(Err(reason)) => bail!("{endpoint}: {reason}"),
        Err(_) => bail!("{endpoint}: no answer within {} ms", wait.as_millis()),
    }
}
