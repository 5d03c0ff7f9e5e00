//! `shellport watch [ENDPOINT]` — hold a session transport open and report
//! its state until Ctrl-C.
//!
//! The peer speaks first once it has attached a shell, so the first frame
//! received on a connection marks the session ready. Frames themselves are
//! not rendered. Once the manager has released the transport (the peer
//! closed it or reconnection gave up) there is nothing left to watch.

use std::future::pending;

use anyhow::{bail, Context, Result};
use shellport_client::{
    ConnectOptions, ConnectionPhase, ConnectionView, Frame, SessionConnectionManager, TransportId,
};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

type Inbound = Option<(TransportId, broadcast::Receiver<Frame>)>;

pub async fn run(endpoint: &str, options: ConnectOptions) -> Result<()> {
    let manager = SessionConnectionManager::with_websocket();
    let mut view = manager.view();
    let mut phase = view.phase();
    let mut inbound: Inbound = None;

    manager.connect(endpoint, &options);
    if let Some(reason) = released(&view) {
        bail!("{endpoint}: {reason}");
    }
    eprintln!("shellport: watching {endpoint} (Ctrl-C to quit)");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            changed = view.changed() => {
                changed.context("session manager went away")?;
                let next = view.phase();
                if next != phase {
                    report(next, view.last_failure());
                    phase = next;
                }
                if let Some(reason) = released(&view) {
                    bail!("{endpoint}: gave up: {reason}");
                }
                resubscribe(&view, &mut inbound);
            }

            frame = next_frame(&mut inbound) => match frame {
                Some(frame) => {
                    debug!(bytes = frame_len(&frame), "frame from peer");
                    if view.connected() && !view.ready() {
                        manager.mark_session_ready(true);
                    }
                }
                None => inbound = None,
            },

            result = &mut ctrl_c => {
                result.context("failed to listen for Ctrl-C")?;
                info!("disconnect requested");
                break;
            }
        }
    }

    manager.disconnect();
    eprintln!("shellport: disconnected from {endpoint}");
    Ok(())
}

fn report(phase: ConnectionPhase, failure: Option<String>) {
    match (phase, failure) {
        (ConnectionPhase::Connecting | ConnectionPhase::Idle, Some(reason)) => {
            eprintln!("shellport: {phase} (last failure: {reason})");
        }
        _ => eprintln!("shellport: {phase}"),
    }
}

/// The failure that made the manager drop its transport, if it has.
fn released(view: &ConnectionView) -> Option<String> {
    match view.phase() {
        ConnectionPhase::Idle => view.last_failure(),
        _ => None,
    }
}

/// Keep exactly one subscription, on the transport the manager owns now.
fn resubscribe(view: &ConnectionView, inbound: &mut Inbound) {
    match (view.handle(), inbound.as_ref()) {
        (Some(handle), Some((id, _))) if handle.id() == *id => {}
        (Some(handle), _) => *inbound = Some((handle.id(), handle.subscribe())),
        (None, _) => *inbound = None,
    }
}

async fn next_frame(inbound: &mut Inbound) -> Option<Frame> {
    let Some((_, rx)) = inbound else {
        return pending().await;
    };
    loop {
        match rx.recv().await {
            Ok(frame) => return Some(frame),
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "fell behind the peer's output"),
            Err(RecvError::Closed) => return None,
        }
    }
}

fn frame_len(frame: &Frame) -> usize {
    match frame {
        Frame::Text(text) => text.len(),
        Frame::Binary(data) => data.len(),
    }
}
