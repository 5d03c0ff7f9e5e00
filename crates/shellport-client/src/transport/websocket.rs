//! WebSocket transport for shellport.
//!
//! Each transport is driven by one background task that owns the socket:
//! it performs the handshake (bounded by `connect_timeout`), pumps frames in
//! both directions, sends keepalive pings, and reconnects with backoff after
//! a failed attempt or an unexpected drop. Lifecycle changes are reported to
//! the observer in the order they happen, and `on_stopped` follows the last
//! of them once the task exits.
//!
//! Close reasons:
//! - peer close frame → `io server disconnect` (no reconnect)
//! - `close()` → `io client disconnect` (no reconnect)
//! - stream ended / failed → `transport close` / `transport error`
//! - silent peer → `ping timeout`

use std::future::pending;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::COOKIE;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use shellport_core::endpoint::to_websocket_url;
use shellport_core::error::{LinkError, LinkResult};
use shellport_core::options::ConnectOptions;
use shellport_core::transport::{CloseReason, Connector, Frame, Transport, TransportObserver};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Inbound frames buffered per subscriber before lagging.
const INBOUND_CAPACITY: usize = 256;

/// Outgoing frames held while the socket is not open.
const OUTGOING_CAPACITY: usize = 64;

/// Build the handshake request, attaching credentials when enabled.
fn build_request(url: &str, options: &ConnectOptions) -> LinkResult<Request> {
    let mut request = url
        .into_client_request()
        .map_err(|e| LinkError::InvalidEndpoint(format!("{url}: {e}")))?;

    if let Some(cookie) = options.handshake_cookie() {
        let value = HeaderValue::from_str(cookie)
            .map_err(|e| LinkError::Other(format!("invalid cookie header: {e}")))?;
        request.headers_mut().insert(COOKIE, value);
    }

    Ok(request)
}

fn into_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text),
        Frame::Binary(data) => Message::Binary(data),
    }
}

/// Resolves once `close()` was called or the transport was dropped.
async fn closed(shutdown: &mut watch::Receiver<bool>) {
    loop {
        let is_closed = *shutdown.borrow_and_update();
        if is_closed {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => pending::<()>().await,
    }
}

/// Opens WebSocket transports on the current tokio runtime.
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for WsConnector {
    fn open(
        &self,
        endpoint: &str,
        options: &ConnectOptions,
        observer: Arc<dyn TransportObserver>,
    ) -> LinkResult<Arc<dyn Transport>> {
        let url = to_websocket_url(endpoint)?;
        build_request(&url, options)?;
        let runtime = Handle::try_current()
            .map_err(|e| LinkError::Runtime(format!("no tokio runtime: {e}")))?;

        let (outgoing_tx, outgoing_rx) = mpsc::channel::<Frame>(OUTGOING_CAPACITY);
        let (inbound_tx, _) = broadcast::channel::<Frame>(INBOUND_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let connected = Arc::new(AtomicBool::new(false));

        let driver = Driver {
            url: url.clone(),
            options: options.clone(),
            observer,
            connected: connected.clone(),
            outgoing_rx,
            inbound_tx: inbound_tx.clone(),
            shutdown_rx,
        };
        runtime.spawn(driver.run());
        debug!(url = %url, "WebSocket transport started");

        Ok(Arc::new(WsTransport {
            url,
            connected,
            closed: AtomicBool::new(false),
            outgoing_tx,
            inbound_tx,
            shutdown_tx,
        }))
    }
}

/// Handle to one WebSocket connection and its reconnecting driver task.
pub struct WsTransport {
    url: String,
    connected: Arc<AtomicBool>,
    closed: AtomicBool,
    outgoing_tx: mpsc::Sender<Frame>,
    inbound_tx: broadcast::Sender<Frame>,
    shutdown_tx: watch::Sender<bool>,
}

impl WsTransport {
    /// The WebSocket URL this transport dials.
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Transport for WsTransport {
    fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && self.connected.load(Ordering::SeqCst)
    }

    /// Frames sent while a (re)connect is in progress are delivered once the
    /// socket is open, up to `OUTGOING_CAPACITY` of them.
    fn send(&self, frame: Frame) -> LinkResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(LinkError::Closed);
        }
        self.outgoing_tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => LinkError::QueueFull,
            TrySendError::Closed(_) => LinkError::Closed,
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<Frame> {
        self.inbound_tx.subscribe()
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.connected.store(false, Ordering::SeqCst);
        self.shutdown_tx.send_replace(true);
        debug!(url = %self.url, "WebSocket transport close requested");
    }
}

enum Attempt {
    Open(Box<WsStream>),
    Failed(LinkError),
    Cancelled,
}

/// Background task owning the socket for one `WsTransport`.
struct Driver {
    url: String,
    options: ConnectOptions,
    observer: Arc<dyn TransportObserver>,
    connected: Arc<AtomicBool>,
    outgoing_rx: mpsc::Receiver<Frame>,
    inbound_tx: broadcast::Sender<Frame>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Driver {
    async fn run(mut self) {
        self.drive().await;
        self.connected.store(false, Ordering::SeqCst);
        debug!(url = %self.url, "WebSocket transport stopped");
        self.observer.on_stopped();
    }

    /// Connect, pump and reconnect until closed or out of attempts.
    async fn drive(&mut self) {
        let mut failures: u32 = 0;

        loop {
            match self.establish().await {
                Attempt::Cancelled => {
                    debug!(url = %self.url, "connection attempt abandoned");
                    return;
                }
                Attempt::Failed(err) => {
                    warn!(url = %self.url, "WebSocket connect failed: {}", err);
                    self.observer.on_error(&err);
                }
                Attempt::Open(ws) => {
                    failures = 0;
                    self.connected.store(true, Ordering::SeqCst);
                    info!("WebSocket connected to {}", self.url);
                    self.observer.on_open();

                    let reason = self.pump(*ws).await;
                    self.connected.store(false, Ordering::SeqCst);
                    debug!(url = %self.url, %reason, "WebSocket disconnected");

                    let recoverable = reason.is_recoverable();
                    self.observer.on_close(reason);
                    if !recoverable {
                        return;
                    }
                }
            }

            failures += 1;
            if failures > self.options.reconnection_attempts {
                if self.options.reconnection_attempts > 0 {
                    error!(
                        url = %self.url,
                        attempts = self.options.reconnection_attempts,
                        "giving up after reconnection attempts"
                    );
                }
                return;
            }

            let jitter: f64 = rand::thread_rng().gen_range(-1.0..=1.0);
            let delay = self.options.reconnect_delay(failures, jitter);
            debug!(url = %self.url, attempt = failures, ?delay, "reconnecting");

            tokio::select! {
                _ = time::sleep(delay) => {}
                _ = closed(&mut self.shutdown_rx) => {
                    debug!(url = %self.url, "reconnection cancelled");
                    return;
                }
            }
        }
    }

    async fn establish(&mut self) -> Attempt {
        let request = match build_request(&self.url, &self.options) {
            Ok(request) => request,
            Err(e) => return Attempt::Failed(e),
        };
        let timeout = self.options.connect_timeout;

        tokio::select! {
            biased;
            _ = closed(&mut self.shutdown_rx) => Attempt::Cancelled,
            result = time::timeout(timeout, connect_async(request)) => match result {
                Ok(Ok((ws, _response))) => Attempt::Open(Box::new(ws)),
                Ok(Err(e)) => {
                    Attempt::Failed(LinkError::Transport(format!("WebSocket connect error: {e}")))
                }
                Err(_) => Attempt::Failed(LinkError::Timeout),
            },
        }
    }

    /// Shuttle frames until the connection ends, returning why it ended.
    async fn pump(&mut self, ws: WsStream) -> CloseReason {
        let (mut sink, mut stream) = ws.split();

        let liveness = self.options.liveness_window();
        let interval = self.options.ping_interval;
        let mut keepalive = liveness.map(|_| {
            let mut ticker = time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });
        let mut last_seen = Instant::now();

        loop {
            tokio::select! {
                _ = closed(&mut self.shutdown_rx) => {
                    let _ = sink.send(Message::Close(None)).await;
                    let _ = sink.close().await;
                    return CloseReason::ClientDisconnect;
                }

                frame = self.outgoing_rx.recv() => {
                    let Some(frame) = frame else {
                        return CloseReason::ClientDisconnect;
                    };
                    if let Err(e) = sink.send(into_message(frame)).await {
                        return CloseReason::TransportError(e.to_string());
                    }
                }

                msg = stream.next() => {
                    last_seen = Instant::now();
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            let _ = self.inbound_tx.send(Frame::Text(text));
                        }
                        Some(Ok(Message::Binary(data))) => {
                            let _ = self.inbound_tx.send(Frame::Binary(data));
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            let _ = sink.send(Message::Pong(payload)).await;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            debug!(?frame, "WebSocket close frame received");
                            return CloseReason::ServerDisconnect;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!("WebSocket read error: {}", e);
                            return CloseReason::TransportError(e.to_string());
                        }
                        None => return CloseReason::TransportClose,
                    }
                }

                _ = tick(&mut keepalive) => {
                    if let Some(window) = liveness {
                        if last_seen.elapsed() > window {
                            warn!(url = %self.url, "no traffic from peer within {:?}", window);
                            return CloseReason::PingTimeout;
                        }
                    }
                    if let Err(e) = sink.send(Message::Ping(Vec::new())).await {
                        return CloseReason::TransportError(e.to_string());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;
    use tokio_tungstenite::tungstenite::handshake::server::{
        ErrorResponse, Request as ServerRequest, Response,
    };
    use tokio_tungstenite::{accept_async, accept_hdr_async};

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Open,
        Close(CloseReason),
        Error(LinkError),
        Stopped,
    }

    struct Recorder {
        tx: mpsc::UnboundedSender<Event>,
    }

    impl TransportObserver for Recorder {
        fn on_open(&self) {
            let _ = self.tx.send(Event::Open);
        }

        fn on_close(&self, reason: CloseReason) {
            let _ = self.tx.send(Event::Close(reason));
        }

        fn on_error(&self, err: &LinkError) {
            let _ = self.tx.send(Event::Error(err.clone()));
        }

        fn on_stopped(&self) {
            let _ = self.tx.send(Event::Stopped);
        }
    }

    /// The receiver yields `None` once the driver task has exited.
    fn recorder() -> (Arc<Recorder>, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Recorder { tx }), rx)
    }

    async fn next_event(events: &mut mpsc::UnboundedReceiver<Event>) -> Option<Event> {
        time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for transport event")
    }

    fn quick_options() -> ConnectOptions {
        ConnectOptions {
            reconnection_attempts: 0,
            connect_timeout: Duration::from_secs(2),
            reconnection_delay: Duration::from_millis(10),
            reconnection_delay_max: Duration::from_millis(50),
            ..Default::default()
        }
    }

    async fn listener() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, format!("http://{addr}/ssh"))
    }

    #[test]
    fn open_rejects_bad_endpoint() {
        let (observer, _events) = recorder();
        let result = WsConnector::new().open("ftp://example.com", &quick_options(), observer);
        assert!(matches!(result, Err(LinkError::InvalidEndpoint(_))));
    }

    #[test]
    fn open_requires_runtime() {
        let (observer, _events) = recorder();
        let result = WsConnector::new().open("ws://127.0.0.1:1", &quick_options(), observer);
        assert!(matches!(result, Err(LinkError::Runtime(_))));
    }

    #[test]
    fn cookie_header_follows_credentials_flag() {
        let mut options = ConnectOptions {
            cookie: Some("sid=abc".into()),
            ..Default::default()
        };
        let request = build_request("ws://localhost/ssh", &options).unwrap();
        assert_eq!(request.headers().get(COOKIE).unwrap(), "sid=abc");

        options.with_credentials = false;
        let request = build_request("ws://localhost/ssh", &options).unwrap();
        assert!(request.headers().get(COOKIE).is_none());
    }

    #[tokio::test]
    async fn exchanges_frames_and_reports_server_close() {
        let (listener, endpoint) = listener().await;
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                if let Message::Text(text) = msg {
                    ws.send(Message::Text(format!("echo:{text}"))).await.unwrap();
                    let _ = ws.close(None).await;
                    break;
                }
            }
            while let Some(Ok(_)) = ws.next().await {}
        });

        let (observer, mut events) = recorder();
        let transport = WsConnector::new()
            .open(&endpoint, &quick_options(), observer)
            .unwrap();

        assert_eq!(next_event(&mut events).await, Some(Event::Open));
        assert!(transport.is_connected());

        let mut inbound = transport.subscribe();
        transport.send(Frame::Text("hello".into())).unwrap();
        let frame = time::timeout(Duration::from_secs(5), inbound.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame, Frame::Text("echo:hello".into()));

        assert_eq!(
            next_event(&mut events).await,
            Some(Event::Close(CloseReason::ServerDisconnect))
        );
        assert!(!transport.is_connected());
        assert_eq!(next_event(&mut events).await, Some(Event::Stopped));
        assert_eq!(next_event(&mut events).await, None);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn refused_connection_reports_error() {
        let endpoint = {
            let (_listener, endpoint) = listener().await;
            endpoint
        };

        let (observer, mut events) = recorder();
        let transport = WsConnector::new()
            .open(&endpoint, &quick_options(), observer)
            .unwrap();

        let event = next_event(&mut events).await;
        assert!(matches!(event, Some(Event::Error(LinkError::Transport(_)))));
        assert_eq!(next_event(&mut events).await, Some(Event::Stopped));
        assert_eq!(next_event(&mut events).await, None);
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn unanswered_handshake_times_out() {
        // Never accepted: the kernel completes TCP but nobody answers HTTP.
        let (_listener, endpoint) = listener().await;
        let options = ConnectOptions {
            connect_timeout: Duration::from_millis(200),
            ..quick_options()
        };

        let (observer, mut events) = recorder();
        let _transport = WsConnector::new().open(&endpoint, &options, observer).unwrap();

        assert_eq!(next_event(&mut events).await, Some(Event::Error(LinkError::Timeout)));
        assert_eq!(next_event(&mut events).await, Some(Event::Stopped));
        assert_eq!(next_event(&mut events).await, None);
    }

    #[tokio::test]
    async fn close_abandons_pending_attempt() {
        let (_listener, endpoint) = listener().await;
        let options = ConnectOptions {
            connect_timeout: Duration::from_secs(10),
            ..quick_options()
        };

        let (observer, mut events) = recorder();
        let transport = WsConnector::new().open(&endpoint, &options, observer).unwrap();
        time::sleep(Duration::from_millis(50)).await;
        transport.close();

        assert_eq!(next_event(&mut events).await, Some(Event::Stopped));
        assert_eq!(next_event(&mut events).await, None);
        assert!(!transport.is_connected());
        assert_eq!(transport.send(Frame::Text("x".into())), Err(LinkError::Closed));
    }

    #[tokio::test]
    async fn reconnects_after_unexpected_drop() {
        let (listener, endpoint) = listener().await;
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = accept_async(stream).await.unwrap();
            drop(ws);

            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        });

        let options = ConnectOptions {
            reconnection_attempts: 3,
            ..quick_options()
        };
        let (observer, mut events) = recorder();
        let transport = WsConnector::new().open(&endpoint, &options, observer).unwrap();

        assert_eq!(next_event(&mut events).await, Some(Event::Open));
        match next_event(&mut events).await {
            Some(Event::Close(reason)) => assert!(reason.is_recoverable()),
            other => panic!("expected recoverable close, got {other:?}"),
        }
        assert_eq!(next_event(&mut events).await, Some(Event::Open));
        assert!(transport.is_connected());

        transport.close();
        assert_eq!(
            next_event(&mut events).await,
            Some(Event::Close(CloseReason::ClientDisconnect))
        );
        assert_eq!(next_event(&mut events).await, Some(Event::Stopped));
        assert_eq!(next_event(&mut events).await, None);
    }

    #[tokio::test]
    async fn silent_peer_hits_ping_timeout() {
        let (listener, endpoint) = listener().await;
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let _ws = accept_async(stream).await.unwrap();
            // Never read, so pings go unanswered.
            time::sleep(Duration::from_secs(30)).await;
        });

        let options = ConnectOptions {
            ping_interval: Duration::from_millis(50),
            ping_timeout: Duration::from_millis(50),
            ..quick_options()
        };
        let (observer, mut events) = recorder();
        let _transport = WsConnector::new().open(&endpoint, &options, observer).unwrap();

        assert_eq!(next_event(&mut events).await, Some(Event::Open));
        assert_eq!(
            next_event(&mut events).await,
            Some(Event::Close(CloseReason::PingTimeout))
        );
        assert_eq!(next_event(&mut events).await, Some(Event::Stopped));
        assert_eq!(next_event(&mut events).await, None);
    }

    #[tokio::test]
    async fn gives_up_after_reconnection_attempts() {
        let endpoint = {
            let (_listener, endpoint) = listener().await;
            endpoint
        };
        let options = ConnectOptions {
            reconnection_attempts: 2,
            ..quick_options()
        };

        let (observer, mut events) = recorder();
        let transport = WsConnector::new().open(&endpoint, &options, observer).unwrap();

        for _ in 0..3 {
            let event = next_event(&mut events).await;
            assert!(matches!(event, Some(Event::Error(LinkError::Transport(_)))), "{event:?}");
        }
        assert_eq!(next_event(&mut events).await, Some(Event::Stopped));
        assert_eq!(next_event(&mut events).await, None);
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn send_queue_is_bounded_while_connecting() {
        // Never accepted, so nothing drains the queue.
        let (_listener, endpoint) = listener().await;
        let options = ConnectOptions {
            connect_timeout: Duration::from_secs(10),
            ..quick_options()
        };

        let (observer, _events) = recorder();
        let transport = WsConnector::new().open(&endpoint, &options, observer).unwrap();
        for n in 0..OUTGOING_CAPACITY {
            transport.send(Frame::Text(n.to_string())).unwrap();
        }
        assert_eq!(
            transport.send(Frame::Text("one too many".into())),
            Err(LinkError::QueueFull)
        );

        transport.close();
        assert_eq!(transport.send(Frame::Text("late".into())), Err(LinkError::Closed));
    }

    #[tokio::test]
    async fn handshake_carries_cookie() {
        let (listener, endpoint) = listener().await;
        let (cookie_tx, cookie_rx) = oneshot::channel::<Option<String>>();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let callback = move |req: &ServerRequest, resp: Response| {
                let cookie = req
                    .headers()
                    .get(COOKIE)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                let _ = cookie_tx.send(cookie);
                Ok::<_, ErrorResponse>(resp)
            };
            let mut ws = accept_hdr_async(stream, callback).await.unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        });

        let options = ConnectOptions {
            cookie: Some("connect.sid=s%3Aabc".into()),
            ..quick_options()
        };
        let (observer, mut events) = recorder();
        let transport = WsConnector::new().open(&endpoint, &options, observer).unwrap();

        assert_eq!(next_event(&mut events).await, Some(Event::Open));
        let cookie = cookie_rx.await.unwrap();
        assert_eq!(cookie.as_deref(), Some("connect.sid=s%3Aabc"));
        transport.close();
    }
}
