//! TCP accept loop and per-connection dispatch (spec §4.G "Contract").
//! Deliberately hand-rolled on `tokio::net::TcpListener` + `httparse` instead
//! of a framework router: once a request qualifies for a WebSocket upgrade,
//! the raw socket is detached from the HTTP state machine and handed
//! straight to the [`crate::ws::WebSocket`] codec, which no HTTP framework
//! exposes a hook for. Grounded in `original_source/REST/Listener.cc` /
//! `HTTPListener.cc`'s accept-loop contract.
use std::collections::HashMap as StdHashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex as AsyncMutex;

use crate::ws::{Action, Message, Role, TimerKind, WebSocket};

use super::handlers::AppState;
use super::request::{parse_head, Method};
use super::router::Router;
use super::response::Response;
use super::upgrade::build_upgrade_response;

/// Called once per fully-received message on an upgraded WebSocket
/// connection. Wired by whatever owns the sync engine (component above B);
/// here it's a pluggable callback so the listener stays decoupled from BLIP.
pub type MessageHandler = Arc<dyn Fn(Message) + Send + Sync>;

pub struct Listener {
    router: Router,
    state: Arc<AppState>,
    authenticator: Option<Arc<dyn Fn(Option<&str>) -> bool + Send + Sync>>,
    on_ws_message: Option<MessageHandler>,
    ping_interval: Duration,
    shutdown: Arc<tokio::sync::Notify>,
}

impl Listener {
    pub fn new(router: Router, state: Arc<AppState>) -> Self {
        Listener {
            router,
            state,
            authenticator: None,
            on_ws_message: None,
            ping_interval: crate::ws::socket::DEFAULT_PING_INTERVAL,
            shutdown: Arc::new(tokio::sync::Notify::new()),
        }
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    pub fn with_authenticator(mut self, auth: impl Fn(Option<&str>) -> bool + Send + Sync + 'static) -> Self {
        self.authenticator = Some(Arc::new(auth));
        self
    }

    pub fn with_websocket_handler(mut self, handler: impl Fn(Message) + Send + Sync + 'static) -> Self {
        self.on_ws_message = Some(Arc::new(handler));
        self
    }

    /// Binds `iface:port` and accepts connections until [`Listener::shutdown`]
    /// is called. Matches spec §4.G: `start(port, iface, tlsContextOrNull)`;
    /// TLS is out of scope here (spec §1), so only plaintext is implemented.
    pub async fn start(self: Arc<Self>, iface: &str, port: u16) -> std::io::Result<()> {
        let listener = TcpListener::bind((iface, port)).await?;
        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    self.state.tasks.stop_all();
                    while self.state.tasks.unfinished_count() > 0 {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                    }
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (stream, _addr) = accepted?;
                    let this = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = this.handle_connection(stream).await {
                            tracing::debug!(error = %e, "connection ended with error");
                        }
                    });
                }
            }
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.notify_waiters();
    }

    async fn handle_connection(self: Arc<Self>, mut stream: TcpStream) -> std::io::Result<()> {
        let mut buf = Vec::with_capacity(4096);
        let head_end = loop {
            let mut chunk = [0u8; 4096];
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                return Ok(());
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = find_header_end(&buf) {
                break pos;
            }
            if buf.len() > 64 * 1024 {
                let resp = Response::new(400);
                stream.write_all(&resp.to_bytes()).await?;
                return Ok(());
            }
        };

        let head = buf[..head_end].to_vec();
        let mut rest = buf[head_end..].to_vec();
        let mut req = match parse_head(&head) {
            Ok(r) => r,
            Err(_) => {
                stream.write_all(&Response::new(400).to_bytes()).await?;
                return Ok(());
            }
        };

        if let Some(len) = req.header("content-length").and_then(|v| v.parse::<usize>().ok()) {
            while rest.len() < len {
                let mut chunk = [0u8; 4096];
                let n = stream.read(&mut chunk).await?;
                if n == 0 {
                    break;
                }
                rest.extend_from_slice(&chunk[..n]);
            }
            rest.truncate(len);
            req.body = rest;
        }

        if let Some(auth) = &self.authenticator {
            if !auth(req.header("authorization")) {
                stream.write_all(&Response::new(401).to_bytes()).await?;
                return Ok(());
            }
        }

        if req.wants_websocket_upgrade() && req.path.ends_with("/_blipsync") {
            let Some(resp) = build_upgrade_response(&req) else {
                stream.write_all(&Response::new(400).to_bytes()).await?;
                return Ok(());
            };
            stream.write_all(&resp.to_bytes()).await?;
            self.serve_websocket(stream).await;
            return Ok(());
        }

        let resp = self.dispatch_rest(&req);
        stream.write_all(&resp.to_bytes()).await?;
        Ok(())
    }

    fn dispatch_rest(&self, req: &super::request::Request) -> Response {
        match (req.method, req.path.as_str()) {
            (Method::Get, "/_all_dbs") => super::handlers::all_dbs(&self.state),
            (Method::Get, "/_active_tasks") => super::handlers::active_tasks(&self.state),
            (Method::Post, "/_replicate") => super::handlers::replicate(&self.state, &req.body),
            _ => self
                .router
                .dispatch(req)
                .unwrap_or_else(Response::not_found),
        }
    }

    /// Drives the WebSocket state machine on its own socket until closed
    /// (spec §4.B / §5). Timers are tracked as plain deadlines since this
    /// loop already owns an async context; the shared [`crate::actor::TimerWheel`]
    /// is for mailbox-scheduled work, not per-socket I/O waits.
    async fn serve_websocket(self: Arc<Self>, stream: TcpStream) {
        let (mut read_half, write_half) = stream.into_split();
        let write_half = Arc::new(AsyncMutex::new(write_half));
        let mut ws = WebSocket::new(Role::Server).with_ping_interval(self.ping_interval);
        let mut timers: StdHashMap<TimerKind, Instant> = StdHashMap::new();

        if self.apply_actions(ws.connect(), &mut ws, &write_half, &mut timers).await {
            return;
        }
        if self.apply_actions(ws.on_connect(), &mut ws, &write_half, &mut timers).await {
            return;
        }

        let mut read_buf = [0u8; 8192];
        loop {
            let deadline = timers.values().min().copied();
            let sleep = async {
                match deadline {
                    Some(d) => tokio::time::sleep_until(d.into()).await,
                    None => std::future::pending::<()>().await,
                }
            };
            tokio::select! {
                result = read_half.read(&mut read_buf) => {
                    match result {
                        Ok(0) | Err(_) => {
                            let actions = ws.on_close_requested();
                            self.apply_actions(actions, &mut ws, &write_half, &mut timers).await;
                            break;
                        }
                        Ok(n) => {
                            let actions = ws.on_receive(&read_buf[..n]);
                            if self.apply_actions(actions, &mut ws, &write_half, &mut timers).await {
                                break;
                            }
                        }
                    }
                }
                _ = sleep => {
                    if let Some((&kind, _)) = timers.iter().min_by_key(|(_, t)| **t) {
                        timers.remove(&kind);
                        let actions = ws.on_timer(kind);
                        if self.apply_actions(actions, &mut ws, &write_half, &mut timers).await {
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Applies a batch of actions in order, feeding `Action::Write`'s actual
    /// byte count back into [`WebSocket::on_write_complete`] so the codec can
    /// detect a flushed close echo (spec §4.B) and clear backpressure (spec
    /// §4.B's `bufferedBytes` threshold). Returns `true` once the connection
    /// has been reported closed.
    async fn apply_actions(
        &self,
        actions: Vec<Action>,
        ws: &mut WebSocket,
        write_half: &Arc<AsyncMutex<tokio::net::tcp::OwnedWriteHalf>>,
        timers: &mut StdHashMap<TimerKind, Instant>,
    ) -> bool {
        let mut queue: std::collections::VecDeque<Action> = actions.into();
        let mut done = false;
        while let Some(action) = queue.pop_front() {
            match action {
                Action::Write(bytes) => {
                    let mut w = write_half.lock().await;
                    let n = if w.write_all(&bytes).await.is_ok() { bytes.len() } else { 0 };
                    drop(w);
                    queue.extend(ws.on_write_complete(n));
                }
                Action::CloseTransport => {
                    let mut w = write_half.lock().await;
                    let _ = w.shutdown().await;
                }
                Action::StartTimer(kind, dur) => {
                    timers.insert(kind, Instant::now() + dur);
                }
                Action::CancelTimer(kind) => {
                    timers.remove(&kind);
                }
                Action::Deliver(msg) => {
                    if let Some(handler) = &self.on_ws_message {
                        handler(msg);
                    }
                }
                Action::NotifyClosed(_) => {
                    done = true;
                }
                Action::NotifyConnected | Action::NotifyWriteable => {}
            }
        }
        done
    }
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn finds_header_terminator() {
        let buf = b"GET / HTTP/1.1\r\nHost: x\r\n\r\nbody".to_vec();
        assert_eq!(find_header_end(&buf), Some(28));
    }

    #[test]
    fn no_terminator_returns_none() {
        let buf = b"GET / HTTP/1.1\r\nHost: x".to_vec();
        assert_eq!(find_header_end(&buf), None);
    }
}
