//! The WebSocket state machine (spec §4.B): transport-independent, so it
//! speaks only in terms of bytes in, [`Action`]s out. A driver (the HTTP
//! listener's connection loop, or a test) owns the real transport and timer
//! wheel and translates `Action`s into socket writes, timer arms, and
//! delegate callbacks. Grounded in spec §3's `WebSocket` state-variable list
//! and the state table in spec §4.B, itself distilled from
//! `original_source/Networking/WebSockets/WebSocketProtocol.hh` and the BLIP
//! connection class built on top of it.
use bytes::{Bytes, BytesMut};
use std::time::Duration;

use super::close::{format_close_payload, is_valid_close_code, parse_close_payload};
use super::frame::{decode_frame, encode_frame, DecodeError, OpCode};

/// 1 MiB, per spec §4.B ("Maximum accepted message").
pub const MAX_MESSAGE_LEN: usize = 1 << 20;
/// 64 KiB, per spec §4.B ("Returns false once bufferedBytes exceeds...").
pub const BACKPRESSURE_THRESHOLD: usize = 64 * 1024;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_PONG_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Connecting,
    Open,
    ClosingLocal,
    ClosingRemote,
    Closed,
}

/// Named timers the driver is responsible for arming/cancelling on our behalf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    Connect,
    Ping,
    Pong,
    CloseEcho,
}

/// The final disposition of a closed connection, reported to the delegate exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Both close frames were exchanged and the peer's status was 1000 or 1001.
    Clean { status: u16, message: String },
    /// Transport EOF/reset without a completed close handshake (`1006`).
    Abnormal,
    /// A framing violation was detected locally.
    Protocol,
    /// A timer (connect, pong, close-echo) expired.
    Timeout,
}

/// A message delivered to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Text(String),
    Binary(Bytes),
}

/// Side effects the state machine asks its driver to perform. None of these
/// are executed by the socket itself — it only ever computes them.
#[derive(Debug, PartialEq)]
pub enum Action {
    Write(Vec<u8>),
    CloseTransport,
    StartTimer(TimerKind, Duration),
    CancelTimer(TimerKind),
    Deliver(Message),
    NotifyConnected,
    NotifyWriteable,
    NotifyClosed(CloseReason),
}

/// RFC 6455 frame encoder/decoder plus the connect/ping/close state machine.
/// Owned exclusively by whatever actor drives it — see `src/actor/mailbox.rs` —
/// so none of its methods take an internal lock.
pub struct WebSocket {
    role: Role,
    state: State,
    recv_buf: BytesMut,
    cur_opcode: Option<OpCode>,
    cur_message: BytesMut,
    buffered_bytes: usize,
    was_over_threshold: bool,
    bytes_sent: u64,
    bytes_received: u64,
    close_sent: bool,
    close_received: bool,
    closed_notified: bool,
    pending_close_after_flush: bool,
    local_close: Option<(u16, String)>,
    remote_close: Option<(u16, String)>,
    ping_interval: Duration,
}

impl WebSocket {
    pub fn new(role: Role) -> Self {
        WebSocket {
            role,
            state: State::Idle,
            recv_buf: BytesMut::new(),
            cur_opcode: None,
            cur_message: BytesMut::new(),
            buffered_bytes: 0,
            was_over_threshold: false,
            bytes_sent: 0,
            bytes_received: 0,
            close_sent: false,
            close_received: false,
            closed_notified: false,
            pending_close_after_flush: false,
            local_close: None,
            remote_close: None,
            ping_interval: DEFAULT_PING_INTERVAL,
        }
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    fn masked(&self) -> bool {
        self.role == Role::Client
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    pub fn buffered_bytes(&self) -> usize {
        self.buffered_bytes
    }

    /// Arms the connect timeout. The driver calls [`WebSocket::on_connect`]
    /// once the transport handshake finishes.
    pub fn connect(&self) -> Vec<Action> {
        vec![Action::StartTimer(TimerKind::Connect, DEFAULT_CONNECT_TIMEOUT)]
    }

    pub fn on_connect(&mut self) -> Vec<Action> {
        if self.state != State::Idle {
            return vec![];
        }
        self.state = State::Open;
        vec![
            Action::CancelTimer(TimerKind::Connect),
            Action::StartTimer(TimerKind::Ping, self.ping_interval),
            Action::NotifyConnected,
        ]
    }

    /// Frames and queues `payload`. Returns `true` if the caller may keep
    /// sending without pausing; `false` once buffered bytes crossed the
    /// backpressure threshold. Silently dropped once the local close has
    /// already been sent.
    pub fn send(&mut self, payload: &[u8], binary: bool, actions: &mut Vec<Action>) -> bool {
        if self.state != State::Open || self.close_sent {
            return false;
        }
        let opcode = if binary { OpCode::Binary } else { OpCode::Text };
        let frame = encode_frame(opcode, payload, self.masked());
        self.bytes_sent += frame.len() as u64;
        self.buffered_bytes += frame.len();
        actions.push(Action::Write(frame));
        let writable = self.buffered_bytes <= BACKPRESSURE_THRESHOLD;
        self.was_over_threshold = !writable;
        writable
    }

    /// Initiates (or no-ops on a repeat call to) an orderly close.
    pub fn close(&mut self, status: u16, message: &str) -> Vec<Action> {
        let mut actions = Vec::new();
        match self.state {
            State::Idle | State::Connecting => {
                self.finalize(CloseReason::Clean { status, message: message.into() }, &mut actions);
            }
            State::Open => {
                let payload = format_close_payload(status, message);
                let frame = encode_frame(OpCode::Close, &payload, self.masked());
                self.buffered_bytes += frame.len();
                actions.push(Action::Write(frame));
                actions.push(Action::CancelTimer(TimerKind::Ping));
                actions.push(Action::CancelTimer(TimerKind::Pong));
                actions.push(Action::StartTimer(TimerKind::CloseEcho, DEFAULT_CLOSE_TIMEOUT));
                self.close_sent = true;
                self.local_close = Some((status, message.into()));
                self.state = State::ClosingLocal;
            }
            _ => {}
        }
        actions
    }

    /// Feeds newly-received transport bytes through the decoder, driving the
    /// state machine forward and returning the actions (writes, deliveries,
    /// timer changes) the driver should now perform.
    pub fn on_receive(&mut self, bytes: &[u8]) -> Vec<Action> {
        self.bytes_received += bytes.len() as u64;
        self.recv_buf.extend_from_slice(bytes);
        let mut actions = Vec::new();
        loop {
            if self.state == State::Closed {
                break;
            }
            match decode_frame(&mut self.recv_buf, MAX_MESSAGE_LEN) {
                Ok(Some(frame)) => self.handle_frame(frame, &mut actions),
                Ok(None) => break,
                Err(DecodeError::ProtocolError) => {
                    self.fail_protocol(&mut actions);
                    break;
                }
                Err(DecodeError::MessageTooLarge) => {
                    self.fail_protocol(&mut actions);
                    break;
                }
            }
        }
        actions
    }

    fn handle_frame(&mut self, frame: super::frame::Frame, actions: &mut Vec<Action>) {
        match frame.opcode {
            OpCode::Continuation => {
                if self.cur_opcode.is_none() {
                    self.fail_protocol(actions);
                    return;
                }
                if self.cur_message.len() + frame.payload.len() > MAX_MESSAGE_LEN {
                    self.fail_protocol(actions);
                    return;
                }
                self.cur_message.extend_from_slice(&frame.payload);
                if frame.fin {
                    self.finish_message(actions);
                }
            }
            OpCode::Text | OpCode::Binary => {
                if self.cur_opcode.is_some() {
                    self.fail_protocol(actions);
                    return;
                }
                if frame.payload.len() > MAX_MESSAGE_LEN {
                    self.fail_protocol(actions);
                    return;
                }
                self.cur_opcode = Some(frame.opcode);
                self.cur_message.extend_from_slice(&frame.payload);
                if frame.fin {
                    self.finish_message(actions);
                }
            }
            OpCode::Ping => {
                let pong = encode_frame(OpCode::Pong, &frame.payload, self.masked());
                self.buffered_bytes += pong.len();
                actions.push(Action::Write(pong));
            }
            OpCode::Pong => {
                actions.push(Action::CancelTimer(TimerKind::Pong));
            }
            OpCode::Close => self.handle_close_frame(&frame.payload, actions),
        }
    }

    fn finish_message(&mut self, actions: &mut Vec<Action>) {
        let opcode = self.cur_opcode.take().unwrap();
        let data = self.cur_message.split().freeze();
        match opcode {
            OpCode::Text => match std::str::from_utf8(&data) {
                Ok(text) => actions.push(Action::Deliver(Message::Text(text.to_string()))),
                Err(_) => self.fail_protocol(actions),
            },
            OpCode::Binary => actions.push(Action::Deliver(Message::Binary(data))),
            _ => unreachable!("only Text/Binary start a reassembled message"),
        }
    }

    fn handle_close_frame(&mut self, payload: &Bytes, actions: &mut Vec<Action>) {
        let Some(parsed) = parse_close_payload(payload) else {
            self.fail_protocol(actions);
            return;
        };
        match self.state {
            State::Open => {
                self.close_received = true;
                self.remote_close = Some((parsed.code, parsed.reason.clone()));
                let echo_code = if parsed.code == 0 { 1000 } else { parsed.code };
                let echo = encode_frame(
                    OpCode::Close,
                    &format_close_payload(echo_code, ""),
                    self.masked(),
                );
                self.buffered_bytes += echo.len();
                actions.push(Action::Write(echo));
                actions.push(Action::CancelTimer(TimerKind::Ping));
                actions.push(Action::CancelTimer(TimerKind::Pong));
                self.close_sent = true;
                self.state = State::ClosingRemote;
                self.pending_close_after_flush = true;
                if self.buffered_bytes == 0 {
                    self.close_after_flush(actions);
                }
            }
            State::ClosingLocal => {
                self.close_received = true;
                self.remote_close = Some((parsed.code, parsed.reason));
                actions.push(Action::CancelTimer(TimerKind::CloseEcho));
                actions.push(Action::CloseTransport);
                self.finalize_from_handshake(actions);
            }
            _ => {}
        }
    }

    fn close_after_flush(&mut self, actions: &mut Vec<Action>) {
        if self.pending_close_after_flush && self.buffered_bytes == 0 {
            self.pending_close_after_flush = false;
            actions.push(Action::CloseTransport);
            self.finalize_from_handshake(actions);
        }
    }

    /// Confirmation that `n` bytes have left the transport.
    pub fn on_write_complete(&mut self, n: usize) -> Vec<Action> {
        self.buffered_bytes = self.buffered_bytes.saturating_sub(n);
        let mut actions = Vec::new();
        if self.was_over_threshold && self.buffered_bytes <= BACKPRESSURE_THRESHOLD {
            self.was_over_threshold = false;
            actions.push(Action::NotifyWriteable);
        }
        self.close_after_flush(&mut actions);
        actions
    }

    /// A named timer the driver was asked to arm has fired.
    pub fn on_timer(&mut self, kind: TimerKind) -> Vec<Action> {
        let mut actions = Vec::new();
        match kind {
            TimerKind::Connect => {
                if self.state == State::Idle || self.state == State::Connecting {
                    self.finalize(CloseReason::Timeout, &mut actions);
                }
            }
            TimerKind::Ping => {
                if self.state == State::Open {
                    let ping = encode_frame(OpCode::Ping, &[], self.masked());
                    self.buffered_bytes += ping.len();
                    actions.push(Action::Write(ping));
                    actions.push(Action::StartTimer(TimerKind::Pong, DEFAULT_PONG_TIMEOUT));
                    actions.push(Action::StartTimer(TimerKind::Ping, self.ping_interval));
                }
            }
            TimerKind::Pong => {
                if self.state == State::Open {
                    actions.push(Action::CloseTransport);
                    self.finalize(CloseReason::Timeout, &mut actions);
                }
            }
            TimerKind::CloseEcho => {
                if self.state == State::ClosingLocal {
                    actions.push(Action::CloseTransport);
                    self.finalize(CloseReason::Timeout, &mut actions);
                }
            }
        }
        actions
    }

    /// The transport asked to close (e.g. peer reset the TCP connection).
    pub fn on_close_requested(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.state != State::Closed {
            actions.push(Action::CloseTransport);
            self.finalize(CloseReason::Abnormal, &mut actions);
        }
        actions
    }

    /// The transport has actually closed (EOF, reset, or confirmed after
    /// `CloseTransport`). Reports the final status to the delegate exactly once.
    pub fn on_close(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();
        self.finalize_from_handshake(&mut actions);
        actions
    }

    fn fail_protocol(&mut self, actions: &mut Vec<Action>) {
        actions.push(Action::CloseTransport);
        self.finalize(CloseReason::Protocol, actions);
    }

    fn finalize_from_handshake(&mut self, actions: &mut Vec<Action>) {
        let reason = match (&self.local_close, &self.remote_close, self.close_sent, self.close_received) {
            (Some((_, local_msg)), Some((code, _)), true, true) if *code == 1000 || *code == 1001 => {
                CloseReason::Clean { status: *code, message: local_msg.clone() }
            }
            (None, Some((code, remote_msg)), true, true) if *code == 1000 || *code == 1001 => {
                CloseReason::Clean { status: *code, message: remote_msg.clone() }
            }
            _ => CloseReason::Abnormal,
        };
        self.finalize(reason, actions);
    }

    fn finalize(&mut self, reason: CloseReason, actions: &mut Vec<Action>) {
        if self.closed_notified {
            return;
        }
        self.closed_notified = true;
        self.state = State::Closed;
        actions.push(Action::NotifyClosed(reason));
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn open_socket(role: Role) -> WebSocket {
        let mut ws = WebSocket::new(role);
        let _ = ws.connect();
        let _ = ws.on_connect();
        ws
    }

    #[test]
    fn connect_then_send_frames_and_reports_writable() {
        let mut ws = open_socket(Role::Client);
        let mut actions = Vec::new();
        let writable = ws.send(b"hello", false, &mut actions);
        assert!(writable);
        assert!(matches!(actions[0], Action::Write(_)));
    }

    #[test]
    fn send_after_close_sent_is_dropped() {
        let mut ws = open_socket(Role::Client);
        let _ = ws.close(1000, "done");
        let mut actions = Vec::new();
        let writable = ws.send(b"too late", false, &mut actions);
        assert!(!writable);
        assert!(actions.is_empty());
    }

    #[test]
    fn backpressure_threshold_flips_writable_false() {
        let mut ws = open_socket(Role::Server);
        let mut actions = Vec::new();
        let big = vec![0u8; BACKPRESSURE_THRESHOLD + 10];
        let writable = ws.send(&big, true, &mut actions);
        assert!(!writable);
    }

    #[test]
    fn round_trips_a_text_message_through_the_wire() {
        let mut sender = WebSocket::new(Role::Client);
        let _ = sender.connect();
        let _ = sender.on_connect();
        let mut send_actions = Vec::new();
        sender.send(b"hi there", false, &mut send_actions);
        let Action::Write(bytes) = send_actions.remove(0) else { panic!("expected write") };

        let mut receiver = WebSocket::new(Role::Server);
        let _ = receiver.connect();
        let _ = receiver.on_connect();
        let actions = receiver.on_receive(&bytes);
        assert!(matches!(&actions[0], Action::Deliver(Message::Text(t)) if t == "hi there"));
    }

    #[test]
    fn close_handshake_reports_clean_close() {
        let mut initiator = open_socket(Role::Client);
        let close_actions = initiator.close(1000, "bye");
        let Action::Write(close_bytes) = &close_actions[0] else { panic!() };

        let mut peer = open_socket(Role::Server);
        let peer_actions = peer.on_receive(close_bytes);
        let echo = peer_actions.iter().find_map(|a| match a {
            Action::Write(b) => Some(b.clone()),
            _ => None,
        }).expect("peer should echo close");
        // Simulate the transport confirming the echoed CLOSE frame was flushed.
        let flush_actions = peer.on_write_complete(echo.len());
        assert!(flush_actions.iter().any(|a| matches!(a, Action::CloseTransport)));

        let back_actions = initiator.on_receive(&echo);
        let closed = back_actions.iter().find_map(|a| match a {
            Action::NotifyClosed(r) => Some(r.clone()),
            _ => None,
        });
        // The initiator reports its own sent reason, not the (reason-less) echo.
        assert_eq!(closed, Some(CloseReason::Clean { status: 1000, message: "bye".to_string() }));
    }

    #[test]
    fn ping_timer_sends_ping_and_arms_pong_timeout() {
        let mut ws = open_socket(Role::Client);
        let actions = ws.on_timer(TimerKind::Ping);
        assert!(matches!(actions[0], Action::Write(_)));
        assert!(actions.iter().any(|a| matches!(a, Action::StartTimer(TimerKind::Pong, _))));
    }

    #[test]
    fn missed_pong_times_out_the_connection() {
        let mut ws = open_socket(Role::Client);
        let actions = ws.on_timer(TimerKind::Pong);
        assert!(actions.iter().any(|a| matches!(a, Action::NotifyClosed(CloseReason::Timeout))));
    }

    #[test]
    fn eof_without_close_frame_is_abnormal() {
        let mut ws = open_socket(Role::Client);
        let actions = ws.on_close();
        assert_eq!(actions, vec![Action::NotifyClosed(CloseReason::Abnormal)]);
    }

    #[test]
    fn close_notified_exactly_once() {
        let mut ws = open_socket(Role::Client);
        let _ = ws.on_close();
        let second = ws.on_close();
        assert!(second.is_empty());
    }

    #[test]
    fn oversized_message_triggers_protocol_close() {
        let mut ws = open_socket(Role::Client);
        let huge = vec![0u8; MAX_MESSAGE_LEN + 1];
        let frame = encode_frame(OpCode::Binary, &huge, false);
        let actions = ws.on_receive(&frame);
        assert!(actions.iter().any(|a| matches!(a, Action::NotifyClosed(CloseReason::Protocol))));
    }
}
