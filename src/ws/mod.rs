//! RFC 6455 WebSocket framing core (spec §4.B): a transport-independent
//! encoder/decoder plus connect/heartbeat/close state machine. See
//! `socket::WebSocket` for the entry point; `frame` and `close` hold the
//! bit-exact wire format pieces it's built from.
pub mod close;
pub mod frame;
pub mod socket;

pub use close::{format_close_payload, is_valid_close_code, parse_close_payload, CloseFrame};
pub use frame::{decode_frame, encode_frame, DecodeError, OpCode};
pub use socket::{
    Action, CloseReason, Message, Role, TimerKind, WebSocket, BACKPRESSURE_THRESHOLD,
    MAX_MESSAGE_LEN,
};
