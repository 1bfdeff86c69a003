//! The error taxonomy shared by every subsystem: `LiteCore` (semantic), `Posix`
//! (raw errno), `Network` (DNS/timeout/TLS/reset) and `WebSocket` (RFC 6455 and
//! HTTP-style status codes). Handlers convert these into JSON error bodies at
//! the REST boundary; nothing below that boundary ever aborts the process.
use thiserror::Error;

/// A semantic (non-transport) failure, mirroring the original `LiteCoreDomain` codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiteCoreCode {
    NotFound,
    Conflict,
    InvalidParameter,
    CorruptData,
    Unsupported,
    Unimplemented,
    Crypto,
    Busy,
}

/// Whether a `Network` error is worth retrying, and under what condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Retryable right away without user action (DNS failure, timeout, reset, unreachable).
    Transient,
    /// Only worth retrying once the network configuration changes (untrusted/revoked cert, host unreachable).
    NetworkDependent,
    /// Not retryable.
    Permanent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkCode {
    DnsFailure,
    Timeout,
    ConnectionReset,
    NetworkDown,
    NetworkUnreachable,
    AddressUnavailable,
    HostUnreachable,
    TlsCertUntrusted,
    TlsCertRevoked,
    TlsHandshakeFailed,
    InvalidUrl,
}

impl NetworkCode {
    pub fn retry_class(self) -> RetryClass {
        use NetworkCode::*;
        match self {
            DnsFailure | Timeout | ConnectionReset | NetworkDown | NetworkUnreachable
            | AddressUnavailable => RetryClass::Transient,
            HostUnreachable | TlsCertUntrusted | TlsCertRevoked => RetryClass::NetworkDependent,
            TlsHandshakeFailed | InvalidUrl => RetryClass::Permanent,
        }
    }
}

/// A WebSocket-domain error: either a close code (1000..1015) or an HTTP-style status
/// reported during the handshake (3xx..5xx).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WebSocketCode(pub u16);

/// The structured error object that crosses every subsystem boundary in this crate.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{code:?}: {message}")]
    LiteCore { code: LiteCoreCode, message: String },

    #[error("POSIX errno {errno}: {message}")]
    Posix { errno: i32, message: String },

    #[error("network error {code:?}: {message}")]
    Network { code: NetworkCode, message: String },

    #[error("websocket error {0:?}")]
    WebSocket(WebSocketCode),
}

impl Error {
    pub fn not_found(message: impl Into<String>) -> Self {
        Error::LiteCore { code: LiteCoreCode::NotFound, message: message.into() }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Error::LiteCore { code: LiteCoreCode::Conflict, message: message.into() }
    }

    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Error::LiteCore { code: LiteCoreCode::InvalidParameter, message: message.into() }
    }

    pub fn unimplemented(message: impl Into<String>) -> Self {
        Error::LiteCore { code: LiteCoreCode::Unimplemented, message: message.into() }
    }

    /// Maps a structured error to the HTTP status code a REST handler should respond with.
    /// See spec §7: LiteCore NotFound -> 404, Conflict -> 409, InvalidParameter -> 400,
    /// Unimplemented -> 501, Crypto -> 401, Busy -> 423; WebSocket codes < 1000 map to
    /// that numeric status directly; everything else is 500.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::LiteCore { code, .. } => match code {
                LiteCoreCode::NotFound => 404,
                LiteCoreCode::Conflict => 409,
                LiteCoreCode::InvalidParameter => 400,
                LiteCoreCode::Unimplemented => 501,
                LiteCoreCode::Crypto => 401,
                LiteCoreCode::Busy => 423,
                LiteCoreCode::CorruptData | LiteCoreCode::Unsupported => 500,
            },
            Error::WebSocket(WebSocketCode(code)) if *code < 1000 => *code,
            Error::Posix { .. } | Error::Network { .. } | Error::WebSocket(_) => 500,
        }
    }

    /// The `x-litecore-domain` string for the error JSON body.
    pub fn domain(&self) -> &'static str {
        match self {
            Error::LiteCore { .. } => "LiteCore",
            Error::Posix { .. } => "POSIX",
            Error::Network { .. } => "Network",
            Error::WebSocket(_) => "WebSocket",
        }
    }

    /// The numeric `x-litecore-code` for the error JSON body.
    pub fn code_number(&self) -> i32 {
        match self {
            Error::LiteCore { code, .. } => *code as i32,
            Error::Posix { errno, .. } => *errno,
            Error::Network { code, .. } => *code as i32,
            Error::WebSocket(WebSocketCode(code)) => *code as i32,
        }
    }

    /// Serializes the `{error, x-litecore-domain, x-litecore-code}` body from spec §6.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "error": self.to_string(),
            "x-litecore-domain": self.domain(),
            "x-litecore-code": self.code_number(),
        })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn http_status_mapping_matches_spec() {
        assert_eq!(Error::not_found("x").http_status(), 404);
        assert_eq!(Error::conflict("x").http_status(), 409);
        assert_eq!(Error::invalid_parameter("x").http_status(), 400);
        assert_eq!(Error::unimplemented("x").http_status(), 501);
        assert_eq!(
            Error::LiteCore { code: LiteCoreCode::Crypto, message: "x".into() }.http_status(),
            401
        );
        assert_eq!(
            Error::LiteCore { code: LiteCoreCode::Busy, message: "x".into() }.http_status(),
            423
        );
    }

    #[test]
    fn websocket_status_below_1000_passes_through() {
        let e = Error::WebSocket(WebSocketCode(404));
        assert_eq!(e.http_status(), 404);
        let e = Error::WebSocket(WebSocketCode(1006));
        assert_eq!(e.http_status(), 500);
    }

    #[test]
    fn network_retry_classification() {
        assert_eq!(NetworkCode::Timeout.retry_class(), RetryClass::Transient);
        assert_eq!(NetworkCode::HostUnreachable.retry_class(), RetryClass::NetworkDependent);
        assert_eq!(NetworkCode::InvalidUrl.retry_class(), RetryClass::Permanent);
    }
}
