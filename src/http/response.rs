//! Response shaping for the hand-rolled listener (spec §4.G). Handlers build
//! a `Response` value; the listener's connection loop is the only place that
//! actually serializes it onto the wire, so handlers stay transport-agnostic
//! just like the WebSocket codec in `src/ws`.
use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::Error;

/// Name reported in every response's `Server:` header.
pub const SERVER_HEADER_VALUE: &str = concat!("peersync-core/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Response { status, headers: BTreeMap::new(), body: Vec::new() }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// A `200 OK` with a JSON body, `Content-Type: application/json`.
    pub fn json<T: Serialize>(value: &T) -> Self {
        let body = serde_json::to_vec(value).unwrap_or_else(|_| b"{}".to_vec());
        Response::new(200).with_header("Content-Type", "application/json").with_body(body)
    }

    pub fn json_status<T: Serialize>(status: u16, value: &T) -> Self {
        let body = serde_json::to_vec(value).unwrap_or_else(|_| b"{}".to_vec());
        Response::new(status).with_header("Content-Type", "application/json").with_body(body)
    }

    pub fn not_found() -> Self {
        Response::json_status(404, &serde_json::json!({"error": "not_found"}))
    }

    /// Builds the error body + `x-litecore-domain`/`x-litecore-code` headers
    /// (spec §6) from a structured [`Error`].
    pub fn from_error(err: &Error) -> Self {
        Response::json_status(err.http_status(), &err.to_json())
            .with_header("x-litecore-domain", err.domain())
            .with_header("x-litecore-code", err.code_number().to_string())
    }

    /// Serializes the status line, headers (plus `Server:` and
    /// `Content-Length:`), and body into the bytes written to the socket.
    pub fn to_bytes(&self) -> Vec<u8> {
        let reason = reason_phrase(self.status);
        let mut out = format!("HTTP/1.1 {} {}\r\n", self.status, reason).into_bytes();
        out.extend_from_slice(format!("Server: {SERVER_HEADER_VALUE}\r\n").as_bytes());
        out.extend_from_slice(format!("Content-Length: {}\r\n", self.body.len()).as_bytes());
        for (name, value) in &self.headers {
            out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        101 => "Switching Protocols",
        400 => "Bad Request",
        401 => "Unauthorized",
        404 => "Not Found",
        409 => "Conflict",
        423 => "Locked",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn serializes_status_line_and_content_length() {
        let resp = Response::json(&serde_json::json!({"ok": true}));
        let bytes = resp.to_bytes();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Length: 11\r\n"));
        assert!(text.contains(&format!("Server: {SERVER_HEADER_VALUE}")));
    }

    #[test]
    fn error_response_carries_litecore_headers() {
        let err = Error::not_found("no such db");
        let resp = Response::from_error(&err);
        assert_eq!(resp.status, 404);
        assert_eq!(resp.headers.get("x-litecore-domain").map(String::as_str), Some("LiteCore"));
    }
}
