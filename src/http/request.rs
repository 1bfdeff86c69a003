//! Parsed HTTP/1.1 request line + headers (spec §4.G step 1). Hand-rolled on
//! top of `httparse` rather than a framework request type, since the
//! WebSocket upgrade path (spec §4.G "WebSocket upgrade") needs to hand the
//! raw `TcpStream` to the codec once the headers are read — an operation a
//! higher-level HTTP framework doesn't expose.
use std::collections::HashMap;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Put,
    Post,
    Delete,
    Head,
}

impl Method {
    fn parse(s: &str) -> Option<Method> {
        match s {
            "GET" => Some(Method::Get),
            "PUT" => Some(Method::Put),
            "POST" => Some(Method::Post),
            "DELETE" => Some(Method::Delete),
            "HEAD" => Some(Method::Head),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub query: HashMap<String, String>,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl Request {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(|s| s.as_str())
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(|s| s.as_str())
    }

    /// True iff this request's headers qualify for a WebSocket upgrade
    /// (spec §4.G): GET, `Connection: upgrade`, `Upgrade: websocket`,
    /// `Sec-WebSocket-Version >= 13`, `Sec-WebSocket-Key` length >= 10.
    pub fn wants_websocket_upgrade(&self) -> bool {
        if self.method != Method::Get {
            return false;
        }
        let connection_has_upgrade = self
            .header("connection")
            .map(|v| v.split(',').any(|tok| tok.trim().eq_ignore_ascii_case("upgrade")))
            .unwrap_or(false);
        let upgrade_is_websocket =
            self.header("upgrade").map(|v| v.eq_ignore_ascii_case("websocket")).unwrap_or(false);
        let version_ok = self
            .header("sec-websocket-version")
            .and_then(|v| v.trim().parse::<u32>().ok())
            .map(|v| v >= 13)
            .unwrap_or(false);
        let key_ok = self.header("sec-websocket-key").map(|v| v.len() >= 10).unwrap_or(false);
        connection_has_upgrade && upgrade_is_websocket && version_ok && key_ok
    }
}

/// Splits `path?a=1&b=2` into `(path, query_map)`.
fn split_query(target: &str) -> (String, HashMap<String, String>) {
    let mut query = HashMap::new();
    let (path, qs) = match target.split_once('?') {
        Some((p, q)) => (p, q),
        None => (target, ""),
    };
    for pair in qs.split('&').filter(|s| !s.is_empty()) {
        let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
        query.insert(
            urlencoding_decode(k),
            urlencoding_decode(v),
        );
    }
    (path.to_string(), query)
}

fn urlencoding_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                if let Ok(byte) = u8::from_str_radix(std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or(""), 16) {
                    out.push(byte);
                    i += 3;
                } else {
                    out.push(bytes[i]);
                    i += 1;
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Parses the request line and headers from `head` (everything up to and
/// including `\r\n\r\n`). The body, if any, is read separately once
/// `Content-Length` is known.
pub fn parse_head(head: &[u8]) -> Result<Request> {
    let mut header_storage = [httparse::EMPTY_HEADER; 64];
    let mut parsed = httparse::Request::new(&mut header_storage);
    match parsed.parse(head) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => {
            return Err(Error::invalid_parameter("incomplete request head"));
        }
        Err(e) => return Err(Error::invalid_parameter(format!("malformed request: {e}"))),
    }

    let method = parsed
        .method
        .and_then(Method::parse)
        .ok_or_else(|| Error::invalid_parameter("unsupported or missing HTTP method"))?;
    let target = parsed.path.unwrap_or("/");
    let (path, query) = split_query(target);

    let mut headers = HashMap::new();
    for header in parsed.headers.iter() {
        headers.insert(header.name.to_ascii_lowercase(), String::from_utf8_lossy(header.value).into_owned());
    }

    Ok(Request { method, path, query, headers, body: Vec::new() })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_method_path_and_headers() {
        let raw = b"GET /foo/bar?x=1 HTTP/1.1\r\nHost: localhost\r\nX-Thing: value\r\n\r\n";
        let req = parse_head(raw).unwrap();
        assert_eq!(req.method, Method::Get);
        assert_eq!(req.path, "/foo/bar");
        assert_eq!(req.query_param("x"), Some("1"));
        assert_eq!(req.header("x-thing"), Some("value"));
    }

    #[test]
    fn recognizes_a_valid_websocket_upgrade() {
        let raw = b"GET /db/_blipsync HTTP/1.1\r\nHost: h\r\nConnection: Upgrade\r\nUpgrade: websocket\r\nSec-WebSocket-Version: 13\r\nSec-WebSocket-Key: abcdefghij\r\n\r\n";
        let req = parse_head(raw).unwrap();
        assert!(req.wants_websocket_upgrade());
    }

    #[test]
    fn rejects_upgrade_with_short_key() {
        let raw = b"GET /db/_blipsync HTTP/1.1\r\nConnection: Upgrade\r\nUpgrade: websocket\r\nSec-WebSocket-Version: 13\r\nSec-WebSocket-Key: short\r\n\r\n";
        let req = parse_head(raw).unwrap();
        assert!(!req.wants_websocket_upgrade());
    }
}
