//! WebSocket upgrade handshake (spec §4.G "WebSocket upgrade" / RFC 6455 §1.3):
//! computes `Sec-WebSocket-Accept` from the client's key and the response
//! headers for a `101 Switching Protocols` reply.
use base64::Engine;
use sha1::{Digest, Sha1};

use super::request::Request;
use super::response::Response;

/// Fixed per RFC 6455 §1.3.
const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

pub fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// Builds the `101 Switching Protocols` response for a request that already
/// passed [`Request::wants_websocket_upgrade`]. The caller still has to
/// detach the raw socket from the HTTP loop and hand it to the codec.
pub fn build_upgrade_response(req: &Request) -> Option<Response> {
    let key = req.header("sec-websocket-key")?;
    Some(
        Response::new(101)
            .with_header("Upgrade", "websocket")
            .with_header("Connection", "Upgrade")
            .with_header("Sec-WebSocket-Accept", accept_key(key)),
    )
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn accept_key_matches_rfc_6455_example() {
        // Example straight from RFC 6455 §1.3.
        assert_eq!(accept_key("dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn build_upgrade_response_sets_status_101() {
        let mut headers = std::collections::HashMap::new();
        headers.insert("sec-websocket-key".to_string(), "dGhlIHNhbXBsZSBub25jZQ==".to_string());
        let req = Request {
            method: super::super::request::Method::Get,
            path: "/db/_blipsync".into(),
            query: std::collections::HashMap::new(),
            headers,
            body: Vec::new(),
        };
        let resp = build_upgrade_response(&req).unwrap();
        assert_eq!(resp.status, 101);
        assert_eq!(resp.headers.get("Sec-WebSocket-Accept").unwrap(), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }
}
