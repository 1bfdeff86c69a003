//! Close-frame payload parsing and validation, grounded on
//! `WebSocketProtocol::parseClosePayload`/`formatClosePayload` in
//! `original_source/Networking/WebSockets/WebSocketProtocol.hh`.
use bytes::Bytes;

/// A parsed CLOSE frame payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    pub code: u16,
    pub reason: String,
}

/// Valid range per RFC 6455 plus the original's exclusions: codes must be in
/// `[1000, 4999]`, excluding the unassigned/reserved block `1012..=3999` and
/// the locally-generated-only codes `1004..=1006`.
pub fn is_valid_close_code(code: u16) -> bool {
    if !(1000..=4999).contains(&code) {
        return false;
    }
    if (1012..=3999).contains(&code) {
        return false;
    }
    if (1004..=1006).contains(&code) {
        return false;
    }
    true
}

/// Parses a CLOSE frame's payload. An empty payload (no status) is accepted
/// and reported as code 0 with an empty reason. Returns `None` if the code is
/// out of range or the reason isn't valid UTF-8.
pub fn parse_close_payload(payload: &Bytes) -> Option<CloseFrame> {
    if payload.is_empty() {
        return Some(CloseFrame { code: 0, reason: String::new() });
    }
    if payload.len() < 2 {
        return None;
    }
    let code = u16::from_be_bytes([payload[0], payload[1]]);
    if !is_valid_close_code(code) {
        return None;
    }
    let reason = std::str::from_utf8(&payload[2..]).ok()?.to_string();
    Some(CloseFrame { code, reason })
}

/// Formats a close payload: big-endian status followed by the UTF-8 reason.
/// `code == 0` produces an empty payload (no status at all).
pub fn format_close_payload(code: u16, reason: &str) -> Vec<u8> {
    if code == 0 {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(2 + reason.len());
    out.extend_from_slice(&code.to_be_bytes());
    out.extend_from_slice(reason.as_bytes());
    out
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn accepts_normal_closure() {
        assert!(is_valid_close_code(1000));
        assert!(is_valid_close_code(1001));
        assert!(is_valid_close_code(3999));
        assert!(is_valid_close_code(4999));
    }

    #[test]
    fn rejects_reserved_ranges() {
        assert!(!is_valid_close_code(999));
        assert!(!is_valid_close_code(1004));
        assert!(!is_valid_close_code(1005));
        assert!(!is_valid_close_code(1006));
        assert!(!is_valid_close_code(1012));
        assert!(!is_valid_close_code(3000));
        assert!(!is_valid_close_code(5000));
    }

    #[test]
    fn round_trips_code_and_reason() {
        let payload = format_close_payload(1000, "bye");
        let frame = parse_close_payload(&Bytes::from(payload)).unwrap();
        assert_eq!(frame.code, 1000);
        assert_eq!(frame.reason, "bye");
    }

    #[test]
    fn empty_payload_is_status_zero() {
        let frame = parse_close_payload(&Bytes::new()).unwrap();
        assert_eq!(frame.code, 0);
        assert!(frame.reason.is_empty());
    }

    #[test]
    fn rejects_non_utf8_reason() {
        let mut payload = 1000u16.to_be_bytes().to_vec();
        payload.extend_from_slice(&[0xff, 0xfe]);
        assert!(parse_close_payload(&Bytes::from(payload)).is_none());
    }
}
