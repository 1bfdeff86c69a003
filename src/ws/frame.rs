//! Bit-exact RFC 6455 frame encode/decode, grounded on
//! `original_source/Networking/WebSockets/WebSocketProtocol.hh` (itself adapted
//! from uWebSockets). Two-byte minimum header, 4/10-byte extended-length
//! variants, 4-byte client mask. Decoding works off an accumulating buffer
//! rather than the original's in-place spill/rotate scheme, since Rust's
//! `bytes::BytesMut` already gives us a safe growable buffer to parse from.
use bytes::{Buf, Bytes, BytesMut};
use rand::RngCore;

/// Frame opcodes used by this protocol (RFC 6455 §11.8); continuation (0) and
/// unused reserved opcodes are not modeled as separate variants since every
/// frame we hand to callers has already been reassembled to its base type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    fn from_u8(n: u8) -> Option<OpCode> {
        match n {
            0 => Some(OpCode::Continuation),
            1 => Some(OpCode::Text),
            2 => Some(OpCode::Binary),
            8 => Some(OpCode::Close),
            9 => Some(OpCode::Ping),
            10 => Some(OpCode::Pong),
            _ => None,
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            OpCode::Continuation => 0,
            OpCode::Text => 1,
            OpCode::Binary => 2,
            OpCode::Close => 8,
            OpCode::Ping => 9,
            OpCode::Pong => 10,
        }
    }

    pub fn is_control(self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }
}

/// A decoded frame header plus its (still masked-or-not, fully received) payload.
pub struct Frame {
    pub fin: bool,
    pub opcode: OpCode,
    pub payload: Bytes,
}

#[derive(Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// RSV bits set, reserved/invalid opcode, oversized control frame, or a
    /// non-final control frame — any of RFC 6455's "fail the connection" cases.
    ProtocolError,
    /// Message would exceed the maximum accepted length.
    MessageTooLarge,
}

/// Attempts to decode one frame from the front of `buf`. Returns `Ok(None)` if
/// `buf` doesn't yet hold a complete frame (caller should wait for more bytes).
/// On success, the consumed bytes are advanced out of `buf`.
pub fn decode_frame(buf: &mut BytesMut, max_message_len: usize) -> Result<Option<Frame>, DecodeError> {
    if buf.len() < 2 {
        return Ok(None);
    }
    let b0 = buf[0];
    let b1 = buf[1];
    let fin = b0 & 0x80 != 0;
    let rsv = b0 & 0x70;
    if rsv != 0 {
        return Err(DecodeError::ProtocolError);
    }
    let opcode = OpCode::from_u8(b0 & 0x0F).ok_or(DecodeError::ProtocolError)?;
    let masked = b1 & 0x80 != 0;
    let len7 = b1 & 0x7F;

    if opcode.is_control() && (!fin || len7 > 125) {
        return Err(DecodeError::ProtocolError);
    }

    let (header_len, payload_len): (usize, usize) = if len7 <= 125 {
        (2, len7 as usize)
    } else if len7 == 126 {
        if buf.len() < 4 {
            return Ok(None);
        }
        (4, u16::from_be_bytes([buf[2], buf[3]]) as usize)
    } else {
        if buf.len() < 10 {
            return Ok(None);
        }
        let n = u64::from_be_bytes(buf[2..10].try_into().unwrap());
        if n > usize::MAX as u64 {
            return Err(DecodeError::MessageTooLarge);
        }
        (10, n as usize)
    };

    if payload_len > max_message_len {
        return Err(DecodeError::MessageTooLarge);
    }

    let mask_len = if masked { 4 } else { 0 };
    let total = header_len + mask_len + payload_len;
    if buf.len() < total {
        return Ok(None);
    }

    buf.advance(header_len);
    let mask = if masked {
        let m = [buf[0], buf[1], buf[2], buf[3]];
        buf.advance(4);
        Some(m)
    } else {
        None
    };

    let mut payload = buf.split_to(payload_len);
    if let Some(mask) = mask {
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte ^= mask[i % 4];
        }
    }

    Ok(Some(Frame { fin, opcode, payload: payload.freeze() }))
}

/// Encodes one complete (always-FIN) frame. `masked` is true for client-sent
/// frames, which additionally get a random 4-byte mask drawn from `rand`'s
/// secure-by-default thread RNG.
pub fn encode_frame(opcode: OpCode, payload: &[u8], masked: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 14);
    out.push(0x80 | opcode.to_u8());

    let mask_bit = if masked { 0x80 } else { 0x00 };
    if payload.len() <= 125 {
        out.push(mask_bit | payload.len() as u8);
    } else if payload.len() <= u16::MAX as usize {
        out.push(mask_bit | 126);
        out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    } else {
        out.push(mask_bit | 127);
        out.extend_from_slice(&(payload.len() as u64).to_be_bytes());
    }

    if masked {
        let mut mask = [0u8; 4];
        rand::thread_rng().fill_bytes(&mut mask);
        out.extend_from_slice(&mask);
        let start = out.len();
        out.extend_from_slice(payload);
        for (i, byte) in out[start..].iter_mut().enumerate() {
            *byte ^= mask[i % 4];
        }
    } else {
        out.extend_from_slice(payload);
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn header_length_thresholds_match_spec() {
        let short = encode_frame(OpCode::Binary, &[0u8; 10], false);
        assert_eq!(short.len(), 2 + 10);

        let medium = encode_frame(OpCode::Binary, &vec![0u8; 200], false);
        assert_eq!(&medium[0..2], &[0x82, 126]);
        assert_eq!(medium.len(), 4 + 200);

        let long = encode_frame(OpCode::Binary, &vec![0u8; 70_000], false);
        assert_eq!(&long[0..2], &[0x82, 127]);
        assert_eq!(long.len(), 10 + 70_000);
    }

    #[test]
    fn client_frames_are_masked_server_frames_are_not() {
        let client = encode_frame(OpCode::Text, b"hi", true);
        assert_eq!(client[1] & 0x80, 0x80);
        let server = encode_frame(OpCode::Text, b"hi", false);
        assert_eq!(server[1] & 0x80, 0);
    }

    #[test]
    fn round_trips_masked_payload() {
        let payload = b"round trip me".to_vec();
        let encoded = encode_frame(OpCode::Text, &payload, true);
        let mut buf = BytesMut::from(&encoded[..]);
        let frame = decode_frame(&mut buf, 1 << 20).unwrap().unwrap();
        assert!(frame.fin);
        assert_eq!(frame.opcode, OpCode::Text);
        assert_eq!(&frame.payload[..], &payload[..]);
        assert!(buf.is_empty());
    }

    #[test]
    fn incomplete_frame_returns_none_without_consuming() {
        let encoded = encode_frame(OpCode::Text, b"hello world", false);
        let mut buf = BytesMut::from(&encoded[..encoded.len() - 2]);
        let before = buf.len();
        assert!(decode_frame(&mut buf, 1 << 20).unwrap().is_none());
        assert_eq!(buf.len(), before);
    }

    #[test]
    fn rejects_reserved_bits() {
        let mut encoded = encode_frame(OpCode::Text, b"x", false);
        encoded[0] |= 0x40;
        let mut buf = BytesMut::from(&encoded[..]);
        assert_eq!(decode_frame(&mut buf, 1 << 20), Err(DecodeError::ProtocolError));
    }

    #[test]
    fn rejects_fragmented_control_frame() {
        let mut encoded = encode_frame(OpCode::Ping, b"x", false);
        encoded[0] &= !0x80; // clear FIN
        let mut buf = BytesMut::from(&encoded[..]);
        assert_eq!(decode_frame(&mut buf, 1 << 20), Err(DecodeError::ProtocolError));
    }

    #[test]
    fn rejects_oversized_message() {
        let encoded = encode_frame(OpCode::Binary, &vec![0u8; 1000], false);
        let mut buf = BytesMut::from(&encoded[..]);
        assert_eq!(decode_frame(&mut buf, 100), Err(DecodeError::MessageTooLarge));
    }
}
