use crate::error::BridgeError;
use tokio_util::bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Frames larger than this are treated as a corrupted stream rather than a
/// legitimate message.
pub const MAX_PAYLOAD_LEN: usize = 16 * 1024 * 1024;

const HEADER_LEN: usize = 6;

/// Wire-level frame kind. Application payloads travel as `Data`; the
/// remaining kinds are control frames owned by the connection runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    Data = 0,
    Heartbeat = 1,
    Poison = 2,
    Hello = 3,
    HelloAck = 4,
}

impl FrameKind {
    fn from_wire(value: u8) -> Option<FrameKind> {
        match value {
            0 => Some(FrameKind::Data),
            1 => Some(FrameKind::Heartbeat),
            2 => Some(FrameKind::Poison),
            3 => Some(FrameKind::Hello),
            4 => Some(FrameKind::HelloAck),
            _ => None,
        }
    }
}

/// Delivery flags carried alongside a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Directives(u8);

impl Directives {
    /// The sender does not expect a response to this message.
    pub const NO_RESPONSE: Directives = Directives(0b0000_0001);

    pub const fn empty() -> Directives {
        Directives(0)
    }

    pub fn contains(self, other: Directives) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn from_bits(bits: u8) -> Directives {
        Directives(bits)
    }
}

impl std::ops::BitOr for Directives {
    type Output = Directives;
    fn bitor(self, rhs: Directives) -> Directives {
        Directives(self.0 | rhs.0)
    }
}

/// One decoded message unit: a frame kind, delivery directives, and an opaque
/// payload. The payload's internal structure belongs to the codec layer above
/// this crate and is never inspected here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub kind: FrameKind,
    pub directives: Directives,
    pub payload: Vec<u8>,
}

impl Envelope {
    pub fn data(payload: Vec<u8>) -> Envelope {
        Envelope {
            kind: FrameKind::Data,
            directives: Directives::empty(),
            payload,
        }
    }

    pub fn data_with_directives(payload: Vec<u8>, directives: Directives) -> Envelope {
        Envelope {
            kind: FrameKind::Data,
            directives,
            payload,
        }
    }

    /// No-op frame keeping an idle transport alive.
    pub fn heartbeat() -> Envelope {
        Envelope {
            kind: FrameKind::Heartbeat,
            directives: Directives::NO_RESPONSE,
            payload: Vec::new(),
        }
    }

    /// Request for the companion to end its session cleanly.
    pub fn poison() -> Envelope {
        Envelope {
            kind: FrameKind::Poison,
            directives: Directives::NO_RESPONSE,
            payload: Vec::new(),
        }
    }

    /// Initial handshake query carrying the runtime identifier.
    pub fn hello(runtime_id: &str) -> Envelope {
        Envelope {
            kind: FrameKind::Hello,
            directives: Directives::empty(),
            payload: runtime_id.as_bytes().to_vec(),
        }
    }

    /// Companion's answer to `hello`.
    pub fn hello_ack(runtime_id: &str) -> Envelope {
        Envelope {
            kind: FrameKind::HelloAck,
            directives: Directives::empty(),
            payload: runtime_id.as_bytes().to_vec(),
        }
    }

    pub fn is_control(&self) -> bool {
        self.kind != FrameKind::Data
    }
}

/// Length-delimited codec for envelopes: a fixed header (kind, directives,
/// payload length) followed by the payload bytes.
#[derive(Debug, Default)]
pub struct EnvelopeCodec;

impl Decoder for EnvelopeCodec {
    type Item = Envelope;
    type Error = BridgeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Envelope>, BridgeError> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let kind = FrameKind::from_wire(src[0])
            .ok_or_else(|| BridgeError::MalformedFrame(format!("unknown frame kind {}", src[0])))?;
        let directives = Directives::from_bits(src[1]);
        let payload_len = u32::from_be_bytes([src[2], src[3], src[4], src[5]]) as usize;

        if payload_len > MAX_PAYLOAD_LEN {
            return Err(BridgeError::MalformedFrame(format!(
                "payload length {payload_len} exceeds limit"
            )));
        }

        if src.len() < HEADER_LEN + payload_len {
            src.reserve(HEADER_LEN + payload_len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let payload = src.split_to(payload_len).to_vec();

        Ok(Some(Envelope {
            kind,
            directives,
            payload,
        }))
    }
}

impl Encoder<&Envelope> for EnvelopeCodec {
    type Error = BridgeError;

    fn encode(&mut self, item: &Envelope, dst: &mut BytesMut) -> Result<(), BridgeError> {
        if item.payload.len() > MAX_PAYLOAD_LEN {
            return Err(BridgeError::MalformedFrame(format!(
                "payload length {} exceeds limit",
                item.payload.len()
            )));
        }

        dst.reserve(HEADER_LEN + item.payload.len());
        dst.put_u8(item.kind as u8);
        dst.put_u8(item.directives.bits());
        dst.put_u32(item.payload.len() as u32);
        dst.put_slice(&item.payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(envelope: &Envelope) -> BytesMut {
        let mut buf = BytesMut::new();
        EnvelopeCodec.encode(envelope, &mut buf).unwrap();
        buf
    }

    #[test]
    fn decode_waits_for_a_complete_header() {
        let mut codec = EnvelopeCodec;
        let mut buf = BytesMut::from(&[0u8, 0, 0][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn decode_waits_for_a_complete_payload() {
        let mut codec = EnvelopeCodec;
        let mut buf = encode(&Envelope::data(b"abcdef".to_vec()));
        let full = buf.len();
        let mut partial = buf.split_to(full - 2);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        partial.unsplit(buf);
        let envelope = codec.decode(&mut partial).unwrap().unwrap();
        assert_eq!(envelope.kind, FrameKind::Data);
        assert_eq!(envelope.payload, b"abcdef");
        assert!(partial.is_empty());
    }

    #[test]
    fn decode_rejects_unknown_kind() {
        let mut codec = EnvelopeCodec;
        let mut buf = BytesMut::from(&[0xFFu8, 0, 0, 0, 0, 0][..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(BridgeError::MalformedFrame(_))
        ));
    }

    #[test]
    fn decode_rejects_oversized_payload() {
        let mut codec = EnvelopeCodec;
        let mut buf = BytesMut::new();
        buf.put_u8(FrameKind::Data as u8);
        buf.put_u8(0);
        buf.put_u32((MAX_PAYLOAD_LEN + 1) as u32);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(BridgeError::MalformedFrame(_))
        ));
    }

    #[test]
    fn consecutive_frames_decode_independently() {
        let mut codec = EnvelopeCodec;
        let mut buf = encode(&Envelope::hello("PY"));
        buf.extend_from_slice(&encode(&Envelope::heartbeat()));

        let first = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.kind, FrameKind::Hello);
        assert_eq!(first.payload, b"PY");

        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(second.kind, FrameKind::Heartbeat);
        assert!(second.directives.contains(Directives::NO_RESPONSE));
    }

    #[test]
    fn control_frames_are_flagged() {
        assert!(Envelope::poison().is_control());
        assert!(Envelope::heartbeat().is_control());
        assert!(!Envelope::data(vec![1]).is_control());
    }
}
