//! Wire format: a 16-byte fixed header followed by an opaque body.
//!
//! ```text
//! Offset  Size  Field
//!  0      2     fixedMarker  = 0x41 0x63 ("Ac")
//!  2      1     version      (0x00 ping | 0x01 app)
//!  3      1     bodyType     (opaque, caller-defined)
//!  4      4     messageId    (opaque, echoed back by the peer)
//!  8      4     bodyLength   (0 ..= maxLength)
//! 12      4     reserved     (echoed unchanged)
//! 16      bodyLength  body bytes
//! ```

use crate::error::FrameError;
use bytes::{Buf, BufMut, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Version byte discriminating ping frames from application frames.
pub const VERSION_PING: u8 = 0x00;
pub const VERSION_APP: u8 = 0x01;

/// Default `bodyType` values a caller may use; the wire format treats this byte
/// as opaque, so any value round-trips even if it isn't one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum BodyType {
    Json = 1,
    Protobuf = 2,
    Xml = 3,
    Plain = 4,
}

/// The fixed-size fields of a frame, excluding its body.
///
/// Pooled independently of the body buffer by [`crate::pool::FramePool`] — the
/// shell itself is cheap, but recycling it keeps the pooling contract from the
/// source design intact and gives the pool something concrete to hand out.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameShell {
    pub version: u8,
    pub body_type: u8,
    pub message_id: u32,
    pub reserved: u32,
}

/// One complete protocol message.
#[derive(Debug, Clone)]
pub struct Frame {
    pub version: u8,
    pub body_type: u8,
    pub message_id: u32,
    pub reserved: u32,
    pub body: BytesMut,
}

impl Frame {
    pub const HEADER_LEN: usize = 16;
    pub const FIXED_MARKER: [u8; 2] = *b"Ac";

    /// Build an application frame (`version = VERSION_APP`).
    pub fn app(message_id: u32, body_type: u8, reserved: u32, body: BytesMut) -> Frame {
        Frame {
            version: VERSION_APP,
            body_type,
            message_id,
            reserved,
            body,
        }
    }

    /// Build a ping frame; pings carry no body and bypass the handler.
    pub fn ping(message_id: u32, reserved: u32) -> Frame {
        Frame {
            version: VERSION_PING,
            body_type: 0,
            message_id,
            reserved,
            body: BytesMut::new(),
        }
    }

    /// Assemble a frame from a pooled shell and a pooled body buffer.
    pub fn from_shell(shell: FrameShell, body: BytesMut) -> Frame {
        Frame {
            version: shell.version,
            body_type: shell.body_type,
            message_id: shell.message_id,
            reserved: shell.reserved,
            body,
        }
    }

    /// Split this frame back into its shell and body, e.g. to return both to
    /// their respective pools once the frame has been written to the socket.
    pub fn into_parts(self) -> (FrameShell, BytesMut) {
        (
            FrameShell {
                version: self.version,
                body_type: self.body_type,
                message_id: self.message_id,
                reserved: self.reserved,
            },
            self.body,
        )
    }

    pub fn is_ping(&self) -> bool {
        self.version == VERSION_PING
    }

    /// Total bytes this frame occupies on the wire (header + body).
    pub fn encoded_len(&self) -> usize {
        Self::HEADER_LEN + self.body.len()
    }

    /// Append this frame's wire representation to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(self.encoded_len());
        dst.put_slice(&Self::FIXED_MARKER);
        dst.put_u8(self.version);
        dst.put_u8(self.body_type);
        dst.put_u32(self.message_id);
        dst.put_u32(self.body.len() as u32);
        dst.put_u32(self.reserved);
        dst.put_slice(&self.body);
    }
}

/// Streaming frame decoder. Stateless aside from the configured `max_length`;
/// the caller holds the accumulation buffer across reads and feeds it to
/// [`Decoder::decode`] in a loop until it returns `Ok(None)`.
#[derive(Debug, Clone, Copy)]
pub struct Decoder {
    max_length: u32,
}

impl Decoder {
    pub fn new(max_length: u32) -> Decoder {
        Decoder { max_length }
    }

    /// Attempt to decode one frame from the front of `src`.
    ///
    /// - `Ok(Some(frame))`: a complete frame was consumed from `src`.
    /// - `Ok(None)`: `src` does not yet hold a complete frame; call again
    ///   after appending more bytes.
    /// - `Err(_)`: the stream is malformed; the connection must be dropped,
    ///   since framing cannot resynchronize after this point.
    pub fn decode(&self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        if src.len() < Frame::HEADER_LEN {
            return Ok(None);
        }
        if src[0..2] != Frame::FIXED_MARKER {
            return Err(FrameError::FixedHeaderMismatch);
        }
        let body_length = u32::from_be_bytes(src[8..12].try_into().unwrap());
        if body_length > self.max_length {
            return Err(FrameError::BodyLengthExceeded {
                length: body_length,
                max: self.max_length,
            });
        }
        let total = Frame::HEADER_LEN + body_length as usize;
        if src.len() < total {
            return Ok(None);
        }

        let version = src[2];
        let body_type = src[3];
        let message_id = u32::from_be_bytes(src[4..8].try_into().unwrap());
        let reserved = u32::from_be_bytes(src[12..16].try_into().unwrap());

        src.advance(Frame::HEADER_LEN);
        let body = src.split_to(body_length as usize);

        Ok(Some(Frame {
            version,
            body_type,
            message_id,
            reserved,
            body,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(body: &[u8]) -> Frame {
        Frame::app(7, BodyType::Plain.into(), 0xDEAD_BEEF, BytesMut::from(body))
    }

    #[test]
    fn round_trips_through_encode_decode() {
        let frame = sample(b"hello");
        let mut buf = BytesMut::new();
        frame.encode(&mut buf);

        let decoder = Decoder::new(65536);
        let decoded = decoder.decode(&mut buf).unwrap().expect("complete frame");
        assert_eq!(decoded.version, VERSION_APP);
        assert_eq!(decoded.message_id, 7);
        assert_eq!(decoded.reserved, 0xDEAD_BEEF);
        assert_eq!(&decoded.body[..], b"hello");
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_waits_for_a_full_header() {
        let decoder = Decoder::new(65536);
        let mut buf = BytesMut::from(&b"Ac\x01"[..]);
        assert!(decoder.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn decode_waits_for_a_full_body() {
        let frame = sample(b"hello world");
        let mut full = BytesMut::new();
        frame.encode(&mut full);

        let decoder = Decoder::new(65536);
        let mut partial = BytesMut::from(&full[..full.len() - 3]);
        assert!(decoder.decode(&mut partial).unwrap().is_none());
    }

    #[test]
    fn decode_rejects_bad_marker() {
        let decoder = Decoder::new(65536);
        let mut buf = BytesMut::from(
            &b"XX\x01\x01\x00\x00\x00\x01\x00\x00\x00\x00\x00\x00\x00\x00\x00"[..],
        );
        assert_eq!(decoder.decode(&mut buf).unwrap_err(), FrameError::FixedHeaderMismatch);
    }

    #[test]
    fn decode_rejects_oversize_body() {
        let decoder = Decoder::new(16);
        let mut buf = BytesMut::new();
        sample(b"this body is much longer than sixteen bytes").encode(&mut buf);
        assert_eq!(
            decoder.decode(&mut buf).unwrap_err(),
            FrameError::BodyLengthExceeded { length: 44, max: 16 }
        );
    }

    #[test]
    fn decode_drains_multiple_frames_from_one_buffer() {
        let mut buf = BytesMut::new();
        sample(b"one").encode(&mut buf);
        sample(b"two").encode(&mut buf);

        let decoder = Decoder::new(65536);
        let first = decoder.decode(&mut buf).unwrap().unwrap();
        let second = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&first.body[..], b"one");
        assert_eq!(&second.body[..], b"two");
        assert!(buf.is_empty());
    }

    #[test]
    fn ping_has_empty_body_and_is_flagged() {
        let ping = Frame::ping(1, 0);
        assert!(ping.is_ping());
        assert!(ping.body.is_empty());
    }
}
