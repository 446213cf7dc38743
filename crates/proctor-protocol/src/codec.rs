//! Tokio codec for length-framed payloads
//!
//! Frames are a 4-byte big-endian length prefix followed by that many bytes
//! of payload. The payload is UTF-8 JSON on both relay legs, but the framing
//! layer is content-agnostic and hands out raw bytes.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;

/// Size of the length prefix in bytes
pub const PREFIX_SIZE: usize = 4;

/// Maximum payload size. A frame announcing more than this is a fatal
/// protocol violation for the connection carrying it.
pub const MAX_PAYLOAD_SIZE: usize = 10_000_000;

/// Codec for encoding/decoding length-prefixed frames
#[derive(Debug, Default)]
pub struct FrameCodec {
    /// Payload length currently being decoded (if any)
    pending_len: Option<usize>,
}

impl FrameCodec {
    /// Create a new codec
    pub fn new() -> Self {
        Self { pending_len: None }
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let len = match self.pending_len.take() {
            Some(len) => len,
            None => {
                if src.len() < PREFIX_SIZE {
                    return Ok(None); // Need more data
                }
                let len = src.get_u32() as usize;
                if len > MAX_PAYLOAD_SIZE {
                    return Err(ProtocolError::PayloadTooLarge {
                        size: len,
                        max: MAX_PAYLOAD_SIZE,
                    });
                }
                len
            }
        };

        if src.len() < len {
            // Save length and wait for more data
            self.pending_len = Some(len);
            return Ok(None);
        }

        Ok(Some(src.split_to(len).freeze()))
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, payload: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        dst.reserve(PREFIX_SIZE + payload.len());
        dst.put_u32(payload.len() as u32);
        dst.extend_from_slice(&payload);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_roundtrip() {
        let mut codec = FrameCodec::new();
        let payload = Bytes::from_static(b"{\"request\": \"listUsers\"}");

        let mut buf = BytesMut::new();
        codec.encode(payload.clone(), &mut buf).unwrap();
        assert_eq!(buf.len(), PREFIX_SIZE + payload.len());

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, payload);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_codec_partial_read() {
        let mut codec = FrameCodec::new();
        let payload = Bytes::from_static(b"hello agents");

        let mut full_buf = BytesMut::new();
        codec.encode(payload.clone(), &mut full_buf).unwrap();

        // Feed less than the prefix first
        let mut partial = full_buf.split_to(PREFIX_SIZE - 1);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        // Prefix complete but payload truncated
        partial.extend_from_slice(&full_buf.split_to(3));
        assert!(codec.decode(&mut partial).unwrap().is_none());

        // Remainder arrives
        partial.extend_from_slice(&full_buf);
        let decoded = codec.decode(&mut partial).unwrap().unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_codec_two_frames_one_buffer() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(Bytes::from_static(b"first"), &mut buf).unwrap();
        codec.encode(Bytes::from_static(b"second"), &mut buf).unwrap();

        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().as_ref(), b"first");
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().as_ref(), b"second");
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        buf.put_u32((MAX_PAYLOAD_SIZE + 1) as u32);
        buf.extend_from_slice(b"xx");

        let result = codec.decode(&mut buf);
        assert!(matches!(
            result,
            Err(ProtocolError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn test_oversized_encode_rejected() {
        let mut codec = FrameCodec::new();
        let payload = Bytes::from(vec![0u8; MAX_PAYLOAD_SIZE + 1]);
        let mut buf = BytesMut::new();
        assert!(codec.encode(payload, &mut buf).is_err());
    }

    #[test]
    fn test_empty_payload() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(Bytes::new(), &mut buf).unwrap();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert!(decoded.is_empty());
    }
}
