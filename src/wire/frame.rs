//! Length-prefixed framing: `4-byte big-endian length L (>= 1), 1-byte type
//! code, (L-1) bytes of payload`. This layer is purely mechanical — it knows
//! nothing about what the type codes mean; that's [`super::Message`]'s job.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::Error;

const LENGTH_FIELD_LEN: usize = 4;

/// A decoded frame before its type code has been interpreted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawFrame {
    pub id: u8,
    pub payload: Bytes,
}

/// Codec for the typed message frame used for the remainder of a session
/// after the handshake.
#[derive(Clone, Copy, Debug, Default)]
pub struct PeerCodec;

impl Decoder for PeerCodec {
    type Item = RawFrame;
    type Error = Error;

    fn decode(
        &mut self,
        src: &mut BytesMut,
    ) -> Result<Option<RawFrame>, Self::Error> {
        if src.len() < LENGTH_FIELD_LEN {
            return Ok(None);
        }

        // peek the length field without consuming it yet, so that if the
        // full frame hasn't arrived we can return and try again later
        // without having thrown away the length prefix
        let len = u32::from_be_bytes(src[..LENGTH_FIELD_LEN].try_into().unwrap())
            as usize;
        if len == 0 {
            // a frame always carries at least a type byte
            src.advance(LENGTH_FIELD_LEN);
            return Err(Error::Socket(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "zero-length frame",
            )));
        }

        let frame_len = LENGTH_FIELD_LEN + len;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_FIELD_LEN);
        let mut body = src.split_to(len);
        let id = body.get_u8();
        let payload = body.freeze();

        Ok(Some(RawFrame { id, payload }))
    }
}

impl Encoder<RawFrame> for PeerCodec {
    type Error = Error;

    fn encode(
        &mut self,
        item: RawFrame,
        dst: &mut BytesMut,
    ) -> Result<(), Self::Error> {
        let len = 1 + item.payload.len();
        dst.reserve(LENGTH_FIELD_LEN + len);
        dst.put_u32(len as u32);
        dst.put_u8(item.id);
        dst.put_slice(&item.payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_decode_roundtrips() {
        let mut codec = PeerCodec;
        let mut buf = BytesMut::new();
        let frame = RawFrame {
            id: 4,
            payload: Bytes::from_static(&[0, 0, 0, 7]),
        };
        codec.encode(frame.clone(), &mut buf).unwrap();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, frame);
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_waits_for_full_frame() {
        let mut codec = PeerCodec;
        let mut buf = BytesMut::new();
        buf.put_u32(5); // claims a 5 byte body
        buf.put_u8(4); // only the type byte has arrived so far
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn decode_waits_when_length_prefix_incomplete() {
        let mut codec = PeerCodec;
        let mut buf = BytesMut::new();
        buf.put_slice(&[0, 0]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn decode_rejects_zero_length_frame() {
        let mut codec = PeerCodec;
        let mut buf = BytesMut::new();
        buf.put_u32(0);
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn decode_handles_multiple_frames_in_one_buffer() {
        let mut codec = PeerCodec;
        let mut buf = BytesMut::new();
        codec
            .encode(
                RawFrame {
                    id: 0,
                    payload: Bytes::new(),
                },
                &mut buf,
            )
            .unwrap();
        codec
            .encode(
                RawFrame {
                    id: 1,
                    payload: Bytes::new(),
                },
                &mut buf,
            )
            .unwrap();

        let first = codec.decode(&mut buf).unwrap().unwrap();
        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.id, 0);
        assert_eq!(second.id, 1);
        assert!(buf.is_empty());
    }
}
