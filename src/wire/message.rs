//! Semantic message types layered over [`super::RawFrame`]. Decoding here
//! validates payload *shape* only (right number of bytes for the type); range
//! checks against a live piece count (e.g. is this `have` index even valid)
//! are left to the message-logic layer, which is the only place that knows
//! `num_pieces`.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::frame::RawFrame;
use crate::error::{Error, Result};

/// Type codes as they appear on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
}

impl MessageId {
    fn from_u8(id: u8) -> Result<Self> {
        Ok(match id {
            0 => Self::Choke,
            1 => Self::Unchoke,
            2 => Self::Interested,
            3 => Self::NotInterested,
            4 => Self::Have,
            5 => Self::Bitfield,
            6 => Self::Request,
            7 => Self::Piece,
            other => return Err(Error::UnknownMessageType(other)),
        })
    }
}

/// A fully decoded protocol message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    /// Announces a newly-acquired piece.
    Have(u32),
    /// The sender's full piece bitfield, sent once right after the
    /// handshake.
    Bitfield(Bytes),
    /// Asks for a whole piece by index (the roster's fixed piece size means
    /// there is no offset/length to negotiate).
    Request(u32),
    /// A whole piece's bytes, sent in answer to a `Request`.
    Piece { index: u32, data: Bytes },
}

impl Message {
    pub fn id(&self) -> MessageId {
        match self {
            Self::Choke => MessageId::Choke,
            Self::Unchoke => MessageId::Unchoke,
            Self::Interested => MessageId::Interested,
            Self::NotInterested => MessageId::NotInterested,
            Self::Have(_) => MessageId::Have,
            Self::Bitfield(_) => MessageId::Bitfield,
            Self::Request(_) => MessageId::Request,
            Self::Piece { .. } => MessageId::Piece,
        }
    }

    /// Converts a mechanically-decoded frame into a semantic message,
    /// validating only that the payload is the right shape for its type.
    pub fn decode(frame: RawFrame) -> Result<Self> {
        let id = MessageId::from_u8(frame.id)?;
        let mut payload = frame.payload;

        let require = |payload: &Bytes, at_least: usize| -> Result<()> {
            if payload.len() < at_least {
                return Err(Error::MalformedPayload {
                    message_id: id as u8,
                    expected_at_least: at_least,
                    actual: payload.len(),
                });
            }
            Ok(())
        };

        Ok(match id {
            MessageId::Choke => Self::Choke,
            MessageId::Unchoke => Self::Unchoke,
            MessageId::Interested => Self::Interested,
            MessageId::NotInterested => Self::NotInterested,
            MessageId::Have => {
                require(&payload, 4)?;
                Self::Have(payload.get_u32())
            }
            MessageId::Bitfield => Self::Bitfield(payload),
            MessageId::Request => {
                require(&payload, 4)?;
                Self::Request(payload.get_u32())
            }
            MessageId::Piece => {
                require(&payload, 4)?;
                let index = payload.get_u32();
                Self::Piece {
                    index,
                    data: payload,
                }
            }
        })
    }

    /// Converts this message back into a mechanical frame for sending.
    pub fn into_raw(self) -> RawFrame {
        let id = self.id() as u8;
        let payload = match self {
            Self::Choke | Self::Unchoke | Self::Interested | Self::NotInterested => {
                Bytes::new()
            }
            Self::Have(index) | Self::Request(index) => {
                let mut buf = BytesMut::with_capacity(4);
                buf.put_u32(index);
                buf.freeze()
            }
            Self::Bitfield(bytes) => bytes,
            Self::Piece { index, data } => {
                let mut buf = BytesMut::with_capacity(4 + data.len());
                buf.put_u32(index);
                buf.put_slice(&data);
                buf.freeze()
            }
        };
        RawFrame { id, payload }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(msg: Message) {
        let decoded = Message::decode(msg.clone().into_raw()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn roundtrips_all_fixed_messages() {
        roundtrip(Message::Choke);
        roundtrip(Message::Unchoke);
        roundtrip(Message::Interested);
        roundtrip(Message::NotInterested);
        roundtrip(Message::Have(42));
        roundtrip(Message::Request(7));
        roundtrip(Message::Bitfield(Bytes::from_static(&[0xB1, 0x80])));
        roundtrip(Message::Piece {
            index: 3,
            data: Bytes::from_static(b"piece bytes"),
        });
    }

    #[test]
    fn decode_rejects_unknown_type() {
        let frame = RawFrame {
            id: 200,
            payload: Bytes::new(),
        };
        assert!(matches!(
            Message::decode(frame),
            Err(Error::UnknownMessageType(200))
        ));
    }

    #[test]
    fn decode_rejects_short_have_payload() {
        let frame = RawFrame {
            id: MessageId::Have as u8,
            payload: Bytes::from_static(&[0, 0]),
        };
        assert!(matches!(
            Message::decode(frame),
            Err(Error::MalformedPayload { .. })
        ));
    }

    #[test]
    fn decode_rejects_short_request_payload() {
        let frame = RawFrame {
            id: MessageId::Request as u8,
            payload: Bytes::new(),
        };
        assert!(matches!(
            Message::decode(frame),
            Err(Error::MalformedPayload { .. })
        ));
    }

    #[test]
    fn bitfield_payload_passes_through_untouched() {
        let bytes = Bytes::from_static(&[0xFF, 0x00, 0x0F]);
        let frame = RawFrame {
            id: MessageId::Bitfield as u8,
            payload: bytes.clone(),
        };
        let decoded = Message::decode(frame).unwrap();
        assert_eq!(decoded, Message::Bitfield(bytes));
    }
}
