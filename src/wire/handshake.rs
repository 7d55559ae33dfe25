//! The fixed 32-byte handshake exchanged before either side sends a typed
//! message frame.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::Error;
use crate::PeerId;

/// The literal 18-byte protocol header every handshake begins with.
pub const PROTOCOL_STRING: &str = "P2PFILESHARINGPROJ";

/// Total handshake length: 18-byte header + 10 zero bytes + 4-byte peer id.
pub const HANDSHAKE_LEN: usize = 32;

/// The handshake message: our protocol header followed by the sender's peer
/// id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Handshake {
    pub peer_id: PeerId,
}

impl Handshake {
    pub fn new(peer_id: PeerId) -> Self {
        Self { peer_id }
    }
}

/// Codec for the fixed-size handshake, used before the connection switches
/// over to [`PeerCodec`](super::PeerCodec) for the rest of the session.
#[derive(Clone, Copy, Debug, Default)]
pub struct HandshakeCodec;

impl Decoder for HandshakeCodec {
    type Item = Handshake;
    type Error = Error;

    fn decode(
        &mut self,
        src: &mut BytesMut,
    ) -> Result<Option<Handshake>, Self::Error> {
        if src.len() < HANDSHAKE_LEN {
            src.reserve(HANDSHAKE_LEN - src.len());
            return Ok(None);
        }
        let mut buf = src.split_to(HANDSHAKE_LEN);

        let header = buf.split_to(PROTOCOL_STRING.len());
        if header != PROTOCOL_STRING.as_bytes() {
            return Err(Error::BadHandshake);
        }
        // the next 10 bytes are reserved and always zero; we don't enforce
        // that on receipt, only on send
        buf.advance(10);

        let peer_id = buf.get_u32();
        Ok(Some(Handshake { peer_id }))
    }
}

impl Encoder<Handshake> for HandshakeCodec {
    type Error = Error;

    fn encode(
        &mut self,
        item: Handshake,
        dst: &mut BytesMut,
    ) -> Result<(), Self::Error> {
        dst.reserve(HANDSHAKE_LEN);
        dst.put_slice(PROTOCOL_STRING.as_bytes());
        dst.put_slice(&[0u8; 10]);
        dst.put_u32(item.peer_id);
        Ok(())
    }
}
