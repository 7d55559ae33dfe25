//! The framed wire protocol (C2): handshake I/O and the length-prefixed
//! typed message frame.

mod frame;
mod handshake;
mod message;

pub use frame::{PeerCodec, RawFrame};
pub use handshake::{Handshake, HandshakeCodec, HANDSHAKE_LEN, PROTOCOL_STRING};
pub use message::{Message, MessageId};
