//! Error types shared across the engine.
//!
//! Most of the error kinds here are local to a single peer link or a single
//! controller tick: per §7 of the design, only [`Error::Config`] and a
//! listener bind failure are fatal to the whole process.

use std::io;

use crate::PieceIndex;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The 18-byte protocol header didn't match, or (for an outbound dial)
    /// the peer id in the returned handshake didn't match the dialed peer.
    #[error("bad handshake")]
    BadHandshake,

    /// A frame was cut off mid-read, or the underlying socket read/write
    /// failed.
    #[error("truncated frame or socket error: {0}")]
    Socket(#[from] io::Error),

    /// A bitfield's encoded length didn't match `ceil(num_pieces / 8)`.
    #[error("malformed bitfield: expected {expected} bytes, got {actual}")]
    MalformedBitfield { expected: usize, actual: usize },

    /// A `have`, `request`, or `piece` message carried a piece index outside
    /// `0..num_pieces`.
    #[error("piece index {0} out of range")]
    InvalidPieceIndex(PieceIndex),

    /// An unrecognized message type code was received. The link logs and
    /// drops the frame rather than treating this as fatal.
    #[error("unknown message type code {0}")]
    UnknownMessageType(u8),

    /// A recognized message type carried a payload of the wrong shape (e.g.
    /// a `have` frame with fewer than 4 payload bytes). Logged and dropped;
    /// does not close the link.
    #[error("message type {message_id} expects at least {expected_at_least} payload bytes, got {actual}")]
    MalformedPayload {
        message_id: u8,
        expected_at_least: usize,
        actual: usize,
    },

    /// A piece store `get`/`put` failed.
    #[error("piece store I/O error: {0}")]
    PieceStoreIo(#[source] io::Error),

    /// Filesystem I/O outside the piece store itself (log directory/file
    /// creation). Fatal only when it occurs during startup.
    #[error("I/O error: {0}")]
    Io(#[source] io::Error),

    /// A roster or config file was missing, malformed, or had the wrong
    /// number of fields on a line.
    #[error("configuration error: {0}")]
    Config(String),

    /// A remote id tried to register a second connection while one was
    /// already active for that id.
    #[error("peer {0} already connected")]
    DuplicatePeer(crate::PeerId),

    /// The remote peer is not present in our roster at all.
    #[error("peer {0} not found in roster")]
    UnknownPeer(crate::PeerId),
}
