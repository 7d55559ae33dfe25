//! Core engine for a fixed-roster, fair-exchange peer-to-peer file sharing
//! swarm: peers exchange whole pieces of a single known-size payload over
//! long-lived TCP connections, choking and unchoking each other according to
//! measured download rate, with periodic optimistic unchokes for newcomers.

pub mod bitfield;
pub mod bootstrap;
pub mod choke;
pub mod conf;
pub mod error;
pub mod eventlog;
pub mod peer;
pub mod piece_store;
pub mod registry;
pub mod swarm;
pub mod termination;
pub mod wire;

pub use bitfield::Bitfield;
pub use error::{Error, Result};

/// The type of a piece's index.
///
/// On the wire all integers are sent as 4-byte big endian integers, but in
/// the source code we use `usize` to be consistent with other index types in
/// Rust.
pub type PieceIndex = usize;

/// A peer's id, as assigned in `PeerInfo.cfg`. Non-negative, unique per peer,
/// static for the lifetime of the swarm. Ordering of ids decides who dials
/// whom: a peer dials every peer whose id is lower than its own.
pub type PeerId = u32;
