//! Per-connection protocol engine (C4 PeerLink + C5 MessageLogic).
//!
//! A link owns the socket and is the sole writer of its half of the
//! connection; every other part of the engine that needs to push a frame to
//! this peer (the choke controller, a `have` broadcast from another link)
//! does so by sending a [`Command`] through that link's channel rather than
//! touching the socket directly.

pub mod session;

pub use session::{accept_inbound, connect_outbound};

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::{Bitfield, PeerId, PieceIndex};

/// Commands accepted on a link's outbound channel. These are the only way
/// anything outside the link's own read loop may cause it to write to its
/// socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    SendChoke,
    SendUnchoke,
    SendHave(PieceIndex),
    Shutdown,
}

pub type CommandSender = mpsc::UnboundedSender<Command>;
pub type CommandReceiver = mpsc::UnboundedReceiver<Command>;

/// Mutable per-connection state, as described in the data model: choke and
/// interest flags in both directions, the peer's known pieces, the single
/// pending request slot, and the rolling byte counters the choke controller
/// reads every tick.
#[derive(Debug)]
pub struct LinkState {
    pub peer_choking: bool,
    pub am_choking: bool,
    pub am_interested: bool,
    pub peer_interested: bool,
    pub peer_bitfield: Bitfield,
    pub pending_request: Option<PieceIndex>,
    pub bytes_in_interval: u64,
    pub download_rate: f64,
    pub has_complete_file: bool,
}

impl LinkState {
    pub fn new(num_pieces: usize) -> Self {
        Self {
            // both sides start choked and uninterested, as neither has
            // exchanged a bitfield yet
            peer_choking: true,
            am_choking: true,
            am_interested: false,
            peer_interested: false,
            peer_bitfield: Bitfield::new(num_pieces),
            pending_request: None,
            bytes_in_interval: 0,
            download_rate: 0.0,
            has_complete_file: false,
        }
    }
}

/// A registry-held reference to a live link: enough to inspect its state and
/// to ask it to send something, without touching its socket.
#[derive(Clone)]
pub struct LinkHandle {
    pub remote_id: PeerId,
    pub state: Arc<Mutex<LinkState>>,
    pub commands: CommandSender,
}

impl LinkHandle {
    pub fn send(&self, cmd: Command) {
        // the link may have already torn down its receiver; that's not an
        // error for the sender, just a no-op
        let _ = self.commands.send(cmd);
    }
}