//! The shared context every peer link, the choke controller, and bootstrap
//! all hold a clone of: the local bitfield, the piece store, the registry,
//! and the event log. Bundled together so constructors don't have to thread
//! four separate `Arc`s through every call site.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::eventlog::EventLog;
use crate::piece_store::PieceStore;
use crate::registry::Registry;
use crate::{Bitfield, PeerId};

#[derive(Clone)]
pub struct Swarm {
    pub local_id: PeerId,
    pub num_pieces: usize,
    /// `k` from the config: the maximum size of `preferredNeighbors`.
    pub num_preferred_neighbors: usize,
    pub local_bitfield: Arc<Mutex<Bitfield>>,
    pub piece_store: Arc<PieceStore>,
    pub registry: Arc<Registry>,
    pub eventlog: Arc<EventLog>,
}

impl Swarm {
    pub fn new(
        local_id: PeerId,
        num_pieces: usize,
        num_preferred_neighbors: usize,
        local_bitfield: Bitfield,
        piece_store: PieceStore,
        registry: Registry,
        eventlog: EventLog,
    ) -> Self {
        Self {
            local_id,
            num_pieces,
            num_preferred_neighbors,
            local_bitfield: Arc::new(Mutex::new(local_bitfield)),
            piece_store: Arc::new(piece_store),
            registry: Arc::new(registry),
            eventlog: Arc::new(eventlog),
        }
    }
}
