//! SwarmRegistry (C6): the set of currently active peer links, plus the
//! broadcast and completion queries the rest of the engine drives off of it.
//!
//! The registry's own lock is a plain [`std::sync::Mutex`] and is only ever
//! held for the duration of a map lookup or snapshot copy — never across an
//! `.await`. Anything that needs to inspect or change a link's state takes a
//! snapshot under this lock, releases it, and only then locks the
//! individual link (registry → link, never the reverse), per the ordering
//! discipline the whole engine follows.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::peer::{Command, LinkHandle};
use crate::{PeerId, PieceIndex};

#[derive(Default)]
pub struct Registry {
    links: Mutex<HashMap<PeerId, LinkHandle>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            links: Mutex::new(HashMap::new()),
        }
    }

    /// Adds a newly-handshaken link. Rejects a second registration for a
    /// remote id that's already connected.
    pub fn register(&self, handle: LinkHandle) -> Result<()> {
        let mut links = self.links.lock().unwrap();
        if links.contains_key(&handle.remote_id) {
            return Err(Error::DuplicatePeer(handle.remote_id));
        }
        links.insert(handle.remote_id, handle);
        Ok(())
    }

    pub fn deregister(&self, id: PeerId) {
        self.links.lock().unwrap().remove(&id);
    }

    /// A point-in-time copy of every active link handle. Cheap: each handle
    /// is just an `Arc` and a channel sender.
    pub fn snapshot(&self) -> Vec<LinkHandle> {
        self.links.lock().unwrap().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.links.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queues a `have(index)` send on every link except `except`. A link
    /// whose receiver has gone away is silently skipped; the broadcast does
    /// not abort because one neighbor dropped.
    pub fn broadcast_have(&self, index: PieceIndex, except: PeerId) {
        for handle in self.snapshot() {
            if handle.remote_id != except {
                handle.send(Command::SendHave(index));
            }
        }
    }

    /// The set of piece indices currently pending on any link, so the
    /// request selector on one link never picks an index another link has
    /// already asked for.
    pub async fn pending_indices(&self) -> std::collections::HashSet<PieceIndex> {
        let mut pending = std::collections::HashSet::new();
        for handle in self.snapshot() {
            if let Some(index) = handle.state.lock().await.pending_request {
                pending.insert(index);
            }
        }
        pending
    }

    /// True iff every currently-registered link has reported a complete
    /// remote bitfield. An empty registry is vacuously *not* complete —
    /// termination requires an actual swarm, not the absence of one.
    pub async fn all_remotes_complete(&self) -> bool {
        let snapshot = self.snapshot();
        if snapshot.is_empty() {
            return false;
        }
        for handle in snapshot {
            if !handle.state.lock().await.has_complete_file {
                return false;
            }
        }
        true
    }
}
