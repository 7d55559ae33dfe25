//! Termination detection (§4.8): a background check every 5 seconds for
//! whether the local bitfield is complete and every connected peer reports
//! `hasCompleteFile`. Grounded on `PeerProcess.completion_check_task` /
//! `terminate` in the original source; `selfComplete` here is monotonic by
//! construction since [`crate::piece_store::PieceStore::complete`] only ever
//! transitions from not-complete to complete.

use std::time::Duration;

use crate::swarm::Swarm;

const CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Runs until the swarm has terminated, then returns. The caller is
/// expected to exit the process on return (see `main.rs`); this function
/// itself performs no process-level side effects beyond logging, so it
/// remains testable without forking.
pub async fn wait_for_completion(swarm: Swarm) {
    let mut ticker = tokio::time::interval(CHECK_INTERVAL);
    loop {
        ticker.tick().await;
        if is_complete(&swarm).await {
            log::info!(
                "peer {} and every connected neighbor have the complete file; terminating",
                swarm.local_id
            );
            return;
        }
    }
}

/// `selfComplete ∧ ∀ link. hasCompleteFile`, per invariant 7 (§8). An empty
/// registry is vacuously not complete: termination requires an actual
/// swarm having converged, not the absence of neighbors.
async fn is_complete(swarm: &Swarm) -> bool {
    swarm.piece_store.complete().await && swarm.registry.all_remotes_complete().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eventlog::EventLog;
    use crate::peer::{Command, LinkHandle, LinkState};
    use crate::piece_store::PieceStore;
    use crate::registry::Registry;
    use crate::Bitfield;
    use std::sync::Arc;
    use tokio::sync::{mpsc, Mutex as AsyncMutex};

    async fn test_swarm(dir_tag: &str) -> Swarm {
        let dir = std::env::temp_dir().join(format!("swarmshare-term-{}", dir_tag));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let piece_store = PieceStore::new_empty(&dir, "file.bin", 1, 16, 16).unwrap();
        let eventlog = EventLog::new(dir.join("logs"), 1).unwrap();
        Swarm::new(1, 1, 1, Bitfield::new(1), piece_store, Registry::new(), eventlog)
    }

    #[tokio::test]
    async fn not_complete_without_local_bitfield() {
        let swarm = test_swarm("no-local").await;
        assert!(!is_complete(&swarm).await);
    }

    #[tokio::test]
    async fn not_complete_with_no_peers() {
        let swarm = test_swarm("no-peers").await;
        swarm.piece_store.put(0, bytes::Bytes::from_static(&[0u8; 16])).await.unwrap();
        assert!(!is_complete(&swarm).await);
    }

    #[tokio::test]
    async fn complete_once_local_and_every_peer_has_the_file() {
        let swarm = test_swarm("complete").await;
        swarm.piece_store.put(0, bytes::Bytes::from_static(&[0u8; 16])).await.unwrap();

        let mut state = LinkState::new(1);
        state.has_complete_file = true;
        let (tx, _rx) = mpsc::unbounded_channel::<Command>();
        swarm
            .registry
            .register(LinkHandle {
                remote_id: 2,
                state: Arc::new(AsyncMutex::new(state)),
                commands: tx,
            })
            .unwrap();

        assert!(is_complete(&swarm).await);
    }
}
