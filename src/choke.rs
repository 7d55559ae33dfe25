//! ChokeController (C7): the two periodic tasks that recompute
//! `preferredNeighbors` and the optimistic-unchoke neighbor from measured
//! download rates, and push the resulting choke/unchoke commands out to
//! every link. Grounded on the original `unchoking_task` /
//! `select_preferred_neighbors` / `optimistic_unchoking_task` /
//! `select_optimistic_unchoke_neighbor` methods of `PeerProcess`, translated
//! from a thread-per-task-plus-lock model to two `tokio::time::interval`
//! loops over registry snapshots.

use std::sync::Mutex;
use std::time::Duration;

use rand::seq::SliceRandom;

use crate::peer::{Command, LinkHandle};
use crate::swarm::Swarm;
use crate::PeerId;

/// Runs both periodic tasks until the process is torn down. Neither task
/// shares a lock with the link read loops while doing I/O: each tick only
/// ever locks a link's state to read a snapshot or to flip `am_choking`, and
/// pushes sends through the link's command channel rather than touching its
/// socket.
pub struct ChokeController {
    swarm: Swarm,
    unchoking_interval: Duration,
    optimistic_unchoking_interval: Duration,
    /// Remembered across ticks so the optimistic task can exclude whoever
    /// the preferred-neighbor task just chose, and so §8 invariant 6 can be
    /// checked against the prior state.
    preferred: Mutex<Vec<PeerId>>,
    optimistic: Mutex<Option<PeerId>>,
}

impl ChokeController {
    pub fn new(
        swarm: Swarm,
        unchoking_interval: Duration,
        optimistic_unchoking_interval: Duration,
    ) -> Self {
        Self {
            swarm,
            unchoking_interval,
            optimistic_unchoking_interval,
            preferred: Mutex::new(Vec::new()),
            optimistic: Mutex::new(None),
        }
    }

    /// Spawns the two periodic tasks as background tokio tasks and returns
    /// their join handles, so `bootstrap` can hold onto the whole swarm's
    /// task set for a clean shutdown.
    pub fn spawn(self: std::sync::Arc<Self>) -> (tokio::task::JoinHandle<()>, tokio::task::JoinHandle<()>) {
        let preferred_task = {
            let controller = self.clone();
            tokio::spawn(async move { controller.run_preferred_neighbor_task().await })
        };
        let optimistic_task = {
            let controller = self.clone();
            tokio::spawn(async move { controller.run_optimistic_unchoke_task().await })
        };
        (preferred_task, optimistic_task)
    }

    async fn run_preferred_neighbor_task(&self) {
        let mut ticker = tokio::time::interval(self.unchoking_interval);
        loop {
            ticker.tick().await;
            if let Err(err) = self.tick_preferred_neighbors().await {
                log::error!("preferred-neighbor tick failed: {}", err);
            }
        }
    }

    async fn run_optimistic_unchoke_task(&self) {
        let mut ticker = tokio::time::interval(self.optimistic_unchoking_interval);
        loop {
            ticker.tick().await;
            if let Err(err) = self.tick_optimistic_unchoke().await {
                log::error!("optimistic-unchoke tick failed: {}", err);
            }
        }
    }

    /// One preferred-neighbor tick, per §4.6 steps 1-6.
    async fn tick_preferred_neighbors(&self) -> crate::Result<()> {
        let self_complete = self.swarm.piece_store.complete().await;
        let candidates = self.interested_links().await;

        let k = self.swarm.num_preferred_neighbors;
        let chosen_ids = if self_complete {
            choose_random(&candidates, k)
        } else {
            choose_by_rate(&candidates, k).await
        };

        {
            let mut preferred = self.preferred.lock().unwrap();
            *preferred = chosen_ids.clone();
        }
        let optimistic = *self.optimistic.lock().unwrap();

        for handle in self.swarm.registry.snapshot() {
            let should_be_unchoked =
                chosen_ids.contains(&handle.remote_id) || optimistic == Some(handle.remote_id);
            let am_choking = handle.state.lock().await.am_choking;
            if should_be_unchoked && am_choking {
                handle.send(Command::SendUnchoke);
            } else if !should_be_unchoked && !am_choking {
                handle.send(Command::SendChoke);
            }
        }

        self.swarm
            .eventlog
            .preferred_neighbors(self.swarm.local_id, &chosen_ids);

        // Roll over the rate window: compute this interval's rate from the
        // byte counter and reset it for the next one.
        let secs = self.unchoking_interval.as_secs_f64().max(f64::EPSILON);
        for handle in self.swarm.registry.snapshot() {
            let mut state = handle.state.lock().await;
            state.download_rate = state.bytes_in_interval as f64 / secs;
            state.bytes_in_interval = 0;
        }

        Ok(())
    }

    /// One optimistic-unchoke tick, per §4.6 steps 1-3.
    async fn tick_optimistic_unchoke(&self) -> crate::Result<()> {
        let preferred = self.preferred.lock().unwrap().clone();
        let mut candidates = Vec::new();
        for handle in self.swarm.registry.snapshot() {
            let state = handle.state.lock().await;
            if state.peer_interested && state.am_choking && !preferred.contains(&handle.remote_id)
            {
                candidates.push(handle.clone());
            }
        }

        let chosen = candidates.choose(&mut rand::thread_rng()).cloned();
        match chosen {
            Some(handle) => {
                handle.send(Command::SendUnchoke);
                *self.optimistic.lock().unwrap() = Some(handle.remote_id);
                self.swarm
                    .eventlog
                    .optimistic_neighbor(self.swarm.local_id, handle.remote_id);
            }
            None => {
                // No eligible candidate: the previous optimistic neighbor
                // (if any) loses its optimistic status here. It will be
                // re-choked by the next preferred-neighbor tick unless it's
                // also preferred.
                *self.optimistic.lock().unwrap() = None;
            }
        }
        Ok(())
    }

    async fn interested_links(&self) -> Vec<LinkHandle> {
        let mut interested = Vec::new();
        for handle in self.swarm.registry.snapshot() {
            if handle.state.lock().await.peer_interested {
                interested.push(handle);
            }
        }
        interested
    }
}

/// Seeder policy: `min(k, |candidates|)` chosen uniformly at random.
fn choose_random(candidates: &[LinkHandle], k: usize) -> Vec<PeerId> {
    let mut ids: Vec<PeerId> = candidates.iter().map(|h| h.remote_id).collect();
    ids.shuffle(&mut rand::thread_rng());
    ids.truncate(k);
    ids
}

/// Leecher policy: sort by download rate descending and take the first `k`,
/// breaking ties uniformly at random among the tied group.
async fn choose_by_rate(candidates: &[LinkHandle], k: usize) -> Vec<PeerId> {
    let mut rated = Vec::with_capacity(candidates.len());
    for handle in candidates {
        let rate = handle.state.lock().await.download_rate;
        rated.push((handle.remote_id, rate));
    }
    // Shuffle first so that a stable sort's tie-break (original order)
    // becomes a uniformly random tie-break instead.
    rated.shuffle(&mut rand::thread_rng());
    rated.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    rated.into_iter().take(k).map(|(id, _)| id).collect()
}
