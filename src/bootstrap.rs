//! Bootstrap (C8): the listener and the set of outbound dialers that seed
//! the registry at startup. Grounded on `PeerProcess.start` /
//! `accept_incoming_connections` / `connect_to_peers` /
//! `establish_connection` in the original source, translated from a
//! thread-per-connection model to a task-per-connection one.

use std::net::SocketAddr;

use tokio::net::TcpListener;

use crate::conf::Roster;
use crate::peer::{accept_inbound, connect_outbound};
use crate::swarm::Swarm;
use crate::PeerId;

/// Starts the listener for the local peer's configured port and spawns a
/// task to run it, plus one outbound dial task per roster entry with a
/// strictly smaller id (the ordering rule in the data model). Returns once
/// every dial attempt has been spawned; the listener keeps accepting for the
/// lifetime of the process.
pub async fn run(swarm: Swarm, roster: &Roster) -> crate::Result<()> {
    let local = roster.get(swarm.local_id)?;
    let listen_addr: SocketAddr = format!("{}:{}", local.host, local.port)
        .parse()
        .map_err(|err| {
            crate::Error::Config(format!(
                "bad listen address {}:{}: {}",
                local.host, local.port, err
            ))
        })?;
    let listener = TcpListener::bind(listen_addr)
        .await
        .map_err(crate::Error::Socket)?;

    {
        let swarm = swarm.clone();
        tokio::spawn(async move { accept_loop(swarm, listener).await });
    }

    for entry in roster.dial_targets(swarm.local_id) {
        let swarm = swarm.clone();
        let addr: SocketAddr = format!("{}:{}", entry.host, entry.port)
            .parse()
            .map_err(|err| {
                crate::Error::Config(format!(
                    "bad dial address {}:{}: {}",
                    entry.host, entry.port, err
                ))
            })?;
        let remote_id: PeerId = entry.peer_id;
        tokio::spawn(async move {
            if let Err(err) = connect_outbound(swarm, remote_id, addr).await {
                log::warn!("failed to connect to peer {}: {}", remote_id, err);
            }
        });
    }

    Ok(())
}

async fn accept_loop(swarm: Swarm, listener: TcpListener) {
    loop {
        match listener.accept().await {
            Ok((socket, addr)) => {
                log::debug!("accepted connection from {}", addr);
                let swarm = swarm.clone();
                tokio::spawn(async move {
                    if let Err(err) = accept_inbound(swarm, socket).await {
                        log::warn!("inbound link from {} closed with error: {}", addr, err);
                    }
                });
            }
            Err(err) => {
                log::error!("accept failed: {}", err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conf::RosterEntry;
    use crate::eventlog::EventLog;
    use crate::piece_store::PieceStore;
    use crate::registry::Registry;
    use crate::Bitfield;

    fn roster(entries: Vec<RosterEntry>) -> Roster {
        // `Roster` has no public constructor besides `from_file`, so tests
        // build one through a temp file instead of reaching into private
        // fields.
        let dir = std::env::temp_dir().join("swarmshare-bootstrap-roster");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("{}.cfg", std::process::id()));
        let contents = entries
            .iter()
            .map(|e| {
                format!(
                    "{} {} {} {}\n",
                    e.peer_id,
                    e.host,
                    e.port,
                    if e.has_whole_file_initially { 1 } else { 0 }
                )
            })
            .collect::<String>();
        std::fs::write(&path, contents).unwrap();
        Roster::from_file(&path).unwrap()
    }

    async fn test_swarm(local_id: PeerId, dir_tag: &str) -> Swarm {
        let dir = std::env::temp_dir().join(format!("swarmshare-bootstrap-{}-{}", dir_tag, local_id));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let piece_store = PieceStore::new_empty(&dir, "file.bin", 2, 16, 32).unwrap();
        let eventlog = EventLog::new(dir.join("logs"), local_id).unwrap();
        Swarm::new(local_id, 2, 1, Bitfield::new(2), piece_store, Registry::new(), eventlog)
    }

    // Exercises the listener half of bootstrap: a higher-id peer with no
    // dial targets should still bind and accept a manually-dialed
    // connection.
    #[tokio::test]
    async fn run_binds_listener_for_local_entry() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener); // free the port for `run` to rebind

        let swarm = test_swarm(1002, "listen").await;
        let r = roster(vec![RosterEntry {
            peer_id: 1002,
            host: addr.ip().to_string(),
            port: addr.port(),
            has_whole_file_initially: false,
        }]);

        run(swarm, &r).await.unwrap();

        // give the spawned accept task a moment to actually bind before a
        // peer dials in
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let connect_result = tokio::net::TcpStream::connect(addr).await;
        assert!(connect_result.is_ok());
    }

    #[tokio::test]
    async fn run_errors_when_local_id_not_in_roster() {
        let swarm = test_swarm(9999, "missing").await;
        let r = roster(vec![RosterEntry {
            peer_id: 1,
            host: "127.0.0.1".into(),
            port: 6001,
            has_whole_file_initially: true,
        }]);
        assert!(matches!(
            run(swarm, &r).await,
            Err(crate::Error::UnknownPeer(9999))
        ));
    }
}
