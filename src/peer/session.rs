//! The peer link's connect/accept lifecycle and its read loop (C4), together
//! with the per-message handling that drives state transitions (C5). Kept
//! in one file, following the teacher's own peer session module, since the
//! two are tightly coupled: the read loop is what calls into message
//! handling on every frame.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use futures::{select, SinkExt, StreamExt};
use rand::seq::SliceRandom;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::codec::{Framed, FramedParts};

use super::{Command, CommandReceiver, LinkHandle, LinkState};
use crate::error::{Error, Result};
use crate::swarm::Swarm;
use crate::wire::{Handshake, HandshakeCodec, Message, PeerCodec, RawFrame};
use crate::{Bitfield, PeerId};

type LinkSink =
    futures::stream::SplitSink<Framed<TcpStream, PeerCodec>, RawFrame>;

/// Dials `addr`, expecting to hand-shake with `expected_remote_id`, and runs
/// the link until it closes. Returns once the link has been torn down and
/// deregistered.
pub async fn connect_outbound(
    swarm: Swarm,
    expected_remote_id: PeerId,
    addr: SocketAddr,
) -> Result<()> {
    let socket = TcpStream::connect(addr).await.map_err(Error::Socket)?;
    let mut handshake_io = Framed::new(socket, HandshakeCodec);

    handshake_io.send(Handshake::new(swarm.local_id)).await?;
    let peer_handshake = handshake_io.next().await.ok_or(Error::BadHandshake)??;
    if peer_handshake.peer_id != expected_remote_id {
        return Err(Error::BadHandshake);
    }

    swarm
        .eventlog
        .makes_connection_to(swarm.local_id, expected_remote_id);
    run_link(swarm, expected_remote_id, handshake_io).await
}

/// Completes the inbound side of a handshake on an already-accepted socket
/// and runs the link until it closes.
pub async fn accept_inbound(swarm: Swarm, socket: TcpStream) -> Result<()> {
    let mut handshake_io = Framed::new(socket, HandshakeCodec);

    let peer_handshake = handshake_io.next().await.ok_or(Error::BadHandshake)??;
    let remote_id = peer_handshake.peer_id;
    handshake_io.send(Handshake::new(swarm.local_id)).await?;

    swarm.eventlog.connected_from(swarm.local_id, remote_id);
    run_link(swarm, remote_id, handshake_io).await
}

async fn run_link(
    swarm: Swarm,
    remote_id: PeerId,
    handshake_io: Framed<TcpStream, HandshakeCodec>,
) -> Result<()> {
    // switch codecs, carrying over whatever the peer may already have sent
    // right after its handshake
    let old_parts = handshake_io.into_parts();
    let mut new_parts = FramedParts::new(old_parts.io, PeerCodec);
    new_parts.read_buf = old_parts.read_buf;
    new_parts.write_buf = old_parts.write_buf;
    let framed = Framed::from_parts(new_parts);

    let state = Arc::new(Mutex::new(LinkState::new(swarm.num_pieces)));
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let handle = LinkHandle {
        remote_id,
        state: state.clone(),
        commands: cmd_tx,
    };
    swarm.registry.register(handle)?;

    let result = drive_link(&swarm, remote_id, &state, cmd_rx, framed).await;
    swarm.registry.deregister(remote_id);
    if let Err(ref err) = result {
        log::warn!("peer {} link closed with error: {}", remote_id, err);
    } else {
        log::info!("peer {} link closed", remote_id);
    }
    result
}

async fn drive_link(
    swarm: &Swarm,
    remote_id: PeerId,
    state: &Arc<Mutex<LinkState>>,
    cmd_rx: CommandReceiver,
    framed: Framed<TcpStream, PeerCodec>,
) -> Result<()> {
    let (mut sink, stream) = framed.split();
    let mut stream = stream.fuse();
    let mut cmds = UnboundedReceiverStream::new(cmd_rx).fuse();

    // a link always announces its own pieces right after the handshake
    let own_bitfield = swarm.local_bitfield.lock().await.clone();
    sink.send(Message::Bitfield(Bytes::from(own_bitfield.encode())).into_raw())
        .await?;

    loop {
        select! {
            frame = stream.next() => {
                match frame {
                    Some(Ok(raw)) => match Message::decode(raw) {
                        Ok(msg) => {
                            log::debug!("peer {} -> {:?}", remote_id, msg.id());
                            handle_message(swarm, remote_id, state, &mut sink, msg).await?;
                        }
                        Err(err @ Error::UnknownMessageType(_))
                        | Err(err @ Error::MalformedPayload { .. }) => {
                            log::warn!("peer {} sent a malformed frame: {}", remote_id, err);
                        }
                        Err(err) => return Err(err),
                    },
                    Some(Err(err)) => return Err(err),
                    None => {
                        log::info!("peer {} closed the connection", remote_id);
                        break;
                    }
                }
            }
            cmd = cmds.next() => {
                match cmd {
                    Some(Command::SendChoke) => {
                        sink.send(Message::Choke.into_raw()).await?;
                        state.lock().await.am_choking = true;
                    }
                    Some(Command::SendUnchoke) => {
                        sink.send(Message::Unchoke.into_raw()).await?;
                        state.lock().await.am_choking = false;
                    }
                    Some(Command::SendHave(index)) => {
                        sink.send(Message::Have(index as u32).into_raw()).await?;
                    }
                    Some(Command::Shutdown) | None => break,
                }
            }
        }
    }

    Ok(())
}

async fn handle_message(
    swarm: &Swarm,
    remote_id: PeerId,
    state: &Arc<Mutex<LinkState>>,
    sink: &mut LinkSink,
    msg: Message,
) -> Result<()> {
    match msg {
        Message::Choke => {
            let mut s = state.lock().await;
            s.peer_choking = true;
            s.pending_request = None;
            drop(s);
            swarm.eventlog.choked_by(swarm.local_id, remote_id);
        }
        Message::Unchoke => {
            {
                let mut s = state.lock().await;
                s.peer_choking = false;
            }
            swarm.eventlog.unchoked_by(swarm.local_id, remote_id);
            attempt_request(swarm, state, sink).await?;
        }
        Message::Interested => {
            state.lock().await.peer_interested = true;
            swarm
                .eventlog
                .received_interested(swarm.local_id, remote_id);
        }
        Message::NotInterested => {
            state.lock().await.peer_interested = false;
            swarm
                .eventlog
                .received_not_interested(swarm.local_id, remote_id);
        }
        Message::Have(index) => {
            let index = index as usize;
            if index >= swarm.num_pieces {
                log::warn!(
                    "peer {} sent have for out-of-range index {}",
                    remote_id,
                    index
                );
                return Ok(());
            }
            swarm
                .eventlog
                .received_have(swarm.local_id, remote_id, index);

            let mut s = state.lock().await;
            // treat repeated `have`s as the idempotent set operation the
            // ordering guarantees require: only a genuine 0->1 transition
            // triggers a recompute
            if !s.peer_bitfield.get(index) {
                s.peer_bitfield.set(index);
                if s.peer_bitfield.all_set() {
                    s.has_complete_file = true;
                }
                update_interest_on_change(swarm, &mut s, sink).await?;
            }
        }
        Message::Bitfield(bytes) => {
            let bf = match Bitfield::decode(&bytes, swarm.num_pieces) {
                Ok(bf) => bf,
                Err(err) => {
                    log::warn!(
                        "peer {} sent a malformed bitfield: {}",
                        remote_id,
                        err
                    );
                    return Ok(());
                }
            };
            let mut s = state.lock().await;
            s.peer_bitfield = bf;
            if s.peer_bitfield.all_set() {
                s.has_complete_file = true;
            }
            announce_interest(swarm, &mut s, sink).await?;
        }
        Message::Request(index) => {
            let index = index as usize;
            if index >= swarm.num_pieces {
                log::warn!(
                    "peer {} requested out-of-range index {}",
                    remote_id,
                    index
                );
                return Ok(());
            }
            let am_choking = state.lock().await.am_choking;
            if am_choking {
                log::trace!(
                    "dropping request for piece {} from peer {} while choking",
                    index,
                    remote_id
                );
                return Ok(());
            }
            if !swarm.piece_store.has(index).await {
                log::trace!(
                    "dropping request for piece {} from peer {}: not held locally",
                    index,
                    remote_id
                );
                return Ok(());
            }
            match swarm.piece_store.get(index).await {
                Ok(data) => {
                    sink.send(
                        Message::Piece {
                            index: index as u32,
                            data,
                        }
                        .into_raw(),
                    )
                    .await?;
                }
                Err(err) => {
                    log::warn!(
                        "failed to read piece {} to serve peer {}: {}",
                        index,
                        remote_id,
                        err
                    );
                }
            }
        }
        Message::Piece { index, data } => {
            let index = index as usize;
            if index >= swarm.num_pieces {
                log::warn!(
                    "peer {} sent piece with out-of-range index {}",
                    remote_id,
                    index
                );
                return Ok(());
            }
            let len = data.len() as u64;
            match swarm.piece_store.put(index, data).await {
                Ok(()) => {
                    let count_now = {
                        let mut local = swarm.local_bitfield.lock().await;
                        local.set(index);
                        local.count_set()
                    };

                    {
                        let mut s = state.lock().await;
                        s.bytes_in_interval += len;
                        s.pending_request = None;
                    }

                    swarm.eventlog.downloaded_piece(
                        swarm.local_id,
                        remote_id,
                        index,
                        count_now,
                    );
                    swarm.registry.broadcast_have(index, remote_id);

                    if swarm.piece_store.complete().await {
                        match swarm.piece_store.assemble().await {
                            Ok(()) => swarm
                                .eventlog
                                .downloaded_complete_file(swarm.local_id),
                            Err(err) => log::error!(
                                "failed to assemble completed file: {}",
                                err
                            ),
                        }
                    }

                    attempt_request(swarm, state, sink).await?;
                }
                Err(err) => {
                    log::warn!(
                        "failed to write piece {} from peer {}: {}",
                        index,
                        remote_id,
                        err
                    );
                    state.lock().await.pending_request = None;
                }
            }
        }
    }
    Ok(())
}

/// Unconditionally announces interest (or its absence) right after
/// processing a `bitfield` message, regardless of whether this differs from
/// the (default) prior state.
async fn announce_interest(
    swarm: &Swarm,
    state: &mut LinkState,
    sink: &mut LinkSink,
) -> Result<()> {
    let wants = wants_anything(swarm, state).await;
    if wants {
        sink.send(Message::Interested.into_raw()).await?;
    } else {
        sink.send(Message::NotInterested.into_raw()).await?;
    }
    state.am_interested = wants;
    Ok(())
}

/// Sends `interested`/`not interested` only when the desired state differs
/// from the current one, used after a genuine `have` transition.
async fn update_interest_on_change(
    swarm: &Swarm,
    state: &mut LinkState,
    sink: &mut LinkSink,
) -> Result<()> {
    let wants = wants_anything(swarm, state).await;
    if wants && !state.am_interested {
        sink.send(Message::Interested.into_raw()).await?;
        state.am_interested = true;
    } else if !wants && state.am_interested {
        sink.send(Message::NotInterested.into_raw()).await?;
        state.am_interested = false;
    }
    Ok(())
}

async fn wants_anything(swarm: &Swarm, state: &LinkState) -> bool {
    let local = swarm.local_bitfield.lock().await;
    (0..swarm.num_pieces).any(|i| state.peer_bitfield.get(i) && !local.get(i))
}

/// Requests one piece if we're not choked, don't already have a request in
/// flight, and there's a candidate this peer has that we lack and that
/// isn't already pending on some other link. Falls back to announcing
/// disinterest if nothing qualifies.
async fn attempt_request(
    swarm: &Swarm,
    state: &Arc<Mutex<LinkState>>,
    sink: &mut LinkSink,
) -> Result<()> {
    let (peer_choking, already_pending, peer_bitfield) = {
        let s = state.lock().await;
        (s.peer_choking, s.pending_request.is_some(), s.peer_bitfield.clone())
    };
    if peer_choking || already_pending {
        return Ok(());
    }

    let local = swarm.local_bitfield.lock().await.clone();
    let pending_elsewhere = swarm.registry.pending_indices().await;

    let candidates: Vec<_> = (0..swarm.num_pieces)
        .filter(|&i| {
            peer_bitfield.get(i) && !local.get(i) && !pending_elsewhere.contains(&i)
        })
        .collect();
    let candidate = candidates.choose(&mut rand::thread_rng()).copied();

    match candidate {
        Some(index) => {
            state.lock().await.pending_request = Some(index);
            sink.send(Message::Request(index as u32).into_raw()).await?;
        }
        None => {
            let mut s = state.lock().await;
            if s.am_interested {
                s.am_interested = false;
                drop(s);
                sink.send(Message::NotInterested.into_raw()).await?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eventlog::EventLog;
    use crate::piece_store::PieceStore;
    use crate::registry::Registry;
    use std::time::Duration;
    use tokio::net::{TcpListener, TcpStream};
    use tokio::time::timeout;

    const FAKE_PEER_ID: PeerId = 99;

    /// A hand-driven stand-in for a remote peer: completes the inbound half
    /// of the handshake against a real `PeerLink` server and then lets the
    /// test read/write typed frames directly, without a second `PeerLink` on
    /// the other end.
    async fn fake_peer_connect(addr: SocketAddr) -> Framed<TcpStream, PeerCodec> {
        let socket = TcpStream::connect(addr).await.unwrap();
        let mut handshake_io = Framed::new(socket, HandshakeCodec);
        handshake_io.send(Handshake::new(FAKE_PEER_ID)).await.unwrap();
        let _server_handshake = handshake_io.next().await.unwrap().unwrap();

        let old_parts = handshake_io.into_parts();
        let mut new_parts = FramedParts::new(old_parts.io, PeerCodec);
        new_parts.read_buf = old_parts.read_buf;
        new_parts.write_buf = old_parts.write_buf;
        Framed::from_parts(new_parts)
    }

    async fn recv_message(conn: &mut Framed<TcpStream, PeerCodec>) -> Message {
        let raw = timeout(Duration::from_millis(500), conn.next())
            .await
            .expect("expected a message but none arrived")
            .unwrap()
            .unwrap();
        Message::decode(raw).unwrap()
    }

    /// Asserts that the server sends nothing further within the timeout,
    /// i.e. the scenario being tested really is a no-op on the wire.
    async fn assert_no_message(conn: &mut Framed<TcpStream, PeerCodec>) {
        let result = timeout(Duration::from_millis(200), conn.next()).await;
        assert!(result.is_err(), "expected no message, but one arrived");
    }

    async fn spawn_server(swarm: Swarm) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let _ = accept_inbound(swarm, socket).await;
        });
        addr
    }

    async fn test_swarm(local_id: PeerId, num_pieces: usize, dir_tag: &str) -> Swarm {
        let dir = std::env::temp_dir().join(format!("swarmshare-session-{}-{}", dir_tag, local_id));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let piece_store =
            PieceStore::new_empty(&dir, "file.bin", num_pieces, 16, 16 * num_pieces as u64)
                .unwrap();
        let eventlog = EventLog::new(dir.join("logs"), local_id).unwrap();
        Swarm::new(
            local_id,
            num_pieces,
            0,
            Bitfield::new(num_pieces),
            piece_store,
            Registry::new(),
            eventlog,
        )
    }

    // S2-shaped: two peers complete a handshake over a real loopback socket
    // and each ends up registered under the other's id.
    #[tokio::test]
    async fn handshake_registers_both_sides() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server_swarm = test_swarm(1, 4, "server").await;
        let client_swarm = test_swarm(2, 4, "client").await;
        let server_registry = server_swarm.registry.clone();
        let client_registry = client_swarm.registry.clone();

        let server_task = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let _ = accept_inbound(server_swarm, socket).await;
        });
        let client_task = tokio::spawn(async move {
            let _ = connect_outbound(client_swarm, 1, addr).await;
        });

        // give both sides a moment to register before checking, then ask
        // them to shut down
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(server_registry.len(), 1);
        assert_eq!(client_registry.len(), 1);

        for handle in server_registry.snapshot() {
            handle.send(Command::Shutdown);
        }
        for handle in client_registry.snapshot() {
            handle.send(Command::Shutdown);
        }
        let _ = tokio::join!(server_task, client_task);
    }

    // S3: local all-zero over n=4. An all-zero `bitfield` from the remote
    // draws `not interested`; `have(2)` then draws `interested`; once the
    // local side acquires piece 2 itself, a repeated `have(2)` changes
    // nothing, and a `have(0)` (still lacked locally) changes nothing either
    // because we're already interested.
    #[tokio::test]
    async fn s3_interest_recomputation_follows_have_transitions() {
        let swarm = test_swarm(1, 4, "s3").await;
        let addr = spawn_server(swarm.clone()).await;
        let mut fake = fake_peer_connect(addr).await;

        // the server's own (all-zero) bitfield, sent unconditionally right
        // after the handshake
        let _ = recv_message(&mut fake).await;

        fake.send(Message::Bitfield(Bytes::from(vec![0x00])).into_raw())
            .await
            .unwrap();
        assert_eq!(recv_message(&mut fake).await, Message::NotInterested);

        fake.send(Message::Have(2).into_raw()).await.unwrap();
        assert_eq!(recv_message(&mut fake).await, Message::Interested);

        swarm.local_bitfield.lock().await.set(2);

        fake.send(Message::Have(2).into_raw()).await.unwrap();
        assert_no_message(&mut fake).await;

        fake.send(Message::Have(0).into_raw()).await.unwrap();
        assert_no_message(&mut fake).await;
    }

    // S4: a choke clears the link's pending request, and no further
    // `request` is sent until the next `unchoke`.
    #[tokio::test]
    async fn s4_choke_clears_pending_request() {
        let swarm = test_swarm(1, 4, "s4").await;
        let addr = spawn_server(swarm.clone()).await;
        let mut fake = fake_peer_connect(addr).await;

        let _ = recv_message(&mut fake).await; // server's initial bitfield

        // tell the server we hold piece 0, which it lacks
        let mut bf = Bitfield::new(4);
        bf.set(0);
        fake.send(Message::Bitfield(Bytes::from(bf.encode())).into_raw())
            .await
            .unwrap();
        assert_eq!(recv_message(&mut fake).await, Message::Interested);

        fake.send(Message::Unchoke.into_raw()).await.unwrap();
        assert_eq!(recv_message(&mut fake).await, Message::Request(0));

        let remote_handle = swarm
            .registry
            .snapshot()
            .into_iter()
            .find(|h| h.remote_id == FAKE_PEER_ID)
            .expect("server should have registered the fake peer");
        assert_eq!(remote_handle.state.lock().await.pending_request, Some(0));

        fake.send(Message::Choke.into_raw()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(remote_handle.state.lock().await.pending_request, None);

        assert_no_message(&mut fake).await;
    }
}
