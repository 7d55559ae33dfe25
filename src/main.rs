//! Process entry point (the external-collaborator half of C8): parses the
//! single required CLI argument, reads the two config files, stands up the
//! piece store and event log for this peer, and then hands off to
//! `bootstrap::run` and the choke controller until the swarm terminates.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use swarmshare::conf::{Conf, Roster};
use swarmshare::{bootstrap, choke, eventlog::EventLog, piece_store::PieceStore, registry::Registry, swarm::Swarm, termination, Bitfield, PeerId};

/// A cooperating swarm peer that exchanges fixed-size pieces of a
/// known-size payload with the rest of its roster.
#[derive(Parser, Debug)]
#[command(name = "swarmshare")]
struct Cli {
    /// This process's peer id, as it appears in PeerInfo.cfg.
    peer_id: PeerId,

    /// Directory to read Common.cfg and PeerInfo.cfg from, and under which
    /// peer_<id>/ and logs/ are created.
    #[arg(long, default_value = ".")]
    working_dir: PathBuf,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(err) => {
            eprintln!("failed to start async runtime: {}", err);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("peer failed to start: {}", err);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> swarmshare::Result<()> {
    let conf = Conf::from_file(cli.working_dir.join("Common.cfg"))?;
    let roster = Roster::from_file(cli.working_dir.join("PeerInfo.cfg"))?;
    let local_entry = roster.get(cli.peer_id)?.clone();

    let num_pieces = conf.num_pieces();
    let peer_dir = cli.working_dir.join(format!("peer_{}", cli.peer_id));
    std::fs::create_dir_all(&peer_dir).map_err(swarmshare::Error::Io)?;

    let piece_store = if local_entry.has_whole_file_initially {
        PieceStore::new_from_whole_file(
            &peer_dir,
            &conf.file_name,
            num_pieces,
            conf.piece_size,
            conf.file_size,
        )?
    } else {
        PieceStore::new_empty(
            &peer_dir,
            &conf.file_name,
            num_pieces,
            conf.piece_size,
            conf.file_size,
        )?
    };

    let local_bitfield = if local_entry.has_whole_file_initially {
        let mut bf = Bitfield::new(num_pieces);
        bf.set_all();
        bf
    } else {
        Bitfield::new(num_pieces)
    };

    let eventlog = EventLog::new(cli.working_dir.join("logs"), cli.peer_id)?;

    let swarm = Swarm::new(
        cli.peer_id,
        num_pieces,
        conf.num_preferred_neighbors,
        local_bitfield,
        piece_store,
        Registry::new(),
        eventlog,
    );

    bootstrap::run(swarm.clone(), &roster).await?;

    let controller = Arc::new(choke::ChokeController::new(
        swarm.clone(),
        Duration::from_secs(conf.unchoking_interval_secs),
        Duration::from_secs(conf.optimistic_unchoking_interval_secs),
    ));
    controller.spawn();

    termination::wait_for_completion(swarm).await;
    Ok(())
}
