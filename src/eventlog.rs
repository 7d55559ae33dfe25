//! EventLog (C10): the append-only, per-peer audit trail with the literal
//! line templates required by the external interface spec. This is
//! deliberately separate from the ambient `log` facade diagnostics the rest
//! of the engine emits for operational visibility — those go through
//! whatever backend the binary installs (see `main.rs`), while this sink's
//! exact text is a correctness-relevant artifact that test scripts parse.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Local;

use crate::error::{Error, Result};
use crate::PeerId;

/// Appends timestamped lines to `logs/log_peer_<id>.log`.
pub struct EventLog {
    file: Mutex<File>,
}

impl EventLog {
    pub fn new(logs_dir: impl AsRef<Path>, local_id: PeerId) -> Result<Self> {
        let logs_dir = logs_dir.as_ref();
        std::fs::create_dir_all(logs_dir).map_err(Error::Io)?;
        let path: PathBuf =
            logs_dir.join(format!("log_peer_{}.log", local_id));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(Error::Io)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    /// Appends one line, flushing immediately: log lines are the audit trail
    /// the test harness checks, not a throughput-sensitive path.
    pub fn log(&self, message: impl AsRef<str>) {
        let line = format!(
            "[{}]: {}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            message.as_ref()
        );
        let mut file = self.file.lock().unwrap();
        if let Err(err) = file.write_all(line.as_bytes()).and_then(|_| file.flush()) {
            log::error!("failed to write event log line: {}", err);
        }
    }

    pub fn makes_connection_to(&self, local: PeerId, other: PeerId) {
        self.log(format!("Peer {} makes a connection to Peer {}", local, other));
    }

    pub fn connected_from(&self, local: PeerId, other: PeerId) {
        self.log(format!("Peer {} is connected from Peer {}", local, other));
    }

    pub fn preferred_neighbors(&self, local: PeerId, ids: &[PeerId]) {
        let list = ids
            .iter()
            .map(PeerId::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        self.log(format!(
            "Peer {} has the preferred neighbors [{}]",
            local, list
        ));
    }

    pub fn optimistic_neighbor(&self, local: PeerId, id: PeerId) {
        self.log(format!(
            "Peer {} has the optimistically unchoked neighbor {}",
            local, id
        ));
    }

    pub fn unchoked_by(&self, local: PeerId, other: PeerId) {
        self.log(format!("Peer {} is unchoked by Peer {}", local, other));
    }

    pub fn choked_by(&self, local: PeerId, other: PeerId) {
        self.log(format!("Peer {} is choked by Peer {}", local, other));
    }

    pub fn received_interested(&self, local: PeerId, other: PeerId) {
        self.log(format!(
            "Peer {} received the 'interested' message from Peer {}",
            local, other
        ));
    }

    pub fn received_not_interested(&self, local: PeerId, other: PeerId) {
        self.log(format!(
            "Peer {} received the 'not interested' message from Peer {}",
            local, other
        ));
    }

    pub fn received_have(&self, local: PeerId, other: PeerId, index: usize) {
        self.log(format!(
            "Peer {} received the 'have' message from Peer {} for the piece {}",
            local, other, index
        ));
    }

    pub fn downloaded_piece(
        &self,
        local: PeerId,
        other: PeerId,
        index: usize,
        num_pieces_now: usize,
    ) {
        self.log(format!(
            "Peer {} has downloaded the piece {} from Peer {}. Now the number of pieces it has is {}",
            local, index, other, num_pieces_now
        ));
    }

    pub fn downloaded_complete_file(&self, local: PeerId) {
        self.log(format!("Peer {} has downloaded the complete file.", local));
    }
}
