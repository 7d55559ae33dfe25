//! Configuration ingestion: reads the pair of text files the process entry
//! point is handed (`Common.cfg`, `PeerInfo.cfg`) into [`Conf`] and
//! [`Roster`]. This is the one "external collaborator" from §1 that still
//! lives in this crate rather than behind a trait, since the format is part
//! of the external interface (§6) and small enough not to warrant its own
//! abstraction boundary.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};
use crate::PeerId;

/// The swarm-wide configuration read from `Common.cfg`.
#[derive(Clone, Debug)]
pub struct Conf {
    pub num_preferred_neighbors: usize,
    pub unchoking_interval_secs: u64,
    pub optimistic_unchoking_interval_secs: u64,
    pub file_name: String,
    pub file_size: u64,
    pub piece_size: u64,
}

impl Conf {
    /// `numPieces = ceil(fileSize / pieceSize)` per the data model (§3).
    pub fn num_pieces(&self) -> usize {
        ((self.file_size + self.piece_size - 1) / self.piece_size) as usize
    }

    /// Parses `Common.cfg`'s `Key Value` lines, one per non-empty line,
    /// separator a single space. All keys are required.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|err| {
            Error::Config(format!("cannot read {}: {}", path.display(), err))
        })?;

        let mut fields: HashMap<&str, &str> = HashMap::new();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (key, value) = line.split_once(' ').ok_or_else(|| {
                Error::Config(format!("malformed config line: {:?}", line))
            })?;
            fields.insert(key, value.trim());
        }

        let required = |key: &'static str| -> Result<&str> {
            fields
                .get(key)
                .copied()
                .ok_or_else(|| Error::Config(format!("missing key {}", key)))
        };
        let required_int = |key: &'static str| -> Result<u64> {
            required(key)?
                .parse::<u64>()
                .map_err(|err| Error::Config(format!("bad integer for {}: {}", key, err)))
        };

        Ok(Self {
            num_preferred_neighbors: required_int("NumberOfPreferredNeighbors")? as usize,
            unchoking_interval_secs: required_int("UnchokingInterval")?,
            optimistic_unchoking_interval_secs: required_int(
                "OptimisticUnchokingInterval",
            )?,
            file_name: required("FileName")?.to_owned(),
            file_size: required_int("FileSize")?,
            piece_size: required_int("PieceSize")?,
        })
    }
}

/// One line of `PeerInfo.cfg`: `peerId host port hasFile`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RosterEntry {
    pub peer_id: PeerId,
    pub host: String,
    pub port: u16,
    pub has_whole_file_initially: bool,
}

/// The swarm-wide, identical roster every peer reads at startup.
#[derive(Clone, Debug)]
pub struct Roster {
    entries: Vec<RosterEntry>,
}

impl Roster {
    /// Parses `PeerInfo.cfg`: one whitespace-separated `peerId host port
    /// hasFile` line per peer, `hasFile` in `{0, 1}`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|err| {
            Error::Config(format!("cannot read {}: {}", path.display(), err))
        })?;

        let mut entries = Vec::new();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            let [peer_id, host, port, has_file] = <[&str; 4]>::try_from(fields)
                .map_err(|fields| {
                    Error::Config(format!(
                        "expected 4 fields in roster line, got {}: {:?}",
                        fields.len(),
                        line
                    ))
                })?;
            let peer_id: PeerId = peer_id.parse().map_err(|err| {
                Error::Config(format!("bad peer id {:?}: {}", peer_id, err))
            })?;
            let port: u16 = port.parse().map_err(|err| {
                Error::Config(format!("bad port {:?}: {}", port, err))
            })?;
            let has_file = match has_file {
                "0" => false,
                "1" => true,
                other => {
                    return Err(Error::Config(format!(
                        "hasFile must be 0 or 1, got {:?}",
                        other
                    )))
                }
            };
            entries.push(RosterEntry {
                peer_id,
                host: host.to_owned(),
                port,
                has_whole_file_initially: has_file,
            });
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[RosterEntry] {
        &self.entries
    }

    pub fn get(&self, id: PeerId) -> Result<&RosterEntry> {
        self.entries
            .iter()
            .find(|entry| entry.peer_id == id)
            .ok_or(Error::UnknownPeer(id))
    }

    /// Every peer whose id is lower than `local_id`: the ones the ordering
    /// rule in the data model says we dial rather than wait to accept from.
    pub fn dial_targets(&self, local_id: PeerId) -> impl Iterator<Item = &RosterEntry> {
        self.entries
            .iter()
            .filter(move |entry| entry.peer_id < local_id)
    }
}
