//! On-disk piece storage (C3): a blob store indexed by piece index, backed
//! by one file per piece under `peer_<id>/pieces/`. No hashing or integrity
//! verification is performed — the roster's fixed piece size is the only
//! invariant this component enforces.
//!
//! File I/O runs on `spawn_blocking` so a slow disk never stalls the async
//! reactor driving the peer links, the same reasoning the teacher codebase
//! applies to its own piece writes and hashing.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::sync::Mutex;
use tokio::task;

use crate::error::{Error, Result};
use crate::PieceIndex;

/// A blob store for the pieces of a single shared file.
#[derive(Debug)]
pub struct PieceStore {
    pieces_dir: PathBuf,
    assembled_path: PathBuf,
    num_pieces: usize,
    piece_size: u64,
    file_size: u64,
    present: Mutex<HashSet<PieceIndex>>,
}

impl PieceStore {
    /// Creates the store for a leecher: the `pieces/` directory is created
    /// empty and filled in as pieces arrive.
    pub fn new_empty(
        peer_dir: impl AsRef<Path>,
        file_name: &str,
        num_pieces: usize,
        piece_size: u64,
        file_size: u64,
    ) -> Result<Self> {
        let peer_dir = peer_dir.as_ref();
        let pieces_dir = peer_dir.join("pieces");
        fs::create_dir_all(&pieces_dir).map_err(Error::PieceStoreIo)?;
        Ok(Self {
            pieces_dir,
            assembled_path: peer_dir.join(file_name),
            num_pieces,
            piece_size,
            file_size,
            present: Mutex::new(HashSet::new()),
        })
    }

    /// Creates the store for a seeder: the whole file already sits at
    /// `peer_<id>/<file_name>` and is split up front into individual piece
    /// files, all marked present.
    pub fn new_from_whole_file(
        peer_dir: impl AsRef<Path>,
        file_name: &str,
        num_pieces: usize,
        piece_size: u64,
        file_size: u64,
    ) -> Result<Self> {
        let store = Self::new_empty(
            peer_dir.as_ref(),
            file_name,
            num_pieces,
            piece_size,
            file_size,
        )?;
        let whole = fs::read(peer_dir.as_ref().join(file_name))
            .map_err(Error::PieceStoreIo)?;
        for index in 0..num_pieces {
            let len = store.piece_len(index) as usize;
            let start = index * piece_size as usize;
            let slice = &whole[start..start + len];
            fs::write(store.piece_path(index), slice)
                .map_err(Error::PieceStoreIo)?;
        }
        store
            .present
            .try_lock()
            .expect("uncontended during construction")
            .extend(0..num_pieces);
        Ok(store)
    }

    fn piece_path(&self, index: PieceIndex) -> PathBuf {
        self.pieces_dir.join(format!("{}.dat", index))
    }

    /// The byte length of a given piece; the last piece is short if
    /// `file_size` isn't a multiple of `piece_size`.
    pub fn piece_len(&self, index: PieceIndex) -> u64 {
        if index + 1 == self.num_pieces {
            let remainder = self.file_size % self.piece_size;
            if remainder == 0 {
                self.piece_size
            } else {
                remainder
            }
        } else {
            self.piece_size
        }
    }

    pub fn num_pieces(&self) -> usize {
        self.num_pieces
    }

    pub async fn has(&self, index: PieceIndex) -> bool {
        self.present.lock().await.contains(&index)
    }

    pub async fn complete(&self) -> bool {
        self.present.lock().await.len() == self.num_pieces
    }

    /// Writes a piece's bytes to disk. Idempotent: writing the same index
    /// twice just overwrites the file.
    pub async fn put(&self, index: PieceIndex, data: Bytes) -> Result<()> {
        let path = self.piece_path(index);
        task::spawn_blocking(move || fs::write(path, &data))
            .await
            .expect("blocking piece write task panicked")
            .map_err(Error::PieceStoreIo)?;
        self.present.lock().await.insert(index);
        Ok(())
    }

    /// Reads a piece's bytes back off disk.
    pub async fn get(&self, index: PieceIndex) -> Result<Bytes> {
        let path = self.piece_path(index);
        let bytes = task::spawn_blocking(move || fs::read(path))
            .await
            .expect("blocking piece read task panicked")
            .map_err(Error::PieceStoreIo)?;
        Ok(Bytes::from(bytes))
    }

    /// Concatenates every piece, in index order, into the assembled file.
    /// Only meaningful once `complete()` is true.
    pub async fn assemble(&self) -> Result<()> {
        let pieces_dir = self.pieces_dir.clone();
        let assembled_path = self.assembled_path.clone();
        let num_pieces = self.num_pieces;
        task::spawn_blocking(move || -> io::Result<()> {
            let mut out = fs::File::create(&assembled_path)?;
            for index in 0..num_pieces {
                let mut piece =
                    fs::File::open(pieces_dir.join(format!("{}.dat", index)))?;
                io::copy(&mut piece, &mut out)?;
            }
            Ok(())
        })
        .await
        .expect("blocking assemble task panicked")
        .map_err(Error::PieceStoreIo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("swarmshare-test-{}", name));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn put_then_get_roundtrips() {
        let dir = tmp_dir("put-get");
        let store =
            PieceStore::new_empty(&dir, "file.bin", 3, 16, 40).unwrap();
        assert!(!store.has(0).await);
        store.put(0, Bytes::from_static(b"0123456789abcdef")).await.unwrap();
        assert!(store.has(0).await);
        let back = store.get(0).await.unwrap();
        assert_eq!(&back[..], b"0123456789abcdef");
    }

    #[tokio::test]
    async fn last_piece_is_short() {
        let dir = tmp_dir("short-last");
        let store =
            PieceStore::new_empty(&dir, "file.bin", 3, 16, 40).unwrap();
        assert_eq!(store.piece_len(0), 16);
        assert_eq!(store.piece_len(1), 16);
        assert_eq!(store.piece_len(2), 8);
    }

    #[tokio::test]
    async fn complete_once_every_piece_present() {
        let dir = tmp_dir("complete");
        let store =
            PieceStore::new_empty(&dir, "file.bin", 2, 16, 24).unwrap();
        assert!(!store.complete().await);
        store.put(0, Bytes::from_static(&[0u8; 16])).await.unwrap();
        assert!(!store.complete().await);
        store.put(1, Bytes::from_static(&[0u8; 8])).await.unwrap();
        assert!(store.complete().await);
    }

    #[tokio::test]
    async fn seeder_split_then_assemble_is_byte_identical() {
        let dir = tmp_dir("seed-assemble");
        let original: Vec<u8> = (0u8..40).collect();
        fs::write(dir.join("file.bin"), &original).unwrap();

        let store =
            PieceStore::new_from_whole_file(&dir, "file.bin", 3, 16, 40)
                .unwrap();
        assert!(store.complete().await);

        fs::remove_file(dir.join("file.bin")).unwrap();
        store.assemble().await.unwrap();
        let reassembled = fs::read(dir.join("file.bin")).unwrap();
        assert_eq!(reassembled, original);
    }
}
