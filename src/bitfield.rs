//! Dense bit vector of piece possession (C1 in the design).
//!
//! Wire form is big-endian packed, most-significant bit first, with the
//! final byte zero-padded; logically it represents exactly `num_pieces`
//! bits, but its encoded length is always `ceil(num_pieces / 8)` bytes.

use bitvec::prelude::{bitvec, BitVec, Msb0};

use crate::error::{Error, Result};
use crate::PieceIndex;

/// A peer's record of which pieces of the shared file it possesses.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bitfield {
    bits: BitVec<Msb0, u8>,
}

impl Bitfield {
    /// Creates an all-zero bitfield for `num_pieces` pieces.
    pub fn new(num_pieces: usize) -> Self {
        Self {
            bits: bitvec![Msb0, u8; 0; num_pieces],
        }
    }

    /// The number of pieces this bitfield tracks.
    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Marks piece `index` as possessed.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range; callers must validate indices
    /// coming off the wire with [`Self::check_index`] first.
    pub fn set(&mut self, index: PieceIndex) {
        self.bits.set(index, true);
    }

    /// Returns whether piece `index` is possessed.
    pub fn get(&self, index: PieceIndex) -> bool {
        *self.bits.get(index).expect("piece index out of range")
    }

    /// Returns `Ok(())` if `index` is a valid piece index for this bitfield,
    /// otherwise `Err(Error::InvalidPieceIndex)`.
    pub fn check_index(&self, index: PieceIndex) -> Result<()> {
        if index < self.bits.len() {
            Ok(())
        } else {
            Err(Error::InvalidPieceIndex(index))
        }
    }

    /// The number of pieces currently possessed.
    pub fn count_set(&self) -> usize {
        self.bits.count_ones()
    }

    /// True iff every piece is possessed (and there is at least one piece).
    pub fn all_set(&self) -> bool {
        !self.bits.is_empty() && self.bits.all()
    }

    /// Sets every bit, used to seed a seeder's initial bitfield.
    pub fn set_all(&mut self) {
        self.bits.set_all(true);
    }

    /// Returns the indices of pieces present in `self` but not in `other`.
    ///
    /// Used by the request selector to find pieces a peer has that we lack.
    pub fn indices_missing_from(&self, other: &Bitfield) -> Vec<PieceIndex> {
        debug_assert_eq!(self.len(), other.len());
        (0..self.len())
            .filter(|&i| self.get(i) && !other.get(i))
            .collect()
    }

    /// Encodes the bitfield into its packed MSB-first wire form, zero-padding
    /// the final byte.
    pub fn encode(&self) -> Vec<u8> {
        // The backing storage is never touched past `len()` bits (we only
        // ever go through `set`/`new`), so the padding bits in the final byte
        // are already zero.
        self.bits.clone().into_vec()
    }

    /// Decodes a packed MSB-first bitfield for exactly `num_pieces` logical
    /// bits.
    ///
    /// Fails with [`Error::MalformedBitfield`] if `bytes.len()` is not
    /// exactly `ceil(num_pieces / 8)`. Trailing padding bits beyond
    /// `num_pieces` are ignored (simply not exposed via [`Self::get`]).
    pub fn decode(bytes: &[u8], num_pieces: usize) -> Result<Self> {
        let expected = (num_pieces + 7) / 8;
        if bytes.len() != expected {
            return Err(Error::MalformedBitfield {
                expected,
                actual: bytes.len(),
            });
        }
        let mut bits: BitVec<Msb0, u8> = BitVec::from_vec(bytes.to_vec());
        bits.truncate(num_pieces);
        Ok(Self { bits })
    }
}
