//! A reference, in-memory [`Pio`] implementation.
//!
//! `pio` is specified as an external collaborator (spec §6) — callers are
//! expected to bring their own block-granular storage (a raw file, an
//! encrypted volume, a remote object). This module ships the one
//! implementation simple enough to be part of the crate itself: a
//! `HashMap`-backed store with a CSPRNG-backed `genseed`. It plays the role
//! the teacher crate gives its companion `index-access-memory` backend —
//! bundled as a single module here rather than a separate workspace crate,
//! since this crate has no workspace to put one in.

use std::collections::HashMap;

use rand_chacha::ChaCha20Rng;
use rand_core::{OsRng, RngCore, SeedableRng};

use crate::error::Result;
use crate::pio::Pio;

/// An in-memory [`Pio`] backed by a `HashMap<u32, Vec<u8>>`, suitable for
/// tests and for callers that only need the device to outlive one process.
///
/// `genseed` draws from a [`ChaCha20Rng`] reseeded from the operating
/// system's CSPRNG at construction (see [`MemoryPio::default`]) or, for
/// reproducible tests, from an explicit seed via [`MemoryPio::seeded`].
pub struct MemoryPio {
    blocks: HashMap<u32, Vec<u8>>,
    rng: ChaCha20Rng,
}

impl std::fmt::Debug for MemoryPio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryPio")
            .field("blocks", &self.blocks.len())
            .finish_non_exhaustive()
    }
}

impl Default for MemoryPio {
    /// A fresh, empty store whose `genseed` is rooted in the operating
    /// system's randomness source.
    fn default() -> Self {
        let rng = ChaCha20Rng::from_rng(OsRng).expect("operating system RNG is unavailable");
        Self {
            blocks: HashMap::new(),
            rng,
        }
    }
}

impl MemoryPio {
    /// A fresh, empty store, for convenience identical to [`MemoryPio::default`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh, empty store whose `genseed` is deterministic given `seed` —
    /// for reproducible tests, never for production key material.
    #[must_use]
    pub fn seeded(seed: [u8; 32]) -> Self {
        Self {
            blocks: HashMap::new(),
            rng: ChaCha20Rng::from_seed(seed),
        }
    }

    /// Number of physical blocks currently resident in the store.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Flip one bit of the raw, on-disk ciphertext at `phy`, simulating
    /// tamper by an untrusted backing store (spec §8 scenario 4/5). Panics
    /// if `phy` was never written, since tampering with an absent block
    /// isn't a meaningful test action.
    pub fn corrupt(&mut self, phy: u32, byte_offset: usize) {
        let block = self.blocks.get_mut(&phy).expect("cannot corrupt a block that was never written");
        block[byte_offset] ^= 0xFF;
    }

    /// Replace the raw bytes at `phy` outright — used to simulate a
    /// rollback attack by restoring an earlier snapshot of a block (spec §8
    /// scenario 5).
    pub fn replace_block(&mut self, phy: u32, bytes: Vec<u8>) {
        self.blocks.insert(phy, bytes);
    }

    /// A snapshot of the raw bytes at `phy`, for saving aside before a
    /// later write so a test can roll it back.
    #[must_use]
    pub fn snapshot(&self, phy: u32) -> Option<Vec<u8>> {
        self.blocks.get(&phy).cloned()
    }
}

impl Pio for MemoryPio {
    fn read(&mut self, phy_index: u32, _block_size: u32) -> Result<Option<Vec<u8>>> {
        Ok(self.blocks.get(&phy_index).cloned())
    }

    fn write(&mut self, phy_index: u32, data: &[u8]) -> Result<()> {
        self.blocks.insert(phy_index, data.to_vec());
        Ok(())
    }

    fn genseed(&mut self, out: &mut [u8]) -> Result<()> {
        self.rng.fill_bytes(out);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_of_unwritten_block_is_none() {
        let mut pio = MemoryPio::seeded([0u8; 32]);
        assert!(pio.read(5, 4096).unwrap().is_none());
    }

    #[test]
    fn write_then_read_round_trips() {
        let mut pio = MemoryPio::seeded([1u8; 32]);
        pio.write(3, &[9, 9, 9]).unwrap();
        assert_eq!(pio.read(3, 4096).unwrap(), Some(vec![9, 9, 9]));
    }

    #[test]
    fn seeded_genseed_is_deterministic() {
        let mut a = MemoryPio::seeded([7u8; 32]);
        let mut b = MemoryPio::seeded([7u8; 32]);
        let mut out_a = [0u8; 32];
        let mut out_b = [0u8; 32];
        a.genseed(&mut out_a).unwrap();
        b.genseed(&mut out_b).unwrap();
        assert_eq!(out_a, out_b);
    }

    #[test]
    fn corrupt_flips_a_written_byte() {
        let mut pio = MemoryPio::seeded([2u8; 32]);
        pio.write(1, &[0x00, 0x00]).unwrap();
        pio.corrupt(1, 0);
        assert_eq!(pio.read(1, 4096).unwrap().unwrap()[0], 0xFF);
    }
}
