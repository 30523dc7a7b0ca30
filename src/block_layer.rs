//! Block layer (component C6): orchestrates C1 (crypto), C2 (address
//! calculus), C3 (Merkle tree), and C5 (cache) into the read/write/verify
//! state machine. Holds no state of its own beyond its collaborators and a
//! small side table of per-block counters; the cache, the Merkle tree, and
//! the caller-owned `pio` carry all the mutable state.
//!
//! On-disk framing differs by block kind. A data block's authentication tag
//! is stored in its parent management record (spec §3), so a data block's
//! ciphertext occupies the full physical block with no inline tag. A
//! management block has no parent to hold its own tag, so its ciphertext is
//! followed inline by its tag and zero-padded to the block size — which is
//! exactly why [`Params::fan_out`] reserves `tag_size` bytes per management
//! block.
//!
//! Management blocks are always sealed with a fixed counter of zero
//! (mirroring how [`crate::crypto::MasterKeyContext`] seals the header at a
//! fixed `(phy=0, counter=0)`): unlike data blocks, a management block has
//! no parent record to carry a monotonic counter forward across a reopen,
//! so nothing could supply the right counter to `decrypt` without first
//! decrypting. Freshness for management blocks comes instead from the
//! strictly-increasing per-slot counters embedded in their own
//! (authenticated) plaintext and, ultimately, from the Merkle root.

use std::collections::HashMap;

use crate::addr;
use crate::arith;
use crate::cache::{Cache, Flusher, Kind};
use crate::config::Params;
use crate::crypto::{Capability, Cipher, TAG_SIZE};
use crate::error::{Result, SbdiError};
use crate::merkle::{Hash, Merkle};
use crate::pio::Pio;

const COUNTER_BYTES: usize = 16;
const MNG_CTR: u128 = 0;

#[derive(Debug, Clone, Copy)]
struct ManagementRecord {
    counter: u128,
    tag: [u8; TAG_SIZE],
}

impl ManagementRecord {
    fn unwritten() -> Self {
        Self {
            counter: 0,
            tag: [0u8; TAG_SIZE],
        }
    }

    fn is_unwritten(&self) -> bool {
        self.counter == 0 && self.tag == [0u8; TAG_SIZE]
    }
}

#[derive(Debug, Clone)]
struct ManagementBlock {
    records: Vec<ManagementRecord>,
}

impl ManagementBlock {
    fn empty(fan_out: u32) -> Self {
        Self {
            records: vec![ManagementRecord::unwritten(); fan_out as usize],
        }
    }

    fn record_size() -> usize {
        COUNTER_BYTES + TAG_SIZE
    }

    fn to_plaintext(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.records.len() * Self::record_size());
        for r in &self.records {
            buf.extend_from_slice(&r.counter.to_le_bytes());
            buf.extend_from_slice(&r.tag);
        }
        buf
    }

    fn from_plaintext(bytes: &[u8], fan_out: u32) -> Result<Self> {
        let rec_size = Self::record_size();
        let mut records = Vec::with_capacity(fan_out as usize);
        for i in 0..fan_out as usize {
            let off = i * rec_size;
            let chunk = bytes
                .get(off..off + rec_size)
                .ok_or(SbdiError::IllegalParam("truncated management record"))?;
            let counter = u128::from_le_bytes(chunk[..COUNTER_BYTES].try_into().unwrap());
            let mut tag = [0u8; TAG_SIZE];
            tag.copy_from_slice(&chunk[COUNTER_BYTES..COUNTER_BYTES + TAG_SIZE]);
            records.push(ManagementRecord { counter, tag });
        }
        Ok(Self { records })
    }
}

fn mng_group_index(params: &Params, mng_phy: u32) -> Result<usize> {
    if !addr::is_mng(params, mng_phy) {
        return Err(SbdiError::IllegalParam("physical index is not a management block"));
    }
    let f = u64::from(params.fan_out());
    Ok(((u64::from(mng_phy) - 1) / (f + 1)) as usize)
}

fn seal_management_block(cipher: &Cipher, params: &Params, phy: u32, plaintext: &[u8]) -> Result<(Vec<u8>, [u8; TAG_SIZE])> {
    let (ciphertext, tag) = cipher.encrypt(phy, MNG_CTR, plaintext)?;
    let mut block = Vec::with_capacity(params.block_size() as usize);
    block.extend_from_slice(&ciphertext);
    block.extend_from_slice(&tag);
    if block.len() > params.block_size() as usize {
        return Err(SbdiError::IllegalParam("management block does not fit in one physical block"));
    }
    block.resize(params.block_size() as usize, 0);
    Ok((block, tag))
}

fn open_management_block(cipher: &Cipher, params: &Params, phy: u32, raw: &[u8]) -> Result<(Vec<u8>, [u8; TAG_SIZE])> {
    let fan_out = params.fan_out();
    let ciphertext_len = fan_out as usize * ManagementBlock::record_size();
    let ciphertext = raw
        .get(..ciphertext_len)
        .ok_or(SbdiError::IllegalParam("truncated management block"))?;
    let tag_bytes = raw
        .get(ciphertext_len..ciphertext_len + TAG_SIZE)
        .ok_or(SbdiError::IllegalParam("truncated management block tag"))?;
    let mut tag = [0u8; TAG_SIZE];
    tag.copy_from_slice(tag_bytes);
    let plaintext = cipher.decrypt(phy, MNG_CTR, ciphertext, &tag)?;
    Ok((plaintext, tag))
}

/// Borrowed view used to flush dirty cache entries without re-borrowing the
/// cache itself: the cache drives eviction/`sync` and calls into this
/// through the [`Flusher`] seam, never touching its own fields directly.
struct FlushCtx<'a, P: Pio> {
    cipher: &'a Cipher,
    params: &'a Params,
    pio: &'a mut P,
    merkle: &'a mut Merkle,
    pending_data: &'a mut HashMap<u32, (Vec<u8>, [u8; TAG_SIZE])>,
}

impl<'a, P: Pio> Flusher for FlushCtx<'a, P> {
    fn flush_one(&mut self, phy: u32, kind: Kind, plaintext: &[u8]) -> Result<()> {
        match kind {
            Kind::Data => {
                let (ciphertext, _tag) = self
                    .pending_data
                    .remove(&phy)
                    .ok_or(SbdiError::Unspecified)?;
                self.pio.write(phy, &ciphertext)
            }
            Kind::Management => {
                let (block, tag) = seal_management_block(self.cipher, self.params, phy, plaintext)?;
                self.pio.write(phy, &block)?;
                let m = mng_group_index(self.params, phy)?;
                let leaf = Hash::from_leaf(&tag);
                while self.merkle.len() < m {
                    self.merkle.add(Hash::from_leaf(&[0u8; TAG_SIZE]));
                }
                if self.merkle.len() == m {
                    self.merkle.add(leaf);
                    tracing::debug!(phy, leaf_index = m, "merkle leaf added");
                } else {
                    self.merkle.update(m, leaf)?;
                    tracing::debug!(phy, leaf_index = m, "merkle leaf updated");
                }
                Ok(())
            }
        }
    }
}

/// Orchestration engine binding C1–C5 together.
pub struct BlockLayer<P: Pio> {
    params: Params,
    cipher: Cipher,
    cache: Cache,
    merkle: Merkle,
    pio: P,
    pending_data: HashMap<u32, (Vec<u8>, [u8; TAG_SIZE])>,
}

impl<P: Pio> std::fmt::Debug for BlockLayer<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockLayer")
            .field("params", &self.params)
            .field("cipher", &self.cipher)
            .field("cache", &self.cache)
            .field("merkle", &self.merkle)
            .field("pending_writes", &self.pending_data.len())
            .finish_non_exhaustive()
    }
}

impl<P: Pio> BlockLayer<P> {
    /// Build a fresh block layer (no prior Merkle state) over `pio`.
    pub fn new(params: Params, cipher: Cipher, cache_capacity: usize, pio: P) -> Self {
        Self::with_merkle(params, cipher, cache_capacity, pio, Merkle::new())
    }

    /// Build a block layer with a Merkle tree already populated by
    /// [`BlockLayer::verify_block_layer`].
    pub fn with_merkle(params: Params, cipher: Cipher, cache_capacity: usize, pio: P, merkle: Merkle) -> Self {
        Self {
            params,
            cipher,
            cache: Cache::new(cache_capacity),
            merkle,
            pio,
            pending_data: HashMap::new(),
        }
    }

    /// Current Merkle root, recomputing lazily if anything changed.
    pub fn merkle_root(&mut self) -> Hash {
        self.merkle.root()
    }

    /// Mutable access to the underlying `pio`, for the header block that
    /// lives outside the block layer's remit.
    pub fn pio_mut(&mut self) -> &mut P {
        &mut self.pio
    }

    fn split_mut(&mut self) -> (&mut Cache, FlushCtx<'_, P>) {
        let Self {
            cache,
            cipher,
            params,
            pio,
            merkle,
            pending_data,
            ..
        } = self;
        (
            cache,
            FlushCtx {
                cipher,
                params,
                pio,
                merkle,
                pending_data,
            },
        )
    }

    fn ensure_mng_resident(&mut self, mng_phy: u32) -> Result<()> {
        if self.cache.contains(mng_phy) {
            return Ok(());
        }
        let fan_out = self.params.fan_out();
        let raw = self.pio.read(mng_phy, self.params.block_size())?;
        let plaintext = match raw {
            Some(bytes) => open_management_block(&self.cipher, &self.params, mng_phy, &bytes)?.0,
            None => ManagementBlock::empty(fan_out).to_plaintext(),
        };
        let (cache, mut flusher) = self.split_mut();
        cache.load(mng_phy, Kind::Management, plaintext, &mut flusher)
    }

    fn mng_record(&mut self, mng_phy: u32, slot: usize) -> Result<ManagementRecord> {
        self.ensure_mng_resident(mng_phy)?;
        let fan_out = self.params.fan_out();
        let plaintext = self
            .cache
            .get(mng_phy)
            .expect("management block was just ensured resident");
        let mb = ManagementBlock::from_plaintext(plaintext, fan_out)?;
        mb.records
            .get(slot)
            .copied()
            .ok_or(SbdiError::IllegalParam("management slot out of range"))
    }

    fn set_mng_record(&mut self, mng_phy: u32, slot: usize, record: ManagementRecord, dirty_dep: u32) -> Result<()> {
        let fan_out = self.params.fan_out();
        let plaintext = self
            .cache
            .get(mng_phy)
            .expect("management block was just ensured resident")
            .to_vec();
        let mut mb = ManagementBlock::from_plaintext(&plaintext, fan_out)?;
        mb.records[slot] = record;
        self.cache.mark_dirty(mng_phy, mb.to_plaintext(), [dirty_dep])
    }

    fn ensure_dat_resident(&mut self, phy: u32, counter: u128, tag: [u8; TAG_SIZE]) -> Result<()> {
        if self.cache.contains(phy) {
            return Ok(());
        }
        let raw = self
            .pio
            .read(phy, self.params.block_size())?
            .ok_or(SbdiError::MissingBlock { phy })?;
        let plaintext = self.cipher.decrypt(phy, counter, &raw, &tag)?;
        let (cache, mut flusher) = self.split_mut();
        cache.load(phy, Kind::Data, plaintext, &mut flusher)
    }

    /// Read `length` bytes starting at `intra_offset` of the logical data
    /// block `logical_idx` into `buf[..length]`.
    #[tracing::instrument(level = "debug", skip(self, buf), fields(pdat = tracing::field::Empty, pmng = tracing::field::Empty))]
    pub fn read_data_block(&mut self, buf: &mut [u8], logical_idx: u32, intra_offset: u32, length: u32) -> Result<()> {
        let pdat = addr::log_to_phy_dat(&self.params, logical_idx)?;
        let pmng = addr::log_to_phy_mng(&self.params, logical_idx)?;
        tracing::Span::current().record("pdat", pdat).record("pmng", pmng);
        let slot = (logical_idx % self.params.fan_out()) as usize;

        let record = self.mng_record(pmng, slot)?;
        let (off, len) = (intra_offset as usize, length as usize);
        if record.is_unwritten() {
            buf[..len].fill(0);
            return Ok(());
        }
        if let Err(e) = self.ensure_dat_resident(pdat, record.counter, record.tag) {
            tracing::warn!(phy = pdat, counter = record.counter, "data block failed authentication");
            return Err(e);
        }
        let plaintext = self.cache.get(pdat).expect("data block was just ensured resident");
        buf[..len].copy_from_slice(&plaintext[off..off + len]);
        Ok(())
    }

    /// Splice `buf[..length]` into the logical data block `logical_idx` at
    /// `intra_offset`, re-sealing the block and its management record.
    #[tracing::instrument(level = "debug", skip(self, buf), fields(pdat = tracing::field::Empty, pmng = tracing::field::Empty))]
    pub fn write_data_block(&mut self, buf: &[u8], logical_idx: u32, intra_offset: u32, length: u32) -> Result<()> {
        let pdat = addr::log_to_phy_dat(&self.params, logical_idx)?;
        let pmng = addr::log_to_phy_mng(&self.params, logical_idx)?;
        tracing::Span::current().record("pdat", pdat).record("pmng", pmng);
        let slot = (logical_idx % self.params.fan_out()) as usize;
        let block_size = self.params.block_size() as usize;
        let (off, len) = (intra_offset as usize, length as usize);

        let record = self.mng_record(pmng, slot)?;

        // A full-block overwrite never needs the prior plaintext (spec
        // §4.6 step 1), so it skips straight to a zero-filled placeholder
        // rather than decrypting; a partial overwrite of an unwritten slot
        // does the same, since there is nothing on disk to decrypt yet.
        // Either way the block must still become cache-resident before
        // `mark_dirty` below, which requires an existing entry to mutate.
        if !self.cache.contains(pdat) {
            if len == block_size || record.is_unwritten() {
                let (cache, mut flusher) = self.split_mut();
                cache.load(pdat, Kind::Data, vec![0u8; block_size], &mut flusher)?;
            } else {
                self.ensure_dat_resident(pdat, record.counter, record.tag)?;
            }
        }

        let mut plaintext = self.cache.get(pdat).expect("just ensured resident").to_vec();
        plaintext[off..off + len].copy_from_slice(&buf[..len]);

        let new_counter = arith::increment_counter(record.counter, pdat)?;
        let (ciphertext, tag) = self.cipher.encrypt(pdat, new_counter, &plaintext)?;

        self.cache.mark_dirty(pdat, plaintext, [])?;
        self.pending_data.insert(pdat, (ciphertext, tag));

        let new_record = ManagementRecord {
            counter: new_counter,
            tag,
        };
        self.set_mng_record(pmng, slot, new_record, pdat)?;
        Ok(())
    }

    /// Walk every management block implied by `header_size`, authenticate
    /// each, replay the Merkle tree in order, and check against
    /// `expected_root`.
    #[tracing::instrument(level = "debug", skip(self, expected_root))]
    pub fn verify_block_layer(&mut self, header_size: u64, expected_root: &Hash) -> Result<()> {
        let block_size = u64::from(self.params.block_size());
        let fan_out = u64::from(self.params.fan_out());
        let group_bytes = fan_out * block_size;
        let mng_count = if header_size == 0 {
            0
        } else {
            header_size.div_ceil(group_bytes)
        };

        self.merkle = Merkle::new();
        for m in 0..mng_count {
            let logical_in_group = (m * fan_out) as u32;
            let mng_phy = addr::log_to_phy_mng(&self.params, logical_in_group)?;
            let raw = self.pio.read(mng_phy, self.params.block_size())?;
            let tag = match raw {
                Some(bytes) => {
                    let opened = open_management_block(&self.cipher, &self.params, mng_phy, &bytes);
                    match opened {
                        Ok((_, tag)) => tag,
                        Err(e) => {
                            tracing::warn!(phy = mng_phy, "management block failed authentication during verify");
                            return Err(e);
                        }
                    }
                }
                None => [0u8; TAG_SIZE],
            };
            self.merkle.add(Hash::from_leaf(&tag));
        }
        let result = self.merkle.verify_against(expected_root);
        if result.is_err() {
            tracing::warn!(mng_count, "merkle root mismatch during verify");
        }
        result
    }

    /// Drain the cache per its dirty-dependency order. The header itself is
    /// written by the caller after this returns.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn sync(&mut self) -> Result<()> {
        let (cache, mut flusher) = self.split_mut();
        cache.sync(&mut flusher)
    }

    /// The crypto capability sealing data and management blocks, so the
    /// caller (the user-facing API) can reseal the header with the same
    /// cipher kind and key bytes on every `sync`.
    #[must_use]
    pub fn cipher(&self) -> &Cipher {
        &self.cipher
    }
}
