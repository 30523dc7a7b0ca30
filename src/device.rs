//! User API (component C7): the byte-offset facade over the block layer.
//!
//! This is the thin layer the spec describes "only through the contracts it
//! imposes on" C1–C6: [`Handle`] owns a [`crate::block_layer::BlockLayer`]
//! plus the bookkeeping the block layer has no opinion about — the logical
//! size, the `lseek` cursor, and the poisoned flag. Grounded on
//! `original_source/src/sbdi.c`'s `sbdi_open`/`sbdi_pread`/`sbdi_pwrite`/
//! `sbdi_lseek`/`sbdi_sync`/`sbdi_close`, reworked into an owned, RAII-style
//! handle the way the teacher crate's `Core` wraps its `Store`/`StoreBlocks`
//! collaborators.

use crate::addr;
use crate::arith;
use crate::block_layer::BlockLayer;
use crate::config::Params;
use crate::crypto::{Cipher, CipherKind, MasterKeyContext};
use crate::error::{Result, SbdiError};
use crate::header::Header;
use crate::merkle::Hash;
use crate::pio::Pio;

/// Default number of blocks the write-back cache holds resident at once.
/// Chosen generously relative to [`crate::config::Params::fan_out`] so a
/// single management group's data blocks plus its management block fit
/// without thrashing; callers with tighter memory budgets can construct
/// [`Handle`] through [`Handle::open_with_cache_capacity`] instead.
pub const DEFAULT_CACHE_CAPACITY: usize = 64;

/// `lseek` origin, mirroring `sbdi_whence_t`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    /// Offset is absolute from the start of the device.
    Set,
    /// Offset is relative to the current cursor.
    Cur,
    /// Offset is relative to the current logical size.
    End,
}

/// A secure block device handle.
///
/// Owns its [`BlockLayer`] (and, transitively, the cache, the Merkle tree,
/// and the crypto capability) plus the cursor and poisoned flag that live
/// above it. Per spec §5, at most one API call executes against a given
/// handle at a time — `Handle` enforces nothing here itself; it is the
/// caller's responsibility not to alias a handle across threads.
pub struct Handle<P: Pio> {
    block_layer: BlockLayer<P>,
    params: Params,
    size: u64,
    cursor: u64,
    poisoned: bool,
}

impl<P: Pio> std::fmt::Debug for Handle<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("block_layer", &self.block_layer)
            .field("size", &self.size)
            .field("cursor", &self.cursor)
            .field("poisoned", &self.poisoned)
            .finish()
    }
}

impl<P: Pio> Handle<P> {
    /// Open (or create) a secure block device over `pio`.
    ///
    /// If block 0 is absent, a fresh device is created: a data key is
    /// derived from `pio.genseed`, a header is written under
    /// `cipher_preference`, and `expected_root` is ignored (spec §4.7,
    /// §6 glossary "Fresh open"). Otherwise the on-disk header's cipher
    /// kind governs — not `cipher_preference` — and the Merkle root
    /// computed from the stored management blocks must equal
    /// `expected_root` or the handle is never constructed.
    #[tracing::instrument(level = "debug", skip(pio, master_key, expected_root))]
    pub fn open(pio: P, cipher_preference: CipherKind, master_key: &[u8], expected_root: &Hash) -> Result<Self> {
        Self::open_with_cache_capacity(pio, cipher_preference, master_key, expected_root, DEFAULT_CACHE_CAPACITY)
    }

    /// As [`Handle::open`], but with an explicit cache capacity instead of
    /// [`DEFAULT_CACHE_CAPACITY`].
    pub fn open_with_cache_capacity(
        mut pio: P,
        cipher_preference: CipherKind,
        master_key: &[u8],
        expected_root: &Hash,
        cache_capacity: usize,
    ) -> Result<Self> {
        let params = Params::default();
        let mctx = MasterKeyContext::new(master_key)?;

        let raw_header = pio.read(addr::HEADER_PHY, params.block_size())?;
        let (header, cipher, is_fresh) = match raw_header {
            None => {
                let mut seed = vec![0u8; cipher_preference.key_size().max(1)];
                pio.genseed(&mut seed)?;
                let cipher = Cipher::generate(cipher_preference, &seed)?;
                let header = Header::new(cipher_preference, cipher.key_bytes().to_vec());
                let block = header.to_block(&mctx, &params)?;
                pio.write(addr::HEADER_PHY, &block)?;
                (header, cipher, true)
            }
            Some(bytes) => {
                let header = Header::from_block(&bytes, &mctx)?;
                let cipher = Cipher::from_key_bytes(header.cipher_kind(), header.data_key())?;
                (header, cipher, false)
            }
        };

        let size = header.size();
        let mut block_layer = BlockLayer::new(params, cipher, cache_capacity.max(1), pio);
        if !is_fresh {
            block_layer.verify_block_layer(size, expected_root)?;
        }

        Ok(Self {
            block_layer,
            params,
            size,
            cursor: 0,
            poisoned: false,
        })
    }

    /// Current logical size of the device, in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Current `lseek` cursor.
    #[must_use]
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Whether this handle has observed a fatal error and refuses further
    /// operations (spec §9, REDESIGN FLAG (b)).
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Direct access to the underlying [`Pio`], for callers that need to
    /// inspect or relocate the raw backing store outside the byte-offset
    /// facade (snapshotting, migrating to a new provider, or — in tests —
    /// simulating tamper/rollback by an untrusted store).
    pub fn pio_mut(&mut self) -> &mut P {
        self.block_layer.pio_mut()
    }

    fn check_not_poisoned(&self) -> Result<()> {
        if self.poisoned {
            return Err(SbdiError::Poisoned);
        }
        Ok(())
    }

    /// Run `op`, poisoning the handle if it returns a fatal error
    /// (`TagMismatch`, `RootMismatch`, `CounterOverflow`; see
    /// [`SbdiError::is_fatal`]).
    fn poison_on_fatal<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(ref e) = result {
            if e.is_fatal() {
                self.poisoned = true;
            }
        }
        result
    }

    /// Read up to `nbyte` bytes starting at `offset` into `buf`, clamped to
    /// `[offset, header.size)`. Returns the number of bytes actually read
    /// alongside the result; on a mid-loop failure the count reflects the
    /// sub-block reads that succeeded before the error (spec §7 "Partial
    /// writes").
    #[tracing::instrument(level = "debug", skip(self, buf))]
    pub fn pread(&mut self, buf: &mut [u8], nbyte: usize, offset: u64) -> (usize, Result<()>) {
        if let Err(e) = self.check_not_poisoned() {
            return (0, Err(e));
        }
        if nbyte == 0 {
            return (0, Ok(()));
        }
        if offset >= self.size {
            return (0, Ok(()));
        }
        let avail = self.size - offset;
        let len = (nbyte as u64).min(avail) as usize;

        let plan = match plan_blocks(&self.params, offset, len) {
            Ok(p) => p,
            Err(e) => return (0, Err(e)),
        };

        let mut done = 0usize;
        let mut pos = 0usize;
        for (logical, intra, length) in plan {
            let length = length as usize;
            let slice = &mut buf[pos..pos + length];
            let r = self.block_layer.read_data_block(slice, logical, intra, length as u32);
            let r = self.poison_on_fatal(r);
            match r {
                Ok(()) => {
                    done += length;
                    pos += length;
                }
                Err(e) => return (done, Err(e)),
            }
        }
        (done, Ok(()))
    }

    /// Write up to `nbyte` bytes from `buf` at `offset`, clamped to
    /// `SMAX - offset`. Grows `header.size` (in memory; not flushed until
    /// [`Handle::sync`]) whenever the write extends past the current size.
    #[tracing::instrument(level = "debug", skip(self, buf))]
    pub fn pwrite(&mut self, buf: &[u8], nbyte: usize, offset: u64) -> (usize, Result<()>) {
        if let Err(e) = self.check_not_poisoned() {
            return (0, Err(e));
        }
        if nbyte == 0 {
            return (0, Ok(()));
        }
        let max_size = self.params.max_size();
        if offset >= max_size {
            return (0, Err(SbdiError::IllegalParam("offset at or beyond the maximum device size")));
        }
        let room = max_size - offset;
        let len = (nbyte as u64).min(room) as usize;

        let plan = match plan_blocks(&self.params, offset, len) {
            Ok(p) => p,
            Err(e) => return (0, Err(e)),
        };

        let mut done = 0usize;
        let mut pos = 0usize;
        for (logical, intra, length) in plan {
            let length = length as usize;
            let slice = &buf[pos..pos + length];
            let r = self.block_layer.write_data_block(slice, logical, intra, length as u32);
            let r = self.poison_on_fatal(r);
            match r {
                Ok(()) => {
                    done += length;
                    pos += length;
                    let frontier = offset + done as u64;
                    if frontier > self.size {
                        self.size = frontier;
                    }
                }
                Err(e) => return (done, Err(e)),
            }
        }
        (done, Ok(()))
    }

    /// Reposition the cursor per `whence`. REDESIGN FLAG (a): a negative
    /// `End` offset whose magnitude exceeds `header.size` is rejected
    /// rather than allowed to transiently point before the start of the
    /// device.
    pub fn lseek(&mut self, offset: i64, whence: Whence) -> Result<u64> {
        self.check_not_poisoned()?;
        let max_size = self.params.max_size();
        let new_cursor = match whence {
            Whence::Set => {
                if offset < 0 {
                    return Err(SbdiError::IllegalParam("seek_set offset must not be negative"));
                }
                offset as u64
            }
            Whence::Cur => arith::checked_add_signed(self.cursor, offset)?,
            Whence::End => arith::checked_add_signed(self.size, offset)?,
        };
        if new_cursor >= max_size {
            return Err(SbdiError::IllegalParam("seek target at or beyond the maximum device size"));
        }
        self.cursor = new_cursor;
        Ok(self.cursor)
    }

    /// `pread` at the cursor, then advance the cursor by the number of
    /// bytes actually read (even on a partial failure).
    pub fn read(&mut self, buf: &mut [u8], nbyte: usize) -> (usize, Result<()>) {
        let (n, r) = self.pread(buf, nbyte, self.cursor);
        match arith::add_u64(self.cursor, n as u64) {
            Ok(c) => self.cursor = c,
            Err(e) if r.is_ok() => return (n, Err(e)),
            Err(_) => {}
        }
        (n, r)
    }

    /// `pwrite` at the cursor, then advance the cursor by the number of
    /// bytes actually written (even on a partial failure).
    pub fn write(&mut self, buf: &[u8], nbyte: usize) -> (usize, Result<()>) {
        let (n, r) = self.pwrite(buf, nbyte, self.cursor);
        match arith::add_u64(self.cursor, n as u64) {
            Ok(c) => self.cursor = c,
            Err(e) if r.is_ok() => return (n, Err(e)),
            Err(_) => {}
        }
        (n, r)
    }

    /// Flush the cache (data blocks, then their management blocks, per
    /// spec §4.5) and re-seal the header under a fresh master-key context.
    /// Returns the Merkle root the header now commits to.
    ///
    /// Resolves the atomicity gap of spec §5 per choice (a): the header is
    /// written only after every dirty cache entry has flushed
    /// successfully, deriving the root from the (by-then consistent)
    /// in-memory Merkle tree. A failure here poisons the handle (REDESIGN
    /// FLAG (b)): the source's ambiguous post-failure state is resolved by
    /// refusing every subsequent operation.
    #[tracing::instrument(level = "debug", skip(self, master_key))]
    pub fn sync(&mut self, master_key: &[u8]) -> Result<Hash> {
        self.check_not_poisoned()?;
        let result = self.try_sync(master_key);
        if result.is_err() {
            self.poisoned = true;
        }
        result
    }

    fn try_sync(&mut self, master_key: &[u8]) -> Result<Hash> {
        self.block_layer.sync()?;
        let root = self.block_layer.merkle_root();

        let mctx = MasterKeyContext::new(master_key)?;
        let mut header = Header::new(self.block_layer.cipher().kind(), self.block_layer.cipher().key_bytes().to_vec());
        header.grow_size(self.size)?;
        let block = header.to_block(&mctx, &self.params)?;
        self.block_layer.pio_mut().write(addr::HEADER_PHY, &block)?;
        Ok(root)
    }

    /// Sync, then consume the handle — key material is scrubbed by the
    /// `Drop` implementations of [`crate::crypto::Cipher`] and
    /// [`crate::crypto::MasterKeyContext`] as `self` goes out of scope,
    /// on every path, including this one returning early on error.
    pub fn close(mut self, master_key: &[u8]) -> Result<Hash> {
        self.sync(master_key)
    }
}

/// Split a `[offset, offset + len)` byte range into block-layer-sized
/// fragments: `(logical_index, intra_block_offset, length)` triples, the
/// first possibly partial, the rest block-aligned until the remainder fits
/// in one block. Mirrors `sbdi_pread`/`sbdi_pwrite`'s splitting loop in
/// `original_source/src/sbdi.c`.
fn plan_blocks(params: &Params, offset: u64, len: usize) -> Result<Vec<(u32, u32, u32)>> {
    let block_size = u64::from(params.block_size());
    let mut out = Vec::new();
    let mut remaining = len as u64;
    let mut idx = u32::try_from(offset / block_size).map_err(|_| SbdiError::IllegalParam("offset too large for a u32 block index"))?;
    let mut intra = (offset % block_size) as u32;
    while remaining > 0 {
        let room_in_block = block_size - u64::from(intra);
        let to_xfer = remaining.min(room_in_block);
        out.push((idx, intra, to_xfer as u32));
        remaining -= to_xfer;
        if remaining > 0 {
            idx = arith::add_u32(idx, 1)?;
        }
        intra = 0;
    }
    Ok(out)
}
