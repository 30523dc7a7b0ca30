//! The persistent I/O provider trait (component external collaborator,
//! spec §6).
//!
//! `pio` is treated as an external serializable resource: the block layer
//! issues one request at a time (spec §5) and never assumes any caching or
//! batching on the provider's part.

use crate::error::Result;

/// Block-granular persistent storage, supplied by the caller of this crate.
///
/// Implementations are free to back this with a file, a raw device, or (for
/// tests) memory — see [`crate::MemoryPio`] for an in-memory double modeled
/// on the teacher crate's `IndexAccessMemory`.
pub trait Pio {
    /// Read the block at `phy_index` into a freshly-allocated, block-sized
    /// buffer. Returns `Ok(None)` if the block has never been written
    /// (`MissingBlock`, per spec §7, is constructed by the caller with the
    /// physical index it was expecting).
    fn read(&mut self, phy_index: u32, block_size: u32) -> Result<Option<Vec<u8>>>;

    /// Write a block-sized buffer at `phy_index`.
    fn write(&mut self, phy_index: u32, data: &[u8]) -> Result<()>;

    /// Fill `out` with cryptographically strong randomness.
    fn genseed(&mut self, out: &mut [u8]) -> Result<()>;
}
