//! Block/tag/counter sizing parameters.
//!
//! Nothing here is read from the environment (spec §6: "No environment
//! variables are part of the core"). A [`Params`] value is constructed once
//! and carried by every collaborator that needs to turn a logical index into
//! a physical one.

use crate::error::{Result, SbdiError};

/// Default block size in bytes: one page on most targets this crate runs on.
pub const DEFAULT_BLOCK_SIZE: u32 = 4096;
/// Default authentication tag size in bytes.
pub const DEFAULT_TAG_SIZE: u32 = 16;
/// Default block counter size in bytes (128-bit counter).
pub const DEFAULT_COUNTER_SIZE: u32 = 16;

/// Sizing parameters for a secure block device.
///
/// Immutable for the lifetime of a handle: changing `block_size` or
/// `tag_size` after blocks have been written would invalidate every physical
/// offset already committed to the backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Params {
    block_size: u32,
    tag_size: u32,
    counter_size: u32,
    max_size: u64,
}

impl Default for Params {
    fn default() -> Self {
        // Constructing with the worked example from the spec can never fail.
        Self::new(
            DEFAULT_BLOCK_SIZE,
            DEFAULT_TAG_SIZE,
            DEFAULT_COUNTER_SIZE,
            u64::MAX,
        )
        .expect("default parameters are always valid")
    }
}

impl Params {
    /// Construct and validate a new parameter set.
    ///
    /// `block_size` must be a power of two large enough to hold at least one
    /// `(counter, tag)` management record, after reserving `tag_size` bytes
    /// of the block for the management block's own authentication tag
    /// (otherwise the fan-out `F` would be zero and no data block could ever
    /// be addressed). Unlike a data block's tag, which is stored in its
    /// parent management record, a management block has no parent to hold
    /// its tag, so the tag travels inline in the same physical block as its
    /// own ciphertext.
    pub fn new(block_size: u32, tag_size: u32, counter_size: u32, max_size: u64) -> Result<Self> {
        if block_size == 0 || !block_size.is_power_of_two() {
            return Err(SbdiError::IllegalParam("block_size must be a power of two"));
        }
        let record_size = tag_size
            .checked_add(counter_size)
            .ok_or(SbdiError::IllegalParam("tag_size + counter_size overflows"))?;
        let usable = block_size
            .checked_sub(tag_size)
            .ok_or(SbdiError::IllegalParam("block_size smaller than tag_size"))?;
        if record_size == 0 || usable < record_size {
            return Err(SbdiError::IllegalParam(
                "block_size too small to hold a management tag plus one record",
            ));
        }
        Ok(Self {
            block_size,
            tag_size,
            counter_size,
            max_size,
        })
    }

    /// Block size in bytes.
    #[must_use]
    pub fn block_size(&self) -> u32 {
        self.block_size
    }
    /// Authentication tag size in bytes.
    #[must_use]
    pub fn tag_size(&self) -> u32 {
        self.tag_size
    }
    /// Block counter size in bytes.
    #[must_use]
    pub fn counter_size(&self) -> u32 {
        self.counter_size
    }
    /// Maximum logical size of the device in bytes.
    #[must_use]
    pub fn max_size(&self) -> u64 {
        self.max_size
    }
    /// Management record size (`tag_size + counter_size`).
    #[must_use]
    pub fn record_size(&self) -> u32 {
        self.tag_size + self.counter_size
    }
    /// Management block fan-out `F = floor((block_size - tag_size) / record_size)`,
    /// reserving `tag_size` bytes of the block for the management block's
    /// own inline authentication tag.
    #[must_use]
    pub fn fan_out(&self) -> u32 {
        (self.block_size - self.tag_size) / self.record_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        let p = Params::default();
        assert_eq!(
            p.fan_out(),
            (DEFAULT_BLOCK_SIZE - DEFAULT_TAG_SIZE) / (DEFAULT_TAG_SIZE + DEFAULT_COUNTER_SIZE)
        );
    }

    #[test]
    fn rejects_non_power_of_two_block_size() {
        assert!(Params::new(4000, 16, 16, u64::MAX).is_err());
    }

    #[test]
    fn rejects_block_too_small_for_one_record() {
        assert!(Params::new(16, 16, 16, u64::MAX).is_err());
    }

    #[test]
    fn rejects_block_size_smaller_than_tag_size() {
        assert!(Params::new(8, 16, 16, u64::MAX).is_err());
    }
}
