//! Block address calculus (component C2).
//!
//! Pure, total functions mapping logical data indices to physical block
//! indices and back. Block 0 is always the header; thereafter the store
//! alternates one management block followed by `F = params.fan_out()` data
//! blocks, per spec §3.

use crate::config::Params;
use crate::error::{Result, SbdiError};

/// Physical index of the header block. Always `0`.
pub const HEADER_PHY: u32 = 0;

/// Sentinel physical index meaning "no block", ported from the C source's
/// `SBDI_BLOCK_INDEX_INVALID` (`UINT32_MAX`).
pub const INVALID_PHY_BLOCK: u32 = u32::MAX;

/// Maximum addressable physical block index. One less than the sentinel so
/// that `INVALID_PHY_BLOCK` is never itself a valid address.
pub const MAX_PHY: u32 = u32::MAX - 1;

#[inline]
fn check_phy(phy: u32) -> Result<u32> {
    if phy > MAX_PHY {
        return Err(SbdiError::IllegalParam("physical block index out of range"));
    }
    Ok(phy)
}

/// Map a logical data block index to its physical data block index.
///
/// `ldp(l) = 1 + floor(l / F)*(F + 1) + 1 + (l mod F)`
pub fn log_to_phy_dat(params: &Params, logical: u32) -> Result<u32> {
    let f = params.fan_out();
    let group = logical / f;
    let within = logical % f;
    let mng = 1u64 + u64::from(group) * u64::from(f + 1);
    let phy = mng + 1 + u64::from(within);
    let phy = u32::try_from(phy).map_err(|_| SbdiError::IllegalParam("logical index too large"))?;
    check_phy(phy)
}

/// Map a logical data block index to the physical index of its management
/// block.
///
/// `lmp(l) = 1 + floor(l / F)*(F + 1)`
pub fn log_to_phy_mng(params: &Params, logical: u32) -> Result<u32> {
    let f = params.fan_out();
    let group = logical / f;
    let phy = 1u64 + u64::from(group) * u64::from(f + 1);
    let phy = u32::try_from(phy).map_err(|_| SbdiError::IllegalParam("logical index too large"))?;
    check_phy(phy)
}

/// Inverse of [`log_to_phy_dat`]: recover the logical data index for a
/// physical data block index.
pub fn phy_dat_to_log(params: &Params, phy: u32) -> Result<u32> {
    check_phy(phy)?;
    if !is_dat(params, phy) {
        return Err(SbdiError::IllegalParam("physical index is not a data block"));
    }
    let f = u64::from(params.fan_out());
    let p = u64::from(phy) - 1;
    let group = p / (f + 1);
    let within = p % (f + 1) - 1;
    let logical = group * f + within;
    u32::try_from(logical).map_err(|_| SbdiError::IllegalParam("physical index too large"))
}

/// Whether `phy` addresses a management block.
///
/// `phy` is a management block iff `(phy - 1) mod (F + 1) == 0`, which also
/// excludes the header (`phy == 0`, for which the subtraction is undefined
/// over unsigned arithmetic and handled as `false` below).
#[must_use]
pub fn is_mng(params: &Params, phy: u32) -> bool {
    if phy == HEADER_PHY {
        return false;
    }
    let f = u64::from(params.fan_out());
    (u64::from(phy) - 1) % (f + 1) == 0
}

/// Whether `phy` addresses a data block (neither the header nor a
/// management block).
#[must_use]
pub fn is_dat(params: &Params, phy: u32) -> bool {
    phy != HEADER_PHY && !is_mng(params, phy)
}

/// The physical data block indices covered by the management block at
/// `mng_phy`, in slot order.
pub fn mng_covers(params: &Params, mng_phy: u32) -> Result<Vec<u32>> {
    if !is_mng(params, mng_phy) {
        return Err(SbdiError::IllegalParam("physical index is not a management block"));
    }
    let f = params.fan_out();
    Ok((0..f).map(|i| mng_phy + 1 + i).collect())
}
