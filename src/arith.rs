//! Overflow-safe arithmetic utilities (component C8).
//!
//! Ported from the bounds-checking discipline in `sbdi.c`'s `os_add_size`,
//! `os_add_uint32`, and `os_add_off_size`: every `offset + length` and every
//! `index + 1` in the block and API layers must route through one of these
//! instead of a bare `+`, even along paths that would otherwise only be
//! guarded by a debug assertion.

use crate::error::{Result, SbdiError};

/// Checked `u32` addition; `IllegalParam` on overflow.
#[inline]
pub fn add_u32(a: u32, b: u32) -> Result<u32> {
    a.checked_add(b)
        .ok_or(SbdiError::IllegalParam("u32 addition overflow"))
}

/// Checked `u64` addition; `IllegalParam` on overflow.
#[inline]
pub fn add_u64(a: u64, b: u64) -> Result<u64> {
    a.checked_add(b)
        .ok_or(SbdiError::IllegalParam("u64 addition overflow"))
}

/// Checked addition of a signed offset `b` to an unsigned base `a`, both
/// representable in `i64`/`u64`.
///
/// Mirrors `os_add_off_size`: if `b` is negative, the result is safe only if
/// `|b| <= a`; if `b` is non-negative, ordinary unsigned-overflow rules
/// apply. `i64::MIN` is handled specially since `-i64::MIN` does not fit in
/// an `i64`.
#[inline]
pub fn checked_add_signed(a: u64, b: i64) -> Result<u64> {
    if b < 0 {
        let abs = if b == i64::MIN {
            (i64::MAX as u64) + 1
        } else {
            (-b) as u64
        };
        if abs > a {
            return Err(SbdiError::IllegalParam(
                "signed offset would move before the start of the device",
            ));
        }
        Ok(a - abs)
    } else {
        add_u64(a, b as u64)
    }
}

/// Checked increment; returns `CounterOverflow` (tagged with `phy`) instead
/// of `IllegalParam`, since an exhausted block counter is a fatal condition
/// for that physical block, not a caller mistake.
#[inline]
pub fn increment_counter(counter: u128, phy: u32) -> Result<u128> {
    counter
        .checked_add(1)
        .ok_or(SbdiError::CounterOverflow { phy })
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::quickcheck;

    #[test]
    fn add_u32_overflow_detected() {
        assert!(add_u32(u32::MAX, 1).is_err());
        assert_eq!(add_u32(1, 2).unwrap(), 3);
    }

    #[test]
    fn checked_add_signed_negative_past_start() {
        assert!(checked_add_signed(10, -11).is_err());
        assert_eq!(checked_add_signed(10, -10).unwrap(), 0);
        assert_eq!(checked_add_signed(10, 5).unwrap(), 15);
    }

    #[test]
    fn checked_add_signed_i64_min() {
        assert!(checked_add_signed(u64::MAX, i64::MIN).is_ok());
        assert!(checked_add_signed(0, i64::MIN).is_err());
    }

    #[test]
    fn increment_counter_saturates_to_error() {
        assert!(increment_counter(u128::MAX, 7).is_err());
        assert_eq!(increment_counter(0, 7).unwrap(), 1);
    }

    quickcheck! {
        fn add_u64_matches_checked_add(a: u64, b: u64) -> bool {
            add_u64(a, b).ok() == a.checked_add(b)
        }
    }

    quickcheck! {
        fn checked_add_signed_matches_i128_math(a: u64, b: i64) -> bool {
            let expected = (a as i128) + (b as i128);
            match checked_add_signed(a, b) {
                Ok(v) => v as i128 == expected && expected >= 0,
                Err(_) => expected < 0 || expected > u64::MAX as i128,
            }
        }
    }
}
