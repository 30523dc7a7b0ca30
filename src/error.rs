//! The closed error taxonomy for the secure block device interface.

use thiserror::Error;

/// Result alias used throughout the crate and by every public entry point.
pub type Result<T> = core::result::Result<T, SbdiError>;

/// Closed set of failure kinds a caller of this crate can observe.
///
/// `TagMismatch`, `RootMismatch`, and `CounterOverflow` are terminal: once
/// returned, the [`crate::Handle`] that produced them must be discarded (it
/// marks itself poisoned and refuses further operations).
#[derive(Debug, Error)]
pub enum SbdiError {
    /// A precondition was violated by the caller: null, negative, out of
    /// range, or an arithmetic overflow in caller-supplied parameters.
    #[error("illegal parameter: {0}")]
    IllegalParam(&'static str),

    /// The requested cipher kind is not compiled into this build.
    #[error("unsupported cipher kind")]
    Unsupported,

    /// Key schedule or primitive construction failed.
    #[error("crypto initialization failed: {0}")]
    CryptoInit(&'static str),

    /// An authenticated-encryption invocation failed for reasons other than
    /// tag verification (e.g. a malformed key).
    #[error("crypto operation failed: {0}")]
    CryptoFail(&'static str),

    /// Authentication failed on a block. Fatal for the owning handle.
    #[error("authentication tag mismatch on physical block {phy}")]
    TagMismatch {
        /// Physical block index whose tag failed to verify.
        phy: u32,
    },

    /// The Merkle root computed at `open` did not match the caller-supplied
    /// expected root. The handle is never constructed in this case.
    #[error("merkle root mismatch")]
    RootMismatch,

    /// `pio.read` reported the block absent. At the header position this
    /// means "fresh device"; elsewhere it means corruption.
    #[error("missing block at physical index {phy}")]
    MissingBlock {
        /// Physical block index that was expected but absent.
        phy: u32,
    },

    /// Any other failure reported by the `pio` provider.
    #[error("I/O error: {0}")]
    IoError(String),

    /// A block counter reached its maximum value. Fatal for that block (and,
    /// transitively, for the owning handle).
    #[error("block counter exhausted on physical block {phy}")]
    CounterOverflow {
        /// Physical block index whose counter would have wrapped.
        phy: u32,
    },

    /// The handle has previously observed a fatal error and refuses further
    /// operations.
    #[error("handle is poisoned by a prior fatal error")]
    Poisoned,

    /// Sentinel for partially-initialized error paths. Must never be
    /// returned to a caller; its presence in a `Result` is a bug.
    #[error("unspecified internal error")]
    Unspecified,
}

impl SbdiError {
    /// True for the errors that the spec requires to poison the handle.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SbdiError::TagMismatch { .. }
                | SbdiError::RootMismatch
                | SbdiError::CounterOverflow { .. }
        )
    }
}
