#![forbid(unsafe_code, bad_style, nonstandard_style, future_incompatible)]
#![forbid(rust_2018_idioms, rust_2021_compatibility)]
#![deny(missing_debug_implementations)]
#![deny(missing_docs)]
#![cfg_attr(test, allow(dead_code))]
#![cfg_attr(test, deny(warnings))]

//! ## Introduction
//! `sbdi` is a secure block device: a userspace library that presents a
//! file-like byte-addressable interface over an untrusted backing store
//! while guaranteeing confidentiality, integrity, authenticity, and
//! freshness of everything it stores. The primary way to use this crate
//! is through the [`Handle`] struct, opened over anything implementing
//! [`Pio`].
//!
//! ## Example
//! ```rust
//! use sbdi::{Handle, CipherKind, Hash, MemoryPio};
//! use sbdi::Result;
//!
//! # fn main() -> Result<()> {
//! let mut handle = Handle::open(MemoryPio::seeded([0u8; 32]), CipherKind::Siv, b"a master key", &Hash::empty_root())?;
//! let (n, result) = handle.write(b"hello world", 11);
//! result?;
//! assert_eq!(n, 11);
//! let root = handle.sync(b"a master key")?;
//! assert_eq!(handle.size(), 11);
//! # let _ = root;
//! # Ok(())
//! # }
//! ```

mod addr;
mod arith;
mod block_layer;
mod cache;
mod config;
mod crypto;
mod device;
mod error;
mod header;
mod mem;
mod merkle;
mod pio;

pub use addr::{HEADER_PHY, INVALID_PHY_BLOCK, MAX_PHY};
pub use config::{Params, DEFAULT_BLOCK_SIZE, DEFAULT_COUNTER_SIZE, DEFAULT_TAG_SIZE};
pub use crypto::{Capability, Cipher, CipherKind};
pub use device::{Handle, Whence, DEFAULT_CACHE_CAPACITY};
pub use error::{Result, SbdiError};
pub use mem::MemoryPio;
pub use merkle::{Hash, Merkle};
pub use pio::Pio;
