//! Crypto capability (component C1).
//!
//! One interface, four implementations selected by the header's cipher
//! kind. Per spec §4.1, `aad` is always `(physical_index || block_counter)`
//! so a replayed or relocated block fails authentication, and there is no
//! random IV anywhere in this layer — freshness comes entirely from the
//! monotonic block counter.
//!
//! Dispatch is value-based, not dynamic: [`CipherKind`] is a closed
//! four-variant tag and [`Cipher`] matches on it directly, per the design
//! note in spec §9 ("Plugin dispatch ... model as a tagged variant with a
//! fixed capability interface, not dynamic discovery").

mod hmac_cipher;
mod none;
mod ocb;
mod siv;

use byteorder::{LittleEndian, WriteBytesExt};

use crate::error::{Result, SbdiError};

/// Maximum size, in bytes, of any data key this crate will ever generate or
/// accept from a header. Sized for the largest key in use (AES-256-SIV,
/// which needs a double-length 64-byte key).
pub const MAX_DATA_KEY_SIZE: usize = 64;

/// Tag size used uniformly across cipher kinds, per spec §3 (`T`).
pub const TAG_SIZE: usize = 16;

/// Which symmetric primitive is sealing data and management blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherKind {
    /// Pass-through: no confidentiality, no integrity at this layer.
    None,
    /// AES-SIV: deterministic, nonce-misuse-resistant AEAD.
    Siv,
    /// AES-OCB3: single-pass AEAD.
    Ocb,
    /// Plaintext-in-the-clear with a detached HMAC-SHA256 tag.
    Hmac,
}

impl CipherKind {
    /// Decode a cipher kind from its on-disk tag.
    pub fn from_tag(tag: u32) -> Result<Self> {
        match tag {
            0 => Ok(CipherKind::None),
            1 => Ok(CipherKind::Siv),
            2 => Ok(CipherKind::Ocb),
            3 => Ok(CipherKind::Hmac),
            _ => Err(SbdiError::Unsupported),
        }
    }

    /// Encode this cipher kind to its on-disk tag.
    #[must_use]
    pub fn to_tag(self) -> u32 {
        match self {
            CipherKind::None => 0,
            CipherKind::Siv => 1,
            CipherKind::Ocb => 2,
            CipherKind::Hmac => 3,
        }
    }

    /// Size in bytes of the data key this cipher kind needs.
    #[must_use]
    pub fn key_size(self) -> usize {
        match self {
            CipherKind::None => 0,
            CipherKind::Siv => 64,
            CipherKind::Ocb => 32,
            CipherKind::Hmac => 32,
        }
    }
}

/// Build the associated data bound into every block's authentication tag:
/// `physical_index || block_counter`, both little-endian, per spec §4.1.
pub(crate) fn block_aad(phy: u32, counter: u128) -> Vec<u8> {
    let mut aad = Vec::with_capacity(4 + 16);
    aad.write_u32::<LittleEndian>(phy).expect("vec write cannot fail");
    aad.write_u128::<LittleEndian>(counter).expect("vec write cannot fail");
    aad
}

/// The block-level authenticated-encryption contract every cipher kind
/// implements.
pub trait Capability {
    /// Seal `plaintext` for physical block `phy` at counter `block_ctr`.
    /// Returns `(ciphertext, tag)`, both fixed-size.
    fn encrypt(&self, phy: u32, block_ctr: u128, plaintext: &[u8]) -> Result<(Vec<u8>, [u8; TAG_SIZE])>;

    /// Open `ciphertext` for physical block `phy` at counter `block_ctr`,
    /// checking it against `tag`. `SbdiError::TagMismatch` on failure.
    fn decrypt(&self, phy: u32, block_ctr: u128, ciphertext: &[u8], tag: &[u8; TAG_SIZE]) -> Result<Vec<u8>>;

    /// Overwrite any retained key material.
    fn destroy(&mut self);
}

/// Value-based dispatch over the four supported cipher kinds.
#[derive(Debug)]
pub enum Cipher {
    /// See [`CipherKind::None`].
    None(none::NoneCapability),
    /// See [`CipherKind::Siv`].
    Siv(siv::SivCapability),
    /// See [`CipherKind::Ocb`].
    Ocb(ocb::OcbCapability),
    /// See [`CipherKind::Hmac`].
    Hmac(hmac_cipher::HmacCapability),
}

impl Cipher {
    /// Construct the capability for `kind` from previously-unwrapped key
    /// bytes (read from the header).
    pub fn from_key_bytes(kind: CipherKind, key: &[u8]) -> Result<Self> {
        match kind {
            CipherKind::None => Ok(Cipher::None(none::NoneCapability::new())),
            CipherKind::Siv => Ok(Cipher::Siv(siv::SivCapability::new(key)?)),
            CipherKind::Ocb => Ok(Cipher::Ocb(ocb::OcbCapability::new(key)?)),
            CipherKind::Hmac => Ok(Cipher::Hmac(hmac_cipher::HmacCapability::new(key)?)),
        }
    }

    /// Generate a fresh capability of `kind` from random seed material
    /// supplied by `pio.genseed` (spec §4.4).
    pub fn generate(kind: CipherKind, seed: &[u8]) -> Result<Self> {
        let key = &seed[..kind.key_size().min(seed.len())];
        Self::from_key_bytes(kind, key)
    }

    /// Which kind this capability implements.
    #[must_use]
    pub fn kind(&self) -> CipherKind {
        match self {
            Cipher::None(_) => CipherKind::None,
            Cipher::Siv(_) => CipherKind::Siv,
            Cipher::Ocb(_) => CipherKind::Ocb,
            Cipher::Hmac(_) => CipherKind::Hmac,
        }
    }

    /// Raw key bytes, for wrapping into the header on write. Empty for
    /// [`CipherKind::None`].
    #[must_use]
    pub fn key_bytes(&self) -> &[u8] {
        match self {
            Cipher::None(c) => c.key_bytes(),
            Cipher::Siv(c) => c.key_bytes(),
            Cipher::Ocb(c) => c.key_bytes(),
            Cipher::Hmac(c) => c.key_bytes(),
        }
    }
}

impl Capability for Cipher {
    fn encrypt(&self, phy: u32, block_ctr: u128, plaintext: &[u8]) -> Result<(Vec<u8>, [u8; TAG_SIZE])> {
        match self {
            Cipher::None(c) => c.encrypt(phy, block_ctr, plaintext),
            Cipher::Siv(c) => c.encrypt(phy, block_ctr, plaintext),
            Cipher::Ocb(c) => c.encrypt(phy, block_ctr, plaintext),
            Cipher::Hmac(c) => c.encrypt(phy, block_ctr, plaintext),
        }
    }

    fn decrypt(&self, phy: u32, block_ctr: u128, ciphertext: &[u8], tag: &[u8; TAG_SIZE]) -> Result<Vec<u8>> {
        match self {
            Cipher::None(c) => c.decrypt(phy, block_ctr, ciphertext, tag),
            Cipher::Siv(c) => c.decrypt(phy, block_ctr, ciphertext, tag),
            Cipher::Ocb(c) => c.decrypt(phy, block_ctr, ciphertext, tag),
            Cipher::Hmac(c) => c.decrypt(phy, block_ctr, ciphertext, tag),
        }
    }

    fn destroy(&mut self) {
        match self {
            Cipher::None(c) => c.destroy(),
            Cipher::Siv(c) => c.destroy(),
            Cipher::Ocb(c) => c.destroy(),
            Cipher::Hmac(c) => c.destroy(),
        }
    }
}

impl Drop for Cipher {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// The master-key context sealing the header block (spec §4.4). Always
/// AES-SIV regardless of the data cipher kind chosen for this device,
/// mirroring `sbdi_open`'s unconditional `siv_init(&mctx, mkey, SIV_256)` in
/// `original_source/src/sbdi.c`.
#[derive(Debug)]
pub struct MasterKeyContext {
    inner: siv::SivCapability,
}

impl MasterKeyContext {
    /// Derive a master-key sealing context from the caller-supplied master
    /// key. Stack-allocated by every caller and scrubbed before return on
    /// every path, per spec §5.
    pub fn new(master_key: &[u8]) -> Result<Self> {
        let derived = blake3::derive_key("sbdi header v1 master key", master_key);
        Ok(Self {
            inner: siv::SivCapability::new(&derived)?,
        })
    }

    /// Seal the header plaintext. `aad` binds the header to physical block
    /// 0 so a relocated header fails authentication.
    pub fn seal(&self, plaintext: &[u8]) -> Result<(Vec<u8>, [u8; TAG_SIZE])> {
        self.inner.encrypt(0, 0, plaintext)
    }

    /// Open a previously-sealed header.
    pub fn open(&self, ciphertext: &[u8], tag: &[u8; TAG_SIZE]) -> Result<Vec<u8>> {
        self.inner.decrypt(0, 0, ciphertext, tag)
    }
}

impl Drop for MasterKeyContext {
    fn drop(&mut self) {
        self.inner.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cipher_kind_tag_roundtrip() {
        for kind in [CipherKind::None, CipherKind::Siv, CipherKind::Ocb, CipherKind::Hmac] {
            assert_eq!(CipherKind::from_tag(kind.to_tag()).unwrap(), kind);
        }
    }

    #[test]
    fn unknown_tag_is_unsupported() {
        assert!(matches!(CipherKind::from_tag(99), Err(SbdiError::Unsupported)));
    }

    #[test]
    fn master_key_context_seals_and_opens() {
        let mctx = MasterKeyContext::new(b"a very secret master key").unwrap();
        let plaintext = b"header plaintext bytes";
        let (ct, tag) = mctx.seal(plaintext).unwrap();
        let pt2 = mctx.open(&ct, &tag).unwrap();
        assert_eq!(pt2, plaintext);
    }

    #[test]
    fn master_key_context_rejects_wrong_key() {
        let mctx1 = MasterKeyContext::new(b"key one").unwrap();
        let mctx2 = MasterKeyContext::new(b"key two").unwrap();
        let (ct, tag) = mctx1.seal(b"secret").unwrap();
        assert!(mctx2.open(&ct, &tag).is_err());
    }
}
