//! AES-OCB3 capability: single-pass AEAD.
//!
//! Unlike SIV, OCB is not misuse-resistant under a repeated nonce — but this
//! layer never reuses a nonce for a given key, because the nonce here is
//! derived from the block counter, which strictly increases on every
//! successful write of that block (spec §3).

use aead::{Aead, KeyInit, Payload};
use ocb3::Ocb3;
use aes::Aes256;
use zeroize::Zeroize;

use super::{block_aad, Capability, TAG_SIZE};
use crate::error::{Result, SbdiError};

type Ocb3Aes256 = Ocb3<Aes256, typenum::U16>;

#[derive(Debug)]
pub struct OcbCapability {
    key: Vec<u8>,
    cipher: Ocb3Aes256,
}

impl OcbCapability {
    pub fn new(key: &[u8]) -> Result<Self> {
        if key.len() != 32 {
            return Err(SbdiError::CryptoInit("AES-OCB3 key must be 32 bytes"));
        }
        let cipher = Ocb3Aes256::new_from_slice(key)
            .map_err(|_| SbdiError::CryptoInit("invalid AES-OCB3 key material"))?;
        Ok(Self {
            key: key.to_vec(),
            cipher,
        })
    }

    pub fn key_bytes(&self) -> &[u8] {
        &self.key
    }

    /// The counter, truncated/zero-extended to the cipher's 16-byte nonce,
    /// doubling as the per-block freshness input OCB needs.
    fn nonce_from_counter(block_ctr: u128) -> [u8; 16] {
        block_ctr.to_le_bytes()
    }
}

impl Capability for OcbCapability {
    fn encrypt(&self, phy: u32, block_ctr: u128, plaintext: &[u8]) -> Result<(Vec<u8>, [u8; TAG_SIZE])> {
        let aad = block_aad(phy, block_ctr);
        let nonce = Self::nonce_from_counter(block_ctr);
        let sealed = self
            .cipher
            .encrypt(
                (&nonce).into(),
                Payload {
                    msg: plaintext,
                    aad: &aad,
                },
            )
            .map_err(|_| SbdiError::CryptoFail("AES-OCB3 encryption failed"))?;
        if sealed.len() < TAG_SIZE {
            return Err(SbdiError::CryptoFail("AES-OCB3 output shorter than tag size"));
        }
        let (ciphertext, tag_bytes) = sealed.split_at(sealed.len() - TAG_SIZE);
        let mut tag = [0u8; TAG_SIZE];
        tag.copy_from_slice(tag_bytes);
        Ok((ciphertext.to_vec(), tag))
    }

    fn decrypt(&self, phy: u32, block_ctr: u128, ciphertext: &[u8], tag: &[u8; TAG_SIZE]) -> Result<Vec<u8>> {
        let aad = block_aad(phy, block_ctr);
        let nonce = Self::nonce_from_counter(block_ctr);
        let mut sealed = Vec::with_capacity(ciphertext.len() + TAG_SIZE);
        sealed.extend_from_slice(ciphertext);
        sealed.extend_from_slice(tag);
        self.cipher
            .decrypt(
                (&nonce).into(),
                Payload {
                    msg: &sealed,
                    aad: &aad,
                },
            )
            .map_err(|_| SbdiError::TagMismatch { phy })
    }

    fn destroy(&mut self) {
        self.key.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> Vec<u8> {
        (0u8..32).collect()
    }

    #[test]
    fn round_trip() {
        let cap = OcbCapability::new(&key()).unwrap();
        let (ct, tag) = cap.encrypt(5, 1, b"management block payload").unwrap();
        let pt = cap.decrypt(5, 1, &ct, &tag).unwrap();
        assert_eq!(pt, b"management block payload");
    }

    #[test]
    fn tampered_ciphertext_fails_authentication() {
        let cap = OcbCapability::new(&key()).unwrap();
        let (mut ct, tag) = cap.encrypt(5, 1, b"payload").unwrap();
        ct[0] ^= 0xff;
        assert!(matches!(
            cap.decrypt(5, 1, &ct, &tag),
            Err(SbdiError::TagMismatch { phy: 5 })
        ));
    }
}
