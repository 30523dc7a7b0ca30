//! HMAC capability: plaintext stays in the clear, integrity only.
//!
//! Per spec §4.1: "the `HMAC` variant leaves plaintext in the clear and
//! stores a MAC." Confidentiality is explicitly out of scope for this
//! cipher kind; callers that select it are choosing integrity-only storage.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use super::{block_aad, Capability, TAG_SIZE};
use crate::error::{Result, SbdiError};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug)]
pub struct HmacCapability {
    key: Vec<u8>,
}

impl HmacCapability {
    pub fn new(key: &[u8]) -> Result<Self> {
        if key.len() != 32 {
            return Err(SbdiError::CryptoInit("HMAC key must be 32 bytes"));
        }
        Ok(Self { key: key.to_vec() })
    }

    pub fn key_bytes(&self) -> &[u8] {
        &self.key
    }

    fn mac(&self, phy: u32, block_ctr: u128, data: &[u8]) -> Result<[u8; TAG_SIZE]> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|_| SbdiError::CryptoInit("invalid HMAC key length"))?;
        mac.update(&block_aad(phy, block_ctr));
        mac.update(data);
        let full = mac.finalize().into_bytes();
        let mut tag = [0u8; TAG_SIZE];
        tag.copy_from_slice(&full[..TAG_SIZE]);
        Ok(tag)
    }
}

impl Capability for HmacCapability {
    fn encrypt(&self, phy: u32, block_ctr: u128, plaintext: &[u8]) -> Result<(Vec<u8>, [u8; TAG_SIZE])> {
        let tag = self.mac(phy, block_ctr, plaintext)?;
        Ok((plaintext.to_vec(), tag))
    }

    fn decrypt(&self, phy: u32, block_ctr: u128, ciphertext: &[u8], tag: &[u8; TAG_SIZE]) -> Result<Vec<u8>> {
        let expected = self.mac(phy, block_ctr, ciphertext)?;
        if expected.ct_eq(tag).into() {
            Ok(ciphertext.to_vec())
        } else {
            Err(SbdiError::TagMismatch { phy })
        }
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
    fn round_trip_leaves_plaintext_unchanged() {
        let cap = HmacCapability::new(&key()).unwrap();
        let (ct, tag) = cap.encrypt(2, 9, b"in the clear").unwrap();
        assert_eq!(ct, b"in the clear");
        let pt = cap.decrypt(2, 9, &ct, &tag).unwrap();
        assert_eq!(pt, b"in the clear");
    }

    #[test]
    fn tampered_data_fails_mac() {
        let cap = HmacCapability::new(&key()).unwrap();
        let (mut ct, tag) = cap.encrypt(2, 9, b"in the clear").unwrap();
        ct[0] = b'I';
        assert!(matches!(
            cap.decrypt(2, 9, &ct, &tag),
            Err(SbdiError::TagMismatch { phy: 2 })
        ));
    }
}
