//! The `None` capability: pass-through, no confidentiality or integrity at
//! this layer. Present for completeness and testing, not recommended for
//! anything that needs the guarantees described in spec §1.

use super::{Capability, TAG_SIZE};
use crate::error::Result;

#[derive(Debug, Default)]
pub struct NoneCapability;

impl NoneCapability {
    pub fn new() -> Self {
        Self
    }

    pub fn key_bytes(&self) -> &[u8] {
        &[]
    }
}

impl Capability for NoneCapability {
    fn encrypt(&self, _phy: u32, _block_ctr: u128, plaintext: &[u8]) -> Result<(Vec<u8>, [u8; TAG_SIZE])> {
        Ok((plaintext.to_vec(), [0u8; TAG_SIZE]))
    }

    fn decrypt(&self, _phy: u32, _block_ctr: u128, ciphertext: &[u8], _tag: &[u8; TAG_SIZE]) -> Result<Vec<u8>> {
        Ok(ciphertext.to_vec())
    }

    fn destroy(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_a_pure_pass_through() {
        let cap = NoneCapability::new();
        let (ct, tag) = cap.encrypt(0, 0, b"plain").unwrap();
        assert_eq!(ct, b"plain");
        let pt = cap.decrypt(0, 0, &ct, &tag).unwrap();
        assert_eq!(pt, b"plain");
    }
}
