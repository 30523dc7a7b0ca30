#![cfg_attr(test, allow(dead_code))]

use sbdi::{CipherKind, Hash, MemoryPio};

pub fn storage_memory() -> MemoryPio {
    MemoryPio::seeded([0u8; 32])
}

pub fn default_cipher() -> CipherKind {
    CipherKind::Siv
}

pub fn empty_root() -> Hash {
    Hash::empty_root()
}
