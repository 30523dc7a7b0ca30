//! End-to-end scenarios from spec §8, driven entirely through the public
//! `sbdi` API (no access to crate-internal types), the way the teacher's
//! `datacore/tests/core.rs` exercises `Core` from the outside.

mod common;

use common::{default_cipher, empty_root, storage_memory};
use sbdi::{Handle, Params, SbdiError, Whence};

/// Physical indices for a logical data block, per the address calculus in
/// spec §3 (`ldp`/`lmp`). A real caller never needs this — only a test that
/// wants to poke the raw backing store to simulate an untrusted medium does.
fn phy_indices(params: &Params, logical: u32) -> (u32, u32) {
    let f = params.fan_out();
    let group = logical / f;
    let mng = 1 + group * (f + 1);
    let dat = mng + 1 + (logical % f);
    (mng, dat)
}

#[test]
fn fresh_device_syncs_to_the_empty_sentinel_root() {
    let mut dev = Handle::open(storage_memory(), default_cipher(), b"master key", &empty_root()).unwrap();
    assert_eq!(dev.size(), 0);
    let root = dev.sync(b"master key").unwrap();
    assert_eq!(root, empty_root());
}

#[test]
fn single_block_write_round_trips_through_a_reopen() {
    let mut dev = Handle::open(storage_memory(), default_cipher(), b"master key", &empty_root()).unwrap();

    let payload: Vec<u8> = (1u8..=17).collect();
    let (n, r) = dev.pwrite(&payload, payload.len(), 0);
    r.unwrap();
    assert_eq!(n, 17);

    let root = dev.sync(b"master key").unwrap();
    let pio = std::mem::replace(dev.pio_mut(), storage_memory());

    let mut reopened = Handle::open(pio, default_cipher(), b"master key", &root).unwrap();
    let mut out = vec![0u8; 17];
    let (n, r) = reopened.pread(&mut out, 17, 0);
    r.unwrap();
    assert_eq!(n, 17);
    assert_eq!(out, payload);
}

#[test]
fn cross_block_boundary_write_spans_exactly_two_logical_blocks() {
    let block_size = 4096u64;
    let mut dev = Handle::open(storage_memory(), default_cipher(), b"master key", &empty_root()).unwrap();

    let payload = vec![0x7Au8; 20];
    let offset = block_size - 6;
    let (n, r) = dev.pwrite(&payload, payload.len(), offset);
    r.unwrap();
    assert_eq!(n, 20);
    assert_eq!(dev.size(), offset + 20);
    assert_eq!(dev.size(), 4110);

    let root = dev.sync(b"master key").unwrap();
    let pio = std::mem::replace(dev.pio_mut(), storage_memory());

    let mut reopened = Handle::open(pio, default_cipher(), b"master key", &root).unwrap();
    let mut out = vec![0u8; 20];
    let (n, r) = reopened.pread(&mut out, 20, offset);
    r.unwrap();
    assert_eq!(n, 20);
    assert_eq!(out, payload);
}

#[test]
fn tampering_with_a_data_block_is_caught_on_the_next_read_not_at_open() {
    let mut dev = Handle::open(storage_memory(), default_cipher(), b"master key", &empty_root()).unwrap();
    dev.pwrite(&[1, 2, 3], 3, 0).1.unwrap();
    let root = dev.sync(b"master key").unwrap();

    // Flip a byte in the ciphertext of logical data block 0 directly, as if
    // an untrusted backing store had corrupted it in place.
    let (_, pdat) = phy_indices(&Params::default(), 0);
    dev.pio_mut().corrupt(pdat, 0);

    let pio = std::mem::replace(dev.pio_mut(), storage_memory());
    // verify_block_layer only walks management blocks, so open still
    // succeeds: the root over management-block tags is untouched.
    let mut reopened = Handle::open(pio, default_cipher(), b"master key", &root).unwrap();
    assert!(!reopened.is_poisoned());

    let mut out = vec![0u8; 3];
    let (_, r) = reopened.pread(&mut out, 3, 0);
    assert!(matches!(r, Err(SbdiError::TagMismatch { .. })));
    assert!(reopened.is_poisoned());
}

#[test]
fn rolling_back_a_management_block_to_a_stale_root_fails_open() {
    let mut dev = Handle::open(storage_memory(), default_cipher(), b"master key", &empty_root()).unwrap();
    dev.pwrite(&[1, 2, 3], 3, 0).1.unwrap();
    let root1 = dev.sync(b"master key").unwrap();
    let (pmng, _) = phy_indices(&Params::default(), 0);
    let stale_mng = dev.pio_mut().snapshot(pmng).unwrap();

    dev.pwrite(&[4, 5, 6], 3, 4096).1.unwrap();
    let root2 = dev.sync(b"master key").unwrap();
    assert_ne!(root1, root2);

    dev.pio_mut().replace_block(pmng, stale_mng);
    let pio = std::mem::replace(dev.pio_mut(), storage_memory());

    // Reopening with the *latest* anchor must fail: the management block on
    // disk was rolled back to its root1-era bytes, so it replays to root1,
    // not root2.
    let result = Handle::open(pio, default_cipher(), b"master key", &root2);
    assert!(matches!(result, Err(SbdiError::RootMismatch)));
}

#[test]
fn wrong_master_key_fails_with_crypto_fail_and_leaks_no_handle() {
    let mut dev = Handle::open(storage_memory(), default_cipher(), b"correct key", &empty_root()).unwrap();
    dev.pwrite(b"data", 4, 0).1.unwrap();
    let root = dev.sync(b"correct key").unwrap();
    let pio = std::mem::replace(dev.pio_mut(), storage_memory());

    let result = Handle::open(pio, default_cipher(), b"wrong key", &root);
    assert!(result.is_err());
}

#[test]
fn zero_length_io_is_a_no_op() {
    let mut dev = Handle::open(storage_memory(), default_cipher(), b"master key", &empty_root()).unwrap();
    let mut out = vec![0xAAu8; 4];
    let (n, r) = dev.pread(&mut out, 0, 0);
    r.unwrap();
    assert_eq!(n, 0);
    assert_eq!(out, vec![0xAAu8; 4]);

    let (n, r) = dev.pwrite(b"unused", 0, 0);
    r.unwrap();
    assert_eq!(n, 0);
    assert_eq!(dev.size(), 0);
}

#[test]
fn reads_at_or_past_size_return_zero_bytes() {
    let mut dev = Handle::open(storage_memory(), default_cipher(), b"master key", &empty_root()).unwrap();
    dev.pwrite(b"hi", 2, 0).1.unwrap();

    let mut out = vec![0xFFu8; 4];
    let (n, r) = dev.pread(&mut out, 4, 2);
    r.unwrap();
    assert_eq!(n, 0);
    assert_eq!(out, vec![0xFFu8; 4]);
}

#[test]
fn lseek_composes_with_read_the_same_as_pread() {
    let mut dev = Handle::open(storage_memory(), default_cipher(), b"master key", &empty_root()).unwrap();
    let payload = b"abcdef".to_vec();
    dev.write(&payload, payload.len()).1.unwrap();

    dev.lseek(0, Whence::Set).unwrap();
    let mut via_seek = vec![0u8; 6];
    let (n, r) = dev.read(&mut via_seek, 6);
    r.unwrap();
    assert_eq!(n, 6);
    assert_eq!(dev.cursor(), 6);

    let mut via_pread = vec![0u8; 6];
    let (n, r) = dev.pread(&mut via_pread, 6, 0);
    r.unwrap();
    assert_eq!(n, 6);
    assert_eq!(via_seek, via_pread);
}

#[test]
fn idempotent_sync_without_intervening_writes_returns_the_same_root() {
    let mut dev = Handle::open(storage_memory(), default_cipher(), b"master key", &empty_root()).unwrap();
    dev.pwrite(b"stable", 6, 0).1.unwrap();
    let root1 = dev.sync(b"master key").unwrap();
    let root2 = dev.sync(b"master key").unwrap();
    assert_eq!(root1, root2);
}
