//! Merkle tree over management-block tags (component C3).
//!
//! This is *not* the append-only `merkle_tree_stream` flat-tree scheme: the
//! spec requires leaves to be replaced in place as management blocks are
//! re-sealed (§4.3 `update`), so the tree here is a conventional growable
//! binary hash tree keyed by leaf index, built the way
//! [`crate::hash`]-style domain-separated hashing is built in the teacher
//! crate this was adapted from, generalized with an `update` the original
//! stream design does not support.

use blake3::Hasher;

use crate::error::{Result, SbdiError};

const HASH_LEN: usize = 32;

// Domain separation tags, carried over from the teacher's hashing scheme to
// defend against the same second-preimage attack
// (https://en.wikipedia.org/wiki/Merkle_tree#Second_preimage_attack).
const LEAF_TYPE: u8 = 0x00;
const PARENT_TYPE: u8 = 0x01;
const EMPTY_TYPE: u8 = 0x02;

/// A 32-byte `BLAKE3` hash, either a Merkle leaf or an internal node value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hash([u8; HASH_LEN]);

impl Hash {
    /// Wrap an externally-computed management-block tag as a leaf hash.
    #[must_use]
    pub fn from_leaf(tag: &[u8]) -> Self {
        let mut hasher = Hasher::new();
        hasher.update(&[LEAF_TYPE]);
        hasher.update(tag);
        Self(*hasher.finalize().as_bytes())
    }

    /// Combine two child hashes into their parent.
    #[must_use]
    pub fn from_children(left: &Hash, right: &Hash) -> Self {
        let mut hasher = Hasher::new();
        hasher.update(&[PARENT_TYPE]);
        hasher.update(&left.0);
        hasher.update(&right.0);
        Self(*hasher.finalize().as_bytes())
    }

    /// The sentinel root of an empty tree, distinct from any leaf or
    /// internal-node hash by construction (domain-separated tag byte).
    #[must_use]
    pub fn empty_root() -> Self {
        let mut hasher = Hasher::new();
        hasher.update(&[EMPTY_TYPE]);
        Self(*hasher.finalize().as_bytes())
    }

    /// Byte view of this hash.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    /// Reconstruct a `Hash` from raw bytes (e.g. a caller-supplied expected
    /// root).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; HASH_LEN] = bytes
            .try_into()
            .map_err(|_| SbdiError::IllegalParam("hash must be exactly 32 bytes"))?;
        Ok(Self(arr))
    }
}

/// Growable binary hash tree over management-block tags.
///
/// `add` appends a new leaf (a management block's first seal); `update`
/// replaces an existing leaf (every subsequent seal). The tree never
/// shrinks. Internal levels are rebuilt lazily on `root()`, matching the
/// spec's "recomputed lazily but must be consistent before root() returns".
#[derive(Debug, Clone, Default)]
pub struct Merkle {
    leaves: Vec<Hash>,
    cached_root: Option<Hash>,
}

impl Merkle {
    /// A fresh, empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a tree from a previously-persisted set of leaves, in index
    /// order.
    #[must_use]
    pub fn from_leaves(leaves: Vec<Hash>) -> Self {
        Self {
            leaves,
            cached_root: None,
        }
    }

    /// Number of leaves (management blocks) currently tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    /// Whether the tree has no leaves yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// All leaves in index order (used when persisting tree state).
    #[must_use]
    pub fn leaves(&self) -> &[Hash] {
        &self.leaves
    }

    /// Append a new leaf, extending the tree on the right. Returns its
    /// index.
    pub fn add(&mut self, leaf: Hash) -> usize {
        self.leaves.push(leaf);
        self.cached_root = None;
        self.leaves.len() - 1
    }

    /// Replace an existing leaf and invalidate the cached root so the path
    /// to the root is recomputed on the next [`Merkle::root`] call.
    pub fn update(&mut self, index: usize, leaf: Hash) -> Result<()> {
        let slot = self
            .leaves
            .get_mut(index)
            .ok_or(SbdiError::IllegalParam("merkle leaf index out of range"))?;
        *slot = leaf;
        self.cached_root = None;
        Ok(())
    }

    /// Materialize the current root, recomputing from the leaves if the
    /// cache was invalidated by a prior `add`/`update`.
    pub fn root(&mut self) -> Hash {
        if let Some(root) = self.cached_root {
            return root;
        }
        let root = Self::reduce(&self.leaves);
        self.cached_root = Some(root);
        root
    }

    /// Check the current root against a caller-supplied expected root.
    pub fn verify_against(&mut self, expected: &Hash) -> Result<()> {
        if self.root() == *expected {
            Ok(())
        } else {
            Err(SbdiError::RootMismatch)
        }
    }

    fn reduce(leaves: &[Hash]) -> Hash {
        if leaves.is_empty() {
            return Hash::empty_root();
        }
        let mut level = leaves.to_vec();
        while level.len() > 1 {
            let mut next = Vec::with_capacity(level.len().div_ceil(2));
            let mut it = level.chunks(2);
            while let Some(pair) = it.next() {
                let parent = match pair {
                    [l, r] => Hash::from_children(l, r),
                    // Odd node out: carried forward by pairing with itself,
                    // a standard technique for unbalanced Merkle trees.
                    [l] => Hash::from_children(l, l),
                    _ => unreachable!(),
                };
                next.push(parent);
            }
            level = next;
        }
        level[0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_tree_has_sentinel_root() {
        let mut m = Merkle::new();
        assert_eq!(m.root(), Hash::empty_root());
        assert_ne!(m.root(), Hash::from_leaf(b""));
    }

    #[test]
    fn add_changes_root() {
        let mut m = Merkle::new();
        let r0 = m.root();
        m.add(Hash::from_leaf(b"tag-a"));
        assert_ne!(m.root(), r0);
    }

    #[test]
    fn update_changes_root_deterministically() {
        let mut a = Merkle::new();
        a.add(Hash::from_leaf(b"tag-a"));
        a.add(Hash::from_leaf(b"tag-b"));
        a.add(Hash::from_leaf(b"tag-c"));

        let mut b = a.clone();
        let r_before = a.root();

        a.update(1, Hash::from_leaf(b"tag-b-resealed")).unwrap();
        assert_ne!(a.root(), r_before);

        b.update(1, Hash::from_leaf(b"tag-b-resealed")).unwrap();
        assert_eq!(a.root(), b.root());
    }

    #[test]
    fn update_out_of_range_is_illegal_param() {
        let mut m = Merkle::new();
        m.add(Hash::from_leaf(b"tag-a"));
        assert!(matches!(
            m.update(5, Hash::from_leaf(b"x")),
            Err(SbdiError::IllegalParam(_))
        ));
    }

    #[test]
    fn verify_against_detects_tamper() {
        let mut m = Merkle::new();
        m.add(Hash::from_leaf(b"tag-a"));
        m.add(Hash::from_leaf(b"tag-b"));
        let good_root = m.root();
        assert!(m.verify_against(&good_root).is_ok());

        m.update(0, Hash::from_leaf(b"tampered")).unwrap();
        assert!(matches!(
            m.verify_against(&good_root),
            Err(SbdiError::RootMismatch)
        ));
    }

    #[test]
    fn round_trip_from_leaves() {
        let mut m = Merkle::new();
        m.add(Hash::from_leaf(b"tag-a"));
        m.add(Hash::from_leaf(b"tag-b"));
        m.add(Hash::from_leaf(b"tag-c"));
        let root = m.root();

        let mut restored = Merkle::from_leaves(m.leaves().to_vec());
        assert_eq!(restored.root(), root);
    }

    #[test]
    fn odd_leaf_count_does_not_panic() {
        let mut m = Merkle::new();
        for i in 0..7u8 {
            m.add(Hash::from_leaf(&[i]));
        }
        let _ = m.root();
    }
}
