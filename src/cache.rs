//! Block cache (component C5): fixed-capacity, write-back, with a
//! per-entry dirty-dependency graph.
//!
//! Cyclic ownership between data and management blocks is resolved the way
//! spec §9 prescribes: an arena-style cache indexed by physical block
//! number, where entries hold indices (`u32` physical addresses) rather
//! than back-owning pointers to each other.
//!
//! Dependency direction: an entry's `deps` are the physical indices that
//! must already be clean (flushed) before *this* entry may flush. Spec
//! §4.6 step 5 reads, taken literally, as attaching the dependency the
//! other way round ("mark the data block dirty with dependency
//! {management block}"); that reading contradicts §4.5's explicit flush
//! order ("data blocks first, then their management blocks, then the
//! header") and the crash-consistency requirement of §5 — a management
//! block's tag must never reach disk before the data it authenticates. This
//! implementation resolves the ambiguity in favor of the unambiguous,
//! testable ordering statement: data blocks carry no dependency and flush
//! first; management blocks depend on the data blocks they cover.

use std::collections::{BTreeSet, HashMap};

use crate::error::{Result, SbdiError};

/// What an entry's physical index addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// A data block.
    Data,
    /// A management block.
    Management,
}

/// Callback the cache uses to durably flush one entry. Implemented by the
/// block layer, which alone holds the crypto capability needed to seal a
/// block before writing it.
pub trait Flusher {
    /// Seal and write `plaintext` for physical block `phy` of kind `kind`.
    fn flush_one(&mut self, phy: u32, kind: Kind, plaintext: &[u8]) -> Result<()>;
}

#[derive(Debug)]
struct Entry {
    kind: Kind,
    data: Vec<u8>,
    dirty: bool,
    deps: BTreeSet<u32>,
    last_used: u64,
}

/// Fixed-capacity write-back cache of block-layer entries.
#[derive(Debug)]
pub struct Cache {
    capacity: usize,
    entries: HashMap<u32, Entry>,
    clock: u64,
}

impl Cache {
    /// Create an empty cache that holds at most `capacity` entries at once.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "cache capacity must be positive");
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
            clock: 0,
        }
    }

    /// Look up a resident entry's plaintext, bumping its recency.
    pub fn get(&mut self, phy: u32) -> Option<&[u8]> {
        self.clock += 1;
        let clock = self.clock;
        if let Some(entry) = self.entries.get_mut(&phy) {
            entry.last_used = clock;
            Some(entry.data.as_slice())
        } else {
            None
        }
    }

    /// Whether `phy` is resident.
    #[must_use]
    pub fn contains(&self, phy: u32) -> bool {
        self.entries.contains_key(&phy)
    }

    /// Insert a freshly-loaded, clean block, evicting per policy if the
    /// cache is at capacity.
    pub fn load(&mut self, phy: u32, kind: Kind, data: Vec<u8>, flusher: &mut dyn Flusher) -> Result<()> {
        self.make_room(flusher)?;
        self.clock += 1;
        self.entries.insert(
            phy,
            Entry {
                kind,
                data,
                dirty: false,
                deps: BTreeSet::new(),
                last_used: self.clock,
            },
        );
        Ok(())
    }

    /// Update a resident entry's contents and mark it dirty, declaring the
    /// set of physical indices that must flush no later than this one.
    pub fn mark_dirty(&mut self, phy: u32, data: Vec<u8>, deps: impl IntoIterator<Item = u32>) -> Result<()> {
        let entry = self
            .entries
            .get_mut(&phy)
            .ok_or(SbdiError::IllegalParam("mark_dirty on a non-resident block"))?;
        entry.data = data;
        entry.dirty = true;
        entry.deps.extend(deps);
        Ok(())
    }

    /// Drain every dirty entry, respecting dependency order, via `flusher`.
    pub fn sync(&mut self, flusher: &mut dyn Flusher) -> Result<()> {
        loop {
            let Some(phy) = self.next_flushable_dirty() else {
                break;
            };
            self.flush(phy, flusher)?;
        }
        Ok(())
    }

    fn make_room(&mut self, flusher: &mut dyn Flusher) -> Result<()> {
        while self.entries.len() >= self.capacity {
            if let Some(victim) = self.lru_clean() {
                tracing::debug!(phy = victim, "evicting clean cache entry");
                self.entries.remove(&victim);
                continue;
            }
            let Some(victim) = self.next_flushable_dirty() else {
                return Err(SbdiError::IllegalParam(
                    "cache full of dirty entries with unsatisfied dependencies",
                ));
            };
            tracing::debug!(phy = victim, "flushing dirty cache entry to make room");
            self.flush(victim, flusher)?;
            self.entries.remove(&victim);
        }
        Ok(())
    }

    fn lru_clean(&self) -> Option<u32> {
        self.entries
            .iter()
            .filter(|(_, e)| !e.dirty)
            .min_by_key(|(_, e)| e.last_used)
            .map(|(&phy, _)| phy)
    }

    /// The least-recently-used dirty entry whose declared dependencies are
    /// all either absent from the cache or already clean.
    fn next_flushable_dirty(&self) -> Option<u32> {
        self.entries
            .iter()
            .filter(|(_, e)| e.dirty && self.deps_satisfied(e))
            .min_by_key(|(_, e)| e.last_used)
            .map(|(&phy, _)| phy)
    }

    fn deps_satisfied(&self, entry: &Entry) -> bool {
        entry
            .deps
            .iter()
            .all(|dep| self.entries.get(dep).map(|d| !d.dirty).unwrap_or(true))
    }

    fn flush(&mut self, phy: u32, flusher: &mut dyn Flusher) -> Result<()> {
        let (kind, data) = {
            let entry = self
                .entries
                .get(&phy)
                .expect("flush target must be resident");
            (entry.kind, entry.data.clone())
        };
        flusher.flush_one(phy, kind, &data)?;
        if let Some(entry) = self.entries.get_mut(&phy) {
            entry.dirty = false;
            entry.deps.clear();
        }
        Ok(())
    }

    /// Number of entries currently resident (test/diagnostic use).
    #[must_use]
    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingFlusher {
        order: Vec<u32>,
    }
    impl Flusher for RecordingFlusher {
        fn flush_one(&mut self, phy: u32, _kind: Kind, _plaintext: &[u8]) -> Result<()> {
            self.order.push(phy);
            Ok(())
        }
    }

    #[test]
    fn load_and_get_round_trip() {
        let mut cache = Cache::new(4);
        let mut flusher = RecordingFlusher::default();
        cache.load(2, Kind::Data, b"hello".to_vec(), &mut flusher).unwrap();
        assert_eq!(cache.get(2), Some(b"hello".as_slice()));
        assert!(flusher.order.is_empty());
    }

    #[test]
    fn sync_flushes_data_before_dependent_management() {
        let mut cache = Cache::new(8);
        let mut flusher = RecordingFlusher::default();
        cache.load(2, Kind::Data, vec![1], &mut flusher).unwrap();
        cache.load(1, Kind::Management, vec![2], &mut flusher).unwrap();

        cache.mark_dirty(2, vec![1, 1], []).unwrap();
        cache.mark_dirty(1, vec![2, 2], [2]).unwrap();

        cache.sync(&mut flusher).unwrap();
        assert_eq!(flusher.order, vec![2, 1]);
    }

    #[test]
    fn clean_entries_are_evicted_before_dirty_ones() {
        let mut cache = Cache::new(2);
        let mut flusher = RecordingFlusher::default();
        cache.load(10, Kind::Data, vec![0], &mut flusher).unwrap();
        cache.load(11, Kind::Data, vec![0], &mut flusher).unwrap();
        cache.mark_dirty(11, vec![9], []).unwrap();

        // Loading a third block must evict the clean one (10), not flush
        // the dirty one (11).
        cache.load(12, Kind::Data, vec![0], &mut flusher).unwrap();
        assert!(flusher.order.is_empty());
        assert!(!cache.contains(10));
        assert!(cache.contains(11));
        assert!(cache.contains(12));
    }

    #[test]
    fn eviction_flushes_dirty_entry_when_no_clean_victim_exists() {
        let mut cache = Cache::new(2);
        let mut flusher = RecordingFlusher::default();
        cache.load(10, Kind::Data, vec![0], &mut flusher).unwrap();
        cache.load(11, Kind::Data, vec![0], &mut flusher).unwrap();
        cache.mark_dirty(10, vec![1], []).unwrap();
        cache.mark_dirty(11, vec![1], []).unwrap();

        cache.load(12, Kind::Data, vec![0], &mut flusher).unwrap();
        assert_eq!(flusher.order.len(), 1);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn mark_dirty_on_absent_block_is_illegal_param() {
        let mut cache = Cache::new(2);
        assert!(matches!(
            cache.mark_dirty(5, vec![], []),
            Err(SbdiError::IllegalParam(_))
        ));
    }
}
