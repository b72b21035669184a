//! Translation cache: direct-mapped `guest_pc -> TranslatedBlock` table
//! (spec.md §4.F).
//!
//! Grounded on the shape of the teacher's `TbStore`/`TranslationBlock`
//! hash lookup, simplified to match spec.md's direct-mapped design
//! (collisions evict rather than chain) and this repository's
//! single-threaded execution model — no `Mutex`, no `UnsafeCell`, no
//! atomics, since `dbt_runtime::Translator` is the sole owner and is not
//! `Sync`.

use dbt_core::TranslatedBlock;

/// Default slot count. spec.md §4.F cites 4096 as the source's value;
/// must be a power of two for the `& (CAPACITY - 1)` index mask.
pub const DEFAULT_CAPACITY: usize = 4096;

const GOLDEN_RATIO: u64 = 0x9E37_79B9_7F4A_7C15;

/// `(pc * golden_ratio) >> 32`, masked down to the table's index range
/// by the caller.
#[inline]
pub fn hash(guest_pc: u64) -> u64 {
    (guest_pc.wrapping_mul(GOLDEN_RATIO)) >> 32
}

/// The direct-mapped translation cache.
pub struct TCache {
    slots: Vec<Option<TranslatedBlock>>,
    mask: u64,
}

impl TCache {
    /// `capacity` must be a power of two.
    pub fn new(capacity: usize) -> Self {
        debug_assert!(capacity.is_power_of_two());
        Self { slots: vec![None; capacity], mask: (capacity as u64) - 1 }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }

    #[inline]
    fn index(&self, guest_pc: u64) -> usize {
        (hash(guest_pc) & self.mask) as usize
    }

    /// Returns the host entry point iff a live record for `guest_pc`
    /// currently occupies its slot.
    pub fn lookup(&mut self, guest_pc: u64) -> Option<usize> {
        let idx = self.index(guest_pc);
        match &mut self.slots[idx] {
            Some(tb) if tb.guest_pc == guest_pc => {
                tb.refcount += 1;
                Some(tb.host_entry)
            }
            _ => None,
        }
    }

    /// Look up the full block record (used by the runtime for chaining,
    /// which needs more than the entry point).
    pub fn lookup_block(&self, guest_pc: u64) -> Option<&TranslatedBlock> {
        let idx = self.index(guest_pc);
        match &self.slots[idx] {
            Some(tb) if tb.guest_pc == guest_pc => Some(tb),
            _ => None,
        }
    }

    pub fn lookup_block_mut(&mut self, guest_pc: u64) -> Option<&mut TranslatedBlock> {
        let idx = self.index(guest_pc);
        match &mut self.slots[idx] {
            Some(tb) if tb.guest_pc == guest_pc => Some(tb),
            _ => None,
        }
    }

    /// Unconditionally stores the new record at its slot, evicting
    /// whatever occupied it (spec.md §4.F — the source of the
    /// no-self-modifying-code limitation: the evicted record's bytes
    /// remain valid in the code cache but become unreachable).
    pub fn insert(&mut self, tb: TranslatedBlock) {
        let idx = self.index(tb.guest_pc);
        self.slots[idx] = Some(tb);
    }

    /// Clears the slot only if its `guest_pc` matches; otherwise a no-op.
    pub fn invalidate(&mut self, guest_pc: u64) -> bool {
        let idx = self.index(guest_pc);
        match &self.slots[idx] {
            Some(tb) if tb.guest_pc == guest_pc => {
                self.slots[idx] = None;
                true
            }
            _ => false,
        }
    }

    /// Clears every slot (paired with a code-cache `reset()` by the
    /// runtime).
    pub fn flush(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TCache {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(pc: u64, entry: usize) -> TranslatedBlock {
        TranslatedBlock::new(pc, hash(pc), entry, 16)
    }

    #[test]
    fn insert_then_lookup_round_trips() {
        let mut c = TCache::new(16);
        c.insert(block(0x1000, 0xABC000));
        assert_eq!(c.lookup(0x1000), Some(0xABC000));
    }

    #[test]
    fn lookup_miss_on_empty_slot() {
        let mut c = TCache::new(16);
        assert_eq!(c.lookup(0x1000), None);
    }

    #[test]
    fn colliding_insert_evicts_prior_occupant_from_lookup() {
        let mut c = TCache::new(1); // every pc collides in a 1-slot table
        c.insert(block(0x1000, 0x1));
        c.insert(block(0x2000, 0x2));
        assert_eq!(c.lookup(0x1000), None);
        assert_eq!(c.lookup(0x2000), Some(0x2));
    }

    #[test]
    fn invalidate_is_noop_on_mismatched_pc() {
        let mut c = TCache::new(16);
        c.insert(block(0x1000, 0x1));
        assert!(!c.invalidate(0x2000));
        assert_eq!(c.lookup(0x1000), Some(0x1));
    }

    #[test]
    fn invalidate_clears_matching_slot() {
        let mut c = TCache::new(16);
        c.insert(block(0x1000, 0x1));
        assert!(c.invalidate(0x1000));
        assert_eq!(c.lookup(0x1000), None);
    }

    #[test]
    fn flush_clears_every_slot() {
        let mut c = TCache::new(16);
        c.insert(block(0x1000, 0x1));
        c.insert(block(0x2000, 0x2));
        c.flush();
        assert!(c.is_empty());
    }
}
