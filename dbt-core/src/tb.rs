//! The translated-block record (spec.md §3 "Translated block record").
//!
//! Mirrors the shape of the teacher's `TranslationBlock`, trimmed to the
//! fields spec.md actually calls for: no `cs_base`/`cflags`/icount, since
//! this translator has a single guest mode and no deterministic-icount
//! mode. `chain` replaces the teacher's split `jmp_insn_offset` /
//! `jmp_reset_offset` pair with the single patch-target address spec.md
//! describes directly.

/// A cached translated block: one entry per live guest PC in the
/// translation cache.
#[derive(Debug, Clone)]
pub struct TranslatedBlock {
    /// Guest PC this block was translated from.
    pub guest_pc: u64,
    /// Offset of the block's first host instruction within the code cache.
    pub host_entry: usize,
    /// Size in bytes of the generated host code.
    pub host_size: usize,
    /// Hash used to place this block in the translation cache (see
    /// `dbt_cache::tcache`).
    pub hash: u64,
    /// Statistics-only hit counter (Open Question 2: not used to gate
    /// invalidation; see DESIGN.md).
    pub refcount: u64,
    /// Host address chained jumps target for each of the block's up to
    /// two exits, or `None` if unlinked. Set by `chain`, cleared by
    /// `unchain` and by invalidation.
    pub chain: [Option<usize>; 2],
}

impl TranslatedBlock {
    pub fn new(guest_pc: u64, hash: u64, host_entry: usize, host_size: usize) -> Self {
        debug_assert!(host_size > 0, "a live block must have non-zero size");
        Self {
            guest_pc,
            host_entry,
            host_size,
            hash,
            refcount: 1,
            chain: [None, None],
        }
    }

    /// Whether `addr` lies within this block's host code range.
    pub fn contains_host_addr(&self, addr: usize) -> bool {
        addr >= self.host_entry && addr < self.host_entry + self.host_size
    }
}
