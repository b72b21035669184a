//! Cumulative counters exposed through `stats_get`/`stats_reset` (spec.md
//! §6). Grounded on the teacher's `per_cpu.stats` (printed in
//! `linux-user/src/main.rs` via `Display`), adapted to the four counters
//! spec.md actually names.

use std::fmt;

#[derive(Debug, Clone, Copy, Default)]
pub struct Stats {
    pub translations: u64,
    pub executions: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

impl Stats {
    pub const fn new() -> Self {
        Self {
            translations: 0,
            executions: 0,
            cache_hits: 0,
            cache_misses: 0,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "translations:  {}", self.translations)?;
        writeln!(f, "executions:    {}", self.executions)?;
        writeln!(f, "cache hits:    {}", self.cache_hits)?;
        writeln!(f, "cache misses:  {}", self.cache_misses)
    }
}
