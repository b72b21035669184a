//! Translation cache and code-cache allocator (spec.md §4.F, §4.G).

pub mod codecache;
pub mod tcache;

pub use codecache::{CacheError, CodeCache, Region};
pub use tcache::TCache;
