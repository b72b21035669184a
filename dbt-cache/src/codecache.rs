//! Persistent, executable code-cache allocator (spec.md §4.G).
//!
//! Grounded on the teacher's `tcg-backend/code_buffer.rs`: same mmap +
//! mprotect W^X technique, but split from the per-block emit scratch
//! buffer (`dbt_codegen::CodeBuf`) into its own type, since the two have
//! different lifetimes — this region survives across many block builds
//! and is bump-allocated, never reallocated, never resized.

use std::io;
use std::ptr;

use thiserror::Error;

/// Default region size: spec.md §4.G cites 1 MiB as the working default.
pub const DEFAULT_CODE_CACHE_SIZE: usize = 1024 * 1024;

/// Minimum alignment for any allocation; vectorized host code asks for
/// 16-byte alignment explicitly via `alloc_aligned`.
pub const MIN_ALIGN: usize = 4;
pub const VECTOR_ALIGN: usize = 16;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("code cache exhausted: requested {requested} bytes, {available} available")]
    CodeCacheFull { requested: usize, available: usize },
    #[error("mmap/mprotect failed: {0}")]
    Os(#[from] io::Error),
}

/// A contiguous, writable span handed out by `alloc`. Valid only until
/// the owning `CodeCache` is reset.
#[derive(Debug, Clone, Copy)]
pub struct Region {
    pub start: usize,
    pub len: usize,
}

/// The executable code region: reserved once, bump-allocated, reset as a
/// whole (spec.md §4.G — "no fine-grained free").
pub struct CodeCache {
    ptr: *mut u8,
    size: usize,
    offset: usize,
    /// Tracks whether the *whole region* is currently mapped executable;
    /// `alloc`/`alloc_aligned` refuse to hand out bytes while this is
    /// true, matching the teacher's strict W^X discipline (never both
    /// writable and executable at once).
    executable: bool,
}

unsafe impl Send for CodeCache {}

impl CodeCache {
    pub fn new(size: usize) -> Result<Self, CacheError> {
        let page = page_size();
        let size = (size + page - 1) & !(page - 1);

        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(CacheError::Os(io::Error::last_os_error()));
        }

        Ok(Self { ptr: ptr as *mut u8, size, offset: 0, executable: false })
    }

    pub fn with_default_size() -> Result<Self, CacheError> {
        Self::new(DEFAULT_CODE_CACHE_SIZE)
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn used(&self) -> usize {
        self.offset
    }

    fn ensure_writable(&mut self) -> Result<(), CacheError> {
        if self.executable {
            self.protect(libc::PROT_READ | libc::PROT_WRITE)?;
            self.executable = false;
        }
        Ok(())
    }

    fn protect(&self, prot: i32) -> Result<(), CacheError> {
        let ret = unsafe { libc::mprotect(self.ptr as *mut libc::c_void, self.size, prot) };
        if ret != 0 {
            Err(CacheError::Os(io::Error::last_os_error()))
        } else {
            Ok(())
        }
    }

    /// Bump-allocate `len` bytes at the given alignment and copy `bytes`
    /// into them. Returns the region's absolute start address (host
    /// pointer value, suitable as a block's `host_entry`).
    pub fn alloc_aligned(&mut self, bytes: &[u8], align: usize) -> Result<Region, CacheError> {
        self.ensure_writable()?;

        let aligned_offset = (self.offset + align - 1) & !(align - 1);
        let end = aligned_offset
            .checked_add(bytes.len())
            .ok_or(CacheError::CodeCacheFull { requested: bytes.len(), available: 0 })?;
        if end > self.size {
            return Err(CacheError::CodeCacheFull {
                requested: bytes.len(),
                available: self.size.saturating_sub(self.offset),
            });
        }

        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), self.ptr.add(aligned_offset), bytes.len());
        }
        self.offset = end;
        Ok(Region { start: self.ptr as usize + aligned_offset, len: bytes.len() })
    }

    /// Allocate at the default minimum alignment (spec.md §4.G: "at
    /// least 4 bytes").
    pub fn alloc(&mut self, bytes: &[u8]) -> Result<Region, CacheError> {
        self.alloc_aligned(bytes, MIN_ALIGN)
    }

    /// Patch already-copied bytes at an absolute host address (used for
    /// block-chaining jump patches after the block has been committed).
    ///
    /// # Safety
    /// `addr` must lie within `[self.ptr, self.ptr + self.offset)` and
    /// the region must currently be writable (not yet marked
    /// executable), or the caller must have separately re-opened write
    /// access.
    pub unsafe fn patch_u32_at(&mut self, addr: usize, value: u32) -> Result<(), CacheError> {
        self.ensure_writable()?;
        let p = addr as *mut u32;
        p.write_unaligned(value);
        Ok(())
    }

    /// Mark the whole region read+execute and flush the instruction
    /// cache for it. Must be called exactly once per batch of writes
    /// before any of the bytes in that batch are executed (spec.md
    /// §4.G contract).
    pub fn mark_executable(&mut self) -> Result<(), CacheError> {
        self.protect(libc::PROT_READ | libc::PROT_EXEC)?;
        self.executable = true;
        flush_icache(self.ptr, self.size);
        Ok(())
    }

    /// Reset the bump pointer to zero. Does not unmap or zero memory;
    /// the caller (the translation cache) is responsible for treating
    /// every previously issued `Region` as invalidated.
    pub fn reset(&mut self) -> Result<(), CacheError> {
        self.ensure_writable()?;
        self.offset = 0;
        Ok(())
    }
}

impl Drop for CodeCache {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe {
                libc::munmap(self.ptr as *mut libc::c_void, self.size);
            }
        }
    }
}

fn page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

/// x86-64 has coherent instruction/data caches, so no explicit flush
/// instruction is required after an mprotect to PROT_EXEC; this is a
/// named no-op so the call site documents the requirement spec.md §4.G
/// states rather than silently skipping it.
fn flush_icache(_ptr: *mut u8, _len: usize) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_then_mark_executable_round_trips_region() {
        let mut cc = CodeCache::new(4096).unwrap();
        let code = [0xC3u8]; // ret
        let region = cc.alloc(&code).unwrap();
        assert_eq!(region.len, 1);
        cc.mark_executable().unwrap();
        let read_back = unsafe { std::slice::from_raw_parts(region.start as *const u8, 1) };
        assert_eq!(read_back, &[0xC3]);
    }

    #[test]
    fn alloc_exceeding_capacity_is_code_cache_full() {
        let mut cc = CodeCache::new(4096).unwrap();
        let big = vec![0u8; 1 << 20];
        let err = cc.alloc(&big).unwrap_err();
        assert!(matches!(err, CacheError::CodeCacheFull { .. }));
    }

    #[test]
    fn reset_reclaims_space_for_new_allocations() {
        let mut cc = CodeCache::new(4096).unwrap();
        let page = cc.capacity();
        let chunk = vec![0u8; page - 8];
        cc.alloc(&chunk).unwrap();
        assert!(cc.alloc(&[0u8; 16]).is_err());
        cc.reset().unwrap();
        assert_eq!(cc.used(), 0);
        assert!(cc.alloc(&[0u8; 16]).is_ok());
    }

    #[test]
    fn alloc_aligned_respects_vector_alignment() {
        let mut cc = CodeCache::new(4096).unwrap();
        cc.alloc(&[0u8; 3]).unwrap(); // misalign the bump pointer
        let region = cc.alloc_aligned(&[0u8; 16], VECTOR_ALIGN).unwrap();
        assert_eq!(region.start % VECTOR_ALIGN, 0);
    }
}
