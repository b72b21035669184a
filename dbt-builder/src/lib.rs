//! The block builder (spec.md §4.E): decode a straight-line run of guest
//! instructions starting at a PC, translate each to host code, and
//! commit the result into the code cache as a `TranslatedBlock`.

pub mod translate;

use dbt_cache::{CacheError, CodeCache};
use dbt_codegen::code_buf::CodeBuf;
use dbt_codegen::x86_64;
use dbt_core::state::GuestState;
use dbt_core::TranslatedBlock;
use dbt_decode::{decode, Kind};
use thiserror::Error;

/// Design value from spec.md §4.E step 2e: the block ends unconditionally
/// once this many instructions have been translated, even without a
/// terminator.
pub const MAX_BLOCK_INSTRUCTIONS: u32 = 64;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("code buffer overflowed while building block at {guest_pc:#x}")]
    BufferOverflow { guest_pc: u64 },
    #[error("code cache exhausted while committing block at {guest_pc:#x}: {source}")]
    CodeCacheFull { guest_pc: u64, #[source] source: CacheError },
    #[error("unknown instruction at {guest_pc:#x} before any output was produced")]
    DecodeUnknown { guest_pc: u64 },
}

/// Build a translated block starting at `guest_pc`. Reads guest
/// instruction words through `state.g2h`; writes no guest state itself
/// (that's the job of the code it emits, once run).
///
/// Per spec.md §4.E.2, a block that hits `Kind::Unknown` before
/// emitting anything transitions *building → failed*
/// (`BuildError::DecodeUnknown`); one that has already translated at
/// least one real instruction instead emits a trap and completes
/// normally (step 2a), becoming a valid *complete* block whose last
/// instruction happens to be a trap.
pub fn build(
    guest_pc: u64,
    state: &GuestState,
    code_cache: &mut CodeCache,
) -> Result<TranslatedBlock, BuildError> {
    let mut buf = CodeBuf::with_default_capacity();
    x86_64::emit_prologue(&mut buf);

    let mut pc_cursor = guest_pc;
    let mut n: u32 = 0;
    let mut terminated = false;

    loop {
        // SAFETY: g2h maps into the identity-mapped guest address space
        // this translator instance owns; decode never reads past the
        // 4 bytes fetched here (spec.md §4.C contract 1).
        let word = unsafe { (state.g2h(pc_cursor) as *const u32).read_unaligned() };
        let insn = decode(word, pc_cursor);

        if insn.kind == Kind::Unknown && n == 0 {
            return Err(BuildError::DecodeUnknown { guest_pc });
        }

        match translate::translate(&mut buf, &insn, pc_cursor) {
            translate::Step::Terminated => {
                terminated = true;
                n += 1;
                break;
            }
            translate::Step::Continue => {}
        }

        pc_cursor += insn.length as u64;
        n += 1;
        if n == MAX_BLOCK_INSTRUCTIONS {
            break;
        }
    }

    if !terminated {
        // Step 3: the loop ended on the instruction-count bound without
        // a terminator; store where execution should resume and return.
        emit_fallthrough_exit(&mut buf, pc_cursor);
    }

    if buf.error() {
        return Err(BuildError::BufferOverflow { guest_pc });
    }

    let bytes = buf.as_slice();
    let region = code_cache
        .alloc(bytes)
        .map_err(|source| BuildError::CodeCacheFull { guest_pc, source })?;
    code_cache
        .mark_executable()
        .map_err(|source| BuildError::CodeCacheFull { guest_pc, source })?;

    let hash = dbt_cache::tcache::hash(guest_pc);
    Ok(TranslatedBlock::new(guest_pc, hash, region.start, region.len))
}

fn emit_fallthrough_exit(buf: &mut CodeBuf, next_pc: u64) {
    use dbt_codegen::x86_64::emitter;
    use dbt_codegen::x86_64::regs::ENV_REG;
    const SCRATCH: dbt_codegen::x86_64::regs::Reg = dbt_codegen::x86_64::regs::Reg::Rax;
    emitter::emit_mov_ri(buf, true, SCRATCH, next_pc);
    emitter::emit_store(buf, true, SCRATCH, ENV_REG, GuestState::PC_OFFSET);
    x86_64::emit_epilogue(buf);
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Assemble four raw A64 instruction words into a guest memory image
    /// and exercise `build` end to end.
    fn make_guest_image(words: &[u32]) -> (GuestState, Vec<u8>) {
        let mut bytes = Vec::new();
        for w in words {
            bytes.extend_from_slice(&w.to_le_bytes());
        }
        let mut state = GuestState::new();
        state.guest_base = bytes.as_ptr() as u64;
        (state, bytes)
    }

    /// `ADD X0, X0, #1` ; `RET`.
    fn add_imm(rd: u8, rn: u8, imm: u32) -> u32 {
        (1 << 31) | (0b10001 << 24) | (imm << 10) | ((rn as u32) << 5) | rd as u32
    }

    fn ret(rn: u8) -> u32 {
        (0b1101011 << 25) | (0b0010 << 21) | (0b11111 << 16) | ((rn as u32) << 5)
    }

    #[test]
    fn builds_a_two_instruction_block_ending_in_ret() {
        let words = [add_imm(0, 0, 1), ret(30)];
        let (state, _bytes) = make_guest_image(&words);
        let mut cache = CodeCache::new(64 * 1024).unwrap();
        let block = build(0, &state, &mut cache).expect("build should succeed");
        assert_eq!(block.guest_pc, 0);
        assert!(block.host_size > 0);
    }

    #[test]
    fn unknown_first_instruction_fails_to_build() {
        let words = [0xFFFF_FFFFu32];
        let (state, _bytes) = make_guest_image(&words);
        let mut cache = CodeCache::new(64 * 1024).unwrap();
        let err = build(0, &state, &mut cache).unwrap_err();
        assert!(matches!(err, BuildError::DecodeUnknown { .. }));
    }

    #[test]
    fn block_stops_at_max_instruction_bound() {
        // A run of non-terminating ADDs, far longer than
        // MAX_BLOCK_INSTRUCTIONS, should still produce one block.
        let words: Vec<u32> = (0..(MAX_BLOCK_INSTRUCTIONS * 2))
            .map(|_| add_imm(0, 0, 1))
            .collect();
        let (state, _bytes) = make_guest_image(&words);
        let mut cache = CodeCache::new(256 * 1024).unwrap();
        let block = build(0, &state, &mut cache).expect("build should succeed");
        assert!(block.host_size > 0);
    }
}
