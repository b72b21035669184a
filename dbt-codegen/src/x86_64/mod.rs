//! x86-64 host backend: ISA-level instruction encoding (`emitter`),
//! register numbering/ABI constants (`regs`), and the block-entry/exit
//! glue the runtime needs to call into and chain between generated code.

pub mod emitter;
pub mod regs;

pub use emitter::{ArithOp, Ext3Op, Ext5Op, ShiftOp, X86Cond};
pub use regs::Reg;

use crate::code_buf::CodeBuf;

/// Emit the fixed prologue every translated block starts with: push the
/// callee-saved registers, load the env pointer (pointer to `GuestState`)
/// into `ENV_REG`, and reserve the outgoing-call stack area.
///
/// Grounded on the teacher's `emit_prologue`, simplified because this
/// backend has exactly one host ISA and calls blocks through a single
/// `extern "C" fn(*mut GuestState)` entry point rather than through a
/// generic TCG epilogue table.
pub fn emit_prologue(buf: &mut CodeBuf) {
    for &r in regs::CALLEE_SAVED {
        emitter::emit_push(buf, r);
    }
    emitter::emit_mov_rr(buf, true, regs::ENV_REG, regs::CALL_ARG_REGS[0]);
    if regs::STACK_ADDEND > 0 {
        emitter::emit_arith_ri(
            buf,
            emitter::ArithOp::Sub,
            true,
            regs::Reg::Rsp,
            regs::STACK_ADDEND as i32,
        );
    }
}

/// Emit the fixed epilogue a block falls through to (or jumps to) when it
/// has no chained successor: undo the prologue and return to the runtime
/// dispatch loop.
pub fn emit_epilogue(buf: &mut CodeBuf) {
    if regs::STACK_ADDEND > 0 {
        emitter::emit_arith_ri(
            buf,
            emitter::ArithOp::Add,
            true,
            regs::Reg::Rsp,
            regs::STACK_ADDEND as i32,
        );
    }
    for &r in regs::CALLEE_SAVED.iter().rev() {
        emitter::emit_pop(buf, r);
    }
    emitter::emit_ret(buf);
}

/// Patch a block-exit jump (previously emitted with a placeholder
/// displacement via `emitter::emit_jcc_placeholder`, or a plain
/// `emit_jmp` whose displacement field offset was recorded) so it lands
/// on `target_offset` within the same buffer. Used by block chaining
/// (spec.md §4.I) once a successor's host entry point is known.
pub fn patch_jump(buf: &mut CodeBuf, disp_field_offset: usize, target_offset: usize) {
    emitter::patch_rel32(buf, disp_field_offset, target_offset);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prologue_then_epilogue_is_stack_neutral_in_byte_count_symmetry() {
        let mut b = CodeBuf::with_default_capacity();
        emit_prologue(&mut b);
        let after_prologue = b.size();
        emit_epilogue(&mut b);
        assert!(b.size() > after_prologue);
        assert!(!b.error());
    }
}
