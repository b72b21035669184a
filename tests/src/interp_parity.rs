//! Testable property 3: for any instruction the builder can translate,
//! running it through a translated one-instruction block leaves guest
//! state identical to interpreting it directly.
//!
//! Each case builds a block containing exactly one instruction (not a
//! full `dbt_builder::build` call, which would keep decoding past it)
//! and compares the result against `dbt_interp::interpret` starting
//! from the same state.

use dbt_cache::CodeCache;
use dbt_codegen::code_buf::CodeBuf;
use dbt_codegen::x86_64;
use dbt_core::state::GuestState;
use dbt_decode::{decode, DecodedInsn};

use crate::encode::*;

/// Builds and runs a block containing exactly `insn`, mirroring
/// `dbt_builder::build`'s tail behaviour (store the fallthrough PC and
/// return, unless the instruction already terminated the block itself).
fn run_translated(insn: &DecodedInsn, pc: u64, state: &mut GuestState) {
    let mut buf = CodeBuf::with_default_capacity();
    x86_64::emit_prologue(&mut buf);
    let step = dbt_builder::translate::translate(&mut buf, insn, pc);
    if matches!(step, dbt_builder::translate::Step::Continue) {
        let next_pc = pc + insn.length as u64;
        x86_64::emitter::emit_mov_ri(&mut buf, true, x86_64::regs::Reg::Rax, next_pc);
        x86_64::emitter::emit_store(
            &mut buf,
            true,
            x86_64::regs::Reg::Rax,
            x86_64::regs::ENV_REG,
            GuestState::PC_OFFSET,
        );
        x86_64::emit_epilogue(&mut buf);
    }
    assert!(!buf.error(), "code buffer overflowed for a single instruction");

    let mut cache = CodeCache::new(64 * 1024).unwrap();
    let region = cache.alloc(buf.as_slice()).unwrap();
    cache.mark_executable().unwrap();

    type BlockFn = extern "C" fn(*mut GuestState);
    let f: BlockFn = unsafe { std::mem::transmute::<usize, BlockFn>(region.start) };
    f(state as *mut GuestState);
}

fn fresh_state(base: u64) -> GuestState {
    let mut s = GuestState::new();
    s.guest_base = base;
    s
}

fn assert_states_match(a: &GuestState, b: &GuestState) {
    assert_eq!(a.gpr, b.gpr, "general registers diverged");
    assert_eq!(a.pc, b.pc, "pc diverged");
    assert_eq!(a.nzcv, b.nzcv, "flags diverged");
}

#[test]
fn add_immediate_matches_interpreter() {
    let word = (1u32 << 31) | (0b10001 << 24) | (9 << 10) | (1 << 5) | 0;
    let pc = 0x1000;
    let insn = decode(word, pc);

    let mut translated = fresh_state(0);
    translated.set_reg(1, 5);
    run_translated(&insn, pc, &mut translated);

    let mut interpreted = fresh_state(0);
    interpreted.set_reg(1, 5);
    let outcome = dbt_interp::interpret(&mut interpreted, &insn, pc);
    if let dbt_interp::StepOutcome::Continue(next) = outcome {
        interpreted.set_pc(next);
    }

    assert_states_match(&translated, &interpreted);
    assert_eq!(translated.get_reg(0), 14);
}

#[test]
fn subs_reg_matches_interpreter() {
    let word = subs_reg(true, 0, 1, 2);
    let pc = 0x2000;
    let insn = decode(word, pc);

    let mut translated = fresh_state(0);
    translated.set_reg(1, 10);
    translated.set_reg(2, 11);
    run_translated(&insn, pc, &mut translated);

    let mut interpreted = fresh_state(0);
    interpreted.set_reg(1, 10);
    interpreted.set_reg(2, 11);
    let outcome = dbt_interp::interpret(&mut interpreted, &insn, pc);
    if let dbt_interp::StepOutcome::Continue(next) = outcome {
        interpreted.set_pc(next);
    }

    assert_states_match(&translated, &interpreted);
}

#[test]
fn logical_and_matches_interpreter() {
    // AND X0, X1, X2 : sf=1 opc=00 01010 shift=00 N=0 Rm Rn Rd
    let word = (1u32 << 31) | (0b01010 << 24) | (2 << 16) | (1 << 5) | 0;
    let pc = 0x3000;
    let insn = decode(word, pc);

    let mut translated = fresh_state(0);
    translated.set_reg(1, 0xF0F0);
    translated.set_reg(2, 0x0FF0);
    run_translated(&insn, pc, &mut translated);

    let mut interpreted = fresh_state(0);
    interpreted.set_reg(1, 0xF0F0);
    interpreted.set_reg(2, 0x0FF0);
    let outcome = dbt_interp::interpret(&mut interpreted, &insn, pc);
    if let dbt_interp::StepOutcome::Continue(next) = outcome {
        interpreted.set_pc(next);
    }

    assert_states_match(&translated, &interpreted);
    assert_eq!(translated.get_reg(0), 0x0FF0);
}

#[test]
fn movz_matches_interpreter() {
    // MOVZ X3, #0x1234
    let word = (1u32 << 31) | (0b10 << 29) | (0b100101 << 23) | (0x1234 << 5) | 3;
    let pc = 0x4000;
    let insn = decode(word, pc);

    let mut translated = fresh_state(0);
    run_translated(&insn, pc, &mut translated);

    let mut interpreted = fresh_state(0);
    let outcome = dbt_interp::interpret(&mut interpreted, &insn, pc);
    if let dbt_interp::StepOutcome::Continue(next) = outcome {
        interpreted.set_pc(next);
    }

    assert_states_match(&translated, &interpreted);
    assert_eq!(translated.get_reg(3), 0x1234);
}

#[test]
fn load_byte_matches_interpreter() {
    let word = ldrb_imm(0, 1, 4);
    let pc = 0;
    let insn = decode(word, pc);

    let mut mem_a = [0u8; 32];
    mem_a[4] = 0x77;
    let mut translated = fresh_state(mem_a.as_mut_ptr() as u64);
    translated.set_reg(1, 0);
    run_translated(&insn, pc, &mut translated);

    let mut mem_b = [0u8; 32];
    mem_b[4] = 0x77;
    let mut interpreted = fresh_state(mem_b.as_mut_ptr() as u64);
    interpreted.set_reg(1, 0);
    let outcome = dbt_interp::interpret(&mut interpreted, &insn, pc);
    if let dbt_interp::StepOutcome::Continue(next) = outcome {
        interpreted.set_pc(next);
    }

    assert_states_match(&translated, &interpreted);
    assert_eq!(translated.get_reg(0), 0x77);
}

#[test]
fn conditional_branch_taken_matches_interpreter() {
    let word = b_cond(COND_EQ, 2); // target = pc + 8
    let pc = 0x5000;
    let insn = decode(word, pc);

    let mut translated = fresh_state(0);
    translated.set_flags(1 << 30); // Z=1
    run_translated(&insn, pc, &mut translated);

    let mut interpreted = fresh_state(0);
    interpreted.set_flags(1 << 30);
    let outcome = dbt_interp::interpret(&mut interpreted, &insn, pc);
    match outcome {
        dbt_interp::StepOutcome::Continue(next) => interpreted.set_pc(next),
        dbt_interp::StepOutcome::Exit(next) => interpreted.set_pc(next),
    }

    assert_states_match(&translated, &interpreted);
    assert_eq!(translated.get_pc(), pc + 8);
}
