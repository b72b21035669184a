//! Fallback interpreter (spec.md §4.H): execute one decoded instruction
//! directly against `GuestState`, with no host code emitted.
//!
//! Used for the instruction a block's builder couldn't translate
//! (`exit_reason::INTERPRET`) and, in `dbt-cli`'s demo mode, as a
//! reference implementation to check translated output against. Every
//! translator in `dbt-builder::translate` has a semantic twin here;
//! `tests/` cross-checks the two stay in agreement.

use dbt_core::flags::{nzcv_from, Cond, FlagOp};
use dbt_core::state::GuestState;
use dbt_decode::{AddrMode, DecodedInsn, LogicalOp, Op, ShiftType, Width};

/// What the runtime should do once `interpret` returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Keep dispatching normally at the returned guest PC.
    Continue(u64),
    /// The instruction set `exit_reason` to something other than
    /// `NORMAL`; the runtime should act on it (run a syscall, stop) and
    /// then resume at the returned PC.
    Exit(u64),
}

fn mask_for(sf: bool) -> u64 {
    if sf {
        u64::MAX
    } else {
        0xFFFF_FFFF
    }
}

fn sext(value: u64, sf: bool) -> i64 {
    if sf {
        value as i64
    } else {
        (value as u32) as i32 as i64
    }
}

fn apply_shift(shift: ShiftType, amount: u32, sf: bool, value: u64) -> u64 {
    let width = if sf { 64 } else { 32 };
    let amount = amount % width;
    let v = value & mask_for(sf);
    let result = match shift {
        ShiftType::Lsl => v.wrapping_shl(amount),
        ShiftType::Lsr => v.wrapping_shr(amount),
        ShiftType::Asr => {
            let signed = sext(v, sf);
            (signed >> amount) as u64
        }
        ShiftType::Ror => {
            if amount == 0 {
                v
            } else if sf {
                v.rotate_right(amount)
            } else {
                ((v as u32).rotate_right(amount)) as u64
            }
        }
    };
    result & mask_for(sf)
}

/// Interpret one instruction and apply its effect to `state`. Returns
/// the outcome the runtime uses to decide what to dispatch next.
pub fn interpret(state: &mut GuestState, insn: &DecodedInsn, pc: u64) -> StepOutcome {
    match insn.op {
        Op::AddSubImm { sf, rd, rn, imm, sub, set_flags } => {
            let op1 = state.get_reg(rn as usize) & mask_for(sf);
            let op2 = imm as u64;
            add_sub(state, sf, rd, op1, op2, sub, set_flags);
            StepOutcome::Continue(pc + insn.length as u64)
        }
        Op::AddSubShiftedReg { sf, rd, rn, rm, shift, amount, sub, set_flags } => {
            let op1 = state.get_reg(rn as usize) & mask_for(sf);
            let op2 = apply_shift(shift, amount as u32, sf, state.get_reg(rm as usize));
            add_sub(state, sf, rd, op1, op2, sub, set_flags);
            StepOutcome::Continue(pc + insn.length as u64)
        }
        Op::MulAdd { sf, rd, rn, rm, ra, sub } => {
            let a = state.get_reg(rn as usize) & mask_for(sf);
            let b = state.get_reg(rm as usize) & mask_for(sf);
            let c = state.get_reg(ra as usize) & mask_for(sf);
            let prod = a.wrapping_mul(b);
            let result = if sub { c.wrapping_sub(prod) } else { c.wrapping_add(prod) };
            state.set_reg(rd as usize, result & mask_for(sf));
            StepOutcome::Continue(pc + insn.length as u64)
        }
        Op::Div { sf, rd, rn, rm, signed } => {
            let a = state.get_reg(rn as usize) & mask_for(sf);
            let b = state.get_reg(rm as usize) & mask_for(sf);
            let result = if b == 0 {
                0 // ARM64: division by zero yields 0, no trap.
            } else if signed {
                let (sa, sb) = (sext(a, sf), sext(b, sf));
                if sa == i64::MIN && sb == -1 {
                    sa as u64
                } else {
                    (sa / sb) as u64
                }
            } else {
                a / b
            };
            state.set_reg(rd as usize, result & mask_for(sf));
            StepOutcome::Continue(pc + insn.length as u64)
        }
        Op::LogicalShiftedReg { sf, rd, rn, rm, shift, amount, op, invert, set_flags } => {
            let a = state.get_reg(rn as usize) & mask_for(sf);
            let mut b = apply_shift(shift, amount as u32, sf, state.get_reg(rm as usize));
            if invert {
                b = !b & mask_for(sf);
            }
            let result = match op {
                LogicalOp::And => a & b,
                LogicalOp::Orr => a | b,
                LogicalOp::Eor => a ^ b,
            } & mask_for(sf);
            if set_flags {
                let nzcv = nzcv_from(FlagOp::Logical, a, b, sext(result, sf) as u64);
                state.set_flags(nzcv);
            }
            state.set_reg(rd as usize, result);
            StepOutcome::Continue(pc + insn.length as u64)
        }
        Op::ShiftReg { sf, rd, rn, rm, shift } => {
            let amount = (state.get_reg(rm as usize) & mask_for(sf)) as u32;
            let result = apply_shift(shift, amount, sf, state.get_reg(rn as usize));
            state.set_reg(rd as usize, result);
            StepOutcome::Continue(pc + insn.length as u64)
        }
        Op::MoveWide { sf, rd, imm, keep, invert, hw } => {
            let result = if keep {
                let shift = 16 * hw as u32;
                let field_mask = 0xFFFFu64 << shift;
                (state.get_reg(rd as usize) & !field_mask) | imm
            } else if invert {
                !imm & mask_for(sf)
            } else {
                imm
            };
            state.set_reg(rd as usize, result & mask_for(sf));
            StepOutcome::Continue(pc + insn.length as u64)
        }
        Op::Extend { sf, rd, rn, width, signed } => {
            let raw = state.get_reg(rn as usize);
            let narrowed = match width {
                Width::B => raw & 0xFF,
                Width::H => raw & 0xFFFF,
                Width::W => raw & 0xFFFF_FFFF,
                Width::X => raw,
            };
            let result = if signed {
                let bits_wide = width.bytes() * 8;
                let shift = 64 - bits_wide;
                (((narrowed << shift) as i64) >> shift) as u64
            } else {
                narrowed
            };
            state.set_reg(rd as usize, result & mask_for(sf));
            StepOutcome::Continue(pc + insn.length as u64)
        }
        Op::Adr { rd, imm, page } => {
            let base = if page { pc & !0xFFF } else { pc };
            let result = base.wrapping_add(imm as u64);
            state.set_reg(rd as usize, result);
            StepOutcome::Continue(pc + insn.length as u64)
        }
        Op::LoadStoreImm { is_load, width, signed, sf, rt, rn, imm, mode } => {
            let base = state.get_reg(rn as usize);
            let access_addr = match mode {
                AddrMode::PreIndex => base.wrapping_add(imm as i64 as u64),
                _ => base,
            };
            do_load_store(state, is_load, width, signed, sf, rt, access_addr);
            if matches!(mode, AddrMode::PreIndex | AddrMode::PostIndex) {
                let new_base = match mode {
                    AddrMode::PostIndex => base.wrapping_add(imm as i64 as u64),
                    _ => access_addr,
                };
                state.set_reg(rn as usize, new_base);
            }
            StepOutcome::Continue(pc + insn.length as u64)
        }
        Op::LoadStoreReg { is_load, width, signed, sf, rt, rn, rm } => {
            let addr = state.get_reg(rn as usize).wrapping_add(state.get_reg(rm as usize));
            do_load_store(state, is_load, width, signed, sf, rt, addr);
            StepOutcome::Continue(pc + insn.length as u64)
        }
        Op::LoadStorePair { is_load, sf, rt, rt2, rn, imm, mode } => {
            let base = state.get_reg(rn as usize);
            let access_addr = match mode {
                AddrMode::PreIndex => base.wrapping_add(imm as i64 as u64),
                _ => base,
            };
            let elem_size = if sf { 8 } else { 4 };
            let width = if sf { Width::X } else { Width::W };
            do_load_store(state, is_load, width, false, sf, rt, access_addr);
            do_load_store(
                state,
                is_load,
                width,
                false,
                sf,
                rt2,
                access_addr.wrapping_add(elem_size),
            );
            if matches!(mode, AddrMode::PreIndex | AddrMode::PostIndex) {
                let new_base = match mode {
                    AddrMode::PostIndex => base.wrapping_add(imm as i64 as u64),
                    _ => access_addr,
                };
                state.set_reg(rn as usize, new_base);
            }
            StepOutcome::Continue(pc + insn.length as u64)
        }
        Op::Branch { imm, link } => {
            if link {
                state.set_reg(dbt_core::state::LINK_REG, pc + insn.length as u64);
            }
            StepOutcome::Continue(pc.wrapping_add(imm as u64))
        }
        Op::BranchCond { imm, cond } => {
            if Cond::from_bits(cond).holds(state.get_flags()) {
                StepOutcome::Continue(pc.wrapping_add(imm as u64))
            } else {
                StepOutcome::Continue(pc + insn.length as u64)
            }
        }
        Op::CompareBranch { sf, rt, imm, branch_if_nonzero } => {
            let is_zero = (state.get_reg(rt as usize) & mask_for(sf)) == 0;
            if is_zero != branch_if_nonzero {
                StepOutcome::Continue(pc.wrapping_add(imm as u64))
            } else {
                StepOutcome::Continue(pc + insn.length as u64)
            }
        }
        Op::TestBranch { rt, bit, imm, branch_if_set } => {
            let set = (state.get_reg(rt as usize) >> bit) & 1 != 0;
            if set == branch_if_set {
                StepOutcome::Continue(pc.wrapping_add(imm as u64))
            } else {
                StepOutcome::Continue(pc + insn.length as u64)
            }
        }
        Op::BranchReg { rn, link, is_ret: _ } => {
            let target = state.get_reg(rn as usize);
            if link {
                state.set_reg(dbt_core::state::LINK_REG, pc + insn.length as u64);
            }
            StepOutcome::Continue(target)
        }
        Op::Svc { imm16: _ } => {
            state.set_pc(pc + insn.length as u64);
            state.exit_reason = dbt_core::state::exit_reason::SYSCALL;
            StepOutcome::Exit(pc + insn.length as u64)
        }
        Op::Brk { imm16: _ } => {
            state.set_pc(pc);
            state.exit_reason = dbt_core::state::exit_reason::TRAP;
            StepOutcome::Exit(pc)
        }
        Op::CountLeading { sf, rd, rn, count_sign_bits } => {
            let width = if sf { 64 } else { 32 };
            let v = state.get_reg(rn as usize) & mask_for(sf);
            let result = if count_sign_bits {
                // CLS: number of leading bits equal to the sign bit,
                // excluding the sign bit itself.
                let sign = (v >> (width - 1)) & 1;
                let mut count = 0u32;
                for i in (0..width - 1).rev() {
                    if (v >> i) & 1 == sign {
                        count += 1;
                    } else {
                        break;
                    }
                }
                count as u64
            } else if sf {
                v.leading_zeros() as u64
            } else {
                (v as u32).leading_zeros() as u64
            };
            state.set_reg(rd as usize, result);
            StepOutcome::Continue(pc + insn.length as u64)
        }
        Op::ReverseBits { sf, rd, rn } => {
            let v = state.get_reg(rn as usize) & mask_for(sf);
            let result = if sf { v.reverse_bits() } else { (v as u32).reverse_bits() as u64 };
            state.set_reg(rd as usize, result);
            StepOutcome::Continue(pc + insn.length as u64)
        }
        Op::Unknown { raw } => {
            log::warn!("interpreter hit undecodable word {raw:#010x} at pc={pc:#x}");
            state.set_pc(pc);
            state.exit_reason = dbt_core::state::exit_reason::TRAP;
            StepOutcome::Exit(pc)
        }
    }
}

fn add_sub(state: &mut GuestState, sf: bool, rd: u8, op1: u64, op2: u64, sub: bool, set_flags: bool) {
    let result = if sub { op1.wrapping_sub(op2) } else { op1.wrapping_add(op2) } & mask_for(sf);
    if set_flags {
        let flag_op = if sub { FlagOp::Sub } else { FlagOp::Add };
        let nzcv = nzcv_from(flag_op, sext(op1, sf) as u64, sext(op2, sf) as u64, sext(result, sf) as u64);
        state.set_flags(nzcv);
    }
    state.set_reg(rd as usize, result);
}

fn do_load_store(
    state: &mut GuestState,
    is_load: bool,
    width: Width,
    signed: bool,
    sf: bool,
    rt: u8,
    guest_addr: u64,
) {
    let host_addr = state.g2h(guest_addr);
    if is_load {
        // SAFETY: the guest address space is identity-mapped at
        // `guest_base` for the lifetime of this translator instance
        // (spec.md §4.C contract 2); this mirrors exactly what
        // emitted code does via ENV_REG-relative loads.
        let raw: u64 = unsafe {
            match width {
                Width::B => host_addr.read() as u64,
                Width::H => (host_addr as *const u16).read_unaligned() as u64,
                Width::W => (host_addr as *const u32).read_unaligned() as u64,
                Width::X => (host_addr as *const u64).read_unaligned(),
            }
        };
        let result = if signed {
            let bits_wide = width.bytes() * 8;
            let shift = 64 - bits_wide;
            (((raw << shift) as i64) >> shift) as u64 & mask_for(sf)
        } else {
            raw
        };
        state.set_reg(rt as usize, result);
    } else {
        let value = state.get_reg(rt as usize);
        unsafe {
            match width {
                Width::B => host_addr.write(value as u8),
                Width::H => (host_addr as *mut u16).write_unaligned(value as u16),
                Width::W => (host_addr as *mut u32).write_unaligned(value as u32),
                Width::X => (host_addr as *mut u64).write_unaligned(value),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbt_decode::decode;

    fn add_imm(sf: bool, rd: u8, rn: u8, imm: u32) -> u32 {
        ((sf as u32) << 31) | (0b10001 << 24) | (imm << 10) | ((rn as u32) << 5) | rd as u32
    }

    fn subs_imm(rd: u8, rn: u8, imm: u32) -> u32 {
        (1 << 31) | (1 << 30) | (1 << 29) | (0b10001 << 24) | (imm << 10) | ((rn as u32) << 5) | rd as u32
    }

    #[test]
    fn add_immediate_updates_destination_register() {
        let mut state = GuestState::new();
        state.set_reg(1, 41);
        let insn = decode(add_imm(true, 0, 1, 1), 0);
        let outcome = interpret(&mut state, &insn, 0);
        assert_eq!(state.get_reg(0), 42);
        assert_eq!(outcome, StepOutcome::Continue(4));
    }

    #[test]
    fn subs_to_zero_sets_zero_flag() {
        let mut state = GuestState::new();
        state.set_reg(1, 7);
        let insn = decode(subs_imm(31, 1, 7), 0);
        interpret(&mut state, &insn, 0);
        assert!(Cond::Eq.holds(state.get_flags()));
    }

    #[test]
    fn svc_sets_syscall_exit_reason_and_resume_pc() {
        let mut state = GuestState::new();
        let word = (0b1101_0100 << 24) | (0x42u32 << 5) | 0b01;
        let insn = decode(word, 0x100);
        let outcome = interpret(&mut state, &insn, 0x100);
        assert_eq!(state.exit_reason, dbt_core::state::exit_reason::SYSCALL);
        assert_eq!(outcome, StepOutcome::Exit(0x104));
        assert_eq!(state.get_pc(), 0x104);
    }

    #[test]
    fn branch_with_link_sets_x30_to_return_address() {
        let mut state = GuestState::new();
        let insn = decode((1 << 31) | (0b00101 << 26) | 2u32, 0x1000);
        let outcome = interpret(&mut state, &insn, 0x1000);
        assert_eq!(state.get_reg(30), 0x1004);
        assert_eq!(outcome, StepOutcome::Continue(0x1008));
    }

    #[test]
    fn load_then_store_round_trips_through_guest_memory() {
        let mut backing = vec![0u8; 64];
        let mut state = GuestState::new();
        state.guest_base = backing.as_mut_ptr() as u64;
        state.set_reg(2, 0xAABB_CCDD_EEFF_0011);
        let str_word =
            (0b11 << 30) | (0b111 << 27) | (0b01 << 24) | (0b00 << 22) | (0 << 10) | (0 << 5) | 2;
        let ldr_word =
            (0b11 << 30) | (0b111 << 27) | (0b01 << 24) | (0b01 << 22) | (0 << 10) | (0 << 5) | 3;
        interpret(&mut state, &decode(str_word, 0), 0);
        interpret(&mut state, &decode(ldr_word, 0), 0);
        assert_eq!(state.get_reg(3), 0xAABB_CCDD_EEFF_0011);
    }
}
