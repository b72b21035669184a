//! x86-64 host register numbering and ABI constants.
//!
//! Grounded on the teacher's `tcg-backend/x86_64/regs.rs`: the discriminant
//! values match the x86-64 ModR/M and REX register numbering directly so
//! `Reg as u8` is always the right encoding.

/// x86-64 general-purpose register indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Reg {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
}

impl Reg {
    /// Low 3 bits of the register encoding (for ModR/M reg/rm fields).
    #[inline]
    pub const fn low3(self) -> u8 {
        (self as u8) & 0x7
    }

    /// Whether this register needs a REX prefix to be addressable
    /// (R8-R15).
    #[inline]
    pub const fn needs_rex(self) -> bool {
        (self as u8) >= 8
    }

    /// Map a guest register index 0..31 to a host register by the fixed
    /// low-nibble identity mapping spec.md §4.E.1 calls for, skipping the
    /// registers this backend reserves for its own use (RSP, RBP).
    ///
    /// Indices are taken modulo the available pool; callers that need a
    /// specific scratch register (e.g. for a multi-step sequence) use
    /// `SCRATCH`/`SCRATCH2` directly instead of this mapping.
    pub const fn from_guest_index(i: usize) -> Reg {
        const POOL: [Reg; 12] = [
            Reg::Rax,
            Reg::Rcx,
            Reg::Rdx,
            Reg::Rbx,
            Reg::Rsi,
            Reg::Rdi,
            Reg::R8,
            Reg::R9,
            Reg::R10,
            Reg::R11,
            Reg::R13,
            Reg::R14,
        ];
        POOL[i % POOL.len()]
    }
}

/// TCG_AREG0-equivalent: RBP holds the pointer to `GuestState` across all
/// emitted block code, matching the teacher's x86-64 convention where
/// EBP/RBP is the persistent env pointer.
pub const ENV_REG: Reg = Reg::Rbp;

/// General-purpose scratch registers available to translators for
/// multi-step sequences (e.g. computing a pair-load address). Never
/// produced by `Reg::from_guest_index`.
pub const SCRATCH: Reg = Reg::R12;
pub const SCRATCH2: Reg = Reg::R15;

/// Callee-saved registers the prologue/epilogue must save/restore, in
/// System V AMD64 ABI order.
pub const CALLEE_SAVED: &[Reg] = &[Reg::Rbp, Reg::Rbx, Reg::R12, Reg::R13, Reg::R14, Reg::R15];

/// Function argument registers (System V AMD64 ABI).
pub const CALL_ARG_REGS: &[Reg] = &[Reg::Rdi, Reg::Rsi, Reg::Rdx, Reg::Rcx, Reg::R8, Reg::R9];

pub const STACK_ALIGN: usize = 16;
pub const STATIC_CALL_ARGS_SIZE: usize = 32;

pub const PUSH_SIZE: usize = (1 + CALLEE_SAVED.len()) * 8;
pub const FRAME_SIZE: usize = {
    let raw = PUSH_SIZE + STATIC_CALL_ARGS_SIZE;
    (raw + STACK_ALIGN - 1) & !(STACK_ALIGN - 1)
};
pub const STACK_ADDEND: usize = FRAME_SIZE - PUSH_SIZE;
