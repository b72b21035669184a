//! Guest thread state: general registers, stack pointer, program counter,
//! condition flags, and the vector register file.
//!
//! Layout is `#[repr(C)]` so emitted host code can address fields at fixed
//! byte offsets from the env pointer (the host RBP convention the backend
//! uses), the same contract the teacher's `RiscvCpu` establishes for its
//! globals.

/// Number of ARM64 general-purpose registers, X0-X30 plus the hardwired
/// XZR/WZR slot at index 31.
pub const NUM_GPRS: usize = 32;

/// Register index that reads as zero and discards writes (XZR/WZR).
pub const ZERO_REG: usize = 31;

/// Register index used as the link register by BL/RET (X30).
pub const LINK_REG: usize = 30;

/// Number of vector registers, V0-V31.
pub const NUM_VREGS: usize = 32;

/// Guest thread state for a single translator instance.
///
/// One `GuestState` is in scope for the lifetime of a `Translator`
/// (created at `init`, destroyed at `cleanup`; see spec.md §3). Translated
/// blocks and the interpreter are the only writers.
#[repr(C)]
pub struct GuestState {
    /// General-purpose registers X0-X30, plus index 31 reserved for XZR
    /// (always read as zero; see `get_reg`/`set_reg`).
    pub gpr: [u64; NUM_GPRS],
    /// Stack pointer. ARM64 keeps SP architecturally distinct from the
    /// GPR file rather than aliasing it into one of the 32 slots.
    pub sp: u64,
    /// Program counter: address of the next guest instruction.
    pub pc: u64,
    /// Condition flags word. Bits 31..28 hold N, Z, C, V respectively
    /// (matching ARM64 PSTATE.NZCV); all other bits are reserved as zero.
    pub nzcv: u64,
    /// Vector registers V0-V31, each a 128-bit value split into two
    /// 64-bit words (lo, hi).
    pub vreg: [(u64, u64); NUM_VREGS],
    /// Host base address of the identity-mapped guest address space.
    /// Guest address `a` is reachable at host address `a + guest_base`;
    /// `guest_base` is 0 when the guest's preferred addresses could be
    /// reserved directly (the common case for a static PIE-disabled
    /// binary), and non-zero otherwise (open question 3, see DESIGN.md).
    pub guest_base: u64,
    /// Set by translated code immediately before it returns to the
    /// runtime, to one of the `exit_reason` constants below. The core
    /// crate only defines the slot and its values; deciding what to do
    /// about a given reason (dispatch a syscall, re-enter the
    /// interpreter, stop the run loop) is the runtime's concern, not
    /// this crate's (spec.md §4.E.1 "System / breakpoint").
    pub exit_reason: u64,
}

/// `exit_reason` values a translated block can leave behind.
pub mod exit_reason {
    /// Fell off the end of the block, or a direct/indirect branch was
    /// resolved and stored into `pc`; the runtime should look up (or
    /// build) the block at the new `pc` and keep running.
    pub const NORMAL: u64 = 0;
    /// The block ended on a guest `SVC`; the runtime's syscall
    /// collaborator should run before execution continues at `pc`.
    pub const SYSCALL: u64 = 1;
    /// The block ended on a guest `BRK`, or the builder hit an
    /// undecodable instruction after already emitting real output.
    pub const TRAP: u64 = 2;
    /// The block bailed out on a single instruction that has no
    /// translator yet; the runtime should call the interpreter for the
    /// one instruction at `pc` and then resume normal dispatch.
    pub const INTERPRET: u64 = 3;
}

impl GuestState {
    pub fn new() -> Self {
        Self {
            gpr: [0u64; NUM_GPRS],
            sp: 0,
            pc: 0,
            nzcv: 0,
            vreg: [(0u64, 0u64); NUM_VREGS],
            guest_base: 0,
            exit_reason: exit_reason::NORMAL,
        }
    }

    /// Read general register `i`. Index 31 (XZR) always reads zero.
    #[inline]
    pub fn get_reg(&self, i: usize) -> u64 {
        if i == ZERO_REG {
            0
        } else {
            self.gpr[i]
        }
    }

    /// Write general register `i`. Writes to index 31 (XZR) are discarded.
    #[inline]
    pub fn set_reg(&mut self, i: usize, v: u64) {
        if i != ZERO_REG {
            self.gpr[i] = v;
        }
    }

    #[inline]
    pub fn get_pc(&self) -> u64 {
        self.pc
    }

    #[inline]
    pub fn set_pc(&mut self, v: u64) {
        self.pc = v;
    }

    #[inline]
    pub fn get_sp(&self) -> u64 {
        self.sp
    }

    #[inline]
    pub fn set_sp(&mut self, v: u64) {
        self.sp = v;
    }

    #[inline]
    pub fn get_flags(&self) -> u64 {
        self.nzcv
    }

    #[inline]
    pub fn set_flags(&mut self, v: u64) {
        self.nzcv = v;
    }

    #[inline]
    pub fn get_vec(&self, i: usize) -> (u64, u64) {
        self.vreg[i]
    }

    #[inline]
    pub fn set_vec(&mut self, i: usize, lo: u64, hi: u64) {
        self.vreg[i] = (lo, hi);
    }

    /// Byte offset of `gpr[i]` from the start of the struct, for backends
    /// that address guest state directly from emitted code.
    pub const fn gpr_offset(i: usize) -> i32 {
        (i * 8) as i32
    }

    pub const SP_OFFSET: i32 = (NUM_GPRS * 8) as i32;
    pub const PC_OFFSET: i32 = Self::SP_OFFSET + 8;
    pub const NZCV_OFFSET: i32 = Self::PC_OFFSET + 8;
    pub const VREG_OFFSET: i32 = Self::NZCV_OFFSET + 8;
    pub const GUEST_BASE_OFFSET: i32 =
        Self::VREG_OFFSET + (NUM_VREGS * 16) as i32;
    pub const EXIT_REASON_OFFSET: i32 = Self::GUEST_BASE_OFFSET + 8;

    /// Translate a guest address to the host address it is mapped at.
    #[inline]
    pub fn g2h(&self, guest_addr: u64) -> *mut u8 {
        (guest_addr.wrapping_add(self.guest_base)) as *mut u8
    }
}

impl Default for GuestState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xzr_reads_zero_and_discards_writes() {
        let mut s = GuestState::new();
        s.set_reg(ZERO_REG, 0xdead_beef);
        assert_eq!(s.get_reg(ZERO_REG), 0);
    }

    #[test]
    fn ordinary_register_round_trips() {
        let mut s = GuestState::new();
        s.set_reg(3, 42);
        assert_eq!(s.get_reg(3), 42);
    }

    #[test]
    fn sp_is_independent_of_gpr_file() {
        let mut s = GuestState::new();
        s.set_sp(0x1000);
        s.set_reg(0, 0x2000);
        assert_eq!(s.get_sp(), 0x1000);
        assert_eq!(s.get_reg(0), 0x2000);
    }
}
