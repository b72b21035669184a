//! End-to-end scenarios exercising `dbt-builder`, `dbt-cache`, and
//! `dbt-runtime` together against small guest images, one scenario per
//! black-box behaviour the runtime promises callers.
//!
//! Every block below is built with an explicit terminator (`RET`,
//! `B.cond`, or `SVC`) as its last instruction. Falling off the end of a
//! block into padding decodes as `Kind::Unknown`, which the builder
//! translates into a real host trap instruction rather than a clean
//! exit — fine for a guest that's genuinely misbehaving, fatal to a test
//! process that executes it. Every guest image here is sized to exactly
//! its instructions; none of them fall through.

use crate::encode::*;
use dbt_core::state::{exit_reason, GuestState};
use dbt_runtime::{SyscallDispatch, SyscallOutcome, Translator};

struct NeverCalled;
impl SyscallDispatch for NeverCalled {
    fn dispatch(&mut self, _state: &mut GuestState) -> SyscallOutcome {
        panic!("no syscall expected in this scenario");
    }
}

fn translator(bytes: &mut [u8]) -> Translator<NeverCalled> {
    let mut t = Translator::init(NeverCalled).unwrap();
    t.set_guest_base(bytes.as_mut_ptr() as u64);
    t
}

/// E2E-1: `reg0 = reg1 + reg2; return` with reg1=5, reg2=7 yields reg0=12.
#[test]
fn constant_add() {
    let words = [add_reg(true, 0, 1, 2), ret(30)];
    let mut bytes = words_to_bytes(&words);
    let mut t = translator(&mut bytes);

    t.set_reg(1, 5);
    t.set_reg(2, 7);
    t.set_reg(30, words.len() as u64 * 4); // link register: address past the block

    let entry = t.translate(0).unwrap();
    t.execute(entry);

    assert_eq!(t.get_reg(0), 12);
    assert_eq!(t.get_pc(), words.len() as u64 * 4);
}

/// E2E-2: subtracting equal operands to zero sets Z and C, clears N and V.
#[test]
fn subtract_to_zero() {
    let words = [subs_reg(true, 0, 1, 2), ret(30)];
    let mut bytes = words_to_bytes(&words);
    let mut t = translator(&mut bytes);

    t.set_reg(1, 42);
    t.set_reg(2, 42);
    t.set_reg(30, words.len() as u64 * 4);

    let entry = t.translate(0).unwrap();
    t.execute(entry);

    assert_eq!(t.get_reg(0), 0);
    let nzcv = t.get_flags();
    assert_eq!((nzcv >> 31) & 1, 0, "N should be clear");
    assert_eq!((nzcv >> 30) & 1, 1, "Z should be set");
    assert_eq!((nzcv >> 29) & 1, 1, "C should be set (no borrow)");
    assert_eq!((nzcv >> 28) & 1, 0, "V should be clear");
}

/// E2E-3: translating the same guest PC twice serves the second call
/// from the translation cache, and executing the cached entry twice
/// produces identical observable state both times.
#[test]
fn cached_rerun_hits_the_translation_cache() {
    let words = [add_reg(true, 0, 1, 2), ret(30)];
    let mut bytes = words_to_bytes(&words);
    let mut t = translator(&mut bytes);
    t.set_reg(1, 5);
    t.set_reg(2, 7);
    t.set_reg(30, words.len() as u64 * 4);

    let first_entry = t.translate(0).unwrap();
    t.execute(first_entry);
    let reg0_first = t.get_reg(0);
    let pc_first = t.get_pc();

    t.set_reg(30, words.len() as u64 * 4);
    let second_entry = t.translate(0).unwrap();
    t.execute(second_entry);

    assert_eq!(first_entry, second_entry);
    assert_eq!(t.stats_get().cache_misses, 1);
    assert_eq!(t.stats_get().cache_hits, 1);
    assert_eq!(t.get_reg(0), reg0_first);
    assert_eq!(t.get_pc(), pc_first);
}

/// E2E-4: a single `B.EQ` block sends PC to the branch target when Z is
/// set going in, and to the fallthrough address when it isn't. The
/// translated code reloads NZCV from guest state at execution time, so
/// the same cached block serves both flag settings.
#[test]
fn conditional_branch_taken_and_not_taken() {
    let taken_offset_words = 2; // branch target = pc + 8
    let words = [b_cond(COND_EQ, taken_offset_words)];
    let mut bytes = words_to_bytes(&words);
    let mut t = translator(&mut bytes);

    let entry = t.translate(0).unwrap();

    t.set_pc(0);
    t.set_flags(1 << 30); // Z=1
    t.execute(entry);
    assert_eq!(t.get_pc(), 8, "Z=1 should take the branch");

    t.set_pc(0);
    t.set_flags(0); // Z=0
    t.execute(entry);
    assert_eq!(t.get_pc(), 4, "Z=0 should fall through");
}

/// E2E-5: storing a byte to guest memory and loading it back round-trips
/// through the identity-mapped guest address space, zero-extending into
/// the full 64-bit destination register.
#[test]
fn load_store_round_trip() {
    let code = [ldrb_imm(0, 1, 16), ret(30)];
    let mut image = vec![0u8; 64];
    image[..code.len() * 4].copy_from_slice(&words_to_bytes(&code));
    image[16] = 0xAB; // guest address A = base (X1=0) + imm (16)

    let mut t = translator(&mut image);
    t.set_reg(1, 0);
    t.set_reg(30, code.len() as u64 * 4);

    let entry = t.translate(0).unwrap();
    t.execute(entry);

    assert_eq!(t.get_reg(0), 0xAB);
}

/// E2E-6: invalidating a cached block and retranslating the same guest
/// PC produces a fresh host entry (the bump-allocated code cache never
/// reuses freed space) that executes with the same guest-visible effect
/// as the original.
#[test]
fn invalidate_then_rebuild() {
    let words = [add_reg(true, 0, 1, 2), ret(30)];
    let mut bytes = words_to_bytes(&words);
    let mut t = translator(&mut bytes);
    t.set_reg(1, 5);
    t.set_reg(2, 7);

    t.set_reg(30, words.len() as u64 * 4);
    let first_entry = t.translate(0).unwrap();
    t.execute(first_entry);
    assert_eq!(t.get_reg(0), 12);

    assert!(t.invalidate(0));

    t.set_reg(30, words.len() as u64 * 4);
    let second_entry = t.translate(0).unwrap();
    assert_ne!(first_entry, second_entry);
    t.execute(second_entry);
    assert_eq!(t.get_reg(0), 12);

    assert_eq!(t.stats_get().translations, 2);
}

/// A guest `BRK` cleanly sets `exit_reason::TRAP` and returns, rather
/// than falling into the builder's raw-trap path for undecodable words
/// (sanity check underpinning the "every block ends in an explicit
/// terminator" discipline the other scenarios rely on).
#[test]
fn guest_brk_sets_trap_exit_reason() {
    let brk: u32 = (0b1101_0100 << 24) | (0b001 << 21);
    let words = [brk];
    let mut bytes = words_to_bytes(&words);
    let mut t = translator(&mut bytes);
    let entry = t.translate(0).unwrap();
    t.execute(entry);
    assert_eq!(t.get_pc(), 0);
    assert_eq!(t.state.exit_reason, exit_reason::TRAP);
}
