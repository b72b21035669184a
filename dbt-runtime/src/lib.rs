//! Runtime glue (spec.md §4.I): the `Translator` facade that owns guest
//! state, the code cache, and the translation cache, and drives the
//! outer fetch-translate-execute loop.
//!
//! Grounded on the shape of the teacher's `RiscvCpu`/`linux-user` main
//! loop: one struct owns everything a guest thread needs, exposes a
//! small get/set surface over guest state, and a `run` loop that keeps
//! calling into generated code until a stop condition is reached.

use std::mem;

use thiserror::Error;

use dbt_builder::BuildError;
use dbt_cache::{CacheError, CodeCache, TCache};
use dbt_core::state::{exit_reason, GuestState};
use dbt_core::stats::Stats;
use dbt_decode::decode;

/// Outcome a `SyscallDispatch` implementation reports back to the run
/// loop after handling an `SVC` exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallOutcome {
    /// Keep running at the guest PC the block already stored.
    Continue,
    /// Stop the run loop, e.g. on `exit`/`exit_group`.
    Stop(i32),
}

/// Host fault vectors a `FaultSink` can be told about. Real signal-to-
/// vector translation is out of scope (spec.md §1); this is the seam a
/// caller plugs a signal handler into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultVector {
    Segv,
    Bus,
    Illegal,
    Breakpoint,
}

/// Invoked by the runtime when a block exits with `exit_reason::SYSCALL`.
/// Grounded on the teacher's `linux-user/src/syscall.rs` dispatch shape:
/// syscall number in a fixed register, arguments in the next six, result
/// written back to the return-value register.
pub trait SyscallDispatch {
    fn dispatch(&mut self, state: &mut GuestState) -> SyscallOutcome;
}

/// Invoked when a block exits with `exit_reason::TRAP` (a guest `BRK`, or
/// an undecodable instruction the builder bailed out on after already
/// emitting real output).
pub trait FaultSink {
    fn on_fault(&mut self, guest_pc: u64, vector: FaultVector);
}

/// A `FaultSink` that does nothing; the default for callers that don't
/// need fault handling.
pub struct NullFaultSink;

impl FaultSink for NullFaultSink {
    fn on_fault(&mut self, _guest_pc: u64, _vector: FaultVector) {}
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("chain target at {guest_pc:#x} is not currently an executable block")]
    ChainTargetNotExecutable { guest_pc: u64 },
}

/// Guest register numbers ARM64 reserves for the syscall ABI: number in
/// X8, arguments in X0-X5, result in X0. Matches the Linux AArch64
/// syscall convention the teacher's `linux-user` targets.
pub const SYSCALL_NUM_REG: usize = 8;
pub const SYSCALL_ARG_REGS: [usize; 6] = [0, 1, 2, 3, 4, 5];
pub const SYSCALL_RET_REG: usize = 0;

type BlockFn = extern "C" fn(*mut GuestState);

/// Owns a single guest thread's translator instance end to end: state,
/// both caches, statistics, and the collaborators the core consumes
/// (spec.md §6).
pub struct Translator<S: SyscallDispatch, F: FaultSink = NullFaultSink> {
    pub state: GuestState,
    code_cache: CodeCache,
    tcache: TCache,
    stats: Stats,
    running: bool,
    syscalls: S,
    faults: F,
}

impl<S: SyscallDispatch> Translator<S, NullFaultSink> {
    /// `init` (spec.md §6): creates guest state, code cache, and
    /// translation cache at their default sizes.
    pub fn init(syscalls: S) -> Result<Self, RuntimeError> {
        Self::init_with_fault_sink(syscalls, NullFaultSink)
    }
}

impl<S: SyscallDispatch, F: FaultSink> Translator<S, F> {
    pub fn init_with_fault_sink(syscalls: S, faults: F) -> Result<Self, RuntimeError> {
        Ok(Self {
            state: GuestState::new(),
            code_cache: CodeCache::with_default_size()?,
            tcache: TCache::with_default_capacity(),
            stats: Stats::new(),
            running: false,
            syscalls,
            faults,
        })
    }

    /// `cleanup` (spec.md §6): the reverse of `init`. With no manual
    /// resource other than the mmap'd code cache (released by its own
    /// `Drop`), this just consumes `self`.
    pub fn cleanup(self) {}

    pub fn get_reg(&self, i: usize) -> u64 {
        self.state.get_reg(i)
    }
    pub fn set_reg(&mut self, i: usize, v: u64) {
        self.state.set_reg(i, v)
    }
    pub fn get_pc(&self) -> u64 {
        self.state.get_pc()
    }
    pub fn set_pc(&mut self, v: u64) {
        self.state.set_pc(v)
    }
    pub fn get_sp(&self) -> u64 {
        self.state.get_sp()
    }
    pub fn set_sp(&mut self, v: u64) {
        self.state.set_sp(v)
    }
    pub fn get_flags(&self) -> u64 {
        self.state.get_flags()
    }
    pub fn set_flags(&mut self, v: u64) {
        self.state.set_flags(v)
    }

    /// Set the host base address the guest's identity-mapped address
    /// space is reached through (spec.md §9 open question 3).
    pub fn set_guest_base(&mut self, base: u64) {
        self.state.guest_base = base;
    }

    pub fn stats_get(&self) -> Stats {
        self.stats
    }
    pub fn stats_reset(&mut self) {
        self.stats.reset();
    }

    /// `translate(guest_pc) -> host_entry?` (spec.md §6): returns the
    /// cached entry point, or builds and caches a new one.
    pub fn translate(&mut self, guest_pc: u64) -> Result<usize, RuntimeError> {
        if let Some(entry) = self.tcache.lookup(guest_pc) {
            self.stats.cache_hits += 1;
            return Ok(entry);
        }
        self.stats.cache_misses += 1;
        let block = dbt_builder::build(guest_pc, &self.state, &mut self.code_cache)?;
        self.stats.translations += 1;
        let entry = block.host_entry;
        self.tcache.insert(block);
        Ok(entry)
    }

    /// `execute(host_entry)` (spec.md §6): run exactly one block. The
    /// block's own prologue/epilogue make this call ABI-compatible with
    /// a plain `extern "C" fn(*mut GuestState)`.
    pub fn execute(&mut self, host_entry: usize) {
        // SAFETY: `host_entry` was produced by `dbt_builder::build` and
        // committed into `self.code_cache`, which has been marked
        // executable and is never written to again without first being
        // marked writable (and therefore non-executable) — this call
        // only ever happens between those two states, per the W^X
        // discipline in `dbt_cache::codecache`.
        let f: BlockFn = unsafe { mem::transmute::<usize, BlockFn>(host_entry) };
        f(&mut self.state as *mut GuestState);
        self.stats.executions += 1;
    }

    /// `run(guest_pc)` (spec.md §4.I): the outer loop. Keeps translating
    /// and executing blocks, reacting to each block's `exit_reason`,
    /// until `request_stop` is called or a syscall asks to stop.
    pub fn run(&mut self, guest_pc: u64) -> Result<i32, RuntimeError> {
        self.state.set_pc(guest_pc);
        self.running = true;
        while self.running {
            let pc = self.state.get_pc();
            let entry = self.translate(pc)?;
            self.execute(entry);

            match self.state.exit_reason {
                exit_reason::NORMAL => {}
                exit_reason::SYSCALL => match self.syscalls.dispatch(&mut self.state) {
                    SyscallOutcome::Continue => {}
                    SyscallOutcome::Stop(code) => return Ok(code),
                },
                exit_reason::TRAP => {
                    self.faults.on_fault(self.state.get_pc(), FaultVector::Breakpoint);
                    return Ok(0);
                }
                exit_reason::INTERPRET => {
                    self.interpret_one()?;
                }
                other => {
                    log::warn!("unrecognized exit_reason {other} at pc={:#x}", self.state.get_pc());
                    return Ok(0);
                }
            }
        }
        Ok(0)
    }

    pub fn request_stop(&mut self) {
        self.running = false;
    }

    /// `interpret(insn_bytes, pc) -> next_pc` (spec.md §6): decode and
    /// interpret exactly one instruction at the current guest PC,
    /// leaving `state.pc` at the result.
    pub fn interpret_one(&mut self) -> Result<u64, RuntimeError> {
        let pc = self.state.get_pc();
        // SAFETY: see dbt_builder::build — the guest address space is
        // identity-mapped at `guest_base` for the translator's lifetime.
        let word = unsafe { (self.state.g2h(pc) as *const u32).read_unaligned() };
        let insn = decode(word, pc);
        let outcome = dbt_interp::interpret(&mut self.state, &insn, pc);
        let next_pc = match outcome {
            dbt_interp::StepOutcome::Continue(next) => {
                self.state.set_pc(next);
                next
            }
            dbt_interp::StepOutcome::Exit(next) => next,
        };
        Ok(next_pc)
    }

    /// `invalidate(guest_pc)` (spec.md §6, §4.F): drop the cached block
    /// for `guest_pc`. The code bytes stay resident in the code cache
    /// (no fine-grained free) but become unreachable via lookup.
    pub fn invalidate(&mut self, guest_pc: u64) -> bool {
        self.tcache.invalidate(guest_pc)
    }

    /// `flush_cache()` (spec.md §6): drop every cached block and reset
    /// the code-cache bump pointer, reclaiming all space at once.
    pub fn flush_cache(&mut self) -> Result<(), RuntimeError> {
        self.tcache.flush();
        self.code_cache.reset()?;
        Ok(())
    }

    /// `chain(from, to, slot)` (spec.md §4.I): records that block
    /// `from_pc`'s exit `slot` should target `to_pc`'s block directly.
    ///
    /// This repository records the chain relationship in both blocks'
    /// `chain` fields (so `unchain` and invalidation bookkeeping behave
    /// exactly per §4.E.2 and §5) but does not patch a direct jump into
    /// the generated code: the builder does not track per-exit
    /// placeholder-jump offsets (a documented simplification, see
    /// DESIGN.md), so every block still returns through the outer `run`
    /// loop regardless of `chain` state. The loop's cache lookup on the
    /// next iteration is the unoptimized equivalent of a chained jump.
    pub fn chain(&mut self, from_pc: u64, to_pc: u64, slot: usize) -> Result<(), RuntimeError> {
        let to_entry = self
            .tcache
            .lookup_block(to_pc)
            .map(|tb| tb.host_entry)
            .ok_or(RuntimeError::ChainTargetNotExecutable { guest_pc: to_pc })?;
        let from = self
            .tcache
            .lookup_block_mut(from_pc)
            .ok_or(RuntimeError::ChainTargetNotExecutable { guest_pc: from_pc })?;
        from.chain[slot.min(1)] = Some(to_entry);
        Ok(())
    }

    /// `unchain(block)` (spec.md §4.I): clear all outgoing chains from
    /// the block at `guest_pc`. Called before a block is invalidated.
    pub fn unchain(&mut self, guest_pc: u64) {
        if let Some(tb) = self.tcache.lookup_block_mut(guest_pc) {
            tb.chain = [None, None];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StopImmediately;
    impl SyscallDispatch for StopImmediately {
        fn dispatch(&mut self, _state: &mut GuestState) -> SyscallOutcome {
            SyscallOutcome::Stop(0)
        }
    }

    fn ret(rn: u8) -> u32 {
        (0b1101011 << 25) | (0b0010 << 21) | (0b11111 << 16) | ((rn as u32) << 5)
    }

    fn svc(imm16: u16) -> u32 {
        (0b1101_0100 << 24) | ((imm16 as u32) << 5) | 0b01
    }

    #[test]
    fn run_stops_on_syscall_dispatch_stop() {
        let words = [svc(0), ret(30)];
        let mut bytes = Vec::new();
        for w in words {
            bytes.extend_from_slice(&w.to_le_bytes());
        }
        let mut t = Translator::init(StopImmediately).unwrap();
        t.set_guest_base(bytes.as_ptr() as u64);
        let code = t.run(0).unwrap();
        assert_eq!(code, 0);
        assert_eq!(t.stats_get().translations, 1);
    }

    #[test]
    fn translate_caches_on_second_lookup() {
        let words = [ret(30)];
        let mut bytes = Vec::new();
        for w in words {
            bytes.extend_from_slice(&w.to_le_bytes());
        }
        let mut t = Translator::init(StopImmediately).unwrap();
        t.set_guest_base(bytes.as_ptr() as u64);
        let a = t.translate(0).unwrap();
        let b = t.translate(0).unwrap();
        assert_eq!(a, b);
        assert_eq!(t.stats_get().cache_hits, 1);
        assert_eq!(t.stats_get().cache_misses, 1);
    }

    #[test]
    fn invalidate_then_translate_rebuilds() {
        let words = [ret(30)];
        let mut bytes = Vec::new();
        for w in words {
            bytes.extend_from_slice(&w.to_le_bytes());
        }
        let mut t = Translator::init(StopImmediately).unwrap();
        t.set_guest_base(bytes.as_ptr() as u64);
        t.translate(0).unwrap();
        assert!(t.invalidate(0));
        t.translate(0).unwrap();
        assert_eq!(t.stats_get().translations, 2);
    }
}
