//! Minimal demo runner: loads a flat blob of raw ARM64 instructions at
//! guest address 0 and runs it to completion.
//!
//! Deliberately not an ELF loader (spec.md §1 lists guest ELF parsing,
//! VDSO resolution, and syscall emulation as external collaborators);
//! this binary exists to exercise `dbt-runtime` end to end the way the
//! teacher's `linux-user/src/main.rs` exercises its own core, scaled
//! down to a single flat image instead of a process loader.

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use dbt_core::state::GuestState;
use dbt_runtime::{SyscallDispatch, SyscallOutcome, Translator};

/// AArch64 Linux syscall numbers the demo dispatcher understands.
mod syscall_nr {
    pub const WRITE: u64 = 64;
    pub const BRK: u64 = 214;
    pub const EXIT: u64 = 93;
    pub const EXIT_GROUP: u64 = 94;
}

#[derive(Parser, Debug)]
#[command(about = "Run a flat ARM64 instruction blob under the translator")]
struct Args {
    /// Path to a flat binary of raw little-endian A64 instruction words.
    image: PathBuf,

    /// Guest PC to start execution at, relative to the image's base.
    #[arg(long, default_value_t = 0)]
    entry: u64,

    /// Print cumulative translator statistics to stderr before exiting.
    #[arg(long)]
    stats: bool,
}

/// Syscall collaborator covering just enough of the Linux AArch64 ABI
/// to run a trivial guest program end to end (spec.md §6's example
/// set: `exit`, `exit_group`, `write`, `brk`).
struct DemoSyscalls {
    brk: u64,
}

impl SyscallDispatch for DemoSyscalls {
    fn dispatch(&mut self, state: &mut GuestState) -> SyscallOutcome {
        let nr = state.get_reg(dbt_runtime::SYSCALL_NUM_REG);
        match nr {
            syscall_nr::EXIT | syscall_nr::EXIT_GROUP => {
                SyscallOutcome::Stop(state.get_reg(0) as i32)
            }
            syscall_nr::WRITE => {
                let fd = state.get_reg(0);
                let buf = state.get_reg(1);
                let len = state.get_reg(2) as usize;
                let host_ptr = state.g2h(buf);
                // SAFETY: `buf`/`len` come from guest-controlled
                // registers; reading them as a byte slice mirrors what
                // a real syscall-emulation layer does before handing
                // guest-supplied pointers to the host. Out-of-bounds
                // reads here are the demo's problem, not a soundness
                // hole in the translator itself.
                let bytes = unsafe { std::slice::from_raw_parts(host_ptr, len) };
                let written = match fd {
                    1 => std::io::stdout().write(bytes),
                    2 => std::io::stderr().write(bytes),
                    _ => Ok(0),
                }
                .unwrap_or(0);
                state.set_reg(0, written as u64);
                SyscallOutcome::Continue
            }
            syscall_nr::BRK => {
                let requested = state.get_reg(0);
                if requested > self.brk {
                    self.brk = requested;
                }
                state.set_reg(0, self.brk);
                SyscallOutcome::Continue
            }
            other => {
                log::warn!("unhandled syscall number {other}, returning -ENOSYS");
                state.set_reg(0, (-38i64) as u64); // -ENOSYS
                SyscallOutcome::Continue
            }
        }
    }
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();
    match run(args) {
        Ok(code) => ExitCode::from((code & 0xFF) as u8),
        Err(e) => {
            eprintln!("dbt-run: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<i32> {
    let mut image = fs::read(&args.image)
        .with_context(|| format!("reading guest image {}", args.image.display()))?;
    // Pad so a trailing partial instruction word never gets fetched;
    // the decoder always reads a full 4-byte word at pc_cursor.
    while image.len() % 4 != 0 {
        image.push(0);
    }

    let syscalls = DemoSyscalls { brk: image.len() as u64 };
    let mut translator = Translator::init(syscalls)?;
    translator.set_guest_base(image.as_mut_ptr() as u64);

    info!("running {} bytes from {:#x}", image.len(), args.entry);
    let code = translator.run(args.entry)?;

    if args.stats {
        eprint!("{}", translator.stats_get());
    }
    Ok(code)
}
