//! Entering the foreign program and getting back out of it.

use std::cell::Cell;

use tracing::debug_span;

use crate::{
    arch::{self, Checkpoint, SavedRegisters, ShimReturn},
    fmt::ForceLowerHex,
    session::{RunOutcome, Session},
    syscall::Flow,
};

#[derive(Clone, Copy)]
struct Active {
    session: *mut Session<'static>,
    checkpoint: *const Checkpoint,
}

thread_local! {
    // only set while `run` is inside the foreign program
    static ACTIVE: Cell<Option<Active>> = const { Cell::new(None) };
}

/// Calls the program's entry point on its own stack and returns once it exits, returns, or
/// faults.
pub fn run(session: &mut Session<'_>) -> RunOutcome {
    let entry = session.layout.entry_point().0;
    let argc = session.memory.args().argc();
    let argv = session.memory.args().argv().0;
    let stack_top = session.memory.stack_top().0;
    let _span = debug_span!("running", entry = ?ForceLowerHex(entry), argc).entered();

    let mut checkpoint = Checkpoint::default();
    let checkpoint: *mut Checkpoint = &mut checkpoint;
    let previous = ACTIVE.replace(Some(Active {
        session: session as *mut Session<'_> as *mut Session<'static>,
        checkpoint,
    }));
    // safety: the image was loaded and relocated by the caller, the stack belongs to the
    // session, and the checkpoint outlives the call
    let value = unsafe { arch::launch(entry, argc, argv, checkpoint, stack_top) };
    ACTIVE.set(previous);

    let outcome = session.outcome.take().unwrap_or(RunOutcome::Exited(value as i32));
    tracing::debug!(?outcome, "program finished");
    outcome
}

/// Called by the syscall shim, on the foreign stack, with the caller's registers.
#[cfg_attr(not(all(target_os = "linux", any(target_arch = "x86_64", target_arch = "aarch64"))), allow(dead_code))]
pub(crate) extern "C" fn syscall_entry(regs: &SavedRegisters) -> ShimReturn {
    let Some(active) = ACTIVE.get() else {
        eprintln!("blockexec: syscall shim called with no program running");
        std::process::abort();
    };
    // safety: `run` published this pointer from a live `&mut Session` it does not touch until
    // the foreign program is done
    let session = unsafe { &mut *active.session };
    match session.dispatch(regs.syscall_number(), regs.syscall_args(), regs) {
        Flow::Resume(value) => ShimReturn::resume(value),
        Flow::Terminate(code) => ShimReturn::restore(active.checkpoint, code),
    }
}
