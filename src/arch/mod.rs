//! The only place foreign code is entered or left. Each supported host provides:
//!
//! - `launch`: save callee-saved state into a [`Checkpoint`], switch to the foreign stack and
//!   call the entry point with `(argc, argv)`.
//! - `restore`: reload a [`Checkpoint`], making `launch` return.
//! - the syscall shim whose address is patched into the image. It saves every register into a
//!   `SavedRegisters` block, calls [`crate::context::syscall_entry`] and then either returns to
//!   the foreign caller or restores the checkpoint that came back in [`ShimReturn`].

#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
mod x86_64;
#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
pub use self::x86_64::context::*;

#[cfg(all(target_os = "linux", target_arch = "aarch64"))]
mod aarch64;
#[cfg(all(target_os = "linux", target_arch = "aarch64"))]
pub use self::aarch64::context::*;

#[cfg(not(all(target_os = "linux", any(target_arch = "x86_64", target_arch = "aarch64"))))]
mod unsupported;
#[cfg(not(all(target_os = "linux", any(target_arch = "x86_64", target_arch = "aarch64"))))]
pub use self::unsupported::*;

/// Host stack pointer with every callee-saved register pushed below it.
#[derive(Debug, Default)]
#[repr(C)]
pub struct Checkpoint {
    pub sp: u64,
}

/// What `syscall_entry` hands back to the shim, in the two return registers. A null
/// `checkpoint` means "return `value` to the program"; anything else means "restore this
/// checkpoint, with `value` as the exit code".
#[repr(C)]
pub struct ShimReturn {
    pub value: u64,
    pub checkpoint: *const Checkpoint,
}

impl ShimReturn {
    pub fn resume(value: u64) -> Self {
        ShimReturn {
            value,
            checkpoint: core::ptr::null(),
        }
    }

    pub fn restore(checkpoint: *const Checkpoint, code: u64) -> Self {
        ShimReturn {
            value: code,
            checkpoint,
        }
    }
}
