use core::fmt::Display;

use super::Checkpoint;

pub const SUPPORTED: bool = false;

/// Placeholder so syscall handling still builds and can be tested on hosts without a
/// trampoline.
#[derive(Clone, Default, Debug)]
#[repr(C)]
pub struct SavedRegisters {
    pub number: u64,
    pub args: [u64; 3],
}

impl SavedRegisters {
    pub fn syscall_number(&self) -> u64 {
        self.number
    }

    pub fn syscall_args(&self) -> [u64; 3] {
        self.args
    }
}

impl Display for SavedRegisters {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        writeln!(
            f,
            "number: {:#018x} args: {:#018x} {:#018x} {:#018x}",
            self.number, self.args[0], self.args[1], self.args[2]
        )
    }
}

/// # Safety
/// Never sound to call; loads are refused before getting here.
pub unsafe fn launch(_entry: u64, _argc: u64, _argv: u64, _checkpoint: *mut Checkpoint, _stack_top: u64) -> u64 {
    unimplemented!("no trampoline for this host")
}

pub fn syscall_shim_address() -> u64 {
    0
}
