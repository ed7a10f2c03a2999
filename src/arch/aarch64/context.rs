use core::{arch::global_asm, fmt::Display};

use super::super::Checkpoint;

pub const SUPPORTED: bool = true;

/// Register block built by the syscall shim on the foreign stack.
#[derive(Clone, Debug)]
#[repr(C)]
pub struct SavedRegisters {
    pub x: [u64; 31],
    /// The caller's stack pointer, as it was before the call into the shim.
    pub sp: u64,
    /// Return address into the foreign program.
    pub pc: u64,
}

impl Default for SavedRegisters {
    fn default() -> Self {
        SavedRegisters {
            x: [0; 31],
            sp: 0,
            pc: 0,
        }
    }
}

impl SavedRegisters {
    pub fn syscall_number(&self) -> u64 {
        self.x[0]
    }

    pub fn syscall_args(&self) -> [u64; 3] {
        [self.x[1], self.x[2], self.x[3]]
    }
}

impl Display for SavedRegisters {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for (i, reg) in self.x.iter().enumerate() {
            write!(f, "x{i:<2}: {reg:#018x} ")?;
            if i % 4 == 3 {
                writeln!(f)?;
            }
        }
        writeln!(f, "sp : {:#018x} pc : {:#018x}", self.sp, self.pc)
    }
}

extern "C" {
    fn blockexec_launch(
        entry: u64,
        argc: u64,
        argv: u64,
        checkpoint: *mut Checkpoint,
        stack_top: u64,
    ) -> u64;
    fn blockexec_syscall_shim();
}

/// # Safety
/// `entry` must be code that follows AAPCS64 and only leaves through a normal return or through
/// the syscall shim; `stack_top` must be the top of a writable stack that outlives the call.
pub unsafe fn launch(entry: u64, argc: u64, argv: u64, checkpoint: *mut Checkpoint, stack_top: u64) -> u64 {
    unsafe { blockexec_launch(entry, argc, argv, checkpoint, stack_top) }
}

pub fn syscall_shim_address() -> u64 {
    blockexec_syscall_shim as *const () as u64
}

// blockexec_launch(entry: x0, argc: x1, argv: x2, checkpoint: x3, stack_top: x4)
// blockexec_restore(checkpoint: x0, value: x1)
// blockexec_syscall_shim(number: x0, a0: x1, a1: x2, a2: x3) -> x0
global_asm!(
    ".text",
    ".p2align 2",
    ".globl blockexec_launch",
    ".type blockexec_launch,%function",
    "blockexec_launch:",
    "    stp x29, x30, [sp, #-16]!",
    "    stp x27, x28, [sp, #-16]!",
    "    stp x25, x26, [sp, #-16]!",
    "    stp x23, x24, [sp, #-16]!",
    "    stp x21, x22, [sp, #-16]!",
    "    stp x19, x20, [sp, #-16]!",
    "    stp d14, d15, [sp, #-16]!",
    "    stp d12, d13, [sp, #-16]!",
    "    stp d10, d11, [sp, #-16]!",
    "    stp d8, d9, [sp, #-16]!",
    "    mov x9, sp",
    "    str x9, [x3]",
    "    mov x19, x3",
    "    and x4, x4, #0xfffffffffffffff0",
    "    mov sp, x4",
    "    mov x9, x0",
    "    mov x0, x1",
    "    mov x1, x2",
    "    mov x29, xzr",
    "    blr x9",
    // the entry point returned instead of calling exit
    "    mov x1, x0",
    "    mov x0, x19",
    "    b .Lblockexec_restore",
    ".size blockexec_launch, . - blockexec_launch",
    "",
    ".p2align 2",
    ".globl blockexec_restore",
    ".type blockexec_restore,%function",
    "blockexec_restore:",
    ".Lblockexec_restore:",
    "    ldr x9, [x0]",
    "    mov sp, x9",
    "    mov x0, x1",
    "    ldp d8, d9, [sp], #16",
    "    ldp d10, d11, [sp], #16",
    "    ldp d12, d13, [sp], #16",
    "    ldp d14, d15, [sp], #16",
    "    ldp x19, x20, [sp], #16",
    "    ldp x21, x22, [sp], #16",
    "    ldp x23, x24, [sp], #16",
    "    ldp x25, x26, [sp], #16",
    "    ldp x27, x28, [sp], #16",
    "    ldp x29, x30, [sp], #16",
    "    ret",
    ".size blockexec_restore, . - blockexec_restore",
    "",
    ".p2align 2",
    ".globl blockexec_syscall_shim",
    ".type blockexec_syscall_shim,%function",
    "blockexec_syscall_shim:",
    "    hint #34",
    "    sub sp, sp, #272",
    "    stp x0, x1, [sp, #0]",
    "    stp x2, x3, [sp, #16]",
    "    stp x4, x5, [sp, #32]",
    "    stp x6, x7, [sp, #48]",
    "    stp x8, x9, [sp, #64]",
    "    stp x10, x11, [sp, #80]",
    "    stp x12, x13, [sp, #96]",
    "    stp x14, x15, [sp, #112]",
    "    stp x16, x17, [sp, #128]",
    "    stp x18, x19, [sp, #144]",
    "    stp x20, x21, [sp, #160]",
    "    stp x22, x23, [sp, #176]",
    "    stp x24, x25, [sp, #192]",
    "    stp x26, x27, [sp, #208]",
    "    stp x28, x29, [sp, #224]",
    "    add x9, sp, #272",
    "    stp x30, x9, [sp, #240]",
    "    str x30, [sp, #256]",
    "    mov x0, sp",
    "    bl {entry}",
    "    cbnz x1, .Lblockexec_terminate",
    "    str x0, [sp, #0]",
    "    ldp x0, x1, [sp, #0]",
    "    ldp x2, x3, [sp, #16]",
    "    ldp x4, x5, [sp, #32]",
    "    ldp x6, x7, [sp, #48]",
    "    ldp x8, x9, [sp, #64]",
    "    ldp x10, x11, [sp, #80]",
    "    ldp x12, x13, [sp, #96]",
    "    ldp x14, x15, [sp, #112]",
    "    ldp x16, x17, [sp, #128]",
    "    ldp x18, x19, [sp, #144]",
    "    ldp x20, x21, [sp, #160]",
    "    ldp x22, x23, [sp, #176]",
    "    ldp x24, x25, [sp, #192]",
    "    ldp x26, x27, [sp, #208]",
    "    ldp x28, x29, [sp, #224]",
    "    ldr x30, [sp, #240]",
    "    add sp, sp, #272",
    "    ret",
    ".Lblockexec_terminate:",
    "    mov x2, x0",
    "    mov x0, x1",
    "    mov x1, x2",
    "    b .Lblockexec_restore",
    ".size blockexec_syscall_shim, . - blockexec_syscall_shim",
    entry = sym crate::context::syscall_entry,
);
