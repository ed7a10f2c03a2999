use core::{arch::global_asm, fmt::Display};

use super::super::Checkpoint;

pub const SUPPORTED: bool = true;

/// Register block built by the syscall shim on the foreign stack. Field order is the reverse of
/// the push order in `blockexec_syscall_shim`.
#[derive(Clone, Default, Debug)]
#[repr(C)]
pub struct SavedRegisters {
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub rbp: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    /// The caller's stack pointer, as it was before the call into the shim.
    pub rsp: u64,
    /// Return address into the foreign program.
    pub rip: u64,
}

impl SavedRegisters {
    pub fn syscall_number(&self) -> u64 {
        self.rdi
    }

    pub fn syscall_args(&self) -> [u64; 3] {
        [self.rsi, self.rdx, self.rcx]
    }
}

impl Display for SavedRegisters {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let regs = [
            ("rax", self.rax),
            ("rbx", self.rbx),
            ("rcx", self.rcx),
            ("rdx", self.rdx),
            ("rsi", self.rsi),
            ("rdi", self.rdi),
            ("rbp", self.rbp),
            ("rsp", self.rsp),
            ("r8", self.r8),
            ("r9", self.r9),
            ("r10", self.r10),
            ("r11", self.r11),
            ("r12", self.r12),
            ("r13", self.r13),
            ("r14", self.r14),
            ("r15", self.r15),
            ("rip", self.rip),
        ];
        for (i, (name, value)) in regs.iter().enumerate() {
            write!(f, "{name:>3}: {value:#018x} ")?;
            if i % 4 == 3 {
                writeln!(f)?;
            }
        }
        Ok(())
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
/// `entry` must be code that follows the SysV calling convention and only leaves through a
/// normal return or through the syscall shim; `stack_top` must be the top of a writable stack
/// that outlives the call.
pub unsafe fn launch(entry: u64, argc: u64, argv: u64, checkpoint: *mut Checkpoint, stack_top: u64) -> u64 {
    unsafe { blockexec_launch(entry, argc, argv, checkpoint, stack_top) }
}

pub fn syscall_shim_address() -> u64 {
    blockexec_syscall_shim as *const () as u64
}

// blockexec_launch(entry: rdi, argc: rsi, argv: rdx, checkpoint: rcx, stack_top: r8)
// blockexec_restore(checkpoint: rdi, value: rsi)
// blockexec_syscall_shim(number: rdi, a0: rsi, a1: rdx, a2: rcx) -> rax
global_asm!(
    ".text",
    ".p2align 4",
    ".globl blockexec_launch",
    ".type blockexec_launch,@function",
    "blockexec_launch:",
    "    push rbp",
    "    push rbx",
    "    push r12",
    "    push r13",
    "    push r14",
    "    push r15",
    "    sub rsp, 8",
    "    stmxcsr dword ptr [rsp]",
    "    fnstcw word ptr [rsp + 4]",
    "    mov qword ptr [rcx], rsp",
    "    mov r12, rcx",
    "    mov rsp, r8",
    "    and rsp, -16",
    "    mov rax, rdi",
    "    mov rdi, rsi",
    "    mov rsi, rdx",
    "    xor ebp, ebp",
    "    call rax",
    // the entry point returned instead of calling exit
    "    mov rdi, r12",
    "    mov rsi, rax",
    "    jmp .Lblockexec_restore",
    ".size blockexec_launch, . - blockexec_launch",
    "",
    ".p2align 4",
    ".globl blockexec_restore",
    ".type blockexec_restore,@function",
    "blockexec_restore:",
    ".Lblockexec_restore:",
    "    mov rsp, qword ptr [rdi]",
    "    mov rax, rsi",
    "    ldmxcsr dword ptr [rsp]",
    "    fldcw word ptr [rsp + 4]",
    "    add rsp, 8",
    "    pop r15",
    "    pop r14",
    "    pop r13",
    "    pop r12",
    "    pop rbx",
    "    pop rbp",
    "    ret",
    ".size blockexec_restore, . - blockexec_restore",
    "",
    ".p2align 4",
    ".globl blockexec_syscall_shim",
    ".type blockexec_syscall_shim,@function",
    "blockexec_syscall_shim:",
    "    endbr64",
    "    sub rsp, 8",
    "    push r15",
    "    push r14",
    "    push r13",
    "    push r12",
    "    push r11",
    "    push r10",
    "    push r9",
    "    push r8",
    "    push rbp",
    "    push rdi",
    "    push rsi",
    "    push rdx",
    "    push rcx",
    "    push rbx",
    "    push rax",
    "    lea rax, [rsp + 136]",
    "    mov qword ptr [rsp + 120], rax",
    "    mov rbx, rsp",
    "    mov rdi, rsp",
    "    and rsp, -16",
    "    cld",
    "    call {entry}",
    "    mov rsp, rbx",
    "    test rdx, rdx",
    "    jnz .Lblockexec_terminate",
    "    mov qword ptr [rsp], rax",
    "    pop rax",
    "    pop rbx",
    "    pop rcx",
    "    pop rdx",
    "    pop rsi",
    "    pop rdi",
    "    pop rbp",
    "    pop r8",
    "    pop r9",
    "    pop r10",
    "    pop r11",
    "    pop r12",
    "    pop r13",
    "    pop r14",
    "    pop r15",
    "    add rsp, 8",
    "    ret",
    ".Lblockexec_terminate:",
    "    mov rdi, rdx",
    "    mov rsi, rax",
    "    jmp .Lblockexec_restore",
    ".size blockexec_syscall_shim, . - blockexec_syscall_shim",
    entry = sym crate::context::syscall_entry,
);
