//! The emulated system calls. Numbering follows Linux on x86_64.

use tracing::{error, trace};

use crate::{
    arch::SavedRegisters,
    console::write_translated,
    error::{Fault, SysError, SysResult},
    fmt::ForceLowerHex,
    fs::STAT_SIZE,
    session::{RunOutcome, Session},
    vm::GuestAddress,
};

pub const READ: u64 = 0;
pub const WRITE: u64 = 1;
pub const OPEN: u64 = 2;
pub const CLOSE: u64 = 3;
pub const FSTAT: u64 = 5;
pub const LSEEK: u64 = 8;
pub const BRK: u64 = 12;
pub const IOCTL: u64 = 16;
pub const EXIT: u64 = 60;
pub const GETTIMEOFDAY: u64 = 96;
pub const TIME: u64 = 201;
pub const EXIT_GROUP: u64 = 231;

pub const TCGETS: u64 = 0x5401;

/// Seconds since the epoch reported by `time` and `gettimeofday`. Runs are reproducible.
pub const FAKE_EPOCH: u64 = 1_500_000_000;

const STDIN: i64 = 0;
const STDOUT: i64 = 1;
const STDERR: i64 = 2;

/// What the shim should do after a syscall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Return this value to the program.
    Resume(u64),
    /// Stop the program; the value ends up as the exit code.
    Terminate(u64),
}

impl Session<'_> {
    pub fn dispatch(&mut self, number: u64, args: [u64; 3], regs: &SavedRegisters) -> Flow {
        let [a, b, c] = args;
        let res = match number {
            READ => self.sys_read(a as i64, b, c),
            WRITE => self.sys_write(a as i64, b, c),
            OPEN => self.sys_open(a, b),
            CLOSE => self.sys_close(a as i64),
            FSTAT => self.sys_fstat(a as i64, b),
            LSEEK => self.sys_lseek(a as i64, b as i64, c),
            BRK => Ok(self.layout.handle_brk(a)),
            IOCTL => self.sys_ioctl(a as i64, b),
            GETTIMEOFDAY => self.sys_gettimeofday(a),
            TIME => self.sys_time(a),
            EXIT | EXIT_GROUP => return self.sys_exit(a as i32),
            _ => Err(Fault::UnknownSyscall(number).into()),
        };

        match res {
            Ok(value) => Flow::Resume(value),
            Err(SysError::Errno(errno)) => Flow::Resume(errno.as_return()),
            Err(SysError::Fault(fault)) => {
                error!("{fault}, aborting program. registers:\n{regs}");
                if !self.layout.contains_program(GuestAddress(return_address(regs))) {
                    error!("return address lies outside the program");
                }
                self.outcome = Some(RunOutcome::Aborted(fault));
                Flow::Terminate(1)
            }
        }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    fn sys_exit(&mut self, code: i32) -> Flow {
        trace!("");
        self.outcome = Some(RunOutcome::Exited(code));
        Flow::Terminate(code as u64)
    }

    #[tracing::instrument(level = "debug", skip(self, buf), fields(buf = ?ForceLowerHex(buf)), err(Debug))]
    fn sys_read(&mut self, fd: i64, buf: u64, len: u64) -> SysResult<u64> {
        match fd {
            STDIN => {
                let dest = self.memory.bytes_mut(buf, len)?;
                let n = self.input.read(self.console, dest).map_err(Fault::Console)?;
                Ok(n as u64)
            }
            STDOUT | STDERR => Err(Fault::BadDescriptor { fd, op: "read" }.into()),
            _ => {
                let dest = self.memory.bytes_mut(buf, len)?;
                self.files.read(fd, dest)
            }
        }
    }

    #[tracing::instrument(level = "debug", skip(self, buf), fields(buf = ?ForceLowerHex(buf)), err(Debug))]
    fn sys_write(&mut self, fd: i64, buf: u64, len: u64) -> SysResult<u64> {
        match fd {
            STDIN => Err(Fault::BadDescriptor { fd, op: "write" }.into()),
            STDOUT | STDERR => {
                let bytes = self.memory.bytes(buf, len)?;
                write_translated(self.console, bytes).map_err(Fault::Console)?;
                Ok(len)
            }
            _ => {
                let bytes = self.memory.bytes(buf, len)?;
                self.files.write(fd, bytes)
            }
        }
    }

    #[tracing::instrument(level = "debug", skip(self, path), fields(path = ?ForceLowerHex(path)), err(Debug))]
    fn sys_open(&mut self, path: u64, flags: u64) -> SysResult<u64> {
        let path = String::from_utf8_lossy(self.memory.c_str(path)?);
        let fd = self.files.open(&path, flags)?;
        Ok(fd as u64)
    }

    #[tracing::instrument(level = "debug", skip(self), err(Debug))]
    fn sys_close(&mut self, fd: i64) -> SysResult<u64> {
        self.files.close(fd)?;
        Ok(0)
    }

    #[tracing::instrument(level = "debug", skip(self, buf), fields(buf = ?ForceLowerHex(buf)), err(Debug))]
    fn sys_fstat(&mut self, fd: i64, buf: u64) -> SysResult<u64> {
        let out = self.memory.bytes_mut(buf, STAT_SIZE as u64)?;
        self.files.fstat(fd, out)?;
        Ok(0)
    }

    #[tracing::instrument(level = "debug", skip(self), err(Debug))]
    fn sys_lseek(&mut self, fd: i64, offset: i64, whence: u64) -> SysResult<u64> {
        self.files.lseek(fd, offset, whence)
    }

    #[tracing::instrument(level = "debug", skip(self), err(Debug))]
    fn sys_ioctl(&mut self, fd: i64, request: u64) -> SysResult<u64> {
        // enough for isatty(); the termios buffer is left alone
        match request {
            TCGETS => Ok(0),
            _ => Err(Fault::UnknownIoctl { fd, request }.into()),
        }
    }

    #[tracing::instrument(level = "debug", skip(self, tv), fields(tv = ?ForceLowerHex(tv)), err(Debug))]
    fn sys_gettimeofday(&mut self, tv: u64) -> SysResult<u64> {
        if tv != 0 {
            self.memory.write_u64(tv, FAKE_EPOCH)?;
            self.memory.write_u64(tv + 8, 0)?;
        }
        Ok(0)
    }

    #[tracing::instrument(level = "debug", skip(self, tloc), fields(tloc = ?ForceLowerHex(tloc)), err(Debug))]
    fn sys_time(&mut self, tloc: u64) -> SysResult<u64> {
        if tloc != 0 {
            self.memory.write_u64(tloc, FAKE_EPOCH)?;
        }
        Ok(FAKE_EPOCH)
    }
}

#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
fn return_address(regs: &SavedRegisters) -> u64 {
    regs.rip
}

#[cfg(all(target_os = "linux", target_arch = "aarch64"))]
fn return_address(regs: &SavedRegisters) -> u64 {
    regs.pc
}

#[cfg(not(all(target_os = "linux", any(target_arch = "x86_64", target_arch = "aarch64"))))]
fn return_address(_regs: &SavedRegisters) -> u64 {
    0
}
