//! Byte-granular POSIX-ish files on top of a [`BlockStore`].

pub mod store;

use bitflags::bitflags;
use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, trace};

use crate::error::{Errno, Fault, SysResult};
use store::{Block, BlockStore, FileId, BLOCK_SIZE};

/// Descriptors below this are the console and never have a file behind them.
pub const FIRST_FILE_FD: usize = 3;

pub const SEEK_SET: u64 = 0;
pub const SEEK_CUR: u64 = 1;
pub const SEEK_END: u64 = 2;

/// `struct stat` as laid out on x86_64 Linux. Only the size is ever filled in.
pub const STAT_SIZE: usize = 144;
const STAT_SIZE_OFFSET: usize = 48;

bitflags! {
    pub struct OpenFlags: u64 {
        const WRONLY = 0o1;
        const RDWR = 0o2;
        const CREAT = 0o100;
        const EXCL = 0o200;
        const TRUNC = 0o1000;
        const APPEND = 0o2000;
    }
}

impl OpenFlags {
    pub const RDONLY: OpenFlags = OpenFlags::empty();
    /// The one write mode we know how to do: make a fresh, empty file.
    pub const WRITE_CREATE: OpenFlags = OpenFlags::from_bits_truncate(
        OpenFlags::WRONLY.bits() | OpenFlags::CREAT.bits() | OpenFlags::TRUNC.bits(),
    );
}

pub type Fd = usize;

#[derive(Debug, Default, Clone, Copy)]
struct Slot {
    backing: Option<FileId>,
    position: u64,
    writable: bool,
}

pub struct FileTable<'a> {
    store: &'a mut dyn BlockStore,
    slots: Vec<Slot>,
}

impl<'a> FileTable<'a> {
    pub fn new(store: &'a mut dyn BlockStore, max_fds: usize) -> Self {
        FileTable {
            store,
            slots: vec![Slot::default(); max_fds],
        }
    }

    pub fn open_count(&self) -> usize {
        self.slots.iter().filter(|s| s.backing.is_some()).count()
    }

    pub fn position(&self, fd: Fd) -> Option<u64> {
        self.slots.get(fd).filter(|s| s.backing.is_some()).map(|s| s.position)
    }

    fn slot(&mut self, fd: i64, op: &'static str) -> Result<(FileId, &mut Slot), Fault> {
        let bad = Fault::BadDescriptor { fd, op };
        if fd < FIRST_FILE_FD as i64 {
            return Err(bad);
        }
        match self.slots.get_mut(fd as usize) {
            Some(slot) => match slot.backing {
                Some(id) => Ok((id, slot)),
                None => Err(bad),
            },
            None => Err(bad),
        }
    }

    #[tracing::instrument(level = "debug", skip(self), err(Debug))]
    pub fn open(&mut self, path: &str, flags: u64) -> SysResult<Fd> {
        let writable = match OpenFlags::from_bits(flags) {
            Some(mode) if mode == OpenFlags::RDONLY => false,
            Some(mode) if mode == OpenFlags::WRITE_CREATE => true,
            _ => return Err(Fault::UnsupportedOpenFlags(flags).into()),
        };

        let opened = if writable {
            // truncation is delete + create, the store has no notion of it
            match self.store.delete(path) {
                Ok(()) => debug!("removed existing file"),
                Err(e) => trace!(error = %e, "nothing to remove"),
            }
            self.store.create(path)
        } else {
            self.store.open(path)
        };
        let id = opened.map_err(|e| {
            debug!(error = %e, "store refused");
            Errno::ENOENT
        })?;

        match self.slots.iter().skip(FIRST_FILE_FD).position(|s| s.backing.is_none()) {
            Some(i) => {
                let fd = i + FIRST_FILE_FD;
                self.slots[fd] = Slot {
                    backing: Some(id),
                    position: 0,
                    writable,
                };
                Ok(fd)
            }
            None => {
                self.store.close(id);
                Err(Errno::EMFILE.into())
            }
        }
    }

    #[tracing::instrument(level = "debug", skip(self, buf), fields(len = buf.len()), err(Debug))]
    pub fn read(&mut self, fd: i64, buf: &mut [u8]) -> SysResult<u64> {
        let (id, slot) = self.slot(fd, "read")?;
        if slot.writable {
            return Err(Fault::BadDescriptor { fd, op: "read" }.into());
        }
        let mut position = slot.position;
        let size = self.store.size(id).map_err(Fault::Storage)?;

        let mut block: Block = [0; BLOCK_SIZE];
        let mut done = 0;
        while done < buf.len() {
            let index = position / BLOCK_SIZE as u64;
            let block_start = index * BLOCK_SIZE as u64;
            let offset = (position - block_start) as usize;
            let n = (BLOCK_SIZE - offset).min(buf.len() - done);
            if block_start < size {
                self.store
                    .read_block(id, index, &mut block)
                    .map_err(Fault::Storage)?;
            } else {
                block.fill(0);
            }
            buf[done..done + n].copy_from_slice(&block[offset..offset + n]);
            position += n as u64;
            done += n;
        }

        self.slots[fd as usize].position = position;
        Ok(done as u64)
    }

    #[tracing::instrument(level = "debug", skip(self, data), fields(len = data.len()), err(Debug))]
    pub fn write(&mut self, fd: i64, data: &[u8]) -> SysResult<u64> {
        let (id, slot) = self.slot(fd, "write")?;
        if !slot.writable {
            return Err(Fault::BadDescriptor { fd, op: "write" }.into());
        }
        let mut position = slot.position;
        let mut size = self.store.size(id).map_err(Fault::Storage)?;

        let mut block: Block = [0; BLOCK_SIZE];
        let mut done = 0;
        while done < data.len() {
            let index = position / BLOCK_SIZE as u64;
            let block_start = index * BLOCK_SIZE as u64;
            let offset = (position - block_start) as usize;
            let n = (BLOCK_SIZE - offset).min(data.len() - done);

            if block_start < size {
                self.store
                    .read_block(id, index, &mut block)
                    .map_err(Fault::Storage)?;
            } else {
                block.fill(0);
            }
            block[offset..offset + n].copy_from_slice(&data[done..done + n]);

            let existing = (size - size.min(block_start)).min(BLOCK_SIZE as u64) as usize;
            let len = existing.max(offset + n);
            self.store
                .write_block(id, index, &block, len)
                .map_err(Fault::Storage)?;

            position += n as u64;
            done += n;
            size = size.max(position);
        }

        self.slots[fd as usize].position = position;
        Ok(done as u64)
    }

    #[tracing::instrument(level = "debug", skip(self), err(Debug))]
    pub fn lseek(&mut self, fd: i64, offset: i64, whence: u64) -> SysResult<u64> {
        let (id, slot) = self.slot(fd, "lseek")?;
        let position = slot.position;
        let size = self.store.size(id).map_err(Fault::Storage)?;
        let origin = match whence {
            SEEK_SET => 0,
            SEEK_CUR => position,
            SEEK_END => size,
            _ => return Err(Fault::UnsupportedWhence(whence).into()),
        };

        let target = origin as i128 + offset as i128;
        if target < 0 || target > size as i128 {
            return Err(Errno::EINVAL.into());
        }
        self.slots[fd as usize].position = target as u64;
        Ok(target as u64)
    }

    #[tracing::instrument(level = "debug", skip(self, out), err(Debug))]
    pub fn fstat(&mut self, fd: i64, out: &mut [u8]) -> SysResult<()> {
        let (id, _) = self.slot(fd, "fstat")?;
        let size = self.store.size(id).map_err(Fault::Storage)?;
        out[..STAT_SIZE].fill(0);
        LittleEndian::write_u64(&mut out[STAT_SIZE_OFFSET..STAT_SIZE_OFFSET + 8], size);
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self), err(Debug))]
    pub fn close(&mut self, fd: i64) -> SysResult<()> {
        let (id, slot) = self.slot(fd, "close")?;
        *slot = Slot::default();
        self.store.close(id);
        Ok(())
    }

    /// Closes whatever the program left open.
    pub fn close_all(&mut self) {
        for slot in self.slots.iter_mut() {
            if let Some(id) = slot.backing.take() {
                debug!(file = id.0, "closing leftover descriptor");
                self.store.close(id);
            }
            *slot = Slot::default();
        }
    }
}
