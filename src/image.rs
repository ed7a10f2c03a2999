//! On-disk image header.
//!
//! An image is a sequence of [`BLOCK_SIZE`] blocks. The first 56 bytes of block 0 are the
//! header; the header is also the start of the code region, so bytes 0..4 hold the entry
//! instruction (usually a jump over the rest of the header). Everything is little-endian.

use byteorder::{ByteOrder, LittleEndian};

use crate::{error::LoadError, fs::store::BLOCK_SIZE};

pub const IMAGE_MAGIC: u32 = 0x424c_4b58;
pub const HEADER_LEN: usize = 7 * 8;
/// Word index of the slot that gets the syscall shim address.
pub const SYSCALL_SLOT: usize = 2;
pub const RELOCATION_ENTRY_SIZE: u64 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramHeader {
    pub magic_and_start: u64,
    pub version: u64,
    pub syscall_slot_address: u64,
    pub fini_address: u64,
    pub end_address: u64,
    pub load_size: u64,
    pub total_size: u64,
}

impl ProgramHeader {
    pub fn parse(block: &[u8]) -> Self {
        let word = |i: usize| LittleEndian::read_u64(&block[i * 8..i * 8 + 8]);
        ProgramHeader {
            magic_and_start: word(0),
            version: word(1),
            syscall_slot_address: word(2),
            fini_address: word(3),
            end_address: word(4),
            load_size: word(5),
            total_size: word(6),
        }
    }

    pub fn write(&self, block: &mut [u8]) {
        let words = [
            self.magic_and_start,
            self.version,
            self.syscall_slot_address,
            self.fini_address,
            self.end_address,
            self.load_size,
            self.total_size,
        ];
        LittleEndian::write_u64_into(&words, &mut block[..HEADER_LEN]);
    }

    pub fn magic(&self) -> u32 {
        (self.magic_and_start >> 32) as u32
    }

    pub fn num_blocks(&self) -> u64 {
        self.total_size.div_ceil(BLOCK_SIZE as u64)
    }

    pub fn relocation_count(&self) -> u64 {
        (self.total_size - self.load_size) / RELOCATION_ENTRY_SIZE
    }

    /// Checks everything that can be checked before memory gets allocated for the image.
    pub fn validate(&self, heap_size: u64) -> Result<(), LoadError> {
        if self.magic() != IMAGE_MAGIC {
            return Err(LoadError::BadMagic { found: self.magic() });
        }
        let invalid = |reason| Err(LoadError::InvalidImage { reason });
        if self.load_size % 8 != 0 {
            return invalid("load size is not a multiple of 8");
        }
        if self.load_size < HEADER_LEN as u64 {
            return invalid("load size does not cover the header");
        }
        if self.load_size > self.total_size {
            return invalid("load size exceeds total size");
        }
        if (self.total_size - self.load_size) % RELOCATION_ENTRY_SIZE != 0 {
            return invalid("relocation table is not a whole number of entries");
        }
        if self.fini_address > self.total_size {
            return invalid("fini address lies outside the image");
        }
        match self.total_size.checked_add(heap_size) {
            Some(end) if self.end_address <= end => Ok(()),
            _ => invalid("end address lies outside the heap"),
        }
    }
}
