use byteorder::{ByteOrder, LittleEndian};
use region::Protection;

use crate::{
    error::{Fault, LoadError},
    vm::{align_up, GuestAddress},
};

/// A zeroed host allocation whose usable part starts at an aligned address. Freed on drop.
pub struct MemoryArena {
    allocation: region::Allocation,
    offset: usize,
    len: usize,
}

impl MemoryArena {
    pub fn new(len: usize, alignment: usize, protection: Protection) -> Result<Self, LoadError> {
        let size = len.saturating_add(alignment);
        let allocation =
            region::alloc(size, protection).map_err(|source| LoadError::Alloc { size, source })?;
        let start = allocation.as_ptr::<u8>() as usize;
        let offset = align_up(start as u64, alignment as u64) as usize - start;
        let mut arena = MemoryArena {
            allocation,
            offset,
            len,
        };
        arena.as_mut_slice().fill(0);
        Ok(arena)
    }

    /// At least `len` usable bytes of stack, page-aligned, with an inaccessible guard page below.
    pub fn stack(len: usize) -> Result<Self, LoadError> {
        let page = region::page::size();
        let too_big = || LoadError::InvalidConfig {
            reason: "stack size does not fit in memory",
        };
        let len = len.checked_next_multiple_of(page).ok_or_else(too_big)?;
        let size = len.checked_add(page).ok_or_else(too_big)?;
        let allocation = region::alloc(size, Protection::READ_WRITE)
            .map_err(|source| LoadError::Alloc { size, source })?;
        // safety: the guard page is the first page of an allocation we own
        unsafe { region::protect(allocation.as_ptr::<u8>(), page, Protection::NONE) }
            .map_err(LoadError::Protect)?;
        let mut arena = MemoryArena {
            allocation,
            offset: page,
            len,
        };
        arena.as_mut_slice().fill(0);
        Ok(arena)
    }

    pub fn base(&self) -> GuestAddress {
        GuestAddress(self.allocation.as_ptr::<u8>() as u64 + self.offset as u64)
    }

    pub fn end(&self) -> GuestAddress {
        self.base() + self.len as u64
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        // safety: offset + len lies inside the allocation, which lives as long as self
        unsafe { core::slice::from_raw_parts(self.allocation.as_ptr::<u8>().add(self.offset), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        let offset = self.offset;
        unsafe {
            core::slice::from_raw_parts_mut(self.allocation.as_mut_ptr::<u8>().add(offset), self.len)
        }
    }

    fn contains(&self, addr: u64, len: u64) -> bool {
        match addr.checked_add(len) {
            Some(end) => addr >= self.base().0 && end <= self.end().0,
            None => false,
        }
    }
}

/// `argv` for the entry point: a NULL-terminated pointer table followed by the NUL-terminated
/// strings it points at, all in one small arena.
pub struct ArgumentVector {
    arena: MemoryArena,
    argc: usize,
}

impl ArgumentVector {
    pub fn new<S: AsRef<str>>(args: &[S]) -> Result<Self, LoadError> {
        let table = (args.len() + 1) * 8;
        let strings: usize = args.iter().map(|a| a.as_ref().len() + 1).sum();
        let mut arena = MemoryArena::new(table + strings, 8, Protection::READ_WRITE)?;

        let base = arena.base().0;
        let bytes = arena.as_mut_slice();
        let mut at = table;
        for (i, arg) in args.iter().enumerate() {
            let arg = arg.as_ref().as_bytes();
            LittleEndian::write_u64(&mut bytes[i * 8..i * 8 + 8], base + at as u64);
            bytes[at..at + arg.len()].copy_from_slice(arg);
            at += arg.len() + 1;
        }

        Ok(ArgumentVector {
            arena,
            argc: args.len(),
        })
    }

    pub fn argc(&self) -> u64 {
        self.argc as u64
    }

    pub fn argv(&self) -> GuestAddress {
        self.arena.base()
    }
}

/// Everything the foreign program can legitimately point at. Syscall handlers only ever touch
/// program memory through these bounds-checked views.
pub struct GuestMemory {
    image: MemoryArena,
    stack: MemoryArena,
    args: ArgumentVector,
}

impl GuestMemory {
    pub fn new(image: MemoryArena, stack: MemoryArena, args: ArgumentVector) -> Self {
        GuestMemory { image, stack, args }
    }

    pub fn image(&self) -> &MemoryArena {
        &self.image
    }

    pub fn stack_top(&self) -> GuestAddress {
        self.stack.end()
    }

    pub fn args(&self) -> &ArgumentVector {
        &self.args
    }

    fn arenas(&self) -> [&MemoryArena; 3] {
        [&self.image, &self.stack, &self.args.arena]
    }

    fn locate(&self, addr: u64, len: u64) -> Result<usize, Fault> {
        self.arenas()
            .iter()
            .position(|a| a.contains(addr, len))
            .ok_or(Fault::BadAddress {
                addr: GuestAddress(addr),
                len,
            })
    }

    pub fn bytes(&self, addr: u64, len: u64) -> Result<&[u8], Fault> {
        if len == 0 {
            return Ok(&[]);
        }
        let arena = self.arenas()[self.locate(addr, len)?];
        let start = (addr - arena.base().0) as usize;
        Ok(&arena.as_slice()[start..start + len as usize])
    }

    pub fn bytes_mut(&mut self, addr: u64, len: u64) -> Result<&mut [u8], Fault> {
        if len == 0 {
            return Ok(&mut []);
        }
        let arena = match self.locate(addr, len)? {
            0 => &mut self.image,
            1 => &mut self.stack,
            _ => &mut self.args.arena,
        };
        let start = (addr - arena.base().0) as usize;
        Ok(&mut arena.as_mut_slice()[start..start + len as usize])
    }

    /// A NUL-terminated string, without the NUL.
    pub fn c_str(&self, addr: u64) -> Result<&[u8], Fault> {
        let arena = self.arenas()[self.locate(addr, 1)?];
        let start = (addr - arena.base().0) as usize;
        let rest = &arena.as_slice()[start..];
        match rest.iter().position(|&b| b == 0) {
            Some(nul) => Ok(&rest[..nul]),
            None => Err(Fault::BadAddress {
                addr: GuestAddress(addr),
                len: rest.len() as u64,
            }),
        }
    }

    pub fn write_u64(&mut self, addr: u64, value: u64) -> Result<(), Fault> {
        LittleEndian::write_u64(self.bytes_mut(addr, 8)?, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory(args: &[&str]) -> GuestMemory {
        GuestMemory::new(
            MemoryArena::new(0x3000, 0x1000, Protection::READ_WRITE).unwrap(),
            MemoryArena::new(0x1000, 16, Protection::READ_WRITE).unwrap(),
            ArgumentVector::new(args).unwrap(),
        )
    }

    #[test]
    fn arena_is_aligned_and_zeroed() {
        for alignment in [8, 0x1000, 0x10000] {
            let arena = MemoryArena::new(100, alignment, Protection::READ_WRITE).unwrap();
            assert_eq!(arena.base().0 % alignment as u64, 0);
            assert_eq!(arena.len(), 100);
            assert!(arena.as_slice().iter().all(|&b| b == 0));
        }
    }

    #[test]
    fn stack_has_a_guard_page_below_it() {
        let stack = MemoryArena::stack(0x4001).unwrap();
        let page = region::page::size();
        assert_eq!(stack.base().0 % page as u64, 0);
        assert_eq!(stack.len() % page, 0);
        assert!(stack.len() >= 0x4001);
        assert!(stack.as_slice().iter().all(|&b| b == 0));

        let guard = region::query((stack.base().0 - 1) as *const u8).unwrap();
        assert_eq!(guard.protection(), Protection::NONE);
        let usable = region::query(stack.base().0 as *const u8).unwrap();
        assert_eq!(usable.protection(), Protection::READ_WRITE);
    }

    #[test]
    fn oversized_stack_is_a_config_error() {
        assert!(matches!(
            MemoryArena::stack(usize::MAX - 1),
            Err(LoadError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn argument_vector_layout() {
        let mem = memory(&["prog", "", "two words"]);
        let args = mem.args();
        assert_eq!(args.argc(), 3);
        let table = mem.bytes(args.argv().0, 32).unwrap();
        let pointers: Vec<u64> = table.chunks(8).map(LittleEndian::read_u64).collect();
        assert_eq!(pointers[3], 0);
        assert_eq!(mem.c_str(pointers[0]).unwrap(), b"prog");
        assert_eq!(mem.c_str(pointers[1]).unwrap(), b"");
        assert_eq!(mem.c_str(pointers[2]).unwrap(), b"two words");
    }

    #[test]
    fn views_are_bounds_checked() {
        let mut mem = memory(&[]);
        let base = mem.image().base().0;
        assert_eq!(mem.bytes(base, 0x3000).unwrap().len(), 0x3000);
        assert!(mem.bytes(base + 1, 0x3000).is_err());
        assert!(mem.bytes(base - 1, 1).is_err());
        assert!(mem.bytes(u64::MAX, 2).is_err());
        assert!(mem.bytes(0, 0).unwrap().is_empty());

        mem.write_u64(base + 0x2ff8, 0x1122_3344_5566_7788).unwrap();
        assert_eq!(mem.bytes(base + 0x2ff8, 1).unwrap(), &[0x88]);
        assert!(mem.write_u64(base + 0x2ffc, 0).is_err());

        let top = mem.stack_top().0;
        mem.bytes_mut(top - 16, 16).unwrap().fill(0xab);
        assert_eq!(mem.bytes(top - 1, 1).unwrap(), &[0xab]);
        assert!(mem.bytes(top, 1).is_err());
    }

    #[test]
    fn unterminated_string_is_a_fault() {
        let mut mem = memory(&[]);
        let base = mem.image().base().0;
        mem.bytes_mut(base, 0x3000).unwrap().fill(b'a');
        assert!(matches!(mem.c_str(base + 0x2000), Err(Fault::BadAddress { .. })));
        mem.bytes_mut(base + 0x2fff, 1).unwrap()[0] = 0;
        assert_eq!(mem.c_str(base + 0x2ffe).unwrap(), b"a");
    }
}
