use crate::image::ProgramHeader;

/// An address in the foreign program's view of memory. Since the image is mapped into our own
/// address space these are real host addresses, but they only ever get dereferenced through
/// [`crate::memory::GuestMemory`].
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Default)]
#[repr(transparent)]
pub struct GuestAddress(pub u64);

impl core::fmt::Debug for GuestAddress {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.0 <= 0xffff_ffff {
            write!(f, "0g{:08x}", self.0)
        } else {
            write!(f, "0g{:016x}", self.0)
        }
    }
}

impl core::ops::Add<u64> for GuestAddress {
    type Output = Self;
    fn add(self, rhs: u64) -> Self::Output {
        GuestAddress(self.0 + rhs)
    }
}

pub const fn align_up(value: u64, alignment: u64) -> u64 {
    (value + alignment - 1) / alignment * alignment
}

/// Program and break bounds of a loaded image. Fixed at load time; the heap never grows past
/// `break_end`, `brk` only moves around inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryLayout {
    pub program_start: GuestAddress,
    pub program_end: GuestAddress,
    pub break_start: GuestAddress,
    pub break_end: GuestAddress,
}

impl MemoryLayout {
    pub fn new(base: GuestAddress, header: &ProgramHeader, heap_size: u64) -> Self {
        MemoryLayout {
            program_start: base,
            program_end: base + header.fini_address,
            break_start: base + header.end_address,
            break_end: base + header.total_size + heap_size,
        }
    }

    pub fn entry_point(&self) -> GuestAddress {
        self.program_start
    }

    pub fn contains_program(&self, addr: GuestAddress) -> bool {
        (self.program_start..self.program_end).contains(&addr)
    }

    #[tracing::instrument(level = "trace", skip(self), ret)]
    pub fn handle_brk(&self, requested: u64) -> u64 {
        requested.clamp(self.break_start.0, self.break_end.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn layout() -> MemoryLayout {
        let header = ProgramHeader {
            magic_and_start: 0,
            version: 1,
            syscall_slot_address: 16,
            fini_address: 0x180,
            end_address: 0x200,
            load_size: 0x180,
            total_size: 0x200,
        };
        MemoryLayout::new(GuestAddress(0x10000), &header, 0x1000)
    }

    #[test]
    fn bounds_are_relative_to_base() {
        let layout = layout();
        assert_eq!(layout.program_start, GuestAddress(0x10000));
        assert_eq!(layout.program_end, GuestAddress(0x10180));
        assert_eq!(layout.break_start, GuestAddress(0x10200));
        assert_eq!(layout.break_end, GuestAddress(0x11200));
        assert_eq!(layout.entry_point(), layout.program_start);
        assert!(layout.contains_program(GuestAddress(0x1017f)));
        assert!(!layout.contains_program(GuestAddress(0x10180)));
    }

    #[test]
    fn brk_clamps_to_break_bounds() {
        let layout = layout();
        assert_eq!(layout.handle_brk(0), 0x10200);
        assert_eq!(layout.handle_brk(0x10800), 0x10800);
        assert_eq!(layout.handle_brk(u64::MAX), 0x11200);
        assert_eq!(layout.handle_brk(0x11200), 0x11200);
    }

    #[test]
    fn align_up_rounds_to_multiple() {
        assert_eq!(align_up(0, 4096), 0);
        assert_eq!(align_up(1, 4096), 4096);
        assert_eq!(align_up(4096, 4096), 4096);
        assert_eq!(align_up(72, 8), 72);
    }

    proptest! {
        #[test]
        fn brk_is_an_idempotent_clamp(x in any::<u64>()) {
            let layout = layout();
            let once = layout.handle_brk(x);
            prop_assert!(once >= layout.break_start.0 && once <= layout.break_end.0);
            prop_assert_eq!(layout.handle_brk(once), once);
            if x >= layout.break_start.0 && x <= layout.break_end.0 {
                prop_assert_eq!(once, x);
            }
        }
    }
}
