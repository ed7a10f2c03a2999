use core::fmt::{Formatter, LowerHex};

/// Debug-formats as `{:#x}`, so addresses in log fields read as addresses.
pub struct ForceLowerHex<T: LowerHex>(pub T);

impl<T: LowerHex> core::fmt::Debug for ForceLowerHex<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_is_prefixed_hex() {
        assert_eq!(format!("{:?}", ForceLowerHex(0x7f00_1000u64)), "0x7f001000");
        assert_eq!(format!("{:?}", ForceLowerHex(0u32)), "0x0");
    }
}
