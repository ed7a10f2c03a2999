use crate::error::LoadError;

/// Smallest stack a load accepts. The syscall dispatcher and everything it logs run on the
/// program's stack too.
pub const MIN_STACK_SIZE: usize = 0x4000;

/// Knobs for a load. The defaults match what images are built against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Bytes reserved past the end of the image for `brk`.
    pub heap_size: u64,
    /// Alignment of the load base.
    pub alignment: u64,
    /// Size of the stack the foreign program (and every syscall it makes) runs on.
    pub stack_size: usize,
    /// Descriptor table size, console descriptors included.
    pub max_fds: usize,
}

impl Config {
    /// Checked before a load touches the store.
    pub fn validate(&self) -> Result<(), LoadError> {
        let invalid = |reason| Err(LoadError::InvalidConfig { reason });
        if self.stack_size < MIN_STACK_SIZE {
            return invalid("stack size is below 16 KiB");
        }
        if !self.alignment.is_power_of_two() {
            return invalid("alignment is not a power of two");
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            heap_size: 0x10_0000,
            alignment: 0x1000,
            stack_size: 0x10_0000,
            max_fds: 16,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn tiny_stacks_are_rejected() {
        for stack_size in [0, 0x1000, MIN_STACK_SIZE - 1] {
            let config = Config {
                stack_size,
                ..Config::default()
            };
            assert!(matches!(config.validate(), Err(LoadError::InvalidConfig { .. })));
        }
        let config = Config {
            stack_size: MIN_STACK_SIZE,
            ..Config::default()
        };
        config.validate().unwrap();
    }

    #[test]
    fn alignment_must_be_a_power_of_two() {
        for alignment in [0, 3, 0x1800] {
            let config = Config {
                alignment,
                ..Config::default()
            };
            let err = config.validate().unwrap_err();
            assert_eq!(err.to_string(), "invalid configuration: alignment is not a power of two");
        }
    }
}
