//! Loads flat block-stored executables into this process and runs them under a small emulated
//! POSIX syscall layer.

pub mod arch;
pub mod config;
pub mod console;
mod context;
pub mod error;
pub mod fmt;
pub mod fs;
pub mod image;
pub mod loader;
pub mod memory;
pub mod reloc;
pub mod session;
pub mod syscall;
pub mod tracing;
pub mod vm;

pub use config::Config;
pub use error::{Errno, Fault, LoadError};
pub use loader::Loader;
pub use session::RunOutcome;
