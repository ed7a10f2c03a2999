use std::io;

use byteorder::{ByteOrder, LittleEndian};
use region::Protection;
use tracing::{debug, debug_span};

use crate::{
    arch,
    config::Config,
    console::Console,
    context,
    error::LoadError,
    fmt::ForceLowerHex,
    fs::{
        store::{Block, BlockStore, FileId, BLOCK_SIZE},
        FileTable,
    },
    image::{ProgramHeader, SYSCALL_SLOT},
    memory::{ArgumentVector, GuestMemory, MemoryArena},
    reloc,
    session::{RunOutcome, Session},
    vm::MemoryLayout,
};

/// Loads images out of a [`BlockStore`] and runs them against a [`Console`]. Files the
/// programs open come from the same store.
pub struct Loader<S, C> {
    store: S,
    console: C,
    config: Config,
}

fn io_error<'a>(action: &'static str, path: &'a str) -> impl FnOnce(io::Error) -> LoadError + 'a {
    move |source| LoadError::Io {
        action,
        path: path.to_owned(),
        source,
    }
}

impl<S: BlockStore, C: Console> Loader<S, C> {
    pub fn new(store: S, console: C, config: Config) -> Self {
        Loader {
            store,
            console,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn console(&self) -> &C {
        &self.console
    }

    /// Loads the image at `path` and runs it to completion with `args` as its argument vector.
    /// Errors are about the image or the config; whatever the program does once it's running is
    /// reported through the [`RunOutcome`].
    pub fn load<A: AsRef<str>>(&mut self, path: &str, args: &[A]) -> Result<RunOutcome, LoadError> {
        let _guard = debug_span!("loading image", path).entered();
        self.config.validate()?;
        if !arch::SUPPORTED {
            return Err(LoadError::UnsupportedHost);
        }

        let file = self.store.open(path).map_err(io_error("open", path))?;
        let read = self.read_image(path, file);
        self.store.close(file);
        let (mut image, header) = read?;

        let base = image.base();
        let loaded = &mut image.as_mut_slice()[..header.num_blocks() as usize * BLOCK_SIZE];
        reloc::apply(loaded, header.load_size, header.total_size, base.0)?;
        loaded[header.load_size as usize..].fill(0);

        let shim = arch::syscall_shim_address();
        LittleEndian::write_u64(&mut loaded[SYSCALL_SLOT * 8..SYSCALL_SLOT * 8 + 8], shim);

        let layout = MemoryLayout::new(base, &header, self.config.heap_size);
        debug!(?layout, shim = ?ForceLowerHex(shim), relocations = header.relocation_count(), "image ready");

        let args = ArgumentVector::new(args)?;
        let stack = MemoryArena::stack(self.config.stack_size)?;
        let memory = GuestMemory::new(image, stack, args);
        let files = FileTable::new(&mut self.store, self.config.max_fds);
        let mut session = Session::new(memory, layout, files, &mut self.console);

        let outcome = context::run(&mut session);
        session.finish();
        Ok(outcome)
    }

    /// Reads and checks the header, then reads every block into a fresh arena.
    fn read_image(&mut self, path: &str, file: FileId) -> Result<(MemoryArena, ProgramHeader), LoadError> {
        let mut block: Block = [0; BLOCK_SIZE];
        self.store
            .read_block(file, 0, &mut block)
            .map_err(io_error("read", path))?;
        let header = ProgramHeader::parse(&block);
        debug!(?header, "read header");
        header.validate(self.config.heap_size)?;

        let num_blocks = header.num_blocks();
        let size = num_blocks
            .checked_mul(BLOCK_SIZE as u64)
            .map(|blocks| blocks.max(header.total_size.saturating_add(self.config.heap_size)))
            .and_then(|size| size.checked_next_multiple_of(self.config.alignment))
            .ok_or(LoadError::InvalidImage {
                reason: "image and heap do not fit in memory",
            })?;
        let mut image = MemoryArena::new(
            size as usize,
            self.config.alignment as usize,
            Protection::READ_WRITE_EXECUTE,
        )?;
        debug!(base = ?image.base(), size = ?ForceLowerHex(size), num_blocks, "allocated image arena");

        let dest = image.as_mut_slice();
        dest[..BLOCK_SIZE].copy_from_slice(&block);
        for index in 1..num_blocks {
            self.store
                .read_block(file, index, &mut block)
                .map_err(io_error("read", path))?;
            let start = index as usize * BLOCK_SIZE;
            dest[start..start + BLOCK_SIZE].copy_from_slice(&block);
        }
        Ok((image, header))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{console::BufferConsole, fs::store::MemStore, image::IMAGE_MAGIC};

    fn image(load_size: u64, relocs: &[u32]) -> Vec<u8> {
        let total_size = load_size + relocs.len() as u64 * 4;
        let header = ProgramHeader {
            magic_and_start: (IMAGE_MAGIC as u64) << 32 | 0x36eb,
            version: 1,
            syscall_slot_address: 16,
            fini_address: load_size,
            end_address: total_size,
            load_size,
            total_size,
        };
        let mut bytes = vec![0; total_size as usize];
        header.write(&mut bytes);
        LittleEndian::write_u32_into(relocs, &mut bytes[load_size as usize..]);
        bytes
    }

    fn loader(files: &[(&str, Vec<u8>)]) -> Loader<MemStore, BufferConsole> {
        let mut store = MemStore::new();
        for (path, contents) in files {
            store.insert(path, contents.clone());
        }
        Loader::new(store, BufferConsole::default(), Config::default())
    }

    #[test]
    fn bad_config_is_rejected_before_touching_the_store() {
        let config = Config {
            stack_size: 0,
            ..Config::default()
        };
        let mut loader = Loader::new(MemStore::new(), BufferConsole::default(), config);
        let err = loader.load("nope", &["nope"]).unwrap_err();
        assert!(matches!(err, LoadError::InvalidConfig { .. }), "{err:?}");
    }

    #[cfg(not(all(target_os = "linux", any(target_arch = "x86_64", target_arch = "aarch64"))))]
    #[test]
    fn refuses_to_run_on_unsupported_hosts() {
        let mut loader = loader(&[("prog", image(64, &[]))]);
        assert!(matches!(loader.load("prog", &["prog"]), Err(LoadError::UnsupportedHost)));
        assert_eq!(loader.store().open_count(), 0);
    }

    #[cfg(all(target_os = "linux", any(target_arch = "x86_64", target_arch = "aarch64")))]
    mod supported {
        use super::*;

        #[test]
        fn missing_image_is_an_io_error() {
            let mut loader = loader(&[]);
            let err = loader.load("nope", &["nope"]).unwrap_err();
            assert!(matches!(err, LoadError::Io { action: "open", .. }), "{err:?}");
            assert!(err.to_string().contains("\"nope\""));
        }

        #[test]
        fn bad_magic_closes_the_image() {
            let mut bytes = image(64, &[]);
            bytes[7] = 0;
            let mut loader = loader(&[("prog", bytes)]);
            let err = loader.load("prog", &["prog"]).unwrap_err();
            assert!(matches!(err, LoadError::BadMagic { found: 0x004c_4b58 }), "{err:?}");
            assert_eq!(loader.store().open_count(), 0);
        }

        #[test]
        fn bad_relocation_is_rejected() {
            let mut loader = loader(&[("prog", image(64, &[0, 8]))]);
            let err = loader.load("prog", &["prog"]).unwrap_err();
            assert!(
                matches!(err, LoadError::InvalidRelocation { index: 1, entry: 8, limit: 8 }),
                "{err:?}"
            );
            assert_eq!(loader.store().open_count(), 0);
        }

        #[test]
        fn short_image_is_an_io_error() {
            let mut bytes = image(1024, &[]);
            bytes.truncate(512);
            let mut loader = loader(&[("prog", bytes)]);
            let err = loader.load("prog", &["prog"]).unwrap_err();
            assert!(matches!(err, LoadError::Io { action: "read", .. }), "{err:?}");
            assert_eq!(loader.store().open_count(), 0);
        }

        #[test]
        fn image_too_large_for_the_address_space_is_rejected() {
            let load_size = 64;
            let total_size = u64::MAX - 3;
            let header = ProgramHeader {
                magic_and_start: (IMAGE_MAGIC as u64) << 32 | 0x36eb,
                version: 1,
                syscall_slot_address: 16,
                fini_address: load_size,
                end_address: total_size,
                load_size,
                total_size,
            };
            let mut bytes = vec![0; BLOCK_SIZE];
            header.write(&mut bytes);
            let mut store = MemStore::new();
            store.insert("prog", bytes);
            let mut loader = Loader::new(
                store,
                BufferConsole::default(),
                Config {
                    heap_size: 0,
                    ..Config::default()
                },
            );
            let err = loader.load("prog", &["prog"]).unwrap_err();
            assert!(matches!(err, LoadError::InvalidImage { .. }), "{err:?}");
            assert_eq!(loader.store().open_count(), 0);
        }

        #[test]
        fn malformed_header_is_rejected() {
            let mut bytes = image(64, &[]);
            LittleEndian::write_u64(&mut bytes[40..48], 60);
            let mut loader = loader(&[("prog", bytes)]);
            let err = loader.load("prog", &["prog"]).unwrap_err();
            assert!(matches!(err, LoadError::InvalidImage { .. }), "{err:?}");
        }
    }
}
