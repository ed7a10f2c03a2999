//! Block-addressable file storage. Everything above this layer only ever moves whole blocks.

use std::{
    collections::HashMap,
    fs::{File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    path::{Component, Path, PathBuf},
};

pub const BLOCK_SIZE: usize = 512;

pub type Block = [u8; BLOCK_SIZE];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId(pub u32);

pub trait BlockStore {
    /// Opens an existing file.
    fn open(&mut self, path: &str) -> io::Result<FileId>;

    /// Creates an empty file. Fails if it already exists.
    fn create(&mut self, path: &str) -> io::Result<FileId>;

    /// Reads block `index`. A final partial block comes back zero-padded; a block starting at or
    /// past the end of the file is an error.
    fn read_block(&mut self, file: FileId, index: u64, block: &mut Block) -> io::Result<()>;

    /// Writes the first `len` bytes of `block` at block `index`. The file grows to at least
    /// `index * BLOCK_SIZE + len` bytes.
    fn write_block(&mut self, file: FileId, index: u64, block: &Block, len: usize) -> io::Result<()>;

    /// Size in bytes.
    fn size(&mut self, file: FileId) -> io::Result<u64>;

    fn close(&mut self, file: FileId);

    fn delete(&mut self, path: &str) -> io::Result<()>;
}

fn bad_handle(file: FileId) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, format!("no open file {}", file.0))
}

fn past_end(index: u64) -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, format!("block {index} is past end of file"))
}

/// Files kept in memory, keyed by path.
#[derive(Default)]
pub struct MemStore {
    files: HashMap<String, Vec<u8>>,
    open: HashMap<FileId, String>,
    next: u32,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: &str, contents: impl Into<Vec<u8>>) {
        self.files.insert(path.to_owned(), contents.into());
    }

    pub fn contents(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(Vec::as_slice)
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    fn handle(&mut self, path: &str) -> FileId {
        let id = FileId(self.next);
        self.next += 1;
        self.open.insert(id, path.to_owned());
        id
    }

    fn data(&mut self, file: FileId) -> io::Result<&mut Vec<u8>> {
        let path = self.open.get(&file).ok_or_else(|| bad_handle(file))?;
        self.files
            .get_mut(path)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("{path} was deleted")))
    }
}

impl BlockStore for MemStore {
    fn open(&mut self, path: &str) -> io::Result<FileId> {
        if !self.files.contains_key(path) {
            return Err(io::ErrorKind::NotFound.into());
        }
        Ok(self.handle(path))
    }

    fn create(&mut self, path: &str) -> io::Result<FileId> {
        if self.files.contains_key(path) {
            return Err(io::ErrorKind::AlreadyExists.into());
        }
        self.files.insert(path.to_owned(), Vec::new());
        Ok(self.handle(path))
    }

    fn read_block(&mut self, file: FileId, index: u64, block: &mut Block) -> io::Result<()> {
        let data = self.data(file)?;
        let start = index as usize * BLOCK_SIZE;
        if start >= data.len() {
            return Err(past_end(index));
        }
        let end = data.len().min(start + BLOCK_SIZE);
        block.fill(0);
        block[..end - start].copy_from_slice(&data[start..end]);
        Ok(())
    }

    fn write_block(&mut self, file: FileId, index: u64, block: &Block, len: usize) -> io::Result<()> {
        let data = self.data(file)?;
        let start = index as usize * BLOCK_SIZE;
        if data.len() < start + len {
            data.resize(start + len, 0);
        }
        data[start..start + len].copy_from_slice(&block[..len]);
        Ok(())
    }

    fn size(&mut self, file: FileId) -> io::Result<u64> {
        Ok(self.data(file)?.len() as u64)
    }

    fn close(&mut self, file: FileId) {
        self.open.remove(&file);
    }

    fn delete(&mut self, path: &str) -> io::Result<()> {
        self.files
            .remove(path)
            .map(drop)
            .ok_or_else(|| io::ErrorKind::NotFound.into())
    }
}

/// Files under a directory of the host file system.
pub struct DirStore {
    root: PathBuf,
    open: HashMap<FileId, File>,
    next: u32,
}

impl DirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DirStore {
            root: root.into(),
            open: HashMap::new(),
            next: 0,
        }
    }

    /// Maps a program path onto the root. Absolute program paths are relative to the root too;
    /// anything that could climb out of it is refused.
    fn resolve(&self, path: &str) -> io::Result<PathBuf> {
        let mut resolved = self.root.clone();
        for component in Path::new(path).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::RootDir | Component::CurDir => {}
                Component::ParentDir | Component::Prefix(_) => {
                    return Err(io::Error::new(
                        io::ErrorKind::PermissionDenied,
                        format!("{path} escapes the store root"),
                    ))
                }
            }
        }
        Ok(resolved)
    }

    fn handle(&mut self, file: File) -> FileId {
        let id = FileId(self.next);
        self.next += 1;
        self.open.insert(id, file);
        id
    }

    fn file(&mut self, file: FileId) -> io::Result<&mut File> {
        self.open.get_mut(&file).ok_or_else(|| bad_handle(file))
    }
}

impl BlockStore for DirStore {
    fn open(&mut self, path: &str) -> io::Result<FileId> {
        let file = File::open(self.resolve(path)?)?;
        Ok(self.handle(file))
    }

    fn create(&mut self, path: &str) -> io::Result<FileId> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(self.resolve(path)?)?;
        Ok(self.handle(file))
    }

    fn read_block(&mut self, file: FileId, index: u64, block: &mut Block) -> io::Result<()> {
        let file = self.file(file)?;
        let start = index * BLOCK_SIZE as u64;
        if start >= file.metadata()?.len() {
            return Err(past_end(index));
        }
        file.seek(SeekFrom::Start(start))?;
        block.fill(0);
        let mut filled = 0;
        while filled < BLOCK_SIZE {
            match file.read(&mut block[filled..])? {
                0 => break,
                n => filled += n,
            }
        }
        Ok(())
    }

    fn write_block(&mut self, file: FileId, index: u64, block: &Block, len: usize) -> io::Result<()> {
        let file = self.file(file)?;
        file.seek(SeekFrom::Start(index * BLOCK_SIZE as u64))?;
        file.write_all(&block[..len])
    }

    fn size(&mut self, file: FileId) -> io::Result<u64> {
        Ok(self.file(file)?.metadata()?.len())
    }

    fn close(&mut self, file: FileId) {
        self.open.remove(&file);
    }

    fn delete(&mut self, path: &str) -> io::Result<()> {
        std::fs::remove_file(self.resolve(path)?)
    }
}
