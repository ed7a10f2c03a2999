use std::{
    collections::VecDeque,
    io::{self, BufRead, Write},
};

/// Where descriptors 0, 1 and 2 end up.
pub trait Console {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Appends one line, including its newline if there was one, to `line`. Appends nothing at
    /// end of input.
    fn read_line(&mut self, line: &mut Vec<u8>) -> io::Result<()>;
}

pub struct StdConsole;

impl Console for StdConsole {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        stdout.write_all(bytes)?;
        stdout.flush()
    }

    fn read_line(&mut self, line: &mut Vec<u8>) -> io::Result<()> {
        io::stdin().lock().read_until(b'\n', line).map(drop)
    }
}

/// Scripted input, captured output.
#[derive(Default)]
pub struct BufferConsole {
    pub input: VecDeque<u8>,
    pub output: Vec<u8>,
}

impl BufferConsole {
    pub fn with_input(input: &[u8]) -> Self {
        BufferConsole {
            input: input.iter().copied().collect(),
            output: Vec::new(),
        }
    }
}

impl Console for BufferConsole {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.output.extend_from_slice(bytes);
        Ok(())
    }

    fn read_line(&mut self, line: &mut Vec<u8>) -> io::Result<()> {
        while let Some(byte) = self.input.pop_front() {
            line.push(byte);
            if byte == b'\n' {
                break;
            }
        }
        Ok(())
    }
}

/// Writes program output, dropping carriage returns.
pub fn write_translated(console: &mut dyn Console, bytes: &[u8]) -> io::Result<()> {
    if !bytes.contains(&b'\r') {
        return console.write(bytes);
    }
    let translated: Vec<u8> = bytes.iter().copied().filter(|&b| b != b'\r').collect();
    console.write(&translated)
}

/// Console input handed out a line at a time. Whatever doesn't fit in the caller's buffer is
/// kept for the next read.
#[derive(Default)]
pub struct LineReader {
    pending: Vec<u8>,
}

impl LineReader {
    pub fn read(&mut self, console: &mut dyn Console, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            console.read_line(&mut self.pending)?;
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn carriage_returns_are_dropped() {
        let mut console = BufferConsole::default();
        write_translated(&mut console, b"one\r\ntwo\n").unwrap();
        write_translated(&mut console, b"\r").unwrap();
        write_translated(&mut console, b"three").unwrap();
        assert_eq!(console.output, b"one\ntwo\nthree");
    }

    #[test]
    fn reads_stop_at_newline() {
        let mut console = BufferConsole::with_input(b"first line\nsecond\n");
        let mut reader = LineReader::default();
        let mut buf = [0; 64];
        let n = reader.read(&mut console, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"first line\n");
        let n = reader.read(&mut console, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"second\n");
        assert_eq!(reader.read(&mut console, &mut buf).unwrap(), 0);
    }

    #[test]
    fn long_lines_carry_over() {
        let mut console = BufferConsole::with_input(b"abcdefgh\nz\n");
        let mut reader = LineReader::default();
        let mut buf = [0; 3];
        let mut got = Vec::new();
        for _ in 0..3 {
            let n = reader.read(&mut console, &mut buf).unwrap();
            got.extend_from_slice(&buf[..n]);
        }
        assert_eq!(got, b"abcdefgh\n");
        let n = reader.read(&mut console, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"z\n");
    }
}
