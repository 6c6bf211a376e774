//! Byte channels that can sit in a stage's stream table.
//!
//! Channels are shared between stages (`Arc<dyn ByteChannel>`), so every
//! operation takes `&self` and implementations guard their handle with a
//! mutex. Closing drops the underlying handle and is idempotent.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_lite::future::block_on;
use futures_lite::{AsyncReadExt, AsyncWriteExt};

use crate::control::ExecError;

pub trait ByteChannel: Send + Sync {
    fn is_readable(&self) -> bool {
        false
    }

    fn is_writable(&self) -> bool {
        false
    }

    /// Read into `buf`. `Ok(0)` with a non-empty buffer means end of stream.
    fn read(&self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("{} is not readable", self.name()),
        ))
    }

    fn write(&self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("{} is not writable", self.name()),
        ))
    }

    fn flush(&self) -> io::Result<()> {
        Ok(())
    }

    fn close(&self) -> io::Result<()>;

    fn is_open(&self) -> bool;

    /// Human readable description used in logs.
    fn name(&self) -> String;
}

pub type Channel = Arc<dyn ByteChannel>;

/// Identity comparison; two handles are the same channel when they point at
/// the same allocation.
pub fn same_channel(a: &Channel, b: &Channel) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn closed_error(name: &str) -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, format!("{name} is closed"))
}

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenMode {
    pub read: bool,
    pub write: bool,
    pub append: bool,
    pub create: bool,
    pub truncate: bool,
}

impl OpenMode {
    /// `>` and `>>`: write, create, truncate unless appending.
    pub fn output(append: bool) -> Self {
        Self {
            write: true,
            create: true,
            append,
            truncate: !append,
            ..Self::default()
        }
    }

    /// `<` and `<>`: read, optionally write with create.
    pub fn input(writable: bool) -> Self {
        Self {
            read: true,
            write: writable,
            create: writable,
            ..Self::default()
        }
    }

    fn options(&self) -> OpenOptions {
        let mut options = OpenOptions::new();
        options
            .read(self.read)
            .write(self.write)
            .append(self.append)
            .create(self.create)
            .truncate(self.truncate);
        options
    }
}

pub struct FileChannel {
    path: PathBuf,
    mode: OpenMode,
    file: Mutex<Option<File>>,
}

impl FileChannel {
    pub fn open(path: &Path, mode: OpenMode) -> Result<Channel, ExecError> {
        let file = mode.options().open(path).map_err(|source| ExecError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Arc::new(FileChannel {
            path: path.to_path_buf(),
            mode,
            file: Mutex::new(Some(file)),
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ByteChannel for FileChannel {
    fn is_readable(&self) -> bool {
        self.mode.read
    }

    fn is_writable(&self) -> bool {
        self.mode.write || self.mode.append
    }

    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        match lock(&self.file).as_mut() {
            Some(file) => file.read(buf),
            None => Err(closed_error(&self.name())),
        }
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        match lock(&self.file).as_mut() {
            Some(file) => file.write(buf),
            None => Err(closed_error(&self.name())),
        }
    }

    fn flush(&self) -> io::Result<()> {
        match lock(&self.file).as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }

    fn close(&self) -> io::Result<()> {
        if let Some(mut file) = lock(&self.file).take() {
            file.flush()?;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        lock(&self.file).is_some()
    }

    fn name(&self) -> String {
        format!("file:{}", self.path.display())
    }
}

// ---------------------------------------------------------------------------
// In-memory pipes
// ---------------------------------------------------------------------------

/// Create a bounded pipe. Writers block while the buffer is full; the reader
/// sees end of stream once the writer is closed and the buffer drained.
pub fn pipe(capacity: usize) -> (Channel, Channel) {
    let (reader, writer) = piper::pipe(capacity);
    (
        Arc::new(PipeReader {
            reader: Mutex::new(Some(reader)),
        }),
        Arc::new(PipeWriter {
            writer: Mutex::new(Some(writer)),
        }),
    )
}

pub struct PipeReader {
    reader: Mutex<Option<piper::Reader>>,
}

impl ByteChannel for PipeReader {
    fn is_readable(&self) -> bool {
        true
    }

    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        match lock(&self.reader).as_mut() {
            Some(reader) => block_on(reader.read(buf)),
            None => Err(closed_error("pipe reader")),
        }
    }

    fn close(&self) -> io::Result<()> {
        lock(&self.reader).take();
        Ok(())
    }

    fn is_open(&self) -> bool {
        lock(&self.reader).is_some()
    }

    fn name(&self) -> String {
        "pipe:read".into()
    }
}

pub struct PipeWriter {
    writer: Mutex<Option<piper::Writer>>,
}

impl ByteChannel for PipeWriter {
    fn is_writable(&self) -> bool {
        true
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        match lock(&self.writer).as_mut() {
            Some(writer) => block_on(writer.write(buf)),
            None => Err(closed_error("pipe writer")),
        }
    }

    fn flush(&self) -> io::Result<()> {
        match lock(&self.writer).as_mut() {
            Some(writer) => block_on(writer.flush()),
            None => Ok(()),
        }
    }

    fn close(&self) -> io::Result<()> {
        // Dropping the writer is what signals end of stream to the reader.
        lock(&self.writer).take();
        Ok(())
    }

    fn is_open(&self) -> bool {
        lock(&self.writer).is_some()
    }

    fn name(&self) -> String {
        "pipe:write".into()
    }
}

// ---------------------------------------------------------------------------
// Process standard streams
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdStream {
    Stdin,
    Stdout,
    Stderr,
}

/// The process's own stdin/stdout/stderr. Closing only marks the channel
/// closed; the process handle stays usable for the rest of the program.
pub struct StdChannel {
    stream: StdStream,
    open: AtomicBool,
}

impl StdChannel {
    pub fn new(stream: StdStream) -> Channel {
        Arc::new(StdChannel {
            stream,
            open: AtomicBool::new(true),
        })
    }

    /// Channels for descriptors 0, 1 and 2, in that order.
    pub fn terminals() -> [Channel; 3] {
        [
            Self::new(StdStream::Stdin),
            Self::new(StdStream::Stdout),
            Self::new(StdStream::Stderr),
        ]
    }

    fn check_open(&self) -> io::Result<()> {
        if self.open.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(closed_error(&self.name()))
        }
    }
}

impl ByteChannel for StdChannel {
    fn is_readable(&self) -> bool {
        self.stream == StdStream::Stdin
    }

    fn is_writable(&self) -> bool {
        self.stream != StdStream::Stdin
    }

    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.check_open()?;
        match self.stream {
            StdStream::Stdin => io::stdin().read(buf),
            _ => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("{} is not readable", self.name()),
            )),
        }
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        self.check_open()?;
        match self.stream {
            StdStream::Stdout => io::stdout().write(buf),
            StdStream::Stderr => io::stderr().write(buf),
            StdStream::Stdin => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "stdin is not writable",
            )),
        }
    }

    fn flush(&self) -> io::Result<()> {
        match self.stream {
            StdStream::Stdout => io::stdout().flush(),
            StdStream::Stderr => io::stderr().flush(),
            StdStream::Stdin => Ok(()),
        }
    }

    fn close(&self) -> io::Result<()> {
        self.open.store(false, Ordering::Release);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn name(&self) -> String {
        match self.stream {
            StdStream::Stdin => "stdin".into(),
            StdStream::Stdout => "stdout".into(),
            StdStream::Stderr => "stderr".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn file_output_truncates_and_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        std::fs::write(&path, "old contents\n").unwrap();

        let ch = FileChannel::open(&path, OpenMode::output(false)).unwrap();
        assert!(ch.is_writable());
        assert!(!ch.is_readable());
        ch.write(b"one\n").unwrap();
        ch.close().unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "one\n");

        let ch = FileChannel::open(&path, OpenMode::output(true)).unwrap();
        ch.write(b"two\n").unwrap();
        ch.close().unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "one\ntwo\n");
    }

    #[test]
    fn file_input_requires_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.txt");
        let err = match FileChannel::open(&missing, OpenMode::input(false)) {
            Err(e) => e,
            Ok(_) => panic!("expected open to fail"),
        };
        assert!(matches!(err, ExecError::Open { .. }));

        // <> creates the file
        let ch = FileChannel::open(&missing, OpenMode::input(true)).unwrap();
        assert!(ch.is_readable() && ch.is_writable());
        assert!(missing.exists());
    }

    #[test]
    fn closed_file_rejects_io_and_close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let ch = FileChannel::open(&dir.path().join("f"), OpenMode::output(false)).unwrap();
        ch.close().unwrap();
        ch.close().unwrap();
        assert!(!ch.is_open());
        assert_eq!(
            ch.write(b"x").unwrap_err().kind(),
            io::ErrorKind::BrokenPipe
        );
    }

    #[test]
    fn pipe_delivers_bytes_then_eof() {
        let (reader, writer) = pipe(4);
        let producer = thread::spawn(move || {
            let mut data: &[u8] = b"hello through a tiny pipe";
            while !data.is_empty() {
                let n = writer.write(data).unwrap();
                data = &data[n..];
            }
            writer.close().unwrap();
        });

        let mut out = Vec::new();
        let mut buf = [0u8; 3];
        loop {
            let n = reader.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        producer.join().unwrap();
        assert_eq!(out, b"hello through a tiny pipe");
    }

    #[test]
    fn same_channel_is_identity() {
        let (a, b) = pipe(8);
        let a2 = a.clone();
        assert!(same_channel(&a, &a2));
        assert!(!same_channel(&a, &b));
    }

    #[test]
    fn std_channel_directions() {
        let [stdin, stdout, stderr] = StdChannel::terminals();
        assert!(stdin.is_readable() && !stdin.is_writable());
        assert!(stdout.is_writable() && !stdout.is_readable());
        assert!(stderr.is_writable());
        stdout.close().unwrap();
        assert!(!stdout.is_open());
        assert!(stdout.write(b"x").is_err());
    }
}
