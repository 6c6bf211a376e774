use std::cell::RefCell;
use std::io::{self, Read, Write};

use crate::multi::Stream;

/// The three streams a stage exposes to the command it runs.
#[derive(Clone)]
pub struct StageIo {
    pub stdin: Stream,
    pub stdout: Stream,
    pub stderr: Stream,
}

/// `std::io::Read` adapter over a stream.
pub struct StreamReader(pub Stream);

impl Read for StreamReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

/// `std::io::Write` adapter over a stream.
pub struct StreamWriter(pub Stream);

impl Write for StreamWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.0.write_all(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

/// Copy `from` into `to` until end of stream. An `Interrupted` error ends
/// the copy instead of being retried.
pub fn copy_to_stream(from: &mut dyn Read, to: &Stream, buffer_size: usize) -> io::Result<u64> {
    let mut buf = vec![0u8; buffer_size.max(1)];
    let mut total = 0u64;
    loop {
        let n = from.read(&mut buf)?;
        if n == 0 {
            return Ok(total);
        }
        to.write_all(&buf[..n])?;
        total += n as u64;
    }
}

thread_local! {
    static BOUND: RefCell<Vec<StageIo>> = const { RefCell::new(Vec::new()) };
}

/// Per-thread stdio binding for code that has no stage context at hand.
/// Bindings nest: closing restores whatever was bound before.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadIo;

impl ThreadIo {
    pub fn set_streams(&self, io: StageIo) {
        BOUND.with(|bound| bound.borrow_mut().push(io));
    }

    pub fn close(&self) {
        BOUND.with(|bound| {
            bound.borrow_mut().pop();
        });
    }

    pub fn current(&self) -> Option<StageIo> {
        BOUND.with(|bound| bound.borrow().last().cloned())
    }

    pub fn depth(&self) -> usize {
        BOUND.with(|bound| bound.borrow().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MemoryChannel;

    fn stage_io(input: &[u8]) -> (StageIo, std::sync::Arc<MemoryChannel>) {
        let out = MemoryChannel::writer();
        let io = StageIo {
            stdin: Stream::Single(MemoryChannel::reader(input)),
            stdout: Stream::Single(out.clone()),
            stderr: Stream::Single(MemoryChannel::writer()),
        };
        (io, out)
    }

    #[test]
    fn adapters_work_with_std_io() {
        let (io, out) = stage_io(b"copied");
        let mut reader = StreamReader(io.stdin.clone());
        let mut writer = StreamWriter(io.stdout.clone());
        std::io::copy(&mut reader, &mut writer).unwrap();
        writeln!(writer, "!").unwrap();
        assert_eq!(out.contents(), b"copied!\n");
    }

    #[test]
    fn copy_to_stream_uses_small_buffers() {
        let (io, out) = stage_io(b"");
        let mut source: &[u8] = b"chunked copy";
        assert_eq!(copy_to_stream(&mut source, &io.stdout, 5).unwrap(), 12);
        assert_eq!(out.contents(), b"chunked copy");
    }

    #[test]
    fn bindings_nest_per_thread() {
        let thread_io = ThreadIo;
        let (outer, outer_out) = stage_io(b"");
        let (inner, _) = stage_io(b"");
        assert!(thread_io.current().is_none());

        thread_io.set_streams(outer);
        thread_io.set_streams(inner);
        assert_eq!(thread_io.depth(), 2);
        thread_io.close();

        let current = thread_io.current().unwrap();
        current.stdout.write_all(b"x").unwrap();
        assert_eq!(outer_out.contents(), b"x");

        // other threads see nothing
        std::thread::spawn(|| assert!(ThreadIo.current().is_none()))
            .join()
            .unwrap();

        thread_io.close();
        assert_eq!(thread_io.depth(), 0);
    }
}
