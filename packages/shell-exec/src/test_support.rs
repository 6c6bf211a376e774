use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use relay_shell::ast::Statement;
use serde_json::Value;

use crate::channel::{closed_error, lock, ByteChannel, Channel};
use crate::context::StageContext;
use crate::control::ExecError;
use crate::host::CommandDispatcher;
use crate::job::{Job, JobStatus};
use crate::state::ShellState;

/// Block until `job` reaches `status`, failing the test after five seconds.
pub fn wait_for_status(job: &Job, status: JobStatus) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while job.status() != status {
        assert!(
            Instant::now() < deadline,
            "job {} stuck in {:?}, expected {:?}",
            job.id(),
            job.status(),
            status
        );
        thread::sleep(Duration::from_millis(1));
    }
}

/// An in-memory channel that records writes, serves canned input and counts
/// close calls.
pub struct MemoryChannel {
    input: Mutex<io::Cursor<Vec<u8>>>,
    output: Mutex<Vec<u8>>,
    readable: bool,
    writable: bool,
    write_limit: Mutex<Option<usize>>,
    fail_close: AtomicBool,
    closes: AtomicUsize,
    open: AtomicBool,
}

impl MemoryChannel {
    fn build(input: &[u8], readable: bool, writable: bool) -> Arc<Self> {
        Arc::new(MemoryChannel {
            input: Mutex::new(io::Cursor::new(input.to_vec())),
            output: Mutex::new(Vec::new()),
            readable,
            writable,
            write_limit: Mutex::new(None),
            fail_close: AtomicBool::new(false),
            closes: AtomicUsize::new(0),
            open: AtomicBool::new(true),
        })
    }

    pub fn reader(input: &[u8]) -> Arc<Self> {
        Self::build(input, true, false)
    }

    pub fn writer() -> Arc<Self> {
        Self::build(b"", false, true)
    }

    /// Accept at most `limit` bytes per write call.
    pub fn with_write_limit(self: Arc<Self>, limit: usize) -> Arc<Self> {
        *lock(&self.write_limit) = Some(limit);
        self
    }

    pub fn with_close_error(self: Arc<Self>) -> Arc<Self> {
        self.fail_close.store(true, Ordering::Release);
        self
    }

    pub fn contents(&self) -> Vec<u8> {
        lock(&self.output).clone()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.contents()).into_owned()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::Acquire)
    }
}

impl ByteChannel for MemoryChannel {
    fn is_readable(&self) -> bool {
        self.readable
    }

    fn is_writable(&self) -> bool {
        self.writable
    }

    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.is_open() {
            return Err(closed_error("memory"));
        }
        io::Read::read(&mut *lock(&self.input), buf)
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        if !self.is_open() {
            return Err(closed_error("memory"));
        }
        let n = match *lock(&self.write_limit) {
            Some(limit) => buf.len().min(limit),
            None => buf.len(),
        };
        lock(&self.output).extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn close(&self) -> io::Result<()> {
        self.closes.fetch_add(1, Ordering::AcqRel);
        self.open.store(false, Ordering::Release);
        if self.fail_close.load(Ordering::Acquire) {
            return Err(io::Error::other("close failed"));
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn name(&self) -> String {
        "memory".into()
    }
}

/// Terminal channels of a [`memory_session`].
pub struct Terminals {
    pub stdin: Arc<MemoryChannel>,
    pub stdout: Arc<MemoryChannel>,
    pub stderr: Arc<MemoryChannel>,
}

/// A session rooted at `cwd` whose terminals are memory channels.
pub fn memory_session(cwd: &Path, input: &[u8]) -> (Arc<ShellState>, Terminals) {
    let terminals = Terminals {
        stdin: MemoryChannel::reader(input),
        stdout: MemoryChannel::writer(),
        stderr: MemoryChannel::writer(),
    };
    let channels: [Channel; 3] = [
        terminals.stdin.clone(),
        terminals.stdout.clone(),
        terminals.stderr.clone(),
    ];
    let state = Arc::new(ShellState::new(cwd.to_path_buf(), channels));
    (state, terminals)
}

type DispatchFn =
    dyn Fn(&mut StageContext<'_>, &Statement) -> Result<Value, ExecError> + Send + Sync;

/// Dispatcher backed by a closure, counting how often it ran.
pub struct FnDispatcher {
    f: Box<DispatchFn>,
    calls: AtomicUsize,
}

impl FnDispatcher {
    pub fn new(
        f: impl Fn(&mut StageContext<'_>, &Statement) -> Result<Value, ExecError>
            + Send
            + Sync
            + 'static,
    ) -> Arc<Self> {
        Arc::new(FnDispatcher {
            f: Box::new(f),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Acquire)
    }
}

impl CommandDispatcher for FnDispatcher {
    fn execute(
        &self,
        ctx: &mut StageContext<'_>,
        statement: &Statement,
    ) -> Result<Value, ExecError> {
        self.calls.fetch_add(1, Ordering::AcqRel);
        (self.f)(ctx, statement)
    }
}
