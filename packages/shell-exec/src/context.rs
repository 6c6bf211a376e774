//! The stage a thread is currently running.
//!
//! Commands normally receive a [`StageContext`]. Code deeper in the call
//! stack that has no context at hand can still reach the running stage
//! through [`current_stage`], [`error`] and [`is_tty`]; the slot is per
//! thread and restored when a nested stage finishes.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use crate::host::Session;
use crate::multi::Stream;
use crate::stdio::{StageIo, StreamReader, StreamWriter};

/// Out-of-band state of a running stage.
#[derive(Debug)]
pub struct StageHandle {
    error: AtomicI32,
    owned: Vec<bool>,
}

impl StageHandle {
    pub fn new(owned: Vec<bool>) -> Self {
        StageHandle {
            error: AtomicI32::new(0),
            owned,
        }
    }

    /// The recorded exit status, 0 when none was recorded.
    pub fn error(&self) -> i32 {
        self.error.load(Ordering::Acquire)
    }

    pub fn set_error(&self, code: i32) {
        self.error.store(code, Ordering::Release);
    }

    /// True when `fd` was inherited from the parent rather than opened by
    /// this stage.
    pub fn is_tty(&self, fd: usize) -> bool {
        matches!(self.owned.get(fd), Some(false))
    }
}

thread_local! {
    static CURRENT: RefCell<Option<Arc<StageHandle>>> = const { RefCell::new(None) };
}

/// Makes a stage current for the calling thread until dropped, then puts
/// back whatever was current before.
pub struct CurrentStageGuard {
    previous: Option<Arc<StageHandle>>,
    _not_send: PhantomData<*const ()>,
}

impl CurrentStageGuard {
    pub fn enter(handle: Arc<StageHandle>) -> Self {
        let previous = CURRENT.with(|current| current.borrow_mut().replace(handle));
        CurrentStageGuard {
            previous,
            _not_send: PhantomData,
        }
    }
}

impl Drop for CurrentStageGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|current| *current.borrow_mut() = previous);
    }
}

pub fn current_stage() -> Option<Arc<StageHandle>> {
    CURRENT.with(|current| current.borrow().clone())
}

/// Record `code` as the exit status of the current stage. Does nothing when
/// no stage is running on this thread.
pub fn error(code: i32) {
    if let Some(stage) = current_stage() {
        stage.set_error(code);
    }
}

/// Whether `fd` of the current stage is inherited. False outside a stage.
pub fn is_tty(fd: usize) -> bool {
    current_stage().is_some_and(|stage| stage.is_tty(fd))
}

/// What a command gets to work with while it runs.
pub struct StageContext<'a> {
    session: &'a dyn Session,
    io: StageIo,
    handle: Arc<StageHandle>,
}

impl<'a> StageContext<'a> {
    pub fn new(session: &'a dyn Session, io: StageIo, handle: Arc<StageHandle>) -> Self {
        StageContext {
            session,
            io,
            handle,
        }
    }

    pub fn stdin(&self) -> &Stream {
        &self.io.stdin
    }

    pub fn stdout(&self) -> &Stream {
        &self.io.stdout
    }

    pub fn stderr(&self) -> &Stream {
        &self.io.stderr
    }

    pub fn reader(&self) -> StreamReader {
        StreamReader(self.io.stdin.clone())
    }

    pub fn writer(&self) -> StreamWriter {
        StreamWriter(self.io.stdout.clone())
    }

    pub fn current_dir(&self) -> PathBuf {
        self.session.current_dir()
    }

    pub fn error(&self, code: i32) {
        self.handle.set_error(code);
    }

    pub fn is_tty(&self, fd: usize) -> bool {
        self.handle.is_tty(fd)
    }

    pub fn session(&self) -> &'a dyn Session {
        self.session
    }

    pub fn handle(&self) -> &Arc<StageHandle> {
        &self.handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_stage_means_no_op() {
        error(3);
        assert!(current_stage().is_none());
        assert!(!is_tty(0));
    }

    #[test]
    fn guard_records_and_restores() {
        let outer = Arc::new(StageHandle::new(vec![false, true, false]));
        let inner = Arc::new(StageHandle::new(vec![true, true, true]));
        {
            let _outer = CurrentStageGuard::enter(outer.clone());
            assert!(is_tty(0));
            assert!(!is_tty(1));
            {
                let _inner = CurrentStageGuard::enter(inner.clone());
                error(4);
                assert!(!is_tty(0));
            }
            let current = current_stage().unwrap();
            assert!(Arc::ptr_eq(&current, &outer));
            error(2);
        }
        assert!(current_stage().is_none());
        assert_eq!(inner.error(), 4);
        assert_eq!(outer.error(), 2);
    }

    #[test]
    fn out_of_range_descriptor_is_not_a_tty() {
        let handle = StageHandle::new(vec![false; 3]);
        assert!(handle.is_tty(2));
        assert!(!handle.is_tty(3));
    }
}
