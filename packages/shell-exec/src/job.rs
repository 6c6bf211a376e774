use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use tracing::trace;

use crate::channel::{same_channel, Channel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Foreground,
    Background,
    Suspended,
    Done,
}

#[derive(Debug)]
struct JobState {
    status: JobStatus,
    /// Bumped by `interrupt`; a waiter fails when it changes under it.
    interrupts: u64,
}

/// A job as seen by the stages that belong to it. The scheduler changes the
/// status; stages only ever move Background to Suspended and then wait.
#[derive(Debug)]
pub struct Job {
    id: u32,
    state: Mutex<JobState>,
    changed: Condvar,
}

impl Job {
    pub fn new(id: u32, status: JobStatus) -> Self {
        Job {
            id,
            state: Mutex::new(JobState {
                status,
                interrupts: 0,
            }),
            changed: Condvar::new(),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn status(&self) -> JobStatus {
        self.lock().status
    }

    /// Change the status and wake every stage waiting on this job.
    pub fn set_status(&self, status: JobStatus) {
        let mut state = self.lock();
        trace!(job = self.id, from = ?state.status, to = ?status, "job status");
        state.status = status;
        drop(state);
        self.changed.notify_all();
    }

    pub fn suspend(&self) {
        self.set_status(JobStatus::Suspended);
    }

    pub fn foreground(&self) {
        self.set_status(JobStatus::Foreground);
    }

    pub fn background(&self) {
        self.set_status(JobStatus::Background);
    }

    /// Cancel every wait currently blocked on this job. The blocked reads and
    /// writes fail with `ErrorKind::Interrupted`.
    pub fn interrupt(&self) {
        let mut state = self.lock();
        state.interrupts += 1;
        drop(state);
        self.changed.notify_all();
    }

    /// Block while the job is suspended. With `may_suspend` a Background job
    /// is first moved to Suspended, and moved there again if it returns to
    /// Background while the caller waits. The transition and the wait happen
    /// under one lock so a status observer never sees Suspended before the
    /// caller is waiting.
    fn suspend_check(&self, may_suspend: bool) -> io::Result<()> {
        let mut state = self.lock();
        let generation = state.interrupts;
        loop {
            match state.status {
                JobStatus::Background if !may_suspend => return Ok(()),
                JobStatus::Background => {
                    trace!(job = self.id, "background job touched the terminal, suspending");
                    state.status = JobStatus::Suspended;
                    self.changed.notify_all();
                }
                JobStatus::Suspended => {}
                JobStatus::Foreground | JobStatus::Done => return Ok(()),
            }
            state = self
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
            if state.interrupts != generation {
                return Err(io::Error::new(
                    io::ErrorKind::Interrupted,
                    format!("job {} interrupted while suspended", self.id),
                ));
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, JobState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Suspend check run before every member read/write of a multiplexed stream.
/// Only I/O against one of the session's terminal channels suspends a
/// background job; any I/O of a job that is already suspended waits.
pub struct JobControlGate {
    job: Option<Arc<Job>>,
    terminals: Vec<Channel>,
}

impl JobControlGate {
    pub fn new(job: Option<Arc<Job>>, terminals: Vec<Channel>) -> Self {
        JobControlGate { job, terminals }
    }

    /// A gate that never blocks.
    pub fn disabled() -> Self {
        JobControlGate {
            job: None,
            terminals: Vec::new(),
        }
    }

    pub fn job(&self) -> Option<&Arc<Job>> {
        self.job.as_ref()
    }

    pub fn is_terminal(&self, channel: &Channel) -> bool {
        self.terminals.iter().any(|t| same_channel(t, channel))
    }

    pub fn check(&self, channel: &Channel) -> io::Result<()> {
        match &self.job {
            Some(job) => job.suspend_check(self.is_terminal(channel)),
            None => Ok(()),
        }
    }
}
