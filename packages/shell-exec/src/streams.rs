use std::io;
use std::sync::Arc;

use tracing::warn;

use crate::channel::{same_channel, Channel};
use crate::config::DEFAULT_DESCRIPTORS;
use crate::control::ConfigError;
use crate::job::JobControlGate;
use crate::multi::{MultiChannel, Stream};

/// Descriptor table of one stage. Entries come from the parent (not owned)
/// or from the stage's own redirections (owned); only owned entries are
/// closed when the stage finishes.
#[derive(Clone)]
pub struct StreamTable {
    entries: Vec<Option<Stream>>,
    owned: Vec<bool>,
}

impl StreamTable {
    /// A table with the default number of descriptors, every entry owned.
    pub fn new(stdin: Channel, stdout: Channel, stderr: Channel) -> Self {
        Self::with_descriptors(DEFAULT_DESCRIPTORS, stdin, stdout, stderr)
    }

    pub fn with_descriptors(
        descriptors: usize,
        stdin: Channel,
        stdout: Channel,
        stderr: Channel,
    ) -> Self {
        let len = descriptors.max(3);
        let mut entries = vec![None; len];
        entries[0] = Some(Stream::Single(stdin));
        entries[1] = Some(Stream::Single(stdout));
        entries[2] = Some(Stream::Single(stderr));
        let mut owned = vec![false; len];
        owned[..3].fill(true);
        StreamTable { entries, owned }
    }

    /// A table for a child stage: same entries, none of them owned.
    pub fn inherit(&self) -> Self {
        StreamTable {
            entries: self.entries.clone(),
            owned: vec![false; self.entries.len()],
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, fd: usize) -> Option<&Stream> {
        self.entries.get(fd).and_then(Option::as_ref)
    }

    pub fn is_owned(&self, fd: usize) -> bool {
        self.owned.get(fd).copied().unwrap_or(false)
    }

    pub fn check_fd(&self, fd: usize) -> Result<(), ConfigError> {
        if fd < self.entries.len() {
            Ok(())
        } else {
            Err(ConfigError::BadDescriptor(fd))
        }
    }

    /// The stream at `fd`, or an error when it is out of range or empty.
    pub fn require(&self, fd: usize) -> Result<&Stream, ConfigError> {
        self.check_fd(fd)?;
        self.get(fd).ok_or(ConfigError::ClosedDescriptor(fd))
    }

    pub fn set(&mut self, fd: usize, stream: Stream, owned: bool) -> Result<(), ConfigError> {
        self.check_fd(fd)?;
        self.entries[fd] = Some(stream);
        self.owned[fd] = owned;
        Ok(())
    }

    /// Replace every plain channel by a multiplexer holding it, so all stage
    /// I/O goes through the job-control gate. Descriptors sharing a channel
    /// keep sharing one multiplexer; its member is owned when any of them
    /// owns the channel. Entry ownership is unchanged.
    pub fn wrap_all(&mut self, gate: &Arc<JobControlGate>) {
        let mut wrapped: Vec<(Channel, Arc<MultiChannel>)> = Vec::new();
        for fd in 0..self.entries.len() {
            let Some(Stream::Single(channel)) = &self.entries[fd] else {
                continue;
            };
            let channel = channel.clone();
            let multi = match wrapped.iter().find(|(ch, _)| same_channel(ch, &channel)) {
                Some((_, multi)) => multi.clone(),
                None => {
                    let owned = self.entries.iter().zip(&self.owned).any(|(entry, owned)| {
                        *owned
                            && matches!(entry, Some(Stream::Single(ch)) if same_channel(ch, &channel))
                    });
                    let multi = Arc::new(MultiChannel::wrap(channel.clone(), owned, gate.clone()));
                    wrapped.push((channel, multi.clone()));
                    multi
                }
            };
            self.entries[fd] = Some(Stream::Multi(multi));
        }
    }

    /// Close every owned entry, continuing past failures.
    pub fn close_owned(&self) -> Vec<(usize, io::Error)> {
        let mut failures = Vec::new();
        for (fd, entry) in self.entries.iter().enumerate() {
            if !self.owned[fd] {
                continue;
            }
            if let Some(stream) = entry {
                if let Err(e) = stream.close() {
                    warn!(fd, stream = %stream, error = %e, "failed to close descriptor");
                    failures.push((fd, e));
                }
            }
        }
        failures
    }

    pub fn owned_flags(&self) -> Vec<bool> {
        self.owned.clone()
    }
}
