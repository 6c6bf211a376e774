use std::path::{Path, PathBuf};
use std::sync::Arc;

use relay_shell::token::{OutputFd, RedirectDirective};
use tracing::debug;

use crate::channel::{Channel, FileChannel, OpenMode};
use crate::control::{ConfigError, ExecError};
use crate::job::JobControlGate;
use crate::multi::{MultiChannel, Stream};
use crate::streams::StreamTable;

/// Access requested when binding a channel to a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Access {
    pub read: bool,
    pub write: bool,
}

impl Access {
    pub const READ: Access = Access {
        read: true,
        write: false,
    };
    pub const WRITE: Access = Access {
        read: false,
        write: true,
    };
    pub const READ_WRITE: Access = Access {
        read: true,
        write: true,
    };
}

/// Applies parsed redirection directives to a stage's stream table.
pub struct RedirectionProcessor<'a> {
    cwd: &'a Path,
    gate: &'a Arc<JobControlGate>,
    multios: bool,
}

impl<'a> RedirectionProcessor<'a> {
    pub fn new(cwd: &'a Path, gate: &'a Arc<JobControlGate>, multios: bool) -> Self {
        RedirectionProcessor { cwd, gate, multios }
    }

    /// Apply `directives` in order. The first failure stops processing; files
    /// opened before it stay in the table as owned entries so the caller's
    /// cleanup closes them.
    pub fn apply(
        &self,
        table: &mut StreamTable,
        directives: &[RedirectDirective],
    ) -> Result<(), ExecError> {
        for directive in directives {
            debug!(?directive, "redirect");
            match directive {
                RedirectDirective::Output { fd, append, target } => {
                    let channel = FileChannel::open(&self.resolve(target), OpenMode::output(*append))?;
                    match fd {
                        OutputFd::Fd(fd) => self.set_stream(table, channel, *fd, Access::WRITE)?,
                        OutputFd::Both => {
                            self.set_stream(table, channel.clone(), 1, Access::WRITE)?;
                            self.set_stream(table, channel, 2, Access::WRITE)?;
                        }
                    }
                }
                RedirectDirective::Duplicate { fd, source } => {
                    self.duplicate(table, *fd, *source)?;
                }
                RedirectDirective::Input {
                    fd,
                    writable,
                    target,
                } => {
                    let channel = FileChannel::open(&self.resolve(target), OpenMode::input(*writable))?;
                    let access = if *writable {
                        Access::READ_WRITE
                    } else {
                        Access::READ
                    };
                    self.set_stream(table, channel, *fd, access)?;
                }
            }
        }
        Ok(())
    }

    /// Bind `channel` to `fd`. An inherited or empty entry is replaced; an
    /// entry the stage already opened gains the channel as an extra member.
    pub fn set_stream(
        &self,
        table: &mut StreamTable,
        channel: Channel,
        fd: usize,
        access: Access,
    ) -> Result<(), ConfigError> {
        table.check_fd(fd)?;
        if !access.read && !access.write {
            return Err(ConfigError::NoAccessMode);
        }
        if access.read && !channel.is_readable() {
            return Err(ConfigError::ChannelNotReadable);
        }
        if access.write && !channel.is_writable() {
            return Err(ConfigError::ChannelNotWritable);
        }
        match fd {
            0 if !access.read => return Err(ConfigError::DescriptorNotReadable(0)),
            1 | 2 if !access.write => return Err(ConfigError::DescriptorNotWritable(fd)),
            _ => {}
        }

        let previous = table.get(fd).cloned();
        let owned = table.is_owned(fd);

        if !self.multios {
            if let (Some(stream), true) = (&previous, owned) {
                if let Err(e) = stream.close() {
                    debug!(fd, error = %e, "closing replaced stream failed");
                }
            }
            return table.set(fd, Stream::Single(channel), true);
        }

        match previous {
            Some(stream) if owned => {
                if access.read && access.write {
                    return Err(ConfigError::ReadWriteMultios(fd));
                }
                let multi = match stream {
                    Stream::Multi(multi) => multi,
                    Stream::Single(first) => {
                        debug!(fd, "promoting descriptor to multios");
                        Arc::new(MultiChannel::wrap(first, true, self.gate.clone()))
                    }
                };
                multi.add_channel(channel, true);
                table.set(fd, Stream::Multi(multi), true)
            }
            _ => table.set(fd, Stream::Single(channel), true),
        }
    }

    /// `fd>&source`: make `fd` refer to the stream at `source`. The copy is
    /// not owned; the descriptor that opened the stream keeps ownership.
    pub fn duplicate(
        &self,
        table: &mut StreamTable,
        fd: usize,
        source: usize,
    ) -> Result<(), ConfigError> {
        table.check_fd(fd)?;
        let stream = table.require(source)?.clone();
        if fd == source {
            return Ok(());
        }
        if table.is_owned(fd) {
            if let Some(previous) = table.get(fd) {
                if let Err(e) = previous.close() {
                    debug!(fd, error = %e, "closing duplicated-over stream failed");
                }
            }
        }
        debug!(fd, source, "duplicate descriptor");
        table.set(fd, stream, false)
    }

    fn resolve(&self, target: &str) -> PathBuf {
        self.cwd.join(target)
    }
}
