use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use tracing::warn;

use crate::channel::{same_channel, Channel};
use crate::job::JobControlGate;

#[derive(Clone)]
struct Member {
    channel: Channel,
    owned: bool,
}

/// Fans writes out to every member and reads members one after another.
pub struct MultiChannel {
    members: RwLock<Vec<Member>>,
    cursor: AtomicUsize,
    open: AtomicBool,
    gate: Arc<JobControlGate>,
}

impl MultiChannel {
    pub fn new(gate: Arc<JobControlGate>) -> Self {
        MultiChannel {
            members: RwLock::new(Vec::new()),
            cursor: AtomicUsize::new(0),
            open: AtomicBool::new(true),
            gate,
        }
    }

    /// A multiplexer around a single channel.
    pub fn wrap(channel: Channel, owned: bool, gate: Arc<JobControlGate>) -> Self {
        let multi = Self::new(gate);
        multi.add_channel(channel, owned);
        multi
    }

    /// Append a member. Only `owned` members are closed with the multiplexer.
    pub fn add_channel(&self, channel: Channel, owned: bool) {
        self.write_members().push(Member { channel, owned });
    }

    pub fn len(&self) -> usize {
        self.read_members().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn channels(&self) -> Vec<Channel> {
        self.read_members()
            .iter()
            .map(|m| m.channel.clone())
            .collect()
    }

    pub fn contains(&self, channel: &Channel) -> bool {
        self.read_members()
            .iter()
            .any(|m| same_channel(&m.channel, channel))
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub fn is_readable(&self) -> bool {
        let members = self.read_members();
        !members.is_empty() && members.iter().all(|m| m.channel.is_readable())
    }

    pub fn is_writable(&self) -> bool {
        let members = self.read_members();
        !members.is_empty() && members.iter().all(|m| m.channel.is_writable())
    }

    /// Read from the current member, moving on at each end of stream.
    /// Returns `Ok(0)` only once every member is exhausted.
    pub fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            let index = self.cursor.load(Ordering::Acquire);
            let Some(channel) = self.member_at(index) else {
                return Ok(0);
            };
            self.gate.check(&channel)?;
            let n = channel.read(buf)?;
            if n > 0 {
                return Ok(n);
            }
            // Another reader may already have advanced past this member.
            let _ = self.cursor.compare_exchange(
                index,
                index + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }
    }

    /// Write the whole buffer to every member. Partial writes never surface
    /// to the caller.
    pub fn write(&self, buf: &[u8]) -> io::Result<usize> {
        let channels = self.channels();
        if channels.is_empty() {
            return Ok(0);
        }
        for channel in &channels {
            self.gate.check(channel)?;
            let mut written = 0;
            while written < buf.len() {
                match channel.write(&buf[written..])? {
                    0 => {
                        return Err(io::Error::new(
                            io::ErrorKind::WriteZero,
                            format!("{} accepted no bytes", channel.name()),
                        ))
                    }
                    n => written += n,
                }
            }
        }
        Ok(buf.len())
    }

    pub fn flush(&self) -> io::Result<()> {
        for channel in self.channels() {
            channel.flush()?;
        }
        Ok(())
    }

    /// Close owned members. Only the first call has any effect; a failing
    /// member does not stop the others from being closed.
    pub fn close(&self) -> io::Result<()> {
        if self
            .open
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }
        let mut first_error = None;
        for member in self.read_members().iter().filter(|m| m.owned) {
            if let Err(e) = member.channel.close() {
                warn!(channel = %member.channel.name(), error = %e, "close failed");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn member_at(&self, index: usize) -> Option<Channel> {
        self.read_members().get(index).map(|m| m.channel.clone())
    }

    fn read_members(&self) -> std::sync::RwLockReadGuard<'_, Vec<Member>> {
        self.members
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write_members(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Member>> {
        self.members
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl fmt::Display for MultiChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.read_members().iter().map(|m| m.channel.name()).collect();
        write!(f, "multi[{}]", names.join(", "))
    }
}

/// One entry of a stream table: a plain channel or a multiplexer.
#[derive(Clone)]
pub enum Stream {
    Single(Channel),
    Multi(Arc<MultiChannel>),
}

impl Stream {
    pub fn is_multi(&self) -> bool {
        matches!(self, Stream::Multi(_))
    }

    pub fn is_readable(&self) -> bool {
        match self {
            Stream::Single(ch) => ch.is_readable(),
            Stream::Multi(m) => m.is_readable(),
        }
    }

    pub fn is_writable(&self) -> bool {
        match self {
            Stream::Single(ch) => ch.is_writable(),
            Stream::Multi(m) => m.is_writable(),
        }
    }

    pub fn is_open(&self) -> bool {
        match self {
            Stream::Single(ch) => ch.is_open(),
            Stream::Multi(m) => m.is_open(),
        }
    }

    pub fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Single(ch) => ch.read(buf),
            Stream::Multi(m) => m.read(buf),
        }
    }

    pub fn write(&self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Stream::Single(ch) => ch.write(buf),
            Stream::Multi(m) => m.write(buf),
        }
    }

    pub fn write_all(&self, mut buf: &[u8]) -> io::Result<()> {
        while !buf.is_empty() {
            match self.write(buf)? {
                0 => return Err(io::ErrorKind::WriteZero.into()),
                n => buf = &buf[n..],
            }
        }
        Ok(())
    }

    pub fn flush(&self) -> io::Result<()> {
        match self {
            Stream::Single(ch) => ch.flush(),
            Stream::Multi(m) => m.flush(),
        }
    }

    pub fn close(&self) -> io::Result<()> {
        match self {
            Stream::Single(ch) => ch.close(),
            Stream::Multi(m) => m.close(),
        }
    }

    /// Whether two entries refer to the same underlying object.
    pub fn same_as(&self, other: &Stream) -> bool {
        match (self, other) {
            (Stream::Single(a), Stream::Single(b)) => same_channel(a, b),
            (Stream::Multi(a), Stream::Multi(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<Channel> for Stream {
    fn from(channel: Channel) -> Self {
        Stream::Single(channel)
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stream::Single(ch) => f.write_str(&ch.name()),
            Stream::Multi(m) => write!(f, "{m}"),
        }
    }
}
