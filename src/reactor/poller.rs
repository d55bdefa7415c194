//! Thin wrapper over the OS readiness poller.
//!
//! Wraps [`polling::Poller`] in the oneshot discipline the selector
//! relies on: a delivered event disarms its descriptor, and the channel
//! stays quiet until the selector re-arms it with `rearm`. The wrapper
//! also owns the mapping between [`Interest`] masks and the poller's
//! readable/writable event flags — accept and read project to readable,
//! connect and write to writable.

use super::Interest;
use crate::error::{CoreError, Result};
use polling::{Event as PollEvent, Poller as OsPoller};
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// EBADF: the descriptor was closed before (or while) we touched it.
const ERR_BAD_FD: i32 = 9;

/// Readiness event surfaced to the selector.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Readiness {
    /// Descriptor the event belongs to.
    pub fd: RawFd,
    /// Readable side fired (accept/read interest kinds).
    pub readable: bool,
    /// Writable side fired (connect/write interest kinds).
    pub writable: bool,
}

/// Oneshot readiness poller for one selector thread.
pub(crate) struct Poller {
    os: OsPoller,
}

impl Poller {
    pub(crate) fn new() -> Result<Self> {
        Ok(Self {
            os: OsPoller::new().map_err(CoreError::from)?,
        })
    }

    fn event_for(fd: RawFd, interest: Interest) -> PollEvent {
        let key = usize::try_from(fd).unwrap_or(0);
        match (interest.wants_input(), interest.wants_output()) {
            (true, true) => PollEvent::all(key),
            (true, false) => PollEvent::readable(key),
            (false, true) => PollEvent::writable(key),
            (false, false) => PollEvent::none(key),
        }
    }

    /// Adds a descriptor with the given interest.
    ///
    /// A descriptor that is already closed registers as
    /// [`CoreError::ChannelClosed`]; other failures pass through as I/O
    /// errors.
    pub(crate) fn arm(&self, fd: RawFd, interest: Interest) -> Result<()> {
        self.os
            .add(fd, Self::event_for(fd, interest))
            .map_err(|e| Self::classify(fd, e))
    }

    /// Re-arms (or changes interest for) an already-added descriptor.
    pub(crate) fn rearm(&self, fd: RawFd, interest: Interest) -> Result<()> {
        self.os
            .modify(fd, Self::event_for(fd, interest))
            .map_err(|e| Self::classify(fd, e))
    }

    /// Removes a descriptor. Failure is returned but harmless to the
    /// caller if the fd is already closed: the kernel dropped it from
    /// the interest set when the last reference went away.
    pub(crate) fn disarm(&self, fd: RawFd) -> Result<()> {
        self.os.delete(fd).map_err(|e| Self::classify(fd, e))
    }

    /// Blocks up to `timeout` for readiness, appending into `events`.
    pub(crate) fn poll(
        &self,
        events: &mut Vec<PollEvent>,
        timeout: Option<Duration>,
    ) -> io::Result<usize> {
        events.clear();
        self.os.wait(events, timeout)
    }

    /// Wakes a blocked `poll` from another thread.
    pub(crate) fn wake(&self) -> io::Result<()> {
        self.os.notify()
    }

    pub(crate) fn readiness(event: &PollEvent) -> Readiness {
        #[allow(clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
        let fd = event.key as RawFd;
        Readiness {
            fd,
            readable: event.readable,
            writable: event.writable,
        }
    }

    fn classify(fd: RawFd, err: io::Error) -> CoreError {
        if err.raw_os_error() == Some(ERR_BAD_FD) {
            CoreError::ChannelClosed(fd)
        } else {
            CoreError::from(err)
        }
    }
}

impl std::fmt::Debug for Poller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Poller").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;

    #[test]
    fn interest_projection() {
        let ev = Poller::event_for(3, Interest::READ);
        assert!(ev.readable && !ev.writable);

        let ev = Poller::event_for(3, Interest::ACCEPT);
        assert!(ev.readable && !ev.writable);

        let ev = Poller::event_for(3, Interest::WRITE);
        assert!(!ev.readable && ev.writable);

        let ev = Poller::event_for(3, Interest::CONNECT.add(Interest::READ));
        assert!(ev.readable && ev.writable);
    }

    #[test]
    fn wake_unblocks_poll() {
        let poller = Poller::new().expect("failed to create poller");
        poller.wake().expect("wake failed");

        let mut events = Vec::with_capacity(4);
        let start = std::time::Instant::now();
        poller
            .poll(&mut events, Some(Duration::from_secs(5)))
            .expect("poll failed");
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn poll_timeout_with_no_events() {
        let poller = Poller::new().expect("failed to create poller");
        let mut events = Vec::with_capacity(4);
        let count = poller
            .poll(&mut events, Some(Duration::from_millis(30)))
            .expect("poll failed");
        assert_eq!(count, 0);
    }

    #[test]
    fn writable_socket_reports_readiness() {
        let poller = Poller::new().expect("failed to create poller");
        let (sock, _other) = UnixStream::pair().expect("failed to create unix stream pair");
        sock.set_nonblocking(true).expect("nonblocking");

        poller
            .arm(sock.as_raw_fd(), Interest::WRITE)
            .expect("arm failed");

        let mut events = Vec::with_capacity(4);
        let count = poller
            .poll(&mut events, Some(Duration::from_secs(2)))
            .expect("poll failed");
        assert!(count >= 1);

        let ready = Poller::readiness(&events[0]);
        assert_eq!(ready.fd, sock.as_raw_fd());
        assert!(ready.writable);

        poller.disarm(sock.as_raw_fd()).expect("disarm failed");
    }

    #[test]
    fn dead_fd_classified_as_channel_closed() {
        let poller = Poller::new().expect("failed to create poller");
        // A descriptor far above any open-files limit is never valid.
        let err = poller
            .arm(1_000_000, Interest::READ)
            .expect_err("arm must fail");
        assert!(err.is_closed(), "expected ChannelClosed, got {err}");
    }
}
