//! Source trait for registerable channels.
//!
//! Any I/O object that exposes a raw file descriptor can be registered
//! with the reactor. The descriptor must remain valid for the duration of
//! the registration, must not be registered with two reactors at once,
//! and must be in non-blocking mode — the selector threads never wait on
//! a channel, only on the poll call itself.

use std::os::unix::io::{AsRawFd, RawFd};

/// A channel that can be registered with the reactor.
///
/// Blanket-implemented for every `AsRawFd + Send + Sync` type, so
/// `TcpListener`, `TcpStream`, and `UnixStream` register directly.
pub trait Source: AsRawFd + Send + Sync {
    /// Returns the raw file descriptor for this channel.
    fn raw_fd(&self) -> RawFd {
        self.as_raw_fd()
    }
}

impl<T: AsRawFd + Send + Sync> Source for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream;

    fn accepts_source<T: Source>(_: &T) {}

    #[test]
    fn unix_stream_implements_source() {
        let (sock, _other) = UnixStream::pair().expect("failed to create unix stream pair");
        accepts_source(&sock);
        assert!(sock.raw_fd() >= 0);
    }

    #[test]
    fn source_as_trait_object() {
        let (sock, _other) = UnixStream::pair().expect("failed to create unix stream pair");
        let expected = sock.as_raw_fd();
        let source: &dyn Source = &sock;
        assert_eq!(source.raw_fd(), expected);
    }
}
