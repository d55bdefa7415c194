//! Error taxonomy for the server core.
//!
//! Failures local to one connection, buffer, or contract are isolated to
//! that resource and reported synchronously to its immediate owner; they
//! never abort the shared polling threads, the worker pool, or the reaper.
//! Resource exhaustion (disk, threads) is the one class that may degrade
//! service broadly, and it is surfaced loudly rather than retried forever.
//!
//! Two conditions deliberately do *not* appear here:
//!
//! - A channel closed underneath an in-flight registration is not an
//!   error. Readiness fires, the next read returns zero bytes, and the
//!   pipeline treats that as normal end-of-stream.
//! - A cleaner callback that panics is caught and logged by the reaper;
//!   it is never propagated.

use std::io;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors surfaced by the reactor, buffer, and lease subsystems.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A buffer append would exceed the configured maximum capacity.
    ///
    /// The buffer's length is unchanged after this failure; bytes are
    /// never partially appended and never silently dropped.
    #[error("capacity exceeded: append would grow buffer to {requested} bytes (maximum {maximum})")]
    CapacityExceeded {
        /// Length the buffer would have reached.
        requested: usize,
        /// Configured maximum capacity.
        maximum: usize,
    },

    /// A contract was renewed after the reaper already collected it.
    ///
    /// Distinguishable from [`CoreError::ContractNotFound`]: the contract
    /// existed and expired, as opposed to never belonging to the manager.
    #[error("contract {0} already collected")]
    ContractExpired(u64),

    /// The contract does not belong to this manager, or was cancelled and
    /// is no longer tracked.
    #[error("contract {0} not found")]
    ContractNotFound(u64),

    /// The channel was already closed when registration was attempted.
    #[error("channel {0} closed")]
    ChannelClosed(i32),

    /// Creating or writing a disk-backed overflow file failed.
    ///
    /// The partially-written file has been removed; the buffer's length
    /// is unchanged.
    #[error("disk allocation failed: {source}")]
    DiskAllocation {
        /// Underlying I/O failure.
        source: io::Error,
    },

    /// A registration slot was driven through an illegal state change.
    #[error("invalid registration transition: {from} -> {to}")]
    InvalidStateTransition {
        /// State the slot was in.
        from: &'static str,
        /// State the caller asked for.
        to: &'static str,
    },

    /// The component has been shut down and accepts no further work.
    #[error("{0} is shut down")]
    Shutdown(&'static str),

    /// An I/O failure outside the disk-buffer path (poller setup,
    /// thread spawn, read-back).
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl CoreError {
    /// True for capacity-exceeded failures.
    #[must_use]
    pub const fn is_capacity(&self) -> bool {
        matches!(self, Self::CapacityExceeded { .. })
    }

    /// True for disk-allocation failures.
    #[must_use]
    pub const fn is_disk(&self) -> bool {
        matches!(self, Self::DiskAllocation { .. })
    }

    /// True when the failure indicates the peer or owner already closed
    /// the channel.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::ChannelClosed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_message_names_both_sizes() {
        let err = CoreError::CapacityExceeded {
            requested: 10,
            maximum: 4,
        };
        let text = err.to_string();
        assert!(text.contains("10"));
        assert!(text.contains('4'));
        assert!(err.is_capacity());
    }

    #[test]
    fn expired_and_not_found_are_distinct() {
        let expired = CoreError::ContractExpired(7);
        let missing = CoreError::ContractNotFound(7);
        assert_ne!(expired.to_string(), missing.to_string());
    }

    #[test]
    fn disk_failures_are_distinct_from_plain_io() {
        let disk = CoreError::DiskAllocation {
            source: io::Error::new(io::ErrorKind::Other, "no space"),
        };
        assert!(disk.is_disk());

        let plain = CoreError::from(io::Error::new(io::ErrorKind::Other, "spawn failed"));
        assert!(!plain.is_disk());
    }
}
