//! Operations and the per-slot registration state machine.
//!
//! An [`Operation`] is a unit of work bound to one channel and one
//! interest kind. The reactor does not allocate anything per readiness
//! cycle: the same `Arc<dyn Operation>` is dispatched, runs on a worker
//! thread, and may re-register itself for the same or a different
//! interest on the same channel.
//!
//! # Registration state machine
//!
//! Each `(channel, interest-kind)` slot moves through an explicit state
//! machine rather than relying on object identity and mutable
//! re-registration:
//!
//! ```text
//!                 register                readiness
//!  Unregistered ──────────▶ Registered ──────────▶ Dispatched
//!       ▲                       │  ▲                   │
//!       │        cancel/close   │  │   re-register     │
//!       └───────────────────────┘  └───────────────────┘
//! ```
//!
//! While a slot is `Dispatched` (its operation is executing on a worker
//! thread), a new registration for the same slot parks as *pending* and
//! is promoted to `Registered` only when the dispatched run completes.
//! This is what guarantees that two operations never execute concurrently
//! for one `(channel, interest)` pair, no matter how much registration
//! churn happens while one of them is running.

use super::Interest;
use crate::error::{CoreError, Result};
use std::os::unix::io::RawFd;

/// A unit of work bound to one channel and one interest kind.
///
/// Implemented by connection pipelines outside this crate. Operations are
/// shared as `Arc<dyn Operation>`; `run` executes on a worker thread and
/// `cancel` may be called from any thread, including concurrently with
/// `run`.
pub trait Operation: Send + Sync {
    /// The channel this operation is bound to.
    fn channel(&self) -> RawFd;

    /// The operation's natural interest, used by
    /// [`Reactor::process`](super::Reactor::process). A raw descriptor
    /// carries no channel type, so the operation itself declares whether
    /// it accepts, connects, reads, or writes.
    fn interest(&self) -> Interest;

    /// Executes one readiness cycle. Runs on a worker thread; must not
    /// block on other operations' completion.
    fn run(&self);

    /// Requests cancellation. Must be safe to call while `run` is
    /// executing, must not block, and must not panic. After `cancel`
    /// the operation is never dispatched again unless re-registered.
    fn cancel(&self);
}

/// State of one `(channel, interest-kind)` registration slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegState {
    /// No operation occupies the slot.
    Unregistered,
    /// An operation is armed with the poller and awaiting readiness.
    Registered,
    /// Readiness fired; the operation is executing on a worker thread.
    Dispatched,
    /// The slot was cancelled; a dispatched run may still be finishing.
    Cancelled,
    /// The channel was closed; the slot is defunct.
    Closed,
}

impl RegState {
    /// Short name used in errors and logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Unregistered => "unregistered",
            Self::Registered => "registered",
            Self::Dispatched => "dispatched",
            Self::Cancelled => "cancelled",
            Self::Closed => "closed",
        }
    }

    /// The transition table.
    ///
    /// `Registered -> Registered` is re-registration (supersession) and
    /// `Dispatched -> Registered` is the completion of a dispatched run
    /// promoting a pending registration.
    #[must_use]
    pub const fn can_transition(self, next: RegState) -> bool {
        matches!(
            (self, next),
            (Self::Unregistered, Self::Registered)
                | (Self::Registered, Self::Registered)
                | (Self::Registered, Self::Dispatched)
                | (Self::Registered, Self::Cancelled)
                | (Self::Registered, Self::Closed)
                | (Self::Dispatched, Self::Registered)
                | (Self::Dispatched, Self::Dispatched)
                | (Self::Dispatched, Self::Cancelled)
                | (Self::Dispatched, Self::Closed)
                | (Self::Dispatched, Self::Unregistered)
                | (Self::Cancelled, Self::Unregistered)
                | (Self::Closed, Self::Unregistered)
        )
    }

    /// Checked transition, surfacing the table as an error.
    pub fn advance(self, next: RegState) -> Result<RegState> {
        if self.can_transition(next) {
            Ok(next)
        } else {
            Err(CoreError::InvalidStateTransition {
                from: self.name(),
                to: next.name(),
            })
        }
    }
}
