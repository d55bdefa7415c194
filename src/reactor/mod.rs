//! Readiness multiplexing and operation dispatch.
//!
//! The reactor converts OS-level readiness notifications into
//! [`Operation`] executions on a bounded worker pool:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          Reactor                             │
//! │  ┌────────────┐  ┌────────────┐        ┌─────────────────┐   │
//! │  │ Selector 0 │  │ Selector 1 │  ...   │   WorkerPool    │   │
//! │  │ poll loop  │  │ poll loop  │ ─────▶ │ Operation::run  │   │
//! │  │ (fd,kind)→ │  │ (fd,kind)→ │ ready  │ (bounded, OS    │   │
//! │  │  Operation │  │  Operation │        │  threads)       │   │
//! │  └────────────┘  └────────────┘        └─────────────────┘   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each selector owns one poller and one registration table; a channel's
//! registrations always land on the same selector (chosen by descriptor
//! rotation), which is what makes the one-operation-per-`(channel,
//! interest)` invariant enforceable with a single table lock.
//!
//! Dispatch is oneshot: readiness removes the registration and the
//! operation must call [`Reactor::process`] again if it expects further
//! I/O. That is deliberate — it is what lets a pipeline read now and
//! write next without the reactor guessing its protocol.

mod interest;
mod operation;
mod poller;
mod pool;
mod selector;
mod source;

pub use interest::{Interest, InterestKind};
pub use operation::{Operation, RegState};
pub use pool::{WorkerPool, WorkerPoolHandle, WorkerPoolOptions};
pub use source::Source;

use crate::config::CoreConfig;
use crate::error::Result;
use crate::schedule::Scheduler;
use selector::Selector;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::Duration;

/// The readiness multiplexer.
///
/// Owns a small fixed set of selector threads, the worker pool they
/// dispatch into, and a scheduler for timeout-bounded registrations.
pub struct Reactor {
    selectors: Vec<Arc<Selector>>,
    pool: WorkerPool,
    scheduler: Arc<Scheduler>,
}

impl Reactor {
    /// Builds a reactor from the configured thread counts.
    pub fn new(config: &CoreConfig) -> Result<Self> {
        let pool = WorkerPool::with_options(
            config.worker_min,
            config.worker_max,
            WorkerPoolOptions {
                idle_timeout: config.worker_idle,
                ..WorkerPoolOptions::default()
            },
        );

        let mut selectors = Vec::with_capacity(config.selectors);
        for index in 0..config.selectors.max(1) {
            let name = format!("spindle-selector-{index}");
            selectors.push(Arc::new(Selector::start(name, pool.handle())?));
        }

        Ok(Self {
            selectors,
            pool,
            scheduler: Arc::new(Scheduler::start("spindle-timer".to_string())),
        })
    }

    fn selector_for(&self, fd: RawFd) -> &Arc<Selector> {
        let index = usize::try_from(fd).unwrap_or(0) % self.selectors.len();
        &self.selectors[index]
    }

    /// Registers an operation for its natural interest.
    ///
    /// A raw descriptor carries no channel type to infer accept or
    /// connect from, so the operation declares its own interest through
    /// [`Operation::interest`].
    pub fn process(&self, operation: Arc<dyn Operation>) -> Result<()> {
        let interest = operation.interest();
        self.process_with(operation, interest)
    }

    /// Registers an operation for an explicit interest mask.
    ///
    /// Fails with [`CoreError::ChannelClosed`](crate::CoreError) if the
    /// channel is already closed. An empty mask is a no-op.
    pub fn process_with(&self, operation: Arc<dyn Operation>, interest: Interest) -> Result<()> {
        if interest.is_empty() {
            return Ok(());
        }
        self.selector_for(operation.channel())
            .register(&operation, interest)
    }

    /// Registers an operation and schedules its cancellation if
    /// readiness has not dispatched it within `timeout`.
    ///
    /// The scheduled cancellation is identity-checked: if a different
    /// operation owns the slot by then, it is left alone.
    pub fn process_timeout(
        &self,
        operation: Arc<dyn Operation>,
        interest: Interest,
        timeout: Duration,
    ) -> Result<()> {
        self.process_with(Arc::clone(&operation), interest)?;

        let selector = Arc::clone(self.selector_for(operation.channel()));
        let fd = operation.channel();
        self.scheduler.schedule(
            move || {
                for kind in interest.kinds() {
                    selector.cancel_if_current(fd, kind, &operation);
                }
            },
            timeout,
        )?;
        Ok(())
    }

    /// Cancels every registration for a channel and invokes each live
    /// operation's `cancel`.
    ///
    /// This is the cancellation primitive behind both external close and
    /// lease expiry; calling it for an unknown channel is a no-op.
    pub fn cancel_channel(&self, fd: RawFd) {
        self.selector_for(fd).cancel_channel(fd);
    }

    /// Number of channels with at least one live registration.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.selectors.iter().map(|s| s.channel_count()).sum()
    }

    /// A cloneable handle to the worker pool, for collaborators that
    /// want to run work off the polling threads.
    #[must_use]
    pub fn pool_handle(&self) -> WorkerPoolHandle {
        self.pool.handle()
    }

    /// Stops selectors, the scheduler, and the worker pool. Pending
    /// dispatches drain; nothing new is accepted.
    pub fn shutdown(&self) {
        for selector in &self.selectors {
            selector.stop();
        }
        self.scheduler.stop();
        let _ = self.pool.shutdown_and_wait(Duration::from_secs(5));
    }
}

impl std::fmt::Debug for Reactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reactor")
            .field("selectors", &self.selectors.len())
            .field("channels", &self.channel_count())
            .finish_non_exhaustive()
    }
}
