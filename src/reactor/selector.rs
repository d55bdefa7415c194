//! One polling thread and its registration table.
//!
//! A selector owns one OS poller and the table mapping
//! `(channel, interest-kind)` to its registration slot. The polling
//! thread blocks only inside the poll call; everything that becomes
//! ready is disarmed (oneshot) and handed to the worker pool, and
//! nothing is re-armed until the operation explicitly registers again
//! or a pending supersession is promoted.
//!
//! Error isolation: a failure touching one descriptor removes that
//! descriptor's registrations and is logged; the poll loop itself never
//! exits on a per-channel error, because one selector serves many
//! unrelated channels.

use super::poller::{Poller, Readiness};
use super::pool::WorkerPoolHandle;
use super::{Interest, InterestKind, Operation, RegState};
use crate::error::{CoreError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How long one poll call may block before rechecking the shutdown flag.
const POLL_TICK: Duration = Duration::from_millis(500);

/// One registration slot: the live occupant of a `(channel, kind)` pair.
enum Slot {
    /// Nothing registered.
    Vacant,
    /// Armed and waiting for readiness.
    Registered(Arc<dyn Operation>),
    /// Executing on a worker thread. A registration arriving now parks
    /// in `pending` and is promoted when the run completes; `cancelled`
    /// marks a slot whose completion must discard everything.
    Dispatched {
        current: Arc<dyn Operation>,
        pending: Option<Arc<dyn Operation>>,
        cancelled: bool,
    },
}

impl Slot {
    fn state(&self) -> RegState {
        match self {
            Self::Vacant => RegState::Unregistered,
            Self::Registered(_) => RegState::Registered,
            Self::Dispatched {
                cancelled: false, ..
            } => RegState::Dispatched,
            Self::Dispatched {
                cancelled: true, ..
            } => RegState::Cancelled,
        }
    }
}

/// Per-channel slot group plus poller bookkeeping.
struct ChannelSlots {
    slots: [Slot; 4],
    /// Whether the fd has been added to the poller.
    added: bool,
}

impl ChannelSlots {
    fn new() -> Self {
        Self {
            slots: [Slot::Vacant, Slot::Vacant, Slot::Vacant, Slot::Vacant],
            added: false,
        }
    }

    /// Union of interest kinds currently armed (registered, not
    /// dispatched — dispatched slots are disarmed by oneshot delivery).
    fn armed(&self) -> Interest {
        let mut interest = Interest::NONE;
        for kind in InterestKind::ALL {
            if matches!(self.slots[kind.index()], Slot::Registered(_)) {
                interest = interest.add(kind.interest());
            }
        }
        interest
    }

    fn is_empty(&self) -> bool {
        self.slots.iter().all(|s| matches!(s, Slot::Vacant))
    }
}

struct SelectorShared {
    poller: Poller,
    table: Mutex<HashMap<RawFd, ChannelSlots>>,
    shutdown: AtomicBool,
}

/// A selector: one polling thread, one poller, one registration table.
pub(crate) struct Selector {
    shared: Arc<SelectorShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Selector {
    pub(crate) fn start(name: String, pool: WorkerPoolHandle) -> Result<Self> {
        let shared = Arc::new(SelectorShared {
            poller: Poller::new()?,
            table: Mutex::new(HashMap::new()),
            shutdown: AtomicBool::new(false),
        });

        let loop_shared = Arc::clone(&shared);
        let loop_pool = pool;
        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || poll_loop(&loop_shared, &loop_pool))
            .map_err(|e| {
                tracing::error!(error = %e, "failed to spawn selector thread");
                CoreError::from(e)
            })?;

        Ok(Self {
            shared,
            thread: Mutex::new(Some(handle)),
        })
    }

    /// Registers `operation` for every kind in `interest`.
    ///
    /// At most one operation occupies a `(channel, kind)` slot:
    /// registering over a `Registered` slot supersedes it atomically,
    /// and registering over a `Dispatched` slot parks the newcomer until
    /// the in-flight run completes.
    pub(crate) fn register(&self, operation: &Arc<dyn Operation>, interest: Interest) -> Result<()> {
        if self.shared.shutdown.load(Ordering::Acquire) {
            return Err(CoreError::Shutdown("reactor"));
        }
        let fd = operation.channel();
        let mut table = self.shared.table.lock();
        let entry = table.entry(fd).or_insert_with(ChannelSlots::new);

        for kind in interest.kinds() {
            let slot = &mut entry.slots[kind.index()];
            let state = slot.state();
            match slot {
                Slot::Vacant | Slot::Registered(_) => {
                    state.advance(RegState::Registered)?;
                    *slot = Slot::Registered(Arc::clone(operation));
                }
                Slot::Dispatched {
                    pending,
                    cancelled: false,
                    ..
                } => {
                    state.advance(RegState::Dispatched)?;
                    *pending = Some(Arc::clone(operation));
                }
                Slot::Dispatched {
                    cancelled: true, ..
                } => {
                    return Err(CoreError::ChannelClosed(fd));
                }
            }
        }

        let armed = entry.armed();
        let arm_result = if entry.added {
            self.shared.poller.rearm(fd, armed)
        } else {
            let r = self.shared.poller.arm(fd, armed);
            if r.is_ok() {
                entry.added = true;
            }
            r
        };

        if let Err(err) = arm_result {
            // The channel died under us; drop everything we hold for it.
            table.remove(&fd);
            return Err(err);
        }
        Ok(())
    }

    /// Cancels every registration for `fd` and invokes each live
    /// operation's `cancel` outside the table lock.
    pub(crate) fn cancel_channel(&self, fd: RawFd) {
        let victims = {
            let mut table = self.shared.table.lock();
            let Some(entry) = table.get_mut(&fd) else {
                return;
            };

            let mut victims: Vec<Arc<dyn Operation>> = Vec::new();
            for kind in InterestKind::ALL {
                let slot = &mut entry.slots[kind.index()];
                match std::mem::replace(slot, Slot::Vacant) {
                    Slot::Vacant => {}
                    Slot::Registered(op) => victims.push(op),
                    Slot::Dispatched {
                        current,
                        cancelled: false,
                        ..
                    } => {
                        victims.push(Arc::clone(&current));
                        // The run is still in flight; completion sweeps
                        // the slot once it returns.
                        *slot = Slot::Dispatched {
                            current,
                            pending: None,
                            cancelled: true,
                        };
                    }
                    dispatched @ Slot::Dispatched { .. } => *slot = dispatched,
                }
            }

            if entry.is_empty() {
                if entry.added {
                    let _ = self.shared.poller.disarm(fd);
                }
                table.remove(&fd);
            } else if entry.added {
                let _ = self.shared.poller.rearm(fd, Interest::NONE);
            }
            victims
        };

        for op in victims {
            op.cancel();
        }
    }

    /// Cancels the registration for `(fd, kind)` only if `target` is
    /// still its occupant. Backs timeout-bounded registrations: by the
    /// time the timeout fires, a different operation may own the slot,
    /// and that one must be left alone.
    pub(crate) fn cancel_if_current(
        &self,
        fd: RawFd,
        kind: InterestKind,
        target: &Arc<dyn Operation>,
    ) {
        let victim = {
            let mut table = self.shared.table.lock();
            let Some(entry) = table.get_mut(&fd) else {
                return;
            };
            let slot = &mut entry.slots[kind.index()];
            let victim = match slot {
                Slot::Registered(op) if Arc::ptr_eq(op, target) => {
                    let op = Arc::clone(op);
                    *slot = Slot::Vacant;
                    Some(op)
                }
                Slot::Dispatched {
                    current,
                    pending,
                    cancelled: cancelled @ false,
                } if Arc::ptr_eq(current, target) => {
                    *cancelled = true;
                    *pending = None;
                    Some(Arc::clone(current))
                }
                _ => None,
            };

            if victim.is_some() {
                if entry.is_empty() {
                    if entry.added {
                        let _ = self.shared.poller.disarm(fd);
                    }
                    table.remove(&fd);
                } else if entry.added {
                    let _ = self.shared.poller.rearm(fd, entry.armed());
                }
            }
            victim
        };

        if let Some(op) = victim {
            op.cancel();
        }
    }

    /// Number of channels with at least one live registration.
    pub(crate) fn channel_count(&self) -> usize {
        self.shared.table.lock().len()
    }

    /// Stops the polling thread and joins it.
    pub(crate) fn stop(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        let _ = self.shared.poller.wake();
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
    }

}

impl Drop for Selector {
    fn drop(&mut self) {
        self.stop();
    }
}

fn poll_loop(shared: &Arc<SelectorShared>, pool: &WorkerPoolHandle) {
    let mut events = Vec::with_capacity(256);
    while !shared.shutdown.load(Ordering::Acquire) {
        match shared.poller.poll(&mut events, Some(POLL_TICK)) {
            Ok(0) => continue,
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                // One bad poll call must not kill the loop; every other
                // channel on this selector is unrelated to the failure.
                tracing::error!(error = %e, "selector poll failed");
                continue;
            }
        }
        for event in &events {
            dispatch_ready(shared, pool, Poller::readiness(event));
        }
    }
}

fn dispatch_ready(shared: &Arc<SelectorShared>, pool: &WorkerPoolHandle, ready: Readiness) {
    let mut runnable: Vec<(InterestKind, Arc<dyn Operation>)> = Vec::new();
    {
        let mut table = shared.table.lock();
        let Some(entry) = table.get_mut(&ready.fd) else {
            // Stale event for a channel cancelled since the poll call.
            return;
        };

        for kind in InterestKind::ALL {
            let fired = if kind.is_input() {
                ready.readable
            } else {
                ready.writable
            };
            if !fired {
                continue;
            }
            let slot = &mut entry.slots[kind.index()];
            if let Slot::Registered(op) = slot {
                let op = Arc::clone(op);
                match slot.state().advance(RegState::Dispatched) {
                    Ok(_) => {
                        *slot = Slot::Dispatched {
                            current: Arc::clone(&op),
                            pending: None,
                            cancelled: false,
                        };
                        runnable.push((kind, op));
                    }
                    Err(err) => {
                        tracing::warn!(fd = ready.fd, kind = %kind, error = %err, "dispatch skipped");
                    }
                }
            }
        }

        // Oneshot delivery disarmed the whole descriptor; re-arm any
        // kinds that are still registered (e.g. a write operation while
        // a read operation dispatches).
        let armed = entry.armed();
        if !armed.is_empty() {
            if let Err(err) = shared.poller.rearm(ready.fd, armed) {
                tracing::warn!(fd = ready.fd, error = %err, "re-arm failed, dropping channel");
                drop_channel(&mut table, shared, ready.fd);
            }
        }
    }

    for (kind, op) in runnable {
        let complete_shared = Arc::clone(shared);
        let fd = ready.fd;
        let run_op = Arc::clone(&op);
        pool.submit(move || {
            run_op.run();
            complete_dispatch(&complete_shared, fd, kind);
        });
    }
}

/// Sweeps a dispatched slot after its run returned.
fn complete_dispatch(shared: &Arc<SelectorShared>, fd: RawFd, kind: InterestKind) {
    let mut table = shared.table.lock();
    let Some(entry) = table.get_mut(&fd) else {
        return;
    };
    let slot = &mut entry.slots[kind.index()];

    match std::mem::replace(slot, Slot::Vacant) {
        Slot::Dispatched {
            pending: Some(next),
            cancelled: false,
            ..
        } => {
            // Promotion: the parked supersession becomes live only now,
            // after the prior run finished — never concurrently with it.
            *slot = Slot::Registered(next);
        }
        Slot::Dispatched { .. } => {
            // Completed with no successor, or cancelled: slot empties.
        }
        other => {
            // A registration raced ahead of completion; restore it.
            *slot = other;
            return;
        }
    }

    if entry.is_empty() {
        if entry.added {
            let _ = shared.poller.disarm(fd);
        }
        table.remove(&fd);
    } else {
        let armed = entry.armed();
        if !armed.is_empty() && entry.added {
            if let Err(err) = shared.poller.rearm(fd, armed) {
                tracing::warn!(fd, error = %err, "re-arm after completion failed, dropping channel");
                drop_channel(&mut table, shared, fd);
            }
        }
    }
}

fn drop_channel(
    table: &mut HashMap<RawFd, ChannelSlots>,
    shared: &Arc<SelectorShared>,
    fd: RawFd,
) {
    if let Some(entry) = table.remove(&fd) {
        if entry.added {
            let _ = shared.poller.disarm(fd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactor::pool::WorkerPool;
    use std::io::Write;
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;
    use std::sync::atomic::AtomicUsize;

    struct CountingOp {
        fd: RawFd,
        interest: Interest,
        runs: AtomicUsize,
        cancels: AtomicUsize,
    }

    impl CountingOp {
        fn new(fd: RawFd, interest: Interest) -> Arc<Self> {
            Arc::new(Self {
                fd,
                interest,
                runs: AtomicUsize::new(0),
                cancels: AtomicUsize::new(0),
            })
        }
    }

    impl Operation for CountingOp {
        fn channel(&self) -> RawFd {
            self.fd
        }
        fn interest(&self) -> Interest {
            self.interest
        }
        fn run(&self) {
            self.runs.fetch_add(1, Ordering::SeqCst);
        }
        fn cancel(&self) {
            self.cancels.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn wait_for(cond: impl Fn() -> bool, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        while std::time::Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    fn selector_and_pool() -> (Selector, WorkerPool) {
        let pool = WorkerPool::new(1, 4);
        let selector =
            Selector::start("test-selector".to_string(), pool.handle()).expect("selector start");
        (selector, pool)
    }

    #[test]
    fn readable_socket_dispatches_once() {
        let (selector, _pool) = selector_and_pool();
        let (reader, mut writer) = UnixStream::pair().expect("socketpair");
        reader.set_nonblocking(true).expect("nonblocking");

        let counting = CountingOp::new(reader.as_raw_fd(), Interest::READ);
        let op: Arc<dyn Operation> = Arc::clone(&counting) as Arc<dyn Operation>;
        selector.register(&op, Interest::READ).expect("register");

        writer.write_all(b"x").expect("write");
        assert!(wait_for(
            || counting.runs.load(Ordering::SeqCst) == 1,
            Duration::from_secs(2)
        ));

        // Oneshot: the slot emptied, so more bytes do not re-dispatch
        // without an explicit re-registration.
        writer.write_all(b"y").expect("write");
        thread::sleep(Duration::from_millis(100));
        assert_eq!(counting.runs.load(Ordering::SeqCst), 1);
        selector.stop();
    }

    #[test]
    fn cancel_channel_invokes_cancel() {
        let (selector, _pool) = selector_and_pool();
        let (reader, _writer) = UnixStream::pair().expect("socketpair");
        reader.set_nonblocking(true).expect("nonblocking");

        let counting = CountingOp::new(reader.as_raw_fd(), Interest::READ);
        let op: Arc<dyn Operation> = Arc::clone(&counting) as Arc<dyn Operation>;
        selector.register(&op, Interest::READ).expect("register");
        assert_eq!(selector.channel_count(), 1);

        selector.cancel_channel(reader.as_raw_fd());
        assert_eq!(counting.cancels.load(Ordering::SeqCst), 1);
        assert_eq!(selector.channel_count(), 0);

        // Cancelling again is a no-op.
        selector.cancel_channel(reader.as_raw_fd());
        assert_eq!(counting.cancels.load(Ordering::SeqCst), 1);
        selector.stop();
    }

    #[test]
    fn register_on_dead_fd_fails_closed() {
        let (selector, _pool) = selector_and_pool();
        // A descriptor far above any open-files limit is never valid.
        let fd = 1_000_000;
        let op: Arc<dyn Operation> = CountingOp::new(fd, Interest::READ) as Arc<dyn Operation>;
        let err = selector
            .register(&op, Interest::READ)
            .expect_err("dead fd must not register");
        assert!(err.is_closed());
        assert_eq!(selector.channel_count(), 0);
        selector.stop();
    }

    #[test]
    fn registered_slot_supersedes() {
        let (selector, _pool) = selector_and_pool();
        let (reader, mut writer) = UnixStream::pair().expect("socketpair");
        reader.set_nonblocking(true).expect("nonblocking");
        let fd = reader.as_raw_fd();

        let first = CountingOp::new(fd, Interest::READ);
        let second = CountingOp::new(fd, Interest::READ);
        let first_dyn: Arc<dyn Operation> = Arc::clone(&first) as Arc<dyn Operation>;
        let second_dyn: Arc<dyn Operation> = Arc::clone(&second) as Arc<dyn Operation>;

        selector.register(&first_dyn, Interest::READ).expect("register first");
        selector
            .register(&second_dyn, Interest::READ)
            .expect("register second");

        writer.write_all(b"x").expect("write");
        assert!(wait_for(
            || second.runs.load(Ordering::SeqCst) == 1,
            Duration::from_secs(2)
        ));
        // The superseded operation never ran.
        assert_eq!(first.runs.load(Ordering::SeqCst), 0);
        selector.stop();
    }
}
