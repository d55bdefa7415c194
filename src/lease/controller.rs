//! The lease manager and its reaper thread.

use super::contract::{Contract, ContractState};
use super::{Cleaner, Lease};
use crate::error::{CoreError, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Process-wide counters for manager identity and contract identity.
static NEXT_MANAGER: AtomicU64 = AtomicU64::new(1);
static NEXT_CONTRACT: AtomicU64 = AtomicU64::new(1);

/// Contracts ordered by `(expiry, insertion seq)`: expiry ascending,
/// ties oldest-inserted-first. The key is kept in lockstep with the
/// contract's own expiry — both only change together under this
/// structure's lock, which is what makes renewal atomic with respect
/// to the reaper.
struct ContractQueue<T> {
    ordered: BTreeMap<(Instant, u64), Entry<T>>,
    next_seq: u64,
}

struct Entry<T> {
    contract: Contract,
    resource: T,
}

pub(crate) struct ManagerInner<T> {
    id: u64,
    queue: Mutex<ContractQueue<T>>,
    condvar: Condvar,
    cleaner: Arc<dyn Cleaner<T>>,
    shutdown: AtomicBool,
}

/// Tracks expiry contracts for many concurrently-live resources and
/// invokes the cleaner exactly once per collected contract.
///
/// Issuance is thread-safe from any number of connection-accepting
/// threads; collection happens on one dedicated reaper thread that
/// parks until the earliest deadline and wakes when an earlier one is
/// inserted.
pub struct LeaseManager<T: Send + 'static> {
    inner: Arc<ManagerInner<T>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Send + 'static> LeaseManager<T> {
    /// Starts a manager whose reaper hands collected resources to
    /// `cleaner`.
    #[must_use]
    pub fn start(cleaner: impl Cleaner<T> + 'static) -> Self {
        let inner = Arc::new(ManagerInner {
            id: NEXT_MANAGER.fetch_add(1, Ordering::Relaxed),
            queue: Mutex::new(ContractQueue {
                ordered: BTreeMap::new(),
                next_seq: 0,
            }),
            condvar: Condvar::new(),
            cleaner: Arc::new(cleaner),
            shutdown: AtomicBool::new(false),
        });

        let loop_inner = Arc::clone(&inner);
        let handle = thread::Builder::new()
            .name("spindle-reaper".to_string())
            .spawn(move || reaper_loop(&loop_inner))
            .expect("failed to spawn reaper thread");

        Self {
            inner,
            thread: Mutex::new(Some(handle)),
        }
    }

    /// Issues a lease expiring `duration` from now.
    pub fn issue(&self, resource: T, duration: Duration) -> Result<Lease<T>> {
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(CoreError::Shutdown("lease manager"));
        }
        let expiry = Instant::now() + duration;
        let contract = {
            let mut queue = self.inner.queue.lock();
            let seq = queue.next_seq;
            queue.next_seq += 1;
            let contract = Contract::new(
                NEXT_CONTRACT.fetch_add(1, Ordering::Relaxed),
                self.inner.id,
                seq,
                expiry,
            );
            let is_earliest = queue
                .ordered
                .first_key_value()
                .map_or(true, |((first, _), _)| expiry < *first);
            queue.ordered.insert(
                (expiry, seq),
                Entry {
                    contract: contract.clone(),
                    resource,
                },
            );
            if is_earliest {
                self.inner.condvar.notify_one();
            }
            contract
        };

        Ok(Lease {
            contract,
            inner: Arc::clone(&self.inner),
        })
    }

    /// Replaces the contract's expiry with `duration` from now and
    /// fixes its position in the collection order, atomically with
    /// respect to the reaper.
    pub fn renew(&self, contract: &Contract, duration: Duration) -> Result<()> {
        renew_on(&self.inner, contract, duration)
    }

    /// Removes the contract if still pending; a no-op after collection.
    pub fn cancel(&self, contract: &Contract) -> Result<()> {
        cancel_on(&self.inner, contract)
    }

    /// Number of pending contracts.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.queue.lock().ordered.len()
    }

    /// Stops the reaper. Pending contracts are dropped uncollected; a
    /// cleaner already running finishes. Idempotent.
    pub fn close(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        self.inner.condvar.notify_all();
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
    }
}

impl<T: Send + 'static> Drop for LeaseManager<T> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<T: Send + 'static> std::fmt::Debug for LeaseManager<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaseManager")
            .field("pending", &self.pending())
            .field("shutdown", &self.inner.shutdown.load(Ordering::Relaxed))
            .finish()
    }
}

pub(crate) fn renew_on<T>(
    inner: &Arc<ManagerInner<T>>,
    contract: &Contract,
    duration: Duration,
) -> Result<()> {
    if contract.inner.manager != inner.id {
        return Err(CoreError::ContractNotFound(contract.id().value()));
    }

    let mut queue = inner.queue.lock();
    match contract.state() {
        ContractState::Collected => {
            return Err(CoreError::ContractExpired(contract.id().value()));
        }
        ContractState::Cancelled => {
            return Err(CoreError::ContractNotFound(contract.id().value()));
        }
        ContractState::Pending => {}
    }

    let seq = contract.inner.seq;
    let old_key = (contract.expiry(), seq);
    let Some(entry) = queue.ordered.remove(&old_key) else {
        return Err(CoreError::ContractNotFound(contract.id().value()));
    };

    let expiry = Instant::now() + duration;
    contract.set_expiry(expiry);
    let is_earliest = queue
        .ordered
        .first_key_value()
        .map_or(true, |((first, _), _)| expiry < *first);
    queue.ordered.insert((expiry, seq), entry);
    if is_earliest {
        inner.condvar.notify_one();
    }
    Ok(())
}

pub(crate) fn cancel_on<T>(inner: &Arc<ManagerInner<T>>, contract: &Contract) -> Result<()> {
    if contract.inner.manager != inner.id {
        return Err(CoreError::ContractNotFound(contract.id().value()));
    }

    let mut queue = inner.queue.lock();
    match contract.state() {
        // Cancellation after collection (and vice versa) must be a
        // no-op, not an error amplifier.
        ContractState::Collected | ContractState::Cancelled => Ok(()),
        ContractState::Pending => {
            contract.set_state(ContractState::Cancelled);
            queue.ordered.remove(&(contract.expiry(), contract.inner.seq));
            Ok(())
        }
    }
}

fn reaper_loop<T>(inner: &Arc<ManagerInner<T>>) {
    loop {
        let collected = {
            let mut queue = inner.queue.lock();
            loop {
                if inner.shutdown.load(Ordering::Acquire) {
                    return;
                }
                let now = Instant::now();
                let earliest = queue.ordered.keys().next().map(|(expiry, _)| *expiry);
                match earliest {
                    None => {
                        inner.condvar.wait(&mut queue);
                    }
                    Some(expiry) if expiry <= now => {
                        let (_, entry) = queue.ordered.pop_first().expect("peeked entry present");
                        entry.contract.set_state(ContractState::Collected);
                        break entry;
                    }
                    Some(expiry) => {
                        inner.condvar.wait_for(&mut queue, expiry - now);
                    }
                }
            }
        };

        // The cleaner runs off the queue lock and off every issuing
        // thread. A panic here must not stop the reaper.
        let cleaner = Arc::clone(&inner.cleaner);
        let id = collected.contract.id();
        if catch_unwind(AssertUnwindSafe(|| cleaner.clean(collected.resource))).is_err() {
            tracing::warn!(contract = %id, "cleaner panicked, reaper continues");
        }
    }
}
