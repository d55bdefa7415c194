//! Expiry contracts.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Immutable identity of a contract, unique per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContractId(pub(crate) u64);

impl ContractId {
    /// The raw identity value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContractId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "contract-{}", self.0)
    }
}

/// Lifecycle of a contract. Transitions happen under the manager's
/// queue lock; reads are lock-free.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ContractState {
    /// Tracked by the manager, awaiting expiry.
    Pending,
    /// Explicitly cancelled before collection.
    Cancelled,
    /// Collected by the reaper; the cleaner ran (or is running).
    Collected,
}

const STATE_PENDING: u8 = 0;
const STATE_CANCELLED: u8 = 1;
const STATE_COLLECTED: u8 = 2;

pub(crate) struct ContractInner {
    id: u64,
    /// Identity of the issuing manager; renewing a contract against a
    /// different manager is not-found, not expired.
    pub(crate) manager: u64,
    /// Monotonic insertion sequence; breaks expiry ties oldest-first.
    pub(crate) seq: u64,
    /// Current absolute expiry. Mutated only under the manager's queue
    /// lock, together with the contract's position in the ordering.
    expiry: Mutex<Instant>,
    state: AtomicU8,
}

/// Deadline record for one leased resource.
///
/// Identity is immutable; the absolute expiry moves with each renewal.
/// Cloning shares the same underlying contract.
#[derive(Clone)]
pub struct Contract {
    pub(crate) inner: Arc<ContractInner>,
}

impl Contract {
    pub(crate) fn new(id: u64, manager: u64, seq: u64, expiry: Instant) -> Self {
        Self {
            inner: Arc::new(ContractInner {
                id,
                manager,
                seq,
                expiry: Mutex::new(expiry),
                state: AtomicU8::new(STATE_PENDING),
            }),
        }
    }

    /// The contract's immutable identity.
    #[must_use]
    pub fn id(&self) -> ContractId {
        ContractId(self.inner.id)
    }

    /// Current absolute expiry.
    #[must_use]
    pub fn expiry(&self) -> Instant {
        *self.inner.expiry.lock()
    }

    /// Signed remaining time in milliseconds: positive while pending,
    /// negative once past the expiry.
    #[must_use]
    pub fn delay_millis(&self) -> i64 {
        let expiry = self.expiry();
        let now = Instant::now();
        if expiry >= now {
            i64::try_from((expiry - now).as_millis()).unwrap_or(i64::MAX)
        } else {
            -i64::try_from((now - expiry).as_millis()).unwrap_or(i64::MAX)
        }
    }

    /// True once the reaper collected this contract.
    #[must_use]
    pub fn is_collected(&self) -> bool {
        self.state() == ContractState::Collected
    }

    /// True once the contract was explicitly cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state() == ContractState::Cancelled
    }

    pub(crate) fn state(&self) -> ContractState {
        match self.inner.state.load(Ordering::Acquire) {
            STATE_PENDING => ContractState::Pending,
            STATE_CANCELLED => ContractState::Cancelled,
            _ => ContractState::Collected,
        }
    }

    /// Called only under the manager's queue lock.
    pub(crate) fn set_state(&self, state: ContractState) {
        let raw = match state {
            ContractState::Pending => STATE_PENDING,
            ContractState::Cancelled => STATE_CANCELLED,
            ContractState::Collected => STATE_COLLECTED,
        };
        self.inner.state.store(raw, Ordering::Release);
    }

    /// Called only under the manager's queue lock, together with the
    /// re-insertion that keeps the ordering honest.
    pub(crate) fn set_expiry(&self, expiry: Instant) {
        *self.inner.expiry.lock() = expiry;
    }
}

impl fmt::Debug for Contract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Contract")
            .field("id", &self.inner.id)
            .field("seq", &self.inner.seq)
            .field("state", &self.state())
            .field("delay_millis", &self.delay_millis())
            .finish()
    }
}
