//! Time-ordered leases and the contract reaper.
//!
//! Every managed resource — a socket pipeline, a buffer — holds exactly
//! one [`Lease`] wrapping exactly one [`Contract`]. Activity renews the
//! lease; when the contract expires, the reaper invokes the resource's
//! [`Cleaner`] exactly once, off the issuing thread:
//!
//! ```text
//!  issue ──▶ pending ──renew──▶ pending (new expiry, same identity)
//!               │
//!               ├── cancel ──▶ cancelled   (cleaner never runs)
//!               └── expiry ──▶ collected   (cleaner runs once)
//! ```
//!
//! Collection order is total: expiry ascending, ties broken by
//! insertion sequence, oldest first, so bursts of simultaneously
//! expiring contracts cannot starve one another. Collection never
//! happens before the nominal expiry; the positive skew is bounded by
//! scheduler latency (see [`reaper_skew`](crate::CoreConfig::reaper_skew)).
//!
//! Destruction is exactly-once in both directions: collection after
//! cancellation and cancellation after collection are no-ops.

mod contract;
mod controller;

pub use contract::{Contract, ContractId};
pub use controller::LeaseManager;

use crate::error::Result;
use controller::ManagerInner;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cleanup callback invoked exactly once when a leased resource's
/// contract is collected.
///
/// Implemented by whoever owns the resource; invoked on the reaper
/// thread. A panic inside `clean` is caught and logged — it never
/// stops the reaper.
pub trait Cleaner<T>: Send + Sync {
    /// Reclaims the resource.
    fn clean(&self, resource: T);
}

impl<T, F> Cleaner<T> for F
where
    F: Fn(T) + Send + Sync,
{
    fn clean(&self, resource: T) {
        self(resource);
    }
}

/// Resource-facing handle over one contract.
///
/// A resource holds exactly one lease for its lifetime; renewing it is
/// how activity pushes the idle deadline out.
pub struct Lease<T: Send + 'static> {
    pub(crate) contract: Contract,
    pub(crate) inner: Arc<ManagerInner<T>>,
}

impl<T: Send + 'static> Lease<T> {
    /// Replaces the contract's expiry with `duration` from now.
    ///
    /// Fails with [`ContractExpired`](crate::CoreError::ContractExpired)
    /// once the reaper has collected the contract — renewal never
    /// silently resurrects a reclaimed resource.
    pub fn renew(&self, duration: Duration) -> Result<()> {
        controller::renew_on(&self.inner, &self.contract, duration)
    }

    /// Cancels the contract if still pending; a no-op after collection.
    pub fn cancel(&self) -> Result<()> {
        controller::cancel_on(&self.inner, &self.contract)
    }

    /// Current absolute expiry.
    #[must_use]
    pub fn expiry(&self) -> Instant {
        self.contract.expiry()
    }

    /// The underlying contract.
    #[must_use]
    pub fn contract(&self) -> &Contract {
        &self.contract
    }
}

impl<T: Send + 'static> std::fmt::Debug for Lease<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("contract", &self.contract)
            .finish()
    }
}
