//! Spindle: the concurrency-and-resource backbone of an embeddable,
//! non-blocking network server.
//!
//! # Overview
//!
//! Spindle provides three cooperating subsystems and nothing above them:
//!
//! - A **reactor** that multiplexes readiness for thousands of sockets
//!   through a small number of OS-level polls and hands ready
//!   [`Operation`]s to a bounded worker pool.
//! - A **buffer allocator hierarchy** that produces growable,
//!   capacity-bounded byte buffers whose backing storage cascades from
//!   cheap in-memory arrays to disk-backed temp files without the caller
//!   changing code paths.
//! - A **lease manager** that tracks expiry deadlines for many
//!   concurrently-live resources and invokes a cleanup callback exactly
//!   once per resource, as close to its deadline as scheduling allows.
//!
//! Protocol parsing, framing, routing, and TLS are external collaborators:
//! they consume [`Buffer`]s, register [`Operation`]s, and hold [`Lease`]s,
//! but no part of them lives here.
//!
//! # Core Guarantees
//!
//! - **One operation per channel/interest**: at most one live [`Operation`]
//!   occupies a `(channel, interest)` pair, and readiness for a pair is
//!   never dispatched to two worker threads concurrently.
//! - **No silent truncation**: appending past a buffer's maximum capacity
//!   is a synchronous error and leaves the buffer's length untouched.
//! - **Never early**: the reaper collects a contract no earlier than its
//!   nominal expiry; equal expiries are collected oldest-inserted-first.
//! - **Failure isolation**: a bad channel, a panicking cleaner, or an
//!   unwritable temp file is logged and contained; the polling threads,
//!   the worker pool, and the reaper survive.
//!
//! # Module Structure
//!
//! - [`reactor`]: readiness multiplexing, operations, the worker pool
//! - [`buffer`]: allocators, tiered cascade buffers, the temp-file sweep
//! - [`lease`]: contracts, leases, cleaners, the reaper
//! - [`schedule`]: delayed at-most-once task execution
//! - [`config`]: construction-time tuning surface
//! - [`error`]: error taxonomy

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]

pub mod buffer;
pub mod config;
pub mod error;
pub mod lease;
pub mod reactor;
pub mod schedule;
pub mod test_utils;

pub use buffer::{
    Allocator, ArrayAllocator, Buffer, BufferSweeper, CascadeBuffer, FileAllocator, TierAllocator,
};
pub use config::CoreConfig;
pub use error::{CoreError, Result};
pub use lease::{Cleaner, Contract, ContractId, Lease, LeaseManager};
pub use reactor::{Interest, InterestKind, Operation, Reactor, RegState, Source, WorkerPool};
pub use schedule::{ScheduledHandle, Scheduler};
