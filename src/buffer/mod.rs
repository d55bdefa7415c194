//! Capacity-bounded byte buffers with cascading backing storage.
//!
//! Allocators produce [`Buffer`]s whose backing storage grows from a
//! cheap in-memory array to a disk-backed temp file without the caller
//! ever branching on tier:
//!
//! ```text
//!   TierAllocator ──▶ memory tier 0 ──▶ memory tier 1 ──▶ ... ──▶ terminal
//!                     (ceiling c0)      (ceiling c1)              (array | file)
//! ```
//!
//! The overflow path is an explicit list of ceilings, not nested
//! wrapper objects, so it can be inspected ([`CascadeBuffer::tier`])
//! and tested in isolation.
//!
//! # Invariants
//!
//! - A buffer never exceeds its maximum capacity. Exceeding it is a
//!   reported [`CapacityExceeded`](crate::CoreError::CapacityExceeded)
//!   failure, never silent truncation, and the failed append leaves the
//!   length unchanged.
//! - A zero-length append is a no-op.
//! - Internal growth doubles and never shrinks; `clear` resets the
//!   length without necessarily releasing backing storage.
//! - Disk-backed files are reclaimed by the background sweep or an
//!   explicit close, never by `clear` — no file I/O on the hot path.

mod array;
mod file;
mod sweep;
mod tier;

pub use array::{ArrayAllocator, ArrayBuffer};
pub use file::{FileAllocator, FileBuffer};
pub use sweep::BufferSweeper;
pub use tier::{CascadeBuffer, TierAllocator};

use crate::error::Result;
use std::io::Read;

/// An append-only, ordered byte sequence with a declared maximum
/// capacity.
///
/// The sole data-exchange surface between this core and the protocol
/// collaborators that parse into and out of it. Appends from a single
/// producer are observed in submission order by a single consumer.
pub trait Buffer: Send {
    /// Appends `data`, growing the backing storage as needed up to the
    /// maximum capacity. A zero-length append is a no-op.
    fn append(&mut self, data: &[u8]) -> Result<()>;

    /// Current content length in bytes.
    fn length(&self) -> usize;

    /// Opens a fresh sequential read view over the current content.
    fn open(&self) -> Result<Box<dyn Read + Send>>;

    /// Materializes the content as one contiguous byte vector.
    ///
    /// For a disk-backed buffer this is the one operation that loads
    /// the whole content into memory, and only because it was asked to.
    fn encode(&self) -> Result<Vec<u8>>;

    /// Logically empties the buffer. Backing storage is retained; a
    /// disk-backed buffer's file is left for the sweep.
    fn clear(&mut self) -> Result<()>;

    /// Spawns an independent sibling buffer sharing the same allocator
    /// chain, with the chain's default capacities. Used to build an
    /// ordered set of framed sub-buffers without renegotiating capacity
    /// policy per part.
    fn allocate(&self) -> Result<Box<dyn Buffer>>;
}

/// Factory of [`Buffer`]s parameterized by initial and maximum
/// capacity.
pub trait Allocator: Send + Sync {
    /// Allocates a buffer with this allocator's default capacities.
    fn allocate(&self) -> Result<Box<dyn Buffer>>;

    /// Allocates a buffer with explicit capacities. `maximum` is raised
    /// to `initial` if smaller.
    fn allocate_with(&self, initial: usize, maximum: usize) -> Result<Box<dyn Buffer>>;
}
