//! Cascading allocator: an explicit chain of capacity tiers.
//!
//! Overflow could be expressed by nesting wrapper allocators; here the
//! chain is a flat, ordered list of ceilings terminating in an array or
//! file allocator, so the overflow path is a loop over a slice instead
//! of dynamic dispatch through composed objects. [`CascadeBuffer::tier`]
//! exposes where a buffer currently sits, which is what makes the spill
//! path testable in isolation.

use super::{Allocator, ArrayAllocator, Buffer, FileAllocator};
use crate::error::{CoreError, Result};
use std::io::{Cursor, Read};
use std::sync::Arc;

/// Terminal stage of a tier chain.
enum Terminal {
    Array(ArrayAllocator),
    File(FileAllocator),
}

impl Terminal {
    fn allocate_with(&self, initial: usize, maximum: usize) -> Result<Box<dyn Buffer>> {
        match self {
            Self::Array(a) => a.allocate_with(initial, maximum),
            Self::File(f) => f.allocate_with(initial, maximum),
        }
    }

    fn limit(&self) -> usize {
        match self {
            Self::Array(_) => usize::MAX,
            Self::File(f) => f.limit(),
        }
    }
}

struct TierChain {
    /// Ceilings of the in-memory tiers, ascending (innermost first).
    ceilings: Vec<usize>,
    terminal: Terminal,
    initial: usize,
    maximum: usize,
}

/// Allocator over an explicit chain of capacity tiers.
///
/// Buffers start in the innermost (smallest-ceiling) memory tier and
/// spill outward as they grow; the terminal tier satisfies whatever the
/// memory tiers cannot. Callers never branch on tier — the buffer
/// interface is identical throughout.
#[derive(Clone)]
pub struct TierAllocator {
    chain: Arc<TierChain>,
}

impl TierAllocator {
    /// Builds a chain whose overflow ends in disk-backed storage.
    ///
    /// `ceilings` are normalized to ascending order and deduplicated:
    /// an inner tier's ceiling is always at most its delegate's.
    #[must_use]
    pub fn spilling_to_disk(
        ceilings: Vec<usize>,
        terminal: FileAllocator,
        initial: usize,
        maximum: usize,
    ) -> Self {
        Self::build(ceilings, Terminal::File(terminal), initial, maximum)
    }

    /// Builds a memory-only chain, for callers that must never touch
    /// disk.
    #[must_use]
    pub fn memory_only(
        ceilings: Vec<usize>,
        terminal: ArrayAllocator,
        initial: usize,
        maximum: usize,
    ) -> Self {
        Self::build(ceilings, Terminal::Array(terminal), initial, maximum)
    }

    fn build(mut ceilings: Vec<usize>, terminal: Terminal, initial: usize, maximum: usize) -> Self {
        ceilings.sort_unstable();
        ceilings.dedup();
        Self {
            chain: Arc::new(TierChain {
                ceilings,
                terminal,
                initial,
                maximum: maximum.max(initial),
            }),
        }
    }

    /// Number of tiers including the terminal.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.chain.ceilings.len() + 1
    }
}

impl Allocator for TierAllocator {
    fn allocate(&self) -> Result<Box<dyn Buffer>> {
        self.allocate_with(self.chain.initial, self.chain.maximum)
    }

    fn allocate_with(&self, initial: usize, maximum: usize) -> Result<Box<dyn Buffer>> {
        let maximum = maximum.max(initial).min(self.chain.terminal.limit());
        Ok(Box::new(CascadeBuffer {
            chain: Arc::clone(&self.chain),
            initial,
            maximum,
            stage: Stage::Memory {
                tier: 0,
                data: Vec::new(),
            },
        }))
    }
}

impl std::fmt::Debug for TierAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TierAllocator")
            .field("ceilings", &self.chain.ceilings)
            .field("depth", &self.depth())
            .finish()
    }
}

enum Stage {
    /// Content lives in tier `tier`'s memory, bounded by its ceiling.
    Memory { tier: usize, data: Vec<u8> },
    /// Content spilled to the terminal allocator's buffer.
    Terminal { inner: Box<dyn Buffer> },
}

/// A buffer whose backing storage cascades through the tier chain.
pub struct CascadeBuffer {
    chain: Arc<TierChain>,
    initial: usize,
    maximum: usize,
    stage: Stage,
}

impl CascadeBuffer {
    /// Index of the tier currently backing the content. Memory tiers
    /// count from zero; the terminal tier is `depth - 1`.
    #[must_use]
    pub fn tier(&self) -> usize {
        match &self.stage {
            Stage::Memory { tier, .. } => *tier,
            Stage::Terminal { .. } => self.chain.ceilings.len(),
        }
    }

    /// True once content has spilled to the terminal tier.
    #[must_use]
    pub fn spilled(&self) -> bool {
        matches!(self.stage, Stage::Terminal { .. })
    }

    /// Ceiling of the current memory tier, bounded by the buffer's own
    /// maximum.
    fn ceiling(&self, tier: usize) -> usize {
        self.chain.ceilings[tier].min(self.maximum)
    }

    /// Spills current memory content plus `pending` into the terminal
    /// allocator. Committed only if every write succeeds, so a disk
    /// failure leaves the buffer exactly as it was.
    fn spill_to_terminal(&mut self, data: &[u8], pending: &[u8]) -> Result<Box<dyn Buffer>> {
        let mut inner = self
            .chain
            .terminal
            .allocate_with(self.initial.max(data.len() + pending.len()), self.maximum)?;
        inner.append(data)?;
        inner.append(pending)?;
        Ok(inner)
    }
}

impl Buffer for CascadeBuffer {
    fn append(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        if let Stage::Terminal { inner } = &mut self.stage {
            return inner.append(data);
        }

        let (current_tier, held_len) = match &self.stage {
            Stage::Memory { tier, data } => (*tier, data.len()),
            Stage::Terminal { .. } => return Ok(()),
        };

        let requested = held_len + data.len();
        if requested > self.maximum {
            return Err(CoreError::CapacityExceeded {
                requested,
                maximum: self.maximum,
            });
        }

        // Walk outward to the first tier whose ceiling fits.
        let mut target = current_tier;
        while target < self.chain.ceilings.len() && requested > self.ceiling(target) {
            target += 1;
        }

        if target < self.chain.ceilings.len() {
            // Still a memory tier: same representation, so the spill is
            // a ceiling promotion in place.
            let initial = self.initial;
            let maximum = self.maximum;
            if let Stage::Memory { tier, data: held } = &mut self.stage {
                *tier = target;
                if held.capacity() < requested {
                    let mut cap = held.capacity().max(initial).max(1);
                    while cap < requested {
                        cap = cap.saturating_mul(2);
                    }
                    held.reserve_exact(cap.min(maximum) - held.len());
                }
                held.extend_from_slice(data);
            }
            return Ok(());
        }

        // Crossing into the terminal allocator: copy forward, then swap
        // stages.
        let held_snapshot = match &mut self.stage {
            Stage::Memory { data, .. } => std::mem::take(data),
            Stage::Terminal { .. } => Vec::new(),
        };
        match self.spill_to_terminal(&held_snapshot, data) {
            Ok(inner) => {
                self.stage = Stage::Terminal { inner };
                Ok(())
            }
            Err(err) => {
                // Restore: the failed append must be invisible.
                if let Stage::Memory { data: held, .. } = &mut self.stage {
                    *held = held_snapshot;
                }
                Err(err)
            }
        }
    }

    fn length(&self) -> usize {
        match &self.stage {
            Stage::Memory { data, .. } => data.len(),
            Stage::Terminal { inner } => inner.length(),
        }
    }

    fn open(&self) -> Result<Box<dyn Read + Send>> {
        match &self.stage {
            Stage::Memory { data, .. } => Ok(Box::new(Cursor::new(data.clone()))),
            Stage::Terminal { inner } => inner.open(),
        }
    }

    fn encode(&self) -> Result<Vec<u8>> {
        match &self.stage {
            Stage::Memory { data, .. } => Ok(data.clone()),
            Stage::Terminal { inner } => inner.encode(),
        }
    }

    fn clear(&mut self) -> Result<()> {
        match &mut self.stage {
            Stage::Memory { tier, data } => {
                data.clear();
                *tier = 0;
                Ok(())
            }
            // No un-spill: the terminal buffer already exists and its
            // storage policy (retained file, retained capacity) applies.
            Stage::Terminal { inner } => inner.clear(),
        }
    }

    fn allocate(&self) -> Result<Box<dyn Buffer>> {
        // Siblings restart at the innermost tier with the same ceiling
        // schedule: each framed part negotiates nothing.
        TierAllocator {
            chain: Arc::clone(&self.chain),
        }
        .allocate()
    }
}

impl std::fmt::Debug for CascadeBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CascadeBuffer")
            .field("length", &self.length())
            .field("tier", &self.tier())
            .field("spilled", &self.spilled())
            .field("maximum", &self.maximum)
            .finish()
    }
}
