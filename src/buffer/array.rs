//! In-memory array-backed buffers.

use super::{Allocator, Buffer};
use crate::error::{CoreError, Result};
use std::io::{Cursor, Read};
use std::sync::Arc;

struct ArrayDefaults {
    initial: usize,
    maximum: usize,
}

/// Allocator of growable in-memory buffers.
///
/// Cheap to clone; every clone and every buffer it produced share the
/// same default capacities, so sibling allocation never renegotiates
/// policy.
#[derive(Clone)]
pub struct ArrayAllocator {
    defaults: Arc<ArrayDefaults>,
}

impl ArrayAllocator {
    /// Creates an allocator with the given default capacities.
    /// `maximum` is raised to `initial` if smaller.
    #[must_use]
    pub fn new(initial: usize, maximum: usize) -> Self {
        Self {
            defaults: Arc::new(ArrayDefaults {
                initial,
                maximum: maximum.max(initial),
            }),
        }
    }

    /// Creates an allocator using the configured default capacities.
    #[must_use]
    pub fn from_config(config: &crate::config::CoreConfig) -> Self {
        Self::new(config.buffer_initial, config.buffer_maximum)
    }
}

impl Allocator for ArrayAllocator {
    fn allocate(&self) -> Result<Box<dyn Buffer>> {
        self.allocate_with(self.defaults.initial, self.defaults.maximum)
    }

    fn allocate_with(&self, initial: usize, maximum: usize) -> Result<Box<dyn Buffer>> {
        Ok(Box::new(ArrayBuffer::new(self.clone(), initial, maximum)))
    }
}

impl std::fmt::Debug for ArrayAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArrayAllocator")
            .field("initial", &self.defaults.initial)
            .field("maximum", &self.defaults.maximum)
            .finish()
    }
}

/// Growable in-memory buffer with capacity doubling.
pub struct ArrayBuffer {
    data: Vec<u8>,
    initial: usize,
    maximum: usize,
    chain: ArrayAllocator,
}

impl ArrayBuffer {
    fn new(chain: ArrayAllocator, initial: usize, maximum: usize) -> Self {
        Self {
            data: Vec::new(),
            initial,
            maximum: maximum.max(initial),
            chain,
        }
    }

    /// The configured maximum capacity.
    #[must_use]
    pub fn maximum(&self) -> usize {
        self.maximum
    }

    /// Grows capacity by doubling until `needed` fits, never past the
    /// maximum and never shrinking.
    fn reserve_for(&mut self, needed: usize) {
        let current = self.data.capacity();
        if current >= needed {
            return;
        }
        let mut target = current.max(self.initial).max(1);
        while target < needed {
            target = target.saturating_mul(2);
        }
        let target = target.min(self.maximum);
        self.data.reserve_exact(target - self.data.len());
    }
}

impl Buffer for ArrayBuffer {
    fn append(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let requested = self.data.len() + data.len();
        if requested > self.maximum {
            return Err(CoreError::CapacityExceeded {
                requested,
                maximum: self.maximum,
            });
        }
        self.reserve_for(requested);
        self.data.extend_from_slice(data);
        Ok(())
    }

    fn length(&self) -> usize {
        self.data.len()
    }

    fn open(&self) -> Result<Box<dyn Read + Send>> {
        Ok(Box::new(Cursor::new(self.data.clone())))
    }

    fn encode(&self) -> Result<Vec<u8>> {
        Ok(self.data.clone())
    }

    fn clear(&mut self) -> Result<()> {
        self.data.clear();
        Ok(())
    }

    fn allocate(&self) -> Result<Box<dyn Buffer>> {
        self.chain.allocate()
    }
}

impl std::fmt::Debug for ArrayBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArrayBuffer")
            .field("length", &self.data.len())
            .field("capacity", &self.data.capacity())
            .field("maximum", &self.maximum)
            .finish()
    }
}
