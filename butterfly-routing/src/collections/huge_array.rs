//! Segmented growable array
//!
//! Elements live in fixed-size blocks so that a single array can hold more
//! elements than one contiguous allocation comfortably allows, and growing it
//! never copies the blocks that are already full.

use std::ops::{Index, IndexMut};

use butterfly_common::{Error, Result};

/// Default number of elements per block (1M).
pub const DEFAULT_BLOCK_SIZE: usize = 1 << 20;

/// A resizable flat array split into blocks of `block_size` elements.
///
/// Newly exposed slots hold `T::default()`; callers that need a sentinel must
/// write it themselves. No internal locking: one writer at a time.
#[derive(Debug, Clone)]
pub struct HugeArray<T> {
    blocks: Vec<Vec<T>>,
    block_size: usize,
    len: usize,
}

impl<T: Clone + Default> HugeArray<T> {
    /// Create an array of `len` default elements.
    pub fn new(len: usize) -> Result<Self> {
        Self::with_block_size(len, DEFAULT_BLOCK_SIZE)
    }

    /// Create an array with a custom block size (must be non-zero).
    pub fn with_block_size(len: usize, block_size: usize) -> Result<Self> {
        if block_size == 0 {
            return Err(Error::InvalidInput("block size must be non-zero".into()));
        }
        let mut array = Self {
            blocks: Vec::new(),
            block_size,
            len: 0,
        };
        array.resize(len)?;
        Ok(array)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Get a reference to the element at `idx`, or `None` past the end.
    #[inline]
    pub fn get(&self, idx: usize) -> Option<&T> {
        if idx >= self.len {
            return None;
        }
        Some(&self.blocks[idx / self.block_size][idx % self.block_size])
    }

    /// Overwrite the element at `idx`.
    ///
    /// # Panics
    /// Panics if `idx >= len()`, like slice indexing.
    #[inline]
    pub fn set(&mut self, idx: usize, value: T) {
        self[idx] = value;
    }

    /// Take the element at `idx`, leaving the default in its place.
    #[inline]
    pub fn take(&mut self, idx: usize) -> T {
        std::mem::take(&mut self[idx])
    }

    /// Grow or shrink to `new_len` elements.
    ///
    /// Shrinking releases the memory of dropped blocks. Allocation failure is
    /// reported as [`Error::AllocationFailed`]; the array may then be partially
    /// grown and should not be relied upon.
    pub fn resize(&mut self, new_len: usize) -> Result<()> {
        let bs = self.block_size;
        let blocks_needed = new_len.div_ceil(bs);

        if blocks_needed < self.blocks.len() {
            self.blocks.truncate(blocks_needed);
            self.blocks.shrink_to_fit();
        }

        // only the last existing block and new blocks change size
        let first_dirty = self.blocks.len().saturating_sub(1);
        if self.blocks.len() < blocks_needed {
            self.blocks
                .try_reserve_exact(blocks_needed - self.blocks.len())
                .map_err(|_| Error::AllocationFailed {
                    what: "array blocks",
                    requested: blocks_needed,
                })?;
            self.blocks.resize_with(blocks_needed, Vec::new);
        }

        for (i, block) in self.blocks.iter_mut().enumerate().skip(first_dirty) {
            let want = (new_len - i * bs).min(bs);
            if block.len() < want {
                block
                    .try_reserve_exact(want - block.len())
                    .map_err(|_| Error::AllocationFailed {
                        what: "array block",
                        requested: new_len,
                    })?;
                block.resize(want, T::default());
            } else if block.len() > want {
                block.truncate(want);
                block.shrink_to_fit();
            }
        }

        self.len = new_len;
        Ok(())
    }

    /// Iterate all elements in index order.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.blocks.iter().flat_map(|block| block.iter())
    }
}

impl<T> Index<usize> for HugeArray<T> {
    type Output = T;

    #[inline]
    fn index(&self, idx: usize) -> &T {
        assert!(idx < self.len, "index {idx} out of bounds (len {})", self.len);
        &self.blocks[idx / self.block_size][idx % self.block_size]
    }
}

impl<T> IndexMut<usize> for HugeArray<T> {
    #[inline]
    fn index_mut(&mut self, idx: usize) -> &mut T {
        assert!(idx < self.len, "index {idx} out of bounds (len {})", self.len);
        &mut self.blocks[idx / self.block_size][idx % self.block_size]
    }
}
