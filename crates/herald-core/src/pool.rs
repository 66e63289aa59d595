//! Bounded identifier allocation.
//!
//! An [`IdentifierPool`] hands out the lowest free slot of a fixed-size
//! bitset. Each pool instance owns its own lock; two pools never share one,
//! and no pool lock is held while calling into anything else.

use std::marker::PhantomData;

use parking_lot::Mutex;
use tracing::warn;

use crate::errors::PoolError;
use crate::ids::PooledId;

const WORD_BITS: usize = u64::BITS as usize;

/// Fixed-capacity allocator of small integer identifiers.
pub struct IdentifierPool<I> {
    capacity: usize,
    words: Mutex<Vec<u64>>,
    _id: PhantomData<fn() -> I>,
}

impl<I: PooledId> IdentifierPool<I> {
    /// Create a pool with `capacity` slots, all free.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            words: Mutex::new(vec![0; capacity.div_ceil(WORD_BITS)]),
            _id: PhantomData,
        }
    }

    /// Total number of slots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Allocate the lowest free identifier.
    pub fn allocate(&self) -> Result<I, PoolError> {
        let mut words = self.words.lock();
        for (w, word) in words.iter_mut().enumerate() {
            if *word == u64::MAX {
                continue;
            }
            let bit = (!*word).trailing_zeros() as usize;
            let index = w * WORD_BITS + bit;
            if index >= self.capacity {
                break;
            }
            *word |= 1 << bit;
            return Ok(I::from_index(index));
        }
        Err(PoolError::Exhausted {
            kind: I::KIND,
            capacity: self.capacity,
        })
    }

    /// Release an identifier.
    ///
    /// Returns `Ok(true)` when the slot was in use. Freeing a slot that is
    /// already free is a no-op logged as a warning (`Ok(false)`). Identifiers
    /// beyond the capacity are rejected.
    pub fn free(&self, id: I) -> Result<bool, PoolError> {
        let index = id.index();
        if index >= self.capacity {
            return Err(PoolError::InvalidIdentifier {
                kind: I::KIND,
                id: id.to_string(),
                capacity: self.capacity,
            });
        }
        let (w, mask) = (index / WORD_BITS, 1u64 << (index % WORD_BITS));
        let was_set = {
            let mut words = self.words.lock();
            let was_set = words[w] & mask != 0;
            words[w] &= !mask;
            was_set
        };
        if !was_set {
            warn!(kind = I::KIND, %id, "freed an identifier that was not allocated");
        }
        Ok(was_set)
    }

    /// Whether `id` is currently allocated.
    pub fn is_allocated(&self, id: I) -> bool {
        let index = id.index();
        if index >= self.capacity {
            return false;
        }
        self.words.lock()[index / WORD_BITS] & (1 << (index % WORD_BITS)) != 0
    }

    /// Number of identifiers currently in use.
    pub fn in_use(&self) -> usize {
        self.words
            .lock()
            .iter()
            .map(|w| w.count_ones() as usize)
            .sum()
    }
}

impl<I> std::fmt::Debug for IdentifierPool<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentifierPool")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}
