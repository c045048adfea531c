/*!
 * Descriptor Bitmaps
 *
 * Fixed-capacity bit sets backing the open and close-on-exec maps of a
 * table version. Capacity is always a whole number of machine words.
 *
 * # Concurrency
 *
 * Bits are written only while holding the owner's write lock; the lock-free
 * read path never consults bitmaps. Atomic words with `Relaxed` ordering
 * make the under-lock accesses well-defined without imposing fences on the
 * single writer.
 */

use crate::core::errors::{FdError, Result};
use crate::core::limits::WORD_BITS;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Fixed-size bit set over atomic machine words
pub(crate) struct FdSet {
    words: Box<[AtomicUsize]>,
}

impl FdSet {
    /// Create a cleared set covering `capacity` bits
    ///
    /// `capacity` must be a multiple of the word width.
    pub fn with_capacity(capacity: usize) -> Self {
        debug_assert_eq!(capacity % WORD_BITS, 0);
        let words = (0..capacity / WORD_BITS)
            .map(|_| AtomicUsize::new(0))
            .collect();
        Self { words }
    }

    /// Fallible variant for growth paths: a failed allocation must leave
    /// the current table version untouched.
    pub fn try_with_capacity(capacity: usize) -> Result<Self> {
        debug_assert_eq!(capacity % WORD_BITS, 0);
        let word_count = capacity / WORD_BITS;
        let mut words = Vec::new();
        words
            .try_reserve_exact(word_count)
            .map_err(|_| FdError::AllocationFailed { capacity })?;
        words.extend((0..word_count).map(|_| AtomicUsize::new(0)));
        Ok(Self {
            words: words.into_boxed_slice(),
        })
    }

    /// Number of bits covered
    #[inline]
    pub fn capacity(&self) -> usize {
        self.words.len() * WORD_BITS
    }

    #[inline]
    pub fn set(&self, bit: usize) {
        let word = &self.words[bit / WORD_BITS];
        word.store(
            word.load(Ordering::Relaxed) | (1 << (bit % WORD_BITS)),
            Ordering::Relaxed,
        );
    }

    #[inline]
    pub fn clear(&self, bit: usize) {
        let word = &self.words[bit / WORD_BITS];
        word.store(
            word.load(Ordering::Relaxed) & !(1 << (bit % WORD_BITS)),
            Ordering::Relaxed,
        );
    }

    #[inline]
    pub fn test(&self, bit: usize) -> bool {
        self.words[bit / WORD_BITS].load(Ordering::Relaxed) & (1 << (bit % WORD_BITS)) != 0
    }

    /// First clear bit at or above `from`; `capacity()` when the set is full
    pub fn first_clear(&self, from: usize) -> usize {
        if from >= self.capacity() {
            return self.capacity();
        }
        let mut word_idx = from / WORD_BITS;
        // Treat bits below `from` in the first word as occupied
        let mut low_mask = (1usize << (from % WORD_BITS)) - 1;
        while word_idx < self.words.len() {
            let word = self.words[word_idx].load(Ordering::Relaxed) | low_mask;
            if word != usize::MAX {
                return word_idx * WORD_BITS + word.trailing_ones() as usize;
            }
            low_mask = 0;
            word_idx += 1;
        }
        self.capacity()
    }

    /// Next set bit at or above `from`, if any
    pub fn next_set(&self, from: usize) -> Option<usize> {
        if from >= self.capacity() {
            return None;
        }
        let mut word_idx = from / WORD_BITS;
        let mut low_clear = from % WORD_BITS;
        while word_idx < self.words.len() {
            let mut word = self.words[word_idx].load(Ordering::Relaxed);
            if low_clear != 0 {
                word &= !((1usize << low_clear).wrapping_sub(1));
            }
            if word != 0 {
                return Some(word_idx * WORD_BITS + word.trailing_zeros() as usize);
            }
            low_clear = 0;
            word_idx += 1;
        }
        None
    }

    /// Copy every word from `source`; `self` must be at least as large.
    /// Trailing words of a larger destination stay clear.
    pub fn copy_from(&self, source: &FdSet) {
        debug_assert!(self.words.len() >= source.words.len());
        for (dst, src) in self.words.iter().zip(source.words.iter()) {
            dst.store(src.load(Ordering::Relaxed), Ordering::Relaxed);
        }
    }

    /// Number of set bits
    pub fn count(&self) -> usize {
        self.words
            .iter()
            .map(|w| w.load(Ordering::Relaxed).count_ones() as usize)
            .sum()
    }
}

impl std::fmt::Debug for FdSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FdSet")
            .field("capacity", &self.capacity())
            .field("count", &self.count())
            .finish()
    }
}
