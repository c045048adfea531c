/*!
 * Descriptor Table Version
 *
 * One published snapshot of the descriptor-to-handle mapping: a fixed
 * capacity, a slot array of optional handles, an open bitmap, and a
 * close-on-exec bitmap.
 *
 * Capacity, the slot array, and the bitmap storage never change after the
 * version is published; growth builds a new version and swaps it in. Slot
 * contents are individually atomic (`ArcSwapOption`), so an install or
 * remove is a single pointer publication and a reader can never observe a
 * torn slot.
 *
 * All methods taking `&self` that mutate slots or bitmaps are writer-side:
 * the owner's write lock must be held. The lock-free read path uses only
 * `get` and `slot`.
 */

use super::bitset::FdSet;
use crate::core::errors::{FdError, Result};
use crate::core::limits::round_up_capacity;
use arc_swap::ArcSwapOption;
use std::sync::Arc;

pub(crate) struct FdTable<T> {
    capacity: usize,
    slots: Box<[ArcSwapOption<T>]>,
    open: FdSet,
    close_on_exec: FdSet,
}

impl<T> FdTable<T> {
    /// Zero-initialized version sized up to the bitmap granularity
    pub fn with_capacity(requested: usize) -> Self {
        let capacity = round_up_capacity(requested);
        let slots = (0..capacity).map(|_| ArcSwapOption::empty()).collect();
        Self {
            capacity,
            slots,
            open: FdSet::with_capacity(capacity),
            close_on_exec: FdSet::with_capacity(capacity),
        }
    }

    /// Fallible allocation for growth and fork paths
    ///
    /// On failure the caller's current version is untouched and stays
    /// published.
    pub fn try_with_capacity(requested: usize) -> Result<Self> {
        let capacity = round_up_capacity(requested);
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(capacity)
            .map_err(|_| FdError::AllocationFailed { capacity })?;
        slots.extend((0..capacity).map(|_| ArcSwapOption::empty()));
        Ok(Self {
            capacity,
            slots: slots.into_boxed_slice(),
            open: FdSet::try_with_capacity(capacity)?,
            close_on_exec: FdSet::try_with_capacity(capacity)?,
        })
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Owned handle for `fd`, or none if out of range or empty
    ///
    /// Safe on the lock-free read path: one atomic slot load.
    #[inline]
    pub fn get(&self, fd: usize) -> Option<Arc<T>> {
        self.slots.get(fd)?.load_full()
    }

    /// Raw slot access for the borrow-without-refcount read path
    #[inline]
    pub fn slot(&self, fd: usize) -> Option<&ArcSwapOption<T>> {
        self.slots.get(fd)
    }

    /// Open bit set for `fd` (installed or reserved)
    #[inline]
    pub fn is_open(&self, fd: usize) -> bool {
        fd < self.capacity && self.open.test(fd)
    }

    /// Installed handle present at `fd`
    #[inline]
    pub fn is_installed(&self, fd: usize) -> bool {
        self.is_open(fd) && self.slots[fd].load().is_some()
    }

    /// Mark `fd` reserved: open bit set, slot still empty
    ///
    /// Readers observe a reserved slot as "no handle", so the intermediate
    /// state never leaks outside the writer.
    pub fn reserve(&self, fd: usize) {
        debug_assert!(!self.open.test(fd));
        self.open.set(fd);
    }

    /// Roll a reservation back without ever having installed a handle
    pub fn cancel_reservation(&self, fd: usize) {
        debug_assert!(self.slots[fd].load().is_none());
        self.open.clear(fd);
        self.close_on_exec.clear(fd);
    }

    /// Complete a reservation by publishing the handle
    pub fn install(&self, fd: usize, handle: Arc<T>) {
        debug_assert!(self.open.test(fd));
        debug_assert!(self.slots[fd].load().is_none());
        self.slots[fd].store(Some(handle));
    }

    /// Publish `handle` over whatever occupies `fd` in one atomic store,
    /// returning the displaced handle
    ///
    /// The slot never passes through an empty state, so a concurrent
    /// reader sees either the displaced handle or the new one. The open
    /// bit ends set and close-on-exec ends clear, as for a fresh install.
    pub fn replace(&self, fd: usize, handle: Arc<T>) -> Option<Arc<T>> {
        debug_assert!(fd < self.capacity);
        self.open.set(fd);
        self.close_on_exec.clear(fd);
        self.slots[fd].swap(Some(handle))
    }

    /// Clear the slot and both bits, returning the displaced handle
    ///
    /// Returns none for an empty or merely reserved slot.
    pub fn remove(&self, fd: usize) -> Option<Arc<T>> {
        if fd >= self.capacity {
            return None;
        }
        let handle = self.slots[fd].swap(None)?;
        self.open.clear(fd);
        self.close_on_exec.clear(fd);
        Some(handle)
    }

    /// Set or clear the close-on-exec bit; false if `fd` is not open
    pub fn set_close_on_exec(&self, fd: usize, flag: bool) -> bool {
        if !self.is_open(fd) {
            return false;
        }
        if flag {
            self.close_on_exec.set(fd);
        } else {
            self.close_on_exec.clear(fd);
        }
        true
    }

    #[inline]
    pub fn is_close_on_exec(&self, fd: usize) -> bool {
        fd < self.capacity && self.close_on_exec.test(fd)
    }

    /// First descriptor at or above `from` with a clear open bit;
    /// `capacity` when every bit is taken
    #[inline]
    pub fn first_unused(&self, from: usize) -> usize {
        self.open.first_clear(from)
    }

    /// Next close-on-exec descriptor at or above `from`
    #[inline]
    pub fn next_close_on_exec(&self, from: usize) -> Option<usize> {
        self.close_on_exec.next_set(from)
    }

    pub fn open_count(&self) -> usize {
        self.open.count()
    }

    pub fn close_on_exec_count(&self) -> usize {
        self.close_on_exec.count()
    }

    /// Larger version for growth: capacity = max(doubled, requested) but
    /// never past `limit`, both bitmaps copied verbatim, every installed
    /// handle carried over at its original index.
    ///
    /// The caller must have checked `min_capacity <= limit`. The retired
    /// version keeps its own slot references until its grace period ends,
    /// so concurrent readers of the old version stay valid; its references
    /// are released when the reclaimer frees it.
    pub fn grown(&self, min_capacity: usize, limit: usize) -> Result<Self> {
        debug_assert!(min_capacity <= limit);
        let target = min_capacity.max((self.capacity * 2).min(limit));
        let new = Self::try_with_capacity(target)?;
        new.open.copy_from(&self.open);
        new.close_on_exec.copy_from(&self.close_on_exec);

        let mut fd = 0;
        while let Some(open_fd) = self.open.next_set(fd) {
            if let Some(handle) = self.slots[open_fd].load_full() {
                new.slots[open_fd].store(Some(handle));
            }
            fd = open_fd + 1;
        }
        Ok(new)
    }

    /// Independent copy for an unshared fork: every installed handle is
    /// cloned (one new reference each). Open bits that are reserved but
    /// not yet installed belong to the reserving thread in the source
    /// owner and are dropped from the copy.
    pub fn forked(&self) -> Result<Self> {
        let new = Self::try_with_capacity(self.capacity)?;
        let mut fd = 0;
        while let Some(open_fd) = self.open.next_set(fd) {
            if let Some(handle) = self.slots[open_fd].load_full() {
                new.slots[open_fd].store(Some(handle));
                new.open.set(open_fd);
                if self.close_on_exec.test(open_fd) {
                    new.close_on_exec.set(open_fd);
                }
            }
            fd = open_fd + 1;
        }
        Ok(new)
    }
}

impl<T> std::fmt::Debug for FdTable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FdTable")
            .field("capacity", &self.capacity)
            .field("open", &self.open.count())
            .field("close_on_exec", &self.close_on_exec.count())
            .finish()
    }
}
