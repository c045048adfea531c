/*!
 * Descriptor Table Owner
 *
 * Per-process owner of the published table version. Lookups are lock-free:
 * one epoch pin, one atomic load of the current-version pointer, one atomic
 * slot load. Every mutation (allocate, install, remove, close-on-exec,
 * growth, fork) is serialized by a single write lock; writers never block
 * readers and readers never block writers.
 *
 * Growth builds a new version, publishes it with one pointer swap, and
 * hands the retired version to the reclaimer, so a reader holding a
 * previously loaded version keeps seeing a fully valid, unmodified table.
 *
 * Owner-level sharing is `Arc<FdManager<T>>`: cloning the `Arc` shares the
 * table between threads, dropping the last reference releases every live
 * handle and frees the current version.
 */

use super::reclaim;
use super::version::FdTable;
use crate::core::errors::{FdError, Result};
use crate::core::limits::{round_up_capacity, DEFAULT_FD_CAPACITY, DEFAULT_FD_CEILING};
use crate::core::types::{Fd, TableStats};
use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned};
use parking_lot::Mutex;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Writer-side allocation state, guarded by the write lock
struct AllocCursor {
    /// Lowest descriptor that might be free; lowered on close and rollback
    next_fd: usize,
}

/// Per-process file descriptor table owner
///
/// Generic over the shared file-object type `T`; handles are stored as
/// `Arc<T>` and the table never inspects them.
pub struct FdManager<T> {
    current: Atomic<FdTable<T>>,
    write: Mutex<AllocCursor>,
    ceiling: usize,
}

impl<T: Send + Sync> FdManager<T> {
    /// Owner with the default one-word initial capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_FD_CAPACITY)
    }

    /// Owner with a specific initial capacity (rounded up to the bitmap
    /// granularity)
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_limits(capacity, DEFAULT_FD_CEILING)
    }

    /// Owner with explicit initial capacity and growth ceiling
    pub fn with_limits(capacity: usize, ceiling: usize) -> Self {
        let ceiling = round_up_capacity(ceiling);
        Self {
            current: Atomic::new(FdTable::with_capacity(capacity.min(ceiling))),
            write: Mutex::new(AllocCursor { next_fd: 0 }),
            ceiling,
        }
    }

    /// Hard ceiling on descriptor indices for this owner
    #[inline]
    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Load the published version under an epoch pin
    #[inline]
    fn current<'g>(&self, guard: &'g Guard) -> &'g FdTable<T> {
        // Safety: `current` is never null, and the reclaimer contract keeps
        // any loaded version alive for the lifetime of the pin.
        unsafe { self.current.load(Ordering::Acquire, guard).deref() }
    }

    // ------------------------------------------------------------------
    // Lock-free read path
    // ------------------------------------------------------------------

    /// Look up `fd`, returning an owned handle reference
    ///
    /// Never blocks: one atomic load of the current version plus one
    /// atomic slot load. Returns none for out-of-range, empty, or
    /// reserved-but-uninstalled descriptors.
    #[inline]
    pub fn get(&self, fd: Fd) -> Option<Arc<T>> {
        let guard = epoch::pin();
        self.current(&guard).get(fd as usize)
    }

    /// Light lookup: run `f` against a borrowed handle with no reference
    /// count traffic
    ///
    /// The borrow is valid only inside `f`; callers that need the handle
    /// beyond that window use `get` to take an owned reference.
    #[inline]
    pub fn with_handle<R>(&self, fd: Fd, f: impl FnOnce(&T) -> R) -> Option<R> {
        let guard = epoch::pin();
        let slot = self.current(&guard).slot(fd as usize)?;
        let borrowed = slot.load();
        borrowed.as_deref().map(f)
    }

    /// Current table capacity
    pub fn capacity(&self) -> usize {
        let guard = epoch::pin();
        self.current(&guard).capacity()
    }

    /// Descriptors with the open bit set (installed or reserved)
    pub fn open_count(&self) -> usize {
        let guard = epoch::pin();
        self.current(&guard).open_count()
    }

    /// Usage snapshot
    pub fn stats(&self) -> TableStats {
        let guard = epoch::pin();
        let table = self.current(&guard);
        TableStats {
            capacity: table.capacity(),
            open: table.open_count(),
            close_on_exec: table.close_on_exec_count(),
        }
    }

    /// Close-on-exec flag for an open descriptor
    pub fn is_close_on_exec(&self, fd: Fd) -> Result<bool> {
        let guard = epoch::pin();
        let table = self.current(&guard);
        if !table.is_open(fd as usize) {
            return Err(FdError::BadDescriptor(fd));
        }
        Ok(table.is_close_on_exec(fd as usize))
    }

    // ------------------------------------------------------------------
    // Write path (serialized by the write lock)
    // ------------------------------------------------------------------

    /// Reserve the lowest unused descriptor
    ///
    /// The returned descriptor has its open bit set but no handle; the
    /// caller completes it with `install` or rolls it back with
    /// `release_reservation`. Rollback must be reachable on every error
    /// path after a successful allocation.
    pub fn allocate_fd(&self) -> Result<Fd> {
        self.allocate_fd_from(0)
    }

    /// Reserve the lowest unused descriptor at or above `lower_bound`
    pub fn allocate_fd_from(&self, lower_bound: Fd) -> Result<Fd> {
        let mut cursor = self.write.lock();
        let guard = epoch::pin();
        let fd = self.allocate_locked(&mut cursor, &guard, lower_bound as usize)?;
        Ok(fd as Fd)
    }

    /// Complete a reservation by publishing the handle
    pub fn install(&self, fd: Fd, handle: Arc<T>) -> Result<()> {
        let _cursor = self.write.lock();
        let guard = epoch::pin();
        let table = self.current(&guard);
        let idx = fd as usize;
        if !table.is_open(idx) || table.is_installed(idx) {
            return Err(FdError::BadDescriptor(fd));
        }
        table.install(idx, handle);
        log::trace!("fd {fd} installed");
        Ok(())
    }

    /// Roll back a reservation that was never installed
    ///
    /// Clears the open bit so the descriptor becomes allocatable again.
    pub fn release_reservation(&self, fd: Fd) {
        let mut cursor = self.write.lock();
        let guard = epoch::pin();
        let table = self.current(&guard);
        let idx = fd as usize;
        if !table.is_open(idx) || table.is_installed(idx) {
            log::warn!("release_reservation on non-reserved fd {fd}");
            return;
        }
        table.cancel_reservation(idx);
        if idx < cursor.next_fd {
            cursor.next_fd = idx;
        }
        log::trace!("fd {fd} reservation rolled back");
    }

    /// Allocate and install in one critical section (the common open path)
    pub fn insert(&self, handle: Arc<T>) -> Result<Fd> {
        let mut cursor = self.write.lock();
        let guard = epoch::pin();
        let fd = self.allocate_locked(&mut cursor, &guard, 0)?;
        self.current(&guard).install(fd, handle);
        log::trace!("fd {fd} allocated and installed");
        Ok(fd as Fd)
    }

    /// Remove `fd`, returning its handle for the caller to release
    ///
    /// Also clears the close-on-exec bit. A reserved-but-uninstalled
    /// descriptor is not removable.
    pub fn remove(&self, fd: Fd) -> Result<Arc<T>> {
        let mut cursor = self.write.lock();
        let guard = epoch::pin();
        let idx = fd as usize;
        let handle = self
            .current(&guard)
            .remove(idx)
            .ok_or(FdError::BadDescriptor(fd))?;
        if idx < cursor.next_fd {
            cursor.next_fd = idx;
        }
        log::trace!("fd {fd} removed");
        Ok(handle)
    }

    /// Set or clear the close-on-exec flag of an open descriptor
    pub fn set_close_on_exec(&self, fd: Fd, flag: bool) -> Result<()> {
        let _cursor = self.write.lock();
        let guard = epoch::pin();
        if self.current(&guard).set_close_on_exec(fd as usize, flag) {
            Ok(())
        } else {
            Err(FdError::BadDescriptor(fd))
        }
    }

    /// Remove every descriptor marked close-on-exec, handing the handles
    /// back for closing (the exec-time sweep)
    pub fn drain_close_on_exec(&self) -> Vec<(Fd, Arc<T>)> {
        let mut cursor = self.write.lock();
        let guard = epoch::pin();
        let table = self.current(&guard);
        let mut drained = Vec::new();
        let mut from = 0;
        while let Some(idx) = table.next_close_on_exec(from) {
            from = idx + 1;
            // A reservation carrying the flag belongs to the thread that
            // made it; only installed descriptors are swept.
            if let Some(handle) = table.remove(idx) {
                if idx < cursor.next_fd {
                    cursor.next_fd = idx;
                }
                drained.push((idx as Fd, handle));
            }
        }
        if !drained.is_empty() {
            log::debug!("close-on-exec sweep removed {} descriptors", drained.len());
        }
        drained
    }

    /// Grow the table so descriptors below `min_fds` are addressable
    ///
    /// No-op when the capacity already suffices; `ResourceExhausted` past
    /// the ceiling with the table unchanged.
    pub fn ensure_capacity(&self, min_fds: usize) -> Result<()> {
        let _cursor = self.write.lock();
        let guard = epoch::pin();
        if min_fds > self.current(&guard).capacity() {
            self.grow_locked(&guard, min_fds)?;
        }
        Ok(())
    }

    /// Duplicate an open descriptor onto the lowest unused one
    pub fn dup(&self, fd: Fd) -> Result<Fd> {
        self.dup_from(fd, 0)
    }

    /// Duplicate an open descriptor onto the lowest unused one at or above
    /// `lower_bound`
    pub fn dup_from(&self, fd: Fd, lower_bound: Fd) -> Result<Fd> {
        let mut cursor = self.write.lock();
        let guard = epoch::pin();
        let handle = self
            .current(&guard)
            .get(fd as usize)
            .ok_or(FdError::BadDescriptor(fd))?;
        let new_fd = self.allocate_locked(&mut cursor, &guard, lower_bound as usize)?;
        self.current(&guard).install(new_fd, handle);
        log::trace!("fd {fd} duplicated to {new_fd}");
        Ok(new_fd as Fd)
    }

    /// Duplicate `old_fd` onto exactly `new_fd`, closing whatever occupied
    /// the target
    ///
    /// The new descriptor starts with close-on-exec clear. Duplicating a
    /// descriptor onto itself is a no-op for an open descriptor. A target
    /// slot holding a foreign in-flight reservation is refused.
    pub fn dup_at(&self, old_fd: Fd, new_fd: Fd) -> Result<Fd> {
        let cursor = self.write.lock();
        let guard = epoch::pin();
        let new_idx = new_fd as usize;
        if new_idx >= self.ceiling {
            return Err(FdError::ResourceExhausted {
                fd: new_fd,
                limit: self.ceiling,
            });
        }
        let mut table = self.current(&guard);
        let handle = table
            .get(old_fd as usize)
            .ok_or(FdError::BadDescriptor(old_fd))?;
        if old_fd == new_fd {
            return Ok(new_fd);
        }
        if new_idx >= table.capacity() {
            table = self.grow_locked(&guard, new_idx + 1)?;
        }
        if table.is_open(new_idx) && !table.is_installed(new_idx) {
            return Err(FdError::BadDescriptor(new_fd));
        }
        // Single atomic slot publication: a concurrent reader of the
        // target never observes it empty mid-duplication
        let displaced = table.replace(new_idx, handle);
        drop(cursor);
        // Displaced handle released outside the critical section
        drop(displaced);
        Ok(new_fd)
    }

    /// Independent copy of this owner (unshared fork)
    ///
    /// Every installed handle gains one reference; outstanding
    /// reservations stay with this owner. Shared fork is `Arc::clone`
    /// of the owner itself.
    pub fn fork(&self) -> Result<FdManager<T>> {
        let _cursor = self.write.lock();
        let guard = epoch::pin();
        let copy = self.current(&guard).forked()?;
        log::debug!("descriptor table forked at capacity {}", copy.capacity());
        Ok(FdManager {
            current: Atomic::new(copy),
            write: Mutex::new(AllocCursor { next_fd: 0 }),
            ceiling: self.ceiling,
        })
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// First-clear-bit scan plus growth, under the write lock
    fn allocate_locked(
        &self,
        cursor: &mut AllocCursor,
        guard: &Guard,
        lower_bound: usize,
    ) -> Result<usize> {
        let mut table = self.current(guard);
        let mut fd = lower_bound.max(cursor.next_fd);
        loop {
            if fd >= table.capacity() {
                table = self.grow_locked(guard, fd + 1)?;
            }
            fd = table.first_unused(fd);
            if fd < table.capacity() {
                break;
            }
        }
        table.reserve(fd);
        if lower_bound <= cursor.next_fd {
            cursor.next_fd = fd + 1;
        }
        log::trace!("fd {fd} reserved");
        Ok(fd)
    }

    /// Build, publish, and retire: the only place a version is replaced
    ///
    /// All-or-nothing: on any failure the current version stays published
    /// and untouched.
    fn grow_locked<'g>(&self, guard: &'g Guard, min_capacity: usize) -> Result<&'g FdTable<T>> {
        if min_capacity > self.ceiling {
            return Err(FdError::ResourceExhausted {
                fd: Fd::try_from(min_capacity - 1).unwrap_or(Fd::MAX),
                limit: self.ceiling,
            });
        }
        let table = self.current(guard);
        let old_capacity = table.capacity();
        let new = table.grown(min_capacity, self.ceiling)?;
        log::debug!(
            "descriptor table grown: {} -> {} slots",
            old_capacity,
            new.capacity()
        );
        let retired = self.current.swap(Owned::new(new), Ordering::AcqRel, guard);
        reclaim::retire(guard, retired);
        Ok(self.current(guard))
    }
}

impl<T: Send + Sync> Default for FdManager<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for FdManager<T> {
    fn drop(&mut self) {
        // Last owner reference: no reader can still hold this version, so
        // the current table is reclaimed directly, releasing every live
        // handle. Versions retired by earlier growth drain through the
        // epoch reclaimer.
        let current = std::mem::replace(&mut self.current, Atomic::null());
        drop(unsafe { current.into_owned() });
    }
}

impl<T> std::fmt::Debug for FdManager<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FdManager")
            .field("ceiling", &self.ceiling)
            .finish_non_exhaustive()
    }
}
