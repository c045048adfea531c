/*!
 * Grace-Period Reclamation
 *
 * Retired table versions are freed through epoch-based reclamation
 * (crossbeam-epoch): a version handed to `retire` is destroyed only after
 * every thread that could have loaded it before the swap has unpinned.
 * Lock-free readers pin the epoch for the duration of a lookup, so a
 * version they hold is never freed under them.
 */

use crossbeam_epoch::{self as epoch, Guard, Shared};

/// Schedule a retired version for destruction after a full grace period.
///
/// # Safety contract
///
/// The caller must have already unpublished `version` (swapped it out of
/// the owner's current pointer) while holding the owner's write lock, and
/// must not dereference it after this call. `guard` must be the pin under
/// which the swap was performed.
pub(crate) fn retire<T>(guard: &Guard, version: Shared<'_, T>) {
    debug_assert!(!version.is_null());
    // Deferred drop runs once no reader that predates the swap remains
    unsafe { guard.defer_destroy(version) }
}

/// Best-effort drain of deferred destructions.
///
/// Flushing moves this thread's deferred work to the global queue and
/// nudges the epoch forward. There is no guarantee a given retired version
/// is freed by the time this returns; shutdown paths and tests call it to
/// encourage timely release.
pub fn settle() {
    for _ in 0..3 {
        epoch::pin().flush();
    }
}
