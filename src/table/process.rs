/*!
 * Per-Process Owner Cell
 *
 * The slot through which process-management code reaches its descriptor
 * table owner. Threads sharing a table hold clones of the same
 * `Arc<FdManager>`; un-sharing builds an independent copy and swaps which
 * owner the process uses, leaving threads that kept the old reference
 * untouched until they drop it.
 */

use super::manager::FdManager;
use crate::core::errors::Result;
use arc_swap::ArcSwap;
use std::sync::Arc;

/// Atomically swappable reference to a process's table owner
pub struct ProcessFiles<T> {
    files: ArcSwap<FdManager<T>>,
}

impl<T: Send + Sync> ProcessFiles<T> {
    pub fn new(manager: FdManager<T>) -> Self {
        Self {
            files: ArcSwap::from_pointee(manager),
        }
    }

    /// Attach to an owner already shared with another process
    pub fn from_shared(manager: Arc<FdManager<T>>) -> Self {
        Self {
            files: ArcSwap::new(manager),
        }
    }

    /// Acquire a reference to the current owner
    ///
    /// The returned `Arc` stays valid even if the process swaps owners
    /// concurrently; dropping it is the matching release.
    #[inline]
    pub fn manager(&self) -> Arc<FdManager<T>> {
        self.files.load_full()
    }

    /// Atomically swap which owner this process uses, returning the old one
    pub fn replace(&self, new: Arc<FdManager<T>>) -> Arc<FdManager<T>> {
        self.files.swap(new)
    }

    /// Stop sharing: fork an independent copy and make it current
    ///
    /// Every installed handle gains one reference in the copy. Returns the
    /// new owner. Callers racing on the same cell serialize externally, as
    /// un-sharing is a decision of the owning process.
    pub fn unshare(&self) -> Result<Arc<FdManager<T>>> {
        let copy = Arc::new(self.manager().fork()?);
        self.files.store(Arc::clone(&copy));
        Ok(copy)
    }
}

impl<T> std::fmt::Debug for ProcessFiles<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessFiles").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_owner_sees_mutations() {
        let parent = ProcessFiles::new(FdManager::<u32>::new());
        let child = ProcessFiles::from_shared(parent.manager());

        let fd = parent.manager().insert(Arc::new(7)).unwrap();
        assert_eq!(*child.manager().get(fd).unwrap(), 7);

        child.manager().remove(fd).unwrap();
        assert!(parent.manager().get(fd).is_none());
    }

    #[test]
    fn test_unshare_detaches() {
        let parent = ProcessFiles::new(FdManager::<u32>::new());
        let child = ProcessFiles::from_shared(parent.manager());
        let fd = parent.manager().insert(Arc::new(7)).unwrap();

        let copy = child.unshare().unwrap();
        assert!(Arc::ptr_eq(&copy, &child.manager()));
        assert!(!Arc::ptr_eq(&parent.manager(), &child.manager()));

        // Post-unshare mutations no longer propagate
        child.manager().remove(fd).unwrap();
        assert!(parent.manager().get(fd).is_some());
    }

    #[test]
    fn test_replace_returns_previous_owner() {
        let cell = ProcessFiles::new(FdManager::<u32>::new());
        let fd = cell.manager().insert(Arc::new(1)).unwrap();

        let fresh = Arc::new(FdManager::new());
        let old = cell.replace(Arc::clone(&fresh));
        assert!(old.get(fd).is_some());
        assert!(cell.manager().get(fd).is_none());
        assert!(Arc::ptr_eq(&cell.manager(), &fresh));
    }
}
