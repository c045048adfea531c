/*!
 * Descriptor Table
 *
 * Maps small integer file descriptors to shared file-object handles.
 *
 * # Architecture
 *
 * - **Version** (`version`): one immutable-capacity snapshot holding the
 *   slot array plus the open and close-on-exec bitmaps.
 * - **Owner** (`manager`): publishes the current version, serializes
 *   writers behind one lock, and grows by swapping in a new version.
 * - **Reclaimer** (`reclaim`): frees retired versions only after a full
 *   grace period, so lock-free readers never dereference freed memory.
 * - **Process cell** (`process`): the swappable owner reference used to
 *   share and un-share a table between processes.
 *
 * # Performance
 *
 * - **Lookups**: lock-free; epoch pin + two atomic loads
 * - **Mutations**: serialized per owner, never blocking readers
 * - **Growth**: build-new-then-publish; readers keep their snapshot
 */

mod bitset;
mod manager;
mod process;
mod reclaim;
mod version;

pub use manager::FdManager;
pub use process::ProcessFiles;
pub use reclaim::settle;
