/*!
 * fd-table
 * Per-process open-file descriptor table with lock-free reads,
 * serialized writes, and grace-period reclamation of retired versions
 */

pub mod core;
pub mod table;

// Re-exports
pub use crate::core::errors::{FdError, Result};
pub use crate::core::limits::{DEFAULT_FD_CAPACITY, DEFAULT_FD_CEILING, WORD_BITS};
pub use crate::core::types::{Fd, TableStats};
pub use table::{settle, FdManager, ProcessFiles};
