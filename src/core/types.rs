/*!
 * Core Types
 * Common types used across the descriptor table
 */

use serde::{Deserialize, Serialize};

/// File descriptor type
pub type Fd = u32;

/// Snapshot of an owner's descriptor usage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableStats {
    /// Current table capacity (always a multiple of the bitmap word width)
    pub capacity: usize,
    /// Descriptors with the open bit set (installed or reserved)
    pub open: usize,
    /// Descriptors marked close-on-exec
    pub close_on_exec: usize,
}
