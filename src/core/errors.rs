/*!
 * Error Types
 * Descriptor table errors with thiserror, miette, and serde support
 */

use crate::core::types::Fd;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Descriptor table errors with serialization support
///
/// All errors are reported synchronously and never retried internally;
/// retry policy belongs to the calling layer. Every failure leaves the
/// published table version unchanged.
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum FdError {
    #[error("descriptor limit reached: fd {fd} exceeds ceiling {limit}")]
    #[diagnostic(
        code(fd_table::resource_exhausted),
        help("The per-process descriptor ceiling was hit. Close unused descriptors or raise the limit.")
    )]
    ResourceExhausted { fd: Fd, limit: usize },

    #[error("bad file descriptor: {0}")]
    #[diagnostic(
        code(fd_table::bad_descriptor),
        help("The descriptor is out of range or refers to an empty slot.")
    )]
    BadDescriptor(Fd),

    #[error("failed to allocate descriptor table of capacity {capacity}")]
    #[diagnostic(
        code(fd_table::allocation_failed),
        help("Memory for a new table version could not be obtained. The current table remains valid.")
    )]
    AllocationFailed { capacity: usize },
}

/// Result type for descriptor table operations
pub type Result<T> = std::result::Result<T, FdError>;
