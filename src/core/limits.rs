/*!
 * Table Limits and Constants
 *
 * Centralized limits for descriptor allocation and table growth.
 * All values include rationale comments explaining WHY they exist.
 */

/// Bitmap storage granularity (bits per word)
/// Table capacities are always rounded up to a multiple of this, so bitmap
/// words never cover a partial range. [LINUX-COMPAT] BITS_PER_LONG analog.
pub const WORD_BITS: usize = usize::BITS as usize;

/// Initial table capacity (one bitmap word)
/// Most processes open only a handful of descriptors; a single-word table
/// is allocated eagerly with the owner and no growth ever happens for them.
/// [PERF] Keeps the common case to one allocation at owner creation.
pub const DEFAULT_FD_CAPACITY: usize = WORD_BITS;

/// Hard ceiling on table growth (64K descriptors)
/// Allocation at or past this index fails with ResourceExhausted rather
/// than growing. Overridable per owner via `FdManager::with_limits`.
/// [LINUX-COMPAT] Matches the conventional fs.nr_open default.
pub const DEFAULT_FD_CEILING: usize = 65_536;

/// Round a requested capacity up to the bitmap granularity, minimum one word
#[inline]
pub const fn round_up_capacity(requested: usize) -> usize {
    let words = requested.div_ceil(WORD_BITS);
    if words == 0 {
        WORD_BITS
    } else {
        words * WORD_BITS
    }
}
