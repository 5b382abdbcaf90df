//! This file contains the small rounding helpers used everywhere else.
//! They don't particularly belong to any concrete module of the allocator.

/// Rounds `n` up to the next multiple of `to`. `to` must be a power of two.
///
/// Every block size and every handle the allocator hands out is a multiple
/// of [`crate::block::ALIGNMENT`], and this is the function that enforces it.
pub(crate) fn align(n: usize, to: usize) -> usize {
    (n + to - 1) & !(to - 1)
}

/// Whether `n` already sits on a multiple of `to`. Used by the structural
/// checker only.
pub(crate) fn is_aligned(n: usize, to: usize) -> bool {
    n & (to - 1) == 0
}
