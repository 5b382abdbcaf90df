use crate::utils::align;

/// Word size of the machine. Header, footer and both free-list links are
/// each one word wide.
pub(crate) const WORD: usize = size_of::<usize>();

/// Minimum alignment granularity. Every block size, and therefore every
/// payload offset, is a multiple of this.
pub(crate) const ALIGNMENT: usize = 2 * WORD;

/// Bytes taken by the two boundary tags (header + footer).
pub(crate) const OVERHEAD: usize = 2 * WORD;

/// Bytes reserved inside the payload for the free-list links (next + prev).
/// Only meaningful while the block is free; an allocated block hands these
/// bytes to the user like any other payload byte.
pub(crate) const LINK_SPACE: usize = 2 * WORD;

/// Smallest block the allocator will ever create. A block this size can hold
/// its two boundary tags plus both free-list links once it is freed.
pub(crate) const MIN_BLOCK_SIZE: usize = OVERHEAD + LINK_SPACE;

/// Null encoding for free-list links and the search cursor. Offset `0` lies
/// inside the arena's alignment padding, so no real payload ever starts there.
pub(crate) const NIL: usize = 0;

/// A boundary tag: one word packing a block's total size together with its
/// allocated flag.
///
/// ```text
///  63                                  4  3  2  1  0
///  +-----------------------------------------------+
///  | s  s  s  s  ...  s  s  s  s  s  0  0  0  0  a |
///  +-----------------------------------------------+
/// ```
///
/// `s` are the meaningful size bits and `a` is set iff the block is
/// allocated. Because sizes are multiples of [`ALIGNMENT`] the low bits are
/// always free for the flag. The same word is written at both ends of the
/// block, which is what lets [`crate::heap::Heap`] inspect a neighbor in
/// either direction with plain offset arithmetic:
///
/// ```text
/// +--------+-------------------------+--------+
/// | header |         payload         | footer |
/// +--------+-------------------------+--------+
/// ^ b - WORD                         ^ b + size - OVERHEAD
///          ^ b (the block's handle)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tag(usize);

impl Tag {
    pub(crate) fn new(size: usize, allocated: bool) -> Self {
        debug_assert!(size % ALIGNMENT == 0);
        Self(size | usize::from(allocated))
    }

    pub(crate) fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    pub(crate) fn raw(self) -> usize {
        self.0
    }

    /// Total block size in bytes, boundary tags included.
    pub fn size(self) -> usize {
        self.0 & !(ALIGNMENT - 1)
    }

    pub fn is_allocated(self) -> bool {
        self.0 & 1 == 1
    }
}

/// Identity of a live allocation: the offset of its payload inside the
/// arena.
///
/// Handles stay valid across arena growth because they are offsets, not
/// addresses. A handle that this allocator did not return (or whose block
/// has since been merged away and reused) yields garbage reads or a bounds
/// panic, never memory unsafety.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockHandle(pub(crate) usize);

impl BlockHandle {
    /// Payload offset inside the arena. Mostly useful for diagnostics.
    pub fn offset(self) -> usize {
        self.0
    }
}

/// Offset of the header word of the block whose payload starts at `b`.
pub(crate) fn header_offset(b: usize) -> usize {
    b - WORD
}

/// Offset of the footer word of a block of `size` bytes at payload `b`.
pub(crate) fn footer_offset(b: usize, size: usize) -> usize {
    b + size - OVERHEAD
}

/// Turns a requested payload size into the block size actually carved out:
/// rounded up to [`ALIGNMENT`], with room for the boundary tags and the
/// links the block will need once freed, floored at [`MIN_BLOCK_SIZE`].
///
/// `None` means the request is so large the size computation itself would
/// overflow; callers treat that the same as arena exhaustion.
pub(crate) fn adjust_request(size: usize) -> Option<usize> {
    let needed = size.checked_add(OVERHEAD + LINK_SPACE)?;
    needed.checked_add(ALIGNMENT - 1)?;
    Some(align(needed, ALIGNMENT).max(MIN_BLOCK_SIZE))
}
