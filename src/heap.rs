use log::debug;
use thiserror::Error;

use crate::{
    arena::{Arena, ArenaExhausted, Storage, VecStorage},
    block::{
        BlockHandle, MIN_BLOCK_SIZE, OVERHEAD, Tag, WORD, adjust_request, footer_offset,
        header_offset,
    },
    freelist::FreeList,
};

/// Bytes the prologue, epilogue and alignment padding take at init:
/// `[pad][prologue hdr][next][prev][prologue ftr][epilogue hdr]`.
pub(crate) const INIT_BYTES: usize = 6 * WORD;

/// Payload offset of the prologue block. Its payload words double as the
/// free-list sentinel links.
pub(crate) const PROLOGUE: usize = 2 * WORD;

/// Returned by [`Heap::init`] when the storage cannot provide even the
/// initial prologue/epilogue words.
#[derive(Debug, Error)]
pub enum AllocError {
    #[error("could not format the initial arena: {0}")]
    Init(#[from] ArenaExhausted),
}

/// A boundary-tag heap over a growable arena.
///
/// The arena begins with alignment padding and a permanently allocated
/// zero-payload prologue, and ends with a permanently allocated zero-size
/// epilogue header. Every real block therefore has an allocated neighbor on
/// both sides, which removes all edge checks from [`coalesce`](Self::coalesce):
///
/// ```text
/// start                                                             end
///  +-----+----------+~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~+----------+
///  | pad | prologue |     zero or more real blocks     | epilogue |
///  +-----+----------+~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~+----------+
/// ```
///
/// All state lives in this one value; two heaps never share anything. The
/// design is single-threaded: callers that share a `Heap` across threads
/// must wrap it in their own mutual exclusion.
pub struct Heap<S: Storage = VecStorage> {
    pub(crate) arena: Arena<S>,
    pub(crate) free: FreeList,
}

impl<S: Storage> Heap<S> {
    /// Formats `storage` into an empty heap: padding, prologue (which
    /// anchors the empty free list) and epilogue. Fails only if the storage
    /// cannot provide the first [`INIT_BYTES`].
    pub fn init(storage: S) -> Result<Self, AllocError> {
        let mut arena = Arena::new(storage);
        arena.grow(INIT_BYTES)?;

        let prologue_tag = Tag::new(MIN_BLOCK_SIZE, true);
        arena.write_word(0, 0); // alignment padding
        arena.write_word(header_offset(PROLOGUE), prologue_tag.raw());
        arena.write_word(footer_offset(PROLOGUE, MIN_BLOCK_SIZE), prologue_tag.raw());
        arena.write_word(header_offset(INIT_BYTES), Tag::new(0, true).raw());

        let free = FreeList::new(PROLOGUE);
        // Sentinel links start out empty.
        let mut heap = Self { arena, free };
        heap.arena.write_word(PROLOGUE, crate::block::NIL);
        heap.arena.write_word(PROLOGUE + WORD, crate::block::NIL);

        Ok(heap)
    }

    /// Allocates `size` bytes and returns a handle to the payload, or `None`
    /// if the arena cannot grow far enough. `size == 0` returns `None`
    /// without touching any state.
    pub fn alloc(&mut self, size: usize) -> Option<BlockHandle> {
        if size == 0 {
            return None;
        }
        let adjusted = adjust_request(size)?;
        debug!("alloc({size}) -> block of {adjusted} bytes");

        if let Some(b) = self.free.find_fit(&self.arena, adjusted) {
            self.place(b, adjusted);
            return Some(BlockHandle(b));
        }

        let b = self.extend(adjusted)?;
        self.place(b, adjusted);
        Some(BlockHandle(b))
    }

    /// Releases an allocation. `None` and already-free blocks are no-ops by
    /// design, not diagnostics; anything else clears both tags and merges
    /// with whichever neighbors are free.
    pub fn release(&mut self, block: impl Into<Option<BlockHandle>>) {
        let Some(BlockHandle(b)) = block.into() else {
            return;
        };
        let header = self.header(b);
        if !header.is_allocated() {
            return;
        }
        debug!("release({b:#x}) of {} bytes", header.size());

        self.set_tags(b, header.size(), false);
        self.coalesce(b);
    }

    /// Resizes an allocation. First matching case applies:
    ///
    /// 1. `block == None` behaves exactly as [`alloc`](Self::alloc).
    /// 2. `size == 0` behaves exactly as [`release`](Self::release),
    ///    returning `None`.
    /// 3. The block already covers the target: split off the leftover when
    ///    it is big enough to stand alone, otherwise keep the block whole.
    /// 4. The physically next block is free and together they cover the
    ///    target: absorb it, then split-or-keep as in case 3.
    /// 5. Otherwise move: allocate, copy `min(size, old payload)` bytes,
    ///    release the old block. If the allocation fails the original block
    ///    is left completely untouched and `None` is returned.
    pub fn resize(
        &mut self,
        block: impl Into<Option<BlockHandle>>,
        size: usize,
    ) -> Option<BlockHandle> {
        let Some(handle @ BlockHandle(b)) = block.into() else {
            return self.alloc(size);
        };
        if size == 0 {
            self.release(handle);
            return None;
        }

        let adjusted = adjust_request(size)?;
        let current = self.header(b).size();
        debug!("resize({b:#x}, {size}) -> {current} to {adjusted} bytes");

        if current >= adjusted {
            self.carve(b, current, adjusted);
            return Some(handle);
        }

        let next = b + current;
        let next_tag = self.header(next);
        if !next_tag.is_allocated() && current + next_tag.size() >= adjusted {
            self.free.delete(&mut self.arena, next);
            self.carve(b, current + next_tag.size(), adjusted);
            return Some(handle);
        }

        let moved = self.alloc(size)?;
        let count = size.min(current - OVERHEAD);
        self.arena.bytes_mut().copy_within(b..b + count, moved.0);
        self.release(handle);
        Some(moved)
    }

    /// Bytes of a live allocation. The slice covers the block's full payload
    /// capacity, which may exceed the requested size by rounding and
    /// reserved link space.
    pub fn payload(&self, block: BlockHandle) -> &[u8] {
        let size = self.header(block.0).size();
        &self.arena.bytes()[block.0..block.0 + size - OVERHEAD]
    }

    /// Mutable bytes of a live allocation.
    pub fn payload_mut(&mut self, block: BlockHandle) -> &mut [u8] {
        let size = self.header(block.0).size();
        &mut self.arena.bytes_mut()[block.0..block.0 + size - OVERHEAD]
    }

    /// Total bytes currently backing the arena.
    pub fn arena_len(&self) -> usize {
        self.arena.len()
    }

    pub(crate) fn header(&self, b: usize) -> Tag {
        Tag::from_raw(self.arena.read_word(header_offset(b)))
    }

    pub(crate) fn footer(&self, b: usize) -> Tag {
        Tag::from_raw(self.arena.read_word(footer_offset(b, self.header(b).size())))
    }

    /// Writes matching boundary tags at both ends of the block at `b`.
    fn set_tags(&mut self, b: usize, size: usize, allocated: bool) {
        let tag = Tag::new(size, allocated);
        self.arena.write_word(header_offset(b), tag.raw());
        self.arena.write_word(footer_offset(b, size), tag.raw());
    }

    /// Payload offset of the block physically before `b`, located through
    /// the footer that sits just under `b`'s header.
    fn prev_block(&self, b: usize) -> usize {
        b - Tag::from_raw(self.arena.read_word(b - OVERHEAD)).size()
    }

    /// Grows the arena by `adjusted` bytes, formats the new region as one
    /// free block topped by a fresh epilogue, and folds it into any free
    /// block that bordered the old epilogue. Returns the merged block, which
    /// sits in the free list ready for [`place`](Self::place).
    fn extend(&mut self, adjusted: usize) -> Option<usize> {
        let b = self.arena.len();
        if let Err(err) = self.arena.grow(adjusted) {
            debug!("extend failed: {err}");
            return None;
        }

        // The old epilogue header becomes the new block's header.
        self.set_tags(b, adjusted, false);
        self.arena.write_word(header_offset(b + adjusted), Tag::new(0, true).raw());

        Some(self.coalesce(b))
    }

    /// Carves an allocation of `adjusted` bytes out of the free block at
    /// `b`. The block leaves the free list unconditionally; the tail goes
    /// back as its own free block when it can stand alone, and is otherwise
    /// handed to the caller as internal fragmentation.
    fn place(&mut self, b: usize, adjusted: usize) {
        let current = self.header(b).size();
        self.free.delete(&mut self.arena, b);

        if current - adjusted >= MIN_BLOCK_SIZE {
            self.set_tags(b, adjusted, true);
            let remainder = b + adjusted;
            self.set_tags(remainder, current - adjusted, false);
            self.free.insert(&mut self.arena, remainder);
        } else {
            self.set_tags(b, current, true);
        }
    }

    /// Shrinks the allocated block at `b` (of `total` bytes) down to
    /// `adjusted`, releasing the leftover when it can stand alone. Unlike
    /// [`place`](Self::place) the leftover is coalesced: on the resize paths
    /// the following block may itself be free.
    fn carve(&mut self, b: usize, total: usize, adjusted: usize) {
        if total - adjusted >= MIN_BLOCK_SIZE {
            self.set_tags(b, adjusted, true);
            let remainder = b + adjusted;
            self.set_tags(remainder, total - adjusted, false);
            self.coalesce(remainder);
        } else {
            self.set_tags(b, total, true);
        }
    }

    /// Boundary-tag coalescing. Absorbs whichever physical neighbors of the
    /// free block at `b` are free, pushes the merged block onto the free
    /// list and returns it. The prologue and epilogue are always allocated,
    /// so neither direction needs an edge check.
    fn coalesce(&mut self, b: usize) -> usize {
        let mut start = b;
        let mut size = self.header(b).size();

        let prev_footer = Tag::from_raw(self.arena.read_word(b - OVERHEAD));
        if !prev_footer.is_allocated() {
            let prev = self.prev_block(b);
            self.free.delete(&mut self.arena, prev);
            size += prev_footer.size();
            start = prev;
        }

        let next = start + size;
        let next_header = self.header(next);
        if !next_header.is_allocated() {
            self.free.delete(&mut self.arena, next);
            size += next_header.size();
        }

        self.set_tags(start, size, false);
        self.free.insert(&mut self.arena, start);
        self.free.repair_cursor(start, size);

        start
    }
}
