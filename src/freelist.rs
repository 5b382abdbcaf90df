use log::trace;

use crate::{
    arena::{Arena, Storage},
    block::{NIL, Tag, WORD, header_offset},
};

/// The explicit free list: a doubly linked list threaded through the free
/// blocks themselves.
///
/// We don't need to store any additional content for blocks which are free.
/// We just need to keep track of them, so both links live inside the block's
/// own payload, as arena offsets:
///
/// ```text
/// +------------------------+ <--------+
/// |         header         |          | -> boundary tag
/// +------------------------+ <--------+
/// |          next          |          |
/// +------------------------+          | -> links, only meaningful
/// |          prev          |          |    while the block is free
/// +------------------------+ <--------+
/// |                        |
/// |     rest of payload    |
/// |        (unused)        |
/// +------------------------+
/// |         footer         |
/// +------------------------+
/// ```
///
/// The list is anchored by the prologue block, whose two payload words act
/// as the sentinel's links. Insertion is always at the head, so the list is
/// ordered most-recently-freed-first, not by address:
///
/// ```text
///                          next                      next
///               +------------------------+  +------------------+
///               |                        |  |                  |
/// +----------+  |  +------+   +------+   |  |  +------+   +------+
/// | sentinel |--+  | used |   | free |---+  +--| free |   | used |  ...
/// +----------+     +------+   +------+         +------+   +------+
/// ```
///
/// Under the `next-fit` build the list also carries a search cursor marking
/// where the previous search stopped. The cursor is repaired on every
/// [`delete`](Self::delete) and every merge so it can never dangle into
/// memory that changed meaning; with first-fit it simply stays [`NIL`].
pub(crate) struct FreeList {
    /// Payload offset of the prologue block, whose links anchor the list.
    sentinel: usize,
    /// Where the last resume-scan search stopped, or [`NIL`].
    pub(crate) cursor: usize,
}

impl FreeList {
    pub fn new(sentinel: usize) -> Self {
        Self { sentinel, cursor: NIL }
    }

    fn next_of<S: Storage>(arena: &Arena<S>, b: usize) -> usize {
        arena.read_word(b)
    }

    fn set_next<S: Storage>(arena: &mut Arena<S>, b: usize, to: usize) {
        arena.write_word(b, to);
    }

    fn prev_of<S: Storage>(arena: &Arena<S>, b: usize) -> usize {
        arena.read_word(b + WORD)
    }

    fn set_prev<S: Storage>(arena: &mut Arena<S>, b: usize, to: usize) {
        arena.write_word(b + WORD, to);
    }

    /// Pushes the free block at `b` onto the head of the list. O(1): only
    /// the sentinel's forward link and the former head's backward link move.
    pub fn insert<S: Storage>(&self, arena: &mut Arena<S>, b: usize) {
        trace!("free list: insert {b:#x} at head");

        let head = Self::next_of(arena, self.sentinel);
        Self::set_next(arena, b, head);
        if head != NIL {
            Self::set_prev(arena, head, b);
        }
        Self::set_prev(arena, b, self.sentinel);
        Self::set_next(arena, self.sentinel, b);
    }

    /// Unlinks the block at `b` in O(1) using its own stored links.
    ///
    /// If the cursor currently sits on `b` it is advanced to `b`'s successor
    /// first, so it never references a node that has left the list.
    pub fn delete<S: Storage>(&mut self, arena: &mut Arena<S>, b: usize) {
        trace!("free list: delete {b:#x}");

        if self.cursor == b {
            self.cursor = Self::next_of(arena, b);
        }

        let next = Self::next_of(arena, b);
        let prev = Self::prev_of(arena, b);
        Self::set_next(arena, prev, next);
        if next != NIL {
            Self::set_prev(arena, next, prev);
        }
    }

    /// Repositions the cursor after blocks in `merged..merged + size` were
    /// coalesced into the single free block at `merged`. A cursor strictly
    /// inside that extent would reference memory that changed meaning.
    pub fn repair_cursor(&mut self, merged: usize, size: usize) {
        if self.cursor > merged && self.cursor < merged + size {
            self.cursor = merged;
        }
    }

    fn block_size<S: Storage>(arena: &Arena<S>, b: usize) -> usize {
        Tag::from_raw(arena.read_word(header_offset(b))).size()
    }

    /// First-fit search policy: scan from the head, return the first block
    /// whose size covers `adjusted`. `None` tells the caller to extend the
    /// arena.
    #[cfg(not(feature = "next-fit"))]
    pub fn find_fit<S: Storage>(&mut self, arena: &Arena<S>, adjusted: usize) -> Option<usize> {
        let mut b = Self::next_of(arena, self.sentinel);
        while b != NIL {
            if Self::block_size(arena, b) >= adjusted {
                return Some(b);
            }
            b = Self::next_of(arena, b);
        }

        None
    }

    /// Resume-scan ("next-fit") search policy: scan from the saved cursor to
    /// the end of the list, then wrap and scan from the head up to the
    /// original cursor position. Amortizes search cost across calls at the
    /// price of worse utilization.
    #[cfg(feature = "next-fit")]
    pub fn find_fit<S: Storage>(&mut self, arena: &Arena<S>, adjusted: usize) -> Option<usize> {
        let origin = self.cursor;

        let mut b = if origin == NIL { Self::next_of(arena, self.sentinel) } else { origin };
        while b != NIL {
            if Self::block_size(arena, b) >= adjusted {
                self.cursor = b;
                return Some(b);
            }
            b = Self::next_of(arena, b);
        }

        if origin == NIL {
            // The first pass already covered the whole list.
            return None;
        }

        let mut b = Self::next_of(arena, self.sentinel);
        while b != NIL && b != origin {
            if Self::block_size(arena, b) >= adjusted {
                self.cursor = b;
                return Some(b);
            }
            b = Self::next_of(arena, b);
        }

        None
    }

    /// Walks the list head to tail. Diagnostics and tests only.
    pub fn iter<'a, S: Storage>(&self, arena: &'a Arena<S>) -> impl Iterator<Item = usize> + 'a {
        let first = Self::next_of(arena, self.sentinel);
        std::iter::successors((first != NIL).then_some(first), move |&b| {
            let next = Self::next_of(arena, b);
            (next != NIL).then_some(next)
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::{VecStorage, heap::Heap};

    fn free_offsets(heap: &Heap<VecStorage>) -> Vec<usize> {
        heap.free.iter(&heap.arena).collect()
    }

    #[test]
    fn freed_blocks_are_pushed_at_the_head() {
        let mut heap = Heap::init(VecStorage::new()).unwrap();
        let a = heap.alloc(10).unwrap();
        let b = heap.alloc(10).unwrap();
        let c = heap.alloc(10).unwrap();

        // b and the epilogue keep a and c from coalescing with each other.
        heap.release(a);
        heap.release(c);
        let _keep_alive = b;

        assert_eq!(vec![c.offset(), a.offset()], free_offsets(&heap));
    }

    #[cfg(not(feature = "next-fit"))]
    #[test]
    fn first_fit_prefers_the_most_recently_freed_block() {
        let mut heap = Heap::init(VecStorage::new()).unwrap();
        let a = heap.alloc(10).unwrap();
        let b = heap.alloc(10).unwrap();
        let c = heap.alloc(10).unwrap();
        let _keep_alive = b;

        heap.release(a);
        heap.release(c);

        // Both free blocks fit; the head of the list (c, freed last) wins
        // even though a sits at a lower address.
        assert_eq!(c, heap.alloc(10).unwrap());
    }

    #[cfg(feature = "next-fit")]
    #[test]
    fn next_fit_resumes_from_the_cursor() {
        let mut heap = Heap::init(VecStorage::new()).unwrap();
        let mut handles = Vec::new();
        for _ in 0..3 {
            handles.push(heap.alloc(10).unwrap());
            // Allocated spacers keep the freed blocks from coalescing.
            heap.alloc(10).unwrap();
        }
        let &[f1, f2, f3] = &handles[..] else { unreachable!() };
        heap.release(f1);
        heap.release(f2);
        heap.release(f3);

        // List is [f3, f2, f1]. The first search takes f3 and the cursor
        // moves on to f2, then the second takes f2 and moves on to f1.
        assert_eq!(f3, heap.alloc(10).unwrap());
        assert_eq!(f2, heap.alloc(10).unwrap());
        assert_eq!(f1.offset(), heap.free.cursor);

        // A newly freed block lands at the head, but the search resumes at
        // the cursor: f1 wins over the fresher block first-fit would pick.
        heap.release(f3);
        assert_eq!(f1, heap.alloc(10).unwrap());
    }

    #[cfg(feature = "next-fit")]
    #[test]
    fn next_fit_wraps_back_to_the_head() {
        let mut heap = Heap::init(VecStorage::new()).unwrap();
        let s1 = heap.alloc(10).unwrap();
        heap.alloc(10).unwrap();
        let big = heap.alloc(200).unwrap();
        heap.alloc(10).unwrap();
        let s2 = heap.alloc(10).unwrap();
        heap.alloc(10).unwrap();

        heap.release(s2);
        heap.release(big);
        heap.release(s1);

        // List is [s1, big, s2]. Taking s1 parks the cursor on big; the next
        // request splits big and leaves the cursor on s2, with the 192-byte
        // remainder sitting at the head, *behind* the cursor.
        assert_eq!(s1, heap.alloc(10).unwrap());
        let carved = heap.alloc(10).unwrap();
        assert_eq!(big, carved);
        assert_eq!(s2.offset(), heap.free.cursor);

        // Nothing fits between the cursor and the tail, so the search must
        // wrap to the head and find the remainder instead of extending.
        let len_before = heap.arena.len();
        let wrapped = heap.alloc(150).unwrap();
        assert_eq!(big.offset() + 48, wrapped.offset());
        assert_eq!(len_before, heap.arena.len());
    }

    #[cfg(feature = "next-fit")]
    #[test]
    fn cursor_advances_when_its_block_is_taken() {
        let mut heap = Heap::init(VecStorage::new()).unwrap();
        let a = heap.alloc(10).unwrap();
        heap.alloc(10).unwrap();
        let b = heap.alloc(10).unwrap();
        heap.alloc(10).unwrap();

        heap.release(a);
        heap.release(b);

        // Search sets the cursor onto b, then place() deletes b; the cursor
        // must move to b's list successor, a.
        assert_eq!(b, heap.alloc(10).unwrap());
        assert_eq!(a.offset(), heap.free.cursor);
    }

    #[cfg(feature = "next-fit")]
    #[test]
    fn cursor_survives_interleaved_deletes_and_merges() {
        let mut heap = Heap::init(VecStorage::new()).unwrap();
        let a = heap.alloc(10).unwrap();
        let b = heap.alloc(10).unwrap();
        let c = heap.alloc(10).unwrap();
        heap.alloc(10).unwrap();

        heap.release(a);
        heap.release(c);
        // Park the cursor on c by allocating into it, then freeing it back.
        assert_eq!(c, heap.alloc(10).unwrap());
        assert_eq!(a.offset(), heap.free.cursor);

        // Freeing b merges a, b and c into one block starting at a. The
        // cursor pointed at a, which the merge consumed via delete().
        heap.release(c);
        heap.release(b);

        let live: Vec<usize> = heap.free.iter(&heap.arena).collect();
        assert!(
            heap.free.cursor == crate::block::NIL || live.contains(&heap.free.cursor),
            "cursor {:#x} dangles outside the free list {live:x?}",
            heap.free.cursor,
        );
    }
}
