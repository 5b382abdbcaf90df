//! Read-only diagnostics: a block walk, a textual heap dump and a structural
//! checker. None of these touch allocator state and none sit on the hot
//! path; the checker reports problems as text, never as failures.

use std::fmt;

use crate::{
    arena::Storage,
    block::{ALIGNMENT, MIN_BLOCK_SIZE, NIL, Tag},
    heap::{Heap, INIT_BYTES, PROLOGUE},
    utils::is_aligned,
};

/// One block as seen by [`Heap::blocks`], both boundary tags included so a
/// caller can spot header/footer disagreements itself.
#[derive(Debug, Clone, Copy)]
pub struct BlockInfo {
    /// Payload offset of the block.
    pub offset: usize,
    pub header: Tag,
    pub footer: Tag,
}

impl<S: Storage> Heap<S> {
    /// Walks every block from the prologue to the epilogue inclusive. The
    /// epilogue has no footer of its own; its header is reported twice.
    pub fn blocks(&self) -> impl Iterator<Item = BlockInfo> + '_ {
        let mut offset = PROLOGUE;
        let mut finished = false;

        std::iter::from_fn(move || {
            if finished {
                return None;
            }
            let header = self.header(offset);
            let footer = if header.size() == 0 { header } else { self.footer(offset) };
            let info = BlockInfo { offset, header, footer };

            if header.size() == 0 {
                finished = true;
            } else {
                offset += header.size();
            }
            Some(info)
        })
    }

    /// Writes one line per block: offset, then size and allocated flag as
    /// read from each boundary tag.
    pub fn dump(&self, out: &mut impl fmt::Write) -> fmt::Result {
        writeln!(out, "heap of {} bytes:", self.arena_len())?;
        for block in self.blocks() {
            if block.header.size() == 0 {
                writeln!(out, "{:#010x}: end of heap", block.offset)?;
                continue;
            }
            writeln!(
                out,
                "{:#010x}: header [{}:{}] footer [{}:{}]",
                block.offset,
                block.header.size(),
                if block.header.is_allocated() { 'a' } else { 'f' },
                block.footer.size(),
                if block.footer.is_allocated() { 'a' } else { 'f' },
            )?;
        }
        Ok(())
    }

    /// Checks the whole heap structure and returns every violation found,
    /// one message each. An empty vector means the heap is consistent.
    pub fn check(&self) -> Vec<String> {
        let mut report = Vec::new();

        let prologue = self.header(PROLOGUE);
        if prologue.size() != MIN_BLOCK_SIZE || !prologue.is_allocated() {
            report.push(format!("bad prologue header: {prologue:?}"));
        }

        let mut previous_free = false;
        let mut real_bytes = 0;
        let mut free_in_walk = Vec::new();
        let mut last = None;

        for block in self.blocks() {
            let b = block.offset;
            if !is_aligned(b, ALIGNMENT) {
                report.push(format!("block {b:#x} is not {ALIGNMENT}-byte aligned"));
            }
            if block.header != block.footer {
                report.push(format!(
                    "block {b:#x}: header {:?} does not match footer {:?}",
                    block.header, block.footer,
                ));
            }

            let free = !block.header.is_allocated();
            if free && previous_free {
                report.push(format!("block {b:#x} and its predecessor are both free"));
            }
            previous_free = free;

            if b != PROLOGUE && block.header.size() != 0 {
                real_bytes += block.header.size();
                if free {
                    free_in_walk.push(b);
                }
            }
            last = Some(block);
        }

        match last {
            Some(epilogue) if epilogue.header.size() == 0 && epilogue.header.is_allocated() => {}
            other => report.push(format!("bad epilogue: {other:?}")),
        }

        let extended = self.arena_len() - INIT_BYTES;
        if real_bytes != extended {
            report.push(format!(
                "block sizes sum to {real_bytes} but {extended} bytes were extended",
            ));
        }

        // Free-list membership must agree with the allocated flags.
        let mut in_list: Vec<usize> = self.free.iter(&self.arena).collect();
        for &b in &in_list {
            if self.header(b).is_allocated() {
                report.push(format!("free list holds allocated block {b:#x}"));
            }
        }
        in_list.sort_unstable();
        let mut in_walk = free_in_walk.clone();
        in_walk.sort_unstable();
        if in_list != in_walk {
            report.push(format!(
                "free list {in_list:x?} disagrees with free blocks in the walk {in_walk:x?}",
            ));
        }

        let cursor = self.free.cursor;
        if cursor != NIL && !in_list.contains(&cursor) {
            report.push(format!("search cursor {cursor:#x} is not a free-list node"));
        }

        report
    }
}
