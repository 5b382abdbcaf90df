use std::fmt;

use thiserror::Error;

use crate::block::WORD;

/// Returned by [`Storage::grow`] when the backing resource is out of room.
/// The allocator turns this into a `None` from `alloc`/`resize`; it never
/// escalates into a panic.
#[derive(Debug, Error)]
#[error("arena storage exhausted while extending by {requested} bytes")]
pub struct ArenaExhausted {
    /// The extension that could not be satisfied, in bytes.
    pub requested: usize,
}

/// The arena growth primitive. This is the allocator's only seam to the
/// outside world, the same seam the platform trait draws in a kernel-backed
/// allocator: "extend the heap by N bytes, or fail".
///
/// Implementations grow at the high end only and never shrink. Growth may
/// fail when a resource limit is reached; it must never fail for alignment
/// reasons.
pub trait Storage {
    /// Current length of the backing bytes.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Extends the storage by exactly `additional` bytes of zeroed (or at
    /// least readable and writable) memory at the high end.
    fn grow(&mut self, additional: usize) -> Result<(), ArenaExhausted>;

    fn bytes(&self) -> &[u8];

    fn bytes_mut(&mut self) -> &mut [u8];
}

/// The default backing: an owned, resizable byte buffer with an optional
/// hard byte limit. The limit makes resource exhaustion deterministic, which
/// is how the tests drive every growth-failure path.
pub struct VecStorage {
    buf: Vec<u8>,
    limit: usize,
}

impl VecStorage {
    /// Storage bounded only by what the process can actually reserve.
    pub fn new() -> Self {
        Self::with_limit(usize::MAX)
    }

    /// Storage that refuses to grow past `limit` total bytes.
    pub fn with_limit(limit: usize) -> Self {
        Self { buf: Vec::new(), limit }
    }
}

impl Default for VecStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for VecStorage {
    fn len(&self) -> usize {
        self.buf.len()
    }

    fn grow(&mut self, additional: usize) -> Result<(), ArenaExhausted> {
        let exhausted = ArenaExhausted { requested: additional };

        let new_len = self.buf.len().checked_add(additional).ok_or(exhausted)?;
        if new_len > self.limit {
            return Err(ArenaExhausted { requested: additional });
        }

        self.buf
            .try_reserve_exact(additional)
            .map_err(|_| ArenaExhausted { requested: additional })?;
        self.buf.resize(new_len, 0);

        Ok(())
    }

    fn bytes(&self) -> &[u8] {
        &self.buf
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

/// The arena itself: a [`Storage`] viewed as a flat word-addressable space.
///
/// Everything above this layer works in offsets, so regrowth of the backing
/// buffer can never invalidate a block handle. All accessors are
/// bounds-checked through plain slice indexing.
pub(crate) struct Arena<S> {
    storage: S,
}

impl<S: Storage> Arena<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn grow(&mut self, additional: usize) -> Result<(), ArenaExhausted> {
        self.storage.grow(additional)
    }

    /// Reads the machine word at byte offset `ofs`.
    pub fn read_word(&self, ofs: usize) -> usize {
        let mut word = [0u8; WORD];
        word.copy_from_slice(&self.storage.bytes()[ofs..ofs + WORD]);
        usize::from_ne_bytes(word)
    }

    /// Writes the machine word at byte offset `ofs`.
    pub fn write_word(&mut self, ofs: usize, value: usize) {
        self.storage.bytes_mut()[ofs..ofs + WORD].copy_from_slice(&value.to_ne_bytes());
    }

    pub fn bytes(&self) -> &[u8] {
        self.storage.bytes()
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        self.storage.bytes_mut()
    }
}

impl<S: Storage> fmt::Debug for Arena<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena").field("len", &self.len()).finish()
    }
}
