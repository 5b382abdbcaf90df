//! A boundary-tag heap allocator over a single growable arena.
//!
//! The arena is a flat byte buffer that only ever grows at its high end.
//! Every block carries its size and allocated flag in a pair of boundary
//! tags (header + footer), free blocks are chained into an explicit doubly
//! linked free list, and freed blocks are immediately
//! coalesced with free neighbors, so no two adjacent free blocks ever
//! coexist:
//!
//! ```text
//!  +-----+----------+--------+--------+--------+--------+----------+
//!  | pad | prologue | alloc  |  free  | alloc  |  free  | epilogue |
//!  +-----+----------+--------+--------+--------+--------+----------+
//!                       ^        |                 ^
//!                       |        +--- free list ---+
//!                  BlockHandle
//! ```
//!
//! Allocations are identified by [`BlockHandle`]s (offsets into the arena,
//! stable across growth) and their bytes reached through
//! [`Heap::payload`]/[`Heap::payload_mut`]. All allocator state lives in one
//! [`Heap`] value, so independent heaps can coexist and tests stay
//! deterministic.
//!
//! The placement policy is first-fit by default; building with the
//! `next-fit` feature switches to a resume-scan search that trades space
//! utilization for cheaper average searches.
//!
//! ```
//! use tagalloc::{Heap, VecStorage};
//!
//! let mut heap = Heap::init(VecStorage::new())?;
//! let block = heap.alloc(100).expect("arena can grow");
//! heap.payload_mut(block)[..5].copy_from_slice(b"hello");
//!
//! let block = heap.resize(block, 500).expect("arena can grow");
//! assert_eq!(b"hello", &heap.payload(block)[..5]);
//! heap.release(block);
//! # Ok::<(), tagalloc::AllocError>(())
//! ```
//!
//! Single-threaded by design: nothing in here locks, and a `Heap` shared
//! between threads needs caller-supplied mutual exclusion.

mod arena;
mod block;
mod debug;
mod freelist;
mod heap;
#[cfg(any(unix, windows))]
mod kernel;
mod utils;

pub use arena::{ArenaExhausted, Storage, VecStorage};
pub use block::{BlockHandle, Tag};
pub use debug::BlockInfo;
pub use heap::{AllocError, Heap};
#[cfg(any(unix, windows))]
pub use kernel::SystemStorage;
