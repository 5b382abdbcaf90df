//! Walks through the life of a few blocks and prints the heap after each
//! step, so the splitting and coalescing is visible.

use tagalloc::{Heap, VecStorage};

fn show(heap: &Heap<VecStorage>, what: &str) {
    let mut out = String::new();
    heap.dump(&mut out).expect("writing to a String");
    println!("--- {what}\n{out}");
}

fn main() {
    let mut heap = Heap::init(VecStorage::new()).expect("initial arena");
    show(&heap, "after init");

    let a = heap.alloc(100).expect("arena can grow");
    let b = heap.alloc(200).expect("arena can grow");
    heap.payload_mut(a)[..13].copy_from_slice(b"boundary tags");
    show(&heap, "after two allocations");

    heap.release(a);
    show(&heap, "after releasing the first block");

    let b = heap.resize(b, 16).expect("shrink never fails");
    show(&heap, "after shrinking the second block in place");

    let c = heap.alloc(64).expect("arena can grow");
    println!("reused block at offset {:#x}", c.offset());
    show(&heap, "after a request that reuses freed space");

    heap.release(b);
    heap.release(c);
    show(&heap, "after releasing everything");

    for problem in heap.check() {
        eprintln!("checker: {problem}");
    }
}
