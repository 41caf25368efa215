#![cfg(feature = "unix")]
#![cfg(test)]

use crate::MmapArena;
use crate::tests::{self, tracing_init};

const SIZE: usize = 8 << 20;

heap_cases! {
    mmap => MmapArena::new(SIZE).expect("should map");
    zero_size,
    alignment,
    merge_neighbours,
    merge_both_neighbours,
    large_request,
    resize_shrink,
    resize_moves,
    resize_at_top,
    too_large,
    random_trace(0x3a9, 5000),
}

#[test]
fn mmap_exhaustion() {
    tracing_init();
    let arena = MmapArena::new(16 << 10).expect("should map");
    tests::exhaustion(tests::heap(arena));
}

#[test]
fn mmap_commits_lazily() {
    tracing_init();
    let mut heap = tests::heap(MmapArena::new(SIZE).expect("should map"));
    let seeded = heap.arena().committed();
    assert!(seeded < SIZE);

    let p = heap.allocate(1 << 20).unwrap();
    unsafe { p.as_ptr().write_bytes(0xCD, 1 << 20) };
    assert!(heap.arena().committed() > seeded + (1 << 20) - 4096);
}
