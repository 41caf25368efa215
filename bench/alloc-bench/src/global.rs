use std::alloc::{GlobalAlloc, Layout, System};
use std::hint::black_box;
use std::ptr;
use std::time::{Duration, Instant};

use segfit::{Locked, MmapArena};

use crate::{ARENA, Op, SLOTS};

fn layout(size: usize) -> Layout {
    Layout::from_size_align(size, 8).expect("bad layout")
}

fn replay<G: GlobalAlloc>(g: &G, ops: &[Op], slots: &mut [(*mut u8, usize); SLOTS]) {
    for op in ops {
        match *op {
            Op::Alloc { slot, size } => {
                let p = unsafe { g.alloc(layout(size)) };
                assert!(!p.is_null(), "allocator exhausted");
                unsafe { p.write(black_box(slot as u8)) };
                slots[slot] = (p, size);
            }
            Op::Free { slot } => {
                let (p, size) = slots[slot];
                unsafe { g.dealloc(p, layout(size)) };
                slots[slot] = (ptr::null_mut(), 0);
            }
            Op::Realloc { slot, size } => {
                let (p, old) = slots[slot];
                let p = unsafe { g.realloc(p, layout(old), size) };
                assert!(!p.is_null(), "allocator exhausted");
                assert_eq!(unsafe { p.read() }, slot as u8);
                slots[slot] = (p, size);
            }
        }
    }
}

fn run<G: GlobalAlloc>(g: &G, ops: &[Op], iters: usize) -> Duration {
    let mut slots = [(ptr::null_mut(), 0); SLOTS];
    let start = Instant::now();
    for _ in 0..iters {
        replay(g, ops, &mut slots);
    }
    start.elapsed()
}

/// The platform allocator, as a baseline.
pub(crate) fn system(ops: &[Op], iters: usize) -> Duration {
    run(&System, ops, iters)
}

/// [`Locked`] over an mmap arena, through the `GlobalAlloc` interface.
pub(crate) fn locked(ops: &[Op], iters: usize) -> Duration {
    let heap = Locked::new(MmapArena::new(ARENA).expect("should map"));
    run(&heap, ops, iters)
}
