use std::hint::black_box;
use std::ptr::NonNull;
use std::time::{Duration, Instant};

use segfit::{Heap, HeapArena};

use crate::{ARENA, Op, SLOTS};

fn replay(heap: &mut Heap<HeapArena>, ops: &[Op], slots: &mut [Option<NonNull<u8>>; SLOTS]) {
    for op in ops {
        match *op {
            Op::Alloc { slot, size } => {
                let p = heap.allocate(size).expect("arena exhausted");
                unsafe { p.write(black_box(slot as u8)) };
                slots[slot] = Some(p);
            }
            Op::Free { slot } => unsafe { heap.free(slots[slot].take()) },
            Op::Realloc { slot, size } => {
                let p = unsafe { heap.resize(slots[slot], size) }.expect("arena exhausted");
                assert_eq!(unsafe { p.read() }, slot as u8);
                slots[slot] = Some(p);
            }
        }
    }
}

/// Calls [`Heap`] directly, no lock in between.
pub(crate) fn bench(ops: &[Op], iters: usize) -> Duration {
    let mut heap = Heap::new(HeapArena::new(ARENA));
    heap.init().expect("arena too small");
    let mut slots = [None; SLOTS];

    let start = Instant::now();
    for _ in 0..iters {
        replay(&mut heap, ops, &mut slots);
    }
    let elapsed = start.elapsed();

    debug_assert!(heap.check(false).is_ok());
    elapsed
}
