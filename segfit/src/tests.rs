#![cfg(test)]

use core::ptr::NonNull;

use crate::{Arena, CHUNK_SIZE, Config, DSIZE, Error, Heap, OnViolation, WSIZE};

/// Generates one `#[test]` per scenario, each on a fresh heap over the given
/// arena.
macro_rules! heap_cases {
    ($prefix:ident => |$buf:ident: [u8; $len:expr]| $arena:expr;
     $($case:ident $(($($arg:expr),*))?),* $(,)?) => {
        paste::paste! { $(
            #[test]
            fn [<$prefix _ $case>]() {
                $crate::tests::tracing_init();
                let mut storage = vec![0u8; $len];
                let $buf = &mut storage[..];
                let heap = $crate::tests::heap($arena);
                $crate::tests::$case(heap $($(, $arg)*)?);
            }
        )* }
    };
    ($prefix:ident => $arena:expr;
     $($case:ident $(($($arg:expr),*))?),* $(,)?) => {
        paste::paste! { $(
            #[test]
            fn [<$prefix _ $case>]() {
                $crate::tests::tracing_init();
                let heap = $crate::tests::heap($arena);
                $crate::tests::$case(heap $($(, $arg)*)?);
            }
        )* }
    };
}

mod unix;

pub(crate) fn tracing_init() {
    use tracing_subscriber::{EnvFilter, fmt};
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A seeded heap that checks itself after every call and panics on the
/// first violation.
pub(crate) fn heap<A: Arena>(arena: A) -> Heap<A> {
    let config = Config::new()
        .with_on_violation(OnViolation::Abort)
        .with_self_check(true);
    let mut heap = Heap::with_config(arena, config);
    heap.init().expect("arena too small to seed");
    heap
}

pub(crate) fn offset<A: Arena>(heap: &Heap<A>, ptr: NonNull<u8>) -> usize {
    ptr.addr().get() - heap.arena().base().addr().get()
}

unsafe fn fill(ptr: NonNull<u8>, len: usize, seed: u8) {
    for i in 0..len {
        unsafe { ptr.add(i).write(seed.wrapping_add(i as u8)) };
    }
}

unsafe fn holds(ptr: NonNull<u8>, len: usize, seed: u8) -> bool {
    (0..len).all(|i| unsafe { ptr.add(i).read() } == seed.wrapping_add(i as u8))
}

pub(crate) fn zero_size<A: Arena>(mut heap: Heap<A>) {
    let before = heap.check(true);
    assert_eq!(heap.allocate(0), None);
    assert_eq!(heap.try_allocate(0), Err(Error::ZeroSize));
    unsafe {
        heap.free(None);
        assert_eq!(heap.resize(None, 0), None);
    }
    assert_eq!(heap.check(true), before);
}

pub(crate) fn alignment<A: Arena>(mut heap: Heap<A>) {
    for size in [1, 2, 7, WSIZE, DSIZE, DSIZE + 1, 100, 1000, 3 * CHUNK_SIZE] {
        let p = heap.allocate(size).unwrap();
        assert_eq!(p.addr().get() % DSIZE, 0, "allocate({size})");
        assert!(unsafe { heap.usable_size(p) } >= size);
    }
}

pub(crate) fn reuse_freed<A: Arena>(mut heap: Heap<A>) {
    let a = heap.allocate(16).unwrap();
    let _b = heap.allocate(32).unwrap();
    unsafe { heap.free(Some(a)) };
    let c = heap.allocate(8).unwrap();
    assert_eq!(c, a);
}

pub(crate) fn merge_neighbours<A: Arena>(mut heap: Heap<A>) {
    let [a, b, c, _d] = [40, 40, 40, 40].map(|s| heap.allocate(s).unwrap());
    let block = |heap: &Heap<A>, p| unsafe { heap.usable_size(p) } + DSIZE;
    let (sa, sb, sc) = (block(&heap, a), block(&heap, b), block(&heap, c));

    unsafe {
        heap.free(Some(b));
        heap.free(Some(c));
    }
    let report = heap.check(true);
    let merged = report.block_at(offset(&heap, b)).unwrap();
    assert!(!merged.allocated);
    assert_eq!(merged.size, sb + sc);
    assert!(report.block_at(offset(&heap, c)).is_none());

    unsafe { heap.free(Some(a)) };
    let report = heap.check(true);
    let merged = report.block_at(offset(&heap, a)).unwrap();
    assert!(!merged.allocated);
    assert_eq!(merged.size, sa + sb + sc);
    assert!(report.block_at(offset(&heap, b)).is_none());
}

/// Frees the middle block last so it merges with both free neighbours at once.
pub(crate) fn merge_both_neighbours<A: Arena>(mut heap: Heap<A>) {
    let [a, b, c, _d] = [40, 56, 72, 40].map(|s| heap.allocate(s).unwrap());
    let block = |heap: &Heap<A>, p| unsafe { heap.usable_size(p) } + DSIZE;
    let (sa, sb, sc) = (block(&heap, a), block(&heap, b), block(&heap, c));

    unsafe {
        heap.free(Some(a));
        heap.free(Some(c));
    }
    let report = heap.check(false);
    assert_eq!(report.free_blocks, 3);

    unsafe { heap.free(Some(b)) };
    let report = heap.check(true);
    let merged = report.block_at(offset(&heap, a)).unwrap();
    assert!(!merged.allocated);
    assert_eq!(merged.size, sa + sb + sc);
    assert!(report.block_at(offset(&heap, b)).is_none());
    assert!(report.block_at(offset(&heap, c)).is_none());
    assert_eq!(report.free_blocks, 2);
    assert_eq!(report.listed, 2);
}

pub(crate) fn large_request<A: Arena>(mut heap: Heap<A>) {
    assert_eq!(heap.stats().extensions, 1);

    // The seeded chunk already holds it.
    let a = heap.allocate(4000).unwrap();
    assert!(unsafe { heap.usable_size(a) } >= 4000);
    assert_eq!(heap.stats().extensions, 1);

    let before = heap.stats();
    let b = heap.allocate(5000).unwrap();
    let after = heap.stats();
    assert!(unsafe { heap.usable_size(b) } >= 5000);
    assert_eq!(after.extensions, 2);
    assert!(after.arena_bytes - before.arena_bytes >= (5000 + DSIZE).max(CHUNK_SIZE));
}

pub(crate) fn resize_degenerate<A: Arena>(mut heap: Heap<A>) {
    let empty = heap.check(true);
    let p = unsafe { heap.resize(None, 24) }.unwrap();
    let used = heap.check(true);

    unsafe { heap.free(Some(p)) };
    assert_eq!(heap.check(true), empty);

    let q = heap.allocate(24).unwrap();
    assert_eq!(q, p);
    assert_eq!(heap.check(true), used);

    assert_eq!(unsafe { heap.resize(Some(q), 0) }, None);
    assert_eq!(heap.check(true), empty);
    assert_eq!(heap.stats().live_blocks, 0);
}

pub(crate) fn resize_shrink<A: Arena>(mut heap: Heap<A>) {
    let p = heap.allocate(200).unwrap();
    let guard = heap.allocate(64).unwrap();
    unsafe {
        fill(p, 200, 7);
        fill(guard, 64, 99);
    }
    let free_before = heap.check(false).free_bytes;

    let q = unsafe { heap.resize(Some(p), 40) }.unwrap();
    assert_eq!(q, p);
    unsafe {
        assert!(holds(q, 40, 7));
        assert!(holds(guard, 64, 99));
        let usable = heap.usable_size(q);
        assert!((40..200).contains(&usable));
    }
    assert!(heap.check(false).free_bytes > free_before);
}

pub(crate) fn resize_moves<A: Arena>(mut heap: Heap<A>) {
    let p = heap.allocate(40).unwrap();
    let _guard = heap.allocate(40).unwrap();
    unsafe { fill(p, 40, 11) };

    let q = unsafe { heap.resize(Some(p), 400) }.unwrap();
    assert_ne!(q, p);
    unsafe {
        assert!(holds(q, 40, 11));
        assert!(heap.usable_size(q) >= 400);
    }
    let report = heap.check(true);
    assert!(!report.block_at(offset(&heap, p)).unwrap().allocated);
}

pub(crate) fn resize_absorbs_successor<A: Arena>(mut heap: Heap<A>) {
    let a = heap.allocate(64).unwrap();
    let b = heap.allocate(64).unwrap();
    let _c = heap.allocate(64).unwrap();
    unsafe {
        fill(a, 64, 3);
        heap.free(Some(b));
    }

    let q = unsafe { heap.resize(Some(a), 100) }.unwrap();
    assert_eq!(q, a);
    unsafe {
        assert!(holds(q, 64, 3));
        assert!(heap.usable_size(q) >= 100);
    }
}

pub(crate) fn resize_at_top<A: Arena>(mut heap: Heap<A>) {
    let a = heap.allocate(4000).unwrap();
    unsafe { fill(a, 4000, 42) };
    let extensions = heap.stats().extensions;

    let q = unsafe { heap.resize(Some(a), 8000) }.unwrap();
    assert_eq!(q, a);
    assert_eq!(heap.stats().extensions, extensions + 1);
    unsafe {
        assert!(holds(q, 4000, 42));
        assert!(heap.usable_size(q) >= 8000);
    }
}

pub(crate) fn too_large<A: Arena>(mut heap: Heap<A>) {
    assert!(matches!(
        heap.try_allocate(usize::MAX),
        Err(Error::TooLarge { .. })
    ));
    assert!(matches!(
        heap.try_allocate(usize::MAX / 2),
        Err(Error::Exhausted { .. })
    ));
    assert!(heap.check(false).is_ok());
}

/// Allocates until the arena runs dry, then checks a failed resize leaves
/// its block alone and that freeing everything makes room again.
pub(crate) fn exhaustion<A: Arena>(mut heap: Heap<A>) {
    let mut live = Vec::new();
    loop {
        match heap.try_allocate(1000) {
            Ok(p) => live.push(p),
            Err(err) => {
                assert!(matches!(err, Error::Exhausted { .. }), "{err}");
                break;
            }
        }
    }
    assert!(live.len() > 1);

    let p = live[0];
    unsafe { fill(p, 1000, 5) };
    let cap = heap.arena().capacity();
    assert!(matches!(
        unsafe { heap.try_resize(Some(p), cap) },
        Err(Error::Exhausted { .. })
    ));
    assert!(unsafe { holds(p, 1000, 5) });

    for p in live.drain(..) {
        unsafe { heap.free(Some(p)) };
    }
    let report = heap.check(false);
    assert_eq!(report.blocks, 1);
    assert!(heap.allocate(1000).is_some());
}

/// Replays a seeded mix of calls, verifying every live payload after each
/// step so overlapping blocks show up as clobbered bytes.
pub(crate) fn random_trace<A: Arena>(mut heap: Heap<A>, seed: u64, steps: usize) {
    let mut rng = fastrand::Rng::with_seed(seed);
    let mut live: Vec<(NonNull<u8>, usize, u8)> = Vec::new();

    for step in 0..steps {
        let tag = step as u8;
        let op = if live.is_empty() { 0 } else { rng.u8(..3) };
        match op {
            0 => {
                let size = if rng.u8(..20) == 0 {
                    rng.usize(1024..=4 * CHUNK_SIZE)
                } else {
                    rng.usize(1..=512)
                };
                let Some(p) = heap.allocate(size) else {
                    continue;
                };
                assert_eq!(p.addr().get() % DSIZE, 0);
                unsafe { fill(p, size, tag) };
                live.push((p, size, tag));
            }
            1 => {
                let (p, size, tag) = live.swap_remove(rng.usize(..live.len()));
                assert!(unsafe { holds(p, size, tag) });
                unsafe { heap.free(Some(p)) };
            }
            _ => {
                let i = rng.usize(..live.len());
                let (p, size, old) = live[i];
                let new = rng.usize(1..=2048);
                match unsafe { heap.resize(Some(p), new) } {
                    Some(q) => {
                        assert!(unsafe { holds(q, size.min(new), old) }, "step {step}");
                        unsafe { fill(q, new, tag) };
                        live[i] = (q, new, tag);
                    }
                    None => assert!(unsafe { holds(p, size, old) }),
                }
            }
        }
        for &(p, size, tag) in &live {
            assert!(unsafe { holds(p, size, tag) }, "clobbered at step {step}");
        }
    }

    let mut ranges: Vec<_> = live
        .iter()
        .map(|&(p, _, _)| (p.addr().get(), unsafe { heap.usable_size(p) }))
        .collect();
    ranges.sort_unstable();
    for w in ranges.windows(2) {
        assert!(w[0].0 + w[0].1 <= w[1].0, "{:x?} overlaps {:x?}", w[0], w[1]);
    }

    for (p, _, _) in live {
        unsafe { heap.free(Some(p)) };
    }
    let report = heap.check(false);
    assert_eq!(report.blocks, 1);
    assert_eq!(report.free_blocks, 1);
    assert_eq!(heap.stats().live_blocks, 0);
    assert_eq!(heap.stats().live_bytes, 0);
}
