use core::{
    alloc::{GlobalAlloc, Layout},
    ptr::{self, NonNull},
};

use spin::lock_api::{Mutex, MutexGuard};

use crate::{
    arena::{Arena, Error},
    block::ALIGN,
    config::Config,
    heap::Heap,
};

/// A [`Heap`] behind a spin lock, usable as a `#[global_allocator]`.
///
/// The heap is initialized on first use. Layouts aligned beyond [`ALIGN`]
/// are refused with a null pointer.
///
/// ```rust
/// use core::alloc::{GlobalAlloc, Layout};
/// use segfit::{HeapArena, Locked};
///
/// let heap = Locked::new(HeapArena::new(1 << 20));
/// let layout = Layout::from_size_align(64, 8).unwrap();
/// unsafe {
///     let p = heap.alloc(layout);
///     assert!(!p.is_null());
///     heap.dealloc(p, layout);
/// }
/// ```
pub struct Locked<A: Arena> {
    heap: Mutex<Heap<A>>,
}

impl<A: Arena> Locked<A> {
    #[inline]
    pub const fn new(arena: A) -> Self {
        Self::with_config(arena, Config::DEFAULT)
    }

    #[inline]
    pub const fn with_config(arena: A, config: Config) -> Self {
        Self {
            heap: Mutex::new(Heap::with_config(arena, config)),
        }
    }

    /// Locks the heap, initializing it if needed.
    pub fn lock(&self) -> Result<MutexGuard<'_, Heap<A>>, Error> {
        let mut heap = self.heap.lock();
        if !heap.is_initialized() {
            heap.init()?;
        }
        Ok(heap)
    }

    #[inline]
    pub fn into_inner(self) -> Heap<A> {
        self.heap.into_inner()
    }
}

unsafe impl<A: Arena> GlobalAlloc for Locked<A> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > ALIGN {
            return ptr::null_mut();
        }
        match self.lock() {
            Ok(mut heap) => heap
                .allocate(layout.size().max(1))
                .map_or(ptr::null_mut(), NonNull::as_ptr),
            Err(_) => ptr::null_mut(),
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        if let Ok(mut heap) = self.lock() {
            unsafe { heap.free(NonNull::new(ptr)) }
        }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() > ALIGN {
            return ptr::null_mut();
        }
        match self.lock() {
            Ok(mut heap) => unsafe { heap.resize(NonNull::new(ptr), new_size.max(1)) }
                .map_or(ptr::null_mut(), NonNull::as_ptr),
            Err(_) => ptr::null_mut(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{HeapArena, OnViolation};

    fn locked() -> Locked<HeapArena> {
        Locked::with_config(
            HeapArena::new(1 << 22),
            Config::new()
                .with_on_violation(OnViolation::Abort)
                .with_self_check(true),
        )
    }

    #[test]
    fn lazy_init() {
        let heap = locked();
        assert!(!heap.heap.lock().is_initialized());
        let layout = Layout::from_size_align(8, 8).unwrap();
        let p = unsafe { heap.alloc(layout) };
        assert!(!p.is_null());
        assert!(heap.lock().unwrap().is_initialized());
        unsafe { heap.dealloc(p, layout) };
        assert_eq!(heap.into_inner().stats().live_blocks, 0);
    }

    #[test]
    fn failed_init_does_not_regrow() {
        let mut buf = vec![0u8; 512];
        let heap = Locked::new(crate::SliceArena::new(&mut buf));
        let layout = Layout::from_size_align(8, 8).unwrap();
        assert!(unsafe { heap.alloc(layout) }.is_null());
        let len = heap.heap.lock().arena().len();
        assert!(len > 0);
        for _ in 0..3 {
            assert!(unsafe { heap.alloc(layout) }.is_null());
            assert!(heap.lock().is_err());
        }
        assert_eq!(heap.heap.lock().arena().len(), len);
    }

    #[test]
    fn over_aligned_layouts() {
        let heap = locked();
        let layout = Layout::from_size_align(64, ALIGN * 2).unwrap();
        assert!(unsafe { heap.alloc(layout) }.is_null());

        let layout = Layout::from_size_align(64, ALIGN).unwrap();
        let p = unsafe { heap.alloc(layout) };
        assert_eq!(p.addr() % ALIGN, 0);
        unsafe { heap.dealloc(p, layout) };
    }

    #[test]
    fn realloc_keeps_prefix() {
        let heap = locked();
        let layout = Layout::from_size_align(32, 8).unwrap();
        unsafe {
            let p = heap.alloc(layout);
            for i in 0..32 {
                p.add(i).write(i as u8);
            }
            let _other = heap.alloc(layout);
            let q = heap.realloc(p, layout, 1000);
            assert!(!q.is_null());
            for i in 0..32 {
                assert_eq!(q.add(i).read(), i as u8);
            }
            heap.dealloc(q, Layout::from_size_align(1000, 8).unwrap());
        }
    }

    #[test]
    fn shared_between_threads() {
        let heap = locked();
        std::thread::scope(|s| {
            for t in 0..4u8 {
                let heap = &heap;
                s.spawn(move || {
                    let mut rng = fastrand::Rng::with_seed(t as u64);
                    let mut live = Vec::new();
                    for _ in 0..500 {
                        if live.is_empty() || rng.bool() {
                            let size = rng.usize(1..512);
                            let layout = Layout::from_size_align(size, 8).unwrap();
                            let p = unsafe { heap.alloc(layout) };
                            assert!(!p.is_null());
                            unsafe { p.write_bytes(t, size) };
                            live.push((p, layout));
                        } else {
                            let (p, layout) = live.swap_remove(rng.usize(..live.len()));
                            let bytes = unsafe { core::slice::from_raw_parts(p, layout.size()) };
                            assert!(bytes.iter().all(|&b| b == t));
                            unsafe { heap.dealloc(p, layout) };
                        }
                    }
                    for (p, layout) in live {
                        unsafe { heap.dealloc(p, layout) };
                    }
                });
            }
        });
        let heap = heap.into_inner();
        assert_eq!(heap.stats().live_blocks, 0);
        assert!(heap.check(false).is_ok());
    }
}
