use core::{alloc::Layout, marker::PhantomData, ptr::NonNull};

use crate::block::ALIGN;

/// Default capacity of a [`HeapArena`], 20 MiB.
pub const DEFAULT_CAPACITY: usize = 20 << 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The arena refused to grow any further.
    Exhausted {
        /// The requested size
        requested: usize,
        /// The remaining size
        available: usize,
    },
    /// The adjusted block size does not fit in a `usize`.
    TooLarge { requested: usize },
    /// Zero bytes were requested.
    ZeroSize,
    /// The heap was used before [`Heap::init`](crate::Heap::init).
    Uninitialized,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Exhausted {
                requested,
                available,
            } => write!(
                f,
                "Arena exhausted: requested {} bytes, but only {} is available",
                requested, available
            ),
            Self::TooLarge { requested } => {
                write!(f, "Allocation failed: {} bytes is too large", requested)
            }
            Self::ZeroSize => write!(f, "Allocation failed: zero-size request"),
            Self::Uninitialized => write!(f, "Heap is not initialized"),
        }
    }
}

impl core::error::Error for Error {}

/// A contiguous byte region that only grows at its end.
///
/// # Safety
///
/// Implementors must guarantee that:
/// - `base` is aligned to [`ALIGN`] and never changes for the life of the arena,
/// - the bytes `[base, base + len)` are valid for reads and writes,
/// - `grow` either extends `len` by exactly `incr` bytes or fails without
///   touching the region.
pub unsafe trait Arena {
    /// Start of the region.
    fn base(&self) -> NonNull<u8>;

    /// Number of bytes handed out so far.
    fn len(&self) -> usize;

    /// Upper bound of [`len`](Arena::len).
    fn capacity(&self) -> usize;

    /// Extends the region by `incr` bytes, returning the old length.
    fn grow(&mut self, incr: usize) -> Result<usize, Error>;

    #[inline]
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    fn available(&self) -> usize {
        self.capacity() - self.len()
    }
}

/// Bumps the break of a fixed region, failing past `cap`.
#[inline]
fn bump(brk: &mut usize, cap: usize, incr: usize) -> Result<usize, Error> {
    let old = *brk;
    match old.checked_add(incr) {
        Some(new) if new <= cap => {
            *brk = new;
            Ok(old)
        }
        _ => Err(Error::Exhausted {
            requested: incr,
            available: cap - old,
        }),
    }
}

/// An arena over a borrowed buffer.
///
/// The usable region starts at the first [`ALIGN`]ed byte of the buffer.
pub struct SliceArena<'a> {
    base: NonNull<u8>,
    cap: usize,
    brk: usize,
    _marker: PhantomData<&'a mut [u8]>,
}

unsafe impl Send for SliceArena<'_> {}

impl<'a> SliceArena<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        let start = buf.as_mut_ptr().addr();
        let skip = memory_addr::align_up(start, ALIGN) - start;
        let cap = buf.len().saturating_sub(skip);
        let skip = skip.min(buf.len());
        // SAFETY: `skip <= buf.len()`, so the pointer stays inside or one past the buffer.
        let base = unsafe { NonNull::new_unchecked(buf.as_mut_ptr().add(skip)) };
        Self {
            base,
            cap,
            brk: 0,
            _marker: PhantomData,
        }
    }
}

impl core::fmt::Debug for SliceArena<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SliceArena")
            .field("base", &self.base)
            .field("len", &self.brk)
            .field("capacity", &self.cap)
            .finish()
    }
}

unsafe impl Arena for SliceArena<'_> {
    #[inline]
    fn base(&self) -> NonNull<u8> {
        self.base
    }

    #[inline]
    fn len(&self) -> usize {
        self.brk
    }

    #[inline]
    fn capacity(&self) -> usize {
        self.cap
    }

    fn grow(&mut self, incr: usize) -> Result<usize, Error> {
        bump(&mut self.brk, self.cap, incr)
    }
}

/// An arena owning a fixed-capacity buffer taken from the global allocator.
pub struct HeapArena {
    base: NonNull<u8>,
    cap: usize,
    brk: usize,
}

unsafe impl Send for HeapArena {}

impl HeapArena {
    /// Largest buffer a layout can describe.
    pub const MAX_CAPACITY: usize = isize::MAX as usize & !(ALIGN - 1);

    /// Reserves `capacity` bytes up front, rounded up to [`ALIGN`] and capped
    /// at [`MAX_CAPACITY`](Self::MAX_CAPACITY).
    ///
    /// Aborts through [`handle_alloc_error`](alloc::alloc::handle_alloc_error)
    /// if the global allocator cannot provide them.
    pub fn new(capacity: usize) -> Self {
        let cap = Self::capacity_for(capacity);
        // `cap` is a non-zero multiple of `ALIGN` no larger than `isize::MAX`.
        let layout = unsafe { Layout::from_size_align_unchecked(cap, ALIGN) };
        let base = NonNull::new(unsafe { alloc::alloc::alloc(layout) })
            .unwrap_or_else(|| alloc::alloc::handle_alloc_error(layout));
        Self { base, cap, brk: 0 }
    }

    #[inline]
    const fn capacity_for(capacity: usize) -> usize {
        if capacity > Self::MAX_CAPACITY {
            Self::MAX_CAPACITY
        } else if capacity < ALIGN {
            ALIGN
        } else {
            memory_addr::align_up(capacity, ALIGN)
        }
    }
}

impl Default for HeapArena {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl Drop for HeapArena {
    fn drop(&mut self) {
        unsafe {
            // Validated in `new`.
            let layout = Layout::from_size_align_unchecked(self.cap, ALIGN);
            alloc::alloc::dealloc(self.base.as_ptr(), layout)
        }
    }
}

impl core::fmt::Debug for HeapArena {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HeapArena")
            .field("base", &self.base)
            .field("len", &self.brk)
            .field("capacity", &self.cap)
            .finish()
    }
}

unsafe impl Arena for HeapArena {
    #[inline]
    fn base(&self) -> NonNull<u8> {
        self.base
    }

    #[inline]
    fn len(&self) -> usize {
        self.brk
    }

    #[inline]
    fn capacity(&self) -> usize {
        self.cap
    }

    fn grow(&mut self, incr: usize) -> Result<usize, Error> {
        bump(&mut self.brk, self.cap, incr)
    }
}
