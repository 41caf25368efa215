#![cfg(feature = "unix")]

use core::{ffi::c_void, num::NonZeroUsize, ptr::NonNull};

use nix::sys::mman::{self, MapFlags, ProtFlags};

use crate::arena::{Arena, Error};

/// An arena over an anonymous private mapping.
///
/// The whole capacity is reserved inaccessible up front and pages are made
/// readable and writable as the break moves past them, so the base never
/// moves and untouched capacity costs nothing.
pub struct MmapArena {
    base: NonNull<u8>,
    cap: usize,
    brk: usize,
    committed: usize,
}

unsafe impl Send for MmapArena {}

impl MmapArena {
    /// Reserves `capacity` bytes, rounded up to whole pages.
    pub fn new(capacity: usize) -> nix::Result<Self> {
        let cap = NonZeroUsize::new(memory_addr::align_up_4k(capacity)).ok_or(nix::Error::EINVAL)?;
        let ptr = unsafe {
            mman::mmap_anonymous(None, cap, ProtFlags::PROT_NONE, MapFlags::MAP_PRIVATE)?
        };

        #[cfg(feature = "tracing")]
        tracing::debug!("[Mmap]: reserved {} bytes at {:p}", cap, ptr);

        Ok(Self {
            base: ptr.cast(),
            cap: cap.get(),
            brk: 0,
            committed: 0,
        })
    }

    /// Bytes currently readable and writable.
    #[inline]
    pub fn committed(&self) -> usize {
        self.committed
    }

    fn commit(&mut self, upto: usize) -> nix::Result<()> {
        let end = memory_addr::align_up_4k(upto).min(self.cap);
        if end <= self.committed {
            return Ok(());
        }
        let start = unsafe { self.base.add(self.committed) }.cast::<c_void>();
        unsafe {
            mman::mprotect(
                start,
                end - self.committed,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
            )?
        };
        self.committed = end;
        Ok(())
    }
}

impl core::fmt::Debug for MmapArena {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MmapArena")
            .field("base", &self.base)
            .field("len", &self.brk)
            .field("committed", &self.committed)
            .field("capacity", &self.cap)
            .finish()
    }
}

unsafe impl Arena for MmapArena {
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
        let exhausted = Error::Exhausted {
            requested: incr,
            available: self.cap - self.brk,
        };
        let new = match self.brk.checked_add(incr) {
            Some(new) if new <= self.cap => new,
            _ => return Err(exhausted),
        };
        if let Err(_e) = self.commit(new) {
            #[cfg(feature = "tracing")]
            tracing::warn!("[Mmap]: mprotect failed: {}", _e);
            return Err(exhausted);
        }
        let old = self.brk;
        self.brk = new;
        Ok(old)
    }
}

impl Drop for MmapArena {
    fn drop(&mut self) {
        if let Err(_e) = unsafe { mman::munmap(self.base.cast(), self.cap) } {
            #[cfg(feature = "tracing")]
            tracing::warn!("[Mmap]: munmap failed: {}", _e);
        }
    }
}
