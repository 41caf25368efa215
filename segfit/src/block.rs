//! Boundary-tag encoding and block navigation.
//!
//! A block is addressed by the offset of its payload from the arena base.
//! The word right before the payload is the header, the last word of the
//! block is the footer; both hold the same [`Tag`].

use core::ptr::NonNull;

/// Word and header/footer size (bytes).
pub const WSIZE: usize = core::mem::size_of::<usize>();
/// Double word, the alignment unit of every block.
pub const DSIZE: usize = 2 * WSIZE;
/// Alignment of every handle the heap returns.
pub const ALIGN: usize = DSIZE;
/// Header, two links and footer.
pub const MIN_BLOCK_SIZE: usize = 2 * DSIZE;
/// Default heap extension granule (bytes).
pub const CHUNK_SIZE: usize = 1 << 12;

bitflags::bitflags! {
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct TagFlags: usize {
        const ALLOCATED = 0x1;
    }
}

/// A packed `(size, flags)` word.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub(crate) struct Tag(usize);

impl Tag {
    const SIZE_MASK: usize = !(DSIZE - 1);

    #[inline]
    pub const fn pack(size: usize, allocated: bool) -> Self {
        debug_assert!(size & !Self::SIZE_MASK == 0, "block size must be aligned");
        let flags = if allocated {
            TagFlags::ALLOCATED.bits()
        } else {
            0
        };
        Self(size | flags)
    }

    #[inline]
    pub const fn from_bits(bits: usize) -> Self {
        Self(bits)
    }

    #[inline]
    pub const fn bits(self) -> usize {
        self.0
    }

    #[inline]
    pub const fn size(self) -> usize {
        self.0 & Self::SIZE_MASK
    }

    #[inline]
    pub const fn flags(self) -> TagFlags {
        TagFlags::from_bits_truncate(self.0)
    }

    #[inline]
    pub const fn is_allocated(self) -> bool {
        self.flags().contains(TagFlags::ALLOCATED)
    }

    /// Low bits set below the alignment unit that are not a known flag.
    #[inline]
    pub const fn stray_bits(self) -> usize {
        self.0 & !Self::SIZE_MASK & !TagFlags::all().bits()
    }
}

impl core::fmt::Debug for Tag {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = if self.is_allocated() { 'a' } else { 'f' };
        write!(f, "[{}:{}]", self.size(), state)
    }
}

/// Arena-relative offset of a block payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub(crate) struct BlockRef(usize);

impl BlockRef {
    #[inline]
    pub const fn new(offset: usize) -> Self {
        Self(offset)
    }

    #[inline]
    pub const fn offset(self) -> usize {
        self.0
    }

    /// Offset of the header word.
    #[inline]
    pub const fn header_of(self) -> usize {
        self.0 - WSIZE
    }
}

/// A block the caller owns. Its payload is opaque to the heap.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct Used {
    pub at: BlockRef,
    pub size: usize,
}

/// A block the heap owns. Only this state exposes the list links.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct Free {
    pub at: BlockRef,
    pub size: usize,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Block {
    Allocated(Used),
    Free(Free),
}

/// Raw view of the arena bytes.
///
/// All reads and writes of tags and links go through here, so bounds can be
/// asserted in one place.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Raw {
    base: NonNull<u8>,
    len: usize,
}

impl Raw {
    #[inline]
    pub const fn new(base: NonNull<u8>, len: usize) -> Self {
        Self { base, len }
    }

    #[inline]
    pub const fn len(self) -> usize {
        self.len
    }

    #[inline]
    pub fn base_addr(self) -> usize {
        self.base.addr().get()
    }

    #[inline]
    pub unsafe fn load(self, off: usize) -> usize {
        debug_assert!(off + WSIZE <= self.len, "load {off} past arena end {}", self.len);
        debug_assert!(off % WSIZE == 0);
        unsafe { self.base.add(off).cast::<usize>().read() }
    }

    #[inline]
    pub unsafe fn store(self, off: usize, val: usize) {
        debug_assert!(off + WSIZE <= self.len, "store {off} past arena end {}", self.len);
        debug_assert!(off % WSIZE == 0);
        unsafe { self.base.add(off).cast::<usize>().write(val) }
    }

    /// Caller-visible address of a block.
    #[inline]
    pub fn ptr(self, b: BlockRef) -> NonNull<u8> {
        unsafe { self.base.add(b.offset()) }
    }

    /// Inverse of [`Raw::ptr`].
    #[inline]
    pub fn block_of(self, ptr: NonNull<u8>) -> BlockRef {
        debug_assert!(ptr.addr() > self.base.addr());
        BlockRef(ptr.addr().get() - self.base_addr())
    }

    #[inline]
    pub unsafe fn header(self, b: BlockRef) -> Tag {
        unsafe { Tag(self.load(b.header_of())) }
    }

    #[inline]
    pub unsafe fn footer_of(self, b: BlockRef) -> usize {
        unsafe { b.offset() + self.size_of(b) - DSIZE }
    }

    #[inline]
    pub unsafe fn footer(self, b: BlockRef) -> Tag {
        unsafe { Tag(self.load(self.footer_of(b))) }
    }

    #[inline]
    pub unsafe fn size_of(self, b: BlockRef) -> usize {
        unsafe { self.header(b).size() }
    }

    #[inline]
    pub unsafe fn is_allocated(self, b: BlockRef) -> bool {
        unsafe { self.header(b).is_allocated() }
    }

    #[inline]
    pub unsafe fn set_header(self, b: BlockRef, tag: Tag) {
        unsafe { self.store(b.header_of(), tag.bits()) }
    }

    /// Writes the same tag at both ends of the block.
    #[inline]
    pub unsafe fn set_tags(self, b: BlockRef, size: usize, allocated: bool) {
        let tag = Tag::pack(size, allocated);
        unsafe {
            self.store(b.header_of(), tag.bits());
            self.store(b.offset() + size - DSIZE, tag.bits());
        }
    }

    /// Must not be called on the epilogue.
    #[inline]
    pub unsafe fn next_block(self, b: BlockRef) -> BlockRef {
        unsafe { BlockRef(b.offset() + self.size_of(b)) }
    }

    /// Must not be called on the prologue.
    #[inline]
    pub unsafe fn prev_block(self, b: BlockRef) -> BlockRef {
        unsafe {
            let size = Tag(self.load(b.offset() - DSIZE)).size();
            BlockRef(b.offset() - size)
        }
    }

    #[inline]
    pub unsafe fn block(self, b: BlockRef) -> Block {
        let tag = unsafe { self.header(b) };
        if tag.is_allocated() {
            Block::Allocated(Used {
                at: b,
                size: tag.size(),
            })
        } else {
            Block::Free(Free {
                at: b,
                size: tag.size(),
            })
        }
    }

    #[inline]
    pub unsafe fn mark_free(self, b: BlockRef, size: usize) -> Free {
        unsafe { self.set_tags(b, size, false) };
        Free { at: b, size }
    }

    #[inline]
    pub unsafe fn mark_used(self, b: BlockRef, size: usize) -> Used {
        unsafe { self.set_tags(b, size, true) };
        Used { at: b, size }
    }

    /// Copies `len` payload bytes, the ranges may overlap.
    #[inline]
    pub unsafe fn copy(self, from: BlockRef, to: BlockRef, len: usize) {
        unsafe { core::ptr::copy(self.ptr(from).as_ptr(), self.ptr(to).as_ptr(), len) }
    }
}
