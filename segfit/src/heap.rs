use core::ptr::NonNull;

use crate::{
    arena::{Arena, Error},
    block::{Block, BlockRef, DSIZE, Free, MIN_BLOCK_SIZE, Raw, Tag, Used, WSIZE},
    check::{self, Report},
    config::Config,
    list::FreeLists,
};

/// Padding word, class sentinels, prologue header and footer, epilogue header.
const INIT_SIZE: usize = WSIZE + FreeLists::TABLE_SIZE + 3 * WSIZE;

/// Block size for a payload of `size` bytes: tags added, rounded to the
/// double word, at least [`MIN_BLOCK_SIZE`].
#[inline]
const fn adjust(size: usize) -> Result<usize, Error> {
    if size <= DSIZE {
        return Ok(MIN_BLOCK_SIZE);
    }
    match size.checked_add(DSIZE + (DSIZE - 1)) {
        Some(n) => Ok(DSIZE * (n / DSIZE)),
        None => Err(Error::TooLarge { requested: size }),
    }
}

/// Counters kept by a [`Heap`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Bytes taken from the arena, metadata included.
    pub arena_bytes: usize,
    /// Number of heap extensions, the one seeding the heap included.
    pub extensions: usize,
    /// Blocks currently owned by callers.
    pub live_blocks: usize,
    /// Size of those blocks, tags included.
    pub live_bytes: usize,
}

impl Stats {
    const EMPTY: Self = Self {
        arena_bytes: 0,
        extensions: 0,
        live_blocks: 0,
        live_bytes: 0,
    };
}

/// A boundary-tag heap with segregated free lists over an [`Arena`].
///
/// The heap is single-threaded: every operation takes `&mut self` and runs
/// to completion. Use [`Locked`](crate::Locked) to share one.
pub struct Heap<A: Arena> {
    arena: A,
    config: Config,
    lists: FreeLists,
    prologue: Option<BlockRef>,
    /// Set when `init` failed after taking bytes from the arena.
    init_error: Option<Error>,
    stats: Stats,
}

impl<A: Arena> core::fmt::Debug for Heap<A> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Heap")
            .field("config", &self.config)
            .field("prologue", &self.prologue)
            .field("init_error", &self.init_error)
            .field("stats", &self.stats())
            .finish()
    }
}

impl<A: Arena> Heap<A> {
    #[inline]
    pub const fn new(arena: A) -> Self {
        Self::with_config(arena, Config::DEFAULT)
    }

    #[inline]
    pub const fn with_config(arena: A, config: Config) -> Self {
        Self {
            arena,
            config,
            lists: FreeLists::new(0),
            prologue: None,
            init_error: None,
            stats: Stats::EMPTY,
        }
    }

    /// Lays out the class sentinels and the prologue/epilogue pair, then
    /// seeds the heap with one chunk.
    ///
    /// Must be called once, before any other operation. If seeding fails
    /// after the arena has grown, the error sticks and later calls return it
    /// without touching the arena again.
    pub fn init(&mut self) -> Result<(), Error> {
        if let Some(err) = &self.init_error {
            return Err(err.clone());
        }
        let len = self.arena.len();
        let pad = memory_addr::align_up(len, DSIZE) - len;
        let start = self.arena.grow(pad + INIT_SIZE)? + pad;

        let raw = self.raw();
        let lists = FreeLists::new(start + WSIZE);
        let prologue = BlockRef::new(lists.table() + FreeLists::TABLE_SIZE + WSIZE);
        unsafe {
            raw.store(start, 0);
            lists.init(raw);
            raw.set_tags(prologue, DSIZE, true);
            raw.set_header(raw.next_block(prologue), Tag::pack(0, true));
        }
        self.lists = lists;

        #[cfg(feature = "tracing")]
        tracing::debug!(
            "[Heap]: init at offset {}, prologue {}",
            start,
            prologue.offset()
        );

        if let Err(err) = self.extend(self.config.chunk_size() / WSIZE) {
            self.init_error = Some(err.clone());
            return Err(err);
        }
        self.prologue = Some(prologue);
        Ok(())
    }

    #[inline]
    pub const fn is_initialized(&self) -> bool {
        self.prologue.is_some()
    }

    #[inline]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub const fn arena(&self) -> &A {
        &self.arena
    }

    #[inline]
    pub fn stats(&self) -> Stats {
        Stats {
            arena_bytes: self.arena.len(),
            ..self.stats
        }
    }

    /// Allocates at least `size` bytes aligned to [`ALIGN`](crate::ALIGN).
    ///
    /// Returns `None` for a zero-size request or when the arena is exhausted.
    #[inline]
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        self.try_allocate(size).ok()
    }

    pub fn try_allocate(&mut self, size: usize) -> Result<NonNull<u8>, Error> {
        self.ready()?;
        if size == 0 {
            return Err(Error::ZeroSize);
        }
        let asize = adjust(size)?;
        let used = self.alloc_block(asize)?;
        self.after_mutation();
        Ok(self.raw().ptr(used.at))
    }

    /// Returns a block to the heap. `None` is a no-op.
    ///
    /// # Safety
    ///
    /// `ptr` must come from this heap and not have been freed since.
    pub unsafe fn free(&mut self, ptr: Option<NonNull<u8>>) {
        let Some(ptr) = ptr else {
            return;
        };
        if self.prologue.is_none() {
            return;
        }
        unsafe { self.free_block(self.raw().block_of(ptr)) };
        self.after_mutation();
    }

    /// Resizes a block, moving it if it cannot grow in place.
    ///
    /// `resize(None, size)` allocates, `resize(ptr, 0)` frees and returns
    /// `None`. When the block has to move, the first `min(old, size)` payload
    /// bytes are copied over. On failure the original block is left intact
    /// and `None` is returned.
    ///
    /// # Safety
    ///
    /// Same contract as [`Heap::free`].
    #[inline]
    pub unsafe fn resize(&mut self, ptr: Option<NonNull<u8>>, size: usize) -> Option<NonNull<u8>> {
        unsafe { self.try_resize(ptr, size) }.ok().flatten()
    }

    /// # Safety
    ///
    /// Same contract as [`Heap::free`].
    pub unsafe fn try_resize(
        &mut self,
        ptr: Option<NonNull<u8>>,
        size: usize,
    ) -> Result<Option<NonNull<u8>>, Error> {
        if size == 0 {
            unsafe { self.free(ptr) };
            return Ok(None);
        }
        let Some(ptr) = ptr else {
            return self.try_allocate(size).map(Some);
        };
        self.ready()?;

        let asize = adjust(size)?;
        let at = self.raw().block_of(ptr);
        let old = unsafe { self.raw().size_of(at) };

        if unsafe { self.resize_in_place(at, old, asize) } {
            self.after_mutation();
            return Ok(Some(ptr));
        }

        let used = self.alloc_block(asize)?;
        let raw = self.raw();
        unsafe {
            raw.copy(at, used.at, (old - DSIZE).min(size));
            self.free_block(at);
        }
        self.after_mutation();
        Ok(Some(raw.ptr(used.at)))
    }

    /// Payload bytes the block behind `ptr` can hold.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live allocation of this heap.
    #[inline]
    pub unsafe fn usable_size(&self, ptr: NonNull<u8>) -> usize {
        let raw = self.raw();
        unsafe { raw.size_of(raw.block_of(ptr)) - DSIZE }
    }

    /// Walks the whole block chain and every free list.
    ///
    /// Violations are handled according to [`Config::on_violation`]; the
    /// report is returned either way. With `verbose`, the report lists every
    /// block.
    pub fn check(&self, verbose: bool) -> Report {
        let Some(prologue) = self.prologue else {
            return Report::default();
        };
        let report = unsafe { check::walk(self.raw(), &self.lists, prologue, verbose) };
        report.enforce(self.config.on_violation());
        report
    }

    #[inline]
    pub(crate) fn raw(&self) -> Raw {
        Raw::new(self.arena.base(), self.arena.len())
    }

    #[inline]
    fn ready(&self) -> Result<BlockRef, Error> {
        self.prologue.ok_or(Error::Uninitialized)
    }

    #[inline]
    fn after_mutation(&self) {
        if self.config.self_check() {
            self.check(false);
        }
    }

    /// Segregated fit, extending the heap when no class has room.
    fn alloc_block(&mut self, asize: usize) -> Result<Used, Error> {
        let free = match unsafe { self.lists.find_fit(self.raw(), asize) } {
            Some(free) => free,
            None => {
                let size = asize.max(self.config.chunk_size());
                self.extend(size / WSIZE)?
            }
        };
        let used = unsafe { self.place(free, asize) };
        self.stats.live_blocks += 1;
        self.stats.live_bytes += used.size;
        Ok(used)
    }

    unsafe fn free_block(&mut self, at: BlockRef) {
        let raw = self.raw();
        let size = unsafe { raw.size_of(at) };
        debug_assert!(unsafe { raw.is_allocated(at) }, "double free at {}", at.offset());

        self.stats.live_blocks = self.stats.live_blocks.saturating_sub(1);
        self.stats.live_bytes = self.stats.live_bytes.saturating_sub(size);

        let free = unsafe { raw.mark_free(at, size) };
        unsafe { self.coalesce(free) };
    }

    /// Grows the arena by `words` (rounded up to even, at least one minimum
    /// block) and turns the old epilogue into the header of a new free block.
    fn extend(&mut self, words: usize) -> Result<Free, Error> {
        let size = words
            .max(MIN_BLOCK_SIZE / WSIZE)
            .checked_add(words & 1)
            .and_then(|words| words.checked_mul(WSIZE))
            .ok_or(Error::TooLarge { requested: words })?;

        let old = match self.arena.grow(size) {
            Ok(old) => old,
            Err(err) => {
                #[cfg(feature = "tracing")]
                tracing::warn!("[Heap]: extend by {} bytes failed: {}", size, err);
                return Err(err);
            }
        };
        self.stats.extensions += 1;

        #[cfg(feature = "tracing")]
        tracing::debug!(
            "[Heap]: extend by {} bytes, arena now {} bytes",
            size,
            self.arena.len()
        );

        let raw = self.raw();
        let at = BlockRef::new(old);
        unsafe {
            let free = raw.mark_free(at, size);
            raw.set_header(raw.next_block(at), Tag::pack(0, true));
            Ok(self.coalesce(free))
        }
    }

    /// Merges a freshly freed block with its free neighbours and links the
    /// result into its class.
    ///
    /// `free` must be tagged free and not linked.
    unsafe fn coalesce(&mut self, free: Free) -> Free {
        let raw = self.raw();
        let lists = self.lists;
        unsafe {
            let prev = match raw.block(raw.prev_block(free.at)) {
                Block::Free(prev) => Some(prev),
                Block::Allocated(_) => None,
            };
            let next = match raw.block(raw.next_block(free.at)) {
                Block::Free(next) => Some(next),
                Block::Allocated(_) => None,
            };

            let merged = match (prev, next) {
                (None, None) => free,
                (None, Some(next)) => {
                    lists.remove(raw, &next);
                    raw.mark_free(free.at, free.size + next.size)
                }
                (Some(prev), None) => {
                    lists.remove(raw, &prev);
                    raw.mark_free(prev.at, prev.size + free.size)
                }
                (Some(prev), Some(next)) => {
                    lists.remove(raw, &prev);
                    lists.remove(raw, &next);
                    raw.mark_free(prev.at, prev.size + free.size + next.size)
                }
            };
            lists.insert(raw, &merged);
            merged
        }
    }

    /// Carves `asize` bytes out of the start of a linked free block.
    unsafe fn place(&mut self, free: Free, asize: usize) -> Used {
        debug_assert!(free.size >= asize);
        unsafe {
            self.lists.remove(self.raw(), &free);
            self.split(free.at, free.size, asize)
        }
    }

    /// Marks the unlinked run `[at, at + total)` allocated with `asize`
    /// bytes, returning the tail to the lists when it can hold a block.
    unsafe fn split(&mut self, at: BlockRef, total: usize, asize: usize) -> Used {
        let raw = self.raw();
        unsafe {
            if total - asize >= MIN_BLOCK_SIZE {
                let used = raw.mark_used(at, asize);
                let rest = raw.mark_free(raw.next_block(at), total - asize);
                self.coalesce(rest);
                used
            } else {
                raw.mark_used(at, total)
            }
        }
    }

    /// Tries to serve a resize without moving the payload.
    ///
    /// Shrinks split off the tail. Growth absorbs a free successor, extending
    /// the arena first when the block sits at the top of the heap. Absorbing
    /// a neighbour ignores where it sat in its class list.
    unsafe fn resize_in_place(&mut self, at: BlockRef, size: usize, asize: usize) -> bool {
        if asize <= size {
            let used = unsafe { self.split(at, size, asize) };
            self.stats.live_bytes -= size - used.size;
            return true;
        }

        let raw = self.raw();
        let (avail, top) = unsafe {
            match raw.block(raw.next_block(at)) {
                Block::Free(next) => (size + next.size, raw.size_of(raw.next_block(next.at)) == 0),
                Block::Allocated(next) => (size, next.size == 0),
            }
        };

        if avail < asize {
            if !top {
                return false;
            }
            let need = (asize - avail).max(self.config.chunk_size());
            if self.extend(need / WSIZE).is_err() {
                return false;
            }
        }

        // The successor is now a free block large enough to absorb.
        let raw = self.raw();
        let next = match unsafe { raw.block(raw.next_block(at)) } {
            Block::Free(next) if size + next.size >= asize => next,
            _ => return false,
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(
            "[Heap]: grow {} in place by absorbing {} bytes",
            at.offset(),
            next.size
        );

        unsafe {
            self.lists.remove(raw, &next);
            let used = self.split(at, size + next.size, asize);
            self.stats.live_bytes += used.size - size;
        }
        true
    }
}
