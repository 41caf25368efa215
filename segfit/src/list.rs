//! Segregated free lists.
//!
//! Each class is a circular doubly-linked list threaded through the payload
//! of its free blocks and anchored at a sentinel node that lives in the arena
//! right before the prologue. Links are arena offsets.

use crate::{
    block::{BlockRef, DSIZE, Free, Raw, WSIZE},
    class::{NUM_CLASSES, class_of},
};

/// A link cell: `prev` at `+0`, `next` at `+WSIZE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub(crate) struct Node(usize);

impl Node {
    const PREV: usize = 0;
    const NEXT: usize = WSIZE;
    pub const SIZE: usize = DSIZE;

    #[inline]
    pub const fn offset(self) -> usize {
        self.0
    }

    /// The block whose payload holds this node.
    #[inline]
    pub const fn block(self) -> BlockRef {
        BlockRef::new(self.0)
    }

    #[inline]
    pub unsafe fn prev(self, raw: Raw) -> Node {
        unsafe { Node(raw.load(self.0 + Self::PREV)) }
    }

    #[inline]
    pub unsafe fn next(self, raw: Raw) -> Node {
        unsafe { Node(raw.load(self.0 + Self::NEXT)) }
    }

    #[inline]
    unsafe fn set_prev(self, raw: Raw, prev: Node) {
        unsafe { raw.store(self.0 + Self::PREV, prev.0) }
    }

    #[inline]
    unsafe fn set_next(self, raw: Raw, next: Node) {
        unsafe { raw.store(self.0 + Self::NEXT, next.0) }
    }
}

impl Free {
    #[inline]
    pub(crate) const fn node(&self) -> Node {
        Node(self.at.offset())
    }
}

/// The size-class table.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FreeLists {
    table: usize,
}

impl FreeLists {
    /// Bytes taken by the sentinels.
    pub const TABLE_SIZE: usize = NUM_CLASSES * Node::SIZE;

    #[inline]
    pub const fn new(table: usize) -> Self {
        Self { table }
    }

    #[inline]
    pub const fn table(&self) -> usize {
        self.table
    }

    #[inline]
    pub const fn sentinel(&self, class: usize) -> Node {
        debug_assert!(class < NUM_CLASSES);
        Node(self.table + class * Node::SIZE)
    }

    /// Empties every class.
    pub unsafe fn init(&self, raw: Raw) {
        for class in 0..NUM_CLASSES {
            let s = self.sentinel(class);
            unsafe {
                s.set_prev(raw, s);
                s.set_next(raw, s);
            }
        }
    }

    /// Links `free` right after the sentinel of its class.
    ///
    /// `free` must not already be linked.
    #[inline]
    pub unsafe fn insert(&self, raw: Raw, free: &Free) -> usize {
        let class = class_of(free.size);
        let s = self.sentinel(class);
        let node = free.node();
        unsafe {
            let first = s.next(raw);
            node.set_prev(raw, s);
            node.set_next(raw, first);
            first.set_prev(raw, node);
            s.set_next(raw, node);
        }
        class
    }

    /// Unlinks `free` from whatever class it sits in.
    #[inline]
    pub unsafe fn remove(&self, raw: Raw, free: &Free) {
        let node = free.node();
        unsafe {
            let prev = node.prev(raw);
            let next = node.next(raw);
            prev.set_next(raw, next);
            next.set_prev(raw, prev);
        }
    }

    #[cfg(test)]
    pub unsafe fn is_empty(&self, raw: Raw, class: usize) -> bool {
        let s = self.sentinel(class);
        unsafe { s.next(raw) == s }
    }

    /// Walks one class in link order.
    #[inline]
    pub unsafe fn iter(&self, raw: Raw, class: usize) -> Iter {
        let sentinel = self.sentinel(class);
        Iter {
            raw,
            sentinel,
            cur: unsafe { sentinel.next(raw) },
        }
    }

    /// First block of at least `asize` bytes, scanning from the class of
    /// `asize` upwards.
    pub unsafe fn find_fit(&self, raw: Raw, asize: usize) -> Option<Free> {
        for class in class_of(asize)..NUM_CLASSES {
            for node in unsafe { self.iter(raw, class) } {
                let size = unsafe { raw.size_of(node.block()) };
                if size >= asize {
                    return Some(Free {
                        at: node.block(),
                        size,
                    });
                }
            }
        }
        None
    }
}

pub(crate) struct Iter {
    raw: Raw,
    sentinel: Node,
    cur: Node,
}

impl Iterator for Iter {
    type Item = Node;

    #[inline]
    fn next(&mut self) -> Option<Node> {
        if self.cur == self.sentinel {
            return None;
        }
        let node = self.cur;
        self.cur = unsafe { node.next(self.raw) };
        Some(node)
    }
}
