//! Heap consistency checker.
//!
//! [`Heap::check`](crate::Heap::check) walks the block chain from the
//! prologue to the epilogue, then every class list, and collects what it
//! finds into a [`Report`]. The walk never trusts a size or link it has not
//! bounds-checked first, so a corrupted heap yields violations rather than
//! stray reads.

use alloc::vec::Vec;
use core::fmt;

use memory_addr::AddrRange;

use crate::{
    block::{BlockRef, DSIZE, MIN_BLOCK_SIZE, Raw, Tag, WSIZE},
    class::{NUM_CLASSES, class_of},
    config::OnViolation,
    list::FreeLists,
};

/// One inconsistency. Offsets are relative to the arena base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// The prologue is not an allocated double-word block.
    BadPrologue { header: usize, footer: usize },
    /// The chain does not end in a zero-size allocated header at the break.
    BadEpilogue { offset: usize, header: usize },
    /// A payload is not aligned to [`ALIGN`](crate::ALIGN).
    Misaligned { offset: usize },
    /// Header and footer disagree.
    TagMismatch {
        offset: usize,
        header: usize,
        footer: usize,
    },
    /// A block is too small or runs past the arena break.
    BadSize { offset: usize, size: usize },
    /// Two free blocks sit next to each other.
    AdjacentFree { first: usize, second: usize },
    /// A list link points outside the block chain.
    StrayLink { class: usize, node: usize },
    /// `node.next.prev` is not `node`, or the list does not close.
    BrokenLink { class: usize, node: usize },
    /// An allocated block sits in a free list.
    AllocatedInList { class: usize, offset: usize },
    /// A free block sits in the wrong class.
    WrongClass {
        class: usize,
        offset: usize,
        size: usize,
    },
    /// Free blocks in the chain and in the lists do not match up.
    CountMismatch { in_chain: usize, in_lists: usize },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::BadPrologue { header, footer } => write!(
                f,
                "bad prologue: header {:?} footer {:?}",
                Tag::from_bits(header),
                Tag::from_bits(footer)
            ),
            Self::BadEpilogue { offset, header } => {
                write!(f, "{}: bad epilogue header {:?}", offset, Tag::from_bits(header))
            }
            Self::Misaligned { offset } => {
                write!(f, "{}: payload is not double-word aligned", offset)
            }
            Self::TagMismatch {
                offset,
                header,
                footer,
            } => write!(
                f,
                "{}: header {:?} does not match footer {:?}",
                offset,
                Tag::from_bits(header),
                Tag::from_bits(footer)
            ),
            Self::BadSize { offset, size } => write!(f, "{}: bad block size {}", offset, size),
            Self::AdjacentFree { first, second } => {
                write!(f, "{}: free block followed by free block {}", first, second)
            }
            Self::StrayLink { class, node } => {
                write!(f, "class {}: link to {} outside the heap", class, node)
            }
            Self::BrokenLink { class, node } => {
                write!(f, "class {}: inconsistent links at {}", class, node)
            }
            Self::AllocatedInList { class, offset } => {
                write!(f, "class {}: allocated block {} in free list", class, offset)
            }
            Self::WrongClass {
                class,
                offset,
                size,
            } => write!(
                f,
                "class {}: block {} of {} bytes belongs to class {}",
                class,
                offset,
                size,
                class_of(size)
            ),
            Self::CountMismatch { in_chain, in_lists } => write!(
                f,
                "{} free blocks in the heap but {} in the lists",
                in_chain, in_lists
            ),
        }
    }
}

/// A block as seen by the checker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    pub offset: usize,
    pub size: usize,
    pub allocated: bool,
    /// Raw footer word, `None` for the epilogue.
    pub footer: Option<usize>,
}

impl fmt::Display for BlockInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = |a: bool| if a { 'a' } else { 'f' };
        match self.footer {
            None => write!(f, "{}: EOL", self.offset),
            Some(footer) => {
                let footer = Tag::from_bits(footer);
                write!(
                    f,
                    "{}: header: [{}:{}] footer: [{}:{}]",
                    self.offset,
                    self.size,
                    state(self.allocated),
                    footer.size(),
                    state(footer.is_allocated())
                )
            }
        }
    }
}

/// Outcome of a heap check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    /// Blocks between prologue and epilogue.
    pub blocks: usize,
    pub free_blocks: usize,
    pub free_bytes: usize,
    pub largest_free: usize,
    /// Free blocks reachable from the class lists.
    pub listed: usize,
    /// Every block including prologue and epilogue, only filled when verbose.
    pub trace: Vec<BlockInfo>,
    pub violations: Vec<Violation>,
}

impl Report {
    #[inline]
    pub fn is_ok(&self) -> bool {
        self.violations.is_empty()
    }

    /// Traced block whose payload starts at `offset`.
    pub fn block_at(&self, offset: usize) -> Option<&BlockInfo> {
        self.trace.iter().find(|b| b.offset == offset)
    }

    pub(crate) fn enforce(&self, mode: OnViolation) {
        if self.is_ok() {
            return;
        }
        match mode {
            OnViolation::Log => {
                #[cfg(feature = "tracing")]
                for v in &self.violations {
                    tracing::error!("[Heap]: {}", v);
                }
            }
            OnViolation::Abort => panic!("heap check failed\n{}", self),
        }
    }

    fn push(&mut self, v: Violation) {
        self.violations.push(v);
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "heap: {} blocks, {} free ({} bytes, largest {}), {} listed",
            self.blocks, self.free_blocks, self.free_bytes, self.largest_free, self.listed
        )?;
        for b in &self.trace {
            writeln!(f, "{}", b)?;
        }
        for v in &self.violations {
            writeln!(f, "error: {}", v)?;
        }
        Ok(())
    }
}

/// # Safety
///
/// `raw` must cover the whole arena and `prologue` must be the one written by
/// `Heap::init`. Tags and links may be arbitrary.
pub(crate) unsafe fn walk(
    raw: Raw,
    lists: &FreeLists,
    prologue: BlockRef,
    verbose: bool,
) -> Report {
    let mut report = Report::default();
    let end = raw.len();

    // Chain, from the prologue up to the break.
    let header = unsafe { raw.load(prologue.header_of()) };
    let footer = unsafe { raw.load(prologue.offset()) };
    if header != Tag::pack(DSIZE, true).bits() || footer != header {
        report.push(Violation::BadPrologue { header, footer });
    }
    if verbose {
        report.trace.push(BlockInfo {
            offset: prologue.offset(),
            size: Tag::from_bits(header).size(),
            allocated: Tag::from_bits(header).is_allocated(),
            footer: Some(footer),
        });
    }

    let mut at = BlockRef::new(prologue.offset() + DSIZE);
    let mut prev_free: Option<BlockRef> = None;
    loop {
        if at.header_of() + WSIZE > end {
            report.push(Violation::BadSize {
                offset: at.offset(),
                size: 0,
            });
            break;
        }
        let tag = unsafe { raw.header(at) };
        if tag.size() == 0 {
            if verbose {
                report.trace.push(BlockInfo {
                    offset: at.offset(),
                    size: 0,
                    allocated: tag.is_allocated(),
                    footer: None,
                });
            }
            if !tag.is_allocated() || tag.stray_bits() != 0 || at.header_of() + WSIZE != end {
                report.push(Violation::BadEpilogue {
                    offset: at.offset(),
                    header: tag.bits(),
                });
            }
            break;
        }
        // Room for the epilogue must remain past the block.
        if tag.stray_bits() != 0
            || tag.size() < MIN_BLOCK_SIZE
            || tag.size() > end - WSIZE - at.header_of()
        {
            report.push(Violation::BadSize {
                offset: at.offset(),
                size: tag.size() | tag.stray_bits(),
            });
            break;
        }
        if !memory_addr::is_aligned(raw.base_addr() + at.offset(), DSIZE) {
            report.push(Violation::Misaligned { offset: at.offset() });
        }
        let footer = unsafe { raw.footer(at) }.bits();
        if footer != tag.bits() {
            report.push(Violation::TagMismatch {
                offset: at.offset(),
                header: tag.bits(),
                footer,
            });
        }
        if verbose {
            report.trace.push(BlockInfo {
                offset: at.offset(),
                size: tag.size(),
                allocated: tag.is_allocated(),
                footer: Some(footer),
            });
        }

        report.blocks += 1;
        if tag.is_allocated() {
            prev_free = None;
        } else {
            report.free_blocks += 1;
            report.free_bytes += tag.size();
            report.largest_free = report.largest_free.max(tag.size());
            if let Some(first) = prev_free {
                report.push(Violation::AdjacentFree {
                    first: first.offset(),
                    second: at.offset(),
                });
            }
            prev_free = Some(at);
        }
        at = BlockRef::new(at.offset() + tag.size());
    }

    // Lists. Members must be payloads between the prologue and the break.
    let heap = AddrRange::new(prologue.offset() + DSIZE, end);
    let bound = end / MIN_BLOCK_SIZE + 1;
    for class in 0..NUM_CLASSES {
        let sentinel = lists.sentinel(class);
        let mut prev = sentinel;
        let mut node = unsafe { sentinel.next(raw) };
        let mut steps = 0;
        while node != sentinel {
            if !heap.contains(node.offset())
                || node.offset() + DSIZE > end
                || node.offset() % DSIZE != 0
            {
                report.push(Violation::StrayLink {
                    class,
                    node: node.offset(),
                });
                break;
            }
            if steps > bound {
                report.push(Violation::BrokenLink {
                    class,
                    node: node.offset(),
                });
                break;
            }
            if unsafe { node.prev(raw) } != prev {
                report.push(Violation::BrokenLink {
                    class,
                    node: node.offset(),
                });
            }
            let tag = unsafe { raw.header(node.block()) };
            if tag.is_allocated() {
                report.push(Violation::AllocatedInList {
                    class,
                    offset: node.offset(),
                });
            } else {
                report.listed += 1;
                if class_of(tag.size()) != class {
                    report.push(Violation::WrongClass {
                        class,
                        offset: node.offset(),
                        size: tag.size(),
                    });
                }
            }
            prev = node;
            node = unsafe { node.next(raw) };
            steps += 1;
        }
        if node == sentinel && unsafe { sentinel.prev(raw) } != prev {
            report.push(Violation::BrokenLink {
                class,
                node: sentinel.offset(),
            });
        }
    }

    if report.listed != report.free_blocks {
        report.push(Violation::CountMismatch {
            in_chain: report.free_blocks,
            in_lists: report.listed,
        });
    }

    #[cfg(feature = "tracing")]
    if verbose {
        for b in &report.trace {
            tracing::debug!("[Heap]: {}", b);
        }
    }

    report
}
