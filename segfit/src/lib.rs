//! # segfit
//!
//! A general purpose heap allocator carved out of one contiguous, growable
//! region. Blocks carry boundary tags at both ends, free blocks live in
//! segregated size-class lists and neighbours are coalesced eagerly.
//!
//! ```text
//!   arena base                                                    break
//!   │                                                               │
//!   ▼                                                               ▼
//!   ┌───┬──────────────────┬──────┬───────────┬─────────┬─────┬─────┐
//!   │pad│ class sentinels  │ prol │  block    │  block  │ ... │ epi │
//!   └───┴──────────────────┴──────┴───────────┴─────────┴─────┴─────┘
//!
//!   block:  ┌────────┬──────────────────────────────┬────────┐
//!           │ header │ payload  (prev, next if free) │ footer │
//!           └────────┴──────────────────────────────┴────────┘
//!                    ▲
//!                    └── handle returned to the caller
//! ```
//!
//! The heap only ever asks its [`Arena`] for more bytes at the end; it never
//! gives memory back. Every operation runs to completion on the calling
//! thread, wrap the heap in [`Locked`] to share it.
//!
//! ```rust
//! use segfit::{Heap, HeapArena};
//!
//! let mut heap = Heap::new(HeapArena::new(1 << 20));
//! heap.init().expect("arena too small");
//!
//! let a = heap.allocate(24).expect("exhausted");
//! unsafe {
//!     a.as_ptr().write_bytes(0xAB, 24);
//!     let b = heap.resize(Some(a), 100).expect("exhausted");
//!     assert_eq!(*b.as_ptr(), 0xAB);
//!     heap.free(Some(b));
//! }
//! assert!(heap.check(false).is_ok());
//! ```

#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![cfg_attr(docsrs, feature(doc_cfg))]

extern crate alloc;

#[cfg(feature = "tracing")]
extern crate tracing;

pub mod arena;
mod block;
pub mod check;
mod class;
pub mod config;
mod heap;
mod list;
mod locked;
pub mod os;
mod tests;

pub use arena::{Arena, Error, HeapArena, SliceArena};
pub use block::{ALIGN, CHUNK_SIZE, DSIZE, MIN_BLOCK_SIZE, WSIZE};
pub use check::{BlockInfo, Report, Violation};
pub use class::{NUM_CLASSES, class_limit, class_of};
pub use config::{Config, OnViolation};
pub use heap::{Heap, Stats};
pub use locked::Locked;

#[cfg(feature = "unix")]
pub use os::unix::MmapArena;
