use crate::block::DSIZE;

/// Number of segregated free lists.
pub const NUM_CLASSES: usize = 26;

/// Maps a block size (bytes) to its free-list class.
///
/// Class `i` holds blocks of at most `DSIZE << (i + 1)` bytes: 2, 4, 8, 16, ...
/// double words. The last class takes everything larger.
#[inline]
pub const fn class_of(size: usize) -> usize {
    let dwords = size.div_ceil(DSIZE);
    if dwords <= 2 {
        return 0;
    }
    // ceil(log2(dwords)) - 1
    let class = (dwords - 1).ilog2() as usize;
    if class < NUM_CLASSES {
        class
    } else {
        NUM_CLASSES - 1
    }
}

/// Largest block size held by `class`, `None` for the catch-all class.
#[inline]
pub const fn class_limit(class: usize) -> Option<usize> {
    if class + 1 >= NUM_CLASSES {
        None
    } else {
        Some(DSIZE << (class + 1))
    }
}
