use crate::block::{CHUNK_SIZE, DSIZE, MIN_BLOCK_SIZE};

/// What the heap does when its checker finds a corrupted block chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnViolation {
    /// Report every violation through `tracing` and keep running.
    Log,
    /// Panic with the rendered report.
    Abort,
}

impl OnViolation {
    /// `Abort` in debug builds, `Log` otherwise.
    pub const DEFAULT: Self = if cfg!(debug_assertions) {
        Self::Abort
    } else {
        Self::Log
    };
}

impl Default for OnViolation {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Tunables of a [`Heap`](crate::Heap).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    chunk_size: usize,
    on_violation: OnViolation,
    self_check: bool,
}

impl Config {
    /// Largest extension no allocation layout can exceed.
    pub const MAX_CHUNK_SIZE: usize = isize::MAX as usize & !(DSIZE - 1);

    pub const DEFAULT: Self = Self {
        chunk_size: CHUNK_SIZE,
        on_violation: OnViolation::DEFAULT,
        self_check: false,
    };

    #[inline]
    pub const fn new() -> Self {
        Self::DEFAULT
    }

    /// Minimum number of bytes the heap asks the arena for at once.
    ///
    /// Rounded up to the double word, kept between the minimum block size
    /// and [`MAX_CHUNK_SIZE`](Self::MAX_CHUNK_SIZE).
    #[inline]
    pub const fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        let size = if chunk_size < MIN_BLOCK_SIZE {
            MIN_BLOCK_SIZE
        } else if chunk_size > Self::MAX_CHUNK_SIZE {
            Self::MAX_CHUNK_SIZE
        } else {
            chunk_size
        };
        self.chunk_size = memory_addr::align_up(size, DSIZE);
        self
    }

    #[inline]
    pub const fn with_on_violation(mut self, on_violation: OnViolation) -> Self {
        self.on_violation = on_violation;
        self
    }

    /// Run the checker after every mutating call.
    #[inline]
    pub const fn with_self_check(mut self, self_check: bool) -> Self {
        self.self_check = self_check;
        self
    }

    #[inline]
    pub const fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    #[inline]
    pub const fn on_violation(&self) -> OnViolation {
        self.on_violation
    }

    #[inline]
    pub const fn self_check(&self) -> bool {
        self.self_check
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[cfg(feature = "std")]
impl Config {
    /// Reads overrides from the environment:
    ///
    /// - `SEGFIT_CHUNK_SIZE`: bytes per heap extension,
    /// - `SEGFIT_SELF_CHECK`: `1`/`true` to check after every call,
    /// - `SEGFIT_ON_VIOLATION`: `log` or `abort`.
    ///
    /// Malformed values are ignored.
    pub fn from_env() -> Self {
        Self::DEFAULT.merge_env(|key| std::env::var(key).ok())
    }

    fn merge_env(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(size) = var("SEGFIT_CHUNK_SIZE").and_then(|v| v.trim().parse().ok()) {
            self = self.with_chunk_size(size);
        }
        if let Some(check) = var("SEGFIT_SELF_CHECK") {
            match check.trim() {
                "1" | "true" => self.self_check = true,
                "0" | "false" => self.self_check = false,
                _ => {}
            }
        }
        if let Some(mode) = var("SEGFIT_ON_VIOLATION") {
            match mode.trim().to_ascii_lowercase().as_str() {
                "log" => self.on_violation = OnViolation::Log,
                "abort" => self.on_violation = OnViolation::Abort,
                _ => {}
            }
        }
        self
    }
}
