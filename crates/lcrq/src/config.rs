/// Configuration for a queue and the rings it allocates.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Per-ring capacity as a power of 2 (default: 17 = 131 072 cells).
    ///
    /// Each cell occupies a full 128-byte cache line, so a default ring is
    /// 16 MiB. Small rings close and link far more often; they are mainly
    /// useful for tests and latency-sensitive setups.
    pub ring_pow: u8,
    /// Collect closure/unsafe-mark counters (overhead on cold paths only).
    pub enable_stats: bool,
}

impl Config {
    /// Creates a configuration with custom settings.
    ///
    /// # Panics
    ///
    /// Panics if `ring_pow` is 0 or greater than 26 (64 M cells, 8 GiB per
    /// ring) to prevent absurd allocations.
    pub const fn new(ring_pow: u8, enable_stats: bool) -> Self {
        assert!(
            ring_pow >= 1 && ring_pow <= 26,
            "ring_pow must be between 1 and 26"
        );
        Self {
            ring_pow,
            enable_stats,
        }
    }

    /// Number of cells per ring.
    #[inline]
    pub const fn capacity(&self) -> usize {
        1 << self.ring_pow
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ring_pow: 17,
            enable_stats: false,
        }
    }
}

/// Small rings (4096 cells, 512 KiB per ring); closes and relinks more
/// often in exchange for a far smaller footprint.
pub const COMPACT_CONFIG: Config = Config::new(12, false);
