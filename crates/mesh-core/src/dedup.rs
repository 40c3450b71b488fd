//! # Sliding-Window Deduplicator
//!
//! One instance per remote sender. Sequence numbers below the window are
//! stale and rejected; numbers inside the window pass exactly once; a
//! number at or beyond the window's upper edge slides the window forward,
//! evicting the oldest entries. A far-future number evicts the whole
//! window in one call rather than waiting for `window_size` advances.
//!
//! The window never moves backwards, so a burst of reordered envelopes
//! from one sender can be deduplicated without unbounded memory.

use std::collections::HashSet;

/// Configuration for a [`Dedup`] window.
#[derive(Debug, Clone, Copy)]
pub struct DedupConfig {
    /// First sequence number considered fresh.
    pub start: u64,

    /// Number of in-flight sequence numbers tracked at once.
    pub window_size: u32,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            start: 0,
            window_size: 32,
        }
    }
}

/// Per-sender sliding-window sequence-number deduplicator.
#[derive(Debug)]
pub struct Dedup {
    offset: u64,
    window_size: u64,
    seen: HashSet<u64>,
}

impl Dedup {
    /// Create a window starting at `config.start`.
    #[must_use]
    pub fn new(config: DedupConfig) -> Self {
        Self {
            offset: config.start,
            window_size: u64::from(config.window_size.max(1)),
            seen: HashSet::new(),
        }
    }

    /// Check a sequence number against the window.
    ///
    /// Returns `true` the first time `seq` is seen within the current
    /// window and `false` for stale or repeated numbers.
    pub fn dedup(&mut self, seq: u64) -> bool {
        if seq < self.offset {
            return false;
        }

        // Slide the window so seq becomes its newest slot, evicting what
        // falls off the lower edge. The jump lands in constant time even
        // for seq values arbitrarily far ahead (hostile senders can put
        // any u64 on the wire).
        let upper = self.offset.saturating_add(self.window_size);
        if seq >= upper {
            let new_offset = seq - self.window_size + 1;
            if new_offset >= upper {
                // The jump clears every tracked entry at once
                self.seen.clear();
            } else {
                for evicted in self.offset..new_offset {
                    self.seen.remove(&evicted);
                }
            }
            self.offset = new_offset;
        }

        self.seen.insert(seq)
    }

    /// Lower edge of the window. Only ever increases.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }
}

impl Default for Dedup {
    fn default() -> Self {
        Self::new(DedupConfig::default())
    }
}
