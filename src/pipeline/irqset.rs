//! Pending IRQ sets
//!
//! A two-level bitmap over the pipeline's IRQ space: one summary word
//! whose bit `w` is set when word `w` of the map may hold pending bits.
//! Each CPU logs IRQs for its two stages in two of these sets. The same
//! structure records which lines the companion core owns.

use core::sync::atomic::{AtomicU64, Ordering};

use crate::types::{IrqNumber, IRQ_SPACE};

const BITS: usize = u64::BITS as usize;
const WORDS: usize = IRQ_SPACE / BITS;

/// Set of IRQ numbers with lowest-first extraction
#[derive(Debug)]
pub struct IrqSet {
    summary: AtomicU64,
    words: [AtomicU64; WORDS],
}

impl IrqSet {
    /// Create an empty set
    pub const fn new() -> Self {
        Self {
            summary: AtomicU64::new(0),
            words: [const { AtomicU64::new(0) }; WORDS],
        }
    }

    #[inline]
    fn locate(irq: IrqNumber) -> (usize, u64) {
        let index = irq.index();
        (index / BITS, 1u64 << (index % BITS))
    }

    /// Add `irq`, returning `true` if it was not already present
    ///
    /// Out-of-range IRQs are ignored.
    pub fn post(&self, irq: IrqNumber) -> bool {
        if !irq.in_range() {
            return false;
        }
        let (word, bit) = Self::locate(irq);
        let prev = self.words[word].fetch_or(bit, Ordering::AcqRel);
        self.summary.fetch_or(1 << word, Ordering::AcqRel);
        prev & bit == 0
    }

    /// Remove `irq`, returning `true` if it was present
    pub fn remove(&self, irq: IrqNumber) -> bool {
        if !irq.in_range() {
            return false;
        }
        let (word, bit) = Self::locate(irq);
        let prev = self.words[word].fetch_and(!bit, Ordering::AcqRel);
        if prev & !bit == 0 {
            self.retire_word(word);
        }
        prev & bit != 0
    }

    /// Whether `irq` is present
    pub fn contains(&self, irq: IrqNumber) -> bool {
        if !irq.in_range() {
            return false;
        }
        let (word, bit) = Self::locate(irq);
        self.words[word].load(Ordering::Acquire) & bit != 0
    }

    /// Remove and return the lowest IRQ in the set
    pub fn pull(&self) -> Option<IrqNumber> {
        loop {
            let summary = self.summary.load(Ordering::Acquire);
            if summary == 0 {
                return None;
            }
            let word = summary.trailing_zeros() as usize;
            let bits = self.words[word].load(Ordering::Acquire);
            if bits == 0 {
                self.retire_word(word);
                continue;
            }
            let bit = 1u64 << bits.trailing_zeros();
            let prev = self.words[word].fetch_and(!bit, Ordering::AcqRel);
            if prev & bit == 0 {
                // Lost a race with remove()
                continue;
            }
            if prev & !bit == 0 {
                self.retire_word(word);
            }
            return Some(IrqNumber((word * BITS) as u32 + bit.trailing_zeros()));
        }
    }

    /// Clear the summary bit for an empty word, then re-check it so a
    /// concurrent post() is never hidden.
    fn retire_word(&self, word: usize) {
        self.summary.fetch_and(!(1 << word), Ordering::AcqRel);
        if self.words[word].load(Ordering::Acquire) != 0 {
            self.summary.fetch_or(1 << word, Ordering::AcqRel);
        }
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.summary.load(Ordering::Acquire) == 0
    }

    /// Number of IRQs in the set
    pub fn len(&self) -> usize {
        self.words
            .iter()
            .map(|w| w.load(Ordering::Relaxed).count_ones() as usize)
            .sum()
    }
}

impl Default for IrqSet {
    fn default() -> Self {
        Self::new()
    }
}
