//! Thread priorities
//!
//! A priority is a signed integer. Smaller values are more urgent.
//!
//! ```text
//!   -NUM_COOP ... -1 | 0 ... NUM_PREEMPT - 1
//!   cooperative      | preemptible
//! ```
//!
//! A thread running at a cooperative priority keeps the processor until it
//! blocks or yields, even if a more urgent thread becomes ready. A thread
//! running at a preemptible priority is switched out as soon as a strictly
//! more urgent thread becomes ready.
use num_traits::ToPrimitive;

use crate::utils::READY_BITMAP_LEN;

/// A thread priority. Smaller values are more urgent.
pub type Priority = i32;

/// Get a flag indicating whether `priority` belongs to the cooperative
/// range.
#[inline]
pub const fn is_cooperative(priority: Priority) -> bool {
    priority < 0
}

/// Get a flag indicating whether `priority` belongs to the preemptible
/// range.
#[inline]
pub const fn is_preemptible(priority: Priority) -> bool {
    !is_cooperative(priority)
}

/// The set of priorities a kernel configuration supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityRange {
    num_coop: usize,
    num_preempt: usize,
}

impl PriorityRange {
    pub const fn new(num_coop: usize, num_preempt: usize) -> Self {
        Self {
            num_coop,
            num_preempt,
        }
    }

    /// The number of priority levels. Each level maps to one ready queue
    /// bucket.
    #[inline]
    pub const fn num_levels(&self) -> usize {
        self.num_coop + self.num_preempt
    }

    /// Get a flag indicating whether the configuration fits in the ready
    /// queue.
    pub const fn is_supported(&self) -> bool {
        self.num_levels() > 0 && self.num_levels() <= READY_BITMAP_LEN
    }

    /// The most urgent priority.
    #[inline]
    pub fn highest(&self) -> Priority {
        -self.num_coop.to_i32().unwrap_or(i32::MAX)
    }

    /// The least urgent priority.
    #[inline]
    pub fn lowest(&self) -> Priority {
        self.num_preempt.to_i32().unwrap_or(i32::MAX) - 1
    }

    #[inline]
    pub fn is_valid(&self, priority: Priority) -> bool {
        (self.highest()..=self.lowest()).contains(&priority)
    }

    /// Map a valid priority to its ready queue level (`0` = most urgent).
    #[inline]
    pub fn level(&self, priority: Priority) -> usize {
        debug_assert!(self.is_valid(priority));
        (i64::from(priority) - i64::from(self.highest()))
            .to_usize()
            .unwrap_or(0)
    }

    /// The inverse of [`Self::level`].
    #[inline]
    pub fn priority_of_level(&self, level: usize) -> Priority {
        debug_assert!(level < self.num_levels());
        self.highest() + level.to_i32().unwrap_or(i32::MAX)
    }
}
