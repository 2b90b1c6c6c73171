//! The ready queue: one FIFO list per priority level and a bitmap of
//! non-empty levels.
//!
//! The running thread is never in the ready queue.
use crate::{
    fatal::FatalError,
    priority::{Priority, PriorityRange},
    utils::{
        intrusive_list::{Link, ListAccessor, ListHead},
        PrioBitmap, ReadyBitmap, READY_BITMAP_LEN,
    },
    ThreadId,
};

/// Provides access to the ready-queue link of each thread.
pub(crate) trait ReadyLinks {
    fn ready_link(&mut self, thread: ThreadId) -> &mut Option<Link<ThreadId>>;
}

pub(crate) struct ReadyQueue {
    range: PriorityRange,
    /// Bit `i` is set iff `buckets[i]` is non-empty.
    bitmap: ReadyBitmap,
    buckets: [ListHead<ThreadId>; READY_BITMAP_LEN],
}

impl core::fmt::Debug for ReadyQueue {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("ReadyQueue")
            .field("bitmap", &self.bitmap)
            .finish_non_exhaustive()
    }
}

macro_rules! bucket_accessor {
    ($self:ident, $level:expr, $pool:expr) => {
        ListAccessor::new(&mut $self.buckets[$level], $pool, P::ready_link)
    };
}

impl ReadyQueue {
    pub(crate) fn new(range: PriorityRange) -> Self {
        debug_assert!(range.is_supported());
        Self {
            range,
            bitmap: ReadyBitmap::default(),
            buckets: [ListHead::new(); READY_BITMAP_LEN],
        }
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.bitmap.is_empty()
    }

    /// Get the most urgent priority among the ready threads.
    #[inline]
    pub(crate) fn highest_priority(&self) -> Option<Priority> {
        self.bitmap
            .find_set()
            .map(|level| self.range.priority_of_level(level))
    }

    /// Get the thread that would be dispatched next, i.e., the oldest thread
    /// at the most urgent priority.
    #[cfg(test)]
    pub(crate) fn peek_highest(&self) -> Option<ThreadId> {
        self.buckets[self.bitmap.find_set()?].first
    }

    /// Get a flag indicating whether a thread is ready at `priority`.
    /// Since the running thread is never queued, from the point of view of
    /// the running thread this means there's another thread to share the
    /// processor with.
    #[inline]
    pub(crate) fn has_other_at(&self, priority: Priority) -> bool {
        self.bitmap.get(self.range.level(priority))
    }

    /// Insert `thread` at the back of the bucket for `priority`.
    pub(crate) fn push_back<P: ReadyLinks + ?Sized>(
        &mut self,
        pool: &mut P,
        thread: ThreadId,
        priority: Priority,
    ) -> Result<(), FatalError> {
        let level = self.range.level(priority);
        bucket_accessor!(self, level, pool).push_back(thread)?;
        self.bitmap.set(level);
        Ok(())
    }

    /// Insert `thread` at the front of the bucket for `priority`. Used to
    /// put back a preempted thread so that it resumes before its peers.
    pub(crate) fn push_front<P: ReadyLinks + ?Sized>(
        &mut self,
        pool: &mut P,
        thread: ThreadId,
        priority: Priority,
    ) -> Result<(), FatalError> {
        let level = self.range.level(priority);
        bucket_accessor!(self, level, pool).push_front(thread)?;
        self.bitmap.set(level);
        Ok(())
    }

    /// Remove `thread`, which must be in the bucket for `priority`.
    pub(crate) fn remove<P: ReadyLinks + ?Sized>(
        &mut self,
        pool: &mut P,
        thread: ThreadId,
        priority: Priority,
    ) -> Result<(), FatalError> {
        let level = self.range.level(priority);
        let mut bucket = bucket_accessor!(self, level, pool);
        bucket.remove(thread)?;
        if bucket.is_empty() {
            self.bitmap.clear(level);
        }
        Ok(())
    }

    /// Remove and return the oldest thread at the most urgent priority.
    pub(crate) fn pop_highest<P: ReadyLinks + ?Sized>(
        &mut self,
        pool: &mut P,
    ) -> Result<Option<ThreadId>, FatalError> {
        let Some(level) = self.bitmap.find_set() else {
            return Ok(None);
        };
        let mut bucket = bucket_accessor!(self, level, pool);
        let thread = bucket.pop_front()?;
        if bucket.is_empty() {
            self.bitmap.clear(level);
        }
        Ok(thread)
    }
}
