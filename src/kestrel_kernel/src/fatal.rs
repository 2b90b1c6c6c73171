//! Unrecoverable misuse detection
use core::fmt;

use crate::{
    utils::intrusive_list::{InconsistentError, InsertError, ItemError},
    KernelTraits, ThreadId,
};

/// A condition that makes further scheduling undefined.
///
/// These are never returned to the caller. The kernel reports them through
/// [`Port::fatal_error`], which decides whether the system halts or resets.
///
/// [`Port::fatal_error`]: crate::Port::fatal_error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum FatalError {
    /// A blocking service was called from an interrupt handler.
    BlockingInIsr,
    /// An intrusive list or the timeout list lost its structural integrity,
    /// or a thread was about to be linked to two queues at once.
    CorruptedList,
    /// A thread created with [`ThreadOptions::ESSENTIAL`] was aborted or
    /// exited.
    ///
    /// [`ThreadOptions::ESSENTIAL`]: crate::ThreadOptions::ESSENTIAL
    EssentialThreadAborted,
    /// A synchronization object was destroyed twice.
    ObjectDestroyedTwice,
}

impl From<InconsistentError> for FatalError {
    fn from(_: InconsistentError) -> Self {
        Self::CorruptedList
    }
}

impl From<InsertError> for FatalError {
    fn from(_: InsertError) -> Self {
        Self::CorruptedList
    }
}

impl From<ItemError> for FatalError {
    fn from(_: ItemError) -> Self {
        Self::CorruptedList
    }
}

/// Diagnostic information handed to [`Port::fatal_error`].
///
/// [`Port::fatal_error`]: crate::Port::fatal_error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FatalInfo {
    pub error: FatalError,
    /// The thread that was running when the condition was detected.
    pub thread: Option<ThreadId>,
    /// The interrupt nesting level at the time of detection.
    pub isr_nesting: usize,
}

impl fmt::Display for FatalInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self.error)?;
        if let Some(thread) = self.thread {
            write!(f, " (thread {thread:?}")?;
        } else {
            f.write_str(" (idle")?;
        }
        write!(f, ", ISR nesting {})", self.isr_nesting)
    }
}

/// Report `info` and hand it off to the port's policy.
pub(crate) fn report<Traits: KernelTraits>(port: &Traits, info: FatalInfo) -> ! {
    log::error!("fatal kernel error: {info}");
    port.fatal_error(&info)
}
