#![allow(dead_code)] // not every test uses every helper
use kestrel_kernel::{Kernel, KernelTraits, Priority, ThreadAttr, ThreadId, ThreadState};
use std::sync::atomic::{AtomicUsize, Ordering};

/// An atomic counter for checking an execution sequence.
pub struct SeqTracker {
    counter: AtomicUsize,
}

impl SeqTracker {
    /// Construct `SeqTracker`.
    pub const fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
        }
    }

    pub fn get(&self) -> usize {
        self.counter.load(Ordering::Relaxed)
    }

    /// Assert that the counter is equal to `old` and then replace it with
    /// `new`.
    #[track_caller]
    pub fn expect_and_replace(&self, old: usize, new: usize) {
        let got = self.counter.load(Ordering::Relaxed);
        log::debug!("{} (expected: {}) → {}", got, old, new);
        assert_eq!(got, old, "expected {}, got {}", old, got);
        self.counter.store(new, Ordering::Relaxed);
    }
}

/// Create a thread and make it Ready.
#[track_caller]
pub fn spawn<Traits: KernelTraits>(
    kernel: &Kernel<Traits>,
    name: &'static str,
    priority: Priority,
) -> ThreadId {
    let thread = kernel.thread_create(ThreadAttr::new(name, priority)).unwrap();
    kernel.thread_start(thread).unwrap();
    thread
}

/// Create and start the threads, then start the scheduler.
#[track_caller]
pub fn boot<Traits: KernelTraits>(
    kernel: &Kernel<Traits>,
    threads: &[(&'static str, Priority)],
) -> Vec<ThreadId> {
    let threads = threads
        .iter()
        .map(|&(name, priority)| spawn(kernel, name, priority))
        .collect();
    kernel.start().unwrap();
    threads
}

#[track_caller]
pub fn assert_state<Traits: KernelTraits>(
    kernel: &Kernel<Traits>,
    thread: ThreadId,
    state: ThreadState,
) {
    assert_eq!(kernel.thread_state(thread), Ok(state), "{thread:?}");
}
