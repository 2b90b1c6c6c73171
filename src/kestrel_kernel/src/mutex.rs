//! Mutexes with priority inheritance
//!
//! A thread waiting for a mutex lends its effective priority to the owner.
//! The owner's effective priority is the most urgent of its base priority
//! and the priorities of the first waiters of all the mutexes it holds. The
//! inheritance is not transitive: a boosted owner that itself waits for
//! another mutex doesn't boost that mutex's owner further.
use crate::{
    error::BadIdError,
    fatal::FatalError,
    priority::Priority,
    state::State,
    thread::{self, ThreadSt},
    utils::VecLike,
    wait::{self, WaitObject, WaitPayload, WaitQueue},
    wake_outcome, CreateObjectError, DestroyObjectError, Kernel, KernelTraits, LockMutexError,
    MutexId, QueryError, QueueOrder, ThreadId, Timeout, UnlockMutexError, WaitError, WaitOutcome,
};

/// *Mutex control block* - the state data of a mutex.
#[doc(hidden)]
#[derive(Debug)]
pub struct MutexCb {
    /// The thread that currently owns the mutex lock.
    pub(crate) owner: Option<ThreadId>,

    /// The number of times the owner has locked the mutex.
    pub(crate) lock_count: u32,

    /// Always priority-ordered.
    pub(crate) wait_queue: WaitQueue,

    /// The next element in the singly-linked list headed by
    /// `ThreadCb::last_mutex_held`, containing all mutexes currently held by
    /// the owner.
    pub(crate) prev_held: Option<MutexId>,

    pub(crate) alive: bool,
}

impl MutexCb {
    const fn new() -> Self {
        Self {
            owner: None,
            lock_count: 0,
            wait_queue: WaitQueue::new(QueueOrder::Priority),
            prev_held: None,
            alive: true,
        }
    }
}

/// Reevaluate the thread's effective priority and return the result.
/// (This function doesn't update `ThreadCb::effective_priority`.)
pub(crate) fn evaluate_effective_priority<Traits: KernelTraits>(
    st: &mut State<Traits>,
    thread: ThreadId,
) -> Result<Priority, FatalError> {
    let cb = &st.threads[thread.index()];
    let mut effective_priority = cb.base_priority;
    let mut maybe_mutex = cb.last_mutex_held;

    // A thread can't hold more mutexes than exist. Anything longer is a
    // cycle.
    let mut budget = st.mutexes.len();

    while let Some(mutex) = maybe_mutex {
        budget = budget.checked_sub(1).ok_or(FatalError::CorruptedList)?;

        let mutex_cb = &st.mutexes[mutex.index()];
        if let Some(waiter) = mutex_cb.wait_queue.first() {
            effective_priority = effective_priority.min(st.threads[waiter.index()].effective_priority);
        }

        maybe_mutex = mutex_cb.prev_held;
    }

    Ok(effective_priority)
}

/// Recalculate the effective priority of the mutex's owner, if any. Must be
/// called whenever the first waiter of the mutex or its priority changes.
pub(crate) fn reevaluate_owner<Traits: KernelTraits>(
    st: &mut State<Traits>,
    mutex: MutexId,
) -> Result<(), FatalError> {
    match st.mutexes[mutex.index()].owner {
        Some(owner) => thread::update_effective_priority(st, owner),
        None => Ok(()),
    }
}

/// Give the ownership of the mutex to `thread`.
///
/// This function doesn't update the thread's effective priority. The mutex
/// must be unowned.
fn lock_core<Traits: KernelTraits>(st: &mut State<Traits>, mutex: MutexId, thread: ThreadId) {
    debug_assert!(matches!(
        st.threads[thread.index()].st,
        ThreadSt::Running | ThreadSt::Waiting
    ));

    // Push `mutex` to the list of the mutexes held by the thread.
    let prev_held = st.threads[thread.index()].last_mutex_held.replace(mutex);

    let mutex_cb = &mut st.mutexes[mutex.index()];
    debug_assert!(mutex_cb.owner.is_none());
    mutex_cb.owner = Some(thread);
    mutex_cb.lock_count = 1;
    mutex_cb.prev_held = prev_held;
}

/// Remove `mutex` from the list of the mutexes held by `thread`. The mutex
/// doesn't have to be the last one locked.
fn unlink_held<Traits: KernelTraits>(
    st: &mut State<Traits>,
    mutex: MutexId,
    thread: ThreadId,
) -> Result<(), FatalError> {
    let prev_held = st.mutexes[mutex.index()].prev_held.take();

    let head = &mut st.threads[thread.index()].last_mutex_held;
    if *head == Some(mutex) {
        *head = prev_held;
        return Ok(());
    }

    let mut maybe_mutex = *head;
    while let Some(cursor) = maybe_mutex {
        let cursor_cb = &mut st.mutexes[cursor.index()];
        if cursor_cb.prev_held == Some(mutex) {
            cursor_cb.prev_held = prev_held;
            return Ok(());
        }
        maybe_mutex = cursor_cb.prev_held;
    }

    // The mutex claims to be owned by a thread that doesn't hold it
    Err(FatalError::CorruptedList)
}

/// Pass the ownership of the mutex to the next waiter, or leave it unowned
/// if there's no waiter. The previous owner must have already unlinked the
/// mutex from its held list.
///
/// This may make a thread Ready, but doesn't yield the processor.
fn unlock_core<Traits: KernelTraits>(
    st: &mut State<Traits>,
    mutex: MutexId,
) -> Result<(), FatalError> {
    let mutex_cb = &mut st.mutexes[mutex.index()];
    mutex_cb.owner = None;
    mutex_cb.lock_count = 0;

    if let Some(next) = wait::first_waiter(st, WaitObject::Mutex(mutex)) {
        lock_core(st, mutex, next);

        // Waking up `next` takes it out of the wait queue, after which the
        // new owner's effective priority is evaluated with the remaining
        // waiters
        wait::complete_wait(st, next, Ok(0))?;
        log::trace!("{mutex:?} handed over to {next:?}");
    }

    Ok(())
}

/// Release a mutex owned by `thread` and restore the thread's effective
/// priority.
fn release<Traits: KernelTraits>(
    st: &mut State<Traits>,
    mutex: MutexId,
    thread: ThreadId,
) -> Result<(), FatalError> {
    unlink_held(st, mutex, thread)?;
    unlock_core(st, mutex)?;

    // Lower the thread's effective priority. This may cause preemption.
    thread::update_effective_priority(st, thread)
}

/// Abandon all mutexes held by `thread`, which has just terminated.
///
/// This function doesn't restore the thread's effective priority.
///
/// This may make a thread Ready, but doesn't yield the processor.
pub(crate) fn abandon_held_mutexes<Traits: KernelTraits>(
    st: &mut State<Traits>,
    thread: ThreadId,
) -> Result<(), FatalError> {
    let mut maybe_mutex = st.threads[thread.index()].last_mutex_held.take();
    while let Some(mutex) = maybe_mutex {
        maybe_mutex = st.mutexes[mutex.index()].prev_held.take();
        log::warn!("{thread:?} terminated while holding {mutex:?}");
        unlock_core(st, mutex)?;
    }
    Ok(())
}

impl<Traits: KernelTraits> Kernel<Traits> {
    /// Create a mutex.
    pub fn mutex_create(&self) -> Result<MutexId, CreateObjectError> {
        let mut lock = self.lock_cpu()?;
        let st = lock.state();
        let id = MutexId::from_index(st.mutexes.len());
        st.mutexes
            .try_push(MutexCb::new())
            .map_err(|_| CreateObjectError::QueueOverflow)?;
        log::debug!("created {id:?}");
        Ok(id)
    }

    /// Lock a mutex, blocking the running thread until the mutex is
    /// available.
    ///
    /// The mutex is recursive: the owner can lock it again, and must unlock
    /// it as many times. While the running thread waits, the owner inherits
    /// its effective priority.
    pub fn mutex_lock(&self, mutex: MutexId, timeout: Timeout) -> Result<WaitOutcome<()>, LockMutexError> {
        let mut lock = self.lock_cpu()?;
        let st = lock.state();
        if !timeout.is_poll() {
            self.expect_waitable_context(st);
        }
        let owner = st.mutex(mutex)?.owner;
        let thread = st.current_thread()?;

        match owner {
            None => {
                lock_core(st, mutex, thread);
                log::trace!("{thread:?} locked {mutex:?}");
                return Ok(WaitOutcome::Done(()));
            }
            Some(owner) if owner == thread => {
                let mutex_cb = &mut st.mutexes[mutex.index()];
                mutex_cb.lock_count = mutex_cb.lock_count.saturating_add(1);
                return Ok(WaitOutcome::Done(()));
            }
            Some(_) if timeout.is_poll() => return Err(LockMutexError::WouldBlock),
            Some(_) => {}
        }

        // The wake-upper is responsible for transferring the ownership
        // before waking us up
        let result = wait::begin_wait(st, thread, WaitObject::Mutex(mutex), WaitPayload::None, timeout)
            .and_then(|()| reevaluate_owner(st, mutex));
        self.ok_or_fatal(result, st);

        let result = self.wait_until_woken_up(lock, thread)?;
        Ok(wake_outcome(result)?.map(|_| ()))
    }

    /// Unlock a mutex held by the running thread.
    ///
    /// When the lock count drops to zero, the running thread's effective
    /// priority is recalculated and the mutex is handed over to the most
    /// urgent waiter.
    pub fn mutex_unlock(&self, mutex: MutexId) -> Result<(), UnlockMutexError> {
        let mut lock = self.lock_cpu()?;
        let st = lock.state();
        let mutex_cb = st.mutex(mutex)?;
        let owner = mutex_cb.owner;
        let thread = st.current_thread()?;

        if owner != Some(thread) {
            return Err(UnlockMutexError::NotOwner);
        }

        let mutex_cb = &mut st.mutexes[mutex.index()];
        if mutex_cb.lock_count > 1 {
            mutex_cb.lock_count -= 1;
            return Ok(());
        }

        let result = release(st, mutex, thread);
        self.ok_or_fatal(result, st);
        log::trace!("{thread:?} unlocked {mutex:?}");

        self.unlock_cpu_and_reschedule(lock);
        Ok(())
    }

    /// Get the owner of a mutex.
    pub fn mutex_owner(&self, mutex: MutexId) -> Result<Option<ThreadId>, QueryError> {
        let mut lock = self.lock_cpu()?;
        Ok(lock.state().mutex(mutex)?.owner)
    }

    /// Destroy a mutex.
    ///
    /// A mutex that is locked or has waiters can only be destroyed with
    /// `force`, in which case the waiters are woken up with `Cancelled` and
    /// the owner loses the priority it inherited.
    pub fn mutex_destroy(&self, mutex: MutexId, force: bool) -> Result<(), DestroyObjectError> {
        let mut lock = self.lock_cpu()?;
        let st = lock.state();
        let mutex_cb = st.mutexes.get(mutex.index()).ok_or(BadIdError::BadId)?;
        if !mutex_cb.alive {
            self.report_fatal(FatalError::ObjectDestroyedTwice, st);
        }
        let owner = mutex_cb.owner;
        if (owner.is_some() || !mutex_cb.wait_queue.is_empty()) && !force {
            return Err(DestroyObjectError::BadObjectState);
        }

        let result = wait::dequeue_all(st, WaitObject::Mutex(mutex), Err(WaitError::Cancelled))
            .and_then(|_| match owner {
                Some(owner) => {
                    unlink_held(st, mutex, owner)?;
                    let mutex_cb = &mut st.mutexes[mutex.index()];
                    mutex_cb.owner = None;
                    mutex_cb.lock_count = 0;
                    thread::update_effective_priority(st, owner)
                }
                None => Ok(()),
            });
        self.ok_or_fatal(result, st);
        st.mutexes[mutex.index()].alive = false;
        log::debug!("destroyed {mutex:?}");

        self.unlock_cpu_and_reschedule(lock);
        Ok(())
    }
}
