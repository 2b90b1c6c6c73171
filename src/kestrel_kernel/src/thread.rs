//! Threads and the scheduler core
use core::{fmt, ptr::NonNull};
use num_traits::ToPrimitive;

use crate::{
    error::BadContextError,
    fatal::FatalError,
    mutex,
    priority::{is_preemptible, Priority},
    priority_range,
    state::State,
    timeout::{self, TimeoutNode, TimeoutOwner},
    utils::{intrusive_list::Link, VecLike},
    wait::{self, ThreadWait, WaitObject, WaitPayload, WaitQueue},
    wake_outcome, ContextRef, CreateThreadError, CurrentThreadError, JoinThreadError,
    Kernel, KernelContextError, KernelTraits, MutexId, Port, QueryError, QueueOrder,
    SetThreadPriorityError, SleepError, ThreadId, ThreadStateError, Ticks, Timeout, WaitError,
    WaitOutcome,
};

pub(crate) mod readyqueue;
use self::readyqueue::ReadyLinks;

bitflags::bitflags! {
    /// Options for [`ThreadAttr`].
    pub struct ThreadOptions: u8 {
        /// The system can't continue without this thread. Aborting or
        /// exiting it is a fatal error.
        const ESSENTIAL = 1 << 0;
    }
}

/// The creation parameters of a thread.
#[derive(Debug, Clone, Copy)]
pub struct ThreadAttr {
    /// A human-readable name used in log messages.
    pub name: &'static str,
    /// The initial base priority.
    pub priority: Priority,
    pub options: ThreadOptions,
}

impl ThreadAttr {
    pub const fn new(name: &'static str, priority: Priority) -> Self {
        Self {
            name,
            priority,
            options: ThreadOptions::empty(),
        }
    }

    pub const fn options(self, options: ThreadOptions) -> Self {
        Self { options, ..self }
    }
}

/// Thread state machine
///
/// `Waiting` covers both waits with and without a timeout; they are told
/// apart by whether the thread's timeout node is armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ThreadSt {
    Dormant,
    Ready,
    Running,
    Waiting,
    Suspended,
    Dead,
}

/// The state of a thread as observed by [`Kernel::thread_state`].
#[doc = svgbobdoc::transform!(
/// ```svgbob
///                  start        .-------.      resume     .-----------.
///   .---------. --------------->| Ready |<----------------| Suspended |
///   | Dormant |                 '-------'                 '-----------'
///   '---------'     wake, timeout ^ | ^ |                        ^
///                                 | | | | dispatch               | suspend
///    .-----------------------.    | | | v                        |
///    | Waiting               |----' | .---------.                |
///    | WaitingWithTimeout    |<-----+-| Running |----------------'
///    '-----------------------'  block '---------'
///                               preempt,  |
///                               yield     | exit, abort
///                                         v
///                                     .------.
///                                     | Dead |
///                                     '------'
/// ```
)]
///
/// Any thread that is not yet `Dead` can be aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadState {
    /// Created but not started yet.
    Dormant,
    /// Waiting for the processor in the ready queue.
    Ready,
    /// Owns the processor.
    Running,
    /// Blocked without a timeout.
    Waiting,
    /// Blocked with a timeout.
    WaitingWithTimeout,
    /// Taken out of scheduling until resumed.
    Suspended,
    /// Exited or aborted.
    Dead,
}

/// *Thread control block* - the state data of a thread.
#[doc(hidden)]
pub struct ThreadCb<Traits: Port> {
    /// The saved register context.
    pub(crate) port_state: Traits::PortThreadState,

    pub(crate) attr: ThreadAttr,

    /// The thread's base priority.
    pub(crate) base_priority: Priority,

    /// The thread's effective priority. It's calculated based on
    /// `base_priority` and may be temporarily elevated by the priority
    /// inheritance of held mutexes.
    ///
    /// The effective priority determines the thread's position within the
    /// ready queue and priority-ordered wait queues. Use
    /// `update_effective_priority` to change it.
    pub(crate) effective_priority: Priority,

    pub(crate) st: ThreadSt,

    /// Links the thread into the ready queue while it's Ready.
    pub(crate) ready_link: Option<Link<ThreadId>>,

    pub(crate) wait: ThreadWait,

    /// Wakes up the thread when a timed wait expires.
    pub(crate) timeout: TimeoutNode,

    /// The last mutex locked by the thread. The rest of the held mutexes
    /// are chained through `MutexCb::prev_held`.
    pub(crate) last_mutex_held: Option<MutexId>,

    /// Threads joining this thread.
    pub(crate) join_queue: WaitQueue,
}

impl<Traits: Port> ThreadCb<Traits> {
    fn new(attr: ThreadAttr) -> Self {
        Self {
            port_state: Default::default(),
            attr,
            base_priority: attr.priority,
            effective_priority: attr.priority,
            st: ThreadSt::Dormant,
            ready_link: None,
            wait: ThreadWait::new(),
            timeout: TimeoutNode::default(),
            last_mutex_held: None,
            join_queue: WaitQueue::new(QueueOrder::Fifo),
        }
    }
}

impl<Traits: Port> fmt::Debug for ThreadCb<Traits> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ThreadCb")
            .field("port_state", &self.port_state)
            .field("attr", &self.attr)
            .field("base_priority", &self.base_priority)
            .field("effective_priority", &self.effective_priority)
            .field("st", &self.st)
            .field("wait", &self.wait)
            .field("timeout", &self.timeout)
            .field("last_mutex_held", &self.last_mutex_held)
            .finish_non_exhaustive()
    }
}

impl<Traits: Port> ReadyLinks for [ThreadCb<Traits>] {
    #[inline]
    fn ready_link(&mut self, thread: ThreadId) -> &mut Option<Link<ThreadId>> {
        &mut self[thread.index()].ready_link
    }
}

/// These associate functions implement the thread services and the
/// scheduler.
impl<Traits: KernelTraits> Kernel<Traits> {
    /// Create a thread in the Dormant state.
    pub fn thread_create(&self, attr: ThreadAttr) -> Result<ThreadId, CreateThreadError> {
        let mut lock = self.lock_cpu()?;
        let st = lock.state();

        if !priority_range::<Traits>().is_valid(attr.priority) {
            return Err(CreateThreadError::BadParam);
        }

        let thread = ThreadId::from_index(st.threads.len());
        st.threads
            .try_push(ThreadCb::new(attr))
            .map_err(|_| CreateThreadError::QueueOverflow)?;

        log::debug!(
            "created {thread:?} ({:?}, priority {})",
            attr.name,
            attr.priority
        );
        Ok(thread)
    }

    /// Transition a Dormant thread into the Ready state.
    pub fn thread_start(&self, thread: ThreadId) -> Result<(), ThreadStateError> {
        let mut lock = self.lock_cpu()?;
        let st = lock.state();
        let cb = st.thread(thread)?;

        if cb.st != ThreadSt::Dormant {
            return Err(ThreadStateError::BadObjectState);
        }

        self.port
            .initialize_thread_state(thread, &mut cb.port_state);

        let result = make_ready(st, thread);
        self.ok_or_fatal(result, st);

        self.unlock_cpu_and_reschedule(lock);
        Ok(())
    }

    /// Take a Ready or Running thread out of scheduling.
    pub fn thread_suspend(&self, thread: ThreadId) -> Result<(), ThreadStateError> {
        let mut lock = self.lock_cpu()?;
        let st = lock.state();
        let cb = st.thread(thread)?;

        match cb.st {
            ThreadSt::Ready => {
                let priority = cb.effective_priority;
                let result = st.ready_queue.remove(&mut *st.threads, thread, priority);
                self.ok_or_fatal(result, st);
            }
            ThreadSt::Running => {}
            _ => return Err(ThreadStateError::BadObjectState),
        }

        st.threads[thread.index()].st = ThreadSt::Suspended;
        log::trace!("{thread:?} suspended");

        self.unlock_cpu_and_reschedule(lock);
        Ok(())
    }

    /// Put a Suspended thread back to the ready queue.
    pub fn thread_resume(&self, thread: ThreadId) -> Result<(), ThreadStateError> {
        let mut lock = self.lock_cpu()?;
        let st = lock.state();

        if st.thread(thread)?.st != ThreadSt::Suspended {
            return Err(ThreadStateError::BadObjectState);
        }

        let result = make_ready(st, thread);
        self.ok_or_fatal(result, st);
        log::trace!("{thread:?} resumed");

        self.unlock_cpu_and_reschedule(lock);
        Ok(())
    }

    /// Terminate a thread in any state but Dead.
    ///
    /// The thread leaves whatever queue it's in, mutexes it holds are handed
    /// over to their next waiters, and threads joining it are woken up.
    pub fn thread_abort(&self, thread: ThreadId) -> Result<(), ThreadStateError> {
        let mut lock = self.lock_cpu()?;
        let st = lock.state();
        let cb = st.thread(thread)?;

        if cb.st == ThreadSt::Dead {
            return Err(ThreadStateError::BadObjectState);
        }
        if cb.attr.options.contains(ThreadOptions::ESSENTIAL) {
            self.report_fatal(FatalError::EssentialThreadAborted, st);
        }

        let result = terminate(st, thread);
        self.ok_or_fatal(result, st);

        self.unlock_cpu_and_reschedule(lock);
        Ok(())
    }

    /// Terminate the running thread.
    pub fn thread_exit(&self) -> Result<(), CurrentThreadError> {
        let mut lock = self.lock_cpu()?;
        let st = lock.state();
        let thread = st.current_thread()?;

        if st.threads[thread.index()]
            .attr
            .options
            .contains(ThreadOptions::ESSENTIAL)
        {
            self.report_fatal(FatalError::EssentialThreadAborted, st);
        }

        let result = terminate(st, thread);
        self.ok_or_fatal(result, st);

        self.unlock_cpu_and_reschedule(lock);
        Ok(())
    }

    /// Move the running thread to the back of its priority's ready queue,
    /// letting threads of the same priority run.
    pub fn yield_now(&self) -> Result<(), CurrentThreadError> {
        let mut lock = self.lock_cpu()?;
        let st = lock.state();
        let thread = st.current_thread()?;

        let result = make_ready(st, thread);
        self.ok_or_fatal(result, st);

        self.unlock_cpu_and_reschedule(lock);
        Ok(())
    }

    /// Block the running thread for the specified duration.
    ///
    /// Returns the number of ticks that were left when the thread was woken
    /// up by [`Self::thread_wakeup`], or `0` if it slept to the end. A poll
    /// timeout just yields the processor.
    pub fn sleep(&self, timeout: Timeout) -> Result<WaitOutcome<Ticks>, SleepError> {
        let mut lock = self.lock_cpu()?;
        let st = lock.state();
        if !timeout.is_poll() {
            self.expect_waitable_context(st);
        }
        let thread = st.current_thread()?;

        if timeout.is_poll() {
            let result = make_ready(st, thread);
            self.ok_or_fatal(result, st);
            self.unlock_cpu_and_reschedule(lock);
            return Ok(WaitOutcome::Done(0));
        }

        let result = wait::begin_wait(st, thread, WaitObject::Sleep, WaitPayload::None, timeout);
        self.ok_or_fatal(result, st);

        match self.wait_until_woken_up(lock, thread)? {
            None => Ok(WaitOutcome::Pending),
            Some(Ok(remaining)) => Ok(WaitOutcome::Done(
                remaining.to_u32().unwrap_or(Ticks::MAX),
            )),
            Some(Err(WaitError::Timeout)) => Ok(WaitOutcome::Done(0)),
            Some(Err(WaitError::Cancelled)) => Err(SleepError::Cancelled),
        }
    }

    /// Wake up a sleeping thread before its sleep ends.
    pub fn thread_wakeup(&self, thread: ThreadId) -> Result<(), ThreadStateError> {
        let mut lock = self.lock_cpu()?;
        let st = lock.state();
        let cb = st.thread(thread)?;

        if cb.st != ThreadSt::Waiting || cb.wait.object != Some(WaitObject::Sleep) {
            return Err(ThreadStateError::BadObjectState);
        }

        let result = timeout::remaining(st, TimeoutOwner::ThreadWake(thread)).and_then(|remaining| {
            // A thread sleeping forever has infinitely many ticks left
            let remaining = remaining.unwrap_or(Ticks::MAX);
            wait::complete_wait(st, thread, Ok(remaining as usize))
        });
        self.ok_or_fatal(result, st);

        self.unlock_cpu_and_reschedule(lock);
        Ok(())
    }

    /// Block the running thread until `target` terminates.
    pub fn thread_join(
        &self,
        target: ThreadId,
        timeout: Timeout,
    ) -> Result<WaitOutcome<()>, JoinThreadError> {
        let mut lock = self.lock_cpu()?;
        let st = lock.state();
        if !timeout.is_poll() {
            self.expect_waitable_context(st);
        }
        let target_st = st.thread(target)?.st;

        if st.current_thread().ok() == Some(target) {
            return Err(JoinThreadError::WouldDeadlock);
        }
        if target_st == ThreadSt::Dead {
            return Ok(WaitOutcome::Done(()));
        }
        if timeout.is_poll() {
            return Err(JoinThreadError::WouldBlock);
        }

        let thread = st.current_thread()?;
        let result = wait::begin_wait(st, thread, WaitObject::Join(target), WaitPayload::None, timeout);
        self.ok_or_fatal(result, st);

        let result = self.wait_until_woken_up(lock, thread)?;
        Ok(wake_outcome(result)?.map(|_| ()))
    }

    /// Get the base priority of a thread.
    pub fn thread_priority(&self, thread: ThreadId) -> Result<Priority, QueryError> {
        let mut lock = self.lock_cpu()?;
        Ok(lock.state().thread(thread)?.base_priority)
    }

    /// Get the effective priority of a thread, which may be elevated by
    /// priority inheritance.
    pub fn thread_effective_priority(&self, thread: ThreadId) -> Result<Priority, QueryError> {
        let mut lock = self.lock_cpu()?;
        Ok(lock.state().thread(thread)?.effective_priority)
    }

    /// Change the base priority of a thread.
    ///
    /// The thread is repositioned in the ready queue or wait queue it's in,
    /// and the owner of the mutex it waits for (if any) has its effective
    /// priority re-evaluated.
    pub fn thread_set_priority(
        &self,
        thread: ThreadId,
        priority: Priority,
    ) -> Result<(), SetThreadPriorityError> {
        let mut lock = self.lock_cpu()?;
        let st = lock.state();

        if !priority_range::<Traits>().is_valid(priority) {
            return Err(SetThreadPriorityError::BadParam);
        }

        let cb = st.thread(thread)?;
        match cb.st {
            ThreadSt::Dead => return Err(SetThreadPriorityError::BadObjectState),
            ThreadSt::Dormant => {
                cb.base_priority = priority;
                cb.effective_priority = priority;
                return Ok(());
            }
            _ => {}
        }
        cb.base_priority = priority;
        let waited_mutex = match cb.wait.object {
            Some(WaitObject::Mutex(mutex)) => Some(mutex),
            _ => None,
        };

        let result = update_effective_priority(st, thread).and_then(|()| match waited_mutex {
            Some(mutex) => mutex::reevaluate_owner(st, mutex),
            None => Ok(()),
        });
        self.ok_or_fatal(result, st);

        self.unlock_cpu_and_reschedule(lock);
        Ok(())
    }

    /// Get the state of a thread.
    pub fn thread_state(&self, thread: ThreadId) -> Result<ThreadState, QueryError> {
        let mut lock = self.lock_cpu()?;
        let cb = lock.state().thread(thread)?;
        Ok(match cb.st {
            ThreadSt::Dormant => ThreadState::Dormant,
            ThreadSt::Ready => ThreadState::Ready,
            ThreadSt::Running => ThreadState::Running,
            ThreadSt::Waiting if cb.timeout.is_armed() => ThreadState::WaitingWithTimeout,
            ThreadSt::Waiting => ThreadState::Waiting,
            ThreadSt::Suspended => ThreadState::Suspended,
            ThreadSt::Dead => ThreadState::Dead,
        })
    }

    /// Get the thread owning the processor. In an interrupt handler, this is
    /// the interrupted thread.
    pub fn current_thread(&self) -> Result<Option<ThreadId>, KernelContextError> {
        let mut lock = self.lock_cpu()?;
        Ok(lock.state().running_thread())
    }

    /// Collect the result of the last completed wait of a thread. Returns
    /// `None` if the thread is still waiting or the result was already
    /// collected.
    ///
    /// The value is `0` for waits that don't deliver a value.
    pub fn take_wait_result(
        &self,
        thread: ThreadId,
    ) -> Result<Option<Result<usize, WaitError>>, QueryError> {
        let mut lock = self.lock_cpu()?;
        Ok(lock.state().thread(thread)?.wait.result.take())
    }

    /// Relinquish the CPU lock. Before that, elect the thread to run and
    /// switch to it if it's not the current one.
    ///
    /// Services that may make a thread Ready or take the running thread out
    /// of the Running state should call this before returning to the caller.
    /// In an interrupt handler, the election is deferred to the outermost
    /// [`Self::isr_exit`]. If the caller masked interrupts by
    /// [`Self::irq_lock`], it's deferred to the outermost
    /// [`Self::irq_unlock`].
    pub(crate) fn unlock_cpu_and_reschedule(&self, mut lock: crate::klock::CpuLockGuard<'_, Traits>) {
        let irq_was_locked = lock.irq_was_locked();
        let st = lock.state();

        if !st.started {
            return;
        }
        if st.isr_nesting > 0 || irq_was_locked {
            st.reschedule_pending = true;
            return;
        }

        self.unlock_cpu_and_switch(lock);
    }

    /// Elect the thread to run and switch to it with interrupts masked. The
    /// port unmasks them as part of the switch, so an interrupt handler
    /// can't observe [`State::running`] pointing to a thread that doesn't
    /// own the processor yet.
    ///
    /// Unlike [`Self::unlock_cpu_and_reschedule`], this doesn't defer the
    /// switch if interrupts were masked before the CPU lock was taken.
    pub(crate) fn unlock_cpu_and_switch(&self, mut lock: crate::klock::CpuLockGuard<'_, Traits>) {
        let st = lock.state();
        if !st.started {
            return;
        }
        st.reschedule_pending = false;

        let prev = st.running;
        let result = choose_next_running_thread(st);
        let next = self.ok_or_fatal(result, st);

        if prev == next {
            return;
        }

        let prev_ctx = prev.map(|thread| context_ref(st, thread));
        let next_ctx = next.map(|thread| context_ref(st, thread));

        // Relinquish the CPU lock, but not the interrupt mask
        let key = lock.unlock_keeping_irq_masked();

        log::trace!("switching from {prev:?} to {next:?}");

        // Safety: The kernel state is unlocked and interrupts are masked.
        //         The pointees of the context references are in the thread
        //         pool, which is never reallocated, and `self` is borrowed
        //         for the whole call.
        unsafe { self.port.switch_context(prev_ctx, next_ctx, key) };
    }

    /// Switch the running thread `thread`, which has just entered the
    /// Waiting state, out. Returns the posted wait result if the thread is
    /// running again by the time the port's context switch returns.
    pub(crate) fn wait_until_woken_up(
        &self,
        lock: crate::klock::CpuLockGuard<'_, Traits>,
        thread: ThreadId,
    ) -> Result<Option<Result<usize, WaitError>>, BadContextError> {
        self.unlock_cpu_and_reschedule(lock);

        let mut lock = self.lock_cpu()?;
        let st = lock.state();
        if st.running_thread() == Some(thread) {
            Ok(st.threads[thread.index()].wait.result.take())
        } else {
            Ok(None)
        }
    }
}

fn context_ref<Traits: KernelTraits>(st: &mut State<Traits>, thread: ThreadId) -> ContextRef<Traits> {
    ContextRef {
        thread,
        state: NonNull::from(&mut st.threads[thread.index()].port_state),
    }
}

/// Transition `thread` into the Ready state and insert it at the back of
/// its priority's ready queue.
pub(crate) fn make_ready<Traits: KernelTraits>(
    st: &mut State<Traits>,
    thread: ThreadId,
) -> Result<(), FatalError> {
    let cb = &mut st.threads[thread.index()];
    cb.st = ThreadSt::Ready;
    let priority = cb.effective_priority;
    st.ready_queue.push_back(&mut *st.threads, thread, priority)
}

/// Decide the next thread to run and update [`State::running`].
///
/// The running thread keeps the processor unless it left the Running state
/// or it's preemptible and a strictly more urgent thread is ready. A
/// preempted thread is put back at the front of its ready queue so that it
/// resumes before its peers.
pub(crate) fn choose_next_running_thread<Traits: KernelTraits>(
    st: &mut State<Traits>,
) -> Result<Option<ThreadId>, FatalError> {
    let highest = st.ready_queue.highest_priority();

    if let Some(running) = st.running_thread() {
        let priority = st.threads[running.index()].effective_priority;
        let preempted = is_preemptible(priority) && highest.map_or(false, |h| h < priority);
        if !preempted {
            return Ok(Some(running));
        }

        st.threads[running.index()].st = ThreadSt::Ready;
        st.ready_queue
            .push_front(&mut *st.threads, running, priority)?;
    }

    let next = st.ready_queue.pop_highest(&mut *st.threads)?;
    if let Some(next) = next {
        st.threads[next.index()].st = ThreadSt::Running;
    }

    if next != st.running {
        st.slice_remaining = Traits::TIME_SLICE_TICKS;
    }
    st.running = next;

    Ok(next)
}

fn is_time_sliced<Traits: KernelTraits>(priority: Priority) -> bool {
    Traits::TIME_SLICE_TICKS > 0
        && is_preemptible(priority)
        && priority >= Traits::TIME_SLICE_PRIORITY
}

/// Charge `ticks` to the running thread's time slice. When the slice runs
/// out and another thread of the same priority is ready, the running thread
/// is moved to the back of the ready queue.
pub(crate) fn advance_time_slice<Traits: KernelTraits>(
    st: &mut State<Traits>,
    ticks: Ticks,
) -> Result<(), FatalError> {
    let Some(thread) = st.running_thread() else {
        return Ok(());
    };
    let priority = st.threads[thread.index()].effective_priority;
    if !is_time_sliced::<Traits>(priority) {
        return Ok(());
    }

    st.slice_remaining = st.slice_remaining.saturating_sub(ticks);
    if st.slice_remaining > 0 {
        return Ok(());
    }

    st.slice_remaining = Traits::TIME_SLICE_TICKS;
    if st.ready_queue.has_other_at(priority) {
        log::trace!("{thread:?} used up its time slice");
        make_ready(st, thread)?;
    }
    Ok(())
}

/// Get the number of ticks until the running thread's time slice runs out,
/// if that would cause a context switch.
pub(crate) fn time_slice_remaining<Traits: KernelTraits>(st: &State<Traits>) -> Option<Ticks> {
    let thread = st.running_thread()?;
    let priority = st.threads[thread.index()].effective_priority;
    (is_time_sliced::<Traits>(priority) && st.ready_queue.has_other_at(priority))
        .then_some(st.slice_remaining)
}

/// Recalculate the effective priority of `thread` and reposition it in the
/// queue it's in. Doesn't propagate the change to the owner of a mutex the
/// thread is waiting for.
pub(crate) fn update_effective_priority<Traits: KernelTraits>(
    st: &mut State<Traits>,
    thread: ThreadId,
) -> Result<(), FatalError> {
    let new = mutex::evaluate_effective_priority(st, thread)?;
    let cb = &mut st.threads[thread.index()];
    let old = cb.effective_priority;
    if new == old {
        return Ok(());
    }

    log::debug!("{thread:?}'s effective priority: {old} -> {new}");

    match cb.st {
        ThreadSt::Ready => {
            // Remove it with the priority it was inserted with
            st.ready_queue.remove(&mut *st.threads, thread, old)?;
            st.threads[thread.index()].effective_priority = new;
            st.ready_queue.push_back(&mut *st.threads, thread, new)?;
        }
        ThreadSt::Waiting => {
            cb.effective_priority = new;
            wait::reorder(st, thread)?;
        }
        ThreadSt::Dormant | ThreadSt::Running | ThreadSt::Suspended | ThreadSt::Dead => {
            cb.effective_priority = new;
        }
    }

    Ok(())
}

/// Transition `thread` into the Dead state, wherever it is.
fn terminate<Traits: KernelTraits>(
    st: &mut State<Traits>,
    thread: ThreadId,
) -> Result<(), FatalError> {
    let cb = &st.threads[thread.index()];
    match cb.st {
        ThreadSt::Ready => {
            let priority = cb.effective_priority;
            st.ready_queue.remove(&mut *st.threads, thread, priority)?;
        }
        ThreadSt::Waiting => {
            wait::detach(st, thread)?;
        }
        ThreadSt::Dormant | ThreadSt::Running | ThreadSt::Suspended | ThreadSt::Dead => {}
    }
    st.threads[thread.index()].st = ThreadSt::Dead;

    // Abandon mutexes, waking up the next waiters of the mutexes (if any)
    mutex::abandon_held_mutexes(st, thread)?;
    debug_assert!(st.threads[thread.index()].last_mutex_held.is_none());

    wait::dequeue_all(st, WaitObject::Join(thread), Ok(0))?;

    log::debug!("{thread:?} terminated");
    Ok(())
}
