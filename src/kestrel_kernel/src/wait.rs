//! Wait queues and the generic wait/wake machinery
//!
//! A thread blocks by entering the Waiting state with a [`WaitObject`]
//! describing what it waits for. If the object has a [`WaitQueue`], the
//! thread is linked into it through [`ThreadWait::link`]. If a timeout was
//! given, the thread's timeout node is armed as well.
//!
//! A wait ends in exactly one way, through [`complete_wait`]: a wake-upper
//! posts a result, or the timeout expires, or the wait is cancelled. Each
//! path first checks that the thread is still waiting, so whichever comes
//! first wins and the others do nothing.
use crate::{
    error::{BadContextError, BadIdError},
    event::EventWaitFlags,
    fatal::FatalError,
    mutex,
    state::State,
    thread::{self, ThreadCb, ThreadSt},
    timeout::{self, TimeoutOwner},
    utils::{
        intrusive_list::{Link, ListAccessor, ListHead},
        VecLike,
    },
    wake_outcome, CreateObjectError, DestroyObjectError, EventId, Kernel, KernelTraits, MutexId,
    Port, SemaphoreId, ThreadId, Timeout, TimerId, UpdateObjectError, WaitError, WaitObjectError,
    WaitObjectId, WaitOutcome,
};

/// Specifies the sorting order of a wait queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueOrder {
    /// The wait queue is processed in a FIFO order.
    Fifo,
    /// The wait queue is processed in an effective priority order. Threads
    /// with the same priority follow a FIFO order.
    Priority,
}

/// A queue of threads waiting on a particular object.
///
/// The head is copied out of the owning object for the duration of each
/// operation (see [`with_queue`]) because the owner may live in the same
/// pool as the waiters (a thread's join queue).
#[derive(Debug, Clone, Copy)]
pub(crate) struct WaitQueue {
    head: ListHead<ThreadId>,
    order: QueueOrder,
}

impl WaitQueue {
    pub(crate) const fn new(order: QueueOrder) -> Self {
        Self {
            head: ListHead::new(),
            order,
        }
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_empty()
    }

    /// Get the first waiter.
    #[inline]
    pub(crate) fn first(&self) -> Option<ThreadId> {
        self.head.first
    }
}

/// What a waiting thread waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitObject {
    Semaphore(SemaphoreId),
    Mutex(MutexId),
    Event(EventId),
    Queue(WaitObjectId),
    /// The termination of a thread.
    Join(ThreadId),
    /// The expiration of a timer.
    TimerSync(TimerId),
    /// Nothing but a timeout or an explicit wakeup. Has no queue.
    Sleep,
}

/// Additional information specific to the waited object type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitPayload {
    None,
    Events { bits: u32, flags: EventWaitFlags },
}

/// The wait state of a thread.
#[derive(Debug)]
pub(crate) struct ThreadWait {
    /// Links the thread into the wait queue of `object`.
    pub(crate) link: Option<Link<ThreadId>>,
    /// `Some(_)` iff the thread is in the Waiting state.
    pub(crate) object: Option<WaitObject>,
    pub(crate) payload: WaitPayload,
    /// The result of the last wait, posted by [`complete_wait`]. Cleared
    /// when the thread starts a new wait or the result is collected.
    pub(crate) result: Option<Result<usize, WaitError>>,
}

impl ThreadWait {
    pub(crate) const fn new() -> Self {
        Self {
            link: None,
            object: None,
            payload: WaitPayload::None,
            result: None,
        }
    }
}

/// *Wait object* control block.
#[doc(hidden)]
pub struct WaitObjectCb {
    pub(crate) wait_queue: WaitQueue,
    pub(crate) alive: bool,
}

fn wait_link<Traits: Port>(
    threads: &mut [ThreadCb<Traits>],
    thread: ThreadId,
) -> &mut Option<Link<ThreadId>> {
    &mut threads[thread.index()].wait.link
}

/// Get a `ListAccessor` for a wait queue.
macro_rules! wait_queue_accessor {
    ($queue:expr, $threads:expr) => {
        ListAccessor::new(&mut $queue.head, $threads, wait_link::<Traits>)
    };
}

/// Locate the wait queue of `object`.
fn queue_slot<Traits: KernelTraits>(
    st: &mut State<Traits>,
    object: WaitObject,
) -> Option<&mut WaitQueue> {
    match object {
        WaitObject::Semaphore(id) => st
            .semaphores
            .get_mut(id.index())
            .map(|cb| &mut cb.wait_queue),
        WaitObject::Mutex(id) => st.mutexes.get_mut(id.index()).map(|cb| &mut cb.wait_queue),
        WaitObject::Event(id) => st.events.get_mut(id.index()).map(|cb| &mut cb.wait_queue),
        WaitObject::Queue(id) => st
            .wait_objects
            .get_mut(id.index())
            .map(|cb| &mut cb.wait_queue),
        WaitObject::Join(id) => st.threads.get_mut(id.index()).map(|cb| &mut cb.join_queue),
        WaitObject::TimerSync(id) => st.timers.get_mut(id.index()).map(|cb| &mut cb.sync_queue),
        WaitObject::Sleep => None,
    }
}

/// Call `f` with the wait queue of `object` and the thread pool. Returns
/// `None` if `object` has no queue.
fn with_queue<Traits: KernelTraits, R>(
    st: &mut State<Traits>,
    object: WaitObject,
    f: impl FnOnce(&mut WaitQueue, &mut [ThreadCb<Traits>]) -> Result<R, FatalError>,
) -> Result<Option<R>, FatalError> {
    let Some(mut queue) = queue_slot(st, object).copied() else {
        return Ok(None);
    };

    let result = f(&mut queue, &mut st.threads);

    if let Some(slot) = queue_slot(st, object) {
        *slot = queue;
    }

    result.map(Some)
}

/// Insert `thread` into `queue` according to the queue's order.
fn insert<Traits: KernelTraits>(
    queue: &mut WaitQueue,
    threads: &mut [ThreadCb<Traits>],
    thread: ThreadId,
) -> Result<(), FatalError> {
    let order = queue.order;
    let mut accessor = wait_queue_accessor!(queue, threads);
    let insert_at = match order {
        QueueOrder::Fifo => None,
        QueueOrder::Priority => {
            let priority = accessor.pool()[thread.index()].effective_priority;
            let mut insert_at = None;
            let mut cursor = accessor.back()?;
            while let Some(c) = cursor {
                // Should the thread be inserted at this or an earlier
                // position? Keep looking for an even earlier one.
                if accessor.pool()[c.index()].effective_priority > priority {
                    insert_at = Some(c);
                    cursor = accessor.prev(c)?;
                } else {
                    break;
                }
            }
            insert_at
        }
    };
    accessor.insert(thread, insert_at)?;
    Ok(())
}

/// Transition the running thread `thread` into the Waiting state.
///
/// The caller must check that the context is waitable and reschedule
/// afterwards.
pub(crate) fn begin_wait<Traits: KernelTraits>(
    st: &mut State<Traits>,
    thread: ThreadId,
    object: WaitObject,
    payload: WaitPayload,
    timeout: Timeout,
) -> Result<(), FatalError> {
    let cb = &mut st.threads[thread.index()];
    debug_assert_eq!(cb.st, ThreadSt::Running);
    cb.st = ThreadSt::Waiting;
    cb.wait.object = Some(object);
    cb.wait.payload = payload;
    cb.wait.result = None;

    with_queue(st, object, |queue, threads| insert(queue, threads, thread))?;

    if let Timeout::Ticks(ticks) = timeout {
        timeout::arm(st, TimeoutOwner::ThreadWake(thread), ticks)?;
    }

    log::trace!("{thread:?} waits on {object:?} ({timeout:?})");
    Ok(())
}

/// Take `thread` out of its wait queue and cancel its timeout without
/// changing its state. Returns the object it was waiting on.
pub(crate) fn detach<Traits: KernelTraits>(
    st: &mut State<Traits>,
    thread: ThreadId,
) -> Result<Option<WaitObject>, FatalError> {
    let cb = &mut st.threads[thread.index()];
    let object = cb.wait.object.take();
    cb.wait.payload = WaitPayload::None;
    let linked = cb.wait.link.is_some();

    if let (Some(object), true) = (object, linked) {
        with_queue(st, object, |queue, threads| {
            wait_queue_accessor!(queue, threads).remove(thread)?;
            Ok(())
        })?;
    }

    timeout::cancel(st, TimeoutOwner::ThreadWake(thread))?;

    // A mutex waiter contributes to the owner's effective priority
    if let Some(WaitObject::Mutex(mutex)) = object {
        mutex::reevaluate_owner(st, mutex)?;
    }

    Ok(object)
}

/// End the wait of `thread` with `result` and make it Ready. Does nothing
/// and returns `false` if the thread is not waiting.
///
/// This may make a thread Ready, but doesn't yield the processor.
pub(crate) fn complete_wait<Traits: KernelTraits>(
    st: &mut State<Traits>,
    thread: ThreadId,
    result: Result<usize, WaitError>,
) -> Result<bool, FatalError> {
    if st.threads[thread.index()].st != ThreadSt::Waiting {
        return Ok(false);
    }

    let object = detach(st, thread)?;

    st.threads[thread.index()].wait.result = Some(result);
    thread::make_ready(st, thread)?;

    log::trace!("{thread:?} woken up from {object:?} with {result:?}");
    Ok(true)
}

/// Handle the expiration of the timeout of `thread`.
pub(crate) fn expire_wait<Traits: KernelTraits>(
    st: &mut State<Traits>,
    thread: ThreadId,
) -> Result<(), FatalError> {
    let result = match st.threads[thread.index()].wait.object {
        // Sleeping to the end is a success
        Some(WaitObject::Sleep) => Ok(0),
        _ => Err(WaitError::Timeout),
    };
    complete_wait(st, thread, result)?;
    Ok(())
}

/// Wake up the first waiter of `object` with `result`.
pub(crate) fn dequeue_one<Traits: KernelTraits>(
    st: &mut State<Traits>,
    object: WaitObject,
    result: Result<usize, WaitError>,
) -> Result<Option<ThreadId>, FatalError> {
    let Some(thread) = with_queue(st, object, |queue, _| Ok(queue.first()))?.flatten() else {
        return Ok(None);
    };
    complete_wait(st, thread, result)?;
    Ok(Some(thread))
}

/// Wake up all waiters of `object` with `result`. Returns the number of
/// woken threads.
pub(crate) fn dequeue_all<Traits: KernelTraits>(
    st: &mut State<Traits>,
    object: WaitObject,
    result: Result<usize, WaitError>,
) -> Result<usize, FatalError> {
    let mut count = 0;
    while dequeue_one(st, object, result)?.is_some() {
        count += 1;
    }
    Ok(count)
}

/// Visit the waiters of `object` in queue order and wake up those for which
/// `cond` returns a result.
///
/// `cond` may update the object, e.g., to consume the state it observed.
pub(crate) fn dequeue_if<Traits: KernelTraits>(
    st: &mut State<Traits>,
    object: WaitObject,
    mut cond: impl FnMut(&mut State<Traits>, ThreadId, WaitPayload) -> Option<usize>,
) -> Result<usize, FatalError> {
    let mut count = 0;
    let mut cursor = with_queue(st, object, |queue, _| Ok(queue.first()))?.flatten();

    while let Some(thread) = cursor {
        // Find the next waiter before we possibly remove `thread`
        cursor = with_queue(st, object, |queue, threads| {
            Ok(wait_queue_accessor!(queue, threads).next(thread)?)
        })?
        .flatten();

        let payload = st.threads[thread.index()].wait.payload;
        if let Some(value) = cond(st, thread, payload) {
            complete_wait(st, thread, Ok(value))?;
            count += 1;
        }
    }

    Ok(count)
}

/// Get the first waiter of `object`.
pub(crate) fn first_waiter<Traits: KernelTraits>(
    st: &mut State<Traits>,
    object: WaitObject,
) -> Option<ThreadId> {
    queue_slot(st, object).and_then(|queue| queue.first())
}

/// Reposition `thread` in its wait queue after its effective priority has
/// changed.
pub(crate) fn reorder<Traits: KernelTraits>(
    st: &mut State<Traits>,
    thread: ThreadId,
) -> Result<(), FatalError> {
    let cb = &st.threads[thread.index()];
    let (Some(object), true) = (cb.wait.object, cb.wait.link.is_some()) else {
        return Ok(());
    };

    with_queue(st, object, |queue, threads| {
        if queue.order == QueueOrder::Priority {
            wait_queue_accessor!(queue, threads).remove(thread)?;
            insert(queue, threads, thread)?;
        }
        Ok(())
    })?;
    Ok(())
}

impl<Traits: KernelTraits> Kernel<Traits> {
    /// Create a generic wait object.
    pub fn wait_object_create(&self, order: QueueOrder) -> Result<WaitObjectId, CreateObjectError> {
        let mut lock = self.lock_cpu()?;
        let st = lock.state();
        let id = WaitObjectId::from_index(st.wait_objects.len());
        st.wait_objects
            .try_push(WaitObjectCb {
                wait_queue: WaitQueue::new(order),
                alive: true,
            })
            .map_err(|_| CreateObjectError::QueueOverflow)?;
        log::debug!("created {id:?} ({order:?})");
        Ok(id)
    }

    /// Block the running thread until another context wakes it up through
    /// the wait object. The value passed by the wake-upper is returned.
    pub fn wait_object_wait(
        &self,
        id: WaitObjectId,
        timeout: Timeout,
    ) -> Result<WaitOutcome<usize>, WaitObjectError> {
        let mut lock = self.lock_cpu()?;
        let st = lock.state();
        if !timeout.is_poll() {
            self.expect_waitable_context(st);
        }
        st.wait_object(id)?;

        if timeout.is_poll() {
            return Err(WaitObjectError::WouldBlock);
        }

        let thread = st.running_thread().ok_or(BadContextError::BadContext)?;
        let result = begin_wait(st, thread, WaitObject::Queue(id), WaitPayload::None, timeout);
        self.ok_or_fatal(result, st);

        let result = self.wait_until_woken_up(lock, thread)?;
        Ok(wake_outcome(result)?)
    }

    /// Wake up the first waiter, passing `value` to it. Returns `false` if
    /// there was no waiter.
    pub fn wait_object_wake_one(
        &self,
        id: WaitObjectId,
        value: usize,
    ) -> Result<bool, UpdateObjectError> {
        let mut lock = self.lock_cpu()?;
        let st = lock.state();
        st.wait_object(id)?;

        let result = dequeue_one(st, WaitObject::Queue(id), Ok(value));
        let woken = self.ok_or_fatal(result, st).is_some();

        self.unlock_cpu_and_reschedule(lock);
        Ok(woken)
    }

    /// Wake up all waiters, passing `value` to them. Returns the number of
    /// woken threads.
    pub fn wait_object_wake_all(
        &self,
        id: WaitObjectId,
        value: usize,
    ) -> Result<usize, UpdateObjectError> {
        let mut lock = self.lock_cpu()?;
        let st = lock.state();
        st.wait_object(id)?;

        let result = dequeue_all(st, WaitObject::Queue(id), Ok(value));
        let count = self.ok_or_fatal(result, st);

        self.unlock_cpu_and_reschedule(lock);
        Ok(count)
    }

    /// Destroy a wait object. Waiters are woken up with `Cancelled` if
    /// `force` is set; otherwise the presence of waiters is an error.
    pub fn wait_object_destroy(&self, id: WaitObjectId, force: bool) -> Result<(), DestroyObjectError> {
        let mut lock = self.lock_cpu()?;
        let st = lock.state();
        let cb = st.wait_objects.get(id.index()).ok_or(BadIdError::BadId)?;
        if !cb.alive {
            self.report_fatal(FatalError::ObjectDestroyedTwice, st);
        }
        if !cb.wait_queue.is_empty() && !force {
            return Err(DestroyObjectError::BadObjectState);
        }

        let result = dequeue_all(st, WaitObject::Queue(id), Err(WaitError::Cancelled));
        self.ok_or_fatal(result, st);
        st.wait_objects[id.index()].alive = false;
        log::debug!("destroyed {id:?}");

        self.unlock_cpu_and_reschedule(lock);
        Ok(())
    }
}
