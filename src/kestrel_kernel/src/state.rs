use crate::{
    error::{BadContextError, BadIdError},
    event::EventCb,
    fatal::{FatalError, FatalInfo},
    mutex::MutexCb,
    priority_range,
    semaphore::SemaphoreCb,
    thread::{readyqueue::ReadyQueue, ThreadCb, ThreadSt},
    timeout::{TimeoutList, TimeoutNode, TimeoutOwner, TimeoutStore},
    timer::{self, TimerCb},
    wait::{self, WaitObjectCb},
    EventId, KernelTraits, MutexId, SemaphoreId, ThreadId, Ticks, TimerId, WaitObjectId,
};

/// The kernel state. Only accessible while the CPU lock is held.
pub(crate) struct State<Traits: KernelTraits> {
    pub(crate) threads: Traits::ThreadPool,
    pub(crate) semaphores: Traits::SemaphorePool,
    pub(crate) mutexes: Traits::MutexPool,
    pub(crate) events: Traits::EventPool,
    pub(crate) timers: Traits::TimerPool,
    pub(crate) wait_objects: Traits::WaitObjectPool,

    pub(crate) ready_queue: ReadyQueue,
    pub(crate) timeouts: TimeoutList,

    /// The thread that owns the processor. Its state is `Running` unless it
    /// has just blocked, exited, or been preempted and a reschedule is
    /// pending.
    pub(crate) running: Option<ThreadId>,

    pub(crate) isr_nesting: usize,
    /// Set when rescheduling was requested by an interrupt handler or while
    /// the caller masked interrupts. Serviced by the outermost `isr_exit` or
    /// `irq_unlock`.
    pub(crate) reschedule_pending: bool,

    /// The number of ticks left in the running thread's time slice.
    pub(crate) slice_remaining: Ticks,

    pub(crate) started: bool,
}

/// Look up a destroyable object, rejecting destroyed ones.
macro_rules! object_accessor {
    ($( $(#[$meta:meta])* fn $fn:ident($id_ty:ty) -> $cb_ty:ty = $field:ident; )*) => {$(
        $(#[$meta])*
        pub(crate) fn $fn(&mut self, id: $id_ty) -> Result<&mut $cb_ty, BadIdError> {
            match self.$field.get_mut(id.index()) {
                Some(cb) if cb.alive => Ok(cb),
                _ => Err(BadIdError::BadId),
            }
        }
    )*};
}

impl<Traits: KernelTraits> State<Traits> {
    pub(crate) fn new() -> Self {
        Self {
            threads: Default::default(),
            semaphores: Default::default(),
            mutexes: Default::default(),
            events: Default::default(),
            timers: Default::default(),
            wait_objects: Default::default(),
            ready_queue: ReadyQueue::new(priority_range::<Traits>()),
            timeouts: TimeoutList::default(),
            running: None,
            isr_nesting: 0,
            reschedule_pending: false,
            slice_remaining: Traits::TIME_SLICE_TICKS,
            started: false,
        }
    }

    pub(crate) fn thread(&mut self, id: ThreadId) -> Result<&mut ThreadCb<Traits>, BadIdError> {
        self.threads.get_mut(id.index()).ok_or(BadIdError::BadId)
    }

    pub(crate) fn timer(&mut self, id: TimerId) -> Result<&mut TimerCb, BadIdError> {
        self.timers.get_mut(id.index()).ok_or(BadIdError::BadId)
    }

    object_accessor! {
        fn semaphore(SemaphoreId) -> SemaphoreCb = semaphores;
        fn mutex(MutexId) -> MutexCb = mutexes;
        fn event(EventId) -> EventCb = events;
        fn wait_object(WaitObjectId) -> WaitObjectCb = wait_objects;
    }

    /// Get the running thread if it's actually running, i.e., it hasn't
    /// blocked or exited since it was dispatched.
    pub(crate) fn running_thread(&self) -> Option<ThreadId> {
        self.running
            .filter(|t| self.threads[t.index()].st == ThreadSt::Running)
    }

    /// Get the running thread, failing if the caller is an interrupt
    /// handler or there's no running thread.
    pub(crate) fn current_thread(&self) -> Result<ThreadId, BadContextError> {
        if self.isr_nesting > 0 {
            return Err(BadContextError::BadContext);
        }
        self.running_thread().ok_or(BadContextError::BadContext)
    }

    pub(crate) fn fatal_info(&self, error: FatalError) -> FatalInfo {
        FatalInfo {
            error,
            thread: self.running,
            isr_nesting: self.isr_nesting,
        }
    }
}

impl<Traits: KernelTraits> TimeoutStore for State<Traits> {
    #[inline]
    fn timeout_list(&mut self) -> &mut TimeoutList {
        &mut self.timeouts
    }

    #[inline]
    fn timeout_node(&mut self, owner: TimeoutOwner) -> &mut TimeoutNode {
        match owner {
            TimeoutOwner::ThreadWake(t) => &mut self.threads[t.index()].timeout,
            TimeoutOwner::TimerFire(t) => &mut self.timers[t.index()].timeout,
        }
    }
}

/// Dispatch an expired timeout to its owner.
pub(crate) fn expire<Traits: KernelTraits>(
    st: &mut State<Traits>,
    owner: TimeoutOwner,
) -> Result<(), FatalError> {
    match owner {
        TimeoutOwner::ThreadWake(thread) => wait::expire_wait(st, thread),
        TimeoutOwner::TimerFire(timer) => timer::fire(st, timer),
    }
}
