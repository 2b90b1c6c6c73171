//! Kernel timers
//!
//! A timer expires in the context of [`Kernel::announce`]. On each
//! expiration it increments its status counter, performs its
//! [`TimerAction`], and wakes up the threads waiting in
//! [`Kernel::timer_status_sync`].
use crate::{
    error::BadParamError,
    event,
    fatal::FatalError,
    semaphore,
    state::State,
    timeout::{self, TimeoutNode, TimeoutOwner},
    utils::VecLike,
    wait::{self, WaitObject, WaitPayload, WaitQueue},
    wake_outcome, CreateObjectError, EventId, Kernel, KernelTraits, QueryError, QueueOrder,
    SemaphoreId, Ticks, Timeout, TimerId, UpdateObjectError, WaitObjectError, WaitOutcome,
};

/// What a timer does when it expires, besides waking up the threads
/// waiting for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerAction {
    None,
    /// Give one unit to a semaphore.
    GiveSemaphore(SemaphoreId),
    /// Set bits of an event object.
    SetEvents(EventId, u32),
}

/// *Timer control block* - the state data of a timer.
#[doc(hidden)]
#[derive(Debug)]
pub struct TimerCb {
    pub(crate) action: TimerAction,

    /// The interval between expirations. `0` makes a one-shot timer.
    pub(crate) period: Ticks,

    pub(crate) running: bool,

    /// The number of expirations since the status was last read.
    pub(crate) status: u32,

    pub(crate) timeout: TimeoutNode,

    /// Threads waiting in `timer_status_sync`.
    pub(crate) sync_queue: WaitQueue,
}

/// Handle the expiration of a timer.
pub(crate) fn fire<Traits: KernelTraits>(
    st: &mut State<Traits>,
    timer: TimerId,
) -> Result<(), FatalError> {
    let cb = &mut st.timers[timer.index()];
    debug_assert!(cb.running);
    cb.status = cb.status.saturating_add(1);
    let (period, action) = (cb.period, cb.action);

    // Schedule the next tick
    if period > 0 {
        timeout::arm(st, TimeoutOwner::TimerFire(timer), period)?;
    } else {
        st.timers[timer.index()].running = false;
    }

    log::trace!("{timer:?} fired");

    match action {
        TimerAction::None => {}
        TimerAction::GiveSemaphore(semaphore) => {
            if st.semaphore(semaphore).is_ok() {
                semaphore::give_core(st, semaphore)?;
            } else {
                log::warn!("{timer:?} targets destroyed {semaphore:?}");
            }
        }
        TimerAction::SetEvents(event, bits) => {
            if st.event(event).is_ok() {
                event::set_core(st, event, bits)?;
            } else {
                log::warn!("{timer:?} targets destroyed {event:?}");
            }
        }
    }

    let status = st.timers[timer.index()].status;
    if wait::dequeue_all(st, WaitObject::TimerSync(timer), Ok(status as usize))? > 0 {
        // The waiters have consumed the status
        st.timers[timer.index()].status = 0;
    }

    Ok(())
}

impl<Traits: KernelTraits> Kernel<Traits> {
    /// Create a stopped timer.
    pub fn timer_create(&self, action: TimerAction) -> Result<TimerId, CreateObjectError> {
        let mut lock = self.lock_cpu()?;
        let st = lock.state();

        let target_ok = match action {
            TimerAction::None => true,
            TimerAction::GiveSemaphore(semaphore) => st.semaphore(semaphore).is_ok(),
            TimerAction::SetEvents(event, _) => st.event(event).is_ok(),
        };
        if !target_ok {
            return Err(BadParamError::BadParam.into());
        }

        let id = TimerId::from_index(st.timers.len());
        st.timers
            .try_push(TimerCb {
                action,
                period: 0,
                running: false,
                status: 0,
                timeout: TimeoutNode::default(),
                sync_queue: WaitQueue::new(QueueOrder::Fifo),
            })
            .map_err(|_| CreateObjectError::QueueOverflow)?;
        log::debug!("created {id:?} ({action:?})");
        Ok(id)
    }

    /// Start a timer. It first expires after `delay` ticks, then every
    /// `period` ticks unless `period` is zero.
    ///
    /// Starting a running timer restarts it. The status is reset.
    pub fn timer_start(
        &self,
        timer: TimerId,
        delay: Ticks,
        period: Ticks,
    ) -> Result<(), UpdateObjectError> {
        let mut lock = self.lock_cpu()?;
        let st = lock.state();
        let cb = st.timer(timer)?;
        cb.period = period;
        cb.status = 0;
        cb.running = true;

        let owner = TimeoutOwner::TimerFire(timer);
        let result = timeout::cancel(st, owner).and_then(|_| timeout::arm(st, owner, delay));
        self.ok_or_fatal(result, st);
        log::trace!("{timer:?} started (delay {delay}, period {period})");

        Ok(())
    }

    /// Stop a timer. Threads waiting for it to expire are woken up with a
    /// status of zero.
    pub fn timer_stop(&self, timer: TimerId) -> Result<(), UpdateObjectError> {
        let mut lock = self.lock_cpu()?;
        let st = lock.state();
        st.timer(timer)?.running = false;

        let result = timeout::cancel(st, TimeoutOwner::TimerFire(timer))
            .and_then(|_| wait::dequeue_all(st, WaitObject::TimerSync(timer), Ok(0)));
        self.ok_or_fatal(result, st);
        log::trace!("{timer:?} stopped");

        self.unlock_cpu_and_reschedule(lock);
        Ok(())
    }

    /// Read and reset the number of expirations since the status was last
    /// read.
    pub fn timer_status(&self, timer: TimerId) -> Result<u32, UpdateObjectError> {
        let mut lock = self.lock_cpu()?;
        Ok(core::mem::take(&mut lock.state().timer(timer)?.status))
    }

    /// Block the running thread until the timer expires, then read and
    /// reset its status.
    ///
    /// Returns immediately if the timer has expired since the status was
    /// last read. Returns zero if the timer is stopped, or was stopped
    /// while the thread waited.
    pub fn timer_status_sync(
        &self,
        timer: TimerId,
        timeout: Timeout,
    ) -> Result<WaitOutcome<u32>, WaitObjectError> {
        let mut lock = self.lock_cpu()?;
        let st = lock.state();
        if !timeout.is_poll() {
            self.expect_waitable_context(st);
        }
        let cb = st.timer(timer)?;

        if cb.status > 0 {
            return Ok(WaitOutcome::Done(core::mem::take(&mut cb.status)));
        }
        if !cb.running {
            return Ok(WaitOutcome::Done(0));
        }
        if timeout.is_poll() {
            return Err(WaitObjectError::WouldBlock);
        }

        let thread = st.current_thread()?;
        let result = wait::begin_wait(
            st,
            thread,
            WaitObject::TimerSync(timer),
            WaitPayload::None,
            timeout,
        );
        self.ok_or_fatal(result, st);

        let result = self.wait_until_woken_up(lock, thread)?;
        // The value was produced from a `u32`
        Ok(wake_outcome(result)?.map(|status| status as u32))
    }

    /// Get the number of ticks until the next expiration of a timer, or
    /// `None` if it's stopped.
    pub fn timer_remaining(&self, timer: TimerId) -> Result<Option<Ticks>, QueryError> {
        let mut lock = self.lock_cpu()?;
        let st = lock.state();
        st.timer(timer)?;

        let result = timeout::remaining(st, TimeoutOwner::TimerFire(timer));
        Ok(self.ok_or_fatal(result, st))
    }
}
