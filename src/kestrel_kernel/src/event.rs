//! Event objects
use crate::{
    error::{BadIdError, BadParamError},
    fatal::FatalError,
    state::State,
    utils::VecLike,
    wait::{self, WaitObject, WaitPayload, WaitQueue},
    wake_outcome, CreateObjectError, DestroyObjectError, EventId, Kernel, KernelTraits,
    QueryError, QueueOrder, Timeout, UpdateObjectError, WaitError, WaitEventError, WaitOutcome,
};

bitflags::bitflags! {
    /// Options for [`Kernel::event_wait`].
    pub struct EventWaitFlags: u8 {
        /// Wait until all of the specified bits are set. Without this flag,
        /// any of them suffices.
        const ALL = 1 << 0;

        /// Clear the specified bits on a successful wait.
        const CLEAR = 1 << 1;
    }
}

/// *Event control block* - the state data of an event object.
#[doc(hidden)]
#[derive(Debug)]
pub struct EventCb {
    pub(crate) bits: u32,
    pub(crate) wait_queue: WaitQueue,
    pub(crate) alive: bool,
}

/// Check if the current bits satisfy the wait condition.
///
/// If they do, this function updates the bits according to `flags` and
/// returns the bits as they were before the update. Otherwise, it returns
/// `None`.
fn poll_core(event_bits: &mut u32, bits: u32, flags: EventWaitFlags) -> Option<u32> {
    let success = if flags.contains(EventWaitFlags::ALL) {
        (*event_bits & bits) == bits
    } else {
        (*event_bits & bits) != 0
    };

    if success {
        let original_value = *event_bits;
        if flags.contains(EventWaitFlags::CLEAR) {
            *event_bits &= !bits;
        }
        Some(original_value)
    } else {
        None
    }
}

/// Set `added_bits` and wake up the waiters whose conditions are now
/// satisfied, in queue order. A waiter with [`EventWaitFlags::CLEAR`]
/// consumes the bits it waited for, which the waiters after it don't see.
///
/// This may make a thread Ready, but doesn't yield the processor.
pub(crate) fn set_core<Traits: KernelTraits>(
    st: &mut State<Traits>,
    event: EventId,
    added_bits: u32,
) -> Result<(), FatalError> {
    let cb = &mut st.events[event.index()];

    // Return early if no bits will change
    if (cb.bits | added_bits) == cb.bits {
        return Ok(());
    }
    cb.bits |= added_bits;

    wait::dequeue_if(st, WaitObject::Event(event), |st, _, payload| {
        let WaitPayload::Events { bits, flags } = payload else {
            return None;
        };
        let observed = poll_core(&mut st.events[event.index()].bits, bits, flags)?;
        Some(observed as usize)
    })?;

    Ok(())
}

impl<Traits: KernelTraits> Kernel<Traits> {
    /// Create an event object with all bits cleared.
    pub fn event_create(&self, order: QueueOrder) -> Result<EventId, CreateObjectError> {
        let mut lock = self.lock_cpu()?;
        let st = lock.state();
        let id = EventId::from_index(st.events.len());
        st.events
            .try_push(EventCb {
                bits: 0,
                wait_queue: WaitQueue::new(order),
                alive: true,
            })
            .map_err(|_| CreateObjectError::QueueOverflow)?;
        log::debug!("created {id:?} ({order:?})");
        Ok(id)
    }

    /// Set the specified bits, waking up the threads whose conditions are
    /// satisfied. Can be called from an interrupt handler.
    pub fn event_set(&self, event: EventId, bits: u32) -> Result<(), UpdateObjectError> {
        let mut lock = self.lock_cpu()?;
        let st = lock.state();
        st.event(event)?;

        let result = set_core(st, event, bits);
        self.ok_or_fatal(result, st);

        self.unlock_cpu_and_reschedule(lock);
        Ok(())
    }

    /// Clear the specified bits.
    pub fn event_clear(&self, event: EventId, bits: u32) -> Result<(), UpdateObjectError> {
        let mut lock = self.lock_cpu()?;
        lock.state().event(event)?.bits &= !bits;
        Ok(())
    }

    /// Get the current bits.
    pub fn event_get(&self, event: EventId) -> Result<u32, QueryError> {
        let mut lock = self.lock_cpu()?;
        Ok(lock.state().event(event)?.bits)
    }

    /// Block the running thread until any (or all, with
    /// [`EventWaitFlags::ALL`]) of the specified bits are set.
    ///
    /// Returns the bits as they were when the condition was satisfied,
    /// before they were cleared by [`EventWaitFlags::CLEAR`].
    pub fn event_wait(
        &self,
        event: EventId,
        bits: u32,
        flags: EventWaitFlags,
        timeout: Timeout,
    ) -> Result<WaitOutcome<u32>, WaitEventError> {
        let mut lock = self.lock_cpu()?;
        let st = lock.state();
        if !timeout.is_poll() {
            self.expect_waitable_context(st);
        }
        let cb = st.event(event)?;

        if bits == 0 {
            return Err(BadParamError::BadParam.into());
        }

        if let Some(observed) = poll_core(&mut cb.bits, bits, flags) {
            return Ok(WaitOutcome::Done(observed));
        }
        if timeout.is_poll() {
            return Err(WaitEventError::WouldBlock);
        }

        let thread = st.current_thread()?;
        let result = wait::begin_wait(
            st,
            thread,
            WaitObject::Event(event),
            WaitPayload::Events { bits, flags },
            timeout,
        );
        self.ok_or_fatal(result, st);

        let result = self.wait_until_woken_up(lock, thread)?;
        // The value was produced from a `u32`
        Ok(wake_outcome(result)?.map(|observed| observed as u32))
    }

    /// Destroy an event object. Waiters are woken up with `Cancelled` if
    /// `force` is set; otherwise the presence of waiters is an error.
    pub fn event_destroy(&self, event: EventId, force: bool) -> Result<(), DestroyObjectError> {
        let mut lock = self.lock_cpu()?;
        let st = lock.state();
        let cb = st.events.get(event.index()).ok_or(BadIdError::BadId)?;
        if !cb.alive {
            self.report_fatal(FatalError::ObjectDestroyedTwice, st);
        }
        if !cb.wait_queue.is_empty() && !force {
            return Err(DestroyObjectError::BadObjectState);
        }

        let result = wait::dequeue_all(st, WaitObject::Event(event), Err(WaitError::Cancelled));
        self.ok_or_fatal(result, st);
        st.events[event.index()].alive = false;
        log::debug!("destroyed {event:?}");

        self.unlock_cpu_and_reschedule(lock);
        Ok(())
    }
}
