//! Semaphores
use crate::{
    error::{BadIdError, BadParamError},
    fatal::FatalError,
    state::State,
    utils::VecLike,
    wait::{self, WaitObject, WaitPayload, WaitQueue},
    wake_outcome, CreateObjectError, DestroyObjectError, Kernel, KernelTraits, QueryError,
    QueueOrder, SemaphoreId, TakeSemaphoreError, Timeout, UpdateObjectError, WaitError,
    WaitOutcome,
};

/// *Semaphore control block* - the state data of a semaphore.
///
/// `count` is non-zero only while the wait queue is empty.
#[doc(hidden)]
#[derive(Debug)]
pub struct SemaphoreCb {
    pub(crate) count: u32,
    pub(crate) limit: u32,
    pub(crate) wait_queue: WaitQueue,
    pub(crate) alive: bool,
}

/// Check if the current count satisfies the wait condition.
///
/// If it does, this function updates the count and returns `true`.
/// Otherwise, it returns `false`.
#[inline]
fn poll_core(count: &mut u32) -> bool {
    if *count > 0 {
        *count -= 1;
        true
    } else {
        false
    }
}

/// Give one unit to the semaphore. If a thread is waiting, the unit is
/// handed directly to it. Otherwise, the count is incremented, saturating at
/// the limit.
///
/// This may make a thread Ready, but doesn't yield the processor.
pub(crate) fn give_core<Traits: KernelTraits>(
    st: &mut State<Traits>,
    semaphore: SemaphoreId,
) -> Result<(), FatalError> {
    if wait::dequeue_one(st, WaitObject::Semaphore(semaphore), Ok(0))?.is_none() {
        let cb = &mut st.semaphores[semaphore.index()];
        cb.count = cb.count.saturating_add(1).min(cb.limit);
    }
    Ok(())
}

impl<Traits: KernelTraits> Kernel<Traits> {
    /// Create a semaphore with the specified initial count and limit.
    pub fn semaphore_create(
        &self,
        initial: u32,
        limit: u32,
        order: QueueOrder,
    ) -> Result<SemaphoreId, CreateObjectError> {
        let mut lock = self.lock_cpu()?;
        let st = lock.state();

        if limit == 0 || initial > limit {
            return Err(BadParamError::BadParam.into());
        }

        let id = SemaphoreId::from_index(st.semaphores.len());
        st.semaphores
            .try_push(SemaphoreCb {
                count: initial,
                limit,
                wait_queue: WaitQueue::new(order),
                alive: true,
            })
            .map_err(|_| CreateObjectError::QueueOverflow)?;
        log::debug!("created {id:?} (count {initial}/{limit}, {order:?})");
        Ok(id)
    }

    /// Give one unit to a semaphore. Can be called from an interrupt
    /// handler.
    pub fn semaphore_give(&self, semaphore: SemaphoreId) -> Result<(), UpdateObjectError> {
        let mut lock = self.lock_cpu()?;
        let st = lock.state();
        st.semaphore(semaphore)?;

        let result = give_core(st, semaphore);
        self.ok_or_fatal(result, st);

        self.unlock_cpu_and_reschedule(lock);
        Ok(())
    }

    /// Take one unit from a semaphore, blocking the running thread until a
    /// unit is available.
    pub fn semaphore_take(
        &self,
        semaphore: SemaphoreId,
        timeout: Timeout,
    ) -> Result<WaitOutcome<()>, TakeSemaphoreError> {
        let mut lock = self.lock_cpu()?;
        let st = lock.state();
        if !timeout.is_poll() {
            self.expect_waitable_context(st);
        }
        let cb = st.semaphore(semaphore)?;

        if poll_core(&mut cb.count) {
            return Ok(WaitOutcome::Done(()));
        }
        if timeout.is_poll() {
            return Err(TakeSemaphoreError::WouldBlock);
        }

        let thread = st.current_thread()?;
        let result = wait::begin_wait(
            st,
            thread,
            WaitObject::Semaphore(semaphore),
            WaitPayload::None,
            timeout,
        );
        self.ok_or_fatal(result, st);

        let result = self.wait_until_woken_up(lock, thread)?;
        Ok(wake_outcome(result)?.map(|_| ()))
    }

    /// Get the current count of a semaphore.
    pub fn semaphore_count(&self, semaphore: SemaphoreId) -> Result<u32, QueryError> {
        let mut lock = self.lock_cpu()?;
        Ok(lock.state().semaphore(semaphore)?.count)
    }

    /// Reset the count of a semaphore to zero. Waiting threads are woken up
    /// with `Cancelled`.
    pub fn semaphore_reset(&self, semaphore: SemaphoreId) -> Result<(), UpdateObjectError> {
        let mut lock = self.lock_cpu()?;
        let st = lock.state();
        st.semaphore(semaphore)?.count = 0;

        let result = wait::dequeue_all(
            st,
            WaitObject::Semaphore(semaphore),
            Err(WaitError::Cancelled),
        );
        self.ok_or_fatal(result, st);

        self.unlock_cpu_and_reschedule(lock);
        Ok(())
    }

    /// Destroy a semaphore. Waiters are woken up with `Cancelled` if `force`
    /// is set; otherwise the presence of waiters is an error.
    pub fn semaphore_destroy(
        &self,
        semaphore: SemaphoreId,
        force: bool,
    ) -> Result<(), DestroyObjectError> {
        let mut lock = self.lock_cpu()?;
        let st = lock.state();
        let cb = st.semaphores.get(semaphore.index()).ok_or(BadIdError::BadId)?;
        if !cb.alive {
            self.report_fatal(FatalError::ObjectDestroyedTwice, st);
        }
        if !cb.wait_queue.is_empty() && !force {
            return Err(DestroyObjectError::BadObjectState);
        }

        let result = wait::dequeue_all(
            st,
            WaitObject::Semaphore(semaphore),
            Err(WaitError::Cancelled),
        );
        self.ok_or_fatal(result, st);
        st.semaphores[semaphore.index()].alive = false;
        log::debug!("destroyed {semaphore:?}");

        self.unlock_cpu_and_reschedule(lock);
        Ok(())
    }
}
