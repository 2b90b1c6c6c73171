//! The scheduler and synchronization core of the Kestrel RTOS.
//!
//! This crate decides which thread runs on the processor and provides the
//! primitives threads use to block and wake each other:
//!
//!  - a priority-based preemptive scheduler with a cooperative priority
//!    band, round-robin time slicing, and ISR-deferred rescheduling,
//!  - a tick-driven timeout manager (a delta list),
//!  - semaphores, mutexes with priority inheritance, event objects, kernel
//!    timers, and generic wait objects.
//!
//! The hardware-facing part (register save/restore, interrupt masking, the
//! tick source) is supplied by a *port*, i.e., a type implementing [`Port`].
//! The static configuration (the number of priority levels, the object pool
//! capacities) is supplied by implementing [`KernelCfg`] on the same type.
//!
//! # Execution model
//!
//! A [`Kernel`] owns all scheduler state. Every service locks the state for
//! its whole duration by masking interrupts through the port. Interrupt
//! handlers notify the kernel through [`Kernel::isr_enter`] and
//! [`Kernel::isr_exit`]; services called in between may wake threads, but
//! the resulting context switch is performed only when the outermost
//! handler exits.
//!
//! Blocking services return [`WaitOutcome`]. On a port whose
//! [`Port::switch_context`] returns only after the blocked thread has been
//! dispatched again, they always return [`WaitOutcome::Done`] (or an error).
//! On a port whose `switch_context` returns immediately (such as a
//! simulator), they return [`WaitOutcome::Pending`], and the result is
//! collected later by [`Kernel::take_wait_result`]. The same applies to a
//! thread that blocks while holding [`Kernel::irq_lock`]: the switch is
//! deferred to the outermost [`Kernel::irq_unlock`].
#![cfg_attr(not(test), no_std)] // Link `std` only when building a test (`cfg(test)`)
use core::{cell::Cell, fmt, marker::PhantomData, num::NonZeroUsize, ptr::NonNull};

mod error;
mod event;
mod fatal;
mod klock;
mod mutex;
mod priority;
mod semaphore;
mod state;
mod thread;
mod timeout;
mod timer;
pub mod utils;
mod wait;

pub use self::{
    error::*,
    event::{EventCb, EventWaitFlags},
    fatal::{FatalError, FatalInfo},
    mutex::MutexCb,
    priority::{is_cooperative, is_preemptible, Priority, PriorityRange},
    semaphore::SemaphoreCb,
    thread::{ThreadAttr, ThreadCb, ThreadOptions, ThreadState},
    timer::{TimerAction, TimerCb},
    wait::{QueueOrder, WaitObjectCb},
};

use self::{state::State, utils::VecLike};

/// Unsigned integer type representing a duration in ticks.
pub type Ticks = u32;

macro_rules! define_id {
    ($(
        $( #[$meta:meta] )*
        $name:ident
    ),* $(,)*) => {$(
        $( #[$meta] )*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(NonZeroUsize);

        impl $name {
            /// Construct an ID from a zero-based pool index.
            #[inline]
            pub const fn from_index(index: usize) -> Self {
                Self(NonZeroUsize::MIN.saturating_add(index))
            }

            /// Get the zero-based pool index.
            #[inline]
            pub const fn index(self) -> usize {
                self.0.get() - 1
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.debug_tuple(stringify!($name)).field(&self.index()).finish()
            }
        }
    )*};
}

define_id! {
    /// Identifies a thread.
    ThreadId,
    /// Identifies a semaphore.
    SemaphoreId,
    /// Identifies a mutex.
    MutexId,
    /// Identifies an event object.
    EventId,
    /// Identifies a kernel timer.
    TimerId,
    /// Identifies a generic wait object.
    WaitObjectId,
}

/// Specifies how long a blocking service may wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timeout {
    /// Don't block. The service fails with `WouldBlock` instead.
    NoWait,
    /// Block for at most the specified number of ticks. `Ticks(0)` is
    /// equivalent to [`Timeout::NoWait`].
    Ticks(Ticks),
    /// Block until the wait is satisfied or cancelled.
    Forever,
}

impl Timeout {
    /// Get a flag indicating whether the service must not block.
    #[inline]
    pub const fn is_poll(self) -> bool {
        matches!(self, Self::NoWait | Self::Ticks(0))
    }
}

/// The outcome of a blocking service that didn't fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[must_use]
pub enum WaitOutcome<T> {
    /// The service completed, possibly after blocking.
    Done(T),
    /// The calling thread was blocked and switched out, and the port's
    /// context switch returned before the wait completed. Use
    /// [`Kernel::take_wait_result`] to collect the result.
    Pending,
}

impl<T> WaitOutcome<T> {
    #[inline]
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> WaitOutcome<U> {
        match self {
            Self::Done(x) => WaitOutcome::Done(f(x)),
            Self::Pending => WaitOutcome::Pending,
        }
    }

    #[inline]
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done(_))
    }
}

/// Convert the result posted to a woken-up thread.
fn wake_outcome(
    result: Option<Result<usize, WaitError>>,
) -> Result<WaitOutcome<usize>, WaitError> {
    match result {
        Some(Ok(value)) => Ok(WaitOutcome::Done(value)),
        Some(Err(e)) => Err(e),
        None => Ok(WaitOutcome::Pending),
    }
}

/// An interrupt state saved by [`Port::irq_lock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrqKey(usize);

impl IrqKey {
    #[inline]
    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn into_raw(self) -> usize {
        self.0
    }
}

/// Refers to the port-specific context of a thread.
pub struct ContextRef<Traits: Port> {
    pub thread: ThreadId,
    /// Points to [`Port::PortThreadState`] in the thread's control block.
    /// Valid for as long as the [`Kernel`] is borrowed.
    pub state: NonNull<Traits::PortThreadState>,
}

impl<Traits: Port> fmt::Debug for ContextRef<Traits> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ContextRef")
            .field("thread", &self.thread)
            .finish_non_exhaustive()
    }
}

/// Implemented by a port.
///
/// # Safety
///
/// Implementing a port is inherently unsafe because it's responsible for
/// masking interrupts and switching register contexts on which the kernel's
/// memory safety depends.
///
/// These methods are only meant to be called by the kernel.
pub unsafe trait Port: Sized + 'static {
    /// Per-thread storage for the saved register context.
    type PortThreadState: fmt::Debug + Default + 'static;

    /// Mask interrupts and return the previous interrupt state.
    ///
    /// Calls can be nested.
    ///
    /// # Safety
    ///
    /// The returned key must be passed to [`Self::irq_unlock`] in LIFO order
    /// with respect to other keys.
    unsafe fn irq_lock(&self) -> IrqKey;

    /// Restore the interrupt state saved in `key`.
    ///
    /// # Safety
    ///
    /// `key` must be the most recent key returned by [`Self::irq_lock`] that
    /// wasn't restored yet.
    unsafe fn irq_unlock(&self, key: IrqKey);

    /// Return a flag indicating whether interrupts are masked.
    fn is_irq_locked(&self) -> bool;

    /// Prepare the context of `thread` so that its entry point runs the next
    /// time the thread is dispatched.
    fn initialize_thread_state(&self, thread: ThreadId, state: &mut Self::PortThreadState);

    /// Save the context of `prev` (if any), restore that of `next` (if
    /// any), and restore the interrupt state `key`, which is the state
    /// before the kernel service (or the outermost interrupt handler's
    /// `isr_exit`) masked interrupts. `None` stands for the idle context.
    ///
    /// `prev` may refer to a thread that has just exited, in which case its
    /// context doesn't need to be saved.
    ///
    /// Interrupts must stay masked until `prev` is no longer executing. An
    /// interrupt taken in between would find the kernel state already
    /// naming `next` as the running thread. A typical implementation pends
    /// a software interrupt that performs the switch and unmasks interrupts
    /// by restoring `key`.
    ///
    /// Precondition: interrupts masked, kernel state unlocked
    ///
    /// # Safety
    ///
    /// Only meant to be called by the kernel.
    unsafe fn switch_context(
        &self,
        prev: Option<ContextRef<Self>>,
        next: Option<ContextRef<Self>>,
        key: IrqKey,
    );

    /// Handle an unrecoverable kernel error, e.g., by halting or resetting
    /// the system.
    fn fatal_error(&self, info: &FatalInfo) -> !;
}

/// The static configuration of a kernel instance.
pub trait KernelCfg: Port {
    /// The number of cooperative priorities (`-NUM_COOP_PRIORITIES..=-1`).
    const NUM_COOP_PRIORITIES: usize;

    /// The number of preemptible priorities (`0..NUM_PREEMPT_PRIORITIES`).
    const NUM_PREEMPT_PRIORITIES: usize;

    /// The length of a round-robin time slice. `0` disables time slicing.
    const TIME_SLICE_TICKS: Ticks = 0;

    /// Only threads whose effective priority is numerically greater than or
    /// equal to this value are time-sliced.
    const TIME_SLICE_PRIORITY: Priority = 0;

    type ThreadPool: VecLike<Element = ThreadCb<Self>>;
    type SemaphorePool: VecLike<Element = SemaphoreCb>;
    type MutexPool: VecLike<Element = MutexCb>;
    type EventPool: VecLike<Element = EventCb>;
    type TimerPool: VecLike<Element = TimerCb>;
    type WaitObjectPool: VecLike<Element = WaitObjectCb>;
}

/// Represents a complete set of trait `impl`s required to instantiate the
/// kernel.
pub trait KernelTraits: Port + KernelCfg {}

impl<T: Port + KernelCfg> KernelTraits for T {}

/// Get the set of priorities supported by `Traits`.
#[inline]
fn priority_range<Traits: KernelCfg>() -> PriorityRange {
    PriorityRange::new(Traits::NUM_COOP_PRIORITIES, Traits::NUM_PREEMPT_PRIORITIES)
}

struct CfgCheck<Traits>(PhantomData<Traits>);

impl<Traits: KernelCfg> CfgCheck<Traits> {
    const OK: () = assert!(
        PriorityRange::new(Traits::NUM_COOP_PRIORITIES, Traits::NUM_PREEMPT_PRIORITIES)
            .is_supported(),
        "the total number of priority levels must be in range `1..=64`"
    );
}

/// A kernel instance.
pub struct Kernel<Traits: KernelTraits> {
    port: Traits,
    /// The token for `state`. `None` while a service holds it.
    token: Cell<Option<klock::CpuLockToken<Traits>>>,
    state: klock::CpuLockCell<Traits, State<Traits>>,
}

impl<Traits: KernelTraits> fmt::Debug for Kernel<Traits> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Kernel").finish_non_exhaustive()
    }
}

impl<Traits: KernelTraits> Kernel<Traits> {
    /// Construct a kernel instance. The scheduler doesn't run until
    /// [`Self::start`] is called.
    pub fn new(port: Traits) -> Self {
        let () = CfgCheck::<Traits>::OK;

        // Safety: This is the only token for `CpuLockTag<Traits>` owned by
        //         this kernel, and it never leaves this kernel. A token of
        //         another instance of the same type could unlock our cell,
        //         but tokens are never handed out of `Kernel`.
        let token = unsafe { klock::CpuLockToken::new_unchecked() };

        Self {
            port,
            token: Cell::new(Some(token)),
            state: klock::CpuLockCell::new(State::new()),
        }
    }

    /// Get a reference to the port.
    #[inline]
    pub fn port(&self) -> &Traits {
        &self.port
    }

    /// Report a fatal error to the port.
    fn report_fatal(&self, error: FatalError, st: &State<Traits>) -> ! {
        fatal::report(&self.port, st.fatal_info(error))
    }

    /// Resolve a fatal error into its value or report it to the port.
    fn ok_or_fatal<T>(&self, result: Result<T, FatalError>, st: &State<Traits>) -> T {
        match result {
            Ok(x) => x,
            Err(e) => self.report_fatal(e, st),
        }
    }

    /// Report `BlockingInIsr` if the caller is an interrupt handler.
    fn expect_waitable_context(&self, st: &State<Traits>) {
        if st.isr_nesting > 0 {
            self.report_fatal(FatalError::BlockingInIsr, st);
        }
    }

    /// Start the scheduler by dispatching the most urgent ready thread.
    pub fn start(&self) -> Result<(), KernelContextError> {
        let mut lock = self.lock_cpu()?;
        let st = lock.state();
        if st.started {
            return Err(KernelContextError::BadContext);
        }
        st.started = true;
        if st.ready_queue.is_empty() {
            log::warn!("starting the scheduler without a ready thread");
        } else {
            log::debug!("starting the scheduler");
        }

        self.unlock_cpu_and_reschedule(lock);
        Ok(())
    }

    /// Notify the kernel that an interrupt handler was entered.
    pub fn isr_enter(&self) -> Result<(), KernelContextError> {
        let mut lock = self.lock_cpu()?;
        lock.state().isr_nesting += 1;
        Ok(())
    }

    /// Notify the kernel that an interrupt handler is about to return.
    ///
    /// When the outermost handler exits, a rescheduling requested by the
    /// handlers is performed.
    pub fn isr_exit(&self) -> Result<(), KernelContextError> {
        let mut lock = self.lock_cpu()?;
        let st = lock.state();
        if st.isr_nesting == 0 {
            return Err(KernelContextError::BadContext);
        }
        st.isr_nesting -= 1;

        if st.isr_nesting == 0 && st.reschedule_pending {
            self.unlock_cpu_and_switch(lock);
        }
        Ok(())
    }

    /// Get a flag indicating whether the caller is an interrupt handler.
    pub fn is_isr_context(&self) -> Result<bool, KernelContextError> {
        let mut lock = self.lock_cpu()?;
        Ok(lock.state().isr_nesting > 0)
    }

    /// Advance the time by `ticks`, expiring due timeouts and time slices.
    ///
    /// Called by the port's tick handler. A tickless port passes the number
    /// of ticks elapsed since the last call.
    pub fn announce(&self, ticks: Ticks) -> Result<(), KernelContextError> {
        let mut lock = self.lock_cpu()?;
        let st = lock.state();

        let result = timeout::announce(st, ticks, state::expire)
            .and_then(|()| thread::advance_time_slice(st, ticks));
        self.ok_or_fatal(result, st);

        self.unlock_cpu_and_reschedule(lock);
        Ok(())
    }

    /// Get the number of ticks until the next timeout or time slice
    /// expiration. `None` means nothing is pending and a tickless port may
    /// sleep indefinitely.
    pub fn time_until_next(&self) -> Result<Option<Ticks>, KernelContextError> {
        let mut lock = self.lock_cpu()?;
        let st = lock.state();
        let next = timeout::time_until_next(st);
        let slice = thread::time_slice_remaining(st);
        Ok(match (next, slice) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        })
    }

    /// Get the number of ticks announced since the kernel was constructed.
    pub fn uptime_ticks(&self) -> Result<u64, KernelContextError> {
        let mut lock = self.lock_cpu()?;
        Ok(lock.state().timeouts.uptime())
    }
}
