//! Deterministic simulation environment for the Kestrel kernel
//!
//! [`SimPort`] implements the port interface without any real threads.
//! Interrupt masking is a flag, and a context switch only records which
//! thread the kernel dispatched and returns immediately. The code driving
//! the simulation (usually a test) plays the role of whichever thread is
//! currently running: kernel services called from it are attributed to
//! that thread.
//!
//! Because `switch_context` returns immediately, blocking services return
//! [`WaitOutcome::Pending`] instead of waiting. The result of the wait is
//! collected with [`Kernel::take_wait_result`] once the thread is woken
//! up.
//!
//! [`Sim`] bundles a kernel instance with helpers to run code in an
//! interrupt context, generate ticks, and idle until the next timeout.
//!
//! [`WaitOutcome::Pending`]: kestrel_kernel::WaitOutcome::Pending
#![deny(unsafe_op_in_unsafe_fn)]
use arrayvec::ArrayVec;
use kestrel_kernel::{
    ContextRef, EventCb, FatalInfo, IrqKey, Kernel, KernelCfg, KernelContextError, MutexCb, Port,
    SemaphoreCb, ThreadCb, ThreadId, Ticks, TimerCb, WaitObjectCb,
};
use spin::Mutex as SpinMutex;
use std::cell::Cell;

/// The capacity of the thread pool.
pub const NUM_THREADS: usize = 16;

/// The capacity of each of the other object pools.
pub const NUM_OBJECTS: usize = 8;

/// A [`SimPort`] without time slicing.
pub type SimTraits = SimPort<0>;

/// A [`SimPort`] with a time slice of two ticks.
pub type SlicedSimTraits = SimPort<2>;

/// A context switch performed by the kernel. `None` stands for the idle
/// context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Switch {
    pub from: Option<ThreadId>,
    pub to: Option<ThreadId>,
}

/// The simulated port. `SLICE` is the length of a round-robin time slice in
/// ticks (`0` disables time slicing).
#[derive(Debug)]
pub struct SimPort<const SLICE: Ticks> {
    irq_locked: Cell<bool>,
    current: Cell<Option<ThreadId>>,
    /// The context switch trace.
    switches: SpinMutex<Vec<Switch>>,
}

#[derive(Debug, Default)]
pub struct SimThreadState {
    tsm: Cell<Tsm>,
    dispatch_count: Cell<usize>,
}

/// Thread state machine
///
/// These don't exactly align with the thread states defined in the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Tsm {
    /// The thread's context state is not initialized. The kernel has to call
    /// `initialize_thread_state` first before dispatching the thread.
    #[default]
    Uninit,
    /// The thread's context state is initialized but it hasn't run yet.
    Dormant,
    /// The thread owns the (simulated) processor.
    Running,
    /// The thread was switched out.
    Parked,
}

impl<const SLICE: Ticks> SimPort<SLICE> {
    pub const fn new() -> Self {
        Self {
            irq_locked: Cell::new(false),
            current: Cell::new(None),
            switches: SpinMutex::new(Vec::new()),
        }
    }

    /// Get the thread the port last switched to.
    pub fn current(&self) -> Option<ThreadId> {
        self.current.get()
    }

    /// Get the context switches performed so far.
    pub fn switches(&self) -> Vec<Switch> {
        self.switches.lock().clone()
    }

    /// Forget the recorded context switches.
    pub fn clear_switches(&self) {
        self.switches.lock().clear();
    }
}

impl<const SLICE: Ticks> Default for SimPort<SLICE> {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl<const SLICE: Ticks> Port for SimPort<SLICE> {
    type PortThreadState = SimThreadState;

    unsafe fn irq_lock(&self) -> IrqKey {
        IrqKey::from_raw(self.irq_locked.replace(true) as usize)
    }

    unsafe fn irq_unlock(&self, key: IrqKey) {
        self.irq_locked.set(key.into_raw() != 0);
    }

    fn is_irq_locked(&self) -> bool {
        self.irq_locked.get()
    }

    fn initialize_thread_state(&self, thread: ThreadId, state: &mut SimThreadState) {
        log::trace!("initialize_thread_state({thread:?})");
        state.tsm.set(Tsm::Dormant);
    }

    unsafe fn switch_context(
        &self,
        prev: Option<ContextRef<Self>>,
        next: Option<ContextRef<Self>>,
        key: IrqKey,
    ) {
        assert!(self.is_irq_locked(), "context switch with interrupts unmasked");
        assert_eq!(
            key.into_raw(),
            0,
            "context switch inside a caller-held interrupt lock"
        );

        let from = prev.as_ref().map(|ctx| ctx.thread);
        let to = next.as_ref().map(|ctx| ctx.thread);
        log::trace!("switch_context({from:?} -> {to:?})");

        // Safety: The kernel guarantees the pointees are valid during this
        //         call, and the simulation is single-threaded, so no one else
        //         is accessing them
        if let Some(prev) = prev {
            let state = unsafe { prev.state.as_ref() };
            if state.tsm.get() == Tsm::Running {
                state.tsm.set(Tsm::Parked);
            }
        }
        if let Some(next) = next {
            let state = unsafe { next.state.as_ref() };
            assert_ne!(
                state.tsm.get(),
                Tsm::Uninit,
                "dispatching an uninitialized thread"
            );
            state.tsm.set(Tsm::Running);
            state.dispatch_count.set(state.dispatch_count.get() + 1);
        }

        self.current.set(to);
        self.switches.lock().push(Switch { from, to });

        // Safety: The kernel hands over the key of its own `irq_lock`
        unsafe { self.irq_unlock(key) };
    }

    fn fatal_error(&self, info: &FatalInfo) -> ! {
        panic!("fatal kernel error: {info}");
    }
}

impl<const SLICE: Ticks> KernelCfg for SimPort<SLICE> {
    const NUM_COOP_PRIORITIES: usize = 4;
    const NUM_PREEMPT_PRIORITIES: usize = 16;
    const TIME_SLICE_TICKS: Ticks = SLICE;

    type ThreadPool = ArrayVec<ThreadCb<Self>, NUM_THREADS>;
    type SemaphorePool = ArrayVec<SemaphoreCb, NUM_OBJECTS>;
    type MutexPool = ArrayVec<MutexCb, NUM_OBJECTS>;
    type EventPool = ArrayVec<EventCb, NUM_OBJECTS>;
    type TimerPool = ArrayVec<TimerCb, NUM_OBJECTS>;
    type WaitObjectPool = ArrayVec<WaitObjectCb, NUM_OBJECTS>;
}

/// A kernel instance running on [`SimPort`].
pub struct Sim<const SLICE: Ticks = 0> {
    kernel: Kernel<SimPort<SLICE>>,
}

impl<const SLICE: Ticks> Sim<SLICE> {
    /// Construct a simulation. The scheduler isn't started yet.
    pub fn new() -> Self {
        let _ = env_logger::try_init();
        Self {
            kernel: Kernel::new(SimPort::new()),
        }
    }

    #[inline]
    pub fn kernel(&self) -> &Kernel<SimPort<SLICE>> {
        &self.kernel
    }

    #[inline]
    pub fn port(&self) -> &SimPort<SLICE> {
        self.kernel.port()
    }

    /// Run `f` as an interrupt handler. A context switch requested by `f`
    /// happens when it returns.
    pub fn irq<R>(&self, f: impl FnOnce(&Kernel<SimPort<SLICE>>) -> R) -> Result<R, KernelContextError> {
        self.kernel.isr_enter()?;
        let output = f(&self.kernel);
        self.kernel.isr_exit()?;
        Ok(output)
    }

    /// Deliver a timer interrupt that advances the time by `ticks`.
    pub fn tick(&self, ticks: Ticks) -> Result<(), KernelContextError> {
        log::trace!("tick({ticks})");
        self.irq(|kernel| kernel.announce(ticks))?
    }

    /// Let the time pass until the next timeout, as a tickless idle loop
    /// would. Returns the number of ticks that passed, or `None` if nothing
    /// is pending, in which case the time doesn't advance.
    pub fn idle(&self) -> Result<Option<Ticks>, KernelContextError> {
        let Some(ticks) = self.kernel.time_until_next()? else {
            return Ok(None);
        };
        self.tick(ticks)?;
        Ok(Some(ticks))
    }

    /// Get the thread the kernel last dispatched.
    pub fn current(&self) -> Option<ThreadId> {
        self.port().current()
    }

    /// Get the context switches performed so far.
    pub fn switches(&self) -> Vec<Switch> {
        self.port().switches()
    }
}

impl<const SLICE: Ticks> Default for Sim<SLICE> {
    fn default() -> Self {
        Self::new()
    }
}
