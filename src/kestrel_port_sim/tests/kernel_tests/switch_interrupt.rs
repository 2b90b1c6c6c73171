//! Interrupts that become pending while the kernel dispatches a thread
use arrayvec::ArrayVec;
use kestrel_kernel::{
    ContextRef, EventCb, FatalInfo, IrqKey, Kernel, KernelCfg, MutexCb, Port, QueueOrder,
    SemaphoreCb, SemaphoreId, ThreadCb, ThreadId, ThreadState, Timeout, TimerCb, WaitObjectCb,
    WaitOutcome,
};
use std::{
    cell::{Cell, RefCell},
    ptr::NonNull,
};

use super::utils::{assert_state, boot};

type Switch = (Option<ThreadId>, Option<ThreadId>);

/// A port that takes a pending interrupt as soon as a context switch
/// unmasks interrupts. The handler gives a semaphore.
#[derive(Default)]
struct IrqOnSwitchPort {
    irq_locked: Cell<bool>,
    current: Cell<Option<ThreadId>>,
    switches: RefCell<Vec<Switch>>,
    kernel: Cell<Option<NonNull<Kernel<Self>>>>,
    pending_give: Cell<Option<SemaphoreId>>,
}

unsafe impl Port for IrqOnSwitchPort {
    type PortThreadState = ();

    unsafe fn irq_lock(&self) -> IrqKey {
        IrqKey::from_raw(self.irq_locked.replace(true) as usize)
    }

    unsafe fn irq_unlock(&self, key: IrqKey) {
        self.irq_locked.set(key.into_raw() != 0);
    }

    fn is_irq_locked(&self) -> bool {
        self.irq_locked.get()
    }

    fn initialize_thread_state(&self, _: ThreadId, _: &mut ()) {}

    unsafe fn switch_context(
        &self,
        prev: Option<ContextRef<Self>>,
        next: Option<ContextRef<Self>>,
        key: IrqKey,
    ) {
        assert!(self.is_irq_locked());
        let to = next.map(|ctx| ctx.thread);
        self.switches
            .borrow_mut()
            .push((prev.map(|ctx| ctx.thread), to));
        self.current.set(to);

        unsafe { self.irq_unlock(key) };

        if let Some(sem) = self.pending_give.take() {
            // Safety: Set by `new_kernel` to the boxed kernel owning `self`
            let kernel = unsafe { self.kernel.get().unwrap().as_ref() };
            kernel.isr_enter().unwrap();
            kernel.semaphore_give(sem).unwrap();
            kernel.isr_exit().unwrap();
        }
    }

    fn fatal_error(&self, info: &FatalInfo) -> ! {
        panic!("fatal kernel error: {info}");
    }
}

impl KernelCfg for IrqOnSwitchPort {
    const NUM_COOP_PRIORITIES: usize = 0;
    const NUM_PREEMPT_PRIORITIES: usize = 16;

    type ThreadPool = ArrayVec<ThreadCb<Self>, 4>;
    type SemaphorePool = ArrayVec<SemaphoreCb, 2>;
    type MutexPool = ArrayVec<MutexCb, 2>;
    type EventPool = ArrayVec<EventCb, 2>;
    type TimerPool = ArrayVec<TimerCb, 2>;
    type WaitObjectPool = ArrayVec<WaitObjectCb, 2>;
}

fn new_kernel() -> Box<Kernel<IrqOnSwitchPort>> {
    let _ = env_logger::try_init();
    let kernel = Box::new(Kernel::new(IrqOnSwitchPort::default()));
    kernel.port().kernel.set(Some(NonNull::from(&*kernel)));
    kernel
}

#[test]
fn interrupt_taken_on_incoming_thread() {
    let kernel = new_kernel();
    let k = &*kernel;
    let [a, b] = boot(k, &[("a", 3), ("b", 8)])[..] else {
        unreachable!()
    };
    let sem = k.semaphore_create(0, 1, QueueOrder::Fifo).unwrap();

    // `a` blocks, and the interrupt waking it up arrives while the
    // processor is handed to `b`
    k.port().pending_give.set(Some(sem));
    assert_eq!(
        k.semaphore_take(sem, Timeout::Forever),
        Ok(WaitOutcome::Done(()))
    );

    assert_eq!(k.current_thread(), Ok(Some(a)));
    assert_eq!(k.port().current.get(), Some(a));
    assert_eq!(
        *k.port().switches.borrow(),
        [(None, Some(a)), (Some(a), Some(b)), (Some(b), Some(a))]
    );
    assert_state(k, a, ThreadState::Running);
    assert_state(k, b, ThreadState::Ready);
    assert!(!k.port().is_irq_locked());
}

#[test]
fn interrupt_without_reschedule() {
    let kernel = new_kernel();
    let k = &*kernel;
    let [a, b] = boot(k, &[("a", 3), ("b", 8)])[..] else {
        unreachable!()
    };
    let sem = k.semaphore_create(0, 1, QueueOrder::Fifo).unwrap();
    let other = k.semaphore_create(0, 1, QueueOrder::Fifo).unwrap();

    // The handler doesn't wake anyone, so `b` keeps the processor
    k.port().pending_give.set(Some(other));
    assert_eq!(
        k.semaphore_take(sem, Timeout::Forever),
        Ok(WaitOutcome::Pending)
    );

    assert_eq!(k.current_thread(), Ok(Some(b)));
    assert_eq!(k.port().current.get(), Some(b));
    assert_state(k, a, ThreadState::Waiting);
    assert_eq!(k.semaphore_count(other), Ok(1));
}
