//! Semaphore services
use kestrel_kernel::{
    CreateObjectError, DestroyObjectError, QueueOrder, TakeSemaphoreError, ThreadState, Timeout,
    UpdateObjectError, WaitError, WaitOutcome,
};
use kestrel_port_sim::Sim;

use super::utils::{assert_state, boot, spawn};

#[test]
fn create_validates_parameters() {
    let sim: Sim = Sim::new();
    let k = sim.kernel();
    assert_eq!(
        k.semaphore_create(0, 0, QueueOrder::Fifo),
        Err(CreateObjectError::BadParam)
    );
    assert_eq!(
        k.semaphore_create(3, 2, QueueOrder::Fifo),
        Err(CreateObjectError::BadParam)
    );

    for _ in 0..kestrel_port_sim::NUM_OBJECTS {
        k.semaphore_create(0, 1, QueueOrder::Fifo).unwrap();
    }
    assert_eq!(
        k.semaphore_create(0, 1, QueueOrder::Fifo),
        Err(CreateObjectError::QueueOverflow)
    );
}

#[test]
fn give_saturates_at_limit() {
    let sim: Sim = Sim::new();
    let k = sim.kernel();
    let sem = k.semaphore_create(1, 2, QueueOrder::Fifo).unwrap();
    for _ in 0..3 {
        k.semaphore_give(sem).unwrap();
    }
    assert_eq!(k.semaphore_count(sem), Ok(2));
}

#[test]
fn poll_take() {
    let sim: Sim = Sim::new();
    let k = sim.kernel();
    boot(k, &[("a", 3)]);
    let sem = k.semaphore_create(1, 1, QueueOrder::Fifo).unwrap();

    assert_eq!(
        k.semaphore_take(sem, Timeout::NoWait),
        Ok(WaitOutcome::Done(()))
    );
    assert_eq!(
        k.semaphore_take(sem, Timeout::NoWait),
        Err(TakeSemaphoreError::WouldBlock)
    );
    assert_eq!(
        k.semaphore_take(sem, Timeout::Ticks(0)),
        Err(TakeSemaphoreError::WouldBlock)
    );
}

#[test]
fn give_hands_off_to_waiter() {
    let sim: Sim = Sim::new();
    let k = sim.kernel();
    let [controller] = boot(k, &[("controller", 10)])[..] else {
        unreachable!()
    };
    let sem = k.semaphore_create(0, 5, QueueOrder::Fifo).unwrap();

    let waiter = spawn(k, "waiter", 3);
    assert_eq!(
        k.semaphore_take(sem, Timeout::Forever),
        Ok(WaitOutcome::Pending)
    );
    assert_eq!(sim.current(), Some(controller));
    assert_state(k, waiter, ThreadState::Waiting);

    k.semaphore_give(sem).unwrap();
    assert_eq!(sim.current(), Some(waiter));
    assert_eq!(k.take_wait_result(waiter), Ok(Some(Ok(0))));
    assert_eq!(k.take_wait_result(waiter), Ok(None));

    // The unit was consumed by the waiter
    assert_eq!(k.semaphore_count(sem), Ok(0));
}

/// Block `count` threads of the specified priorities on `sem`, returning to
/// the controller (priority 10) after each one.
fn block_waiters(
    sim: &Sim,
    sem: kestrel_kernel::SemaphoreId,
    priorities: &[(&'static str, i32)],
) -> Vec<kestrel_kernel::ThreadId> {
    let k = sim.kernel();
    let controller = sim.current();
    priorities
        .iter()
        .map(|&(name, priority)| {
            let thread = spawn(k, name, priority);
            assert_eq!(sim.current(), Some(thread));
            assert_eq!(
                k.semaphore_take(sem, Timeout::Forever),
                Ok(WaitOutcome::Pending)
            );
            assert_eq!(sim.current(), controller);
            thread
        })
        .collect()
}

#[test]
fn fifo_order() {
    let sim: Sim = Sim::new();
    let k = sim.kernel();
    boot(k, &[("controller", 10)]);
    let sem = k.semaphore_create(0, 5, QueueOrder::Fifo).unwrap();
    let [w1, w2] = block_waiters(&sim, sem, &[("w1", 5), ("w2", 4)])[..] else {
        unreachable!()
    };

    k.semaphore_give(sem).unwrap();
    assert_eq!(sim.current(), Some(w1));
    assert_state(k, w2, ThreadState::Waiting);
}

#[test]
fn priority_order() {
    let sim: Sim = Sim::new();
    let k = sim.kernel();
    boot(k, &[("controller", 10)]);
    let sem = k.semaphore_create(0, 5, QueueOrder::Priority).unwrap();
    let [w1, w2, w3] = block_waiters(&sim, sem, &[("w1", 5), ("w2", 4), ("w3", 4)])[..] else {
        unreachable!()
    };

    k.semaphore_give(sem).unwrap();
    assert_eq!(sim.current(), Some(w2));
    k.semaphore_give(sem).unwrap();
    // `w3` is woken up but doesn't preempt `w2`
    assert_eq!(sim.current(), Some(w2));
    assert_state(k, w3, ThreadState::Ready);
    assert_state(k, w1, ThreadState::Waiting);
}

#[test]
fn waiter_priority_change_reorders_queue() {
    let sim: Sim = Sim::new();
    let k = sim.kernel();
    boot(k, &[("controller", 10)]);
    let sem = k.semaphore_create(0, 5, QueueOrder::Priority).unwrap();
    let [_w1, w2] = block_waiters(&sim, sem, &[("w1", 3), ("w2", 4)])[..] else {
        unreachable!()
    };

    k.thread_set_priority(w2, 2).unwrap();
    k.semaphore_give(sem).unwrap();
    assert_eq!(sim.current(), Some(w2));
}

#[test]
fn reset_cancels_waiters() {
    let sim: Sim = Sim::new();
    let k = sim.kernel();
    boot(k, &[("controller", 10)]);
    let sem = k.semaphore_create(0, 5, QueueOrder::Fifo).unwrap();
    let [w1, w2] = block_waiters(&sim, sem, &[("w1", 3), ("w2", 3)])[..] else {
        unreachable!()
    };

    k.semaphore_reset(sem).unwrap();
    assert_eq!(sim.current(), Some(w1));
    assert_eq!(k.take_wait_result(w1), Ok(Some(Err(WaitError::Cancelled))));
    assert_eq!(k.take_wait_result(w2), Ok(Some(Err(WaitError::Cancelled))));
    assert_state(k, w2, ThreadState::Ready);
    assert_eq!(k.semaphore_count(sem), Ok(0));
}

#[test]
fn destroy() {
    let sim: Sim = Sim::new();
    let k = sim.kernel();
    boot(k, &[("controller", 10)]);
    let sem = k.semaphore_create(0, 5, QueueOrder::Fifo).unwrap();
    let [w1] = block_waiters(&sim, sem, &[("w1", 3)])[..] else {
        unreachable!()
    };

    assert_eq!(
        k.semaphore_destroy(sem, false),
        Err(DestroyObjectError::BadObjectState)
    );
    k.semaphore_destroy(sem, true).unwrap();
    assert_eq!(sim.current(), Some(w1));
    assert_eq!(k.take_wait_result(w1), Ok(Some(Err(WaitError::Cancelled))));

    assert_eq!(k.semaphore_give(sem), Err(UpdateObjectError::BadId));

    // The slot isn't reused
    let sem2 = k.semaphore_create(0, 5, QueueOrder::Fifo).unwrap();
    assert_ne!(sem, sem2);
}

#[test]
#[should_panic(expected = "ObjectDestroyedTwice")]
fn destroy_twice() {
    let sim: Sim = Sim::new();
    let k = sim.kernel();
    let sem = k.semaphore_create(0, 5, QueueOrder::Fifo).unwrap();
    k.semaphore_destroy(sem, false).unwrap();
    let _ = k.semaphore_destroy(sem, false);
}
