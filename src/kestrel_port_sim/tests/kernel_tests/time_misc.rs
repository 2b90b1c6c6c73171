//! Timeouts and the system time
use kestrel_kernel::{QueueOrder, TakeSemaphoreError, ThreadState, Timeout, WaitError, WaitOutcome};
use kestrel_port_sim::Sim;

use super::utils::{assert_state, boot, spawn};

#[test]
fn take_times_out() {
    let sim: Sim = Sim::new();
    let k = sim.kernel();
    let [a, b] = boot(k, &[("a", 3), ("b", 5)])[..] else {
        unreachable!()
    };
    let sem = k.semaphore_create(0, 1, QueueOrder::Fifo).unwrap();

    assert_eq!(
        k.semaphore_take(sem, Timeout::Ticks(10)),
        Ok(WaitOutcome::Pending)
    );
    assert_eq!(sim.current(), Some(b));

    sim.tick(9).unwrap();
    assert_state(k, a, ThreadState::WaitingWithTimeout);
    assert_eq!(k.time_until_next(), Ok(Some(1)));

    sim.tick(1).unwrap();
    assert_eq!(sim.current(), Some(a));
    assert_eq!(k.take_wait_result(a), Ok(Some(Err(WaitError::Timeout))));
    assert_eq!(k.time_until_next(), Ok(None));

    // The thread is no longer in the wait queue; the unit stays in the
    // semaphore
    k.semaphore_give(sem).unwrap();
    assert_eq!(k.semaphore_count(sem), Ok(1));
    assert_eq!(
        k.semaphore_take(sem, Timeout::NoWait),
        Ok(WaitOutcome::Done(()))
    );
    assert_eq!(
        k.semaphore_take(sem, Timeout::NoWait),
        Err(TakeSemaphoreError::WouldBlock)
    );
}

#[test]
fn wake_before_timeout_disarms_it() {
    let sim: Sim = Sim::new();
    let k = sim.kernel();
    let [controller] = boot(k, &[("controller", 10)])[..] else {
        unreachable!()
    };
    let sem = k.semaphore_create(0, 1, QueueOrder::Fifo).unwrap();

    let waiter = spawn(k, "waiter", 3);
    assert_eq!(
        k.semaphore_take(sem, Timeout::Ticks(10)),
        Ok(WaitOutcome::Pending)
    );
    assert_eq!(sim.current(), Some(controller));

    k.semaphore_give(sem).unwrap();
    assert_eq!(sim.current(), Some(waiter));
    assert_eq!(k.take_wait_result(waiter), Ok(Some(Ok(0))));
    assert_eq!(k.time_until_next(), Ok(None));

    sim.tick(20).unwrap();
    assert_eq!(k.take_wait_result(waiter), Ok(None));
}

#[test]
fn simultaneous_expirations() {
    let sim: Sim = Sim::new();
    let k = sim.kernel();
    let [controller] = boot(k, &[("controller", 10)])[..] else {
        unreachable!()
    };

    let a = spawn(k, "a", 3);
    assert_eq!(k.sleep(Timeout::Ticks(5)), Ok(WaitOutcome::Pending));
    let b = spawn(k, "b", 4);
    assert_eq!(k.sleep(Timeout::Ticks(3)), Ok(WaitOutcome::Pending));
    let c = spawn(k, "c", 2);
    assert_eq!(k.sleep(Timeout::Ticks(5)), Ok(WaitOutcome::Pending));
    assert_eq!(sim.current(), Some(controller));

    assert_eq!(sim.idle(), Ok(Some(3)));
    assert_eq!(sim.current(), Some(b));
    k.thread_exit().unwrap();

    // `a` and `c` expire on the same tick; `c` is more urgent
    assert_eq!(sim.idle(), Ok(Some(2)));
    assert_eq!(sim.current(), Some(c));
    assert_state(k, a, ThreadState::Ready);
    assert_eq!(k.uptime_ticks(), Ok(5));
}

#[test]
fn uptime_advances_without_timeouts() {
    let sim: Sim = Sim::new();
    let k = sim.kernel();
    assert_eq!(k.uptime_ticks(), Ok(0));
    sim.tick(7).unwrap();
    sim.tick(0).unwrap();
    sim.tick(3).unwrap();
    assert_eq!(k.uptime_ticks(), Ok(10));
    assert_eq!(k.time_until_next(), Ok(None));
}
