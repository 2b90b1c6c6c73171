//! Mutex services
use kestrel_kernel::{
    DestroyObjectError, LockMutexError, ThreadState, Timeout, UnlockMutexError, WaitError,
    WaitOutcome,
};
use kestrel_port_sim::Sim;

use super::utils::{assert_state, boot, spawn};

const DONE: Result<WaitOutcome<()>, LockMutexError> = Ok(WaitOutcome::Done(()));

#[test]
fn recursive_locking() {
    let sim: Sim = Sim::new();
    let k = sim.kernel();
    let [a] = boot(k, &[("a", 3)])[..] else {
        unreachable!()
    };
    let mtx = k.mutex_create().unwrap();

    assert_eq!(k.mutex_lock(mtx, Timeout::Forever), DONE);
    assert_eq!(k.mutex_lock(mtx, Timeout::NoWait), DONE);
    assert_eq!(k.mutex_owner(mtx), Ok(Some(a)));

    k.mutex_unlock(mtx).unwrap();
    assert_eq!(k.mutex_owner(mtx), Ok(Some(a)));
    k.mutex_unlock(mtx).unwrap();
    assert_eq!(k.mutex_owner(mtx), Ok(None));
    assert_eq!(k.mutex_unlock(mtx), Err(UnlockMutexError::NotOwner));
}

#[test]
fn contention_without_waiting() {
    let sim: Sim = Sim::new();
    let k = sim.kernel();
    let [a] = boot(k, &[("a", 3)])[..] else {
        unreachable!()
    };
    let mtx = k.mutex_create().unwrap();
    assert_eq!(k.mutex_lock(mtx, Timeout::Forever), DONE);

    let b = spawn(k, "b", 2);
    assert_eq!(sim.current(), Some(b));
    assert_eq!(
        k.mutex_lock(mtx, Timeout::NoWait),
        Err(LockMutexError::WouldBlock)
    );
    assert_eq!(k.mutex_unlock(mtx), Err(UnlockMutexError::NotOwner));
    assert_eq!(k.mutex_owner(mtx), Ok(Some(a)));
}

#[test]
fn unlock_wakes_most_urgent_waiter() {
    let sim: Sim = Sim::new();
    let k = sim.kernel();
    let [t1] = boot(k, &[("t1", 3)])[..] else {
        unreachable!()
    };
    let mtx = k.mutex_create().unwrap();
    assert_eq!(k.mutex_lock(mtx, Timeout::Forever), DONE);

    let t2 = spawn(k, "t2", 2);
    assert_eq!(k.mutex_lock(mtx, Timeout::Forever), Ok(WaitOutcome::Pending));
    let t3 = spawn(k, "t3", 1);
    assert_eq!(k.mutex_lock(mtx, Timeout::Forever), Ok(WaitOutcome::Pending));
    assert_eq!(sim.current(), Some(t1));

    // Unblock `t3` following the priority order, not the FIFO order
    k.mutex_unlock(mtx).unwrap();
    assert_eq!(sim.current(), Some(t3));
    assert_eq!(k.mutex_owner(mtx), Ok(Some(t3)));
    assert_state(k, t2, ThreadState::Waiting);

    // `t3` is already more urgent than its remaining waiter
    assert_eq!(k.thread_effective_priority(t3), Ok(1));
    k.mutex_unlock(mtx).unwrap();
    assert_eq!(k.mutex_owner(mtx), Ok(Some(t2)));
    assert_eq!(k.take_wait_result(t2), Ok(Some(Ok(0))));
}

#[test]
fn terminated_owner_hands_over_mutex() {
    let sim: Sim = Sim::new();
    let k = sim.kernel();
    let [owner] = boot(k, &[("owner", 10)])[..] else {
        unreachable!()
    };
    let m1 = k.mutex_create().unwrap();
    let m2 = k.mutex_create().unwrap();
    assert_eq!(k.mutex_lock(m1, Timeout::Forever), DONE);
    assert_eq!(k.mutex_lock(m2, Timeout::Forever), DONE);

    let waiter = spawn(k, "waiter", 5);
    assert_eq!(k.mutex_lock(m1, Timeout::Forever), Ok(WaitOutcome::Pending));
    assert_eq!(sim.current(), Some(owner));

    k.thread_exit().unwrap();
    assert_eq!(sim.current(), Some(waiter));
    assert_eq!(k.take_wait_result(waiter), Ok(Some(Ok(0))));
    assert_eq!(k.mutex_owner(m1), Ok(Some(waiter)));
    assert_eq!(k.mutex_owner(m2), Ok(None));
}

#[test]
fn aborted_waiter_leaves_queue() {
    let sim: Sim = Sim::new();
    let k = sim.kernel();
    let [owner] = boot(k, &[("owner", 10)])[..] else {
        unreachable!()
    };
    let mtx = k.mutex_create().unwrap();
    assert_eq!(k.mutex_lock(mtx, Timeout::Forever), DONE);

    let waiter = spawn(k, "waiter", 5);
    assert_eq!(k.mutex_lock(mtx, Timeout::Forever), Ok(WaitOutcome::Pending));
    assert_eq!(k.thread_effective_priority(owner), Ok(5));

    k.thread_abort(waiter).unwrap();
    assert_state(k, waiter, ThreadState::Dead);
    assert_eq!(k.thread_effective_priority(owner), Ok(10));

    k.mutex_unlock(mtx).unwrap();
    assert_eq!(k.mutex_owner(mtx), Ok(None));
}

#[test]
fn destroy() {
    let sim: Sim = Sim::new();
    let k = sim.kernel();
    let [owner] = boot(k, &[("owner", 10)])[..] else {
        unreachable!()
    };
    let mtx = k.mutex_create().unwrap();
    assert_eq!(k.mutex_lock(mtx, Timeout::Forever), DONE);
    assert_eq!(
        k.mutex_destroy(mtx, false),
        Err(DestroyObjectError::BadObjectState)
    );

    let waiter = spawn(k, "waiter", 5);
    assert_eq!(k.mutex_lock(mtx, Timeout::Forever), Ok(WaitOutcome::Pending));
    assert_eq!(sim.current(), Some(owner));

    k.mutex_destroy(mtx, true).unwrap();
    assert_eq!(sim.current(), Some(waiter));
    assert_eq!(k.take_wait_result(waiter), Ok(Some(Err(WaitError::Cancelled))));
    assert_eq!(k.thread_effective_priority(owner), Ok(10));
    assert_eq!(
        k.mutex_lock(mtx, Timeout::NoWait),
        Err(LockMutexError::BadId)
    );
}
