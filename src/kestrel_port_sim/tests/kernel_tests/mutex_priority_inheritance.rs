//! Priority inheritance of mutexes
use kestrel_kernel::{ThreadState, Timeout, WaitError, WaitOutcome};
use kestrel_port_sim::Sim;

use super::utils::{assert_state, boot, spawn, SeqTracker};

#[test]
fn owner_inherits_waiter_priority() {
    let seq = SeqTracker::new();
    let sim: Sim = Sim::new();
    let k = sim.kernel();
    let [b] = boot(k, &[("b", 10)])[..] else {
        unreachable!()
    };
    let mtx = k.mutex_create().unwrap();

    seq.expect_and_replace(0, 1);
    assert_eq!(k.mutex_lock(mtx, Timeout::Forever), Ok(WaitOutcome::Done(())));

    // `a` preempts `b` and blocks on the mutex
    let a = spawn(k, "a", 5);
    assert_eq!(sim.current(), Some(a));
    seq.expect_and_replace(1, 2);
    assert_eq!(k.mutex_lock(mtx, Timeout::Forever), Ok(WaitOutcome::Pending));

    // `b` runs at `a`'s priority until it unlocks the mutex
    assert_eq!(sim.current(), Some(b));
    seq.expect_and_replace(2, 3);
    assert_eq!(k.thread_effective_priority(b), Ok(5));
    assert_eq!(k.thread_priority(b), Ok(10));

    k.mutex_unlock(mtx).unwrap();
    assert_eq!(sim.current(), Some(a));
    seq.expect_and_replace(3, 4);
    assert_eq!(k.take_wait_result(a), Ok(Some(Ok(0))));
    assert_eq!(k.mutex_owner(mtx), Ok(Some(a)));
    assert_eq!(k.thread_effective_priority(b), Ok(10));
    assert_eq!(k.thread_effective_priority(a), Ok(5));
}

#[test]
fn boosted_owner_is_not_preempted_by_medium_thread() {
    let sim: Sim = Sim::new();
    let k = sim.kernel();
    let [low] = boot(k, &[("low", 10)])[..] else {
        unreachable!()
    };
    let mtx = k.mutex_create().unwrap();
    assert_eq!(k.mutex_lock(mtx, Timeout::Forever), Ok(WaitOutcome::Done(())));

    let high = spawn(k, "high", 5);
    assert_eq!(k.mutex_lock(mtx, Timeout::Forever), Ok(WaitOutcome::Pending));
    assert_eq!(sim.current(), Some(low));

    let medium = spawn(k, "medium", 7);
    assert_eq!(sim.current(), Some(low));
    assert_state(k, medium, ThreadState::Ready);

    // Once `low` releases the mutex, `high` runs first, then `medium`
    k.mutex_unlock(mtx).unwrap();
    assert_eq!(sim.current(), Some(high));
    k.thread_exit().unwrap();
    assert_eq!(sim.current(), Some(medium));
}

#[test]
fn waiter_timeout_restores_owner_priority() {
    let sim: Sim = Sim::new();
    let k = sim.kernel();
    let [owner] = boot(k, &[("owner", 10)])[..] else {
        unreachable!()
    };
    let mtx = k.mutex_create().unwrap();
    assert_eq!(k.mutex_lock(mtx, Timeout::Forever), Ok(WaitOutcome::Done(())));

    let waiter = spawn(k, "waiter", 5);
    assert_eq!(k.mutex_lock(mtx, Timeout::Ticks(5)), Ok(WaitOutcome::Pending));
    assert_eq!(k.thread_effective_priority(owner), Ok(5));

    sim.tick(5).unwrap();
    assert_eq!(sim.current(), Some(waiter));
    assert_eq!(k.take_wait_result(waiter), Ok(Some(Err(WaitError::Timeout))));
    assert_eq!(k.thread_effective_priority(owner), Ok(10));
    assert_eq!(k.mutex_owner(mtx), Ok(Some(owner)));
}

#[test]
fn waiter_priority_change_propagates_to_owner() {
    let sim: Sim = Sim::new();
    let k = sim.kernel();
    let [owner] = boot(k, &[("owner", 10)])[..] else {
        unreachable!()
    };
    let mtx = k.mutex_create().unwrap();
    assert_eq!(k.mutex_lock(mtx, Timeout::Forever), Ok(WaitOutcome::Done(())));

    let waiter = spawn(k, "waiter", 5);
    assert_eq!(k.mutex_lock(mtx, Timeout::Forever), Ok(WaitOutcome::Pending));

    k.thread_set_priority(waiter, 3).unwrap();
    assert_eq!(k.thread_effective_priority(owner), Ok(3));

    k.thread_set_priority(waiter, 12).unwrap();
    assert_eq!(k.thread_effective_priority(owner), Ok(10));

    // Changing the owner's own base priority keeps the inherited one in
    // effect if it's more urgent
    k.thread_set_priority(waiter, 4).unwrap();
    k.thread_set_priority(owner, 8).unwrap();
    assert_eq!(k.thread_effective_priority(owner), Ok(4));
    assert_eq!(k.thread_priority(owner), Ok(8));
}

#[test]
fn inheritance_from_multiple_mutexes() {
    let sim: Sim = Sim::new();
    let k = sim.kernel();
    let [owner] = boot(k, &[("owner", 10)])[..] else {
        unreachable!()
    };
    let m1 = k.mutex_create().unwrap();
    let m2 = k.mutex_create().unwrap();
    assert_eq!(k.mutex_lock(m1, Timeout::Forever), Ok(WaitOutcome::Done(())));
    assert_eq!(k.mutex_lock(m2, Timeout::Forever), Ok(WaitOutcome::Done(())));

    let w1 = spawn(k, "w1", 5);
    assert_eq!(k.mutex_lock(m1, Timeout::Forever), Ok(WaitOutcome::Pending));
    let w2 = spawn(k, "w2", 3);
    assert_eq!(k.mutex_lock(m2, Timeout::Forever), Ok(WaitOutcome::Pending));
    assert_eq!(k.thread_effective_priority(owner), Ok(3));

    // Unlock out of order. `w2` still boosts `owner` above `w1`.
    k.mutex_unlock(m1).unwrap();
    assert_eq!(sim.current(), Some(owner));
    assert_eq!(k.thread_effective_priority(owner), Ok(3));
    assert_eq!(k.mutex_owner(m1), Ok(Some(w1)));
    assert_state(k, w1, ThreadState::Ready);

    k.mutex_unlock(m2).unwrap();
    assert_eq!(sim.current(), Some(w2));
    assert_eq!(k.thread_effective_priority(owner), Ok(10));
}

#[test]
fn inheritance_is_not_transitive() {
    let sim: Sim = Sim::new();
    let k = sim.kernel();
    let [low] = boot(k, &[("low", 12)])[..] else {
        unreachable!()
    };
    let m1 = k.mutex_create().unwrap();
    let m2 = k.mutex_create().unwrap();
    assert_eq!(k.mutex_lock(m1, Timeout::Forever), Ok(WaitOutcome::Done(())));

    // `mid` holds `m2` and waits for `m1`
    let mid = spawn(k, "mid", 8);
    assert_eq!(k.mutex_lock(m2, Timeout::Forever), Ok(WaitOutcome::Done(())));
    assert_eq!(k.mutex_lock(m1, Timeout::Forever), Ok(WaitOutcome::Pending));
    assert_eq!(k.thread_effective_priority(low), Ok(8));

    // `high` waits for `m2`, boosting `mid` but not `low`
    let high = spawn(k, "high", 2);
    assert_eq!(k.mutex_lock(m2, Timeout::Forever), Ok(WaitOutcome::Pending));
    assert_eq!(k.thread_effective_priority(mid), Ok(2));
    assert_eq!(k.thread_effective_priority(low), Ok(8));
    assert_state(k, high, ThreadState::Waiting);
}

#[test]
fn ready_owner_is_repositioned_when_boosted() {
    let sim: Sim = Sim::new();
    let k = sim.kernel();
    let [low] = boot(k, &[("low", 10)])[..] else {
        unreachable!()
    };
    let mtx = k.mutex_create().unwrap();
    assert_eq!(k.mutex_lock(mtx, Timeout::Forever), Ok(WaitOutcome::Done(())));

    // `med` preempts the owner, which stays in the ready queue
    let med = spawn(k, "med", 7);
    assert_eq!(sim.current(), Some(med));
    assert_state(k, low, ThreadState::Ready);

    let high = spawn(k, "high", 5);
    assert_eq!(sim.current(), Some(high));
    assert_eq!(k.mutex_lock(mtx, Timeout::Forever), Ok(WaitOutcome::Pending));

    // The boost moves `low` ahead of `med`
    assert_eq!(sim.current(), Some(low));
    assert_eq!(k.thread_effective_priority(low), Ok(5));
    assert_state(k, med, ThreadState::Ready);

    k.mutex_unlock(mtx).unwrap();
    assert_eq!(sim.current(), Some(high));
    assert_eq!(k.take_wait_result(high), Ok(Some(Ok(0))));
    assert_eq!(k.thread_effective_priority(low), Ok(10));

    k.mutex_unlock(mtx).unwrap();
    k.thread_exit().unwrap();
    assert_eq!(sim.current(), Some(med));
}
