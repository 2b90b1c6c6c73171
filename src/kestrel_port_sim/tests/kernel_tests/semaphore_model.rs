//! Drives a semaphore shared by several worker threads with random
//! operations and compares it against a model.
use kestrel_kernel::{QueueOrder, ThreadId, ThreadState, Timeout, WaitError, WaitOutcome};
use kestrel_port_sim::Sim;
use quickcheck_macros::quickcheck;
use std::collections::VecDeque;

const NUM_WORKERS: usize = 4;
const LIMIT: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Worker {
    Dormant,
    Suspended,
    Waiting,
}

/// Let the workers that are ready run one by one, checking the wait result
/// each of them observes, and suspend them. Returns when the controller
/// regains the processor.
fn drain_workers(
    sim: &Sim,
    controller: ThreadId,
    workers: &[ThreadId],
    states: &mut [Worker],
    expected: &mut VecDeque<(usize, Result<usize, WaitError>)>,
) {
    let k = sim.kernel();
    while sim.current() != Some(controller) {
        let thread = sim.current().unwrap();
        let i = workers.iter().position(|&w| w == thread).unwrap();
        let (expected_i, expected_result) = expected.pop_front().unwrap();
        assert_eq!(i, expected_i, "woken up in the wrong order");
        assert_eq!(k.take_wait_result(thread), Ok(Some(expected_result)));
        states[i] = Worker::Suspended;
        k.thread_suspend(thread).unwrap();
    }
    assert!(expected.is_empty());
}

#[quickcheck]
fn matches_model(ops: Vec<u8>) {
    let sim: Sim = Sim::new();
    let k = sim.kernel();
    let controller = k
        .thread_create(kestrel_kernel::ThreadAttr::new("controller", 10))
        .unwrap();
    k.thread_start(controller).unwrap();
    k.start().unwrap();

    let sem = k.semaphore_create(0, LIMIT, QueueOrder::Fifo).unwrap();
    let workers: Vec<ThreadId> = (0..NUM_WORKERS)
        .map(|_| {
            k.thread_create(kestrel_kernel::ThreadAttr::new("worker", 2))
                .unwrap()
        })
        .collect();
    let mut states = [Worker::Dormant; NUM_WORKERS];

    let mut count = 0u32;
    let mut queue = VecDeque::new();
    let mut expected = VecDeque::new();

    for op in ops {
        let i = (op >> 2) as usize % NUM_WORKERS;
        match op & 3 {
            // A worker takes a unit
            0 | 1 if states[i] != Worker::Waiting => {
                log::trace!("worker {i} takes");
                if states[i] == Worker::Dormant {
                    k.thread_start(workers[i]).unwrap();
                } else {
                    k.thread_resume(workers[i]).unwrap();
                }
                assert_eq!(sim.current(), Some(workers[i]));

                let outcome = k.semaphore_take(sem, Timeout::Forever).unwrap();
                if count > 0 {
                    assert_eq!(outcome, WaitOutcome::Done(()));
                    count -= 1;
                    states[i] = Worker::Suspended;
                    k.thread_suspend(workers[i]).unwrap();
                } else {
                    assert_eq!(outcome, WaitOutcome::Pending);
                    states[i] = Worker::Waiting;
                    queue.push_back(i);
                }
            }
            0 | 1 => {}
            // Someone gives a unit
            2 => {
                log::trace!("give (from an interrupt handler = {})", op & 4 != 0);
                if op & 4 != 0 {
                    sim.irq(|k| k.semaphore_give(sem)).unwrap().unwrap();
                } else {
                    k.semaphore_give(sem).unwrap();
                }
                match queue.pop_front() {
                    Some(w) => expected.push_back((w, Ok(0))),
                    None => count = (count + 1).min(LIMIT),
                }
            }
            // The controller resets the semaphore
            _ => {
                log::trace!("reset");
                k.semaphore_reset(sem).unwrap();
                count = 0;
                expected.extend(queue.drain(..).map(|w| (w, Err(WaitError::Cancelled))));
            }
        }

        drain_workers(&sim, controller, &workers, &mut states, &mut expected);

        assert_eq!(k.semaphore_count(sem), Ok(count));
        let num_waiting = workers
            .iter()
            .filter(|&&w| k.thread_state(w) == Ok(ThreadState::Waiting))
            .count();
        assert_eq!(num_waiting, queue.len());
        assert!(count == 0 || num_waiting == 0, "count > 0 with waiters");
    }
}
