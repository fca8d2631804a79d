use exec_ctx::{BarrierState, ForkBarrier};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

#[test]
fn test_enter_waits_for_allow() {
    let barrier = Arc::new(ForkBarrier::new());
    barrier.enter();
    assert!(barrier.block_if_single_active());

    let entered = Arc::new(AtomicBool::new(false));
    let waiter = {
        let barrier = barrier.clone();
        let entered = entered.clone();
        thread::spawn(move || {
            barrier.enter();
            entered.store(true, Ordering::SeqCst);
            barrier.exit();
        })
    };

    thread::sleep(Duration::from_millis(100));
    assert!(
        !entered.load(Ordering::SeqCst),
        "Enter should not complete while the barrier is blocked"
    );

    barrier.exit();
    barrier.allow();
    waiter.join().unwrap();

    assert!(entered.load(Ordering::SeqCst), "Enter should complete after allow");
    assert_eq!(barrier.state(), BarrierState::Open { active: 0 });
}

#[test]
fn test_many_waiters_are_released_together() {
    let barrier = Arc::new(ForkBarrier::new());
    barrier.enter();
    assert!(barrier.block_if_single_active());

    let entered = Arc::new(AtomicUsize::new(0));
    let waiters: Vec<_> = (0..8)
        .map(|_| {
            let barrier = barrier.clone();
            let entered = entered.clone();
            thread::spawn(move || {
                barrier.enter();
                entered.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();

    thread::sleep(Duration::from_millis(50));
    assert_eq!(entered.load(Ordering::SeqCst), 0);

    barrier.allow();
    for waiter in waiters {
        waiter.join().unwrap();
    }

    assert_eq!(entered.load(Ordering::SeqCst), 8);
    // The forking thread's context is still counted alongside the waiters.
    assert_eq!(barrier.state(), BarrierState::Open { active: 9 });
}

#[test]
fn test_block_never_succeeds_with_two_active() {
    const WORKERS: usize = 4;
    const ROUNDS: usize = 2_000;

    let barrier = Arc::new(ForkBarrier::new());
    let alive = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicUsize::new(0));

    let workers: Vec<_> = (0..WORKERS)
        .map(|_| {
            let barrier = barrier.clone();
            let alive = alive.clone();
            let finished = finished.clone();
            thread::spawn(move || {
                for _ in 0..ROUNDS {
                    barrier.enter();
                    alive.fetch_add(1, Ordering::SeqCst);
                    thread::yield_now();
                    alive.fetch_sub(1, Ordering::SeqCst);
                    barrier.exit();
                }
                finished.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();

    while finished.load(Ordering::SeqCst) < WORKERS {
        barrier.enter();

        if barrier.block_if_single_active() {
            assert_eq!(
                alive.load(Ordering::SeqCst),
                0,
                "Block succeeded while another context was alive"
            );

            for _ in 0..50 {
                thread::yield_now();
                assert_eq!(
                    alive.load(Ordering::SeqCst),
                    0,
                    "A context entered while the barrier was blocked"
                );
            }

            barrier.exit();
            barrier.allow();
        } else {
            barrier.exit();
        }
    }

    for worker in workers {
        worker.join().unwrap();
    }

    // Once everyone is gone, the coordinator alone can always block.
    barrier.enter();
    assert!(barrier.block_if_single_active());
    barrier.exit();
    barrier.allow();

    assert_eq!(barrier.state(), BarrierState::Open { active: 0 });
}
