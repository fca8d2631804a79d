use exec_ctx::{ApplicationCallbackCtx, BarrierState, ExecCtx, ExecCtxFlags, Fork};
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

// Every test here shares the process-wide barrier.
static SERIAL: Mutex<()> = Mutex::new(());

fn enabled() -> MutexGuard<'static, ()> {
    let guard = SERIAL.lock();
    Fork::enable(true);
    guard
}

fn active() -> usize {
    match Fork::barrier().state() {
        BarrierState::Open { active } => active,
        BarrierState::Blocked { .. } => panic!("barrier left blocked"),
    }
}

#[test]
fn test_contexts_are_counted_while_alive() {
    let _serial = enabled();
    let base = active();

    let outer = ExecCtx::new();
    let inner = ExecCtx::new();
    assert_eq!(active(), base + 2);

    drop(inner);
    drop(outer);
    assert_eq!(active(), base);
}

#[test]
fn test_internal_thread_contexts_are_not_counted() {
    let _serial = enabled();
    let base = active();

    let ctx = ExecCtx::with_flags(ExecCtxFlags::IS_INTERNAL_THREAD);
    assert_eq!(active(), base);

    drop(ctx);
    assert_eq!(active(), base);
}

#[test]
fn test_block_exec_ctx_requires_single_context() {
    let _serial = enabled();

    let ctx = ExecCtx::new();
    let other = ExecCtx::new();
    assert!(!Fork::block_exec_ctx(), "Two contexts should prevent blocking");
    drop(other);

    assert!(Fork::block_exec_ctx());
    assert_eq!(Fork::barrier().state(), BarrierState::Blocked { draining: 1 });

    // Internal threads keep running through a fork.
    let internal = thread::spawn(|| {
        let _ctx = ExecCtx::with_flags(ExecCtxFlags::IS_INTERNAL_THREAD);
        true
    });
    assert!(internal.join().unwrap());

    drop(ctx);
    Fork::allow_exec_ctx();
    assert_eq!(active(), 0);
}

#[test]
fn test_new_contexts_wait_for_fork() {
    let _serial = enabled();

    let ctx = ExecCtx::new();
    assert!(Fork::block_exec_ctx());

    let created = Arc::new(AtomicBool::new(false));
    let waiter = {
        let created = created.clone();
        thread::spawn(move || {
            let _ctx = ExecCtx::new();
            created.store(true, Ordering::SeqCst);
        })
    };

    thread::sleep(Duration::from_millis(100));
    assert!(
        !created.load(Ordering::SeqCst),
        "Context creation should wait while blocked"
    );

    drop(ctx);
    Fork::allow_exec_ctx();
    waiter.join().unwrap();

    assert!(created.load(Ordering::SeqCst));
    assert_eq!(active(), 0);
}

#[test]
fn test_coordinator_never_blocks_over_live_contexts() {
    let _serial = enabled();

    const WORKERS: usize = 4;
    let alive = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicUsize::new(0));

    let workers: Vec<_> = (0..WORKERS)
        .map(|_| {
            let alive = alive.clone();
            let finished = finished.clone();
            thread::spawn(move || {
                for _ in 0..1_000 {
                    let ctx = ExecCtx::new();
                    alive.fetch_add(1, Ordering::SeqCst);
                    ctx.enqueue(thread::yield_now);
                    alive.fetch_sub(1, Ordering::SeqCst);
                    drop(ctx);
                }
                finished.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();

    while finished.load(Ordering::SeqCst) < WORKERS {
        let ctx = ExecCtx::new();
        let blocked = Fork::block_exec_ctx();
        if blocked {
            assert_eq!(alive.load(Ordering::SeqCst), 0);
        }

        drop(ctx);
        if blocked {
            assert_eq!(alive.load(Ordering::SeqCst), 0);
            Fork::allow_exec_ctx();
        }
    }

    for worker in workers {
        worker.join().unwrap();
    }
    assert_eq!(active(), 0);
}

#[test]
fn test_callback_ctx_registers_once_per_thread() {
    let _serial = enabled();
    let base = active();

    let outer = ApplicationCallbackCtx::new();
    let inner = ApplicationCallbackCtx::new();
    assert_eq!(active(), base + 1, "Only the outermost instance registers");

    drop(inner);
    drop(outer);
    assert_eq!(active(), base);
}

#[test]
fn test_thread_accounting() {
    let _serial = enabled();
    let release = Arc::new(AtomicBool::new(false));

    let threads: Vec<_> = (0..3)
        .map(|_| {
            Fork::inc_thread_count();
            let release = release.clone();
            thread::spawn(move || {
                while !release.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(1));
                }
                Fork::dec_thread_count();
            })
        })
        .collect();

    assert_eq!(Fork::thread_count(), 3);
    release.store(true, Ordering::SeqCst);
    Fork::await_threads();

    assert_eq!(Fork::thread_count(), 0);
    for thread in threads {
        thread.join().unwrap();
    }
}

static HOOK_RUNS: AtomicUsize = AtomicUsize::new(0);

fn reset_polling_engine() {
    HOOK_RUNS.fetch_add(1, Ordering::SeqCst);
}

#[test]
fn test_postfork_child_reopens_barrier_and_runs_hook() {
    let _serial = enabled();
    Fork::set_reset_child_polling_engine_func(reset_polling_engine);
    assert!(Fork::reset_child_polling_engine_func().is_some());

    let ctx = ExecCtx::new();
    assert!(Fork::block_exec_ctx());
    drop(ctx);

    // What the child handler does after fork().
    Fork::postfork_child();

    assert_eq!(HOOK_RUNS.load(Ordering::SeqCst), 1);
    assert_eq!(active(), 0);

    // Open barrier: running the child path again only reruns the hook.
    Fork::postfork_child();
    assert_eq!(HOOK_RUNS.load(Ordering::SeqCst), 2);
    assert_eq!(active(), 0);
}
