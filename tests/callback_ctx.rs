use exec_ctx::ApplicationCallbackCtx;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn recorder() -> (Rc<RefCell<Vec<(u32, bool)>>>, impl Fn(u32) -> Box<dyn FnOnce(bool)>) {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let log = seen.clone();
    let make = move |tag: u32| -> Box<dyn FnOnce(bool)> {
        let log = log.clone();
        Box::new(move |ok| log.borrow_mut().push((tag, ok)))
    };
    (seen, make)
}

#[test]
fn test_callbacks_run_in_order_when_outermost_ends() {
    let (seen, make) = recorder();

    let ctx = ApplicationCallbackCtx::new();
    assert!(ctx.is_installed());
    assert!(ApplicationCallbackCtx::available());

    ApplicationCallbackCtx::enqueue(make(1), true);
    ApplicationCallbackCtx::enqueue(make(2), false);
    ApplicationCallbackCtx::enqueue(make(3), true);
    assert!(seen.borrow().is_empty(), "Callbacks should wait for the context to end");

    drop(ctx);
    assert_eq!(*seen.borrow(), vec![(1, true), (2, false), (3, true)]);
    assert!(!ApplicationCallbackCtx::available());
}

#[test]
fn test_nested_instance_is_inert() {
    let (seen, make) = recorder();

    let outer = ApplicationCallbackCtx::new();
    {
        let inner = ApplicationCallbackCtx::new();
        assert!(!inner.is_installed());

        ApplicationCallbackCtx::enqueue(make(7), true);
    }

    assert!(seen.borrow().is_empty(), "Nested drop must not run callbacks");
    assert!(ApplicationCallbackCtx::available());

    drop(outer);
    assert_eq!(*seen.borrow(), vec![(7, true)]);
}

#[test]
fn test_callbacks_may_enqueue_more_callbacks() {
    let (seen, make) = recorder();
    let make = Rc::new(make);

    let ctx = ApplicationCallbackCtx::new();
    let again = make.clone();
    ApplicationCallbackCtx::enqueue(
        move |ok| {
            again(1)(ok);
            ApplicationCallbackCtx::enqueue(again(2), !ok);
        },
        true,
    );

    drop(ctx);
    assert_eq!(*seen.borrow(), vec![(1, true), (2, false)]);
}

#[test]
fn test_enqueue_without_context_runs_immediately() {
    let (seen, make) = recorder();
    assert!(!ApplicationCallbackCtx::available());

    ApplicationCallbackCtx::enqueue(make(9), false);

    assert_eq!(*seen.borrow(), vec![(9, false)]);
    assert!(!ApplicationCallbackCtx::available());
}

#[test]
fn test_internal_context_collects_callbacks() {
    let (seen, make) = recorder();

    let ctx = ApplicationCallbackCtx::internal();
    assert!(ctx.is_installed());
    ApplicationCallbackCtx::enqueue(make(4), true);

    drop(ctx);
    assert_eq!(*seen.borrow(), vec![(4, true)]);
}

static TEARDOWN_CALLBACKS: AtomicUsize = AtomicUsize::new(0);

struct CallbacksOnExit;

impl Drop for CallbacksOnExit {
    fn drop(&mut self) {
        let ctx = ApplicationCallbackCtx::new();
        ApplicationCallbackCtx::enqueue(
            |ok| {
                if ok {
                    TEARDOWN_CALLBACKS.fetch_add(1, Ordering::SeqCst);
                }
            },
            true,
        );
        drop(ctx);
    }
}

thread_local! {
    static ON_EXIT: CallbacksOnExit = const { CallbacksOnExit };
}

#[test]
fn test_callbacks_run_from_thread_local_destructor() {
    std::thread::spawn(|| {
        ON_EXIT.with(|_| ());

        let ctx = ApplicationCallbackCtx::new();
        drop(ctx);
    })
    .join()
    .unwrap();

    assert_eq!(TEARDOWN_CALLBACKS.load(Ordering::SeqCst), 1);
}
