//! Host interop: tasks as futures, halt sentinels, scope injection, and
//! the process entry point.

mod common;

use operon::test_utils::test_runtime;
use operon::{
    current_scope, ensure, main, sleep, spawn, suspend, Error, ErrorKind, Operation, Scope,
};
use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};
use std::time::Duration;

struct NoopWake;

impl Wake for NoopWake {
    fn wake(self: Arc<Self>) {}
}

fn poll_once<F: Future + Unpin>(future: &mut F) -> Poll<F::Output> {
    let waker = Waker::from(Arc::new(NoopWake));
    let mut cx = Context::from_waker(&waker);
    Pin::new(future).poll(&mut cx)
}

// =========================================================================
// Task as a host future
// =========================================================================

#[test]
fn task_future_resolves_only_after_teardown() {
    common::init_test_logging();
    let runtime = test_runtime();
    let cleaned = Rc::new(RefCell::new(false));

    let flag = Rc::clone(&cleaned);
    let op = Operation::from_fn(move || Rc::clone(&flag))
        .then(|flag| ensure(move || *flag.borrow_mut() = true))
        .then(|()| sleep(Duration::from_millis(5)))
        .map(|()| 42);

    let mut task = runtime.run(op).expect("root scope open");
    assert!(poll_once(&mut task).is_pending());

    runtime.run_until_quiescent();
    match poll_once(&mut task) {
        Poll::Ready(Ok(v)) => assert_eq!(v, 42),
        other => panic!("expected ready value, got {other:?}"),
    }
    assert!(*cleaned.borrow(), "cleanup completed before resolution");
}

#[test]
fn halted_task_future_rejects_with_the_halt_sentinel() {
    common::init_test_logging();
    let runtime = test_runtime();

    let mut task = runtime.run(suspend()).expect("root scope open");
    runtime.halt_root();
    runtime.run_until_quiescent();

    match poll_once(&mut task) {
        Poll::Ready(Err(e)) => {
            assert!(e.is_halt());
            assert_eq!(e.kind(), ErrorKind::Halted);
        }
        other => panic!("expected halt rejection, got {other:?}"),
    }
}

// =========================================================================
// Scope injection
// =========================================================================

#[test]
fn injecting_into_a_terminated_scope_fails() {
    common::init_test_logging();
    let runtime = test_runtime();
    let escaped: Rc<RefCell<Option<Scope>>> = Rc::new(RefCell::new(None));

    let slot = Rc::clone(&escaped);
    let op = current_scope().map(move |scope| {
        slot.borrow_mut().replace(scope);
    });
    assert!(runtime.block_on(op).is_ok());

    let scope = escaped.borrow().clone().expect("scope captured");
    assert!(scope.is_closed());
    let err = scope
        .run(Operation::value(1))
        .expect_err("terminated scope rejects injection");
    assert_eq!(err.kind(), ErrorKind::ScopeClosed);
}

#[test]
fn injected_work_is_owned_by_the_scope() {
    common::init_test_logging();
    let runtime = test_runtime();
    let cleaned = Rc::new(RefCell::new(false));

    // Inject a parked frame from "host" code mid-operation; the enclosing
    // frame's teardown must halt it and run its cleanup.
    let flag = Rc::clone(&cleaned);
    let op = current_scope().then(move |scope| {
        let flag = Rc::clone(&flag);
        Operation::try_from_fn(move || {
            let flag = Rc::clone(&flag);
            scope.run(
                Operation::from_fn(move || Rc::clone(&flag))
                    .then(|flag| ensure(move || *flag.borrow_mut() = true))
                    .then(|()| suspend()),
            )
        })
        .map(|_task| ())
    });

    let outcome = runtime.block_on(op);
    assert!(outcome.is_ok());
    assert!(*cleaned.borrow(), "injected frame was halted with its scope");
}

// =========================================================================
// Root failure promotion through nested spawns
// =========================================================================

#[test]
fn deeply_nested_background_failure_reaches_the_root() {
    common::init_test_logging();
    let runtime = test_runtime();

    let inner_failure = sleep(Duration::from_millis(2))
        .then(|()| Operation::<()>::fail(Error::user("deep boom")));
    let middle = spawn(inner_failure).then(|_| suspend());
    let outer = spawn(middle).then(|_| suspend());

    let outcome: operon::Outcome<()> = runtime.block_on(outer);
    assert_eq!(outcome.unwrap_err().context(), Some("deep boom"));
    assert!(runtime.is_quiescent());
}

// =========================================================================
// Process entry point
// =========================================================================

#[test]
fn main_returns_the_outcome_of_the_body() {
    common::init_test_logging();
    let outcome = main(Operation::value("ran"));
    assert_eq!(outcome.unwrap(), "ran");

    let outcome = main(Operation::<i32>::fail(Error::user("reported")));
    assert_eq!(outcome.unwrap_err().context(), Some("reported"));
}
