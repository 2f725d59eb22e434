//! Cleanup and equivalence laws: every registered cleanup runs exactly
//! once in reverse order on every terminal path, halting is idempotent,
//! and spawn-then-join matches inline execution for values and errors.

mod common;

use operon::test_utils::{drive, test_runtime};
use operon::{assert_err, assert_ok, ensure, ensure_op, sleep, spawn, suspend, Error, Operation,
    Outcome, Task};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

type Log = Rc<RefCell<Vec<&'static str>>>;

fn new_log() -> Log {
    Rc::new(RefCell::new(Vec::new()))
}

fn push(log: &Log, entry: &'static str) -> Operation<()> {
    let log = Rc::clone(log);
    Operation::from_fn(move || log.borrow_mut().push(entry))
}

fn register(log: &Log, entry: &'static str) -> Operation<()> {
    let log = Rc::clone(log);
    ensure(move || log.borrow_mut().push(entry))
}

/// An operation registering three cleanups, then finishing as directed.
fn with_three_cleanups(log: &Log, tail: Operation<()>) -> Operation<()> {
    register(log, "first")
        .then({
            let log = Rc::clone(log);
            move |()| register(&log, "second")
        })
        .then({
            let log = Rc::clone(log);
            move |()| register(&log, "third")
        })
        .then(move |()| tail.clone())
}

// =========================================================================
// Exit stack: reverse order, exactly once, on every terminal path
// =========================================================================

#[test]
fn cleanups_run_in_reverse_order_on_return() {
    common::init_test_logging();
    let log = new_log();
    assert_ok!(drive(with_three_cleanups(&log, Operation::value(()))));
    assert_eq!(&*log.borrow(), &["third", "second", "first"]);
}

#[test]
fn cleanups_run_in_reverse_order_on_failure() {
    common::init_test_logging();
    let log = new_log();
    let err = assert_err!(drive(with_three_cleanups(
        &log,
        Operation::fail(Error::user("boom")),
    )));
    assert_eq!(err.context(), Some("boom"));
    assert_eq!(&*log.borrow(), &["third", "second", "first"]);
}

#[test]
fn cleanups_run_in_reverse_order_on_halt() {
    common::init_test_logging();
    let runtime = test_runtime();
    let log = new_log();

    let task = runtime
        .run(with_three_cleanups(&log, suspend()))
        .expect("root scope open");
    runtime.run_until_quiescent();
    assert!(task.outcome().is_none(), "parked until halted");

    runtime.halt_root();
    runtime.run_until_quiescent();
    assert!(task.outcome().expect("settled").is_halted());
    assert_eq!(&*log.borrow(), &["third", "second", "first"]);
}

#[test]
fn cleanup_operations_may_suspend() {
    common::init_test_logging();
    let runtime = test_runtime();
    let log = new_log();

    let slow_cleanup = {
        let log = Rc::clone(&log);
        sleep(Duration::from_millis(5)).then(move |()| {
            let log = Rc::clone(&log);
            Operation::from_fn(move || log.borrow_mut().push("slow cleanup done"))
        })
    };
    let op = ensure_op(slow_cleanup)
        .then({
            let log = Rc::clone(&log);
            move |()| push(&log, "body done")
        });

    let outcome = runtime.block_on(op);
    assert!(outcome.is_ok());
    assert_eq!(&*log.borrow(), &["body done", "slow cleanup done"]);
    assert_eq!(runtime.outstanding_timers(), 0);
}

#[test]
fn cleanup_errors_are_aggregated_not_fatal_to_the_sweep() {
    common::init_test_logging();
    let log = new_log();

    let op = register(&log, "outer cleanup")
        .then(|()| ensure_op(Operation::fail(Error::user("cleanup boom"))))
        .then({
            let log = Rc::clone(&log);
            move |()| register(&log, "inner cleanup")
        });

    let outcome = test_runtime().block_on(op);
    // The body succeeded; the failing cleanup becomes the cause.
    let err = outcome.unwrap_err();
    assert_eq!(err.context(), Some("cleanup boom"));
    // Both surviving cleanups still ran, in reverse order.
    assert_eq!(&*log.borrow(), &["inner cleanup", "outer cleanup"]);
}

// =========================================================================
// finally: value, failure, and halt paths
// =========================================================================

#[test]
fn finally_runs_on_value_and_failure_paths() {
    common::init_test_logging();
    let log = new_log();

    let outcome = test_runtime().block_on(
        Operation::value(7).finally(push(&log, "after value")),
    );
    assert_eq!(outcome.unwrap(), 7);

    let outcome = test_runtime().block_on(
        Operation::<i32>::fail(Error::user("boom")).finally(push(&log, "after failure")),
    );
    assert_eq!(outcome.unwrap_err().context(), Some("boom"));
    assert_eq!(&*log.borrow(), &["after value", "after failure"]);
}

#[test]
fn finally_runs_on_the_halt_path() {
    common::init_test_logging();
    let runtime = test_runtime();
    let log = new_log();

    let task = runtime
        .run(suspend().finally(push(&log, "unwound")))
        .expect("root scope open");
    runtime.halt_root();
    runtime.run_until_quiescent();

    assert!(task.outcome().expect("settled").is_halted());
    assert_eq!(&*log.borrow(), &["unwound"]);
}

// =========================================================================
// Halt idempotence
// =========================================================================

#[test]
fn double_halt_completes_once() {
    common::init_test_logging();
    let runtime = test_runtime();
    let log = new_log();

    let target = with_three_cleanups(&log, suspend());
    let op = spawn(target).then(|task: Task<()>| {
        let again = task.clone();
        task.halt()
            .then(move |()| again.halt())
            .map(move |()| task.clone())
    });

    let outcome = runtime.block_on(op);
    let task = outcome.unwrap();
    assert!(task.outcome().expect("settled").is_halted());
    // Cleanups ran exactly once despite two halts.
    assert_eq!(&*log.borrow(), &["third", "second", "first"]);
}

// =========================================================================
// spawn + join vs inline execution
// =========================================================================

#[test]
fn spawn_then_join_matches_inline_for_values() {
    common::init_test_logging();
    let op = sleep(Duration::from_millis(3)).map(|()| 21).map(|v| v * 2);

    let inline = test_runtime().block_on(op.clone());
    let spawned = test_runtime().block_on(spawn(op).then(|task| task.join()));

    assert_eq!(inline.unwrap(), 42);
    assert_eq!(spawned.unwrap(), 42);
}

#[test]
fn spawn_then_join_matches_inline_for_errors() {
    common::init_test_logging();
    let op = sleep(Duration::from_millis(3))
        .then(|()| Operation::<i32>::fail(Error::user("boom")));

    let inline = test_runtime().block_on(op.clone());
    let spawned = test_runtime().block_on(spawn(op).then(|task| task.join()));

    assert_eq!(inline.unwrap_err().context(), Some("boom"));
    assert_eq!(spawned.unwrap_err().context(), Some("boom"));
}

#[test]
fn joining_a_halted_task_halts_the_joiner() {
    common::init_test_logging();
    let runtime = test_runtime();

    // The inner task is halted; joining it afterwards tears the joining
    // frame down quietly rather than raising an error.
    let op = spawn(suspend()).then(|task: Task<()>| {
        let join_target = task.clone();
        task.halt().then(move |()| join_target.join())
    });

    let outcome: Outcome<()> = runtime.block_on(op);
    assert!(outcome.is_halted());
}

// =========================================================================
// Two runs of one operation are independent
// =========================================================================

#[test]
fn operations_are_restartable_and_independent() {
    common::init_test_logging();
    let counter = Rc::new(RefCell::new(0));
    let op = {
        let counter = Rc::clone(&counter);
        Operation::from_fn(move || {
            *counter.borrow_mut() += 1;
            *counter.borrow()
        })
    };

    let first = test_runtime().block_on(op.clone());
    let second = test_runtime().block_on(op);
    assert_eq!(first.unwrap(), 1);
    assert_eq!(second.unwrap(), 2);
}
