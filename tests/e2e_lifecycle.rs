//! End-to-end lifecycle scenarios: races that leak nothing, background
//! failures that promote, resources that live exactly as long as their
//! scope, and nested action escapes that unwind innermost-first.

mod common;

use operon::test_utils::test_runtime;
use operon::{
    action, current_scope, ensure, race, resource, sleep, spawn, suspend, Error, Operation,
    Provider, Resolver, Scope, Task,
};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

type Log = Rc<RefCell<Vec<&'static str>>>;

fn new_log() -> Log {
    Rc::new(RefCell::new(Vec::new()))
}

fn log_entry(log: &Log, entry: &'static str) -> Operation<()> {
    let log = Rc::clone(log);
    Operation::from_fn(move || log.borrow_mut().push(entry))
}

// =========================================================================
// Race settles promptly and leaks no timers
// =========================================================================

#[test]
fn race_settles_promptly_without_leaking_timers() {
    common::init_test_logging();
    let runtime = test_runtime();

    let op = race(vec![
        sleep(Duration::from_millis(10)),
        sleep(Duration::from_millis(1000)),
    ]);
    let outcome = runtime.block_on(op);

    assert!(outcome.is_ok());
    // The race settles at the short deadline, not the long one.
    assert_eq!(runtime.now().as_millis(), 10);
    // The losing branch's timer was cleared when it was halted.
    assert_eq!(runtime.outstanding_timers(), 0);
    assert!(runtime.is_quiescent());
}

// =========================================================================
// Dangling spawn: a background failure settles the root
// =========================================================================

#[test]
fn background_failure_halts_siblings_and_settles_root_with_error() {
    common::init_test_logging();
    let runtime = test_runtime();
    let log = new_log();
    let forever_task: Rc<RefCell<Option<Task<()>>>> = Rc::new(RefCell::new(None));

    let forever = log_entry(&log, "forever started")
        .then({
            let log = Rc::clone(&log);
            move |()| {
                let log = Rc::clone(&log);
                ensure(move || log.borrow_mut().push("forever cleaned"))
            }
        })
        .then(|()| suspend());

    let failing =
        sleep(Duration::from_millis(10)).then(|()| Operation::<()>::fail(Error::user("boom")));

    let slot = Rc::clone(&forever_task);
    let root = spawn(forever)
        .then(move |task| {
            slot.borrow_mut().replace(task);
            spawn(failing.clone())
        })
        .then(|_| suspend());

    let root_task = runtime.run(root).expect("root scope open");
    runtime.run_until_quiescent();

    let root_outcome = root_task.outcome().expect("root settled");
    assert_eq!(root_outcome.unwrap_err().context(), Some("boom"));

    let forever_outcome = forever_task
        .borrow()
        .as_ref()
        .expect("task handle captured")
        .outcome()
        .expect("forever settled");
    assert!(forever_outcome.is_halted(), "sibling reports halt, not error");
    assert_eq!(&*log.borrow(), &["forever started", "forever cleaned"]);
}

// =========================================================================
// Resource lifetime: +1 on first use, -1 at scope termination
// =========================================================================

fn counted_resource(counter: &Rc<Cell<i32>>) -> Operation<()> {
    let counter = Rc::clone(counter);
    resource(move |provider: Provider<()>| {
        let up = Rc::clone(&counter);
        let down = Rc::clone(&counter);
        Operation::from_fn(move || up.set(up.get() + 1))
            .then(move |()| {
                let down = Rc::clone(&down);
                ensure(move || down.set(down.get() - 1))
            })
            .then(move |()| provider.provide(()))
    })
}

fn inject_users(scope: Scope, counter: Rc<Cell<i32>>, saw_bad: Rc<Cell<bool>>, n: u32) -> Operation<()> {
    if n == 0 {
        return Operation::value(());
    }
    let check_counter = Rc::clone(&counter);
    let check_bad = Rc::clone(&saw_bad);
    let user = Operation::from_fn(move || {
        if check_counter.get() != 1 {
            check_bad.set(true);
        }
    });
    let run_scope = scope.clone();
    Operation::try_from_fn(move || run_scope.run(user.clone()))
        .then(|task| task.join())
        .then(move |()| inject_users(scope.clone(), Rc::clone(&counter), Rc::clone(&saw_bad), n - 1))
}

#[test]
fn resource_lives_for_the_scope_and_releases_exactly_once() {
    common::init_test_logging();
    let runtime = test_runtime();
    let counter = Rc::new(Cell::new(0));
    let saw_bad = Rc::new(Cell::new(false));

    let acquire = counted_resource(&counter);
    let injections = {
        let counter = Rc::clone(&counter);
        let saw_bad = Rc::clone(&saw_bad);
        acquire
            .then(|()| current_scope())
            .then(move |scope| {
                inject_users(scope, Rc::clone(&counter), Rc::clone(&saw_bad), 100)
            })
    };

    let outcome = runtime.block_on(injections);
    assert!(outcome.is_ok());
    assert!(!saw_bad.get(), "resource was live for every injected user");
    assert_eq!(counter.get(), 0, "released exactly once at scope end");
}

// =========================================================================
// Action escape: nested resolutions unwind innermost-first
// =========================================================================

#[test]
fn nested_action_escape_unwinds_innermost_first() {
    common::init_test_logging();
    let runtime = test_runtime();
    let log = new_log();

    let op = {
        let log = Rc::clone(&log);
        action(move |outer: Resolver<i32>| {
            let log = Rc::clone(&log);
            let outer = outer.clone();
            let outer_cleanup = {
                let log = Rc::clone(&log);
                ensure(move || log.borrow_mut().push("outer body cleaned"))
            };
            outer_cleanup
                .then(move |()| {
                    let log = Rc::clone(&log);
                    let outer = outer.clone();
                    action(move |_middle: Resolver<i32>| {
                        let log = Rc::clone(&log);
                        let outer = outer.clone();
                        let middle_cleanup = {
                            let log = Rc::clone(&log);
                            ensure(move || log.borrow_mut().push("middle body cleaned"))
                        };
                        middle_cleanup
                            .then(move |()| {
                                let log = Rc::clone(&log);
                                let outer = outer.clone();
                                action(move |_inner: Resolver<i32>| {
                                    let log = Rc::clone(&log);
                                    let outer = outer.clone();
                                    let inner_cleanup = {
                                        let log = Rc::clone(&log);
                                        ensure(move || log.borrow_mut().push("inner body cleaned"))
                                    };
                                    inner_cleanup
                                        .then(move |()| {
                                            let outer = outer.clone();
                                            Operation::from_fn(move || outer.resolve(42))
                                        })
                                        .then(|()| suspend())
                                })
                            })
                            .then(|_: i32| suspend())
                    })
                })
                .then(|_: i32| suspend())
        })
    };

    let observed = {
        let log = Rc::clone(&log);
        op.map(move |value| {
            log.borrow_mut().push("outer waiter resumed");
            value
        })
    };

    let outcome = runtime.block_on(observed);
    assert_eq!(outcome.unwrap(), 42);
    assert_eq!(
        &*log.borrow(),
        &[
            "inner body cleaned",
            "middle body cleaned",
            "outer body cleaned",
            "outer waiter resumed",
        ]
    );
}

// =========================================================================
// Resource setup failure surfaces at the yield site
// =========================================================================

#[test]
fn resource_setup_failure_is_a_foreground_error() {
    common::init_test_logging();
    let runtime = test_runtime();

    let broken: Operation<()> = resource(|_provider: Provider<()>| {
        Operation::fail(Error::user("setup failed"))
    });
    let op = broken.or_else(|e| {
        if e.context() == Some("setup failed") {
            Operation::value(())
        } else {
            Operation::fail(Error::user("unexpected failure"))
        }
    });
    assert!(runtime.block_on(op).is_ok());
}
