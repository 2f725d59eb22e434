//! End-to-end channel, subscription, and signal behavior.

mod common;

use operon::test_utils::test_runtime;
use operon::{
    create_channel, create_channel_with_capacity, create_signal, spawn, Next, Operation, Signal,
};
use std::cell::RefCell;
use std::rc::Rc;

/// Drains `count` reads from a subscription into a vector.
fn take_next<T: Clone + 'static, C: Clone + 'static>(
    sub: &operon::channel::Subscription<T, C>,
    count: usize,
) -> Operation<Vec<Next<T, C>>> {
    fn go<T: Clone + 'static, C: Clone + 'static>(
        sub: operon::channel::Subscription<T, C>,
        collected: Vec<Next<T, C>>,
        remaining: usize,
    ) -> Operation<Vec<Next<T, C>>> {
        if remaining == 0 {
            return Operation::value(collected);
        }
        sub.next().then(move |next| {
            let mut collected = collected.clone();
            collected.push(next);
            go(sub.clone(), collected, remaining - 1)
        })
    }
    let sub = sub.clone();
    Operation::from_fn(move || sub.clone()).then(move |sub| go(sub, Vec::new(), count))
}

// =========================================================================
// Subscription timing: only values sent after subscribing are observed
// =========================================================================

#[test]
fn subscription_observes_only_values_sent_after_it_existed() {
    common::init_test_logging();
    let runtime = test_runtime();
    let (port, stream) = create_channel::<&str, &str>();

    let op = port
        .send("A")
        .then(move |()| stream.subscribe())
        .then(move |sub| {
            port.send("B")
                .then({
                    let port = port.clone();
                    move |()| port.send("C")
                })
                .then({
                    let port = port.clone();
                    move |()| port.close("closed")
                })
                .then(move |()| take_next(&sub, 4))
        });

    let observed = runtime.block_on(op).unwrap();
    assert_eq!(
        observed,
        vec![
            Next::Item("B"),
            Next::Item("C"),
            Next::Done("closed"),
            // The terminal value repeats forever after.
            Next::Done("closed"),
        ]
    );
}

// =========================================================================
// Fan-out: every live subscriber sees every send exactly once
// =========================================================================

#[test]
fn every_live_subscriber_observes_each_send_exactly_once() {
    common::init_test_logging();
    let runtime = test_runtime();
    let (port, stream) = create_channel::<u32, ()>();

    let op = stream
        .subscribe()
        .then({
            let stream = stream.clone();
            move |first| stream.subscribe().map(move |second| (first.clone(), second))
        })
        .then(move |(first, second)| {
            port.send(1)
                .then({
                    let port = port.clone();
                    move |()| port.send(2)
                })
                .then({
                    let port = port.clone();
                    move |()| port.close(())
                })
                .then(move |()| {
                    take_next(&first, 3).then({
                        let second = second.clone();
                        move |left| take_next(&second, 3).map(move |right| (left.clone(), right))
                    })
                })
        });

    let (left, right) = runtime.block_on(op).unwrap();
    let expected = vec![Next::Item(1), Next::Item(2), Next::Done(())];
    assert_eq!(left, expected);
    assert_eq!(right, expected);
}

// =========================================================================
// A parked consumer wakes on send
// =========================================================================

#[test]
fn parked_consumer_wakes_when_a_value_arrives() {
    common::init_test_logging();
    let runtime = test_runtime();
    let (port, stream) = create_channel::<u32, ()>();

    let op = stream.subscribe().then(move |sub| {
        // The reader parks first; the writer runs as a sibling and wakes it.
        spawn(port.send(7)).then(move |_writer| sub.next())
    });

    let next = runtime.block_on(op).unwrap();
    assert_eq!(next, Next::Item(7));
}

// =========================================================================
// Subscription teardown deregisters the queue
// =========================================================================

#[test]
fn subscription_is_deregistered_when_its_scope_ends() {
    common::init_test_logging();
    let runtime = test_runtime();
    let (port, stream) = create_channel::<u32, ()>();

    // The subscription lives inside this spawned task's frame; once the
    // task settles, sends must not pile up anywhere.
    let subscriber = stream.subscribe().map(|_sub| ());
    let op = spawn(subscriber)
        .then(|task| task.join())
        .then({
            let port = port.clone();
            move |()| port.send(1)
        })
        .then(move |()| {
            let port = port.clone();
            Operation::from_fn(move || format!("{port:?}"))
        });

    let debug = runtime.block_on(op).unwrap();
    assert!(
        debug.contains("subscribers: 0"),
        "queue deregistered at scope end: {debug}"
    );
}

// =========================================================================
// Bounded queues shed their oldest item
// =========================================================================

#[test]
fn bounded_subscriber_queue_sheds_oldest() {
    common::init_test_logging();
    let runtime = test_runtime();
    let (port, stream) = create_channel_with_capacity::<u32, ()>(2);

    let op = stream.subscribe().then(move |sub| {
        port.send(1)
            .then({
                let port = port.clone();
                move |()| port.send(2)
            })
            .then({
                let port = port.clone();
                move |()| port.send(3)
            })
            .then(move |()| take_next(&sub, 2))
    });

    let observed = runtime.block_on(op).unwrap();
    // Capacity 2: the oldest unconsumed item (1) was shed.
    assert_eq!(observed, vec![Next::Item(2), Next::Item(3)]);
}

// =========================================================================
// Signals: host callbacks into a live scope, silent after it ends
// =========================================================================

#[test]
fn signal_bridges_host_sends_and_drops_after_scope_end() {
    common::init_test_logging();
    let runtime = test_runtime();
    let escaped: Rc<RefCell<Option<Signal<u32, ()>>>> = Rc::new(RefCell::new(None));

    let slot = Rc::clone(&escaped);
    let op = create_signal::<u32, ()>().then(move |signal| {
        slot.borrow_mut().replace(signal.clone());
        signal.stream().subscribe().then(move |sub| {
            // Plain host-style calls, no operation context.
            signal.send(5);
            sub.next()
        })
    });

    let next = runtime.block_on(op).unwrap();
    assert_eq!(next, Next::Item(5));

    // The scope is gone; a late host callback is silently dropped.
    let signal = escaped.borrow().clone().expect("signal captured");
    signal.send(9);
    signal.close(());
    runtime.run_until_quiescent();
}
