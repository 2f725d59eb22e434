//! All: run operations concurrently, collect every result in order.

use crate::combinator::call;
use crate::op::{spawn, Operation};
use crate::runtime::Task;

/// Runs all of `ops` concurrently and resolves with their results in
/// input order once every one has succeeded.
///
/// The first failure settles the combinator: remaining contestants are
/// halted in reverse start order and the error surfaces, catchable, at
/// this yield site. An empty input resolves immediately with an empty
/// vector.
pub fn all<T: Clone + 'static>(ops: Vec<Operation<T>>) -> Operation<Vec<T>> {
    let mut spawned: Operation<Vec<Task<T>>> = Operation::value(Vec::new());
    for op in ops {
        spawned = spawned.then(move |tasks| {
            spawn(op.clone()).map(move |task| {
                let mut tasks = tasks.clone();
                tasks.push(task);
                tasks
            })
        });
    }
    call(spawned.then(|tasks| join_in_order(tasks, Vec::new())))
}

/// Awaits tasks front-to-back, accumulating results.
fn join_in_order<T: Clone + 'static>(
    mut remaining: Vec<Task<T>>,
    collected: Vec<T>,
) -> Operation<Vec<T>> {
    if remaining.is_empty() {
        return Operation::value(collected);
    }
    let task = remaining.remove(0);
    task.join().then(move |value| {
        let mut collected = collected.clone();
        collected.push(value);
        join_in_order(remaining.clone(), collected.clone())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::op::ensure;
    use crate::runtime::Runtime;
    use crate::time::sleep;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;

    #[test]
    fn collects_results_in_input_order() {
        let runtime = Runtime::deterministic();
        // The slowest finishes last but still lands first in the output.
        let op = all(vec![
            sleep(Duration::from_millis(30)).map(|()| 1),
            sleep(Duration::from_millis(10)).map(|()| 2),
            sleep(Duration::from_millis(20)).map(|()| 3),
        ]);
        let outcome = runtime.block_on(op);
        assert_eq!(outcome.unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn empty_input_resolves_immediately() {
        let runtime = Runtime::deterministic();
        let outcome = runtime.block_on(all(Vec::<Operation<i32>>::new()));
        assert_eq!(outcome.unwrap(), Vec::<i32>::new());
    }

    #[test]
    fn first_failure_propagates_and_halts_siblings() {
        let runtime = Runtime::deterministic();
        let cleaned = Rc::new(RefCell::new(false));

        let flag = Rc::clone(&cleaned);
        let slow = Operation::from_fn(move || Rc::clone(&flag))
            .then(|flag| ensure(move || *flag.borrow_mut() = true))
            .then(|()| sleep(Duration::from_secs(60)))
            .map(|()| 1);
        let failing =
            sleep(Duration::from_millis(5)).then(|()| Operation::<i32>::fail(Error::user("boom")));

        let outcome = runtime.block_on(all(vec![slow, failing]));
        assert_eq!(outcome.unwrap_err().context(), Some("boom"));
        assert!(*cleaned.borrow(), "halted sibling ran its cleanup");
        assert_eq!(runtime.outstanding_timers(), 0);
    }

    #[test]
    fn failure_is_catchable_at_the_all_site() {
        let runtime = Runtime::deterministic();
        let op = all(vec![
            Operation::<i32>::fail(Error::user("boom")),
            Operation::value(1),
        ])
        .or_else(|e| Operation::value(vec![i32::from(e.context() == Some("boom"))]));
        let outcome = runtime.block_on(op);
        assert_eq!(outcome.unwrap(), vec![1]);
    }
}
