//! Race: first completion wins, losers are drained.
//!
//! Every contestant runs as a background child of the race's body frame.
//! Whichever finishes first — with a value or a failure — settles the
//! race; the body frame is then torn down, which halts every other
//! contestant in reverse start order and waits for each one's cleanup
//! before the winner's outcome is delivered. Losers are never abandoned:
//! resources they hold are released before the race returns.

use crate::op::{action, spawn, suspend, Operation, Resolver};

/// Runs all of `ops` concurrently; the first to complete decides the
/// outcome and the rest are halted.
///
/// A contestant failure wins the race as a failure. An empty race never
/// completes: it parks until the enclosing scope ends.
pub fn race<T: Clone + 'static>(ops: Vec<Operation<T>>) -> Operation<T> {
    action(move |resolver: Resolver<T>| {
        let mut body = Operation::value(());
        for op in ops.clone() {
            let resolver = resolver.clone();
            let contestant = op.then(move |value| {
                resolver.resolve(value);
                Operation::value(())
            });
            body = body.then(move |()| spawn(contestant.clone()).map(|_task| ()));
        }
        body.then(|()| suspend())
    })
}
