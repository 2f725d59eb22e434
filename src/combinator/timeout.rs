//! Timeout: a race against a sleep.

use crate::combinator::race;
use crate::error::Error;
use crate::op::Operation;
use crate::time::sleep;
use std::time::Duration;

/// Runs `op` with a deadline.
///
/// If the deadline elapses first, `op` is halted (its cleanup runs) and
/// the combinator fails with [`ErrorKind::Timeout`]. There is no other
/// timeout machinery: this is literally a [`race`] against [`sleep`].
///
/// [`ErrorKind::Timeout`]: crate::error::ErrorKind::Timeout
pub fn with_timeout<T: Clone + 'static>(op: Operation<T>, duration: Duration) -> Operation<T> {
    let deadline = sleep(duration).then(move |()| {
        Operation::fail(Error::timeout().with_context(format!("no completion within {duration:?}")))
    });
    race(vec![op, deadline])
}
