//! Sleep: the only timer primitive.
//!
//! `sleep` is an action that installs a runtime timer resolving it at the
//! deadline and registers a cleanup entry clearing the timer. Every other
//! timeout in the crate is expressed as a race against a sleep — there is
//! no separate timeout machinery.

use crate::op::{action, current_scope, ensure, suspend, Operation, Resolver};
use crate::runtime::Scope;
use std::time::Duration;

/// Completes after `duration` has elapsed on the runtime clock.
///
/// # Cancel safety
///
/// Halting a sleeping frame clears the timer during teardown; a settled
/// race leaves no timers behind for its losing branches.
#[must_use]
pub fn sleep(duration: Duration) -> Operation<()> {
    current_scope().then(move |scope: Scope| {
        action(move |resolver: Resolver<()>| {
            let install_scope = scope.clone();
            let clear_scope = scope.clone();
            let resolver = resolver.clone();
            Operation::from_fn(move || {
                let resolver = resolver.clone();
                install_scope.set_timer(duration, move || resolver.resolve(()))
            })
            .then(move |timer| {
                let scope = clear_scope.clone();
                ensure(move || scope.clear_timer(timer)).then(|_| suspend())
            })
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Runtime;

    #[test]
    fn sleep_completes_at_deadline() {
        let runtime = Runtime::deterministic();
        let outcome = runtime.block_on(sleep(Duration::from_millis(25)));
        assert!(outcome.is_ok());
        assert_eq!(runtime.now().as_millis(), 25);
        assert_eq!(runtime.outstanding_timers(), 0);
    }

    #[test]
    fn sequential_sleeps_accumulate() {
        let runtime = Runtime::deterministic();
        let op = sleep(Duration::from_millis(10)).then(|()| sleep(Duration::from_millis(15)));
        let outcome = runtime.block_on(op);
        assert!(outcome.is_ok());
        assert_eq!(runtime.now().as_millis(), 25);
    }

    #[test]
    fn halted_sleep_clears_its_timer() {
        let runtime = Runtime::deterministic();
        let task = runtime.run(sleep(Duration::from_secs(3600))).unwrap();
        assert_eq!(runtime.outstanding_timers(), 1);

        runtime.halt_root();
        runtime.run_until_quiescent();
        assert!(task.outcome().is_some_and(|o| o.is_halted()));
        assert_eq!(runtime.outstanding_timers(), 0);
    }
}
