//! Call: the error boundary.
//!
//! Background failures — spawns and resources crashing — normally promote
//! through the scope tree, tearing the enclosing frame down without ever
//! being catchable. `call` fences that: the wrapped operation runs in its
//! own foreground frame, so anything that crashes it surfaces as an
//! ordinary failure at the call site, where `or_else` can see it.

use crate::op::{action, Operation, Resolver};

/// Runs `op` in an intermediate frame, converting background failures
/// inside it into a foreground failure at this yield site.
///
/// For operations without background children, `call(op)` behaves exactly
/// like `op`, except that children started inside it are torn down before
/// the result is delivered.
pub fn call<T: 'static>(op: Operation<T>) -> Operation<T> {
    action(move |resolver: Resolver<T>| {
        let resolver = resolver.clone();
        op.clone().then(move |value| {
            resolver.resolve(value);
            Operation::value(())
        })
    })
}
