//! The coroutine protocol that operation bodies implement.
//!
//! An operation body is an explicit state machine: the evaluator feeds it
//! an [`Input`] and it answers with a [`Step`] — either an [`Instruction`]
//! for the evaluator to interpret, or a final value. This is the entire
//! ABI between user code and the evaluator; everything else in the crate
//! (adapters, primitives, combinators, channels) is built out of small
//! `Coro` implementations.
//!
//! # Protocol
//!
//! - The first input to a fresh coroutine is `Input::Resume(())` (boxed).
//! - After `Step::Yield`, the next input carries the instruction's result:
//!   `Resume` with a value, or `Fail` with an error raised at the yield
//!   point (which the coroutine may handle or propagate by returning it).
//! - `Input::Halt` asks the coroutine to unwind: it must run any cleanup
//!   program points (it may keep yielding instructions for that) and then
//!   finish. A coroutine receives `Halt` at most once and must not treat
//!   it as recoverable.
//!
//! Values crossing the protocol are type-erased; the typed
//! [`Operation`](crate::op::Operation) layer downcasts at the boundary.

use crate::error::{Error, Result};
use crate::op::instruction::Instruction;
use std::any::Any;
use std::rc::Rc;

/// A type-erased value crossing the coroutine protocol.
pub type Value = Box<dyn Any>;

/// What the evaluator feeds into a coroutine step.
pub enum Input {
    /// Deliver a value: the result of the previous instruction, or the
    /// start signal (a boxed unit) for a fresh coroutine.
    Resume(Value),
    /// Raise an error at the current yield point.
    Fail(Error),
    /// Unwind: run cleanup and finish. Delivered at most once.
    Halt,
}

/// What a coroutine step produces.
pub enum Step {
    /// An instruction for the evaluator to interpret.
    Yield(Instruction),
    /// The coroutine finished with a value.
    ///
    /// On the halt path the value is ignored; by convention coroutines
    /// finish with a boxed unit there.
    Done(Value),
}

/// A resumable operation body.
///
/// Implementations are single-use: a fresh coroutine is produced for every
/// run of an [`Operation`](crate::op::Operation).
pub trait Coro {
    /// Advances the coroutine by one program point.
    ///
    /// Returning `Err` fails the coroutine; the error propagates to the
    /// delegating coroutine below it, or settles the frame if there is
    /// none.
    fn step(&mut self, input: Input) -> Result<Step>;
}

/// A boxed coroutine, as stored on a frame's delegation stack.
pub type BoxCoro = Box<dyn Coro>;

/// Produces the boxed unit value used for start and halt completions.
#[must_use]
pub fn unit() -> Value {
    Box::new(())
}

/// Downcasts an erased value to a concrete type.
///
/// A mismatch is a wiring bug between a coroutine and its typed wrapper,
/// reported as an internal error rather than a panic.
pub fn downcast<T: 'static>(value: Value) -> Result<T> {
    value
        .downcast::<T>()
        .map(|boxed| *boxed)
        .map_err(|_| Error::internal("operation value had an unexpected type"))
}

/// A settled value shared between several observers of one frame.
///
/// Task joins receive the frame's result through this wrapper so that
/// multiple waiters can each take a clone.
#[derive(Clone)]
pub(crate) struct SharedValue(pub(crate) Rc<dyn Any>);

/// Downcasts a shared settled value, cloning out the concrete result.
pub(crate) fn downcast_shared<T: Clone + 'static>(value: Value) -> Result<T> {
    let shared = downcast::<SharedValue>(value)?;
    shared
        .0
        .downcast_ref::<T>()
        .cloned()
        .ok_or_else(|| Error::internal("settled value had an unexpected type"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downcast_roundtrip() {
        let v: Value = Box::new(42_i32);
        assert_eq!(downcast::<i32>(v).unwrap(), 42);
    }

    #[test]
    fn downcast_mismatch_is_internal_error() {
        let v: Value = Box::new("not an int");
        let err = downcast::<i32>(v).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Internal);
    }

    #[test]
    fn shared_value_clones_out() {
        let shared = SharedValue(Rc::new(String::from("hi")));
        let v: Value = Box::new(shared.clone());
        assert_eq!(downcast_shared::<String>(v).unwrap(), "hi");

        let v2: Value = Box::new(shared);
        assert_eq!(downcast_shared::<String>(v2).unwrap(), "hi");
    }
}
