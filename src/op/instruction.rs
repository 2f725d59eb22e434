//! The closed instruction set interpreted by the evaluator.
//!
//! Every user-facing operation lowers to sequences of these instructions.
//! The set is closed and small: the evaluator matches exhaustively and
//! there is no open extension point — new behavior is composed out of
//! these, never added beside them.

use crate::op::coro::{BoxCoro, Value};
use crate::runtime::future::RawResolver;
use crate::runtime::Resume;

/// A callback invoked synchronously when a frame suspends, receiving the
/// handle that will resume it.
///
/// The operation body hands the [`Resume`] to the outside world (a timer,
/// a queue, a host callback); the evaluator does not pump the frame again
/// until the handle is invoked.
pub struct Install(pub Box<dyn FnOnce(Resume)>);

/// Builds the body coroutine of an `action`, given the resolver that
/// completes it.
pub struct ActionBody(pub Box<dyn FnOnce(RawResolver) -> BoxCoro>);

/// A cleanup entry on a frame's exit stack.
pub enum ExitEntry {
    /// A synchronous cleanup thunk.
    Sync(Box<dyn FnOnce()>),
    /// A cleanup operation driven to completion during teardown.
    Op(BoxCoro),
}

/// An instruction yielded by an operation body.
pub enum Instruction {
    /// Park the frame. The installer (if any) receives the resume handle.
    Suspend(Option<Install>),
    /// Run a body with resolve/reject callbacks in a foreground child
    /// frame; suspend until resolution; tear the body down before
    /// delivering the result.
    Action(ActionBody),
    /// Run a body expected to publish a value via [`Instruction::Provide`]
    /// in a long-lived child frame; suspend until the value arrives.
    Resource(BoxCoro),
    /// Start a background child frame under the current frame's scope and
    /// resume immediately with its task handle.
    Spawn(BoxCoro),
    /// Resume with a handle onto the current frame's scope.
    GetScope,
    /// Drive a sub-coroutine transparently; its completion resumes this
    /// one and its failure re-enters at this yield point.
    Delegate(BoxCoro),
    /// Publish a resource handle to the waiting parent and park until the
    /// enclosing scope ends. Only meaningful inside a resource body.
    Provide(Value),
    /// Push a cleanup entry onto the current frame's exit stack.
    Ensure(ExitEntry),
}
