//! The irreducible operations: `suspend`, `action`, `resource`, `spawn`,
//! `ensure`, and `current_scope`.
//!
//! Everything else in the crate is composition over these. Each primitive
//! is a thin typed wrapper that lowers to a single instruction; the
//! interesting semantics (foreground teardown for actions, long-lived
//! bodies for resources, background attachment for spawns) live in the
//! evaluator.

use crate::error::{Error, Result};
use crate::op::coro::{downcast, unit, Coro, Input, Step, Value};
use crate::op::instruction::{ActionBody, ExitEntry, Install, Instruction};
use crate::op::Operation;
use crate::runtime::future::RawResolver;
use crate::runtime::task::{RawTask, Task};
use crate::runtime::{Resume, Scope};
use std::marker::PhantomData;
use std::rc::Rc;

/// Parks the current frame until its scope ends.
///
/// Nothing resumes a plain suspension; it exists to pivot an operation
/// from setup into teardown — cleanup registered before the suspension
/// runs when the enclosing scope unwinds.
#[must_use]
pub fn suspend() -> Operation<()> {
    Operation::from_coro(|| {
        Box::new(SuspendCoro::<()> {
            install: None,
            yielded: false,
            _marker: PhantomData,
        })
    })
}

/// Parks the current frame and hands the resume handle to `install`.
///
/// Used by the channel layer to park a consumer on a queue; the handle is
/// invoked (once) by whoever produces the awaited value.
pub(crate) fn suspend_with<T, F>(install: F) -> Operation<T>
where
    T: 'static,
    F: Fn(Resume) + 'static,
{
    let install = Rc::new(install);
    Operation::from_coro(move || {
        let install = Rc::clone(&install);
        Box::new(SuspendCoro::<T> {
            install: Some(Box::new(move |resume| install(resume))),
            yielded: false,
            _marker: PhantomData,
        })
    })
}

struct SuspendCoro<T> {
    install: Option<Box<dyn FnOnce(Resume)>>,
    yielded: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T: 'static> Coro for SuspendCoro<T> {
    fn step(&mut self, input: Input) -> Result<Step> {
        match input {
            Input::Resume(v) => {
                if self.yielded {
                    Ok(Step::Done(v))
                } else {
                    self.yielded = true;
                    let install = self.install.take().map(Install);
                    Ok(Step::Yield(Instruction::Suspend(install)))
                }
            }
            Input::Fail(e) => Err(e),
            Input::Halt => Ok(Step::Done(unit())),
        }
    }
}

/// Resolves or rejects a pending [`action`].
///
/// The handle is plain and cloneable so the body can pass it to timers,
/// host callbacks, or other operations. The first settle wins; later
/// calls are ignored.
pub struct Resolver<T> {
    raw: RawResolver,
    _marker: PhantomData<fn(T)>,
}

impl<T> Clone for Resolver<T> {
    fn clone(&self) -> Self {
        Self {
            raw: self.raw.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: 'static> Resolver<T> {
    fn from_raw(raw: RawResolver) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }

    /// Completes the action with `value`.
    ///
    /// The body frame is torn down before the waiter sees the value.
    pub fn resolve(&self, value: T) {
        self.raw.settle(Ok(Box::new(value)));
    }

    /// Fails the action with `error`, raised at the `action` yield site.
    pub fn reject(&self, error: Error) {
        self.raw.settle(Err(error));
    }
}

/// Runs `body` in a foreground child frame, exposing resolve/reject
/// callbacks to complete the operation from the outside.
///
/// The body typically performs setup, hands the [`Resolver`] somewhere,
/// and parks with [`suspend`]. Whenever resolution arrives — even while
/// the body is still running — the body frame is halted and fully torn
/// down before the value is delivered. If the body fails before
/// resolving, the action fails with that cause at its yield site.
pub fn action<T, F>(body: F) -> Operation<T>
where
    T: 'static,
    F: Fn(Resolver<T>) -> Operation<()> + 'static,
{
    let body = Rc::new(body);
    Operation::from_coro(move || {
        let body = Rc::clone(&body);
        Box::new(ActionCoro::<T> {
            body: Some(body),
            _marker: PhantomData,
        })
    })
}

struct ActionCoro<T> {
    body: Option<Rc<dyn Fn(Resolver<T>) -> Operation<()>>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: 'static> Coro for ActionCoro<T> {
    fn step(&mut self, input: Input) -> Result<Step> {
        match input {
            Input::Resume(v) => match self.body.take() {
                Some(body) => Ok(Step::Yield(Instruction::Action(ActionBody(Box::new(
                    move |raw| body(Resolver::from_raw(raw)).instantiate(),
                ))))),
                None => Ok(Step::Done(v)),
            },
            Input::Fail(e) => Err(e),
            Input::Halt => Ok(Step::Done(unit())),
        }
    }
}

/// Publishes a resource handle from inside a [`resource`] body.
pub struct Provider<T> {
    _marker: PhantomData<fn(T)>,
}

impl<T> Clone for Provider<T> {
    fn clone(&self) -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T: Clone + 'static> Provider<T> {
    /// Hands `value` to the frame waiting on the resource and parks the
    /// body until the enclosing scope ends.
    ///
    /// Code sequenced after `provide` only runs on the teardown path;
    /// cleanup belongs in [`ensure`] entries or a
    /// [`finally`](Operation::finally) wrapper around the provide.
    pub fn provide(&self, value: T) -> Operation<()> {
        Operation::from_coro(move || {
            Box::new(ProvideCoro {
                value: Some(Box::new(value.clone()) as Value),
            })
        })
    }
}

struct ProvideCoro {
    value: Option<Value>,
}

impl Coro for ProvideCoro {
    fn step(&mut self, input: Input) -> Result<Step> {
        match input {
            Input::Resume(_) => match self.value.take() {
                Some(value) => Ok(Step::Yield(Instruction::Provide(value))),
                None => Ok(Step::Done(unit())),
            },
            Input::Fail(e) => Err(e),
            Input::Halt => Ok(Step::Done(unit())),
        }
    }
}

/// Runs `body` in a child frame that outlives the `resource` call itself.
///
/// The body performs setup, publishes the handle with
/// [`Provider::provide`], and stays parked at the provide point for the
/// rest of the enclosing scope's lifetime — its cleanup runs exactly once,
/// when that scope terminates. This is the mechanism behind long-lived
/// infrastructure (connections, listeners, subscriptions) with guaranteed
/// release. A body failure before providing fails the `resource` call at
/// its yield site.
pub fn resource<T, F>(body: F) -> Operation<T>
where
    T: 'static,
    F: Fn(Provider<T>) -> Operation<()> + 'static,
{
    let body = Rc::new(body);
    Operation::from_coro(move || {
        let body = Rc::clone(&body);
        Box::new(ResourceCoro::<T> {
            body: Some(body),
            _marker: PhantomData,
        })
    })
}

struct ResourceCoro<T> {
    body: Option<Rc<dyn Fn(Provider<T>) -> Operation<()>>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: 'static> Coro for ResourceCoro<T> {
    fn step(&mut self, input: Input) -> Result<Step> {
        match input {
            Input::Resume(v) => match self.body.take() {
                Some(body) => {
                    let coro = body(Provider {
                        _marker: PhantomData,
                    })
                    .instantiate();
                    Ok(Step::Yield(Instruction::Resource(coro)))
                }
                None => Ok(Step::Done(v)),
            },
            Input::Fail(e) => Err(e),
            Input::Halt => Ok(Step::Done(unit())),
        }
    }
}

/// Starts `op` in a background frame under the current frame's scope and
/// resumes immediately with its [`Task`] handle.
///
/// The spawned frame is owned by the scope: when the current frame
/// completes, fails, or halts, the spawn is halted with it. A failure in
/// the spawned frame does not surface at this yield site — it promotes
/// through the scope, crashing the spawning frame; fence with
/// [`crate::combinator::call`] to observe it as an error.
pub fn spawn<T: 'static>(op: Operation<T>) -> Operation<Task<T>> {
    Operation::from_coro(move || {
        Box::new(SpawnCoro {
            op: Some(op.clone()),
        })
    })
}

struct SpawnCoro<T> {
    op: Option<Operation<T>>,
}

impl<T: 'static> Coro for SpawnCoro<T> {
    fn step(&mut self, input: Input) -> Result<Step> {
        match input {
            Input::Resume(v) => match self.op.take() {
                Some(op) => Ok(Step::Yield(Instruction::Spawn(op.instantiate()))),
                None => {
                    let raw = downcast::<RawTask>(v)?;
                    Ok(Step::Done(Box::new(Task::<T>::from_raw(raw))))
                }
            },
            Input::Fail(e) => Err(e),
            Input::Halt => Ok(Step::Done(unit())),
        }
    }
}

/// Registers a synchronous cleanup thunk on the current frame.
///
/// Thunks run in reverse registration order on every terminal path —
/// return, failure, and halt — after the frame's body has unwound.
pub fn ensure<F>(thunk: F) -> Operation<()>
where
    F: Fn() + 'static,
{
    let thunk = Rc::new(thunk);
    Operation::from_coro(move || {
        let thunk = Rc::clone(&thunk);
        Box::new(EnsureCoro {
            entry: Some(ExitEntry::Sync(Box::new(move || thunk()))),
        })
    })
}

/// Registers a cleanup operation on the current frame.
///
/// Like [`ensure`], but the entry is a full operation driven to
/// completion during teardown — it may suspend, sleep, or use other
/// frames' machinery.
pub fn ensure_op(op: Operation<()>) -> Operation<()> {
    Operation::from_coro(move || {
        Box::new(EnsureCoro {
            entry: Some(ExitEntry::Op(op.instantiate())),
        })
    })
}

struct EnsureCoro {
    entry: Option<ExitEntry>,
}

impl Coro for EnsureCoro {
    fn step(&mut self, input: Input) -> Result<Step> {
        match input {
            Input::Resume(_) => match self.entry.take() {
                Some(entry) => Ok(Step::Yield(Instruction::Ensure(entry))),
                None => Ok(Step::Done(unit())),
            },
            Input::Fail(e) => Err(e),
            Input::Halt => Ok(Step::Done(unit())),
        }
    }
}

/// Resumes with a handle onto the current frame's scope.
///
/// The handle outlives the frame only as a key: once the scope has
/// terminated, [`Scope::run`] fails with
/// [`ErrorKind::ScopeClosed`](crate::error::ErrorKind::ScopeClosed).
#[must_use]
pub fn current_scope() -> Operation<Scope> {
    Operation::from_coro(|| Box::new(ScopeCoro { yielded: false }))
}

struct ScopeCoro {
    yielded: bool,
}

impl Coro for ScopeCoro {
    fn step(&mut self, input: Input) -> Result<Step> {
        match input {
            Input::Resume(v) => {
                if self.yielded {
                    Ok(Step::Done(v))
                } else {
                    self.yielded = true;
                    Ok(Step::Yield(Instruction::GetScope))
                }
            }
            Input::Fail(e) => Err(e),
            Input::Halt => Ok(Step::Done(unit())),
        }
    }
}
