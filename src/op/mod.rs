//! Operations: lazy, restartable recipes for asynchronous computations.
//!
//! An [`Operation`] is a value describing a computation. Nothing happens
//! until it is handed to a scope; each run instantiates a fresh coroutine,
//! so one operation can be run many times and the runs are independent.
//! Because of that, everything an operation captures must be cloneable —
//! the adapters below thread `Clone` and `Fn` bounds through for exactly
//! this reason.
//!
//! Sequencing is expressed with [`Operation::then`] (run another operation
//! with the result), failures are handled with [`Operation::or_else`], and
//! cleanup that must run on value, failure, and halt paths alike is
//! expressed with [`Operation::finally`]. The primitives live in
//! [`primitive`]; structured composition in [`crate::combinator`].

pub mod coro;
pub mod instruction;
pub mod primitive;

pub use coro::{downcast, unit, BoxCoro, Coro, Input, Step, Value};
pub use instruction::{ActionBody, ExitEntry, Install, Instruction};
pub use primitive::{
    action, current_scope, ensure, ensure_op, resource, spawn, suspend, Provider, Resolver,
};

use crate::error::{Error, Result};
use std::marker::PhantomData;
use std::rc::Rc;

/// A lazy, restartable description of an asynchronous computation
/// producing a `T`.
///
/// Operations are cheap to clone (the recipe is reference-counted) and
/// inert until run under a scope.
pub struct Operation<T> {
    make: Rc<dyn Fn() -> BoxCoro>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Operation<T> {
    fn clone(&self) -> Self {
        Self {
            make: Rc::clone(&self.make),
            _marker: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for Operation<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operation").finish_non_exhaustive()
    }
}

impl<T: 'static> Operation<T> {
    /// Creates an operation from a coroutine factory.
    ///
    /// This is the open extension point: any state machine implementing
    /// [`Coro`] whose final value is a boxed `T` can be wrapped. The
    /// factory is called once per run.
    pub fn from_coro<F>(factory: F) -> Self
    where
        F: Fn() -> BoxCoro + 'static,
    {
        Self {
            make: Rc::new(factory),
            _marker: PhantomData,
        }
    }

    /// Instantiates a fresh coroutine for one run (internal use).
    pub(crate) fn instantiate(&self) -> BoxCoro {
        (self.make)()
    }

    /// An operation that immediately completes with a clone of `value`.
    pub fn value(value: T) -> Self
    where
        T: Clone,
    {
        Self::from_fn(move || value.clone())
    }

    /// An operation that computes its result synchronously.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn() -> T + 'static,
    {
        let f = Rc::new(f);
        Self::from_coro(move || {
            let f = Rc::clone(&f);
            Box::new(FnCoro { f: Some(f) })
        })
    }

    /// An operation that computes its result synchronously and may fail.
    pub fn try_from_fn<F>(f: F) -> Self
    where
        F: Fn() -> Result<T> + 'static,
    {
        let f = Rc::new(f);
        Self::from_coro(move || {
            let f = Rc::clone(&f);
            Box::new(TryFnCoro { f: Some(f) })
        })
    }

    /// An operation that immediately fails with a clone of `error`.
    pub fn fail(error: Error) -> Self {
        Self::try_from_fn(move || Err(error.clone()))
    }

    /// Sequences another operation after this one.
    ///
    /// `f` receives the result and returns the operation to continue with.
    /// Errors skip `f` and propagate.
    pub fn then<U, F>(self, f: F) -> Operation<U>
    where
        U: 'static,
        F: Fn(T) -> Operation<U> + 'static,
    {
        let f = Rc::new(f);
        Operation::from_coro(move || {
            let f = Rc::clone(&f);
            Box::new(ThenCoro::<T, U> {
                inner: Some(self.instantiate()),
                f,
                state: ThenState::Start,
                _marker: PhantomData,
            })
        })
    }

    /// Transforms the result with a synchronous function.
    pub fn map<U, F>(self, f: F) -> Operation<U>
    where
        U: 'static,
        F: Fn(T) -> U + 'static,
    {
        let f = Rc::new(f);
        Operation::from_coro(move || {
            let f = Rc::clone(&f);
            Box::new(MapCoro::<T, U> {
                inner: Some(self.instantiate()),
                f,
                started: false,
                _marker: PhantomData,
            })
        })
    }

    /// Handles a failure of this operation.
    ///
    /// `f` receives the error raised at this point and returns the
    /// recovery operation. Halts are not errors and cannot be handled
    /// here; background failures crash the enclosing frame and bypass
    /// this handler unless fenced with [`crate::combinator::call`].
    pub fn or_else<F>(self, f: F) -> Operation<T>
    where
        F: Fn(Error) -> Operation<T> + 'static,
    {
        let f = Rc::new(f);
        Operation::from_coro(move || {
            let f = Rc::clone(&f);
            Box::new(CatchCoro::<T> {
                inner: Some(self.instantiate()),
                f,
                state: ThenState::Start,
                _marker: PhantomData,
            })
        })
    }

    /// Runs `cleanup` after this operation on every path: value, failure,
    /// and halt. The original result is preserved unless cleanup itself
    /// fails, in which case the cleanup error wins (with the original
    /// error, if any, attached as suppressed).
    pub fn finally(self, cleanup: Operation<()>) -> Operation<T> {
        Operation::from_coro(move || {
            Box::new(FinallyCoro {
                inner: Some(self.instantiate()),
                cleanup: cleanup.clone(),
                state: FinallyState::Start,
            })
        })
    }
}

// =========================================================================
// Adapter coroutines
// =========================================================================

struct FnCoro<T> {
    f: Option<Rc<dyn Fn() -> T>>,
}

impl<T: 'static> Coro for FnCoro<T> {
    fn step(&mut self, input: Input) -> Result<Step> {
        match input {
            Input::Resume(_) => {
                let f = self
                    .f
                    .take()
                    .ok_or_else(|| Error::internal("coroutine stepped after completion"))?;
                Ok(Step::Done(Box::new(f())))
            }
            Input::Fail(e) => Err(e),
            Input::Halt => Ok(Step::Done(unit())),
        }
    }
}

struct TryFnCoro<T> {
    f: Option<Rc<dyn Fn() -> Result<T>>>,
}

impl<T: 'static> Coro for TryFnCoro<T> {
    fn step(&mut self, input: Input) -> Result<Step> {
        match input {
            Input::Resume(_) => {
                let f = self
                    .f
                    .take()
                    .ok_or_else(|| Error::internal("coroutine stepped after completion"))?;
                Ok(Step::Done(Box::new(f()?)))
            }
            Input::Fail(e) => Err(e),
            Input::Halt => Ok(Step::Done(unit())),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ThenState {
    Start,
    First,
    Second,
}

struct ThenCoro<T, U> {
    inner: Option<BoxCoro>,
    f: Rc<dyn Fn(T) -> Operation<U>>,
    state: ThenState,
    _marker: PhantomData<fn(T) -> U>,
}

impl<T: 'static, U: 'static> Coro for ThenCoro<T, U> {
    fn step(&mut self, input: Input) -> Result<Step> {
        match (self.state, input) {
            (ThenState::Start, Input::Resume(_)) => {
                let inner = self
                    .inner
                    .take()
                    .ok_or_else(|| Error::internal("sequence coroutine restarted"))?;
                self.state = ThenState::First;
                Ok(Step::Yield(Instruction::Delegate(inner)))
            }
            (ThenState::First, Input::Resume(v)) => {
                let value = downcast::<T>(v)?;
                let next = (self.f)(value);
                self.state = ThenState::Second;
                Ok(Step::Yield(Instruction::Delegate(next.instantiate())))
            }
            (ThenState::Second, Input::Resume(v)) => Ok(Step::Done(v)),
            (_, Input::Fail(e)) => Err(e),
            (_, Input::Halt) => Ok(Step::Done(unit())),
        }
    }
}

struct MapCoro<T, U> {
    inner: Option<BoxCoro>,
    f: Rc<dyn Fn(T) -> U>,
    started: bool,
    _marker: PhantomData<fn(T) -> U>,
}

impl<T: 'static, U: 'static> Coro for MapCoro<T, U> {
    fn step(&mut self, input: Input) -> Result<Step> {
        match input {
            Input::Resume(v) => {
                if self.started {
                    let value = downcast::<T>(v)?;
                    Ok(Step::Done(Box::new((self.f)(value))))
                } else {
                    self.started = true;
                    let inner = self
                        .inner
                        .take()
                        .ok_or_else(|| Error::internal("map coroutine restarted"))?;
                    Ok(Step::Yield(Instruction::Delegate(inner)))
                }
            }
            Input::Fail(e) => Err(e),
            Input::Halt => Ok(Step::Done(unit())),
        }
    }
}

struct CatchCoro<T> {
    inner: Option<BoxCoro>,
    f: Rc<dyn Fn(Error) -> Operation<T>>,
    state: ThenState,
    _marker: PhantomData<fn() -> T>,
}

impl<T: 'static> Coro for CatchCoro<T> {
    fn step(&mut self, input: Input) -> Result<Step> {
        match (self.state, input) {
            (ThenState::Start, Input::Resume(_)) => {
                let inner = self
                    .inner
                    .take()
                    .ok_or_else(|| Error::internal("catch coroutine restarted"))?;
                self.state = ThenState::First;
                Ok(Step::Yield(Instruction::Delegate(inner)))
            }
            (ThenState::First, Input::Resume(v)) | (ThenState::Second, Input::Resume(v)) => {
                Ok(Step::Done(v))
            }
            (ThenState::First, Input::Fail(e)) => {
                let recovery = (self.f)(e);
                self.state = ThenState::Second;
                Ok(Step::Yield(Instruction::Delegate(recovery.instantiate())))
            }
            (_, Input::Fail(e)) => Err(e),
            (_, Input::Halt) => Ok(Step::Done(unit())),
        }
    }
}

enum FinallyState {
    Start,
    Main,
    CleanupOk(Value),
    CleanupErr(Error),
    CleanupHalt,
}

struct FinallyCoro {
    inner: Option<BoxCoro>,
    cleanup: Operation<()>,
    state: FinallyState,
}

impl Coro for FinallyCoro {
    fn step(&mut self, input: Input) -> Result<Step> {
        let state = std::mem::replace(&mut self.state, FinallyState::Start);
        match (state, input) {
            (FinallyState::Start, Input::Resume(_)) => {
                let inner = self
                    .inner
                    .take()
                    .ok_or_else(|| Error::internal("finally coroutine restarted"))?;
                self.state = FinallyState::Main;
                Ok(Step::Yield(Instruction::Delegate(inner)))
            }
            (FinallyState::Start, Input::Fail(e)) => Err(e),
            // Halt before the body started: nothing to clean up.
            (FinallyState::Start, Input::Halt) => Ok(Step::Done(unit())),
            (FinallyState::Main, Input::Resume(v)) => {
                self.state = FinallyState::CleanupOk(v);
                Ok(Step::Yield(Instruction::Delegate(
                    self.cleanup.instantiate(),
                )))
            }
            (FinallyState::Main, Input::Fail(e)) => {
                self.state = FinallyState::CleanupErr(e);
                Ok(Step::Yield(Instruction::Delegate(
                    self.cleanup.instantiate(),
                )))
            }
            (FinallyState::Main, Input::Halt) => {
                self.state = FinallyState::CleanupHalt;
                Ok(Step::Yield(Instruction::Delegate(
                    self.cleanup.instantiate(),
                )))
            }
            (FinallyState::CleanupOk(v), Input::Resume(_)) => Ok(Step::Done(v)),
            (FinallyState::CleanupOk(_), Input::Fail(cleanup_err)) => Err(cleanup_err),
            (FinallyState::CleanupOk(_), Input::Halt)
            | (FinallyState::CleanupHalt, Input::Resume(_) | Input::Halt) => {
                Ok(Step::Done(unit()))
            }
            (FinallyState::CleanupErr(e), Input::Resume(_) | Input::Halt) => Err(e),
            (FinallyState::CleanupErr(e), Input::Fail(cleanup_err)) => {
                Err(e.with_suppressed([cleanup_err]))
            }
            (FinallyState::CleanupHalt, Input::Fail(cleanup_err)) => Err(cleanup_err),
        }
    }
}
