//! Task handles for observing and halting running frames.
//!
//! A [`Task`] combines the settled outcome of a frame with a `halt`
//! operation. It never owns the frame — the scope does — and never
//! extends its lifetime: the handle holds the shared settle cell and a
//! stale-checked frame id, nothing more.
//!
//! A task is consumable three ways:
//! - as an operation, via [`Task::join`]: the awaiting frame receives the
//!   value, the error (catchable at the yield site), or — if the frame
//!   was halted — a quiet halt of its own;
//! - as a host future, via `std::future::Future`: halt surfaces as a
//!   rejection with the [`Error::halted`] sentinel, and the future only
//!   resolves after the frame's teardown has fully completed;
//! - via [`Task::halt`], an operation that completes once teardown ends.

use crate::error::{Error, Result};
use crate::op::coro::{downcast_shared, unit, Coro, Input, SharedValue, Step, Value};
use crate::op::instruction::{Install, Instruction};
use crate::op::Operation;
use crate::runtime::core::Core;
use crate::runtime::evaluator::{self, Resume};
use crate::runtime::frame::Waiter;
use crate::types::{FrameId, HaltReason, Outcome};
use std::any::Any;
use std::cell::{OnceCell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll};

/// A frame's settled outcome, type-erased.
pub(crate) enum RawOutcome {
    Value(Rc<dyn Any>),
    Error(Error),
    Halted,
}

impl Clone for RawOutcome {
    fn clone(&self) -> Self {
        match self {
            Self::Value(rc) => Self::Value(Rc::clone(rc)),
            Self::Error(e) => Self::Error(e.clone()),
            Self::Halted => Self::Halted,
        }
    }
}

/// The settle slot shared between a frame and its task handles.
///
/// Set exactly once, after the frame's teardown has completed — a task
/// observing a value may rely on every cleanup of the frame having run.
pub(crate) struct SettleCell {
    outcome: OnceCell<RawOutcome>,
    wakers: RefCell<Vec<std::task::Waker>>,
}

impl SettleCell {
    pub fn new() -> Self {
        Self {
            outcome: OnceCell::new(),
            wakers: RefCell::new(Vec::new()),
        }
    }

    pub fn get(&self) -> Option<RawOutcome> {
        self.outcome.get().cloned()
    }

    /// Records the outcome; returns the host wakers to wake.
    pub fn settle(&self, outcome: RawOutcome) -> Vec<std::task::Waker> {
        let _ = self.outcome.set(outcome);
        std::mem::take(&mut *self.wakers.borrow_mut())
    }

    pub fn register_waker(&self, waker: &std::task::Waker) {
        let mut wakers = self.wakers.borrow_mut();
        if !wakers.iter().any(|w| w.will_wake(waker)) {
            wakers.push(waker.clone());
        }
    }
}

/// The untyped task handle delivered by the spawn instruction.
pub(crate) struct RawTask {
    pub frame: FrameId,
    pub cell: Rc<SettleCell>,
    pub core: Weak<RefCell<Core>>,
}

impl Clone for RawTask {
    fn clone(&self) -> Self {
        Self {
            frame: self.frame,
            cell: Rc::clone(&self.cell),
            core: Weak::clone(&self.core),
        }
    }
}

/// A handle to a running operation.
pub struct Task<T> {
    raw: RawTask,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T> Clone for Task<T> {
    fn clone(&self) -> Self {
        Self {
            raw: self.raw.clone(),
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("frame", &self.raw.frame)
            .field("settled", &self.raw.cell.get().is_some())
            .finish()
    }
}

impl<T: 'static> Task<T> {
    pub(crate) fn from_raw(raw: RawTask) -> Self {
        Self {
            raw,
            _marker: std::marker::PhantomData,
        }
    }

    pub(crate) fn frame_id(&self) -> FrameId {
        self.raw.frame
    }

    /// Returns true once the frame has settled.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.raw.cell.get().is_some()
    }

    /// Peeks at the settled outcome without waiting.
    #[must_use]
    pub fn outcome(&self) -> Option<Outcome<T>>
    where
        T: Clone,
    {
        self.raw.cell.get().map(|raw| match raw {
            RawOutcome::Value(rc) => match rc.downcast_ref::<T>() {
                Some(v) => Outcome::Ok(v.clone()),
                None => Outcome::Err(Error::internal("settled value had an unexpected type")),
            },
            RawOutcome::Error(e) => Outcome::Err(e),
            RawOutcome::Halted => Outcome::Halted,
        })
    }

    /// Consumes the task as an operation, awaiting the frame's outcome.
    ///
    /// A failure is raised at this yield site and may be handled with
    /// [`Operation::or_else`]; a halted task halts the joining frame
    /// quietly instead.
    #[must_use]
    pub fn join(&self) -> Operation<T>
    where
        T: Clone,
    {
        let raw = self.raw.clone();
        Operation::from_coro(move || {
            Box::new(JoinCoro::<T> {
                raw: raw.clone(),
                yielded: false,
                _marker: std::marker::PhantomData,
            })
        })
    }

    /// Requests the frame's teardown; completes when teardown has
    /// finished. Halting is idempotent: halting a settled or already
    /// halting frame completes once teardown is (already) done.
    #[must_use]
    pub fn halt(&self) -> Operation<()> {
        let raw = self.raw.clone();
        Operation::from_coro(move || {
            Box::new(HaltCoro {
                raw: raw.clone(),
                yielded: false,
            })
        })
    }
}

struct JoinCoro<T> {
    raw: RawTask,
    yielded: bool,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T: Clone + 'static> Coro for JoinCoro<T> {
    fn step(&mut self, input: Input) -> Result<Step> {
        match input {
            Input::Resume(v) => {
                if self.yielded {
                    Ok(Step::Done(Box::new(downcast_shared::<T>(v)?)))
                } else {
                    self.yielded = true;
                    let raw = self.raw.clone();
                    let install = Install(Box::new(move |resume| deliver_join(&raw, resume)));
                    Ok(Step::Yield(Instruction::Suspend(Some(install))))
                }
            }
            Input::Fail(e) => Err(e),
            Input::Halt => Ok(Step::Done(unit())),
        }
    }
}

/// Delivers a join immediately if the frame has settled, or registers a
/// waiter on it.
fn deliver_join(raw: &RawTask, resume: Resume) {
    if let Some(outcome) = raw.cell.get() {
        match outcome {
            RawOutcome::Value(rc) => resume.resume(Box::new(SharedValue(rc)) as Value),
            RawOutcome::Error(e) => resume.fail(e),
            RawOutcome::Halted => evaluator::halt_joiner(resume),
        }
        return;
    }
    let Some(core) = raw.core.upgrade() else {
        evaluator::halt_joiner(resume);
        return;
    };
    let registered = {
        let mut c = core.borrow_mut();
        match c.frames.get_mut(raw.frame.arena_index()) {
            Some(rec) => {
                rec.waiters.push(Waiter::Join { resume: resume.clone() });
                true
            }
            None => false,
        }
    };
    if !registered {
        // Frame record gone without a settled cell: treat as halted.
        evaluator::halt_joiner(resume);
    }
}

struct HaltCoro {
    raw: RawTask,
    yielded: bool,
}

impl Coro for HaltCoro {
    fn step(&mut self, input: Input) -> Result<Step> {
        match input {
            Input::Resume(_) => {
                if self.yielded {
                    Ok(Step::Done(unit()))
                } else {
                    self.yielded = true;
                    let raw = self.raw.clone();
                    let install = Install(Box::new(move |resume| request_halt_ack(&raw, resume)));
                    Ok(Step::Yield(Instruction::Suspend(Some(install))))
                }
            }
            Input::Fail(e) => Err(e),
            Input::Halt => Ok(Step::Done(unit())),
        }
    }
}

/// Requests teardown of the task's frame, acknowledging once it settles.
fn request_halt_ack(raw: &RawTask, resume: Resume) {
    if raw.cell.get().is_some() {
        resume.resume(unit());
        return;
    }
    let Some(core) = raw.core.upgrade() else {
        resume.resume(unit());
        return;
    };
    {
        let mut c = core.borrow_mut();
        if c.frames.contains(raw.frame.arena_index()) {
            evaluator::request_halt(
                &mut c,
                raw.frame,
                Some(Waiter::HaltAck { resume }),
                HaltReason::default(),
            );
        } else {
            drop(c);
            resume.resume(unit());
            return;
        }
    }
    evaluator::kick(&core);
}

impl<T: Clone + 'static> Future for Task<T> {
    type Output = std::result::Result<T, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.raw.cell.get() {
            Some(RawOutcome::Value(rc)) => match rc.downcast_ref::<T>() {
                Some(v) => Poll::Ready(Ok(v.clone())),
                None => Poll::Ready(Err(Error::internal(
                    "settled value had an unexpected type",
                ))),
            },
            Some(RawOutcome::Error(e)) => Poll::Ready(Err(e)),
            Some(RawOutcome::Halted) => Poll::Ready(Err(Error::halted())),
            None => {
                self.raw.cell.register_waker(cx.waker());
                Poll::Pending
            }
        }
    }
}
