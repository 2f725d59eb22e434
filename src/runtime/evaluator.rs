//! The trampoline that drives frames.
//!
//! One FIFO job queue, drained to exhaustion by [`kick`]. Each job either
//! feeds a signal into a frame's coroutine stack, advances a teardown
//! state machine, advances a scope's child-teardown driver, or routes a
//! settled future. Within one pump, a frame runs through consecutive
//! synchronous instructions; it leaves the loop only by suspending or
//! settling.
//!
//! Re-entrancy is handled structurally: user code (coroutine steps,
//! suspension installers, cleanup thunks) always runs with the core
//! released, and everything it may trigger — resumes, resolver settles,
//! host injection — enqueues work instead of recursing. A kick issued
//! while a drain is in progress is a no-op; the in-flight drain picks the
//! new jobs up.
//!
//! # Teardown
//!
//! A frame tears down in fixed phases: the foreground child of a pending
//! action/resource await first (this is what makes nested action escapes
//! unwind innermost-first), then its own delegation stack under halt
//! signals, then the exit stack in reverse, then the children of its
//! scope in reverse attachment order, each awaited fully before the next.
//! Errors raised anywhere in the sweep are collected, never fatal to the
//! sweep itself; the first becomes the settling cause and the rest ride
//! along as suppressed.
//!
//! # Error promotion
//!
//! A background frame settling with an error marks its scope terminal,
//! halts the remaining siblings (reverse order), and then crashes the
//! scope's owner frame: the owner unwinds exactly like a halt but settles
//! with the error, which promotes it one level further. Foreground frames
//! (action and resource bodies) instead settle their linked future, so
//! their failures surface catchably at the awaiting yield site. `call`
//! turns the first mechanism into the second, which is all an error
//! boundary is.

use crate::error::{Error, Result};
use crate::op::coro::{unit, BoxCoro, Input, SharedValue, Step, Value};
use crate::op::instruction::{ActionBody, ExitEntry, Install, Instruction};
use crate::op::Operation;
use crate::runtime::core::{Core, CoreHandle, Job};
use crate::runtime::frame::{FrameRecord, PendingOutcome, Phase, Role, Waiter, Waiting};
use crate::runtime::future::{FutureRef, FutureSlot, FutureState, RawResolver};
use crate::runtime::scope::{AfterTerminate, Scope, ScopeDriver, ScopeRecord, TerminalCause};
use crate::runtime::task::{RawOutcome, RawTask, SettleCell, Task};
use crate::tracing_compat::trace;
use crate::types::{FrameId, HaltReason, ScopeId};
use std::cell::RefCell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::{Rc, Weak};

// =========================================================================
// Resume handle
// =========================================================================

/// The handle that resumes a suspended frame.
///
/// Handed to the installer of a suspension; invoking it feeds a value or
/// an error back into the frame at its yield point. Delivery is always
/// deferred through the job queue, so a handle may be invoked from
/// anywhere — including synchronously inside the installer — without
/// re-entering the evaluator. Only the first valid invocation counts;
/// a handle that has gone stale (the frame resumed another way, entered
/// teardown, or settled) is ignored.
#[derive(Clone)]
pub struct Resume {
    core: Weak<RefCell<Core>>,
    frame: FrameId,
    token: u64,
}

impl Resume {
    /// Resumes the frame with a value.
    pub fn resume(&self, value: Value) {
        self.deliver(Ok(value));
    }

    /// Raises an error at the frame's yield point.
    pub fn fail(&self, error: Error) {
        self.deliver(Err(error));
    }

    fn deliver(&self, result: Result<Value>) {
        let Some(core) = self.core.upgrade() else {
            return;
        };
        {
            let mut c = core.borrow_mut();
            accept_resume(&mut c, self, result);
        }
        kick(&core);
    }
}

impl std::fmt::Debug for Resume {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resume")
            .field("frame", &self.frame)
            .field("token", &self.token)
            .finish()
    }
}

/// Validates a resumption and queues its delivery.
fn accept_resume(c: &mut Core, resume: &Resume, result: Result<Value>) {
    let Some(rec) = c.frames.get_mut(resume.frame.arena_index()) else {
        return;
    };
    if rec.token != resume.token || !matches!(rec.waiting, Some(Waiting::Install)) {
        return;
    }
    rec.waiting = None;
    let signal = match result {
        Ok(v) => Input::Resume(v),
        Err(e) => Input::Fail(e),
    };
    c.queue.push_back(Job::Pump {
        frame: resume.frame,
        token: resume.token,
        signal,
    });
}

/// Halts the frame behind a join resumption: awaiting a halted task
/// yields a halt condition, which tears the awaiter down quietly.
pub(crate) fn halt_joiner(resume: Resume) {
    let Some(core) = resume.core.upgrade() else {
        return;
    };
    {
        let mut c = core.borrow_mut();
        halt_joiner_inner(&mut c, &resume);
    }
    kick(&core);
}

fn halt_joiner_inner(c: &mut Core, resume: &Resume) {
    let Some(rec) = c.frames.get_mut(resume.frame.arena_index()) else {
        return;
    };
    if rec.token != resume.token || !matches!(rec.waiting, Some(Waiting::Install)) {
        return;
    }
    rec.note_halt_reason(HaltReason::requested("awaited task was halted"));
    begin_teardown(c, resume.frame, PendingOutcome::Halted);
}

// =========================================================================
// Entry points
// =========================================================================

/// Creates a frame for `op` under `scope` and returns its task handle.
pub(crate) fn inject<T: 'static>(
    core: &CoreHandle,
    scope: ScopeId,
    op: Operation<T>,
) -> Result<Task<T>> {
    // Instantiate outside the borrow: factories are user code.
    let coro = op.instantiate();
    let mut c = core.borrow_mut();
    let (frame, cell) = create_frame(&mut c, coro, scope, Role::Background)?;
    Ok(Task::from_raw(RawTask {
        frame,
        cell,
        core: Rc::downgrade(core),
    }))
}

/// Creates a frame record, its owned scope, and queues its first pump.
pub(crate) fn create_frame(
    c: &mut Core,
    coro: BoxCoro,
    scope: ScopeId,
    role: Role,
) -> Result<(FrameId, Rc<SettleCell>)> {
    {
        let s = c
            .scopes
            .get(scope.arena_index())
            .ok_or_else(Error::scope_closed)?;
        if s.is_terminal() {
            return Err(Error::scope_closed());
        }
    }
    let own_idx = c.scopes.insert(ScopeRecord::new(Some(scope), None));
    let own_scope = ScopeId::from_arena(own_idx);
    let rec = FrameRecord::new(coro, scope, own_scope, role);
    let cell = Rc::clone(&rec.settled);
    let frame = FrameId::from_arena(c.frames.insert(rec));
    c.scopes
        .get_mut(own_idx)
        .expect("scope record just inserted")
        .owner = Some(frame);
    c.scopes
        .get_mut(scope.arena_index())
        .expect("scope checked live above")
        .children
        .push(frame);
    c.queue.push_back(Job::Pump {
        frame,
        token: 1,
        signal: Input::Resume(unit()),
    });
    trace!(%frame, %scope, "frame created");
    Ok((frame, cell))
}

/// Creates a root scope with no owner frame.
pub(crate) fn create_root_scope(c: &mut Core) -> ScopeId {
    ScopeId::from_arena(c.scopes.insert(ScopeRecord::new(None, None)))
}

// =========================================================================
// Drain loop
// =========================================================================

/// Drains the job queue to exhaustion. Re-entrant kicks are no-ops.
pub(crate) fn kick(core: &CoreHandle) {
    {
        let mut c = core.borrow_mut();
        if c.draining {
            return;
        }
        c.draining = true;
    }
    loop {
        let job = core.borrow_mut().queue.pop_front();
        match job {
            Some(job) => run_job(core, job),
            None => break,
        }
    }
    core.borrow_mut().draining = false;
}

fn run_job(core: &CoreHandle, job: Job) {
    match job {
        Job::Pump {
            frame,
            token,
            signal,
        } => {
            let valid = {
                let c = core.borrow();
                c.frames
                    .get(frame.arena_index())
                    .is_some_and(|rec| rec.token == token)
            };
            if valid {
                pump(core, frame, Some(signal));
            }
        }
        Job::Teardown { frame } => {
            let phase = {
                let c = core.borrow();
                c.frames.get(frame.arena_index()).map(|rec| rec.phase)
            };
            match phase {
                Some(Phase::TeardownForeground) => {
                    // The foreground setup child has settled; unwind our
                    // own stack next.
                    {
                        let mut c = core.borrow_mut();
                        if let Some(rec) = c.frames.get_mut(frame.arena_index()) {
                            rec.phase = Phase::TeardownUnwind;
                            rec.halt_mark = rec.stack.len();
                        }
                    }
                    pump(core, frame, None);
                }
                Some(Phase::TeardownUnwind | Phase::TeardownExits) => pump(core, frame, None),
                Some(Phase::TeardownChildren) => finalize(core, frame),
                _ => {}
            }
        }
        Job::ScopeAdvance { scope } => {
            let mut c = core.borrow_mut();
            scope_advance(&mut c, scope);
        }
        Job::FutureReady { slot } => {
            let mut c = core.borrow_mut();
            future_ready(&mut c, &slot);
        }
    }
}

// =========================================================================
// The pump: one frame, consecutive synchronous program points
// =========================================================================

enum PumpStep {
    /// Step this coroutine with this input.
    Step(BoxCoro, Input),
    /// Run a synchronous exit-stack thunk.
    RunSync(Box<dyn FnOnce()>),
    /// Re-evaluate (a phase transition happened under the borrow).
    Again,
    /// Nothing to do until another job arrives.
    Stop,
}

fn pump(core: &CoreHandle, frame: FrameId, mut signal: Option<Input>) {
    loop {
        let next = {
            let mut c = core.borrow_mut();
            let Some(rec) = c.frames.get_mut(frame.arena_index()) else {
                return;
            };
            if rec.phase == Phase::Created {
                rec.phase = Phase::Body;
            }
            if rec.waiting.is_some() {
                // Suspended; a resumption job will pick this frame up.
                return;
            }
            match rec.phase {
                Phase::Body => match signal.take() {
                    Some(input) => match rec.stack.pop() {
                        Some(coro) => PumpStep::Step(coro, input),
                        None => PumpStep::Stop,
                    },
                    None => PumpStep::Stop,
                },
                Phase::TeardownUnwind => {
                    if rec.stack.is_empty() {
                        rec.phase = Phase::TeardownExits;
                        PumpStep::Again
                    } else {
                        let input = match signal.take() {
                            Some(input) => input,
                            None => {
                                if rec.stack.len() == rec.halt_mark && rec.halt_mark > 0 {
                                    rec.halt_mark -= 1;
                                    Input::Halt
                                } else {
                                    return;
                                }
                            }
                        };
                        let coro = rec.stack.pop().expect("stack checked non-empty");
                        PumpStep::Step(coro, input)
                    }
                }
                Phase::TeardownExits => {
                    if let Some(coro) = rec.stack.pop() {
                        let input = signal.take().unwrap_or_else(|| Input::Resume(unit()));
                        PumpStep::Step(coro, input)
                    } else {
                        match rec.exit_stack.pop() {
                            Some(ExitEntry::Sync(thunk)) => PumpStep::RunSync(thunk),
                            Some(ExitEntry::Op(coro)) => {
                                rec.stack.push(coro);
                                signal = Some(Input::Resume(unit()));
                                PumpStep::Again
                            }
                            None => {
                                // Exit stack drained; halt the children of
                                // our scope, youngest first.
                                rec.phase = Phase::TeardownChildren;
                                let own_scope = rec.own_scope;
                                let cause = match &rec.pending {
                                    Some(PendingOutcome::Error(e)) => {
                                        TerminalCause::Error(e.clone())
                                    }
                                    Some(PendingOutcome::Halted) => TerminalCause::Halt,
                                    _ => TerminalCause::Return,
                                };
                                terminate_scope(
                                    &mut c,
                                    own_scope,
                                    cause,
                                    AfterTerminate::ResumeFrameTeardown(frame),
                                );
                                PumpStep::Stop
                            }
                        }
                    }
                }
                _ => PumpStep::Stop,
            }
        };
        match next {
            PumpStep::Stop => return,
            PumpStep::Again => continue,
            PumpStep::RunSync(thunk) => {
                if let Err(payload) = catch_unwind(AssertUnwindSafe(thunk)) {
                    let mut c = core.borrow_mut();
                    if let Some(rec) = c.frames.get_mut(frame.arena_index()) {
                        rec.teardown_errors.push(Error::panicked(&*payload));
                    }
                }
            }
            PumpStep::Step(mut coro, input) => {
                let result = match catch_unwind(AssertUnwindSafe(|| coro.step(input))) {
                    Ok(result) => result,
                    Err(payload) => Err(Error::panicked(&*payload)),
                };
                match result {
                    Ok(Step::Yield(instr)) => {
                        {
                            let mut c = core.borrow_mut();
                            match c.frames.get_mut(frame.arena_index()) {
                                Some(rec) => rec.stack.push(coro),
                                None => return,
                            }
                        }
                        match dispatch(core, frame, instr) {
                            Some(input) => signal = Some(input),
                            None => return,
                        }
                    }
                    Ok(Step::Done(v)) => {
                        if !absorb_completion(core, frame, Ok(v), &mut signal) {
                            return;
                        }
                    }
                    Err(e) => {
                        if !absorb_completion(core, frame, Err(e), &mut signal) {
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// Handles a coroutine finishing (or failing) on the delegation stack.
///
/// Returns false when the pump should stop (the frame began settling).
fn absorb_completion(
    core: &CoreHandle,
    frame: FrameId,
    result: Result<Value>,
    signal: &mut Option<Input>,
) -> bool {
    let mut c = core.borrow_mut();
    let Some(rec) = c.frames.get_mut(frame.arena_index()) else {
        return false;
    };
    match rec.phase {
        Phase::Body => {
            if rec.stack.is_empty() {
                let pending = match result {
                    Ok(v) => PendingOutcome::Value(v),
                    Err(e) => PendingOutcome::Error(e),
                };
                begin_teardown(&mut c, frame, pending);
                false
            } else {
                *signal = Some(match result {
                    Ok(v) => Input::Resume(v),
                    Err(e) => Input::Fail(e),
                });
                true
            }
        }
        Phase::TeardownUnwind => {
            if rec.stack.len() > rec.halt_mark {
                // A cleanup delegate finished; its result feeds the
                // coroutine that spawned it mid-unwind.
                *signal = Some(match result {
                    Ok(v) => Input::Resume(v),
                    Err(e) => Input::Fail(e),
                });
            } else {
                // A coroutine in the halted region finished; record any
                // failure and let the loop send the next halt.
                if let Err(e) = result {
                    if !e.is_halt() {
                        rec.teardown_errors.push(e);
                    }
                }
                *signal = None;
            }
            true
        }
        Phase::TeardownExits => {
            if rec.stack.is_empty() {
                if let Err(e) = result {
                    rec.teardown_errors.push(e);
                }
                *signal = None;
            } else {
                *signal = Some(match result {
                    Ok(v) => Input::Resume(v),
                    Err(e) => Input::Fail(e),
                });
            }
            true
        }
        _ => false,
    }
}

// =========================================================================
// Instruction dispatch
// =========================================================================

/// Interprets one yielded instruction.
///
/// Returns the input to continue pumping with, or `None` when the frame
/// suspended.
fn dispatch(core: &CoreHandle, frame: FrameId, instr: Instruction) -> Option<Input> {
    match instr {
        Instruction::Delegate(coro) => {
            let mut c = core.borrow_mut();
            c.frames.get_mut(frame.arena_index())?.stack.push(coro);
            Some(Input::Resume(unit()))
        }
        Instruction::Suspend(install) => {
            let resume = {
                let mut c = core.borrow_mut();
                let rec = c.frames.get_mut(frame.arena_index())?;
                rec.token += 1;
                rec.waiting = Some(Waiting::Install);
                Resume {
                    core: Rc::downgrade(core),
                    frame,
                    token: rec.token,
                }
            };
            if let Some(Install(installer)) = install {
                let fallback = resume.clone();
                if let Err(payload) = catch_unwind(AssertUnwindSafe(move || installer(resume))) {
                    // A panicking installer fails the frame at the yield
                    // site (a no-op if it already resumed).
                    fallback.fail(Error::panicked(&*payload));
                }
            }
            None
        }
        Instruction::GetScope => {
            let c = core.borrow();
            let rec = c.frames.get(frame.arena_index())?;
            let scope = Scope {
                core: Rc::downgrade(core),
                id: rec.own_scope,
            };
            Some(Input::Resume(Box::new(scope)))
        }
        Instruction::Ensure(entry) => {
            let mut c = core.borrow_mut();
            c.frames
                .get_mut(frame.arena_index())?
                .exit_stack
                .push(entry);
            Some(Input::Resume(unit()))
        }
        Instruction::Spawn(coro) => {
            let mut c = core.borrow_mut();
            let own_scope = c.frames.get(frame.arena_index())?.own_scope;
            match create_frame(&mut c, coro, own_scope, Role::Background) {
                Ok((child, cell)) => {
                    let raw = RawTask {
                        frame: child,
                        cell,
                        core: Rc::downgrade(core),
                    };
                    Some(Input::Resume(Box::new(raw)))
                }
                Err(e) => Some(Input::Fail(e)),
            }
        }
        Instruction::Action(ActionBody(builder)) => {
            let (slot, resolver) = {
                let mut c = core.borrow_mut();
                let rec = c.frames.get_mut(frame.arena_index())?;
                rec.token += 1;
                let slot = FutureSlot::new(frame, rec.token);
                let resolver = RawResolver {
                    core: Rc::downgrade(core),
                    slot: Rc::clone(&slot),
                };
                (slot, resolver)
            };
            // The body builder is user code; run it with the core free.
            let body = match catch_unwind(AssertUnwindSafe(move || builder(resolver))) {
                Ok(coro) => coro,
                Err(payload) => return Some(Input::Fail(Error::panicked(&*payload))),
            };
            let mut c = core.borrow_mut();
            let own_scope = c.frames.get(frame.arena_index())?.own_scope;
            match create_frame(
                &mut c,
                body,
                own_scope,
                Role::Foreground {
                    future: Rc::clone(&slot),
                },
            ) {
                Err(e) => Some(Input::Fail(e)),
                Ok((body_frame, _cell)) => {
                    let rec = c.frames.get_mut(frame.arena_index())?;
                    rec.waiting = Some(Waiting::ActionSetup { body: body_frame });
                    // The resolver may have fired synchronously while the
                    // body was being built.
                    if !slot.borrow().is_pending() {
                        c.queue.push_back(Job::FutureReady { slot });
                    }
                    None
                }
            }
        }
        Instruction::Resource(body) => {
            let mut c = core.borrow_mut();
            let rec = c.frames.get_mut(frame.arena_index())?;
            rec.token += 1;
            let slot = FutureSlot::new(frame, rec.token);
            let own_scope = rec.own_scope;
            match create_frame(
                &mut c,
                body,
                own_scope,
                Role::Foreground {
                    future: Rc::clone(&slot),
                },
            ) {
                Err(e) => Some(Input::Fail(e)),
                Ok((body_frame, _cell)) => {
                    let rec = c.frames.get_mut(frame.arena_index())?;
                    rec.waiting = Some(Waiting::ResourceSetup { body: body_frame });
                    None
                }
            }
        }
        Instruction::Provide(value) => {
            let mut c = core.borrow_mut();
            let rec = c.frames.get_mut(frame.arena_index())?;
            let slot = match &rec.role {
                Role::Foreground { future } => Rc::clone(future),
                Role::Background => {
                    return Some(Input::Fail(Error::internal(
                        "provide outside a resource body",
                    )))
                }
            };
            rec.token += 1;
            rec.waiting = Some(Waiting::Provided);
            {
                let mut s = slot.borrow_mut();
                if s.is_pending() {
                    s.state = FutureState::Ready(Ok(value));
                } else {
                    return None;
                }
            }
            future_ready(&mut c, &slot);
            None
        }
    }
}

// =========================================================================
// Futures: routing resolutions back into suspended frames
// =========================================================================

enum FutureRoute {
    HaltBody(FrameId),
    Deliver,
    Ignore,
}

/// Routes a settled future to the frame awaiting it.
///
/// For an action whose body is still live, the body is halted first and
/// the value held until its teardown completes; for a resource, the body
/// stays parked and the handle is delivered immediately.
pub(crate) fn future_ready(c: &mut Core, slot: &FutureRef) {
    let (parent, parent_token) = {
        let s = slot.borrow();
        (s.parent, s.parent_token)
    };
    let route = {
        let Some(rec) = c.frames.get(parent.arena_index()) else {
            return;
        };
        if rec.token != parent_token {
            return;
        }
        match &rec.waiting {
            Some(Waiting::ActionSetup { body, .. }) if !slot.borrow().is_pending() => {
                if c.frames.contains(body.arena_index()) {
                    FutureRoute::HaltBody(*body)
                } else {
                    FutureRoute::Deliver
                }
            }
            Some(Waiting::ResourceSetup { .. }) if !slot.borrow().is_pending() => {
                FutureRoute::Deliver
            }
            _ => FutureRoute::Ignore,
        }
    };
    match route {
        FutureRoute::Ignore => {}
        FutureRoute::HaltBody(body) => {
            if let Some(rec) = c.frames.get_mut(parent.arena_index()) {
                rec.waiting = Some(Waiting::ActionFinish {
                    body,
                    future: Rc::clone(slot),
                });
            }
            request_halt(
                c,
                body,
                Some(Waiter::BodySettled {
                    parent,
                    token: parent_token,
                }),
                HaltReason::requested("action settled"),
            );
        }
        FutureRoute::Deliver => deliver_future(c, slot, parent, parent_token),
    }
}

fn deliver_future(c: &mut Core, slot: &FutureRef, parent: FrameId, parent_token: u64) {
    let Some(taken) = slot.borrow_mut().take() else {
        return;
    };
    let Some(rec) = c.frames.get_mut(parent.arena_index()) else {
        return;
    };
    if rec.token != parent_token {
        return;
    }
    rec.waiting = None;
    let signal = match taken {
        Ok(v) => Input::Resume(v),
        Err(e) => Input::Fail(e),
    };
    c.queue.push_back(Job::Pump {
        frame: parent,
        token: parent_token,
        signal,
    });
}

// =========================================================================
// Teardown
// =========================================================================

/// Requests a frame's teardown, optionally registering a settle observer.
///
/// Idempotent: a frame already tearing down absorbs the request (the
/// observer still fires at settle), and a request against a missing frame
/// notifies the observer immediately.
pub(crate) fn request_halt(
    c: &mut Core,
    frame: FrameId,
    waiter: Option<Waiter>,
    reason: HaltReason,
) {
    match c.frames.get_mut(frame.arena_index()) {
        None => {
            if let Some(w) = waiter {
                notify_waiter(c, w, &RawOutcome::Halted);
            }
        }
        Some(rec) => {
            rec.note_halt_reason(reason);
            if let Some(w) = waiter {
                rec.waiters.push(w);
            }
            if !rec.is_tearing_down() {
                begin_teardown(c, frame, PendingOutcome::Halted);
            }
        }
    }
}

/// Tears a frame down with an error outcome (a background child failed).
///
/// The error is not catchable inside the frame: cleanup runs as for a
/// halt, and the frame settles with the error, promoting it upward.
pub(crate) fn crash_frame(c: &mut Core, frame: FrameId, error: Error) {
    match c.frames.get_mut(frame.arena_index()) {
        None => {
            trace!(%frame, %error, "crash arrived after settle");
        }
        Some(rec) if rec.is_tearing_down() => {
            rec.teardown_errors.push(error);
        }
        Some(rec) => {
            rec.note_halt_reason(HaltReason::sibling_failed());
            begin_teardown(c, frame, PendingOutcome::Error(error));
        }
    }
}

/// Moves a frame out of its body and into the teardown pipeline.
fn begin_teardown(c: &mut Core, frame: FrameId, pending: PendingOutcome) {
    let Some(rec) = c.frames.get_mut(frame.arena_index()) else {
        return;
    };
    if rec.is_tearing_down() {
        if let PendingOutcome::Error(e) = pending {
            rec.teardown_errors.push(e);
        }
        return;
    }
    trace!(%frame, "teardown begins");
    rec.pending = Some(pending);
    rec.token += 1;
    match rec.waiting.take() {
        Some(
            Waiting::ActionSetup { body, .. }
            | Waiting::ResourceSetup { body, .. }
            | Waiting::ActionFinish { body, .. },
        ) => {
            // Halt the foreground setup child before unwinding our own
            // stack: nested actions unwind innermost-first.
            rec.phase = Phase::TeardownForeground;
            request_halt(
                c,
                body,
                Some(Waiter::TeardownForeground { parent: frame }),
                HaltReason::parent_ended(),
            );
        }
        _ => {
            rec.phase = Phase::TeardownUnwind;
            rec.halt_mark = rec.stack.len();
            c.queue.push_back(Job::Teardown { frame });
        }
    }
}

/// Completes a frame: computes the outcome, publishes it, notifies
/// observers, and routes the failure (if any) by role.
fn finalize(core: &CoreHandle, frame: FrameId) {
    let wakers = {
        let mut c = core.borrow_mut();
        let Some(rec) = c.frames.remove(frame.arena_index()) else {
            return;
        };
        c.scopes.remove(rec.own_scope.arena_index());
        if let Some(parent_scope) = c.scopes.get_mut(rec.scope.arena_index()) {
            parent_scope.children.retain(|f| *f != frame);
        }

        let mut errors = rec.teardown_errors;
        let outcome = match rec.pending {
            Some(PendingOutcome::Value(v)) if errors.is_empty() => {
                RawOutcome::Value(Rc::from(v))
            }
            Some(PendingOutcome::Value(_)) => {
                let first = errors.remove(0);
                RawOutcome::Error(first.with_suppressed(errors))
            }
            Some(PendingOutcome::Error(e)) => RawOutcome::Error(e.with_suppressed(errors)),
            Some(PendingOutcome::Halted) if errors.is_empty() => RawOutcome::Halted,
            Some(PendingOutcome::Halted) => {
                let first = errors.remove(0);
                RawOutcome::Error(first.with_suppressed(errors))
            }
            None => RawOutcome::Error(Error::internal("frame finalized without an outcome")),
        };
        trace!(%frame, settled = match &outcome {
            RawOutcome::Value(_) => "value",
            RawOutcome::Error(_) => "error",
            RawOutcome::Halted => "halted",
        }, "frame settled");

        let wakers = rec.settled.settle(outcome.clone());
        for waiter in rec.waiters {
            notify_waiter(&mut c, waiter, &outcome);
        }
        match rec.role {
            Role::Background => {
                if let RawOutcome::Error(e) = &outcome {
                    scope_child_failed(&mut c, rec.scope, e.clone());
                }
            }
            Role::Foreground { future } => {
                let pending = future.borrow().is_pending();
                if pending {
                    let rejection = match &outcome {
                        RawOutcome::Error(e) => Some(e.clone()),
                        RawOutcome::Halted => Some(Error::halted()),
                        // A body that returns without resolving leaves the
                        // awaiting frame parked until its scope ends.
                        RawOutcome::Value(_) => None,
                    };
                    if let Some(e) = rejection {
                        future.borrow_mut().state = FutureState::Ready(Err(e));
                        future_ready(&mut c, &future);
                    }
                }
            }
        }
        wakers
    };
    // Host wakers run arbitrary executor code; wake with the core free.
    for waker in wakers {
        waker.wake();
    }
}

/// Delivers a settle notification to one observer.
fn notify_waiter(c: &mut Core, waiter: Waiter, outcome: &RawOutcome) {
    match waiter {
        Waiter::Join { resume } => match outcome {
            RawOutcome::Value(rc) => accept_resume(
                c,
                &resume,
                Ok(Box::new(SharedValue(Rc::clone(rc))) as Value),
            ),
            RawOutcome::Error(e) => accept_resume(c, &resume, Err(e.clone())),
            RawOutcome::Halted => halt_joiner_inner(c, &resume),
        },
        Waiter::HaltAck { resume } => accept_resume(c, &resume, Ok(unit())),
        Waiter::BodySettled { parent, token } => {
            let slot = match c.frames.get_mut(parent.arena_index()) {
                Some(rec) if rec.token == token => match rec.waiting.take() {
                    Some(Waiting::ActionFinish { future, .. }) => Some(future),
                    other => {
                        rec.waiting = other;
                        None
                    }
                },
                _ => None,
            };
            if let Some(slot) = slot {
                if let Some(taken) = slot.borrow_mut().take() {
                    let signal = match taken {
                        Ok(v) => Input::Resume(v),
                        Err(e) => Input::Fail(e),
                    };
                    c.queue.push_back(Job::Pump {
                        frame: parent,
                        token,
                        signal,
                    });
                }
            }
        }
        Waiter::TeardownForeground { parent } => {
            if let RawOutcome::Error(e) = outcome {
                if let Some(rec) = c.frames.get_mut(parent.arena_index()) {
                    rec.teardown_errors.push(e.clone());
                }
            }
            c.queue.push_back(Job::Teardown { frame: parent });
        }
        Waiter::ScopeDriver { scope } => {
            if let RawOutcome::Error(e) = outcome {
                if let Some(s) = c.scopes.get_mut(scope.arena_index()) {
                    s.collected.push(e.clone());
                }
            }
            c.queue.push_back(Job::ScopeAdvance { scope });
        }
    }
}

// =========================================================================
// Scope termination
// =========================================================================

/// Marks a scope terminal and starts its sequential child teardown.
///
/// Safe to call on an already-terminal scope: the continuation is chained
/// onto the running driver, or run immediately if teardown already
/// finished.
pub(crate) fn terminate_scope(
    c: &mut Core,
    scope: ScopeId,
    cause: TerminalCause,
    after: AfterTerminate,
) {
    let Some(s) = c.scopes.get_mut(scope.arena_index()) else {
        apply_after(c, after, Vec::new());
        return;
    };
    if s.is_terminal() {
        if s.driver.is_some() {
            s.afters.push(after);
        } else {
            let collected = std::mem::take(&mut s.collected);
            apply_after(c, after, collected);
        }
        return;
    }
    trace!(%scope, "scope terminates");
    s.terminal = Some(cause);
    let remaining = s.children.clone();
    s.driver = Some(ScopeDriver { remaining });
    s.afters.push(after);
    c.queue.push_back(Job::ScopeAdvance { scope });
}

/// A background child failed: terminate the scope with its error, halt
/// the remaining siblings, then crash the scope's owner.
pub(crate) fn scope_child_failed(c: &mut Core, scope: ScopeId, error: Error) {
    let Some(s) = c.scopes.get_mut(scope.arena_index()) else {
        return;
    };
    if s.is_terminal() {
        // The sweep is already running; fold the failure into it.
        s.collected.push(error);
        return;
    }
    let after = match s.owner {
        Some(owner) => AfterTerminate::CrashOwner(owner, error.clone()),
        None => AfterTerminate::Root,
    };
    terminate_scope(c, scope, TerminalCause::Error(error), after);
}

/// Halts the scope's children youngest-first, one at a time.
pub(crate) fn scope_advance(c: &mut Core, scope: ScopeId) {
    loop {
        let next_child = {
            let Some(s) = c.scopes.get_mut(scope.arena_index()) else {
                return;
            };
            let Some(driver) = &mut s.driver else {
                return;
            };
            driver.remaining.pop()
        };
        match next_child {
            Some(child) => {
                if c.frames.contains(child.arena_index()) {
                    request_halt(
                        c,
                        child,
                        Some(Waiter::ScopeDriver { scope }),
                        HaltReason::parent_ended(),
                    );
                    return;
                }
                // Already settled and detached; move on.
            }
            None => break,
        }
    }
    let (afters, mut collected) = {
        let Some(s) = c.scopes.get_mut(scope.arena_index()) else {
            return;
        };
        s.driver = None;
        (
            std::mem::take(&mut s.afters),
            std::mem::take(&mut s.collected),
        )
    };
    for after in afters {
        let errors = std::mem::take(&mut collected);
        apply_after(c, after, errors);
    }
}

fn apply_after(c: &mut Core, after: AfterTerminate, errors: Vec<Error>) {
    match after {
        AfterTerminate::ResumeFrameTeardown(frame) => {
            if let Some(rec) = c.frames.get_mut(frame.arena_index()) {
                rec.teardown_errors.extend(errors);
            }
            c.queue.push_back(Job::Teardown { frame });
        }
        AfterTerminate::CrashOwner(frame, error) => {
            let error = if errors.is_empty() {
                error
            } else {
                error.with_suppressed(errors)
            };
            crash_frame(c, frame, error);
        }
        AfterTerminate::Root => {
            if !errors.is_empty() {
                trace!(count = errors.len(), "root scope collected teardown errors");
            }
        }
    }
}
