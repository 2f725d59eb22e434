//! Frame records: the activation state of a running operation.
//!
//! A frame owns its coroutine delegation stack and its exit stack
//! exclusively; the arena in [`Core`](crate::runtime::core::Core) owns the
//! frame. Teardown is a staged state machine driven through the job
//! queue, never recursively, so cleanup from many frames interleaves
//! without ever overlapping within one frame.

use crate::error::Error;
use crate::op::coro::{BoxCoro, Value};
use crate::op::instruction::ExitEntry;
use crate::runtime::evaluator::Resume;
use crate::runtime::future::FutureRef;
use crate::runtime::task::SettleCell;
use crate::types::{FrameId, HaltReason, ScopeId};
use smallvec::SmallVec;
use std::rc::Rc;

/// Where a frame is in its lifecycle.
///
/// The teardown phases run strictly in order: foreground setup child,
/// own delegation stack, exit stack, then the children of the frame's
/// scope. A frame in any teardown phase absorbs further halt requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    /// Created and queued, never stepped.
    Created,
    /// Running or suspended inside the operation body.
    Body,
    /// Waiting for the foreground child of an action/resource await to
    /// finish its own teardown.
    TeardownForeground,
    /// Unwinding the delegation stack with halt signals.
    TeardownUnwind,
    /// Draining the exit stack in reverse registration order.
    TeardownExits,
    /// Waiting for the frame's own scope to halt its children.
    TeardownChildren,
}

/// Why a frame is suspended.
pub(crate) enum Waiting {
    /// Parked behind a [`Resume`] handle held by the outside world.
    Install,
    /// Awaiting the resolution of an action whose body is still live.
    ActionSetup { body: FrameId },
    /// Resolution arrived; the body frame is being torn down before the
    /// value is delivered.
    ActionFinish { body: FrameId, future: FutureRef },
    /// Awaiting a resource body's published handle.
    ResourceSetup { body: FrameId },
    /// A resource body parked at its provide point; only scope teardown
    /// continues from here.
    Provided,
}

/// How a frame's failure routes.
pub(crate) enum Role {
    /// A task frame: failure promotes to the owning scope, halting
    /// siblings and crashing the scope's owner.
    Background,
    /// An action/resource body: failure settles the linked future and
    /// surfaces at the waiting frame's yield site.
    Foreground { future: FutureRef },
}

/// The outcome a frame will settle with once teardown completes.
pub(crate) enum PendingOutcome {
    Value(Value),
    Error(Error),
    Halted,
}

/// An observer notified when a frame settles.
pub(crate) enum Waiter {
    /// A task join: delivered the value, the error, or — for a halted
    /// frame — a quiet halt of the joining frame itself.
    Join { resume: Resume },
    /// A halt acknowledgement: resumed with unit once teardown completes,
    /// whatever the outcome.
    HaltAck { resume: Resume },
    /// An action waiting for its body to finish halting before taking the
    /// resolved value.
    BodySettled { parent: FrameId, token: u64 },
    /// A frame in [`Phase::TeardownForeground`] waiting on its setup
    /// child.
    TeardownForeground { parent: FrameId },
    /// A scope teardown driver waiting on one child before halting the
    /// next.
    ScopeDriver { scope: ScopeId },
}

/// The activation record of a running operation.
pub(crate) struct FrameRecord {
    /// The scope this frame is attached to.
    pub scope: ScopeId,
    /// The scope this frame owns; spawns, action/resource bodies, and
    /// injected work attach here.
    pub own_scope: ScopeId,
    /// The coroutine delegation stack; the top entry is active.
    pub stack: SmallVec<[BoxCoro; 4]>,
    /// Cleanup entries, run in reverse order during teardown.
    pub exit_stack: SmallVec<[ExitEntry; 2]>,
    pub phase: Phase,
    /// Present while the frame is suspended.
    pub waiting: Option<Waiting>,
    /// Resume generation; bumped on every suspension and on teardown
    /// entry so stale resumptions miss.
    pub token: u64,
    /// Set when teardown begins; consumed at settle.
    pub pending: Option<PendingOutcome>,
    /// Errors collected during the teardown sweep.
    pub teardown_errors: Vec<Error>,
    /// Number of stack entries that have not yet received their halt
    /// signal during [`Phase::TeardownUnwind`].
    pub halt_mark: usize,
    pub role: Role,
    pub waiters: Vec<Waiter>,
    /// Shared with task handles; set exactly once, at settle.
    pub settled: Rc<SettleCell>,
    /// Why teardown started, for diagnostics.
    pub halt_reason: Option<HaltReason>,
}

impl FrameRecord {
    pub fn new(coro: BoxCoro, scope: ScopeId, own_scope: ScopeId, role: Role) -> Self {
        let mut stack = SmallVec::new();
        stack.push(coro);
        Self {
            scope,
            own_scope,
            stack,
            exit_stack: SmallVec::new(),
            phase: Phase::Created,
            waiting: None,
            token: 1,
            pending: None,
            teardown_errors: Vec::new(),
            halt_mark: 0,
            role,
            waiters: Vec::new(),
            settled: Rc::new(SettleCell::new()),
            halt_reason: None,
        }
    }

    /// True once any teardown phase has begun.
    pub fn is_tearing_down(&self) -> bool {
        matches!(
            self.phase,
            Phase::TeardownForeground
                | Phase::TeardownUnwind
                | Phase::TeardownExits
                | Phase::TeardownChildren
        )
    }

    /// Records a halt reason, keeping the most severe.
    pub fn note_halt_reason(&mut self, reason: HaltReason) {
        match &mut self.halt_reason {
            Some(existing) => {
                existing.strengthen(&reason);
            }
            None => self.halt_reason = Some(reason),
        }
    }
}
