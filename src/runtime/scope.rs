//! Scope records and the public scope handle.
//!
//! A scope is a lifetime node: it owns frames in attachment order and
//! never accepts new ones once terminal. Teardown halts children in
//! reverse attachment order, awaiting each frame's full teardown before
//! starting the next, so cleanup never interleaves across siblings.

use crate::error::{Error, Result};
use crate::op::Operation;
use crate::runtime::core::Core;
use crate::runtime::evaluator;
use crate::runtime::task::Task;
use crate::types::{FrameId, ScopeId, TimerId};
use std::cell::RefCell;
use std::rc::Weak;
use std::time::Duration;

/// Why a scope terminated. Exactly one cause is recorded.
#[derive(Debug, Clone)]
pub(crate) enum TerminalCause {
    /// The owner frame's body completed.
    Return,
    /// A child frame failed (or the owner did).
    Error(Error),
    /// The parent asked the scope to unwind.
    Halt,
}

/// What to do once a scope's children have all been torn down.
pub(crate) enum AfterTerminate {
    /// Continue the owner frame's teardown (it is waiting in its
    /// children phase).
    ResumeFrameTeardown(FrameId),
    /// Tear the owner frame down with the promoted error.
    CrashOwner(FrameId, Error),
    /// Root scope: the cause stays recorded on the scope itself.
    Root,
}

/// Sequential reverse-order teardown over a scope's children.
pub(crate) struct ScopeDriver {
    /// Children still to halt; drained from the back.
    pub remaining: Vec<FrameId>,
}

/// A lifetime node owning frames.
pub(crate) struct ScopeRecord {
    #[allow(dead_code)]
    pub parent: Option<ScopeId>,
    /// The frame whose children attach here; `None` only for the root.
    pub owner: Option<FrameId>,
    /// Live child frames in attachment order.
    pub children: Vec<FrameId>,
    pub terminal: Option<TerminalCause>,
    pub driver: Option<ScopeDriver>,
    /// Errors from children that settled after the scope went terminal;
    /// delivered to the teardown continuation.
    pub collected: Vec<Error>,
    /// Continuations to run when the driver finishes.
    pub afters: Vec<AfterTerminate>,
}

impl ScopeRecord {
    pub fn new(parent: Option<ScopeId>, owner: Option<FrameId>) -> Self {
        Self {
            parent,
            owner,
            children: Vec::new(),
            terminal: None,
            driver: None,
            collected: Vec::new(),
            afters: Vec::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal.is_some()
    }
}

/// A handle onto a scope, usable from host code and other operations.
///
/// Obtained with [`current_scope`](crate::op::current_scope) or from
/// [`Runtime::root_scope`](crate::runtime::Runtime::root_scope). The
/// handle never extends the scope's lifetime: once the scope terminates,
/// injection fails with [`ErrorKind::ScopeClosed`].
///
/// [`ErrorKind::ScopeClosed`]: crate::error::ErrorKind::ScopeClosed
#[derive(Clone)]
pub struct Scope {
    pub(crate) core: Weak<RefCell<Core>>,
    pub(crate) id: ScopeId,
}

impl Scope {
    /// Attaches a new frame running `op` to this scope.
    ///
    /// This is the bridge for host callbacks to inject work into a
    /// managed lifetime. The frame is owned by the scope exactly like a
    /// spawn: scope teardown halts it.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorKind::ScopeClosed`] if the scope has terminated
    /// or the runtime is gone.
    ///
    /// [`ErrorKind::ScopeClosed`]: crate::error::ErrorKind::ScopeClosed
    pub fn run<T: 'static>(&self, op: Operation<T>) -> Result<Task<T>> {
        let core = self.core.upgrade().ok_or_else(Error::scope_closed)?;
        let task = evaluator::inject(&core, self.id, op)?;
        evaluator::kick(&core);
        Ok(task)
    }

    /// Returns true if the scope has terminated (or the runtime is gone).
    #[must_use]
    pub fn is_closed(&self) -> bool {
        match self.core.upgrade() {
            Some(core) => {
                let c = core.borrow();
                match c.scopes.get(self.id.arena_index()) {
                    Some(rec) => rec.is_terminal(),
                    None => true,
                }
            }
            None => true,
        }
    }

    /// Installs a timer firing `callback` after `duration` (internal use).
    ///
    /// Returns [`TimerId::NONE`] when the runtime is gone; clearing that
    /// id is a no-op.
    pub(crate) fn set_timer(
        &self,
        duration: Duration,
        callback: impl FnOnce() + 'static,
    ) -> TimerId {
        match self.core.upgrade() {
            Some(core) => {
                let mut c = core.borrow_mut();
                let deadline = c.now + duration;
                c.timers.insert(deadline, Box::new(callback))
            }
            None => TimerId::NONE,
        }
    }

    /// Cancels a timer if it has not fired (internal use).
    pub(crate) fn clear_timer(&self, timer: TimerId) {
        if let Some(core) = self.core.upgrade() {
            core.borrow_mut().timers.cancel(timer);
        }
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope").field("id", &self.id).finish()
    }
}
