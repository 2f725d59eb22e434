//! Single-shot future slots bridging callbacks into suspended frames.
//!
//! An action allocates one slot; its resolver settles the slot from
//! anywhere (an operation, a timer, a host callback), and the evaluator
//! routes the settled value back into the frame suspended on it. The
//! slot is strictly single-shot: the first settle wins, later settles
//! and stale deliveries are ignored.

use crate::error::Error;
use crate::op::coro::Value;
use crate::runtime::core::{Core, Job};
use crate::runtime::evaluator;
use crate::types::FrameId;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// The state of a single-shot slot.
pub(crate) enum FutureState {
    /// Nothing has settled it yet.
    Pending,
    /// Settled, value not yet delivered.
    Ready(Result<Value, Error>),
    /// Value handed to the waiter.
    Taken,
}

/// A single-shot resolvable slot tied to the frame awaiting it.
pub(crate) struct FutureSlot {
    pub state: FutureState,
    /// The frame suspended on this slot and the resume generation it was
    /// suspended with; a mismatch means the frame moved on.
    pub parent: FrameId,
    pub parent_token: u64,
}

impl FutureSlot {
    pub fn new(parent: FrameId, parent_token: u64) -> FutureRef {
        Rc::new(RefCell::new(Self {
            state: FutureState::Pending,
            parent,
            parent_token,
        }))
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, FutureState::Pending)
    }

    /// Takes the settled value for delivery.
    pub fn take(&mut self) -> Option<Result<Value, Error>> {
        match std::mem::replace(&mut self.state, FutureState::Taken) {
            FutureState::Ready(r) => Some(r),
            other => {
                self.state = other;
                None
            }
        }
    }
}

/// A shared handle to a future slot.
pub(crate) type FutureRef = Rc<RefCell<FutureSlot>>;

/// The untyped resolver half of an action, handed to its body builder.
///
/// This is part of the low-level coroutine ABI; user code normally sees
/// the typed [`Resolver`](crate::op::Resolver) wrapper instead.
pub struct RawResolver {
    pub(crate) core: Weak<RefCell<Core>>,
    pub(crate) slot: FutureRef,
}

impl Clone for RawResolver {
    fn clone(&self) -> Self {
        Self {
            core: Weak::clone(&self.core),
            slot: Rc::clone(&self.slot),
        }
    }
}

impl RawResolver {
    /// Settles the slot. The first call wins; the delivery itself is
    /// deferred through the job queue so a resolver fired from inside a
    /// running frame never re-enters the evaluator.
    pub fn settle(&self, result: Result<Value, Error>) {
        let Some(core) = self.core.upgrade() else {
            return;
        };
        {
            let mut c = core.borrow_mut();
            let mut slot = self.slot.borrow_mut();
            if !slot.is_pending() {
                return;
            }
            slot.state = FutureState::Ready(result);
            drop(slot);
            c.queue.push_back(Job::FutureReady {
                slot: Rc::clone(&self.slot),
            });
        }
        evaluator::kick(&core);
    }
}

impl std::fmt::Debug for RawResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawResolver").finish_non_exhaustive()
    }
}
