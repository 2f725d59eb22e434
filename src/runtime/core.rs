//! The evaluator core: arenas, job queue, clock, and timers.
//!
//! All shared mutable state lives here behind a single `RefCell`. The
//! borrow discipline is strict: user code (coroutine steps, installers,
//! cleanup thunks, timer callbacks) always runs with the core released,
//! and re-enters only by pushing jobs. State-mutating evaluator functions
//! take `&mut Core`, mutate, enqueue, and return — actual coroutine
//! stepping happens only in the drain loop.

use crate::op::coro::Input;
use crate::runtime::frame::FrameRecord;
use crate::runtime::future::FutureRef;
use crate::runtime::scope::ScopeRecord;
use crate::runtime::timer::TimerTable;
use crate::types::{FrameId, ScopeId, Time};
use crate::util::Arena;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

/// A unit of work on the FIFO queue.
pub(crate) enum Job {
    /// Feed a signal into a frame's coroutine stack. `token` guards
    /// staleness: a frame that suspended again or entered teardown since
    /// the job was queued ignores it.
    Pump {
        frame: FrameId,
        token: u64,
        signal: Input,
    },
    /// Advance a frame's teardown state machine.
    Teardown { frame: FrameId },
    /// Advance a scope's child-teardown driver.
    ScopeAdvance { scope: ScopeId },
    /// Route a settled future back into the frame awaiting it.
    FutureReady { slot: FutureRef },
}

/// The single-threaded evaluator state.
pub(crate) struct Core {
    pub frames: Arena<FrameRecord>,
    pub scopes: Arena<ScopeRecord>,
    pub queue: VecDeque<Job>,
    /// Set while the drain loop runs; re-entrant kicks just enqueue.
    pub draining: bool,
    /// Current logical time; advanced by the driver.
    pub now: Time,
    pub timers: TimerTable,
}

impl Core {
    pub fn new() -> Self {
        Self {
            frames: Arena::new(),
            scopes: Arena::new(),
            queue: VecDeque::new(),
            draining: false,
            now: Time::ZERO,
            timers: TimerTable::new(),
        }
    }

    /// True when no jobs are queued and no frames are live.
    pub fn is_quiescent(&self) -> bool {
        self.queue.is_empty() && self.frames.is_empty()
    }
}

/// The shared handle the whole runtime hangs off.
pub(crate) type CoreHandle = Rc<RefCell<Core>>;
