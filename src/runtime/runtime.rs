//! The top-level driver: clock, timers, and blocking entry points.
//!
//! The evaluator is purely reactive — jobs in, steps out — so something
//! has to own the clock and decide when time passes. That is the
//! [`Runtime`]: it drains the queue, fires due timers, and either sleeps
//! until the next deadline (wall clock) or jumps straight to it
//! (deterministic clock, the mode every test uses).

use crate::error::Error;
use crate::op::Operation;
use crate::runtime::core::{Core, CoreHandle};
use crate::runtime::evaluator;
use crate::runtime::scope::{Scope, TerminalCause};
use crate::runtime::task::Task;
use crate::tracing_compat::{debug, error};
use crate::types::{HaltReason, Outcome, ScopeId, Time};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How the runtime advances time.
enum Clock {
    /// Track elapsed real time; idle waits sleep the thread.
    Wall { epoch: Instant },
    /// Virtual time: idle waits jump straight to the next deadline.
    Deterministic,
}

/// A single-threaded cooperative runtime.
///
/// Operations injected via [`Runtime::run`] live under the root scope;
/// [`Runtime::block_on`] drives the queue and the clock until the given
/// operation settles. Dropping the runtime drops every record with it —
/// nothing outlives the root.
pub struct Runtime {
    core: CoreHandle,
    root: ScopeId,
    clock: Clock,
    shutdown: Arc<AtomicBool>,
}

impl Runtime {
    /// Creates a wall-clock runtime.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Clock::Wall {
            epoch: Instant::now(),
        })
    }

    /// Creates a deterministic runtime: virtual time that jumps to the
    /// next timer deadline whenever the queue drains empty. Tests use
    /// this for instant, reproducible sleeps.
    #[must_use]
    pub fn deterministic() -> Self {
        Self::with_clock(Clock::Deterministic)
    }

    /// True when no jobs are queued and no frames are live.
    #[must_use]
    pub fn is_quiescent(&self) -> bool {
        self.core.borrow().is_quiescent()
    }

    fn with_clock(clock: Clock) -> Self {
        let core: CoreHandle = Rc::new(RefCell::new(Core::new()));
        let root = evaluator::create_root_scope(&mut core.borrow_mut());
        Self {
            core,
            root,
            clock,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns a handle onto the root scope.
    #[must_use]
    pub fn root_scope(&self) -> Scope {
        Scope {
            core: Rc::downgrade(&self.core),
            id: self.root,
        }
    }

    /// Starts `op` under the root scope and drains the queue once,
    /// without blocking on timers.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorKind::ScopeClosed`](crate::error::ErrorKind::ScopeClosed)
    /// once the root scope has terminated (after a root failure or halt).
    pub fn run<T: 'static>(&self, op: Operation<T>) -> crate::error::Result<Task<T>> {
        self.sync_clock();
        let task = evaluator::inject(&self.core, self.root, op)?;
        evaluator::kick(&self.core);
        Ok(task)
    }

    /// Drives `op` to completion, advancing time as needed.
    pub fn block_on<T: Clone + 'static>(&self, op: Operation<T>) -> Outcome<T> {
        let task = match self.run(op) {
            Ok(task) => task,
            Err(e) => return Outcome::Err(e),
        };
        let mut halt_issued = false;
        loop {
            self.sync_clock();
            self.fire_due_timers();
            evaluator::kick(&self.core);

            if let Some(outcome) = task.outcome() {
                return outcome;
            }
            if self.shutdown.load(Ordering::Relaxed) && !halt_issued {
                debug!("shutdown flag set; halting root scope");
                self.halt_root();
                halt_issued = true;
                continue;
            }

            let next_deadline = self.core.borrow_mut().timers.next_deadline();
            match next_deadline {
                Some(deadline) => match &self.clock {
                    Clock::Deterministic => {
                        self.core.borrow_mut().now = deadline;
                    }
                    Clock::Wall { epoch } => {
                        let now = Time::from_nanos(epoch.elapsed().as_nanos() as u64);
                        let wait = deadline.duration_since(now);
                        if wait > 0 {
                            // Sleep in slices so an external shutdown flag
                            // is noticed promptly.
                            let slice = wait.min(50_000_000);
                            std::thread::sleep(Duration::from_nanos(slice));
                        }
                    }
                },
                None => {
                    // Quiescent with no timers. If someone holds the
                    // shutdown flag they may still set it; otherwise
                    // nothing can ever resume this task, so halt it.
                    if Arc::strong_count(&self.shutdown) > 1 {
                        std::thread::sleep(Duration::from_millis(10));
                    } else if !halt_issued {
                        debug!("runtime quiescent with no timers; halting root task");
                        self.halt_task_frame(&task);
                        halt_issued = true;
                    } else {
                        // Halt issued and still unsettled with nothing
                        // queued: report rather than spin forever.
                        return Outcome::Err(Error::internal(
                            "runtime deadlocked during teardown",
                        ));
                    }
                }
            }
        }
    }

    /// Processes queued work and due timers without blocking.
    ///
    /// On a deterministic runtime this also jumps time forward to each
    /// next deadline until no work remains.
    pub fn run_until_quiescent(&self) {
        loop {
            self.sync_clock();
            self.fire_due_timers();
            evaluator::kick(&self.core);
            let has_jobs = !self.core.borrow().queue.is_empty();
            if has_jobs {
                continue;
            }
            match &self.clock {
                Clock::Deterministic => {
                    let next = self.core.borrow_mut().timers.next_deadline();
                    match next {
                        Some(deadline) => self.core.borrow_mut().now = deadline,
                        None => return,
                    }
                }
                Clock::Wall { .. } => {
                    let due_now = {
                        let mut c = self.core.borrow_mut();
                        let now = c.now;
                        c.timers.next_deadline().is_some_and(|d| d <= now)
                    };
                    if !due_now {
                        return;
                    }
                }
            }
        }
    }

    /// Advances the deterministic clock by `duration`, firing due timers
    /// and draining the queue. A no-op adjustment on a wall-clock
    /// runtime (where time advances by itself).
    pub fn advance(&self, duration: Duration) {
        if let Clock::Deterministic = self.clock {
            let mut c = self.core.borrow_mut();
            c.now = c.now + duration;
        }
        self.fire_due_timers();
        evaluator::kick(&self.core);
    }

    /// The current logical time.
    #[must_use]
    pub fn now(&self) -> Time {
        self.sync_clock();
        self.core.borrow().now
    }

    /// Number of timers installed and not yet fired or cleared. Useful
    /// as a leak check: after a race settles, the losing sleep's timer
    /// must be gone.
    #[must_use]
    pub fn outstanding_timers(&self) -> usize {
        self.core.borrow().timers.outstanding()
    }

    /// A flag that, once set, makes [`Runtime::block_on`] halt the root
    /// scope. Hand it to a host signal handler (e.g. Ctrl-C) to get
    /// graceful, cleanup-running termination from another thread.
    #[must_use]
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Halts everything under the root scope; cleanup runs, the root
    /// records a quiet halt.
    pub fn halt_root(&self) {
        {
            let mut c = self.core.borrow_mut();
            evaluator::terminate_scope(
                &mut c,
                self.root,
                TerminalCause::Halt,
                crate::runtime::scope::AfterTerminate::Root,
            );
        }
        evaluator::kick(&self.core);
    }

    fn halt_task_frame<T: Clone + 'static>(&self, task: &Task<T>) {
        // Halting through the public operation would need a frame to run
        // in; the runtime reaches in directly.
        {
            let mut c = self.core.borrow_mut();
            evaluator::request_halt(&mut c, task.frame_id(), None, HaltReason::shutdown());
        }
        evaluator::kick(&self.core);
    }

    fn sync_clock(&self) {
        if let Clock::Wall { epoch } = &self.clock {
            self.core.borrow_mut().now = Time::from_nanos(epoch.elapsed().as_nanos() as u64);
        }
    }

    fn fire_due_timers(&self) {
        let due = {
            let mut c = self.core.borrow_mut();
            let now = c.now;
            c.timers.pop_due(now)
        };
        // Timer callbacks resume frames; run them with the core free.
        for callback in due {
            callback();
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("root", &self.root)
            .field("quiescent", &self.core.borrow().is_quiescent())
            .finish()
    }
}

/// Runs `op` on a fresh wall-clock runtime bound to process lifecycle.
///
/// The runtime's shutdown flag is wired for host signal handlers via
/// [`Runtime::shutdown_flag`]; when it fires, the root halts and cleanup
/// runs. A failure outcome is logged before being returned; a root halt
/// is quiet.
pub fn main<T: Clone + 'static>(op: Operation<T>) -> Outcome<T> {
    let runtime = Runtime::new();
    let outcome = runtime.block_on(op);
    if let Outcome::Err(e) = &outcome {
        error!(%e, "operation failed");
        eprintln!("operation failed: {e}");
        for suppressed in e.suppressed() {
            eprintln!("  suppressed: {suppressed}");
        }
    }
    outcome
}
