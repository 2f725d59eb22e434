//! Operon: a structured-concurrency runtime built on lazy operations.
//!
//! # Overview
//!
//! The unit of work is an [`Operation`]: an inert, restartable recipe for
//! an asynchronous computation. The unit of execution is a frame bound to
//! a [`Scope`] in a lifetime tree. The core guarantees:
//!
//! - **Bounded lifetimes**: every started operation lives inside its
//!   enclosing scope; nothing outlives its parent.
//! - **Deterministic unwinding**: a scope that completes, fails, or is
//!   halted tears its children down in reverse attachment order, awaiting
//!   each frame's cleanup before the next.
//! - **Cleanup always runs**: `ensure` entries and `finally` arms run on
//!   every exit path — return, failure, and halt alike.
//! - **Quiet cancellation**: halting is not an error. A halted frame runs
//!   all of its cleanup and settles silently; only the host-future view
//!   surfaces a sentinel rejection.
//! - **Deliberate error boundaries**: background failures promote through
//!   the scope tree rather than popping up at arbitrary yield points;
//!   [`call`] converts them into catchable foreground failures.
//!
//! # Example
//!
//! ```
//! use operon::{race, sleep, Runtime};
//! use std::time::Duration;
//!
//! let runtime = Runtime::deterministic();
//! let fastest = race(vec![
//!     sleep(Duration::from_millis(10)).map(|()| "quick"),
//!     sleep(Duration::from_secs(10)).map(|()| "slow"),
//! ]);
//! assert_eq!(runtime.block_on(fastest).unwrap(), "quick");
//! // The losing sleep's timer was cleared during its halt.
//! assert_eq!(runtime.outstanding_timers(), 0);
//! ```
//!
//! # Module structure
//!
//! - [`op`]: operations, the coroutine ABI, and the primitives
//! - [`runtime`]: the evaluator, scope tree, task handles, and driver
//! - [`combinator`]: `all`, `race`, `call`, `with_timeout`
//! - [`channel`]: multi-subscriber channels, subscriptions, signals
//! - [`time`]: `sleep`
//! - [`types`]: identifiers, outcomes, halt reasons
//! - [`error`]: the error type and kinds

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]

pub mod channel;
pub mod combinator;
pub mod error;
pub mod op;
pub mod runtime;
pub mod test_utils;
pub mod time;
pub mod tracing_compat;
pub mod types;
pub mod util;

pub use channel::{
    create_channel, create_channel_with_capacity, create_signal, Next, Port, Signal, Stream,
    Subscription,
};
pub use combinator::{all, call, race, with_timeout};
pub use error::{Error, ErrorKind, Result, ResultExt};
pub use op::{
    action, current_scope, ensure, ensure_op, resource, spawn, suspend, Operation, Provider,
    Resolver,
};
pub use runtime::{main, Resume, Runtime, Scope, Task};
pub use time::sleep;
pub use types::{HaltKind, HaltReason, Outcome, Time};
