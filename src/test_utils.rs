//! Shared helpers for tests.
//!
//! Tests run on the deterministic runtime: virtual time jumps straight to
//! the next timer deadline, so even hour-long sleeps settle instantly and
//! every interleaving is reproducible.

use crate::op::Operation;
use crate::runtime::Runtime;
use crate::types::Outcome;

/// Creates the deterministic runtime tests drive.
#[must_use]
pub fn test_runtime() -> Runtime {
    Runtime::deterministic()
}

/// Drives `op` to completion on a fresh deterministic runtime.
pub fn drive<T: Clone + 'static>(op: Operation<T>) -> Outcome<T> {
    test_runtime().block_on(op)
}

/// Asserts an outcome is a value and returns it.
#[macro_export]
macro_rules! assert_ok {
    ($outcome:expr) => {
        match $outcome {
            $crate::types::Outcome::Ok(v) => v,
            other => panic!("expected Ok outcome, got {other:?}"),
        }
    };
}

/// Asserts an outcome is an error and returns it.
#[macro_export]
macro_rules! assert_err {
    ($outcome:expr) => {
        match $outcome {
            $crate::types::Outcome::Err(e) => e,
            $crate::types::Outcome::Ok(_) => panic!("expected Err outcome, got Ok"),
            $crate::types::Outcome::Halted => panic!("expected Err outcome, got Halted"),
        }
    };
}

/// Asserts an outcome is a quiet halt.
#[macro_export]
macro_rules! assert_halted {
    ($outcome:expr) => {
        match $outcome {
            $crate::types::Outcome::Halted => {}
            $crate::types::Outcome::Ok(_) => panic!("expected Halted outcome, got Ok"),
            $crate::types::Outcome::Err(e) => panic!("expected Halted outcome, got Err: {e}"),
        }
    };
}
