//! Three-valued outcome type with severity lattice.
//!
//! The outcome type represents the settled result of a frame:
//!
//! - `Ok(T)`: the operation body returned a value
//! - `Err(Error)`: the body failed, a child promoted a failure, or cleanup
//!   raised (panics are folded into errors via [`ErrorKind::Panicked`])
//! - `Halted`: the frame was torn down quietly by its scope or a handle
//!
//! These form a severity lattice: `Ok < Halted < Err`. When aggregating
//! outcomes from several frames, the worst outcome wins — a quiet halt
//! never masks a real failure.
//!
//! [`ErrorKind::Panicked`]: crate::error::ErrorKind::Panicked

use crate::error::Error;
use core::fmt;

/// The three-valued outcome of a settled frame.
#[derive(Debug, Clone)]
pub enum Outcome<T> {
    /// The operation returned a value.
    Ok(T),
    /// The operation failed with an error.
    Err(Error),
    /// The frame was halted; cleanup ran and it completed quietly.
    Halted,
}

impl<T> Outcome<T> {
    /// Returns the severity level of this outcome (0 = Ok, 2 = Err).
    #[must_use]
    pub const fn severity(&self) -> u8 {
        match self {
            Self::Ok(_) => 0,
            Self::Halted => 1,
            Self::Err(_) => 2,
        }
    }

    /// Returns true if this outcome is `Ok`.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    /// Returns true if this outcome is `Err`.
    #[must_use]
    pub const fn is_err(&self) -> bool {
        matches!(self, Self::Err(_))
    }

    /// Returns true if this outcome is `Halted`.
    #[must_use]
    pub const fn is_halted(&self) -> bool {
        matches!(self, Self::Halted)
    }

    /// Converts this outcome to a standard `Result`, mapping a halt to the
    /// sentinel error recognizable via [`Error::is_halt`].
    pub fn into_result(self) -> Result<T, Error> {
        match self {
            Self::Ok(v) => Ok(v),
            Self::Err(e) => Err(e),
            Self::Halted => Err(Error::halted()),
        }
    }

    /// Maps the success value using the provided function.
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Outcome<U> {
        match self {
            Self::Ok(v) => Outcome::Ok(f(v)),
            Self::Err(e) => Outcome::Err(e),
            Self::Halted => Outcome::Halted,
        }
    }

    /// Returns the success value or panics.
    ///
    /// # Panics
    ///
    /// Panics if the outcome is not `Ok`.
    #[track_caller]
    pub fn unwrap(self) -> T {
        match self {
            Self::Ok(v) => v,
            Self::Err(e) => panic!("called `Outcome::unwrap()` on an `Err` value: {e}"),
            Self::Halted => panic!("called `Outcome::unwrap()` on a `Halted` value"),
        }
    }

    /// Returns the error or panics.
    ///
    /// # Panics
    ///
    /// Panics if the outcome is not `Err`.
    #[track_caller]
    pub fn unwrap_err(self) -> Error
    where
        T: fmt::Debug,
    {
        match self {
            Self::Ok(v) => panic!("called `Outcome::unwrap_err()` on an `Ok` value: {v:?}"),
            Self::Err(e) => e,
            Self::Halted => panic!("called `Outcome::unwrap_err()` on a `Halted` value"),
        }
    }

    /// Returns the success value or a default.
    pub fn unwrap_or(self, default: T) -> T {
        match self {
            Self::Ok(v) => v,
            _ => default,
        }
    }
}

impl<T> From<Result<T, Error>> for Outcome<T> {
    fn from(result: Result<T, Error>) -> Self {
        match result {
            Ok(v) => Self::Ok(v),
            Err(e) if e.is_halt() => Self::Halted,
            Err(e) => Self::Err(e),
        }
    }
}

/// Compares two outcomes by severity and returns the worse one.
///
/// This implements the lattice join operation; ties keep the first.
pub fn join_outcomes<T>(a: Outcome<T>, b: Outcome<T>) -> Outcome<T> {
    if a.severity() >= b.severity() {
        a
    } else {
        b
    }
}
