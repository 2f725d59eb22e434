//! Error types and error handling strategy.
//!
//! This module defines the core error type used throughout the runtime.
//! Error handling follows these principles:
//!
//! - Errors are explicit and typed (no stringly-typed errors)
//! - Halting is not an error; the [`ErrorKind::Halted`] sentinel exists
//!   only at the host boundary, where a halted task surfaces as a
//!   rejected future
//! - Cleanup errors never abort a teardown sweep; the first error becomes
//!   the cause and the rest ride along as suppressed errors
//! - Panics in user closures are isolated and converted to
//!   [`ErrorKind::Panicked`] errors

use core::fmt;
use std::sync::Arc;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Sentinel for a halted frame observed through a host future.
    Halted,
    /// A deadline elapsed before the operation completed.
    Timeout,
    /// Work was submitted to a scope that has already terminated.
    ScopeClosed,
    /// A second consumer tried to read a subscription that already has a
    /// parked reader.
    SubscriptionBusy,
    /// An operation body panicked.
    Panicked,
    /// Internal runtime error (bug).
    Internal,
    /// User-provided error.
    User,
}

/// The main error type for runtime operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    context: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
    suppressed: Vec<Error>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
            source: None,
            suppressed: Vec::new(),
        }
    }

    /// Creates a user error from a message.
    #[must_use]
    pub fn user(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::User).with_context(message)
    }

    /// Creates a user error wrapping an arbitrary error value.
    #[must_use]
    pub fn caused_by(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::new(ErrorKind::User).with_source(source)
    }

    /// Creates the halt sentinel error.
    #[must_use]
    pub const fn halted() -> Self {
        Self::new(ErrorKind::Halted)
    }

    /// Creates a timeout error.
    #[must_use]
    pub const fn timeout() -> Self {
        Self::new(ErrorKind::Timeout)
    }

    /// Creates a scope-closed error.
    #[must_use]
    pub const fn scope_closed() -> Self {
        Self::new(ErrorKind::ScopeClosed)
    }

    /// Creates an internal error with context (a runtime bug).
    #[must_use]
    pub fn internal(context: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal).with_context(context)
    }

    /// Creates a panic error from a caught panic payload.
    #[must_use]
    pub fn panicked(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        Self::new(ErrorKind::Panicked).with_context(message)
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns true if this error is the halt sentinel.
    #[must_use]
    pub const fn is_halt(&self) -> bool {
        matches!(self.kind, ErrorKind::Halted)
    }

    /// Returns true if this error is a timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self.kind, ErrorKind::Timeout)
    }

    /// Adds deterministic context text to the error.
    #[must_use]
    pub fn with_context(mut self, ctx: impl Into<String>) -> Self {
        self.context = Some(ctx.into());
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Attaches errors that were collected alongside this one.
    ///
    /// Used during teardown sweeps: the first cleanup failure becomes the
    /// cause, later ones are recorded here instead of being dropped.
    #[must_use]
    pub fn with_suppressed(mut self, suppressed: impl IntoIterator<Item = Error>) -> Self {
        self.suppressed.extend(suppressed);
        self
    }

    /// Returns the errors suppressed by this one.
    #[must_use]
    pub fn suppressed(&self) -> &[Error] {
        &self.suppressed
    }

    /// Returns the context string, if any.
    #[must_use]
    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(ctx) = &self.context {
            write!(f, ": {ctx}")?;
        }
        if !self.suppressed.is_empty() {
            write!(f, " (+{} suppressed)", self.suppressed.len())?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

/// Extension trait for adding context to results.
pub trait ResultExt<T> {
    /// Attach a context string on error.
    fn context(self, ctx: impl Into<String>) -> Result<T>;
    /// Attach context computed lazily on error.
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for core::result::Result<T, E> {
    fn context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(ctx))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| e.into().with_context(f()))
    }
}

/// A specialized `Result` type for runtime operations.
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[derive(Debug)]
    struct Underlying;

    impl fmt::Display for Underlying {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "underlying")
        }
    }

    impl std::error::Error for Underlying {}

    #[test]
    fn display_without_context() {
        let err = Error::new(ErrorKind::Internal);
        assert_eq!(err.to_string(), "Internal");
    }

    #[test]
    fn display_with_context() {
        let err = Error::new(ErrorKind::Timeout).with_context("after 5ms");
        assert_eq!(err.to_string(), "Timeout: after 5ms");
    }

    #[test]
    fn display_counts_suppressed() {
        let err = Error::user("first").with_suppressed([Error::user("second")]);
        assert!(err.to_string().contains("+1 suppressed"));
    }

    #[test]
    fn source_chain_is_exposed() {
        let err = Error::caused_by(Underlying).with_context("outer");
        let source = err.source().expect("source missing");
        assert_eq!(source.to_string(), "underlying");
    }

    #[test]
    fn halt_sentinel_is_recognizable() {
        assert!(Error::halted().is_halt());
        assert!(!Error::user("boom").is_halt());
    }

    #[test]
    fn panic_payload_message_is_extracted() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("went sideways");
        let err = Error::panicked(boxed.as_ref());
        assert_eq!(err.kind(), ErrorKind::Panicked);
        assert_eq!(err.context(), Some("went sideways"));

        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        let err = Error::panicked(boxed.as_ref());
        assert_eq!(err.context(), Some("owned"));
    }

    #[test]
    fn result_ext_adds_context() {
        let res: core::result::Result<(), Error> = Err(Error::new(ErrorKind::ScopeClosed));
        let err = res.context("inject failed").expect_err("expected err");
        assert_eq!(err.kind(), ErrorKind::ScopeClosed);
        assert_eq!(err.to_string(), "ScopeClosed: inject failed");
    }
}
