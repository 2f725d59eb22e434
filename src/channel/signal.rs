//! Signals: plain-callable bridges from host event code into a channel.
//!
//! A signal captures the scope it was created in. Its `send` and `close`
//! are ordinary function calls — no operation, no frame — that inject the
//! corresponding port operation through [`Scope::run`]. Once the captured
//! scope has ended, sends are dropped silently: a late host callback is
//! not an error.

use crate::channel::channel::{create_channel, Port, Stream};
use crate::op::{current_scope, Operation};
use crate::runtime::Scope;
use crate::tracing_compat::trace;

/// A host-callback façade over a channel, bound to the scope that
/// created it.
pub struct Signal<T, C> {
    scope: Scope,
    port: Port<T, C>,
    stream: Stream<T, C>,
}

impl<T, C> Clone for Signal<T, C> {
    fn clone(&self) -> Self {
        Self {
            scope: self.scope.clone(),
            port: self.port.clone(),
            stream: self.stream.clone(),
        }
    }
}

/// Creates a signal bound to the current scope.
///
/// Each run creates a fresh underlying channel; the signal's lifetime is
/// the creating scope's lifetime.
#[must_use]
pub fn create_signal<T: Clone + 'static, C: Clone + 'static>() -> Operation<Signal<T, C>> {
    current_scope().then(|scope: Scope| {
        Operation::from_fn(move || {
            let (port, stream) = create_channel();
            Signal {
                scope: scope.clone(),
                port,
                stream,
            }
        })
    })
}

impl<T: Clone + 'static, C: Clone + 'static> Signal<T, C> {
    /// Sends `value` into the channel from plain host code.
    ///
    /// Dropped silently if the captured scope has ended.
    pub fn send(&self, value: T) {
        if self.scope.run(self.port.send(value)).is_err() {
            trace!("signal send after scope end dropped");
        }
    }

    /// Closes the channel from plain host code.
    ///
    /// Dropped silently if the captured scope has ended.
    pub fn close(&self, value: C) {
        if self.scope.run(self.port.close(value)).is_err() {
            trace!("signal close after scope end dropped");
        }
    }

    /// The subscription recipe for this signal's channel.
    #[must_use]
    pub fn stream(&self) -> Stream<T, C> {
        self.stream.clone()
    }
}

impl<T, C> std::fmt::Debug for Signal<T, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("scope_closed", &self.scope.is_closed())
            .finish_non_exhaustive()
    }
}
