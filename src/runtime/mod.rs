//! The evaluator core, scope tree, task handles, and driver.

pub(crate) mod core;
pub(crate) mod evaluator;
pub(crate) mod frame;
pub mod future;
pub(crate) mod scope;
pub mod task;
pub(crate) mod timer;
#[allow(clippy::module_inception)]
mod runtime;

pub use evaluator::Resume;
pub use future::RawResolver;
pub use runtime::{main, Runtime};
pub use scope::Scope;
pub use task::Task;
