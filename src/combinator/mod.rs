//! Structured composition: `all`, `race`, `call`, and `with_timeout`.
//!
//! None of these add machinery of their own — each one is a lowering onto
//! the primitives (`action`, `spawn`, `suspend`, `sleep`), which is what
//! guarantees they inherit the teardown and error-promotion semantics of
//! the evaluator instead of reimplementing them.

mod all;
mod call;
mod race;
mod timeout;

pub use all::all;
pub use call::call;
pub use race::race;
pub use timeout::with_timeout;
