//! Time primitives.

mod sleep;

pub use sleep::sleep;
