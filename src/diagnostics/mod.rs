//! Runtime diagnostics.
//!
//! The tracer never fails an allocation on its own account; structural
//! limits (full dictionaries, chunk backpressure) surface here instead.

pub mod emit;
pub mod kind;

pub use emit::{emit_once, suppress_diagnostics};
