//! Stepsheet engine: the table model, dtype coercion, sorting and the
//! Rhai-backed formula evaluator that step performers build on.

pub(crate) mod builtins;
pub mod engine;

pub use engine::*;
