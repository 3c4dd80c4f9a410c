//! Per-firing execution state and placeholder resolution.

mod execution;
mod resolver;


pub use execution::{ExecutionContext, ReleaseSignal};
pub use resolver::{VariableResolver, MAX_PASSES};
