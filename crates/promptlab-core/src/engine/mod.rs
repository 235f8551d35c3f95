pub mod runner;

pub use runner::{CellOutcome, ExecutionContext, ExecutionResult, Granularity, Runner};
