pub mod catalog;
pub mod codec;
pub mod config;
pub mod engine;
pub mod errors;
pub mod model;
pub mod providers;
pub mod storage;
pub mod sync;
pub mod usage;
pub mod validation;
pub mod variables;

pub mod report;
