pub mod classifier;
pub mod collector;
pub mod engine;
pub mod expander;
pub mod finding;
pub mod result_aggregator;
pub mod store;
pub mod submission;
pub mod target_manager;
