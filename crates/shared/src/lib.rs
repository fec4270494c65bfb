pub mod config;
pub mod metrics;
pub mod symbols;
pub mod types;
