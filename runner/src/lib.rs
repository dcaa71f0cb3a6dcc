//! Concurrent latency benchmark for a directory of numbered SQL scripts.
//!
//! Scripts live as `1.sql .. N.sql` in one directory ([`store`]). A
//! benchmark runs each of them a fixed number of times across a bounded
//! worker pool ([`workers`], [`scheduler`]), each run on its own pooled
//! database connection ([`pool`], [`executor`]), and reports min / median /
//! mean / p95 / max latency per script.
//!
//! Run the CLI: `cargo run -- bench 10`
//! Run tests: `cargo test`

pub mod config;
pub mod executor;
pub mod pool;
pub mod report;
pub mod runner;
pub mod scheduler;
pub mod store;
pub mod workers;

pub use runner::SqlRunner;
