//! Benchmark for a denormalised prefix-table schema.
//!
//! Every operation row carries a dot-separated `type_path`; one extra row per
//! ancestor prefix is written to `operation_prefixes` so "latest N under
//! prefix P" becomes an index range scan. This crate seeds that schema in
//! parallel batches, drives weighted read/write mixes against it from worker
//! threads and reports per-kind latency percentiles.
//!
//! Run benchmarks: `cargo bench`
//! Run tests: `cargo test`

pub mod config;
pub mod loader;
pub mod orchestrator;
pub mod report;
pub mod schema;
pub mod store;
pub mod validate;
pub mod workload;
